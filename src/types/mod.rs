/// Application user identifier carried in upgrade tokens and publish requests.
/// Only positive values identify a user.
pub type UserId = i64;

/// Stable per-connection identifier assigned by the server on accept.
pub type ConnectionId = u64;

/// Drop non-positive and repeated ids, keeping first-occurrence order.
pub fn normalize_recipients<I>(ids: I) -> Vec<UserId>
where
    I: IntoIterator<Item = UserId>,
{
    let mut out: Vec<UserId> = Vec::new();
    for id in ids {
        if id > 0 && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
