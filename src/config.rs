use crate::error::{Error, Result};
use crate::token::TokenCodec;
use crate::transport::DEFAULT_QUEUE_DEPTH;
use std::time::Duration;

/// Command-line / environment configuration for the relay.
#[derive(Debug, Clone, clap::Args)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CHAT_WS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8081, env = "CHAT_WS_PORT")]
    pub port: u16,

    /// Application secret. Signs upgrade tokens; also the bridge secret when none is set.
    #[arg(long, env = "APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Shared secret expected in `X-Chat-Bridge-Secret` on `/publish`.
    #[arg(long, env = "CHAT_BRIDGE_SECRET", hide_env_values = true)]
    pub bridge_secret: Option<String>,

    /// Close connections that have not completed a request or upgrade after this many
    /// seconds. 0 disables.
    #[arg(long, default_value_t = 30, env = "CHAT_WS_PENDING_TIMEOUT_SECS")]
    pub pending_timeout_secs: u64,

    /// Housekeeping interval in milliseconds.
    #[arg(long, default_value_t = 1000, env = "CHAT_WS_TICK_MS")]
    pub tick_ms: u64,

    /// Largest pending HTTP request the relay will buffer.
    #[arg(long, default_value_t = 1 << 20, env = "CHAT_WS_MAX_REQUEST_BYTES")]
    pub max_request_bytes: usize,

    /// Writes queued per connection before a peer that is not reading gets dropped.
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH, env = "CHAT_WS_OUTBOUND_QUEUE")]
    pub outbound_queue: usize,
}

impl RelayConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Token codec keyed with the application secret. Needs nothing else configured.
    pub fn token_codec(&self) -> Result<TokenCodec> {
        TokenCodec::new(self.app_secret()?.as_bytes())
    }

    fn app_secret(&self) -> Result<&str> {
        non_blank(self.app_secret.as_deref())
            .ok_or_else(|| Error::Config("APP_SECRET must be set".into()))
    }

    /// Validate and derive runtime settings. Blank secrets count as unset.
    pub fn resolve(&self) -> Result<RelaySettings> {
        let app_secret = self.app_secret()?;

        let bridge_secret = match non_blank(self.bridge_secret.as_deref()) {
            Some(s) => s,
            None => {
                tracing::warn!(
                    "CHAT_BRIDGE_SECRET is not set; /publish accepts the application secret"
                );
                app_secret
            }
        };

        let mut settings = RelaySettings::for_secrets(app_secret, bridge_secret)?;
        settings.pending_timeout =
            (self.pending_timeout_secs > 0).then(|| Duration::from_secs(self.pending_timeout_secs));
        settings.tick = Duration::from_millis(self.tick_ms.max(1));
        settings.max_request_bytes = self.max_request_bytes;
        settings.outbound_queue = self.outbound_queue.max(1);
        Ok(settings)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolved settings shared by the event loop and handlers.
#[derive(Clone)]
pub struct RelaySettings {
    pub codec: TokenCodec,
    pub bridge_secret: String,
    /// `None` leaves pending connections open indefinitely.
    pub pending_timeout: Option<Duration>,
    pub tick: Duration,
    pub max_request_bytes: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
}

impl RelaySettings {
    /// Settings with defaults for everything but the secrets.
    pub fn for_secrets(app_secret: &str, bridge_secret: &str) -> Result<Self> {
        Ok(Self {
            codec: TokenCodec::new(app_secret.as_bytes())?,
            bridge_secret: bridge_secret.to_string(),
            pending_timeout: Some(Duration::from_secs(30)),
            tick: Duration::from_secs(1),
            max_request_bytes: 1 << 20,
            outbound_queue: DEFAULT_QUEUE_DEPTH,
        })
    }
}

impl std::fmt::Debug for RelaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySettings")
            .field("pending_timeout", &self.pending_timeout)
            .field("tick", &self.tick)
            .field("max_request_bytes", &self.max_request_bytes)
            .field("outbound_queue", &self.outbound_queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(app: Option<&str>, bridge: Option<&str>) -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            app_secret: app.map(str::to_owned),
            bridge_secret: bridge.map(str::to_owned),
            pending_timeout_secs: 0,
            tick_ms: 250,
            max_request_bytes: 4096,
            outbound_queue: 8,
        }
    }

    #[test]
    fn app_secret_required() {
        assert!(matches!(
            config(None, Some("b")).resolve(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(Some("   "), Some("b")).resolve(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bridge_secret_falls_back_to_app_secret() {
        let s = config(Some("app"), None).resolve().unwrap();
        assert_eq!(s.bridge_secret, "app");
        let s = config(Some("app"), Some(" ")).resolve().unwrap();
        assert_eq!(s.bridge_secret, "app");
        let s = config(Some("app"), Some("bridge")).resolve().unwrap();
        assert_eq!(s.bridge_secret, "bridge");
    }

    #[test]
    fn timings_resolved() {
        let s = config(Some("app"), None).resolve().unwrap();
        assert_eq!(s.pending_timeout, None);
        assert_eq!(s.tick, Duration::from_millis(250));
        assert_eq!(s.max_request_bytes, 4096);
        assert_eq!(s.outbound_queue, 8);
        let mut c = config(Some("app"), None);
        c.pending_timeout_secs = 5;
        assert_eq!(
            c.resolve().unwrap().pending_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn resolved_codec_uses_app_secret() {
        let s = config(Some("app"), Some("bridge")).resolve().unwrap();
        let expected = TokenCodec::new(b"app").unwrap();
        assert_eq!(s.codec.verify(&expected.issue(3, 60)), Some(3));
    }

    #[test]
    fn token_codec_needs_only_the_app_secret() {
        let codec = config(Some("app"), None).token_codec().unwrap();
        let expected = TokenCodec::new(b"app").unwrap();
        assert_eq!(expected.verify(&codec.issue(9, 60)), Some(9));
        assert!(matches!(
            config(None, Some("bridge")).token_codec(),
            Err(Error::Config(_))
        ));
    }
}
