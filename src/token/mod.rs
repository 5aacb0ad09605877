//! Signed, expiring upgrade tokens.
//!
//! Wire form: `base64url(json{uid, exp}) "." base64url(HMAC-SHA256(encoded payload))`,
//! both parts unpadded. Verification is pure computation; nothing is stored.

use crate::error::{Error, TokenError};
use crate::types::UserId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Decoded token payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub uid: UserId,
    /// Absolute expiry, unix seconds.
    pub exp: i64,
}

/// Issues and verifies upgrade tokens with a server-side secret.
#[derive(Clone)]
pub struct TokenCodec {
    keyed: HmacSha256,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> crate::Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|_| Error::Config("invalid token signing key".into()))?;
        Ok(Self { keyed })
    }

    /// Issue a token for `uid` valid for `ttl_secs` from now. A negative ttl yields an
    /// already-expired token.
    pub fn issue(&self, uid: UserId, ttl_secs: i64) -> String {
        self.issue_at(uid, ttl_secs, unix_now())
    }

    /// Issue relative to an explicit clock value (unix seconds).
    pub fn issue_at(&self, uid: UserId, ttl_secs: i64, now: i64) -> String {
        let claims = Claims {
            uid,
            exp: now.saturating_add(ttl_secs),
        };
        // Serializing two integers cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes()));
        format!("{payload}.{signature}")
    }

    /// Return the user id bound to `token`, or `None` on any defect.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Option<UserId> {
        match self.decode(token, now) {
            Ok(claims) => Some(claims.uid),
            Err(e) => {
                tracing::debug!(reason = %e, "rejected upgrade token");
                None
            }
        }
    }

    /// Full verification with the rejection reason.
    pub fn decode(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }
        let tag = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.keyed.clone();
        mac.update(payload.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&tag)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;
        if claims.exp < now {
            return Err(TokenError::Expired);
        }
        if claims.uid <= 0 {
            return Err(TokenError::InvalidUser);
        }
        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.keyed.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
