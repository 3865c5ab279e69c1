//! Bearer token verification for the gateway.
//!
//! Registration and password handling live in an external identity module;
//! this server only needs to verify (and, for tooling and tests, mint)
//! compact HMAC-SHA256 tokens: `base64url(claims_json) . base64url(tag)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::protocol::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject: the authenticated user.
    pub sub: UserId,
    /// Display name, used for logs only; gameplay names come from `join`.
    pub name: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

/// Signs and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
    ttl: chrono::Duration,
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish()
    }
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: chrono::Duration::seconds(ttl_secs as i64),
        }
    }

    /// Mint a token for a user. Exposed for room-creation responses,
    /// operational tooling, and tests; interactive logins happen in the
    /// external identity module with the same secret.
    pub fn mint(&self, user_id: UserId, name: &str) -> String {
        self.mint_with_expiry(user_id, name, Utc::now() + self.ttl)
    }

    pub fn mint_with_expiry(
        &self,
        user_id: UserId,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> String {
        let claims = TokenClaims {
            sub: user_id,
            name: name.to_string(),
            exp: expires_at.timestamp(),
        };
        let body = BASE64URL.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let tag = self.tag(body.as_bytes());
        format!("{body}.{}", BASE64URL.encode(tag))
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let (body, tag_b64) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let presented = BASE64URL.decode(tag_b64).map_err(|_| AuthError::Malformed)?;
        let expected = self.tag(body.as_bytes());
        if presented.ct_eq(&expected).unwrap_u8() != 1 {
            return Err(AuthError::BadSignature);
        }

        let claims_json = BASE64URL.decode(body).map_err(|_| AuthError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&claims_json).map_err(|_| AuthError::Malformed)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    fn tag(&self, body: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(body);
        mac.finalize().into_bytes().into()
    }
}
