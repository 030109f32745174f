//! Bearer-token boundary.
//!
//! Tokens are `base64url("<user id>:<expiry unix secs>:<hmac-sha256 hex>")`,
//! signed over `"<user id>:<expiry>"` with the process secret.

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// How long an issued token stays valid, in hours.
pub const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Identity carried by a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates tokens with one shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            bail!("Auth secret must not be empty");
        }

        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow!("Invalid auth secret: {}", e))?;

        Ok(Self { mac })
    }

    /// Issue a token for `user_id`, valid for [`TOKEN_LIFETIME_HOURS`].
    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> String {
        let payload = format!("{}:{}", user_id, (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp());
        let signature = self.sign(&payload);
        URL_SAFE_NO_PAD.encode(format!("{}:{}", payload, signature))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| AuthError::InvalidToken)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidToken)?;

        // User ids may contain ':'; the last two fields never do.
        let (payload, signature) = decoded.rsplit_once(':').ok_or(AuthError::InvalidToken)?;
        let (user_id, expiry) = payload.rsplit_once(':').ok_or(AuthError::InvalidToken)?;

        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidToken)?;
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let expires_at = expiry
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(AuthError::InvalidToken)?;

        if expires_at <= now {
            warn!(user_id = %user_id, expires_at = %expires_at, "Rejected expired token");
            return Err(AuthError::Expired);
        }

        Ok(Claims {
            user_id: user_id.to_string(),
            expires_at,
        })
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let header = header.ok_or(AuthError::MissingHeader)?;

    let (scheme, token) = header
        .split_once(char::is_whitespace)
        .ok_or(AuthError::MalformedHeader)?;
    let token = token.trim();

    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }

    Ok(token)
}
