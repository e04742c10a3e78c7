//! Session token signing and validation
//!
//! A session token is an HS256 JWT with two claims: `sub` (the user id) and
//! `exp` (expiry, seconds since the epoch). Expiry is checked without leeway.
//!
//! The signing key is 32 random bytes kept hex-encoded in the `settings`
//! table under `session_secret`. Rotating it invalidates every outstanding
//! token.
//!
//! This module has no HTTP framework dependencies; the request middleware
//! lives in the service crate.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Settings key holding the token signing secret
pub const SESSION_SECRET_KEY: &str = "session_secret";

/// Signing key length in bytes
pub const SESSION_SECRET_LEN: usize = 32;

/// Token validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Invalid session token signature")]
    InvalidSignature,

    #[error("Session token expired")]
    Expired,

    #[error("Failed to sign session token: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// HMAC key for session tokens
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(Arc<[u8; SESSION_SECRET_LEN]>);

impl SessionSecret {
    /// Fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(Arc::new(bytes))
    }

    /// Parse the stored hex form; `None` unless it is exactly 64 hex digits
    pub fn from_hex(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != SESSION_SECRET_LEN * 2 || !value.is_ascii() {
            return None;
        }

        let mut bytes = [0u8; SESSION_SECRET_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&value[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(Arc::new(bytes)))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
}

/// Issue a token for `user_id` valid for `ttl`
pub fn issue_session_token(
    user_id: Uuid,
    secret: &SessionSecret,
    ttl: Duration,
) -> Result<String, AuthError> {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Signing(e.to_string()))
}

/// Validate a token and return the user it was issued for
///
/// The signature is checked before any claim is trusted.
pub fn validate_session_token(token: &str, secret: &SessionSecret) -> Result<Uuid, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<SessionClaims>(
        token.trim(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    })?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::Malformed)
}

/// Load the signing secret, generating it on first use
///
/// A stored value that is not a valid key is replaced.
pub async fn load_session_secret(db: &SqlitePool) -> Result<SessionSecret, AuthError> {
    let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(SESSION_SECRET_KEY)
        .fetch_optional(db)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

    match stored {
        Some((value,)) => match SessionSecret::from_hex(&value) {
            Some(secret) => Ok(secret),
            None => {
                warn!("Stored session secret is unusable; existing tokens become invalid");
                initialize_session_secret(db).await
            }
        },
        None => initialize_session_secret(db).await,
    }
}

/// Generate and store a new random secret
pub async fn initialize_session_secret(db: &SqlitePool) -> Result<SessionSecret, AuthError> {
    let secret = SessionSecret::generate();

    sqlx::query(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(SESSION_SECRET_KEY)
    .bind(secret.to_hex())
    .execute(db)
    .await
    .map_err(|e| AuthError::Database(e.to_string()))?;

    info!("Generated new session secret");
    Ok(secret)
}
