//! API keys, login tokens and the admin token
//!
//! Tenant API keys are shown once at creation and stored only as a SHA-256
//! hex digest. Login tokens are random and stored as issued.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random 32-byte value, hex encoded
fn random_hex_32() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// New tenant API key
pub fn generate_api_key() -> String {
    random_hex_32()
}

/// New dashboard login token
pub fn generate_session_token() -> String {
    random_hex_32()
}

/// Storage form of an API key
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// `Authorization: Bearer <key>` -> `<key>`
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Validator for the static admin token
#[derive(Debug, Clone)]
pub struct AdminTokenValidator {
    token: Option<String>,
}

impl AdminTokenValidator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// True only when a token is configured and `presented` matches it
    pub fn validate(&self, presented: Option<&str>) -> bool {
        match (&self.token, presented) {
            (Some(expected), Some(presented)) => constant_time_compare(presented, expected),
            _ => false,
        }
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
