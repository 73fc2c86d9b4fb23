//! Authentication for Switchboard
//!
//! Provides:
//! - Password hashing with Argon2 for tenant dashboard logins
//! - API key and login token generation
//! - Static admin token validation

pub mod api_key;
pub mod password;

pub use api_key::{
    extract_bearer, generate_api_key, generate_session_token, hash_api_key, AdminTokenValidator,
};
pub use password::{hash_password, verify_password, MIN_PASSWORD_LEN};
