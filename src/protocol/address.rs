//! Addressing for the messaging network
//!
//! Destinations arrive as free-form phone numbers ("+57 300 111 2222") or as
//! full addresses ("573001112222@s.whatsapp.net", "1203630@g.us"). Both are
//! normalized to a full address before they reach a protocol link.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server suffix for individual user addresses
pub const USER_SERVER: &str = "s.whatsapp.net";

/// A normalized network address (`user@server`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Normalize a destination into a full address.
    ///
    /// Returns `None` when the input carries no usable user part.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Some((user, server)) = input.split_once('@') {
            let user = strip_device(user).trim();
            let server = server.trim().to_ascii_lowercase();
            if user.is_empty() || server.is_empty() {
                return None;
            }
            if server == USER_SERVER {
                let digits = digits_only(user);
                if digits.is_empty() {
                    return None;
                }
                return Some(Self(format!("{}@{}", digits, USER_SERVER)));
            }
            return Some(Self(format!("{}@{}", user, server)));
        }

        let digits = digits_only(input);
        if digits.is_empty() {
            None
        } else {
            Some(Self(format!("{}@{}", digits, USER_SERVER)))
        }
    }

    /// The part before `@`
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this addresses an individual user (as opposed to a group)
    pub fn is_user(&self) -> bool {
        self.0
            .split_once('@')
            .map_or(false, |(_, server)| server == USER_SERVER)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce a resolved account identity to its stable bare form.
///
/// `573001112222:12@s.whatsapp.net` and `573001112222` both become
/// `573001112222`.
pub fn normalize_identity(raw: &str) -> Option<String> {
    let user = raw.trim().split('@').next().unwrap_or_default();
    let user = strip_device(user).trim();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

fn strip_device(user: &str) -> &str {
    user.split(':').next().unwrap_or(user)
}

fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}
