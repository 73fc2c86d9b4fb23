//! Shared types for Switchboard

pub mod error;
pub mod tenant;

pub use error::{GatewayError, Result};
pub use tenant::{InvalidTenantId, TenantId};
