//! Switchboard - multi-tenant messaging gateway
//!
//! Each tenant gets at most one live protocol session, resumed from stored
//! credentials or paired through a QR challenge, and a REST API to send
//! through it.
//!
//! ## Components
//!
//! - **Sessions**: per-tenant connection state machine with single-flight
//!   initialization and bounded reconnects
//! - **Registry**: the map from tenant to its live session
//! - **Supervisor**: startup restore and periodic keepalive sweeps
//! - **Messaging**: sends that always leave one audit record
//! - **Stores**: MongoDB tenants and audit log, file-backed credentials

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod messaging;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatewayError, Result};
