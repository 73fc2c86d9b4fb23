//! HTTP server and shared state

pub mod http;

pub use http::{run, AppState, Stores, MAX_BODY_BYTES};
