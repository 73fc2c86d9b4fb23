//! Error types for the HTTP edge of Switchboard
//!
//! Core layers have their own enums (`SessionError`, `StoreError`,
//! `ProtocolError`); everything converges here before becoming a response.

use hyper::StatusCode;

use crate::protocol::ProtocolError;
use crate::session::SessionError;
use crate::store::StoreError;

/// Main error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Session(e) => session_status(e),
            Self::Protocol(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

fn session_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::UnknownTenant(_) => StatusCode::NOT_FOUND,
        SessionError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
        SessionError::RecipientNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::LoggedOutRemotely => StatusCode::CONFLICT,
        SessionError::SendFailed(_)
        | SessionError::FetchFailed(_)
        | SessionError::InitializationFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => Self::Conflict(what),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<ProtocolError> for GatewayError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for GatewayError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_service_statuses() {
        let not_connected: GatewayError = SessionError::NotConnected.into();
        assert_eq!(not_connected.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let unknown: GatewayError = SessionError::UnknownTenant("acme".into()).into();
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);

        let failed: GatewayError = SessionError::SendFailed("socket reset".into()).into();
        assert_eq!(failed.status_code(), StatusCode::BAD_GATEWAY);

        let fetch: GatewayError = SessionError::FetchFailed("HTTP 404".into()).into();
        assert_eq!(fetch.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_store_duplicate_becomes_conflict() {
        let err: GatewayError = StoreError::Duplicate("tenant acme".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: GatewayError = StoreError::Database("timeout".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_session_error_message_is_preserved() {
        let err: GatewayError = SessionError::SendFailed("socket reset".into()).into();
        let (_, body) = err.into_status_code_and_body();
        assert!(body.contains("socket reset"));
    }
}
