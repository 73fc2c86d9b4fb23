//! Session error taxonomy

/// Classified outcome of a session operation.
///
/// `Clone` so one initialization result can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown tenant '{0}'")]
    UnknownTenant(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    #[error("recipient {0} is not registered on the network")]
    RecipientNotFound(String),

    #[error("session was logged out remotely")]
    LoggedOutRemotely,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("initialization failed: {0}")]
    InitializationFailed(String),
}
