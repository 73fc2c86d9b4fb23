//! Connection state machine types

use serde::Serialize;

use super::challenge::PairingChallenge;
use crate::types::TenantId;

/// Where one tenant's connection is in its lifecycle.
///
/// The pairing challenge and resolved identity live inside the variants
/// they belong to, so neither can outlive its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No underlying connection object
    Idle,
    Initializing,
    AwaitingPairing { challenge: PairingChallenge },
    Connected { identity: String },
    /// Retryable close; a re-initialization is scheduled
    Disconnected { reason: String },
    /// Unlinked remotely; this instance is retired
    LoggedOut,
}

/// Discriminant of [`ConnectionState`] for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Initializing,
    AwaitingPairing,
    Connected,
    Disconnected,
    LoggedOut,
}

impl ConnectionState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Initializing => StateKind::Initializing,
            Self::AwaitingPairing { .. } => StateKind::AwaitingPairing,
            Self::Connected { .. } => StateKind::Connected,
            Self::Disconnected { .. } => StateKind::Disconnected,
            Self::LoggedOut => StateKind::LoggedOut,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Connected { identity } => Some(identity),
            _ => None,
        }
    }

    pub fn challenge(&self) -> Option<&PairingChallenge> {
        match self {
            Self::AwaitingPairing { challenge } => Some(challenge),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// A connect attempt is running or has produced a link
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingPairing { .. } | Self::Connected { .. }
        )
    }
}

/// Snapshot of one session for callers and diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub tenant_id: TenantId,
    pub connected: bool,
    pub state: StateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub pairing_pending: bool,
    pub reconnects: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub(crate) fn from_state(
        tenant_id: &TenantId,
        state: &ConnectionState,
        reconnects: u64,
        last_error: Option<String>,
    ) -> Self {
        let disconnect_reason = match state {
            ConnectionState::Disconnected { reason } => Some(reason.clone()),
            _ => None,
        };
        Self {
            tenant_id: tenant_id.clone(),
            connected: state.is_connected(),
            state: state.kind(),
            identity: state.identity().map(str::to_string),
            pairing_pending: state.challenge().is_some(),
            reconnects,
            disconnect_reason,
            last_error,
        }
    }
}
