//! Messaging-network capability
//!
//! The wire protocol lives outside this process. A [`ProtocolConnector`]
//! opens one connection per tenant and hands back a [`ProtocolLink`] for
//! outbound operations plus an ordered stream of [`ProtocolEvent`]s.

pub mod address;
pub mod bridge;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::store::ResumeMaterial;
use crate::types::TenantId;

pub use address::{normalize_identity, Address};
pub use bridge::BridgeConnector;

/// Errors raised by a protocol connection
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by network: {0}")]
    Rejected(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Acknowledgement for an accepted outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A document ready to hand to the network
#[derive(Debug, Clone)]
pub struct OutboundDocument {
    pub bytes: Bytes,
    pub mime_type: String,
    pub file_name: String,
    pub caption: Option<String>,
}

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Transient loss; resuming with the stored material should work
    Retryable(String),
    /// The account was unlinked remotely; stored material is useless
    LoggedOut,
}

/// Push events from one connection, delivered in emission order
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Pairing challenge payload to be scanned by the operator's device
    PairingChallenge(String),
    /// Connection is usable; identity is the network's raw account id
    Opened { identity: String },
    Closed(CloseCause),
    /// Fresh resume material to persist
    CredentialsUpdated(ResumeMaterial),
}

/// Outbound half of a live connection
#[async_trait]
pub trait ProtocolLink: Send + Sync {
    async fn send_text(&self, to: &Address, body: &str) -> Result<SendReceipt, ProtocolError>;

    async fn send_document(
        &self,
        to: &Address,
        document: OutboundDocument,
    ) -> Result<SendReceipt, ProtocolError>;

    /// Resolve whether an address exists on the network
    async fn lookup(&self, to: &Address) -> Result<Option<String>, ProtocolError>;

    /// Unlink the account remotely, then terminate
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Terminate locally without unlinking
    async fn disconnect(&self);
}

/// Factory for per-tenant connections
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Open a connection for `tenant`, resuming from `resume` when present.
    ///
    /// Returns once the handshake is done, which is usually before the
    /// connection is `Opened`.
    async fn connect(
        &self,
        tenant: &TenantId,
        resume: Option<ResumeMaterial>,
    ) -> Result<(Arc<dyn ProtocolLink>, mpsc::Receiver<ProtocolEvent>), ProtocolError>;
}
