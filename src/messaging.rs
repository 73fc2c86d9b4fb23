//! Audited sends
//!
//! Every send attempt that reaches this service produces exactly one
//! [`AuditRecord`], whatever the outcome. Audit failures are logged and never
//! turn a delivered message into an error.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{Address, SendReceipt};
use crate::registry::SessionRegistry;
use crate::session::{FileSend, SessionError};
use crate::store::{AuditLog, AuditRecord, DeliveryStatus, MessageKind};
use crate::types::TenantId;

/// Default pause between bulk recipients
pub const DEFAULT_BULK_DELAY: Duration = Duration::from_millis(2000);

/// What to send
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    File(FileSend),
}

impl Outbound {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::File(_) => MessageKind::File,
        }
    }
}

/// Per-recipient result of a bulk send
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub phone: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct MessagingService {
    registry: Arc<SessionRegistry>,
    audit: Arc<dyn AuditLog>,
    bulk_delay: Duration,
}

impl MessagingService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        audit: Arc<dyn AuditLog>,
        bulk_delay: Duration,
    ) -> Self {
        Self {
            registry,
            audit,
            bulk_delay,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn send_text(
        &self,
        tenant: &TenantId,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, SessionError> {
        self.send(tenant, destination, &Outbound::Text(text.to_string()))
            .await
    }

    pub async fn send_file(
        &self,
        tenant: &TenantId,
        destination: &str,
        file: FileSend,
    ) -> Result<SendReceipt, SessionError> {
        self.send(tenant, destination, &Outbound::File(file)).await
    }

    /// Send one message and record the attempt.
    pub async fn send(
        &self,
        tenant: &TenantId,
        destination: &str,
        outbound: &Outbound,
    ) -> Result<SendReceipt, SessionError> {
        let started = Instant::now();

        let result = match outbound {
            Outbound::Text(text) => self.registry.send_message(tenant, destination, text).await,
            Outbound::File(file) => {
                self.registry
                    .send_file(tenant, destination, file.clone())
                    .await
            }
        };

        let latency = started.elapsed();
        match &result {
            Ok(receipt) => info!(
                tenant_id = %tenant,
                message_id = %receipt.message_id,
                latency_ms = latency.as_millis() as u64,
                "Message sent"
            ),
            Err(e) => warn!(
                tenant_id = %tenant,
                latency_ms = latency.as_millis() as u64,
                "Send failed: {}",
                e
            ),
        }

        let record = build_record(tenant, destination, outbound, &result, latency);
        self.append(record).await;
        result
    }

    /// Record a request rejected before it reached a session, such as one
    /// missing its destination or body.
    pub async fn record_rejected(
        &self,
        tenant: &TenantId,
        destination: Option<&str>,
        kind: MessageKind,
        message: Option<&str>,
        reason: &str,
    ) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            destination: destination
                .map(normalize_destination)
                .unwrap_or_else(|| "unknown".to_string()),
            kind,
            message: message.map(str::to_string),
            file_url: None,
            caption: None,
            status: DeliveryStatus::Failed,
            error: Some(reason.to_string()),
            provider_message_id: None,
            provider_timestamp: None,
            latency_ms: 0,
            recorded_at: Utc::now(),
        };
        self.append(record).await;
    }

    /// Send the same message to each destination in order, pausing between
    /// recipients.
    ///
    /// The session must already be connected; otherwise nothing is attempted
    /// and `NotConnected` is returned.
    pub async fn send_bulk(
        &self,
        tenant: &TenantId,
        destinations: &[String],
        outbound: &Outbound,
        delay: Option<Duration>,
    ) -> Result<Vec<BulkOutcome>, SessionError> {
        let session = self.registry.ensure_initialized(tenant).await?;
        if !session.status().await.connected {
            return Err(SessionError::NotConnected);
        }

        let delay = delay.unwrap_or(self.bulk_delay);
        let mut outcomes = Vec::with_capacity(destinations.len());

        for (i, destination) in destinations.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.send(tenant, destination, outbound).await {
                Ok(receipt) => BulkOutcome {
                    phone: destination.clone(),
                    success: true,
                    message_id: Some(receipt.message_id),
                    error: None,
                },
                Err(e) => BulkOutcome {
                    phone: destination.clone(),
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }

        debug!(
            tenant_id = %tenant,
            recipients = destinations.len(),
            sent = outcomes.iter().filter(|o| o.success).count(),
            "Bulk send finished"
        );
        Ok(outcomes)
    }

    async fn append(&self, record: AuditRecord) {
        let tenant = record.tenant_id.clone();
        if let Err(e) = self.audit.append(record).await {
            warn!(tenant_id = %tenant, "Failed to append audit record: {}", e);
        }
    }
}

/// Bare user part of a parsable address, otherwise the raw input
pub fn normalize_destination(raw: &str) -> String {
    Address::parse(raw)
        .map(|address| address.user().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

fn build_record(
    tenant: &TenantId,
    destination: &str,
    outbound: &Outbound,
    result: &Result<SendReceipt, SessionError>,
    latency: Duration,
) -> AuditRecord {
    let (message, file_url, caption) = match outbound {
        Outbound::Text(text) => (Some(text.clone()), None, None),
        Outbound::File(file) => (None, Some(file.url.clone()), file.caption.clone()),
    };
    let (status, error, provider_message_id, provider_timestamp) = match result {
        Ok(receipt) => (
            DeliveryStatus::Sent,
            None,
            Some(receipt.message_id.clone()),
            Some(receipt.timestamp),
        ),
        Err(e) => (DeliveryStatus::Failed, Some(e.to_string()), None, None),
    };

    AuditRecord {
        id: Uuid::new_v4(),
        tenant_id: tenant.clone(),
        destination: normalize_destination(destination),
        kind: outbound.kind(),
        message,
        file_url,
        caption,
        status,
        error,
        provider_message_id,
        provider_timestamp,
        latency_ms: latency.as_millis() as u64,
        recorded_at: Utc::now(),
    }
}
