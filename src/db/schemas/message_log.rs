//! Message audit log schema
//!
//! One document per send attempt. Documents are never updated.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::{AuditRecord, DeliveryStatus, MessageKind, StoreError};
use crate::types::TenantId;

pub const MESSAGE_LOG_COLLECTION: &str = "message_logs";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageLogDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// UUID of the attempt
    pub record_id: String,

    pub tenant_id: String,

    pub phone_number: String,

    /// `text` or `file`
    pub message_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// `sent` or `failed`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_sent: Option<DateTime>,

    #[serde(default)]
    pub response_time_ms: i64,

    pub recorded_at: DateTime,
}

impl From<AuditRecord> for MessageLogDoc {
    fn from(record: AuditRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            record_id: record.id.to_string(),
            tenant_id: record.tenant_id.into(),
            phone_number: record.destination,
            message_type: match record.kind {
                MessageKind::Text => "text".to_string(),
                MessageKind::File => "file".to_string(),
            },
            message_text: record.message,
            file_url: record.file_url,
            caption: record.caption,
            status: record.status.as_str().to_string(),
            error_message: record.error,
            message_id: record.provider_message_id,
            timestamp_sent: record.provider_timestamp.map(DateTime::from_chrono),
            response_time_ms: i64::try_from(record.latency_ms).unwrap_or(i64::MAX),
            recorded_at: DateTime::from_chrono(record.recorded_at),
        }
    }
}

impl TryFrom<MessageLogDoc> for AuditRecord {
    type Error = StoreError;

    fn try_from(doc: MessageLogDoc) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("message log {}: {}", doc.record_id, what));

        let id = doc.record_id.parse().map_err(|_| corrupt("bad record id"))?;
        let tenant_id = TenantId::new(doc.tenant_id.clone()).map_err(|_| corrupt("bad tenant id"))?;
        let kind = match doc.message_type.as_str() {
            "text" => MessageKind::Text,
            "file" => MessageKind::File,
            _ => return Err(corrupt("bad message type")),
        };
        let status: DeliveryStatus = doc.status.parse().map_err(|_| corrupt("bad status"))?;

        Ok(Self {
            id,
            tenant_id,
            destination: doc.phone_number,
            kind,
            message: doc.message_text,
            file_url: doc.file_url,
            caption: doc.caption,
            status,
            error: doc.error_message,
            provider_message_id: doc.message_id,
            provider_timestamp: doc.timestamp_sent.map(|t| t.to_chrono()),
            latency_ms: u64::try_from(doc.response_time_ms).unwrap_or(0),
            recorded_at: doc.recorded_at.to_chrono(),
        })
    }
}

impl IntoIndexes for MessageLogDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "tenant_id": 1, "recorded_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_recent_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tenant_id": 1, "phone_number": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_phone_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for MessageLogDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
