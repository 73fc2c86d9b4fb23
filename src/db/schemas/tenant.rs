//! Tenant document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::live_only;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::{StoreError, TenantRecord, TenantStatus};
use crate::types::TenantId;

/// Collection name for tenants
pub const TENANT_COLLECTION: &str = "tenants";

/// Tenant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TenantDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    pub name: String,

    /// Stored lowercased so lookups are case-insensitive
    pub email: String,

    pub password_hash: String,

    pub api_key_hash: String,

    /// `active` or `suspended`
    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default)]
    pub connected: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    pub created_at: DateTime,
}

fn default_status() -> String {
    TenantStatus::Active.as_str().to_string()
}

pub(crate) fn parse_status(raw: &str) -> TenantStatus {
    match raw {
        "suspended" | "inactive" => TenantStatus::Suspended,
        _ => TenantStatus::Active,
    }
}

impl From<TenantRecord> for TenantDoc {
    fn from(record: TenantRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            tenant_id: record.tenant_id.into(),
            name: record.name,
            email: record.email.to_lowercase(),
            password_hash: record.password_hash,
            api_key_hash: record.api_key_hash,
            status: record.status.as_str().to_string(),
            connected: record.connected,
            phone_number: record.phone_number,
            created_at: DateTime::from_chrono(record.created_at),
        }
    }
}

impl TryFrom<TenantDoc> for TenantRecord {
    type Error = StoreError;

    fn try_from(doc: TenantDoc) -> Result<Self, Self::Error> {
        let tenant_id = TenantId::new(doc.tenant_id)
            .map_err(|e| StoreError::Corrupt(format!("tenant document: {}", e)))?;
        Ok(Self {
            tenant_id,
            name: doc.name,
            email: doc.email,
            password_hash: doc.password_hash,
            api_key_hash: doc.api_key_hash,
            status: parse_status(&doc.status),
            connected: doc.connected,
            phone_number: doc.phone_number,
            created_at: doc.created_at.to_chrono(),
        })
    }
}

fn unique(name: &str) -> Option<IndexOptions> {
    Some(
        IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(live_only())
            .name(name.to_string())
            .build(),
    )
}

impl IntoIndexes for TenantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (doc! { "tenant_id": 1 }, unique("tenant_id_unique")),
            (doc! { "email": 1 }, unique("email_unique")),
            (doc! { "api_key_hash": 1 }, unique("api_key_hash_unique")),
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

impl MutMetadata for TenantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> TenantRecord {
        TenantRecord {
            tenant_id: TenantId::new("acme").unwrap(),
            name: "Acme".into(),
            email: "Ops@Acme.Test".into(),
            password_hash: "$argon2id$v=19$stub".into(),
            api_key_hash: "ab".repeat(32),
            status: TenantStatus::Suspended,
            connected: true,
            phone_number: Some("573001112222".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_document_lowercases_email_and_keeps_status() {
        let doc = TenantDoc::from(record());
        assert_eq!(doc.email, "ops@acme.test");
        assert_eq!(doc.status, "suspended");

        let back = TenantRecord::try_from(doc).unwrap();
        assert_eq!(back.tenant_id.as_str(), "acme");
        assert_eq!(back.status, TenantStatus::Suspended);
        assert_eq!(back.created_at, record().created_at);
    }

    #[test]
    fn test_invalid_stored_id_is_corrupt() {
        let mut doc = TenantDoc::from(record());
        doc.tenant_id = "../escape".into();
        assert!(matches!(
            TenantRecord::try_from(doc),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unique_indexes_cover_lookup_keys() {
        let names: Vec<String> = TenantDoc::into_indices()
            .into_iter()
            .filter_map(|(_, opts)| opts.and_then(|o| o.name))
            .collect();
        assert!(names.contains(&"email_unique".to_string()));
        assert!(names.contains(&"api_key_hash_unique".to_string()));
    }
}
