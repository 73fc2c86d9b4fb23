//! Message audit log backed by MongoDB

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use chrono::{Duration as ChronoDuration, Utc};
use mongodb::options::FindOptions;
use tracing::warn;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{MessageLogDoc, MESSAGE_LOG_COLLECTION};
use crate::store::{
    AuditFilter, AuditLog, AuditPage, AuditQuery, AuditRecord, AuditStats, DeliveryStatus,
    StoreError,
};
use crate::types::TenantId;

pub struct MongoAuditLog {
    logs: MongoCollection<MessageLogDoc>,
}

impl MongoAuditLog {
    pub async fn new(client: &MongoClient) -> Result<Self, StoreError> {
        Ok(Self {
            logs: client
                .collection::<MessageLogDoc>(MESSAGE_LOG_COLLECTION)
                .await?,
        })
    }
}

fn filter_document(filter: &AuditFilter) -> Document {
    let mut query = Document::new();
    if let Some(tenant) = &filter.tenant_id {
        query.insert("tenant_id", tenant.as_str());
    }
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(destination) = &filter.destination {
        query.insert("phone_number", destination.as_str());
    }
    query
}

#[async_trait]
impl AuditLog for MongoAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.logs.insert_one(MessageLogDoc::from(record)).await
    }
}

#[async_trait]
impl AuditQuery for MongoAuditLog {
    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError> {
        let query = filter_document(filter);
        let limit = filter.effective_limit();

        let total = self.logs.count(query.clone()).await?;
        let options = FindOptions::builder()
            .sort(doc! { "recorded_at": -1 })
            .skip(u64::from(filter.offset))
            .limit(i64::from(limit))
            .build();

        let records = self
            .logs
            .find_many(query, Some(options))
            .await?
            .into_iter()
            .filter_map(|d| match AuditRecord::try_from(d) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable audit record: {}", e);
                    None
                }
            })
            .collect();

        Ok(AuditPage {
            records,
            total,
            limit,
            offset: filter.offset,
        })
    }

    async fn stats(&self, tenant: &TenantId) -> Result<AuditStats, StoreError> {
        let base = doc! { "tenant_id": tenant.as_str() };
        let since = DateTime::from_chrono(Utc::now() - ChronoDuration::hours(24));

        let with = |extra: Document| {
            let mut query = base.clone();
            query.extend(extra);
            query
        };

        Ok(AuditStats {
            total: self.logs.count(base.clone()).await?,
            sent: self
                .logs
                .count(with(doc! { "status": DeliveryStatus::Sent.as_str() }))
                .await?,
            failed: self
                .logs
                .count(with(doc! { "status": DeliveryStatus::Failed.as_str() }))
                .await?,
            last_24h: self
                .logs
                .count(with(doc! { "recorded_at": { "$gte": since } }))
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_maps_to_stored_field_names() {
        let filter = AuditFilter {
            tenant_id: Some(TenantId::new("acme").unwrap()),
            status: Some(DeliveryStatus::Failed),
            destination: Some("573001112222".into()),
            ..AuditFilter::default()
        };

        let query = filter_document(&filter);
        assert_eq!(query.get_str("tenant_id").unwrap(), "acme");
        assert_eq!(query.get_str("status").unwrap(), "failed");
        assert_eq!(query.get_str("phone_number").unwrap(), "573001112222");
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(filter_document(&AuditFilter::default()).is_empty());
    }
}
