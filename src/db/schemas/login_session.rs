//! Dashboard login session schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::{LoginSession, StoreError};
use crate::types::TenantId;

pub const LOGIN_SESSION_COLLECTION: &str = "login_sessions";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoginSessionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub token: String,

    pub tenant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    pub created_at: DateTime,

    /// The server drops the document once this passes
    pub expires_at: DateTime,
}

impl From<LoginSession> for LoginSessionDoc {
    fn from(session: LoginSession) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            token: session.token,
            tenant_id: session.tenant_id.into(),
            client_ip: session.client_ip,
            user_agent: session.user_agent,
            created_at: DateTime::from_chrono(session.created_at),
            expires_at: DateTime::from_chrono(session.expires_at),
        }
    }
}

impl TryFrom<LoginSessionDoc> for LoginSession {
    type Error = StoreError;

    fn try_from(doc: LoginSessionDoc) -> Result<Self, Self::Error> {
        let tenant_id = TenantId::new(doc.tenant_id)
            .map_err(|e| StoreError::Corrupt(format!("login session document: {}", e)))?;
        Ok(Self {
            token: doc.token,
            tenant_id,
            client_ip: doc.client_ip,
            user_agent: doc.user_agent,
            created_at: doc.created_at.to_chrono(),
            expires_at: doc.expires_at.to_chrono(),
        })
    }
}

impl IntoIndexes for LoginSessionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tenant_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_id_index".to_string())
                        .build(),
                ),
            ),
            // TTL index: expired sessions are reaped by the server
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .name("expires_at_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for LoginSessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
