//! Admin account and admin session schemas

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::metadata::live_only;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::{AdminAccount, AdminSession};

pub const ADMIN_USER_COLLECTION: &str = "admin_users";
pub const ADMIN_SESSION_COLLECTION: &str = "admin_sessions";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AdminUserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stored lowercased so lookups are case-insensitive
    pub username: String,

    /// Argon2 PHC string
    pub password_hash: String,

    pub created_at: DateTime,
}

impl From<AdminAccount> for AdminUserDoc {
    fn from(account: AdminAccount) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            username: account.username.trim().to_lowercase(),
            password_hash: account.password_hash,
            created_at: DateTime::from_chrono(account.created_at),
        }
    }
}

impl From<AdminUserDoc> for AdminAccount {
    fn from(doc: AdminUserDoc) -> Self {
        Self {
            username: doc.username,
            password_hash: doc.password_hash,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

impl IntoIndexes for AdminUserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "username": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(live_only())
                    .name("username_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AdminUserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AdminSessionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub token: String,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    pub created_at: DateTime,

    pub expires_at: DateTime,
}

impl From<AdminSession> for AdminSessionDoc {
    fn from(session: AdminSession) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            token: session.token,
            username: session.username,
            client_ip: session.client_ip,
            user_agent: session.user_agent,
            created_at: DateTime::from_chrono(session.created_at),
            expires_at: DateTime::from_chrono(session.expires_at),
        }
    }
}

impl From<AdminSessionDoc> for AdminSession {
    fn from(doc: AdminSessionDoc) -> Self {
        Self {
            token: doc.token,
            username: doc.username,
            client_ip: doc.client_ip,
            user_agent: doc.user_agent,
            created_at: doc.created_at.to_chrono(),
            expires_at: doc.expires_at.to_chrono(),
        }
    }
}

impl IntoIndexes for AdminSessionDoc {
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

impl MutMetadata for AdminSessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
