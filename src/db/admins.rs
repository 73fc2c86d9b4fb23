//! Admin accounts and sessions backed by MongoDB

use async_trait::async_trait;
use bson::{doc, DateTime};
use tracing::debug;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    AdminSessionDoc, AdminUserDoc, ADMIN_SESSION_COLLECTION, ADMIN_USER_COLLECTION,
};
use crate::store::{AdminAccount, AdminSession, AdminStore, StoreError};

pub struct MongoAdminStore {
    admins: MongoCollection<AdminUserDoc>,
    sessions: MongoCollection<AdminSessionDoc>,
}

impl MongoAdminStore {
    pub async fn new(client: &MongoClient) -> Result<Self, StoreError> {
        Ok(Self {
            admins: client
                .collection::<AdminUserDoc>(ADMIN_USER_COLLECTION)
                .await?,
            sessions: client
                .collection::<AdminSessionDoc>(ADMIN_SESSION_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl AdminStore for MongoAdminStore {
    async fn find_admin(&self, username: &str) -> Result<Option<AdminAccount>, StoreError> {
        Ok(self
            .admins
            .find_one(doc! { "username": username.trim().to_lowercase() })
            .await?
            .map(AdminAccount::from))
    }

    async fn create_admin(&self, account: AdminAccount) -> Result<(), StoreError> {
        let doc = AdminUserDoc::from(account);
        let username = doc.username.clone();
        self.admins.insert_one(doc).await.map_err(|e| match e {
            StoreError::Duplicate(_) => StoreError::Duplicate(format!("admin '{}'", username)),
            other => other,
        })?;
        debug!(username = %username, "Admin account created");
        Ok(())
    }

    async fn create_admin_session(&self, session: AdminSession) -> Result<(), StoreError> {
        self.sessions.insert_one(AdminSessionDoc::from(session)).await
    }

    async fn find_admin_session(&self, token: &str) -> Result<Option<AdminSession>, StoreError> {
        // Same as login sessions: the TTL reaper lags, so filter on expiry
        Ok(self
            .sessions
            .find_one(doc! { "token": token, "expires_at": { "$gt": DateTime::now() } })
            .await?
            .map(AdminSession::from))
    }

    async fn delete_admin_session(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.delete_many(doc! { "token": token }).await? > 0)
    }
}
