//! Tenant directory backed by MongoDB

use async_trait::async_trait;
use bson::{doc, DateTime};
use mongodb::options::FindOptions;
use tracing::{debug, warn};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    LoginSessionDoc, TenantDoc, LOGIN_SESSION_COLLECTION, TENANT_COLLECTION,
};
use crate::store::{
    LoginSession, StoreError, TenantDirectory, TenantRecord, TenantStatus, TenantStore,
    TenantUpdate,
};
use crate::types::TenantId;

pub struct MongoTenantStore {
    client: MongoClient,
    tenants: MongoCollection<TenantDoc>,
    sessions: MongoCollection<LoginSessionDoc>,
}

impl MongoTenantStore {
    /// Open the collections and apply their indexes
    pub async fn new(client: MongoClient) -> Result<Self, StoreError> {
        let tenants = client.collection::<TenantDoc>(TENANT_COLLECTION).await?;
        let sessions = client
            .collection::<LoginSessionDoc>(LOGIN_SESSION_COLLECTION)
            .await?;
        Ok(Self {
            client,
            tenants,
            sessions,
        })
    }

    async fn find_doc(&self, filter: bson::Document) -> Result<Option<TenantRecord>, StoreError> {
        self.tenants
            .find_one(filter)
            .await?
            .map(TenantRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl TenantDirectory for MongoTenantStore {
    async fn find(&self, tenant: &TenantId) -> Result<Option<TenantRecord>, StoreError> {
        self.find_doc(doc! { "tenant_id": tenant.as_str() }).await
    }

    async fn list_active(&self) -> Result<Vec<TenantId>, StoreError> {
        let docs = self
            .tenants
            .find_many(doc! { "status": TenantStatus::Active.as_str() }, None)
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|d| match TenantId::new(d.tenant_id.clone()) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(tenant_id = %d.tenant_id, "Skipping tenant with invalid id: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn update_connection(
        &self,
        tenant: &TenantId,
        connected: bool,
        phone_number: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut set = doc! { "connected": connected };
        if let Some(phone) = phone_number {
            set.insert("phone_number", phone);
        }

        self.tenants
            .update_one(doc! { "tenant_id": tenant.as_str() }, doc! { "$set": set })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MongoTenantStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client.ping().await
    }

    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<TenantRecord>, StoreError> {
        self.find_doc(doc! { "api_key_hash": hash }).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<TenantRecord>, StoreError> {
        self.find_doc(doc! { "email": email.trim().to_lowercase() })
            .await
    }

    async fn list_all(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        self.tenants
            .find_many(doc! {}, Some(options))
            .await?
            .into_iter()
            .map(TenantRecord::try_from)
            .collect()
    }

    async fn create(&self, record: TenantRecord) -> Result<(), StoreError> {
        let tenant_id = record.tenant_id.clone();
        self.tenants
            .insert_one(TenantDoc::from(record))
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => StoreError::Duplicate(format!(
                    "tenant '{}', its email or its API key",
                    tenant_id
                )),
                other => other,
            })?;
        debug!(tenant_id = %tenant_id, "Tenant created");
        Ok(())
    }

    async fn update_profile(
        &self,
        tenant: &TenantId,
        update: TenantUpdate,
    ) -> Result<Option<TenantRecord>, StoreError> {
        let mut set = bson::Document::new();
        if let Some(name) = update.name {
            set.insert("name", name);
        }
        if let Some(email) = update.email {
            set.insert("email", email.trim().to_lowercase());
        }
        if let Some(status) = update.status {
            set.insert("status", status.as_str());
        }
        if let Some(hash) = update.password_hash {
            set.insert("password_hash", hash);
        }

        let result = self
            .tenants
            .update_one(doc! { "tenant_id": tenant.as_str() }, doc! { "$set": set })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => StoreError::Duplicate("email".into()),
                other => other,
            })?;

        if result.matched_count == 0 {
            return Ok(None);
        }
        self.find(tenant).await
    }

    async fn delete(&self, tenant: &TenantId) -> Result<bool, StoreError> {
        let result = self
            .tenants
            .soft_delete(doc! { "tenant_id": tenant.as_str() })
            .await?;
        let sessions = self
            .sessions
            .delete_many(doc! { "tenant_id": tenant.as_str() })
            .await?;
        debug!(tenant_id = %tenant, sessions, "Tenant deleted");
        Ok(result.matched_count > 0)
    }

    async fn create_login_session(&self, session: LoginSession) -> Result<(), StoreError> {
        self.sessions.insert_one(LoginSessionDoc::from(session)).await
    }

    async fn find_login_session(&self, token: &str) -> Result<Option<LoginSession>, StoreError> {
        // The TTL reaper runs about once a minute, so filter on expiry too
        self.sessions
            .find_one(doc! { "token": token, "expires_at": { "$gt": DateTime::now() } })
            .await?
            .map(LoginSession::try_from)
            .transpose()
    }

    async fn delete_login_session(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.delete_many(doc! { "token": token }).await? > 0)
    }
}
