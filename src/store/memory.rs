//! In-memory tenant, admin and audit stores for development mode and tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{
    AdminAccount, AdminSession, AdminStore, AuditFilter, AuditLog, AuditPage, AuditQuery,
    AuditRecord, AuditStats, DeliveryStatus, LoginSession, StoreError, TenantDirectory,
    TenantRecord, TenantStore, TenantUpdate,
};
use crate::types::TenantId;

#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: DashMap<TenantId, TenantRecord>,
    sessions: DashMap<String, LoginSession>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantStore {
    async fn find(&self, tenant: &TenantId) -> Result<Option<TenantRecord>, StoreError> {
        Ok(self.tenants.get(tenant).map(|r| r.value().clone()))
    }

    async fn list_active(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(self
            .tenants
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.key().clone())
            .collect())
    }

    async fn update_connection(
        &self,
        tenant: &TenantId,
        connected: bool,
        phone_number: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(mut record) = self.tenants.get_mut(tenant) {
            record.connected = connected;
            if let Some(phone) = phone_number {
                record.phone_number = Some(phone.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<TenantRecord>, StoreError> {
        Ok(self
            .tenants
            .iter()
            .find(|r| r.api_key_hash == hash)
            .map(|r| r.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<TenantRecord>, StoreError> {
        Ok(self
            .tenants
            .iter()
            .find(|r| r.email.eq_ignore_ascii_case(email))
            .map(|r| r.value().clone()))
    }

    async fn list_all(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let mut all: Vec<TenantRecord> = self.tenants.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn create(&self, record: TenantRecord) -> Result<(), StoreError> {
        let clash = self.tenants.iter().any(|r| {
            r.email.eq_ignore_ascii_case(&record.email) || r.api_key_hash == record.api_key_hash
        });
        if clash {
            return Err(StoreError::Duplicate(format!("tenant {}", record.tenant_id)));
        }

        match self.tenants.entry(record.tenant_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Duplicate(format!("tenant {}", record.tenant_id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update_profile(
        &self,
        tenant: &TenantId,
        update: TenantUpdate,
    ) -> Result<Option<TenantRecord>, StoreError> {
        if let Some(email) = &update.email {
            let taken = self
                .tenants
                .iter()
                .any(|r| r.key() != tenant && r.email.eq_ignore_ascii_case(email));
            if taken {
                return Err(StoreError::Duplicate(format!("email {}", email)));
            }
        }

        let Some(mut record) = self.tenants.get_mut(tenant) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(email) = update.email {
            record.email = email;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(hash) = update.password_hash {
            record.password_hash = hash;
        }
        Ok(Some(record.clone()))
    }

    async fn delete(&self, tenant: &TenantId) -> Result<bool, StoreError> {
        self.sessions.retain(|_, s| &s.tenant_id != tenant);
        Ok(self.tenants.remove(tenant).is_some())
    }

    async fn create_login_session(&self, session: LoginSession) -> Result<(), StoreError> {
        self.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn find_login_session(&self, token: &str) -> Result<Option<LoginSession>, StoreError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(token)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone()))
    }

    async fn delete_login_session(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(token).is_some())
    }
}

#[derive(Default)]
pub struct MemoryAdminStore {
    admins: DashMap<String, AdminAccount>,
    sessions: DashMap<String, AdminSession>,
}

impl MemoryAdminStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminStore for MemoryAdminStore {
    async fn find_admin(&self, username: &str) -> Result<Option<AdminAccount>, StoreError> {
        Ok(self
            .admins
            .get(&username.trim().to_lowercase())
            .map(|a| a.value().clone()))
    }

    async fn create_admin(&self, mut account: AdminAccount) -> Result<(), StoreError> {
        account.username = account.username.trim().to_lowercase();
        match self.admins.entry(account.username.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Duplicate(format!("admin {}", account.username)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }

    async fn create_admin_session(&self, session: AdminSession) -> Result<(), StoreError> {
        self.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn find_admin_session(&self, token: &str) -> Result<Option<AdminSession>, StoreError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(token)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone()))
    }

    async fn delete_admin_session(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(token).is_some())
    }
}

/// Audit log kept in a vector, oldest first
#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl AuditQuery for MemoryAuditLog {
    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError> {
        let records = self.records.read().await;
        let matching: Vec<&AuditRecord> =
            records.iter().rev().filter(|r| filter.matches(r)).collect();

        let limit = filter.effective_limit();
        let page = matching
            .iter()
            .skip(filter.offset as usize)
            .take(limit as usize)
            .map(|r| (*r).clone())
            .collect();

        Ok(AuditPage {
            records: page,
            total: matching.len() as u64,
            limit,
            offset: filter.offset,
        })
    }

    async fn stats(&self, tenant: &TenantId) -> Result<AuditStats, StoreError> {
        let since = Utc::now() - ChronoDuration::hours(24);
        let records = self.records.read().await;

        let mut stats = AuditStats::default();
        for record in records.iter().filter(|r| &r.tenant_id == tenant) {
            stats.total += 1;
            match record.status {
                DeliveryStatus::Sent => stats.sent += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
            if record.recorded_at >= since {
                stats.last_24h += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MessageKind, TenantStatus};
    use uuid::Uuid;

    fn tenant(id: &str, email: &str, key_hash: &str) -> TenantRecord {
        TenantRecord {
            tenant_id: TenantId::new(id).unwrap(),
            name: id.to_uppercase(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
            api_key_hash: key_hash.into(),
            status: TenantStatus::Active,
            connected: false,
            phone_number: None,
            created_at: Utc::now(),
        }
    }

    fn record(tenant: &str, destination: &str, status: DeliveryStatus) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new(tenant).unwrap(),
            destination: destination.into(),
            kind: MessageKind::Text,
            message: Some("hi".into()),
            file_url: None,
            caption: None,
            status,
            error: None,
            provider_message_id: None,
            provider_timestamp: None,
            latency_ms: 12,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryTenantStore::new();
        store.create(tenant("acme", "ops@acme.test", "k1")).await.unwrap();

        let same_id = store.create(tenant("acme", "other@acme.test", "k2")).await;
        assert!(matches!(same_id, Err(StoreError::Duplicate(_))));

        let same_email = store.create(tenant("globex", "OPS@acme.test", "k3")).await;
        assert!(matches!(same_email, Err(StoreError::Duplicate(_))));

        let same_key = store.create(tenant("initech", "it@initech.test", "k1")).await;
        assert!(matches!(same_key, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_list_active_skips_suspended() {
        let store = MemoryTenantStore::new();
        store.create(tenant("acme", "a@x.test", "k1")).await.unwrap();
        store.create(tenant("globex", "g@x.test", "k2")).await.unwrap();
        store
            .update_profile(
                &TenantId::new("globex").unwrap(),
                TenantUpdate {
                    status: Some(TenantStatus::Suspended),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active, vec![TenantId::new("acme").unwrap()]);
    }

    #[tokio::test]
    async fn test_expired_login_sessions_are_invisible() {
        let store = MemoryTenantStore::new();
        let acme = TenantId::new("acme").unwrap();

        let mut stale = LoginSession::new("old".into(), acme.clone(), None, None);
        stale.expires_at = Utc::now() - ChronoDuration::seconds(1);
        store.create_login_session(stale).await.unwrap();
        store
            .create_login_session(LoginSession::new("fresh".into(), acme.clone(), None, None))
            .await
            .unwrap();

        assert!(store.find_login_session("old").await.unwrap().is_none());
        assert!(store.find_login_session("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_drops_login_sessions() {
        let store = MemoryTenantStore::new();
        let acme = TenantId::new("acme").unwrap();
        store.create(tenant("acme", "a@x.test", "k1")).await.unwrap();
        store
            .create_login_session(LoginSession::new("tok".into(), acme.clone(), None, None))
            .await
            .unwrap();

        assert!(store.delete(&acme).await.unwrap());
        assert!(store.find_login_session("tok").await.unwrap().is_none());
        assert!(!store.delete(&acme).await.unwrap());
    }

    fn admin(username: &str) -> AdminAccount {
        AdminAccount {
            username: username.into(),
            password_hash: "$argon2id$stub".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_admin_usernames_are_case_insensitive_and_unique() {
        let store = MemoryAdminStore::new();
        store.create_admin(admin("Root")).await.unwrap();

        assert_eq!(
            store.find_admin("ROOT").await.unwrap().map(|a| a.username),
            Some("root".to_string())
        );
        assert!(matches!(
            store.create_admin(admin("root ")).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_sessions_expire_and_delete() {
        let store = MemoryAdminStore::new();

        let mut stale = AdminSession::new("old".into(), "root".into(), None, None);
        stale.expires_at = Utc::now() - ChronoDuration::seconds(1);
        store.create_admin_session(stale).await.unwrap();
        let fresh = AdminSession::new("fresh".into(), "root".into(), None, None);
        assert_eq!(fresh.expires_at - fresh.created_at, ChronoDuration::hours(24));
        store.create_admin_session(fresh).await.unwrap();

        assert!(store.find_admin_session("old").await.unwrap().is_none());
        assert!(store.find_admin_session("fresh").await.unwrap().is_some());
        assert!(store.delete_admin_session("fresh").await.unwrap());
        assert!(store.find_admin_session("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_query_filters_and_pages_newest_first() {
        let log = MemoryAuditLog::new();
        for i in 0..5 {
            log.append(record("acme", &format!("57300000000{}", i), DeliveryStatus::Sent))
                .await
                .unwrap();
        }
        log.append(record("acme", "573000000009", DeliveryStatus::Failed))
            .await
            .unwrap();
        log.append(record("globex", "573000000001", DeliveryStatus::Sent))
            .await
            .unwrap();

        let mut filter = AuditFilter::for_tenant(TenantId::new("acme").unwrap());
        filter.limit = 2;
        let page = log.query(&filter).await.unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].destination, "573000000009");

        filter.status = Some(DeliveryStatus::Sent);
        filter.destination = Some("573000000001".into());
        let page = log.query(&filter).await.unwrap();
        assert_eq!(page.total, 1);

        let stats = log.stats(&TenantId::new("acme").unwrap()).await.unwrap();
        assert_eq!(
            stats,
            AuditStats {
                total: 6,
                sent: 5,
                failed: 1,
                last_24h: 6
            }
        );
    }
}
