//! Persistence contracts
//!
//! The session core depends only on the narrow traits here:
//! [`CredentialStore`] for resume material, [`TenantDirectory`] for tenant
//! lookups and connection mirroring, and [`AuditLog`] for send records.
//! [`TenantStore`], [`AdminStore`] and [`AuditQuery`] serve the HTTP layer.
//!
//! Backends: MongoDB (`crate::db`), the filesystem for credentials, and
//! in-memory variants for development mode and tests.

pub mod credentials;
pub mod crypto;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::TenantId;

pub use credentials::{FileCredentialStore, MemoryCredentialStore};
pub use memory::{MemoryAdminStore, MemoryAuditLog, MemoryTenantStore};

/// Login sessions expire this long after creation
pub const LOGIN_SESSION_TTL_DAYS: i64 = 7;

/// Admin sessions expire this long after creation
pub const ADMIN_SESSION_TTL_HOURS: i64 = 24;

/// Default page size for audit queries
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page an audit query will return
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Records
// =============================================================================

/// Opaque protocol credential state that lets a session resume without
/// pairing again. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ResumeMaterial(Vec<u8>);

impl ResumeMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ResumeMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeMaterial({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

/// One tenant account
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string
    pub password_hash: String,
    /// SHA-256 hex of the bearer API key
    pub api_key_hash: String,
    pub status: TenantStatus,
    pub connected: bool,
    /// Last resolved protocol identity
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Partial profile update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub status: Option<TenantStatus>,
    pub password_hash: Option<String>,
}

/// Dashboard login session
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub token: String,
    pub tenant_id: TenantId,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LoginSession {
    pub fn new(
        token: String,
        tenant_id: TenantId,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            token,
            tenant_id,
            client_ip,
            user_agent,
            created_at,
            expires_at: created_at + ChronoDuration::days(LOGIN_SESSION_TTL_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Operator account for the admin API
#[derive(Debug, Clone)]
pub struct AdminAccount {
    /// Stored lowercased
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Admin login session, sent back in `X-Admin-Token`
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub token: String,
    pub username: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AdminSession {
    pub fn new(
        token: String,
        username: String,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            token,
            username,
            client_ip,
            user_agent,
            created_at,
            expires_at: created_at + ChronoDuration::hours(ADMIN_SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One send attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub destination: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_timestamp: Option<DateTime<Utc>>,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Audit listing filter
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub tenant_id: Option<TenantId>,
    pub status: Option<DeliveryStatus>,
    pub destination: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            tenant_id: None,
            status: None,
            destination: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    /// Page size clamped to `1..=MAX_PAGE_LIMIT`
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.tenant_id
            .as_ref()
            .map_or(true, |t| &record.tenant_id == t)
            && self.status.map_or(true, |s| record.status == s)
            && self
                .destination
                .as_ref()
                .map_or(true, |d| &record.destination == d)
    }
}

/// One page of audit records, newest first
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub last_24h: u64,
}

// =============================================================================
// Contracts
// =============================================================================

/// Per-tenant resume material
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, tenant: &TenantId) -> Result<Option<ResumeMaterial>, StoreError>;

    async fn save(&self, tenant: &TenantId, material: &ResumeMaterial) -> Result<(), StoreError>;

    /// Remove everything stored for `tenant`. Purging nothing is not an error.
    async fn purge(&self, tenant: &TenantId) -> Result<(), StoreError>;
}

/// The tenant lookups the session core needs
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find(&self, tenant: &TenantId) -> Result<Option<TenantRecord>, StoreError>;

    /// Ids of every tenant with status `active`
    async fn list_active(&self) -> Result<Vec<TenantId>, StoreError>;

    /// Mirror the session's connection state onto the tenant record
    async fn update_connection(
        &self,
        tenant: &TenantId,
        connected: bool,
        phone_number: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Full tenant and login-session store used by the HTTP layer
#[async_trait]
pub trait TenantStore: TenantDirectory {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<TenantRecord>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<TenantRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<TenantRecord>, StoreError>;

    /// Fails with `Duplicate` if the id, email or API key is taken
    async fn create(&self, record: TenantRecord) -> Result<(), StoreError>;

    async fn update_profile(
        &self,
        tenant: &TenantId,
        update: TenantUpdate,
    ) -> Result<Option<TenantRecord>, StoreError>;

    /// Returns whether a tenant was removed. Also drops its login sessions.
    async fn delete(&self, tenant: &TenantId) -> Result<bool, StoreError>;

    async fn create_login_session(&self, session: LoginSession) -> Result<(), StoreError>;

    /// Unexpired session for `token`
    async fn find_login_session(&self, token: &str) -> Result<Option<LoginSession>, StoreError>;

    async fn delete_login_session(&self, token: &str) -> Result<bool, StoreError>;
}

/// Admin accounts and their login sessions
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn find_admin(&self, username: &str) -> Result<Option<AdminAccount>, StoreError>;

    /// Fails with `Duplicate` if the username is taken
    async fn create_admin(&self, account: AdminAccount) -> Result<(), StoreError>;

    async fn create_admin_session(&self, session: AdminSession) -> Result<(), StoreError>;

    /// Unexpired session for `token`
    async fn find_admin_session(&self, token: &str) -> Result<Option<AdminSession>, StoreError>;

    async fn delete_admin_session(&self, token: &str) -> Result<bool, StoreError>;
}

/// Append-only send log
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError>;
}

/// Read side of the send log
#[async_trait]
pub trait AuditQuery: AuditLog {
    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError>;

    async fn stats(&self, tenant: &TenantId) -> Result<AuditStats, StoreError>;
}
