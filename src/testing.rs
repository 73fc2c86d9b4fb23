//! In-process protocol doubles shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::protocol::{
    Address, OutboundDocument, ProtocolConnector, ProtocolError, ProtocolEvent, ProtocolLink,
    SendReceipt,
};
use crate::session::{DocumentFetcher, FetchedDocument, SessionError};
use crate::store::{
    CredentialStore, MemoryCredentialStore, ResumeMaterial, StoreError, TenantRecord,
    TenantStatus,
};
use crate::types::TenantId;

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Hash of `hunter22`, computed once per test binary
pub fn test_password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| crate::auth::hash_password("hunter22").unwrap())
}

/// Active tenant whose API key is `key-<id>` and password `hunter22`
pub fn tenant_record(id: &str) -> TenantRecord {
    TenantRecord {
        tenant_id: TenantId::new(id).unwrap(),
        name: id.to_uppercase(),
        email: format!("ops@{}.test", id),
        password_hash: test_password_hash().to_string(),
        api_key_hash: crate::auth::hash_api_key(&format!("key-{}", id)),
        status: TenantStatus::Active,
        connected: false,
        phone_number: None,
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    /// Text body, or caption for documents
    pub body: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Link that records what it was asked to send
pub struct FakeLink {
    sent: Mutex<Vec<SentMessage>>,
    fail: AtomicBool,
    registered: AtomicBool,
    logged_out: AtomicBool,
    disconnected: AtomicBool,
    next_id: AtomicU64,
}

impl FakeLink {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            registered: AtomicBool::new(true),
            logged_out: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every outbound request (sends, lookups, logout) fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProtocolError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ProtocolError::Transport("scripted transport failure".into()))
        } else {
            Ok(())
        }
    }

    fn record(&self, message: SentMessage) -> SendReceipt {
        self.sent.lock().unwrap().push(message);
        SendReceipt {
            message_id: format!("MSG{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl ProtocolLink for FakeLink {
    async fn send_text(&self, to: &Address, body: &str) -> Result<SendReceipt, ProtocolError> {
        self.check()?;
        Ok(self.record(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            file_name: None,
            mime_type: None,
        }))
    }

    async fn send_document(
        &self,
        to: &Address,
        document: OutboundDocument,
    ) -> Result<SendReceipt, ProtocolError> {
        self.check()?;
        Ok(self.record(SentMessage {
            to: to.to_string(),
            body: document.caption.unwrap_or_default(),
            file_name: Some(document.file_name),
            mime_type: Some(document.mime_type),
        }))
    }

    async fn lookup(&self, to: &Address) -> Result<Option<String>, ProtocolError> {
        self.check()?;
        Ok(self
            .registered
            .load(Ordering::SeqCst)
            .then(|| to.to_string()))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.check()?;
        self.logged_out.store(true, Ordering::SeqCst);
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Connector driven by the test.
///
/// A connect without resume material immediately issues a pairing
/// challenge; everything else is pushed with [`ScriptedConnector::emit`].
#[derive(Default)]
pub struct ScriptedConnector {
    connects: DashMap<TenantId, usize>,
    senders: DashMap<TenantId, mpsc::Sender<ProtocolEvent>>,
    links: DashMap<TenantId, Arc<FakeLink>>,
    hanging: DashMap<TenantId, ()>,
    failing: DashMap<TenantId, ()>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self, tenant: &TenantId) -> usize {
        self.connects.get(tenant).map(|c| *c).unwrap_or(0)
    }

    /// Connect attempts for `tenant` never complete
    pub fn hang(&self, tenant: &TenantId) {
        self.hanging.insert(tenant.clone(), ());
    }

    pub fn fail(&self, tenant: &TenantId) {
        self.failing.insert(tenant.clone(), ());
    }

    pub fn heal(&self, tenant: &TenantId) {
        self.hanging.remove(tenant);
        self.failing.remove(tenant);
    }

    pub fn link(&self, tenant: &TenantId) -> Option<Arc<FakeLink>> {
        self.links.get(tenant).map(|l| Arc::clone(&l))
    }

    /// Push an event on the tenant's latest connection
    pub async fn emit(&self, tenant: &TenantId, event: ProtocolEvent) {
        let sender = self.senders.get(tenant).map(|s| s.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// End the tenant's event stream without a close event
    pub fn drop_events(&self, tenant: &TenantId) {
        self.senders.remove(tenant);
    }
}

#[async_trait]
impl ProtocolConnector for ScriptedConnector {
    async fn connect(
        &self,
        tenant: &TenantId,
        resume: Option<ResumeMaterial>,
    ) -> Result<(Arc<dyn ProtocolLink>, mpsc::Receiver<ProtocolEvent>), ProtocolError> {
        let attempt = {
            let mut count = self.connects.entry(tenant.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if self.hanging.contains_key(tenant) {
            futures::future::pending::<()>().await;
        }
        if self.failing.contains_key(tenant) {
            return Err(ProtocolError::Connect("scripted connect failure".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        if resume.is_none() {
            let _ = tx.try_send(ProtocolEvent::PairingChallenge(format!(
                "2@{}-{},pairing-ref",
                tenant, attempt
            )));
        }

        let link = Arc::new(FakeLink::new());
        self.senders.insert(tenant.clone(), tx);
        self.links.insert(tenant.clone(), Arc::clone(&link));
        Ok((link as Arc<dyn ProtocolLink>, rx))
    }
}

/// Fetcher returning a canned document or error
pub struct StaticFetcher {
    result: Result<FetchedDocument, SessionError>,
}

impl StaticFetcher {
    pub fn pdf() -> Self {
        Self {
            result: Ok(FetchedDocument {
                bytes: Bytes::from_static(b"%PDF-1.4 test document"),
                content_type: None,
            }),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            result: Err(SessionError::FetchFailed(detail.to_string())),
        }
    }
}

#[async_trait]
impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedDocument, SessionError> {
        self.result.clone()
    }
}

/// Credential store whose writes take a while to land
pub struct SlowCredentialStore {
    inner: MemoryCredentialStore,
    save_delay: Duration,
    purge_delay: Duration,
}

impl SlowCredentialStore {
    pub fn new(save_delay: Duration, purge_delay: Duration) -> Self {
        Self {
            inner: MemoryCredentialStore::new(),
            save_delay,
            purge_delay,
        }
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.inner.contains(tenant)
    }
}

#[async_trait]
impl CredentialStore for SlowCredentialStore {
    async fn load(&self, tenant: &TenantId) -> Result<Option<ResumeMaterial>, StoreError> {
        self.inner.load(tenant).await
    }

    async fn save(&self, tenant: &TenantId, material: &ResumeMaterial) -> Result<(), StoreError> {
        tokio::time::sleep(self.save_delay).await;
        self.inner.save(tenant, material).await
    }

    async fn purge(&self, tenant: &TenantId) -> Result<(), StoreError> {
        tokio::time::sleep(self.purge_delay).await;
        self.inner.purge(tenant).await
    }
}
