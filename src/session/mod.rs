//! Protocol session
//!
//! One [`ProtocolSession`] wraps one tenant's connection. It owns the
//! connect/disconnect state machine, applies connection events in order,
//! schedules its own reconnects and reports lifecycle changes to its owner
//! over a [`SessionEvent`] channel.
//!
//! ```text
//! Idle -> Initializing -> AwaitingPairing -> Connected
//!              ^                 |               |
//!              |                 v               v
//!              +---- Disconnected (retry) <------+
//!
//! any live state --remote logout--> LoggedOut (retired)
//! any state --logout()--> Idle (retired)
//! ```

pub mod challenge;
pub mod error;
pub mod fetch;
pub mod state;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::{
    normalize_identity, Address, CloseCause, OutboundDocument, ProtocolConnector, ProtocolEvent,
    ProtocolLink, SendReceipt,
};
use crate::store::{CredentialStore, ResumeMaterial};
use crate::types::TenantId;

pub use challenge::PairingChallenge;
pub use error::SessionError;
pub use fetch::{DocumentFetcher, FetchedDocument, HttpFetcher};
pub use state::{ConnectionState, SessionStatus, StateKind};

/// Tunables shared by every session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before re-initializing after a retryable close
    pub reconnect_backoff: Duration,
    /// Bound on the connect handshake
    pub connect_timeout: Duration,
    /// Bound on the best-effort remote logout
    pub logout_timeout: Duration,
    /// Check that the recipient exists before fetching and sending a file
    pub verify_before_file_send: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(30),
            logout_timeout: Duration::from_secs(5),
            verify_before_file_send: true,
        }
    }
}

/// Lifecycle notification from a session to its owner
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub tenant_id: TenantId,
    /// Identifies the emitting instance among sessions for the same tenant
    pub instance: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    Connected { identity: String },
    Disconnected { reason: String },
    /// The instance is retired. `remote` is false for an explicit logout.
    LoggedOut { remote: bool },
}

/// Collaborators every session needs
#[derive(Clone)]
pub struct SessionContext {
    pub connector: Arc<dyn ProtocolConnector>,
    pub credentials: Arc<dyn CredentialStore>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub config: SessionConfig,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// A file send request
#[derive(Debug, Clone, Default)]
pub struct FileSend {
    pub url: String,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    /// Overrides the origin's content type
    pub content_type: Option<String>,
}

type InitOutcome = Shared<BoxFuture<'static, Result<(), SessionError>>>;

struct Inner {
    state: ConnectionState,
    link: Option<Arc<dyn ProtocolLink>>,
    last_error: Option<String>,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// One tenant's protocol session
pub struct ProtocolSession {
    tenant_id: TenantId,
    instance: u64,
    ctx: SessionContext,
    inner: RwLock<Inner>,
    /// Single-flight slot: the generation being initialized and its shared outcome.
    /// Teardown holds it until credentials are purged.
    in_flight: Mutex<Option<(u64, InitOutcome)>>,
    /// Serializes credential saves against purges
    credential_writes: Mutex<()>,
    /// Bumped on every connect attempt and on logout; stale work checks it
    generation: AtomicU64,
    reconnects: AtomicU64,
    retired: AtomicBool,
}

impl ProtocolSession {
    pub fn new(tenant_id: TenantId, ctx: SessionContext) -> Arc<Self> {
        Arc::new(Self {
            tenant_id,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            ctx,
            inner: RwLock::new(Inner {
                state: ConnectionState::Idle,
                link: None,
                last_error: None,
            }),
            in_flight: Mutex::new(None),
            credential_writes: Mutex::new(()),
            generation: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        })
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Retired instances were logged out and must not be reused
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Start connecting unless a connection is already in progress.
    ///
    /// Returns once the connect handshake has produced a link, not once the
    /// session is `Connected`. Concurrent callers share one attempt.
    pub async fn ensure_initialized(self: &Arc<Self>) -> Result<(), SessionError> {
        self.start_initialize(None).await
    }

    async fn start_initialize(
        self: &Arc<Self>,
        expected_generation: Option<u64>,
    ) -> Result<(), SessionError> {
        let outcome = {
            let mut slot = self.in_flight.lock().await;

            if let Some((_, outcome)) = slot.as_ref() {
                outcome.clone()
            } else {
                if self.is_retired() {
                    return Err(SessionError::LoggedOutRemotely);
                }
                if let Some(expected) = expected_generation {
                    if self.generation.load(Ordering::SeqCst) != expected {
                        debug!(tenant_id = %self.tenant_id, "Scheduled retry superseded");
                        return Ok(());
                    }
                }

                {
                    let mut inner = self.inner.write().await;
                    if inner.state.is_in_progress() {
                        return Ok(());
                    }
                    inner.state = ConnectionState::Initializing;
                }

                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let this = Arc::clone(self);
                let task = tokio::spawn(async move { this.run_initialize(generation).await });

                let outcome = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(SessionError::InitializationFailed(format!(
                            "initialization task failed: {}",
                            e
                        ))),
                    }
                }
                .boxed()
                .shared();

                *slot = Some((generation, outcome.clone()));
                outcome
            }
        };

        outcome.await
    }

    async fn run_initialize(self: Arc<Self>, generation: u64) -> Result<(), SessionError> {
        let result = self.initialize_once(generation).await;

        let mut slot = self.in_flight.lock().await;
        if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
            *slot = None;
        }

        result
    }

    async fn initialize_once(self: &Arc<Self>, generation: u64) -> Result<(), SessionError> {
        info!(tenant_id = %self.tenant_id, generation, "Initializing protocol session");

        let resume = match self.ctx.credentials.load(&self.tenant_id).await {
            Ok(resume) => resume,
            Err(e) => {
                warn!(tenant_id = %self.tenant_id, "Could not load resume material, pairing afresh: {}", e);
                None
            }
        };

        let connect = self.ctx.connector.connect(&self.tenant_id, resume);
        let (link, events) = match timeout(self.ctx.config.connect_timeout, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(self.fail_initialize(generation, e.to_string()).await),
            Err(_) => {
                return Err(self
                    .fail_initialize(generation, "connect handshake timed out".into())
                    .await)
            }
        };

        {
            let mut inner = self.inner.write().await;
            let current = self.generation.load(Ordering::SeqCst) == generation;
            if !current || !matches!(inner.state, ConnectionState::Initializing) {
                drop(inner);
                debug!(tenant_id = %self.tenant_id, generation, "Initialization abandoned");
                link.disconnect().await;
                return Err(SessionError::InitializationFailed(
                    "initialization abandoned by logout".into(),
                ));
            }
            inner.link = Some(link);
            inner.last_error = None;
        }

        tokio::spawn(Arc::clone(self).pump(generation, events));
        Ok(())
    }

    async fn fail_initialize(&self, generation: u64, detail: String) -> SessionError {
        warn!(tenant_id = %self.tenant_id, generation, "Initialization failed: {}", detail);

        let mut inner = self.inner.write().await;
        if self.generation.load(Ordering::SeqCst) == generation
            && matches!(inner.state, ConnectionState::Initializing)
        {
            inner.state = ConnectionState::Idle;
            inner.last_error = Some(detail.clone());
        }
        SessionError::InitializationFailed(detail)
    }

    // =========================================================================
    // Event pump
    // =========================================================================

    /// Apply one connection's events in order until it closes or is superseded.
    async fn pump(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<ProtocolEvent>) {
        while let Some(event) = events.recv().await {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(tenant_id = %self.tenant_id, generation, "Dropping events from superseded connection");
                return;
            }

            match event {
                ProtocolEvent::PairingChallenge(raw) => {
                    self.on_challenge(generation, raw).await;
                }
                ProtocolEvent::Opened { identity } => {
                    self.on_opened(generation, identity).await;
                }
                ProtocolEvent::CredentialsUpdated(material) => {
                    self.persist_credentials(generation, &material).await;
                }
                ProtocolEvent::Closed(cause) => {
                    self.on_closed(generation, cause).await;
                    return;
                }
            }
        }

        self.on_closed(
            generation,
            CloseCause::Retryable("event stream ended".into()),
        )
        .await;
    }

    async fn persist_credentials(&self, generation: u64, material: &ResumeMaterial) {
        let _writes = self.credential_writes.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation || self.is_retired() {
            debug!(tenant_id = %self.tenant_id, generation, "Discarding resume material from superseded connection");
            return;
        }
        if let Err(e) = self.ctx.credentials.save(&self.tenant_id, material).await {
            warn!(tenant_id = %self.tenant_id, "Failed to persist resume material: {}", e);
        }
    }

    /// Purge stored credentials, then retire this instance.
    ///
    /// Callers hold the `in_flight` slot so no connect can load the material
    /// between the purge and the retirement.
    async fn purge_and_retire(&self) {
        {
            let _writes = self.credential_writes.lock().await;
            if let Err(e) = self.ctx.credentials.purge(&self.tenant_id).await {
                warn!(tenant_id = %self.tenant_id, "Failed to purge credentials: {}", e);
            }
        }
        self.retired.store(true, Ordering::SeqCst);
    }

    async fn on_challenge(&self, generation: u64, raw: String) {
        let challenge = PairingChallenge::new(raw);

        let mut inner = self.inner.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if matches!(
            inner.state,
            ConnectionState::Initializing | ConnectionState::AwaitingPairing { .. }
        ) {
            inner.state = ConnectionState::AwaitingPairing { challenge };
            info!(tenant_id = %self.tenant_id, "Pairing challenge issued");
        } else {
            debug!(tenant_id = %self.tenant_id, state = ?inner.state.kind(), "Ignoring pairing challenge");
        }
    }

    async fn on_opened(&self, generation: u64, raw_identity: String) {
        let identity = normalize_identity(&raw_identity).unwrap_or(raw_identity);

        {
            let mut inner = self.inner.write().await;
            if self.generation.load(Ordering::SeqCst) != generation
                || !inner.state.is_in_progress()
            {
                return;
            }
            inner.state = ConnectionState::Connected {
                identity: identity.clone(),
            };
            inner.last_error = None;
        }

        info!(tenant_id = %self.tenant_id, identity = %identity, "Session connected");
        self.emit(SessionEventKind::Connected { identity });
    }

    async fn on_closed(self: &Arc<Self>, generation: u64, cause: CloseCause) {
        let slot = match &cause {
            CloseCause::LoggedOut => Some(self.in_flight.lock().await),
            CloseCause::Retryable(_) => None,
        };

        let link = {
            let mut inner = self.inner.write().await;
            if self.generation.load(Ordering::SeqCst) != generation
                || !inner.state.is_in_progress()
            {
                return;
            }
            inner.state = match &cause {
                CloseCause::Retryable(reason) => ConnectionState::Disconnected {
                    reason: reason.clone(),
                },
                CloseCause::LoggedOut => ConnectionState::LoggedOut,
            };
            inner.link.take()
        };

        if let Some(link) = link {
            link.disconnect().await;
        }

        match cause {
            CloseCause::Retryable(reason) => {
                warn!(
                    tenant_id = %self.tenant_id,
                    reason = %reason,
                    backoff_ms = self.ctx.config.reconnect_backoff.as_millis() as u64,
                    "Connection closed, scheduling reconnect"
                );
                self.emit(SessionEventKind::Disconnected { reason });
                self.schedule_reconnect(generation);
            }
            CloseCause::LoggedOut => {
                warn!(tenant_id = %self.tenant_id, "Logged out remotely, purging credentials");
                self.purge_and_retire().await;
                drop(slot);
                self.emit(SessionEventKind::LoggedOut { remote: true });
            }
        }
    }

    /// Re-initialize after the backoff, unless something else already has.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let backoff = self.ctx.config.reconnect_backoff;

        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;

            let Some(session) = weak.upgrade() else {
                return;
            };
            {
                let inner = session.inner.read().await;
                if !matches!(inner.state, ConnectionState::Disconnected { .. }) {
                    return;
                }
            }

            session.reconnects.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = session.start_initialize(Some(generation)).await {
                warn!(tenant_id = %session.tenant_id, "Reconnect failed: {}", e);
            }
        });
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.ctx.events.send(SessionEvent {
            tenant_id: self.tenant_id.clone(),
            instance: self.instance,
            kind,
        });
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.read().await;
        SessionStatus::from_state(
            &self.tenant_id,
            &inner.state,
            self.reconnects.load(Ordering::SeqCst),
            inner.last_error.clone(),
        )
    }

    pub async fn pairing_challenge(&self) -> Option<PairingChallenge> {
        self.inner.read().await.state.challenge().cloned()
    }

    async fn connected_link(&self) -> Result<Arc<dyn ProtocolLink>, SessionError> {
        let inner = self.inner.read().await;
        match (&inner.state, &inner.link) {
            (ConnectionState::Connected { .. }, Some(link)) => Ok(Arc::clone(link)),
            _ => Err(SessionError::NotConnected),
        }
    }

    // =========================================================================
    // Sends
    // =========================================================================

    pub async fn send_message(
        &self,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, SessionError> {
        let link = self.connected_link().await?;
        let to = parse_destination(destination)?;

        link.send_text(&to, text)
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    pub async fn send_file(
        &self,
        destination: &str,
        file: FileSend,
    ) -> Result<SendReceipt, SessionError> {
        let link = self.connected_link().await?;
        let mut to = parse_destination(destination)?;

        if self.ctx.config.verify_before_file_send {
            match link.lookup(&to).await {
                Ok(Some(resolved)) => {
                    if let Some(resolved) = Address::parse(&resolved) {
                        to = resolved;
                    }
                }
                Ok(None) => return Err(SessionError::RecipientNotFound(to.user().to_string())),
                Err(e) => {
                    return Err(SessionError::SendFailed(format!(
                        "recipient lookup failed: {}",
                        e
                    )))
                }
            }
        }

        let fetched = self.ctx.fetcher.fetch(&file.url).await?;
        let file_name = file
            .file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| fetch::file_name_from_url(&file.url));
        let mime_type = file
            .content_type
            .or(fetched.content_type)
            .unwrap_or_else(|| fetch::guess_content_type(&file_name).to_string());

        debug!(
            tenant_id = %self.tenant_id,
            file_name = %file_name,
            mime_type = %mime_type,
            bytes = fetched.bytes.len(),
            "Sending document"
        );

        link.send_document(
            &to,
            OutboundDocument {
                bytes: fetched.bytes,
                mime_type,
                file_name,
                caption: file.caption,
            },
        )
        .await
        .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    /// Resolved address if `destination` exists on the network
    pub async fn verify_recipient(&self, destination: &str) -> Result<Option<String>, SessionError> {
        let link = self.connected_link().await?;
        let to = parse_destination(destination)?;

        link.lookup(&to)
            .await
            .map_err(|e| SessionError::SendFailed(format!("recipient lookup failed: {}", e)))
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Purge credentials, retire this instance and unlink the account.
    ///
    /// Credentials are gone before this instance reports retired, so a
    /// replacement session never resumes with them. Remote logout is best
    /// effort and bounded by the logout timeout.
    pub async fn logout(&self) {
        let link = {
            let mut slot = self.in_flight.lock().await;
            let link = {
                let mut inner = self.inner.write().await;
                self.generation.fetch_add(1, Ordering::SeqCst);
                inner.state = ConnectionState::Idle;
                inner.last_error = None;
                inner.link.take()
            };
            *slot = None;
            self.purge_and_retire().await;
            link
        };

        if let Some(link) = link {
            match timeout(self.ctx.config.logout_timeout, link.logout()).await {
                Ok(Ok(())) => debug!(tenant_id = %self.tenant_id, "Remote logout acknowledged"),
                Ok(Err(e)) => {
                    warn!(tenant_id = %self.tenant_id, "Remote logout failed: {}", e);
                    link.disconnect().await;
                }
                Err(_) => {
                    warn!(tenant_id = %self.tenant_id, "Remote logout timed out");
                    link.disconnect().await;
                }
            }
        }

        info!(tenant_id = %self.tenant_id, "Session logged out");
        self.emit(SessionEventKind::LoggedOut { remote: false });
    }
}

fn parse_destination(destination: &str) -> Result<Address, SessionError> {
    Address::parse(destination)
        .ok_or_else(|| SessionError::InvalidDestination(destination.to_string()))
}
