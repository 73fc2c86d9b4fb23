//! Session registry
//!
//! Process-wide map from tenant to its one live [`ProtocolSession`].
//! Sessions are created lazily on first access; creation is atomic per
//! tenant through the `dashmap` entry API, and no map guard is ever held
//! across an `.await`.
//!
//! The registry also owns the receiving end of every session's lifecycle
//! channel. Its event loop drops retired sessions, mirrors connection state
//! into the tenant directory and re-broadcasts events to subscribers.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::protocol::{ProtocolConnector, SendReceipt};
use crate::session::{
    DocumentFetcher, FileSend, PairingChallenge, ProtocolSession, SessionConfig, SessionContext,
    SessionError, SessionEvent, SessionEventKind, SessionStatus,
};
use crate::store::{CredentialStore, TenantDirectory};
use crate::types::TenantId;

/// Capacity of the lifecycle broadcast channel
const BROADCAST_CAPACITY: usize = 256;

/// Session counts for health reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub connected: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<TenantId, Arc<ProtocolSession>>,
    directory: Arc<dyn TenantDirectory>,
    ctx: SessionContext,
    broadcast: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    /// Build a registry and spawn its event loop.
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        connector: Arc<dyn ProtocolConnector>,
        credentials: Arc<dyn CredentialStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);

        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            directory,
            ctx: SessionContext {
                connector,
                credentials,
                fetcher,
                config,
                events: events_tx,
            },
            broadcast,
        });

        tokio::spawn(run_events(Arc::downgrade(&registry), events_rx));
        registry
    }

    /// Observe session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast.subscribe()
    }

    // =========================================================================
    // Map operations
    // =========================================================================

    /// The tenant's live session, creating an idle one if needed.
    ///
    /// Fails with `UnknownTenant` if the tenant has no record or is not
    /// active.
    pub async fn get_or_create(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<ProtocolSession>, SessionError> {
        if let Some(existing) = self.get(tenant) {
            return Ok(existing);
        }

        let record = self.directory.find(tenant).await.map_err(|e| {
            SessionError::InitializationFailed(format!("tenant lookup failed: {}", e))
        })?;
        if !record.map_or(false, |r| r.is_active()) {
            return Err(SessionError::UnknownTenant(tenant.to_string()));
        }

        let session = match self.sessions.entry(tenant.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_retired() {
                    let fresh = ProtocolSession::new(tenant.clone(), self.ctx.clone());
                    entry.insert(Arc::clone(&fresh));
                    fresh
                } else {
                    Arc::clone(entry.get())
                }
            }
            Entry::Vacant(entry) => {
                let fresh = ProtocolSession::new(tenant.clone(), self.ctx.clone());
                entry.insert(Arc::clone(&fresh));
                fresh
            }
        };

        Ok(session)
    }

    /// The tenant's live session, without creating one
    pub fn get(&self, tenant: &TenantId) -> Option<Arc<ProtocolSession>> {
        self.sessions
            .get(tenant)
            .filter(|s| !s.is_retired())
            .map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, tenant: &TenantId) -> Option<Arc<ProtocolSession>> {
        self.sessions.remove(tenant).map(|(_, s)| s)
    }

    /// Snapshot of live sessions, in no particular order
    pub fn list_active(&self) -> Vec<(TenantId, Arc<ProtocolSession>)> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_retired())
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.list_active();
        let mut connected = 0;
        for (_, session) in &sessions {
            if session.status().await.connected {
                connected += 1;
            }
        }
        RegistryStats {
            sessions: sessions.len(),
            connected,
        }
    }

    // =========================================================================
    // Tenant-keyed operations
    // =========================================================================

    /// Get or create the tenant's session and start it connecting.
    pub async fn ensure_initialized(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<ProtocolSession>, SessionError> {
        let session = self.get_or_create(tenant).await?;
        session.ensure_initialized().await?;
        Ok(session)
    }

    /// Status of the live session, or `None` if none exists
    pub async fn status(&self, tenant: &TenantId) -> Option<SessionStatus> {
        match self.get(tenant) {
            Some(session) => Some(session.status().await),
            None => None,
        }
    }

    pub async fn pairing_challenge(&self, tenant: &TenantId) -> Option<PairingChallenge> {
        match self.get(tenant) {
            Some(session) => session.pairing_challenge().await,
            None => None,
        }
    }

    pub async fn send_message(
        &self,
        tenant: &TenantId,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, SessionError> {
        let session = self.acquire(tenant).await?;
        session.send_message(destination, text).await
    }

    pub async fn send_file(
        &self,
        tenant: &TenantId,
        destination: &str,
        file: FileSend,
    ) -> Result<SendReceipt, SessionError> {
        let session = self.acquire(tenant).await?;
        session.send_file(destination, file).await
    }

    pub async fn verify_recipient(
        &self,
        tenant: &TenantId,
        destination: &str,
    ) -> Result<Option<String>, SessionError> {
        let session = self.acquire(tenant).await?;
        session.verify_recipient(destination).await
    }

    /// Log the tenant out and forget its session.
    ///
    /// The session stays mapped until its credentials are purged, so a
    /// concurrent request cannot slip in a replacement that resumes with
    /// them. Credentials are purged even when no session is live. Returns
    /// whether a session was torn down.
    pub async fn logout(&self, tenant: &TenantId) -> bool {
        match self.get(tenant) {
            Some(session) => {
                session.logout().await;
                self.sessions
                    .remove_if(tenant, |_, current| Arc::ptr_eq(current, &session));
                true
            }
            None => {
                if let Err(e) = self.ctx.credentials.purge(tenant).await {
                    warn!(tenant_id = %tenant, "Failed to purge credentials: {}", e);
                }
                if let Err(e) = self.directory.update_connection(tenant, false, None).await {
                    warn!(tenant_id = %tenant, "Failed to mirror logout: {}", e);
                }
                false
            }
        }
    }

    /// Session for a send. Starts connecting in the background if idle so a
    /// later attempt can succeed; the send itself never waits for that.
    async fn acquire(&self, tenant: &TenantId) -> Result<Arc<ProtocolSession>, SessionError> {
        let session = self.get_or_create(tenant).await?;

        if !session.status().await.connected {
            let kick = Arc::clone(&session);
            tokio::spawn(async move {
                if let Err(e) = kick.ensure_initialized().await {
                    debug!(tenant_id = %kick.tenant_id(), "Background initialization failed: {}", e);
                }
            });
        }

        Ok(session)
    }

    async fn apply_event(&self, event: &SessionEvent) {
        let tenant = &event.tenant_id;
        let mirrored = match &event.kind {
            SessionEventKind::Connected { identity } => {
                self.directory
                    .update_connection(tenant, true, Some(identity.as_str()))
                    .await
            }
            SessionEventKind::Disconnected { .. } => {
                self.directory.update_connection(tenant, false, None).await
            }
            SessionEventKind::LoggedOut { remote } => {
                let removed = self
                    .sessions
                    .remove_if(tenant, |_, s| s.instance() == event.instance)
                    .is_some();
                if removed {
                    info!(tenant_id = %tenant, remote, "Removed logged-out session");
                }
                self.directory.update_connection(tenant, false, None).await
            }
        };

        if let Err(e) = mirrored {
            warn!(tenant_id = %tenant, "Failed to mirror session state: {}", e);
        }
    }
}

async fn run_events(registry: Weak<SessionRegistry>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.apply_event(&event).await;
        let _ = registry.broadcast.send(event);
    }
    debug!("Session event loop stopped");
}
