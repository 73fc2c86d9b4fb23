//! Reconnection and keepalive supervisor
//!
//! Two passes, both with per-tenant isolation and a per-tenant time bound:
//!
//! 1. **Startup**: once, shortly after boot, bring up a session for every
//!    active tenant so paired accounts reconnect without waiting for an
//!    HTTP request.
//! 2. **Sweep**: periodically walk live sessions and re-initialize any that
//!    sit `Idle` or `Disconnected`. This is a safety net for a missed
//!    reconnect; healthy and in-progress sessions are left alone.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::registry::SessionRegistry;
use crate::session::{ProtocolSession, SessionError, StateKind};
use crate::store::TenantDirectory;
use crate::types::TenantId;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between sweeps
    pub sweep_interval: Duration,
    /// Bound on one tenant's work within a pass
    pub per_tenant_timeout: Duration,
    /// Delay before the startup pass
    pub startup_delay: Duration,
    /// Tenants handled concurrently within a pass
    pub concurrency: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            per_tenant_timeout: Duration::from_secs(30),
            startup_delay: Duration::from_secs(2),
            concurrency: 16,
        }
    }
}

/// Tally of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub healthy: usize,
    pub reinitialized: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Healthy,
    Reinitialized,
    Skipped,
    Failed,
    TimedOut,
}

impl SweepReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Healthy => self.healthy += 1,
            Outcome::Reinitialized => self.reinitialized += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
    }
}

pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn TenantDirectory>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn TenantDirectory>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            config,
        }
    }

    /// Run the startup pass after the configured delay, then sweep on every
    /// interval until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                startup_delay_ms = self.config.startup_delay.as_millis() as u64,
                sweep_interval_secs = self.config.sweep_interval.as_secs(),
                concurrency = self.config.concurrency,
                "Starting session supervisor"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.startup_delay) => {}
                _ = shutdown.changed() => {
                    info!("Supervisor stopped before startup pass");
                    return;
                }
            }

            let report = self.startup_pass().await;
            info!(?report, "Startup pass complete");

            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; the startup pass covered it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        info!(?report, "Keepalive sweep complete");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Supervisor stopped");
        })
    }

    /// Initialize every active tenant.
    pub async fn startup_pass(&self) -> SweepReport {
        let tenants = match self.directory.list_active().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Startup pass could not list tenants: {}", e);
                return SweepReport::default();
            }
        };

        info!(tenants = tenants.len(), "Initializing sessions for active tenants");

        self.fan_out(tenants, |tenant| async move {
            if let Some(session) = self.registry.get(&tenant) {
                if session.status().await.connected {
                    return Outcome::Healthy;
                }
            }
            self.bounded(&tenant, self.registry.ensure_initialized(&tenant))
                .await
        })
        .await
    }

    /// Re-initialize live sessions that are idle or disconnected.
    pub async fn sweep(&self) -> SweepReport {
        let sessions = self.registry.list_active();
        debug!(sessions = sessions.len(), "Sweeping sessions");

        self.fan_out(sessions, |(tenant, session)| async move {
            self.check_session(&tenant, &session).await
        })
        .await
    }

    async fn check_session(&self, tenant: &TenantId, session: &Arc<ProtocolSession>) -> Outcome {
        match session.status().await.state {
            StateKind::Connected => Outcome::Healthy,
            StateKind::Initializing | StateKind::AwaitingPairing | StateKind::LoggedOut => {
                Outcome::Skipped
            }
            StateKind::Idle | StateKind::Disconnected => {
                info!(tenant_id = %tenant, "Re-initializing stale session");
                self.bounded(tenant, session.ensure_initialized()).await
            }
        }
    }

    async fn bounded<T>(
        &self,
        tenant: &TenantId,
        work: impl std::future::Future<Output = Result<T, SessionError>>,
    ) -> Outcome {
        match timeout(self.config.per_tenant_timeout, work).await {
            Ok(Ok(_)) => Outcome::Reinitialized,
            Ok(Err(SessionError::UnknownTenant(_))) => {
                debug!(tenant_id = %tenant, "Tenant vanished during pass");
                Outcome::Skipped
            }
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant, "Session initialization failed: {}", e);
                Outcome::Failed
            }
            Err(_) => {
                warn!(
                    tenant_id = %tenant,
                    timeout_secs = self.config.per_tenant_timeout.as_secs(),
                    "Session initialization timed out"
                );
                Outcome::TimedOut
            }
        }
    }

    async fn fan_out<I, F, Fut>(&self, items: Vec<I>, work: F) -> SweepReport
    where
        F: Fn(I) -> Fut,
        Fut: std::future::Future<Output = Outcome>,
    {
        let report = Mutex::new(SweepReport {
            examined: items.len(),
            ..Default::default()
        });

        stream::iter(items)
            .for_each_concurrent(self.config.concurrency.max(1), |item| {
                let outcome = work(item);
                let report = &report;
                async move {
                    let outcome = outcome.await;
                    report.lock().await.record(outcome);
                }
            })
            .await;

        report.into_inner()
    }
}
