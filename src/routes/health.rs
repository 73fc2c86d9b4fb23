//! Health check endpoint
//!
//! `/health` and `/api/health` always answer 200 while the process runs;
//! `status` reports `degraded` when the tenant store does not answer a ping.

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use super::{ok_json, BoxBody};
use crate::registry::RegistryStats;
use crate::server::AppState;
use crate::store::TenantStore;
use crate::types::Result;
use hyper::Response;

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    /// `ok` or `degraded`
    pub status: &'static str,
    pub database: &'static str,
    pub sessions: RegistryStats,
    pub uptime: u64,
    pub mode: &'static str,
    pub build: BuildInfo,
    pub timestamp: String,
}

/// GET /health, /api/health
pub async fn health_check(state: &AppState) -> Result<Response<BoxBody>> {
    let database_ok = match state.tenants.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: store ping failed: {}", e);
            false
        }
    };

    ok_json(&HealthResponse {
        success: true,
        status: if database_ok { "ok" } else { "degraded" },
        database: if database_ok { "connected" } else { "unavailable" },
        sessions: state.registry.stats().await,
        uptime: state.uptime_secs(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        build: BuildInfo::current(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use hyper::{Method, StatusCode};

    #[tokio::test]
    async fn test_health_reports_store_and_sessions() {
        let app = app(&["acme"]).await;

        let (status, body) = call(&app, request(Method::GET, "/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["sessions"]["sessions"], 0);
        assert_eq!(body["build"]["version"], env!("CARGO_PKG_VERSION"));
    }
}
