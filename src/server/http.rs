//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Bodies are collected
//! under a size limit before routing.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::{hash_password, AdminTokenValidator};
use crate::config::Args;
use crate::messaging::MessagingService;
use crate::registry::SessionRegistry;
use crate::routes::{self, ApiRequest, BoxBody};
use crate::store::{
    AdminAccount, AdminStore, AuditLog, AuditQuery, StoreError, TenantDirectory, TenantStore,
};
use crate::types::{GatewayError, Result};

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Store handles, each coerced to the trait its consumer needs
#[derive(Clone)]
pub struct Stores {
    pub tenants: Arc<dyn TenantStore>,
    pub directory: Arc<dyn TenantDirectory>,
    pub admins: Arc<dyn AdminStore>,
    pub audit: Arc<dyn AuditQuery>,
    pub audit_log: Arc<dyn AuditLog>,
}

impl Stores {
    pub fn new<T, A>(tenants: Arc<T>, admins: Arc<dyn AdminStore>, audit: Arc<A>) -> Self
    where
        T: TenantStore + 'static,
        A: AuditQuery + 'static,
    {
        Self {
            tenants: tenants.clone(),
            directory: tenants,
            admins,
            audit: audit.clone(),
            audit_log: audit,
        }
    }

    /// Create the configured admin account unless it already exists.
    ///
    /// An existing account keeps its password.
    pub async fn seed_admin(&self, args: &Args) -> Result<()> {
        let Some((username, password)) = args.admin_seed() else {
            return Ok(());
        };
        if self.admins.find_admin(username).await?.is_some() {
            debug!(username, "Admin account already present");
            return Ok(());
        }

        let account = AdminAccount {
            username: username.to_lowercase(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };
        match self.admins.create_admin(account).await {
            Ok(()) => {
                info!(username, "Seeded admin account");
                Ok(())
            }
            Err(StoreError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub registry: Arc<SessionRegistry>,
    pub messaging: MessagingService,
    pub tenants: Arc<dyn TenantStore>,
    pub admins: Arc<dyn AdminStore>,
    pub audit: Arc<dyn AuditQuery>,
    /// Static bootstrap token
    pub admin: AdminTokenValidator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, stores: Stores, registry: Arc<SessionRegistry>) -> Self {
        let messaging = MessagingService::new(
            Arc::clone(&registry),
            stores.audit_log,
            args.bulk_delay(),
        );
        let admin = AdminTokenValidator::new(args.admin_token.clone());

        Self {
            args,
            registry,
            messaging,
            tenants: stores.tenants,
            admins: stores.admins,
            audit: stores.audit,
            admin,
            started_at: Instant::now(),
        }
    }

    /// Dev mode with neither a static token nor a seeded admin leaves the
    /// admin API open
    pub fn admin_api_open(&self) -> bool {
        self.args.dev_mode && !self.admin.is_configured() && self.args.admin_seed().is_none()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Serve until `shutdown` flips to true
pub async fn run(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Switchboard listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled");
        if state.admin_api_open() {
            warn!("No admin credentials configured - admin API is open");
        }
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .preserve_header_case(true)
                            .title_case_headers(true)
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("HTTP server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Collect the request and hand it to the router
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let request = match collect(req, addr).await {
        Ok(request) => request,
        Err(e) => return Ok(routes::error_response(&e)),
    };

    let response = routes::dispatch(state, request).await;

    info!(
        client = %addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    Ok(response)
}

async fn collect(req: Request<Incoming>, addr: SocketAddr) -> Result<ApiRequest> {
    let (parts, body) = req.into_parts();

    let body: Bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| GatewayError::Http(format!("Failed to read body: {}", e)))?
        .to_bytes();

    // Behind a proxy the first forwarded hop is the client
    let client_ip = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| addr.ip().to_string());

    Ok(ApiRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        client_ip: Some(client_ip),
    })
}
