//! HTTP routes for Switchboard
//!
//! Handlers receive an [`ApiRequest`] whose body has already been collected
//! and size-checked by the server, and return `Result<Response, GatewayError>`;
//! [`dispatch`] turns errors into JSON error responses.

pub mod admin;
pub mod health;
pub mod messages;
pub mod tenant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::auth::extract_bearer;
use crate::server::AppState;
use crate::store::{AdminStore, TenantDirectory, TenantRecord, TenantStore};
use crate::types::{GatewayError, Result};

pub use health::{health_check, HealthResponse};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Header carrying a dashboard login token
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Header carrying an admin session token or the static admin token
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Session-Token, X-Admin-Token";
const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

const CLIENT_PREFIX: &str = "/api/admin/clients/";

/// A request with its body already read
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<String>,
}

impl ApiRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(GatewayError::BadRequest("Request body is required".into()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| GatewayError::BadRequest(format!("Invalid JSON: {}", e)))
    }

    /// Parse the query string
    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(self.query.as_deref().unwrap_or(""))
            .map_err(|e| GatewayError::BadRequest(format!("Invalid query: {}", e)))
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        r#"{"success":false,"error":"serialization failed"}"#.to_string()
    });

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    with_cors(response)
}

pub fn ok_json<T: Serialize>(body: &T) -> Result<Response<BoxBody>> {
    Ok(json_response(StatusCode::OK, body))
}

pub fn error_response(err: &GatewayError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        warn!(status = status.as_u16(), "Request failed: {}", err);
    } else {
        debug!(status = status.as_u16(), "Request rejected: {}", err);
    }
    json_response(
        status,
        &ErrorResponse {
            success: false,
            error: err.to_string(),
        },
    )
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert("access-control-max-age", HeaderValue::from_static("86400"));
    with_cors(response)
}

pub fn not_found(path: &str) -> Response<BoxBody> {
    error_response(&GatewayError::NotFound(format!("No route for {}", path)))
}

fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse {
            success: false,
            error: "Method not allowed".into(),
        },
    )
}

// =============================================================================
// Authentication
// =============================================================================

fn ensure_active(tenant: TenantRecord) -> Result<TenantRecord> {
    if tenant.is_active() {
        Ok(tenant)
    } else {
        Err(GatewayError::Forbidden("Account suspended".into()))
    }
}

/// Tenant behind the `X-Session-Token` header
pub async fn require_session(state: &AppState, req: &ApiRequest) -> Result<TenantRecord> {
    let token = req
        .header(SESSION_TOKEN_HEADER)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("Missing session token".into()))?;

    let session = state
        .tenants
        .find_login_session(token)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized("Session expired or invalid".into()))?;

    let tenant = state
        .tenants
        .find(&session.tenant_id)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized("Session expired or invalid".into()))?;

    ensure_active(tenant)
}

/// Tenant owning the bearer API key
pub async fn require_api_key(state: &AppState, req: &ApiRequest) -> Result<TenantRecord> {
    let key = extract_bearer(req.header("authorization"))
        .ok_or_else(|| GatewayError::Unauthorized("Missing API key".into()))?;

    let tenant = state
        .tenants
        .find_by_api_key_hash(&crate::auth::hash_api_key(key))
        .await?
        .ok_or_else(|| GatewayError::Unauthorized("Invalid API key".into()))?;

    ensure_active(tenant)
}

/// `X-Admin-Token` must be a live admin session or the static admin token.
pub async fn require_admin(state: &AppState, req: &ApiRequest) -> Result<()> {
    let Some(token) = req.header(ADMIN_TOKEN_HEADER).filter(|t| !t.is_empty()) else {
        if state.admin_api_open() {
            return Ok(());
        }
        return Err(GatewayError::Unauthorized("Admin token required".into()));
    };

    if state.admin.validate(Some(token)) {
        return Ok(());
    }
    match state.admins.find_admin_session(token).await? {
        Some(_) => Ok(()),
        None => Err(GatewayError::Unauthorized(
            "Admin session expired or invalid".into(),
        )),
    }
}

// =============================================================================
// Shared query types
// =============================================================================

/// `limit` / `offset` / `status` paging parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub status: Option<String>,
    pub phone: Option<String>,
    #[serde(alias = "client_id")]
    pub tenant_id: Option<String>,
}

// =============================================================================
// Router
// =============================================================================

/// Route a collected request
pub async fn dispatch(state: Arc<AppState>, req: ApiRequest) -> Response<BoxBody> {
    if req.method == Method::OPTIONS {
        return cors_preflight();
    }

    let path = req.path.trim_end_matches('/').to_string();
    let path = if path.is_empty() { "/".to_string() } else { path };

    let result = match (&req.method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/api/health") => {
            health_check(&state).await
        }

        // Dashboard
        (&Method::POST, "/api/login") => tenant::handle_login(&state, &req).await,
        (&Method::POST, "/api/logout") => tenant::handle_logout(&state, &req).await,
        (&Method::GET, "/api/me") => tenant::handle_me(&state, &req).await,
        (&Method::GET, "/api/my-status") => tenant::handle_my_status(&state, &req).await,
        (&Method::POST, "/api/my-disconnect") => {
            tenant::handle_my_disconnect(&state, &req).await
        }
        (&Method::GET, "/api/my-messages") => tenant::handle_my_messages(&state, &req).await,

        // API-key surface
        (&Method::POST, "/api/send") | (&Method::POST, "/v2/sendMessage") => {
            messages::handle_send(&state, &req).await
        }
        (&Method::POST, "/api/send-bulk") => messages::handle_send_bulk(&state, &req).await,
        (&Method::POST, "/api/verify") => messages::handle_verify(&state, &req).await,
        (&Method::GET, "/api/status") => messages::handle_status(&state, &req).await,
        (&Method::GET, "/api/messages-by-phone") => {
            messages::handle_messages_by_phone(&state, &req).await
        }
        (&Method::GET, "/api/stats") => messages::handle_stats(&state, &req).await,

        // Admin
        (&Method::POST, "/api/admin/login") => admin::handle_admin_login(&state, &req).await,
        (&Method::POST, "/api/admin/logout") => admin::handle_admin_logout(&state, &req).await,
        (&Method::GET, "/api/admin/clients") => admin::handle_list_clients(&state, &req).await,
        (&Method::POST, "/api/admin/clients") => {
            admin::handle_create_client(&state, &req).await
        }
        (&Method::GET, "/api/admin/messages") => {
            admin::handle_list_messages(&state, &req).await
        }
        (&Method::PUT, p) if p.starts_with(CLIENT_PREFIX) => {
            admin::handle_update_client(&state, &req, &p[CLIENT_PREFIX.len()..]).await
        }
        (&Method::DELETE, p) if p.starts_with(CLIENT_PREFIX) => {
            admin::handle_delete_client(&state, &req, &p[CLIENT_PREFIX.len()..]).await
        }
        (_, p) if p.starts_with(CLIENT_PREFIX) => return method_not_allowed(),

        (_, "/health")
        | (_, "/api/health")
        | (_, "/api/login")
        | (_, "/api/logout")
        | (_, "/api/me")
        | (_, "/api/my-status")
        | (_, "/api/my-disconnect")
        | (_, "/api/my-messages")
        | (_, "/api/send")
        | (_, "/v2/sendMessage")
        | (_, "/api/send-bulk")
        | (_, "/api/verify")
        | (_, "/api/status")
        | (_, "/api/messages-by-phone")
        | (_, "/api/stats")
        | (_, "/api/admin/login")
        | (_, "/api/admin/logout")
        | (_, "/api/admin/clients")
        | (_, "/api/admin/messages") => return method_not_allowed(),

        _ => return not_found(&path),
    };

    match result {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::server::Stores;
    use crate::session::SessionConfig;
    use crate::store::{
        AdminAccount, AdminStore, MemoryAdminStore, MemoryAuditLog, MemoryCredentialStore,
        MemoryTenantStore, TenantStore,
    };
    use crate::testing::{test_password_hash, tenant_record, ScriptedConnector, StaticFetcher};
    use chrono::Utc;
    use clap::Parser;

    pub const ADMIN_TOKEN: &str = "admin-secret-token";

    /// Seeded admin account; its password is `hunter22`
    pub const ADMIN_USERNAME: &str = "root";

    pub struct TestApp {
        pub state: Arc<AppState>,
        pub connector: Arc<ScriptedConnector>,
        pub tenants: Arc<MemoryTenantStore>,
        pub admins: Arc<MemoryAdminStore>,
        pub audit: Arc<MemoryAuditLog>,
        pub credentials: Arc<MemoryCredentialStore>,
    }

    pub async fn app(tenant_ids: &[&str]) -> TestApp {
        let args = crate::config::Args::try_parse_from([
            "switchboard",
            "--admin-token",
            ADMIN_TOKEN,
            "--bridge-url",
            "ws://bridge.test:3100",
            "--bulk-delay-ms",
            "0",
        ])
        .unwrap();

        let tenants = Arc::new(MemoryTenantStore::new());
        for id in tenant_ids {
            tenants.create(tenant_record(id)).await.unwrap();
        }
        let admins = Arc::new(MemoryAdminStore::new());
        admins
            .create_admin(AdminAccount {
                username: ADMIN_USERNAME.into(),
                password_hash: test_password_hash().to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let audit = Arc::new(MemoryAuditLog::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let connector = Arc::new(ScriptedConnector::new());

        let stores = Stores::new(tenants.clone(), admins.clone(), audit.clone());
        let registry = SessionRegistry::new(
            Arc::clone(&stores.directory),
            connector.clone(),
            credentials.clone(),
            Arc::new(StaticFetcher::pdf()),
            SessionConfig::default(),
        );
        let state = AppState::new(args, stores, registry);

        TestApp {
            state: Arc::new(state),
            connector,
            tenants,
            admins,
            audit,
            credentials,
        }
    }

    /// Bring `id`'s session to `Connected` with the scripted connector
    pub async fn connect(app: &TestApp, id: &str) {
        let tenant = crate::types::TenantId::new(id).unwrap();
        app.state.registry.ensure_initialized(&tenant).await.unwrap();
        crate::testing::settle().await;
        app.connector
            .emit(
                &tenant,
                crate::protocol::ProtocolEvent::Opened {
                    identity: "573009998888".into(),
                },
            )
            .await;
        crate::testing::settle().await;
    }

    pub fn request(method: Method, uri: &str) -> ApiRequest {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri.to_string(), None),
        };
        ApiRequest {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: Some("127.0.0.1".into()),
        }
    }

    impl ApiRequest {
        pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
            self.headers
                .insert(name, HeaderValue::from_str(value).unwrap());
            self
        }

        pub fn with_json(mut self, body: serde_json::Value) -> Self {
            self.body = Bytes::from(body.to_string());
            self
        }

        pub fn bearer(self, key: &str) -> Self {
            self.with_header("authorization", &format!("Bearer {}", key))
        }
    }

    pub async fn call(app: &TestApp, req: ApiRequest) -> (StatusCode, serde_json::Value) {
        let response = dispatch(Arc::clone(&app.state), req).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
