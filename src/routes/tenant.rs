//! Tenant dashboard routes
//!
//! Email/password login issues an opaque session token that the dashboard
//! sends back in `X-Session-Token`.

use chrono::{DateTime, Utc};
use hyper::Response;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ok_json, require_session, ApiRequest, BoxBody, PageQuery, SESSION_TOKEN_HEADER};
use crate::auth::{generate_session_token, verify_password};
use crate::server::AppState;
use crate::session::StateKind;
use crate::store::{
    AuditFilter, AuditPage, AuditQuery, DeliveryStatus, LoginSession, TenantRecord, TenantStore,
};
use crate::types::{GatewayError, Result};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Tenant profile as shown to its owner and to admins
#[derive(Debug, Serialize)]
pub struct TenantView {
    pub client_id: String,
    pub name: String,
    pub email: String,
    pub status: &'static str,
    pub connected: bool,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&TenantRecord> for TenantView {
    fn from(record: &TenantRecord) -> Self {
        Self {
            client_id: record.tenant_id.to_string(),
            name: record.name.clone(),
            email: record.email.clone(),
            status: record.status.as_str(),
            connected: record.connected,
            phone_number: record.phone_number.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    success: bool,
    session_token: String,
    expires_at: DateTime<Utc>,
    client: TenantView,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    success: bool,
    client: TenantView,
}

#[derive(Debug, Serialize)]
struct MyStatusResponse {
    success: bool,
    connected: bool,
    state: StateKind,
    /// QR image as a data URL while pairing
    qr: Option<String>,
    phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub success: bool,
    pub messages: Vec<crate::store::AuditRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl From<AuditPage> for MessagesResponse {
    fn from(page: AuditPage) -> Self {
        Self {
            success: true,
            messages: page.records,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

/// `status=all` or absent means no filter
pub(crate) fn parse_status_filter(raw: Option<&str>) -> Result<Option<DeliveryStatus>> {
    match raw {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::BadRequest(format!("Unknown status filter: {}", s))),
    }
}

/// POST /api/login
pub async fn handle_login(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let body: LoginRequest = req.json()?;
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(GatewayError::BadRequest(
            "Email and password are required".into(),
        ));
    }

    let invalid = || GatewayError::Unauthorized("Invalid credentials".into());

    let email = body.email.trim().to_lowercase();
    let tenant = match state.tenants.find_by_email(&email).await? {
        Some(tenant) => tenant,
        None => {
            warn!("Login failed - unknown email");
            return Err(invalid());
        }
    };

    if !verify_password(&body.password, &tenant.password_hash)? {
        warn!(tenant_id = %tenant.tenant_id, "Login failed - invalid password");
        return Err(invalid());
    }

    if !tenant.is_active() {
        return Err(GatewayError::Forbidden("Account suspended".into()));
    }

    let session = LoginSession::new(
        generate_session_token(),
        tenant.tenant_id.clone(),
        req.client_ip.clone(),
        req.header("user-agent").map(str::to_string),
    );
    let token = session.token.clone();
    let expires_at = session.expires_at;
    state.tenants.create_login_session(session).await?;

    info!(tenant_id = %tenant.tenant_id, "Dashboard login");

    ok_json(&LoginResponse {
        success: true,
        session_token: token,
        expires_at,
        client: TenantView::from(&tenant),
    })
}

/// POST /api/logout
pub async fn handle_logout(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    if let Some(token) = req.header(SESSION_TOKEN_HEADER).filter(|t| !t.is_empty()) {
        state.tenants.delete_login_session(token).await?;
    }
    ok_json(&MessageResponse {
        success: true,
        message: "Logged out".into(),
    })
}

/// GET /api/me
pub async fn handle_me(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_session(state, req).await?;
    ok_json(&ProfileResponse {
        success: true,
        client: TenantView::from(&tenant),
    })
}

/// GET /api/my-status
///
/// Starts the session if needed, then reports connection state and the
/// current QR code while pairing.
pub async fn handle_my_status(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_session(state, req).await?;

    let error = match state.registry.ensure_initialized(&tenant.tenant_id).await {
        Ok(_) => None,
        Err(e) => {
            warn!(tenant_id = %tenant.tenant_id, "Session start failed: {}", e);
            Some(e.to_string())
        }
    };

    let status = state.registry.status(&tenant.tenant_id).await;
    let challenge = state.registry.pairing_challenge(&tenant.tenant_id).await;

    let (connected, kind, identity) = match status {
        Some(s) => (s.connected, s.state, s.identity),
        None => (false, StateKind::Idle, None),
    };

    ok_json(&MyStatusResponse {
        success: true,
        connected,
        state: kind,
        qr: challenge.and_then(|c| c.image),
        phone_number: identity.or(tenant.phone_number),
        error,
    })
}

/// POST /api/my-disconnect
pub async fn handle_my_disconnect(
    state: &AppState,
    req: &ApiRequest,
) -> Result<Response<BoxBody>> {
    let tenant = require_session(state, req).await?;
    let had_session = state.registry.logout(&tenant.tenant_id).await;
    info!(tenant_id = %tenant.tenant_id, had_session, "Tenant disconnected");

    ok_json(&MessageResponse {
        success: true,
        message: "Disconnected".into(),
    })
}

/// GET /api/my-messages
pub async fn handle_my_messages(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_session(state, req).await?;
    let query: PageQuery = req.query()?;

    let mut filter = AuditFilter::for_tenant(tenant.tenant_id);
    filter.status = parse_status_filter(query.status.as_deref())?;
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }
    filter.offset = query.offset.unwrap_or(0);

    let page = state.audit.query(&filter).await?;
    ok_json(&MessagesResponse::from(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolEvent;
    use crate::routes::test_support::*;
    use crate::store::CredentialStore;
    use crate::testing::settle;
    use crate::types::TenantId;
    use hyper::{Method, StatusCode};
    use serde_json::json;

    async fn login(app: &TestApp) -> String {
        let (status, body) = call(
            app,
            request(Method::POST, "/api/login")
                .with_json(json!({ "email": "OPS@acme.test", "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["session_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let app = app(&["acme"]).await;

        let (status, body) = call(
            &app,
            request(Method::POST, "/api/login")
                .with_json(json!({ "email": "ops@acme.test", "password": "wrong-one" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = call(
            &app,
            request(Method::POST, "/api/login").with_json(json!({ "email": "ops@acme.test" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_me_and_logout() {
        let app = app(&["acme"]).await;
        let token = login(&app).await;

        let (status, body) = call(
            &app,
            request(Method::GET, "/api/me").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client"]["client_id"], "acme");
        assert!(body["client"].get("password_hash").is_none());

        let (status, _) = call(
            &app,
            request(Method::POST, "/api/logout").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            request(Method::GET, "/api/me").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_my_status_shows_qr_then_connection() {
        let app = app(&["acme"]).await;
        let token = login(&app).await;
        let acme = TenantId::new("acme").unwrap();

        let (status, _) = call(
            &app,
            request(Method::GET, "/api/my-status").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        settle().await;

        let (_, body) = call(
            &app,
            request(Method::GET, "/api/my-status").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(body["connected"], false);
        assert_eq!(body["state"], "awaiting_pairing");
        assert!(body["qr"]
            .as_str()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));

        app.connector
            .emit(&acme, ProtocolEvent::Opened { identity: "573001112222".into() })
            .await;
        settle().await;

        let (_, body) = call(
            &app,
            request(Method::GET, "/api/my-status").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(body["connected"], true);
        assert!(body["qr"].is_null());
        assert_eq!(body["phone_number"], "573001112222");
        assert_eq!(app.connector.connects(&acme), 1);
    }

    #[tokio::test]
    async fn test_my_disconnect_purges_session() {
        let app = app(&["acme"]).await;
        let token = login(&app).await;
        let acme = TenantId::new("acme").unwrap();

        call(
            &app,
            request(Method::GET, "/api/my-status").with_header("x-session-token", &token),
        )
        .await;
        settle().await;

        let (status, _) = call(
            &app,
            request(Method::POST, "/api/my-disconnect").with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.state.registry.get(&acme).is_none());
        assert!(app.credentials.load(&acme).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_my_messages_filters_by_status() {
        let app = app(&["acme"]).await;
        let token = login(&app).await;
        let acme = TenantId::new("acme").unwrap();

        // Not connected: recorded as failed
        let _ = app
            .state
            .messaging
            .send_text(&acme, "573001112222", "hi")
            .await;

        let (status, body) = call(
            &app,
            request(Method::GET, "/api/my-messages?status=failed&limit=10")
                .with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 10);
        assert_eq!(body["messages"][0]["destination"], "573001112222");

        let (_, body) = call(
            &app,
            request(Method::GET, "/api/my-messages?status=sent")
                .with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(body["total"], 0);

        let (status, _) = call(
            &app,
            request(Method::GET, "/api/my-messages?status=queued")
                .with_header("x-session-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
