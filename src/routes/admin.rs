//! Admin API endpoints for tenant management
//!
//! ## Endpoints
//!
//! - `POST /api/admin/login` - Username/password login; returns an admin token valid for 24 h
//! - `POST /api/admin/logout` - Drop the admin session in `X-Admin-Token`
//! - `GET /api/admin/clients` - List all tenants
//! - `POST /api/admin/clients` - Create a tenant; the API key is returned once
//! - `PUT /api/admin/clients/{id}` - Update profile, password or status
//! - `DELETE /api/admin/clients/{id}` - Log the session out, then delete
//! - `GET /api/admin/messages` - Send history across tenants
//!
//! Everything past login requires `X-Admin-Token`: an admin session token,
//! or the static `ADMIN_TOKEN` when one is configured.

use chrono::{DateTime, Utc};
use hyper::Response;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::tenant::{parse_status_filter, MessageResponse, MessagesResponse, TenantView};
use super::{ok_json, require_admin, ApiRequest, BoxBody, PageQuery, ADMIN_TOKEN_HEADER};
use crate::auth::{
    generate_api_key, generate_session_token, hash_api_key, hash_password, verify_password,
    MIN_PASSWORD_LEN,
};
use crate::server::AppState;
use crate::store::{
    AdminSession, AdminStore, AuditFilter, AuditQuery, TenantDirectory, TenantRecord,
    TenantStatus, TenantStore, TenantUpdate,
};
use crate::types::{GatewayError, Result, TenantId};

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
struct AdminLoginResponse {
    success: bool,
    admin_token: String,
    username: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Serialize)]
struct ClientListResponse {
    success: bool,
    clients: Vec<TenantView>,
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    success: bool,
    message: &'static str,
    client_id: String,
    /// Only ever shown here; the store keeps a hash
    api_key: String,
}

#[derive(Debug, Serialize)]
struct UpdatedResponse {
    success: bool,
    message: &'static str,
    client: TenantView,
}

// ============================================================================
// Validation
// ============================================================================

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("{} is required", field)))
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(GatewayError::BadRequest(format!("Invalid email: {}", raw))),
    }
}

fn check_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(GatewayError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn parse_tenant_id(raw: &str) -> Result<TenantId> {
    TenantId::new(raw).map_err(|e| GatewayError::BadRequest(e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/admin/login
pub async fn handle_admin_login(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let body: AdminLoginRequest = req.json()?;
    let username = body.username.trim().to_lowercase();
    if username.is_empty() || body.password.is_empty() {
        return Err(GatewayError::BadRequest(
            "Username and password are required".into(),
        ));
    }

    let invalid = || GatewayError::Unauthorized("Invalid credentials".into());

    let account = match state.admins.find_admin(&username).await? {
        Some(account) => account,
        None => {
            warn!("Admin login failed - unknown username");
            return Err(invalid());
        }
    };
    if !verify_password(&body.password, &account.password_hash)? {
        warn!(username = %account.username, "Admin login failed - invalid password");
        return Err(invalid());
    }

    let session = AdminSession::new(
        generate_session_token(),
        account.username.clone(),
        req.client_ip.clone(),
        req.header("user-agent").map(str::to_string),
    );
    let token = session.token.clone();
    let expires_at = session.expires_at;
    state.admins.create_admin_session(session).await?;

    info!(username = %account.username, "Admin login");

    ok_json(&AdminLoginResponse {
        success: true,
        admin_token: token,
        username: account.username,
        expires_at,
    })
}

/// POST /api/admin/logout
pub async fn handle_admin_logout(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    if let Some(token) = req.header(ADMIN_TOKEN_HEADER).filter(|t| !t.is_empty()) {
        state.admins.delete_admin_session(token).await?;
    }
    ok_json(&MessageResponse {
        success: true,
        message: "Logged out".into(),
    })
}

/// GET /api/admin/clients
pub async fn handle_list_clients(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    require_admin(state, req).await?;

    let clients = state
        .tenants
        .list_all()
        .await?
        .iter()
        .map(TenantView::from)
        .collect();

    ok_json(&ClientListResponse {
        success: true,
        clients,
    })
}

/// POST /api/admin/clients
pub async fn handle_create_client(
    state: &AppState,
    req: &ApiRequest,
) -> Result<Response<BoxBody>> {
    require_admin(state, req).await?;
    let body: CreateClientRequest = req.json()?;

    let tenant_id = parse_tenant_id(required(&body.client_id, "client_id")?)?;
    let name = required(&body.name, "name")?.to_string();
    let email = normalize_email(required(&body.email, "email")?)?;
    let password = body
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("password is required".into()))?;
    check_password(password)?;

    let api_key = generate_api_key();
    let record = TenantRecord {
        tenant_id: tenant_id.clone(),
        name,
        email,
        password_hash: hash_password(password)?,
        api_key_hash: hash_api_key(&api_key),
        status: TenantStatus::Active,
        connected: false,
        phone_number: None,
        created_at: Utc::now(),
    };
    state.tenants.create(record).await?;

    info!(tenant_id = %tenant_id, "Tenant created");

    ok_json(&CreatedResponse {
        success: true,
        message: "Client created",
        client_id: tenant_id.to_string(),
        api_key,
    })
}

/// PUT /api/admin/clients/{id}
pub async fn handle_update_client(
    state: &AppState,
    req: &ApiRequest,
    id: &str,
) -> Result<Response<BoxBody>> {
    require_admin(state, req).await?;
    let tenant_id = parse_tenant_id(id)?;
    let body: UpdateClientRequest = req.json()?;

    let mut update = TenantUpdate {
        status: body.status,
        ..Default::default()
    };
    if let Some(name) = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        update.name = Some(name.to_string());
    }
    if let Some(email) = body.email.as_deref().filter(|e| !e.trim().is_empty()) {
        update.email = Some(normalize_email(email)?);
    }
    if let Some(password) = body.password.as_deref().filter(|p| !p.is_empty()) {
        check_password(password)?;
        update.password_hash = Some(hash_password(password)?);
    }

    let record = state
        .tenants
        .update_profile(&tenant_id, update)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("Client {} not found", tenant_id)))?;

    // A suspended tenant keeps no live session
    if record.status == TenantStatus::Suspended {
        state.registry.logout(&tenant_id).await;
    }

    info!(tenant_id = %tenant_id, status = record.status.as_str(), "Tenant updated");

    ok_json(&UpdatedResponse {
        success: true,
        message: "Client updated",
        client: TenantView::from(&record),
    })
}

/// DELETE /api/admin/clients/{id}
pub async fn handle_delete_client(
    state: &AppState,
    req: &ApiRequest,
    id: &str,
) -> Result<Response<BoxBody>> {
    require_admin(state, req).await?;
    let tenant_id = parse_tenant_id(id)?;

    if state.tenants.find(&tenant_id).await?.is_none() {
        return Err(GatewayError::NotFound(format!(
            "Client {} not found",
            tenant_id
        )));
    }

    state.registry.logout(&tenant_id).await;
    state.tenants.delete(&tenant_id).await?;

    info!(tenant_id = %tenant_id, "Tenant deleted");

    ok_json(&MessageResponse {
        success: true,
        message: "Client deleted".into(),
    })
}

/// GET /api/admin/messages
pub async fn handle_list_messages(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    require_admin(state, req).await?;
    let query: PageQuery = req.query()?;

    let mut filter = AuditFilter::default();
    if let Some(raw) = query.tenant_id.as_deref().filter(|t| !t.is_empty()) {
        filter.tenant_id = Some(parse_tenant_id(raw)?);
    }
    if let Some(phone) = query.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        filter.destination = Some(crate::messaging::normalize_destination(phone));
    }
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
    use crate::auth::verify_password;
    use crate::routes::test_support::*;
    use crate::store::CredentialStore;
    use chrono::Duration as ChronoDuration;
    use hyper::{Method, StatusCode};
    use serde_json::json;

    async fn admin_login(app: &TestApp, password: &str) -> (StatusCode, serde_json::Value) {
        call(
            app,
            request(Method::POST, "/api/admin/login").with_json(json!({
                "username": "Root",
                "password": password,
            })),
        )
        .await
    }

    fn admin(method: Method, uri: &str) -> ApiRequest {
        request(method, uri).with_header("x-admin-token", ADMIN_TOKEN)
    }

    #[tokio::test]
    async fn test_admin_token_required() {
        let app = app(&["acme"]).await;

        let (status, _) = call(&app, request(Method::GET, "/api/admin/clients")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            request(Method::GET, "/api/admin/clients").with_header("x-admin-token", "guess"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, admin(Method::GET, "/api/admin/clients")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clients"][0]["client_id"], "acme");
    }

    #[tokio::test]
    async fn test_create_client_returns_usable_api_key() {
        let app = app(&[]).await;

        let (status, body) = call(
            &app,
            admin(Method::POST, "/api/admin/clients").with_json(json!({
                "client_id": "initech",
                "name": "Initech",
                "email": "Ops@Initech.test",
                "password": "tps-reports",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let api_key = body["api_key"].as_str().unwrap().to_string();
        assert_eq!(api_key.len(), 64);

        let (status, body) =
            call(&app, request(Method::GET, "/api/status").bearer(&api_key)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client_id"], "initech");

        let stored = app
            .tenants
            .find(&TenantId::new("initech").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.email, "ops@initech.test");
        assert!(verify_password("tps-reports", &stored.password_hash).unwrap());
        assert_ne!(stored.api_key_hash, api_key);
    }

    #[tokio::test]
    async fn test_create_client_validation_and_duplicates() {
        let app = app(&["acme"]).await;

        let cases = [
            json!({ "client_id": "x", "name": "X", "email": "x@x.test" }),
            json!({ "client_id": "../etc", "name": "X", "email": "x@x.test", "password": "long-enough" }),
            json!({ "client_id": "x", "name": "X", "email": "not-an-email", "password": "long-enough" }),
            json!({ "client_id": "x", "name": "X", "email": "x@x.test", "password": "short" }),
        ];
        for case in cases {
            let (status, _) =
                call(&app, admin(Method::POST, "/api/admin/clients").with_json(case)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, _) = call(
            &app,
            admin(Method::POST, "/api/admin/clients").with_json(json!({
                "client_id": "acme",
                "name": "Acme again",
                "email": "new@acme.test",
                "password": "long-enough",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_update_client_changes_password_and_status() {
        let app = app(&["acme"]).await;
        connect(&app, "acme").await;
        let acme = TenantId::new("acme").unwrap();

        let (status, body) = call(
            &app,
            admin(Method::PUT, "/api/admin/clients/acme").with_json(json!({
                "name": "Acme Corp",
                "password": "new-password",
                "status": "suspended",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client"]["name"], "Acme Corp");
        assert_eq!(body["client"]["status"], "suspended");

        let stored = app.tenants.find(&acme).await.unwrap().unwrap();
        assert!(verify_password("new-password", &stored.password_hash).unwrap());
        assert!(app.state.registry.get(&acme).is_none());

        let (status, _) = call(
            &app,
            admin(Method::PUT, "/api/admin/clients/nobody").with_json(json!({ "name": "N" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_client_logs_out_first() {
        let app = app(&["acme"]).await;
        connect(&app, "acme").await;
        let acme = TenantId::new("acme").unwrap();
        let link = app.connector.link(&acme).unwrap();

        let (status, _) = call(&app, admin(Method::DELETE, "/api/admin/clients/acme")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(link.logged_out());
        assert!(app.state.registry.get(&acme).is_none());
        assert!(app.credentials.load(&acme).await.unwrap().is_none());
        assert!(app.tenants.find(&acme).await.unwrap().is_none());

        let (status, _) = call(&app, admin(Method::DELETE, "/api/admin/clients/acme")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_messages_across_tenants() {
        let app = app(&["acme", "globex"]).await;
        for id in ["acme", "globex"] {
            let _ = app
                .state
                .messaging
                .send_text(&TenantId::new(id).unwrap(), "573001112222", "hi")
                .await;
        }

        let (status, body) = call(&app, admin(Method::GET, "/api/admin/messages")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);

        let (_, body) = call(
            &app,
            admin(Method::GET, "/api/admin/messages?client_id=globex&status=failed"),
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["messages"][0]["tenant_id"], "globex");
    }

    #[tokio::test]
    async fn test_admin_login_issues_working_session() {
        let app = app(&["acme"]).await;

        let (status, body) = admin_login(&app, "wrong-password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, body) = admin_login(&app, "hunter22").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], ADMIN_USERNAME);
        let token = body["admin_token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);

        let (status, body) = call(
            &app,
            request(Method::GET, "/api/admin/clients").with_header("x-admin-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clients"][0]["client_id"], "acme");

        let (status, _) = call(
            &app,
            request(Method::POST, "/api/admin/logout").with_header("x-admin-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            request(Method::GET, "/api/admin/clients").with_header("x-admin-token", &token),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_login_requires_both_fields() {
        let app = app(&[]).await;
        let (status, _) = call(
            &app,
            request(Method::POST, "/api/admin/login").with_json(json!({ "username": "root" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_expired_admin_session_is_rejected() {
        let app = app(&[]).await;

        let mut stale = AdminSession::new("stale-token".into(), ADMIN_USERNAME.into(), None, None);
        stale.expires_at = Utc::now() - ChronoDuration::minutes(1);
        app.admins.create_admin_session(stale).await.unwrap();

        let (status, body) = call(
            &app,
            request(Method::GET, "/api/admin/clients").with_header("x-admin-token", "stale-token"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }
}
