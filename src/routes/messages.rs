//! API-key routes: sends, recipient checks, status and send history

use chrono::{DateTime, Utc};
use hyper::Response;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::tenant::parse_status_filter;
use super::{ok_json, require_api_key, ApiRequest, BoxBody};
use crate::messaging::{normalize_destination, BulkOutcome, Outbound};
use crate::server::AppState;
use crate::session::{FileSend, StateKind};
use crate::store::{AuditFilter, AuditQuery, AuditRecord, MessageKind};
use crate::types::{GatewayError, Result};

/// Default page size for history by phone
const PHONE_PAGE_LIMIT: u32 = 100;

/// Body of `/api/send` and `/v2/sendMessage`
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(alias = "phone")]
    pub phonenumber: Option<String>,
    #[serde(alias = "message")]
    pub text: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    pub content_type: Option<String>,
}

impl SendRequest {
    fn kind(&self) -> MessageKind {
        if non_empty(&self.url).is_some() {
            MessageKind::File
        } else {
            MessageKind::Text
        }
    }
}

/// `phones` as a JSON array or a comma separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PhoneList {
    List(Vec<String>),
    Joined(String),
}

impl PhoneList {
    fn into_vec(self) -> Vec<String> {
        let phones = match self {
            Self::List(list) => list,
            Self::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };
        phones
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub phones: Option<PhoneList>,
    #[serde(alias = "message")]
    pub text: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    /// Pause between recipients in milliseconds
    pub delay: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(alias = "phonenumber")]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneQuery {
    pub phonenumber: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendData {
    phone: String,
    message_id: String,
    timestamp: DateTime<Utc>,
    response_time: String,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    success: bool,
    message: &'static str,
    data: SendData,
}

#[derive(Debug, Serialize)]
struct BulkResponse {
    success: bool,
    total: usize,
    sent: usize,
    failed: usize,
    results: Vec<BulkOutcome>,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    success: bool,
    exists: bool,
    jid: Option<String>,
    phone: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    success: bool,
    connected: bool,
    state: StateKind,
    phone: Option<String>,
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhonePage {
    count: usize,
    page_count: u64,
    page: u64,
    data: Vec<AuditRecord>,
    #[serde(rename = "phone_numbers")]
    phone_numbers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PhoneHistoryResponse {
    success: bool,
    data: PhonePage,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    success: bool,
    total: u64,
    sent: u64,
    failed: u64,
    success_rate: String,
    last_24h: u64,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn outbound_for(
    text: &str,
    url: Option<&str>,
    filename: Option<&str>,
    caption: Option<&str>,
    content_type: Option<&str>,
) -> Outbound {
    match url {
        // Files without a caption carry the message text instead
        Some(url) => Outbound::File(FileSend {
            url: url.to_string(),
            file_name: filename.map(str::to_string),
            caption: Some(caption.unwrap_or(text).to_string()),
            content_type: content_type.map(str::to_string),
        }),
        None => Outbound::Text(text.to_string()),
    }
}

/// POST /api/send, /v2/sendMessage
pub async fn handle_send(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;
    let body: SendRequest = req.json()?;

    let destination = non_empty(&body.phonenumber);
    let text = non_empty(&body.text);

    let (destination, text) = match (destination, text) {
        (Some(destination), Some(text)) => (destination, text),
        _ => {
            state
                .messaging
                .record_rejected(
                    &tenant.tenant_id,
                    destination,
                    body.kind(),
                    text,
                    "Missing phone number or message",
                )
                .await;
            return Err(GatewayError::BadRequest(
                "Phone number and message are required".into(),
            ));
        }
    };

    let outbound = outbound_for(
        text,
        non_empty(&body.url),
        non_empty(&body.filename),
        non_empty(&body.caption),
        non_empty(&body.content_type),
    );

    let started = Instant::now();
    let receipt = state
        .messaging
        .send(&tenant.tenant_id, destination, &outbound)
        .await?;

    ok_json(&SendResponse {
        success: true,
        message: "Message sent",
        data: SendData {
            phone: destination.to_string(),
            message_id: receipt.message_id,
            timestamp: receipt.timestamp,
            response_time: format!("{}ms", started.elapsed().as_millis()),
        },
    })
}

/// POST /api/send-bulk
pub async fn handle_send_bulk(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;
    let body: BulkRequest = req.json()?;

    let phones = body.phones.map(PhoneList::into_vec).unwrap_or_default();
    let text = match non_empty(&body.text) {
        Some(text) if !phones.is_empty() => text,
        _ => {
            return Err(GatewayError::BadRequest(
                "phones and message are required".into(),
            ))
        }
    };

    let outbound = outbound_for(
        text,
        non_empty(&body.url),
        non_empty(&body.filename),
        non_empty(&body.caption),
        None,
    );

    let results = state
        .messaging
        .send_bulk(
            &tenant.tenant_id,
            &phones,
            &outbound,
            body.delay.map(Duration::from_millis),
        )
        .await?;

    let sent = results.iter().filter(|r| r.success).count();
    ok_json(&BulkResponse {
        success: true,
        total: phones.len(),
        sent,
        failed: results.len() - sent,
        results,
    })
}

/// POST /api/verify
pub async fn handle_verify(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;
    let body: VerifyRequest = req.json()?;

    let phone = non_empty(&body.phone)
        .ok_or_else(|| GatewayError::BadRequest("Phone number is required".into()))?;

    let jid = state
        .registry
        .verify_recipient(&tenant.tenant_id, phone)
        .await?;

    ok_json(&VerifyResponse {
        success: true,
        exists: jid.is_some(),
        jid,
        phone: phone.to_string(),
    })
}

/// GET /api/status
///
/// Never creates a session.
pub async fn handle_status(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;

    let response = match state.registry.status(&tenant.tenant_id).await {
        Some(status) => StatusResponse {
            success: true,
            connected: status.connected,
            state: status.state,
            phone: status.identity.or(tenant.phone_number),
            client_id: tenant.tenant_id.to_string(),
            message: None,
        },
        None => StatusResponse {
            success: true,
            connected: false,
            state: StateKind::Idle,
            phone: None,
            client_id: tenant.tenant_id.to_string(),
            message: Some("Session not initialized"),
        },
    };
    ok_json(&response)
}

/// GET /api/messages-by-phone
pub async fn handle_messages_by_phone(
    state: &AppState,
    req: &ApiRequest,
) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;
    let query: PhoneQuery = req.query()?;

    let raw = non_empty(&query.phonenumber)
        .ok_or_else(|| GatewayError::BadRequest("phonenumber is required".into()))?
        .to_string();

    let mut filter = AuditFilter::for_tenant(tenant.tenant_id.clone());
    filter.destination = Some(normalize_destination(&raw));
    filter.status = parse_status_filter(query.status.as_deref())?;
    filter.limit = query.limit.unwrap_or(PHONE_PAGE_LIMIT);
    filter.offset = query.offset.unwrap_or(0);

    let page = state.audit.query(&filter).await?;
    let limit = u64::from(page.limit.max(1));

    ok_json(&PhoneHistoryResponse {
        success: true,
        data: PhonePage {
            count: page.records.len(),
            page_count: page.total.div_ceil(limit).max(1),
            page: u64::from(page.offset) / limit + 1,
            data: page.records,
            phone_numbers: vec![raw],
        },
    })
}

/// GET /api/stats
pub async fn handle_stats(state: &AppState, req: &ApiRequest) -> Result<Response<BoxBody>> {
    let tenant = require_api_key(state, req).await?;
    let stats = state.audit.stats(&tenant.tenant_id).await?;

    let success_rate = if stats.total > 0 {
        format!("{:.2}%", stats.sent as f64 / stats.total as f64 * 100.0)
    } else {
        "0%".to_string()
    };

    ok_json(&StatsResponse {
        success: true,
        total: stats.total,
        sent: stats.sent,
        failed: stats.failed,
        success_rate,
        last_24h: stats.last_24h,
    })
}
