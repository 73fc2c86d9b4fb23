//! WebSocket bridge connector
//!
//! Talks to a sidecar process that runs the real messaging-network client.
//! One socket per tenant connection; text frames carry JSON. Requests carry
//! an `id` and are answered out of order, events carry an `event` tag.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
};
use tracing::{debug, info, warn};

use super::{
    Address, CloseCause, OutboundDocument, ProtocolConnector, ProtocolError, ProtocolEvent,
    ProtocolLink, SendReceipt,
};
use crate::store::ResumeMaterial;
use crate::types::TenantId;

/// Close reason the bridge uses for a remote unlink
const LOGGED_OUT_REASON: &str = "logged_out";

/// Buffered events per connection before the reader applies backpressure
const EVENT_BUFFER: usize = 64;

type Pending = Arc<DashMap<u64, oneshot::Sender<Result<serde_json::Value, ProtocolError>>>>;

/// Connector that opens one bridge socket per tenant
pub struct BridgeConnector {
    url: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl ProtocolConnector for BridgeConnector {
    async fn connect(
        &self,
        tenant: &TenantId,
        resume: Option<ResumeMaterial>,
    ) -> Result<(Arc<dyn ProtocolLink>, mpsc::Receiver<ProtocolEvent>), ProtocolError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::Connect(format!("invalid bridge url: {}", e)))?;
        let tenant_header = HeaderValue::from_str(tenant.as_str())
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        request.headers_mut().insert("X-Tenant-Id", tenant_header);

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| ProtocolError::Connect(format!("WebSocket connect failed: {}", e)))?;
        let (mut ws_sink, mut ws_stream) = ws.split();

        let (frame_tx, mut frame_rx) = mpsc::channel::<Outbound>(256);
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(EVENT_BUFFER);
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        // Writer: drains outbound frames into the socket. It stops once every
        // link handle is gone, so an abandoned connect does not hold the socket.
        let writer_tenant = tenant.clone();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let result = match frame {
                    Outbound::Text(text) => ws_sink.send(Message::Text(text)).await,
                    Outbound::Close => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!(tenant_id = %writer_tenant, "Bridge write failed: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader: routes responses to waiters and events to the session
        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader_frames = frame_tx.downgrade();
        let reader_tenant = tenant.clone();
        tokio::spawn(async move {
            let mut saw_close = false;

            while let Some(msg) = ws_stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                    Ok(Message::Close(frame)) => {
                        debug!(tenant_id = %reader_tenant, "Bridge closed socket: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(tenant_id = %reader_tenant, "Bridge socket error: {}", e);
                        break;
                    }
                };

                match serde_json::from_str::<Inbound>(&text) {
                    Ok(Inbound::Event(event)) => {
                        let Some(event) = event.into_protocol_event() else {
                            warn!(tenant_id = %reader_tenant, "Dropping malformed bridge event");
                            continue;
                        };
                        if matches!(event, ProtocolEvent::Closed(_)) {
                            saw_close = true;
                        }
                        let _ = event_tx.send(event).await;
                        if saw_close {
                            break;
                        }
                    }
                    Ok(Inbound::Response(response)) => {
                        if let Some((_, waiter)) = reader_pending.remove(&response.id) {
                            let _ = waiter.send(response.into_result());
                        } else {
                            warn!(tenant_id = %reader_tenant, id = response.id, "Bridge response with no pending request");
                        }
                    }
                    Err(e) => {
                        warn!(tenant_id = %reader_tenant, "Unparseable bridge frame: {}", e);
                    }
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            let waiters: Vec<u64> = reader_pending.iter().map(|entry| *entry.key()).collect();
            for id in waiters {
                if let Some((_, waiter)) = reader_pending.remove(&id) {
                    let _ = waiter.send(Err(ProtocolError::Closed));
                }
            }
            if !saw_close {
                let _ = event_tx
                    .send(ProtocolEvent::Closed(CloseCause::Retryable(
                        "bridge connection lost".into(),
                    )))
                    .await;
            }
            if let Some(frames) = reader_frames.upgrade() {
                let _ = frames.send(Outbound::Close).await;
            }
            info!(tenant_id = %reader_tenant, "Bridge connection ended");
        });

        let link = Arc::new(BridgeLink {
            tenant: tenant.clone(),
            frames: frame_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            request_timeout: self.request_timeout,
        });

        let handshake = link
            .request(Op::Connect {
                tenant: tenant.to_string(),
                resume: resume.map(|material| BASE64.encode(material.as_bytes())),
            })
            .await;
        if let Err(e) = handshake {
            warn!(tenant_id = %tenant, "Bridge connect handshake failed: {}", e);
            link.disconnect().await;
            return Err(e);
        }

        Ok((link as Arc<dyn ProtocolLink>, event_rx))
    }
}

enum Outbound {
    Text(String),
    Close,
}

/// One open bridge connection
struct BridgeLink {
    tenant: TenantId,
    frames: mpsc::Sender<Outbound>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl BridgeLink {
    async fn request(&self, op: Op) -> Result<serde_json::Value, ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&Request { id, op: &op })
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.frames.send(Outbound::Text(frame)).await.is_err() {
            self.pending.remove(&id);
            return Err(ProtocolError::Closed);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ProtocolError::Timeout)
            }
        }
    }

    async fn send_and_receipt(&self, op: Op) -> Result<SendReceipt, ProtocolError> {
        let value = self.request(op).await?;
        let sent: SentResult = serde_json::from_value(value)
            .map_err(|e| ProtocolError::Transport(format!("malformed send result: {}", e)))?;
        Ok(sent.into_receipt())
    }
}

#[async_trait]
impl ProtocolLink for BridgeLink {
    async fn send_text(&self, to: &Address, body: &str) -> Result<SendReceipt, ProtocolError> {
        self.send_and_receipt(Op::SendText {
            to: to.to_string(),
            text: body.to_string(),
        })
        .await
    }

    async fn send_document(
        &self,
        to: &Address,
        document: OutboundDocument,
    ) -> Result<SendReceipt, ProtocolError> {
        self.send_and_receipt(Op::SendDocument {
            to: to.to_string(),
            data: BASE64.encode(&document.bytes),
            mimetype: document.mime_type,
            file_name: document.file_name,
            caption: document.caption,
        })
        .await
    }

    async fn lookup(&self, to: &Address) -> Result<Option<String>, ProtocolError> {
        let value = self.request(Op::Lookup { to: to.to_string() }).await?;
        let found: LookupResult = serde_json::from_value(value)
            .map_err(|e| ProtocolError::Transport(format!("malformed lookup result: {}", e)))?;
        Ok(if found.exists {
            Some(found.jid.unwrap_or_else(|| to.to_string()))
        } else {
            None
        })
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        let result = self.request(Op::Logout).await.map(|_| ());
        self.disconnect().await;
        result
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(tenant_id = %self.tenant, "Closing bridge connection");
            let _ = self.frames.send(Outbound::Close).await;
        }
    }
}

// Wire format

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    op: &'a Op,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    Connect {
        tenant: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume: Option<String>,
    },
    SendText {
        to: String,
        text: String,
    },
    SendDocument {
        to: String,
        data: String,
        mimetype: String,
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Lookup {
        to: String,
    },
    Logout,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Event(InboundEvent),
    Response(Response),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum InboundEvent {
    Qr { data: String },
    Open { id: String },
    Close { reason: Option<String> },
    Creds { material: String },
}

impl InboundEvent {
    fn into_protocol_event(self) -> Option<ProtocolEvent> {
        Some(match self {
            Self::Qr { data } => ProtocolEvent::PairingChallenge(data),
            Self::Open { id } => ProtocolEvent::Opened { identity: id },
            Self::Close { reason } => match reason.as_deref() {
                Some(LOGGED_OUT_REASON) => ProtocolEvent::Closed(CloseCause::LoggedOut),
                other => ProtocolEvent::Closed(CloseCause::Retryable(
                    other.unwrap_or("unspecified").to_string(),
                )),
            },
            Self::Creds { material } => {
                let bytes = BASE64.decode(material).ok()?;
                ProtocolEvent::CredentialsUpdated(ResumeMaterial::new(bytes))
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

impl Response {
    fn into_result(self) -> Result<serde_json::Value, ProtocolError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(ProtocolError::Rejected(
                self.error.unwrap_or_else(|| "unknown bridge error".into()),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentResult {
    id: String,
    /// Seconds since the epoch, as reported by the network
    #[serde(default)]
    timestamp: Option<i64>,
}

impl SentResult {
    fn into_receipt(self) -> SendReceipt {
        let timestamp: DateTime<Utc> = self
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);
        SendReceipt {
            message_id: self.id,
            timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    exists: bool,
    #[serde(default)]
    jid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_request_wire_format() {
        let op = Op::SendText {
            to: "573001112222@s.whatsapp.net".into(),
            text: "hi".into(),
        };
        let value = serde_json::to_value(Request { id: 7, op: &op }).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "op": "send_text", "to": "573001112222@s.whatsapp.net", "text": "hi"})
        );

        let value = serde_json::to_value(Request { id: 1, op: &Op::Logout }).unwrap();
        assert_eq!(value, json!({"id": 1, "op": "logout"}));
    }

    #[test]
    fn test_inbound_frames_parse() {
        let frame: Inbound = serde_json::from_str(r#"{"event":"qr","data":"2@abc"}"#).unwrap();
        assert!(matches!(
            frame,
            Inbound::Event(InboundEvent::Qr { ref data }) if data == "2@abc"
        ));

        let frame: Inbound =
            serde_json::from_str(r#"{"id":3,"ok":false,"error":"not paired"}"#).unwrap();
        let Inbound::Response(response) = frame else {
            panic!("expected response");
        };
        assert!(matches!(
            response.into_result(),
            Err(ProtocolError::Rejected(msg)) if msg == "not paired"
        ));
    }

    #[test]
    fn test_close_reasons() {
        let logged_out = InboundEvent::Close {
            reason: Some("logged_out".into()),
        };
        assert!(matches!(
            logged_out.into_protocol_event(),
            Some(ProtocolEvent::Closed(CloseCause::LoggedOut))
        ));

        let lost = InboundEvent::Close {
            reason: Some("stream_errored".into()),
        };
        assert!(matches!(
            lost.into_protocol_event(),
            Some(ProtocolEvent::Closed(CloseCause::Retryable(r))) if r == "stream_errored"
        ));

        let bad_creds = InboundEvent::Creds {
            material: "!!not base64!!".into(),
        };
        assert!(bad_creds.into_protocol_event().is_none());
    }

    #[test]
    fn test_receipt_timestamp_falls_back_to_now() {
        let receipt = SentResult {
            id: "ABC".into(),
            timestamp: Some(1_700_000_000),
        }
        .into_receipt();
        assert_eq!(receipt.timestamp.timestamp(), 1_700_000_000);

        let before = Utc::now();
        let receipt = SentResult {
            id: "ABC".into(),
            timestamp: None,
        }
        .into_receipt();
        assert!(receipt.timestamp >= before);
    }

    /// Minimal sidecar: answers connect, emits a challenge, answers one send.
    async fn spawn_fake_bridge() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();

            while let Some(Ok(Message::Text(text))) = source.next().await {
                let req: serde_json::Value = serde_json::from_str(&text).unwrap();
                let id = req["id"].as_u64().unwrap();
                match req["op"].as_str().unwrap() {
                    "connect" => {
                        let ok = json!({"id": id, "ok": true, "result": {}});
                        sink.send(Message::Text(ok.to_string())).await.unwrap();
                        let qr = json!({"event": "qr", "data": "2@challenge"});
                        sink.send(Message::Text(qr.to_string())).await.unwrap();
                    }
                    "send_text" => {
                        let ok = json!({"id": id, "ok": true, "result": {"id": "MSG1", "timestamp": 1_700_000_000}});
                        sink.send(Message::Text(ok.to_string())).await.unwrap();
                    }
                    _ => {
                        let err = json!({"id": id, "ok": false, "error": "unsupported"});
                        sink.send(Message::Text(err.to_string())).await.unwrap();
                    }
                }
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_bridge_round_trip_against_fake_sidecar() {
        let url = spawn_fake_bridge().await;
        let connector = BridgeConnector::new(url, Duration::from_secs(5));
        let tenant = TenantId::new("acme").unwrap();

        let (link, mut events) = connector.connect(&tenant, None).await.unwrap();

        match events.recv().await {
            Some(ProtocolEvent::PairingChallenge(data)) => assert_eq!(data, "2@challenge"),
            other => panic!("unexpected event: {:?}", other),
        }

        let to = Address::parse("573001112222").unwrap();
        let receipt = link.send_text(&to, "hi").await.unwrap();
        assert_eq!(receipt.message_id, "MSG1");

        let err = link.lookup(&to).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected(_)));

        link.disconnect().await;
        assert!(matches!(
            link.send_text(&to, "again").await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = BridgeConnector::new(format!("ws://{}", addr), Duration::from_secs(1));
        let tenant = TenantId::new("acme").unwrap();
        let result = connector.connect(&tenant, None).await;
        assert!(matches!(result, Err(ProtocolError::Connect(_))));
    }

    /// Sidecar that accepts the socket but never answers. Reports once the
    /// client closes it.
    async fn spawn_silent_bridge() -> (String, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
            let _ = closed_tx.send(());
        });

        (format!("ws://{}", addr), closed_rx)
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_socket() {
        let (url, closed) = spawn_silent_bridge().await;
        let connector = BridgeConnector::new(url, Duration::from_millis(200));
        let tenant = TenantId::new("acme").unwrap();

        let result = connector.connect(&tenant, None).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));

        let observed = timeout(Duration::from_secs(2), closed).await;
        assert!(matches!(observed, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_abandoned_connect_closes_socket() {
        let (url, closed) = spawn_silent_bridge().await;
        let connector = BridgeConnector::new(url, Duration::from_secs(30));
        let tenant = TenantId::new("acme").unwrap();

        // Dropped mid-handshake, the way a caller's own timeout would
        let abandoned = timeout(Duration::from_millis(200), connector.connect(&tenant, None)).await;
        assert!(abandoned.is_err());

        let observed = timeout(Duration::from_secs(2), closed).await;
        assert!(matches!(observed, Ok(Ok(()))));
    }
}
