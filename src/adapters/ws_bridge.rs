//! Bridging of client WebSockets to backend WebSockets.
//!
//! Upgrade requests are validated before the handshake completes: missing
//! session parameters are rejected with a plain HTTP 400 and the socket is
//! never upgraded. After the handshake the bridge dials the backend with a
//! bounded connect timeout; a reachable backend gets a paired session with
//! two independently abortable pump tasks, an unreachable one degrades to a
//! fallback session that keeps the client connected and tells it so.
use std::time::Duration;

use axum::{
    body::Body as AxumBody,
    extract::ws::{
        CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade,
    },
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use http::{StatusCode, Uri, header};
use hyper::Response;
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message as UpstreamMessage, protocol::CloseFrame as UpstreamCloseFrame},
};
use url::Url;

use crate::core::{
    rewrite::PathRewriter,
    session::{ActiveSession, SessionKey, SessionRegistry},
};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close sent to a client whose session key was claimed by a newer connection
const DISPLACED_CLOSE_REASON: &str = "New connection established";

/// Bridges client WebSocket sessions to backend WebSocket endpoints
#[derive(Clone)]
pub struct WebSocketBridge {
    rewriter: Arc<PathRewriter>,
    sessions: Arc<SessionRegistry>,
    connect_timeout: Duration,
}

/// Everything a session task needs, resolved before the handshake.
#[derive(Debug, Clone)]
struct SessionPlan {
    service: String,
    key: SessionKey,
    downstream_url: Url,
}

impl WebSocketBridge {
    pub fn new(
        rewriter: Arc<PathRewriter>,
        sessions: Arc<SessionRegistry>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            rewriter,
            sessions,
            connect_timeout,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Validate an upgrade request and stage the session.
    ///
    /// Rejections happen here, before the 101 handshake; once `on_upgrade`
    /// is reached the client always gets a live socket, paired or fallback.
    pub async fn handle_upgrade(&self, ws: WebSocketUpgrade, uri: &Uri) -> Response<AxumBody> {
        let path = uri.path();
        let target = match self.rewriter.resolve_upgrade(path) {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(path, error = %err, "upgrade request did not resolve to a service");
                return configuration_error_response();
            }
        };
        let service = Arc::clone(&target.service);
        let Some(endpoint) = service.websocket.as_ref() else {
            tracing::error!(path, service = %service.name, "service has no websocket endpoint");
            return configuration_error_response();
        };

        let query = uri.query().unwrap_or("");
        let Some(user_id) = query_param(query, &endpoint.user_param) else {
            return invalid_session_params(&format!(
                "missing required query parameter '{}'",
                endpoint.user_param
            ));
        };
        let resource_id = match &endpoint.resource_param {
            Some(param) => match query_param(query, param) {
                Some(value) => Some(value),
                None => {
                    return invalid_session_params(&format!(
                        "missing required query parameter '{param}'"
                    ));
                }
            },
            None => None,
        };

        let downstream_url =
            match downstream_url(&service.base_url, &target.downstream_path, uri.query()) {
                Ok(url) => url,
                Err(detail) => {
                    tracing::error!(service = %service.name, detail, "cannot derive downstream websocket URL");
                    return configuration_error_response();
                }
            };

        let plan = SessionPlan {
            service: service.name.clone(),
            key: SessionKey::new(user_id, resource_id),
            downstream_url,
        };
        let bridge = self.clone();
        ws.on_upgrade(move |socket| async move { bridge.run_session(socket, plan).await })
    }

    /// Drive one client session to completion.
    async fn run_session(self, client: WebSocket, plan: SessionPlan) {
        let downstream = match timeout(
            self.connect_timeout,
            connect_async(plan.downstream_url.as_str()),
        )
        .await
        {
            Ok(Ok((socket, _response))) => Some(socket),
            Ok(Err(err)) => {
                tracing::warn!(
                    service = %plan.service,
                    session = %plan.key,
                    error = %err,
                    "downstream websocket connect failed, entering fallback mode"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    service = %plan.service,
                    session = %plan.key,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "downstream websocket connect timed out, entering fallback mode"
                );
                None
            }
        };

        let fallback = downstream.is_none();
        let session = self.sessions.activate(plan.key.clone(), fallback).await;
        let session_id = session.id;
        tracing::info!(
            service = %plan.service,
            session = %plan.key,
            %session_id,
            fallback,
            "websocket session established"
        );

        match downstream {
            Some(socket) => relay_paired(client, socket, session, &plan).await,
            None => relay_fallback(client, session, &plan).await,
        }

        self.sessions.remove_if_owner(&plan.key, session_id).await;
        tracing::info!(
            service = %plan.service,
            session = %plan.key,
            %session_id,
            "websocket session closed"
        );
    }
}

/// Relay frames between the paired sockets until either side closes.
///
/// Each direction runs as its own task so a stalled peer on one side never
/// wedges the other; whichever pump finishes first aborts its sibling.
async fn relay_paired(
    client: WebSocket,
    downstream: UpstreamSocket,
    session: ActiveSession,
    plan: &SessionPlan,
) {
    let (client_sink, client_stream) = client.split();
    let (down_sink, down_stream) = downstream.split();
    let session_label = plan.key.to_string();

    let mut c2d = tokio::spawn(pump_client_to_downstream(
        client_stream,
        down_sink,
        session_label.clone(),
    ));
    let mut d2c = tokio::spawn(pump_downstream_to_client(
        down_stream,
        client_sink,
        session.displaced,
        session_label,
    ));

    tokio::select! {
        _ = (&mut c2d) => d2c.abort(),
        _ = (&mut d2c) => c2d.abort(),
    }
}

/// Client → backend pump. Forwards every frame, including the close.
async fn pump_client_to_downstream(
    mut client_stream: SplitStream<WebSocket>,
    mut down_sink: SplitSink<UpstreamSocket, UpstreamMessage>,
    session: String,
) {
    while let Some(received) = client_stream.next().await {
        let msg = match received {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(%session, error = %err, "client read failed");
                break;
            }
        };
        let is_close = matches!(msg, ClientMessage::Close(_));
        if down_sink.send(client_to_upstream(msg)).await.is_err() {
            return;
        }
        if is_close {
            return;
        }
    }
    // The client vanished without a close frame; give the backend one.
    let _ = down_sink.send(UpstreamMessage::Close(None)).await;
}

/// Backend → client pump. Also owns displacement: when a newer connection
/// claims the session key, this side closes the client and acknowledges.
async fn pump_downstream_to_client(
    mut down_stream: SplitStream<UpstreamSocket>,
    mut client_sink: SplitSink<WebSocket, ClientMessage>,
    mut displaced: mpsc::Receiver<oneshot::Sender<()>>,
    session: String,
) {
    loop {
        tokio::select! {
            ack = displaced.recv() => {
                tracing::info!(%session, "closing displaced session");
                let _ = client_sink
                    .send(ClientMessage::Close(Some(ClientCloseFrame {
                        code: 1000,
                        reason: DISPLACED_CLOSE_REASON.into(),
                    })))
                    .await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return;
            }
            received = down_stream.next() => {
                match received {
                    Some(Ok(msg)) => {
                        let is_close = matches!(msg, UpstreamMessage::Close(_));
                        if let Some(outbound) = upstream_to_client(msg)
                            && client_sink.send(outbound).await.is_err()
                        {
                            return;
                        }
                        if is_close {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(%session, error = %err, "downstream read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    // The backend vanished; close the client normally.
    let _ = client_sink
        .send(ClientMessage::Close(Some(ClientCloseFrame {
            code: 1000,
            reason: "Upstream connection closed".into(),
        })))
        .await;
}

/// Keep the client connected without a backend peer.
///
/// Inbound frames are logged and discarded; the only outbound traffic is the
/// initial fallback notification and an eventual close.
async fn relay_fallback(mut client: WebSocket, mut session: ActiveSession, plan: &SessionPlan) {
    let notice = fallback_notice(plan);
    if client
        .send(ClientMessage::Text(notice.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            ack = session.displaced.recv() => {
                let _ = client
                    .send(ClientMessage::Close(Some(ClientCloseFrame {
                        code: 1000,
                        reason: DISPLACED_CLOSE_REASON.into(),
                    })))
                    .await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return;
            }
            received = client.recv() => {
                match received {
                    Some(Ok(ClientMessage::Close(_))) | None => return,
                    Some(Ok(msg)) => {
                        tracing::debug!(
                            session = %plan.key,
                            service = %plan.service,
                            frame = frame_kind(&msg),
                            "discarding frame received in fallback mode"
                        );
                    }
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

/// Initial message telling a fallback client that no backend is attached.
fn fallback_notice(plan: &SessionPlan) -> serde_json::Value {
    let mut notice = serde_json::json!({
        "type": "connection",
        "fallbackMode": true,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": plan.service,
        "userId": plan.key.user_id,
    });
    if let Some(resource) = &plan.key.resource_id {
        notice["resourceId"] = serde_json::json!(resource);
    }
    notice
}

fn frame_kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Text(_) => "text",
        ClientMessage::Binary(_) => "binary",
        ClientMessage::Ping(_) => "ping",
        ClientMessage::Pong(_) => "pong",
        ClientMessage::Close(_) => "close",
    }
}

/// Convert a client frame for the tungstenite upstream connection.
fn client_to_upstream(msg: ClientMessage) -> UpstreamMessage {
    match msg {
        ClientMessage::Text(text) => UpstreamMessage::Text(text.as_str().into()),
        ClientMessage::Binary(data) => UpstreamMessage::Binary(data),
        ClientMessage::Ping(data) => UpstreamMessage::Ping(data),
        ClientMessage::Pong(data) => UpstreamMessage::Pong(data),
        ClientMessage::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        })),
    }
}

/// Convert an upstream frame for the client, normalizing close codes the
/// client is not allowed to see.
fn upstream_to_client(msg: UpstreamMessage) -> Option<ClientMessage> {
    match msg {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        UpstreamMessage::Close(frame) => {
            Some(ClientMessage::Close(frame.map(|f| ClientCloseFrame {
                code: normalize_close_code(f.code.into()),
                reason: f.reason.as_str().into(),
            })))
        }
        // Raw frames never surface from a configured stream read.
        UpstreamMessage::Frame(_) => None,
    }
}

/// Backend close codes pass through within the RFC-defined application
/// range; anything else becomes a normal closure.
fn normalize_close_code(code: u16) -> u16 {
    if (1000..=4999).contains(&code) {
        code
    } else {
        1000
    }
}

/// Derive the backend WebSocket URL from the service base URL.
fn downstream_url(base_url: &str, path: &str, query: Option<&str>) -> Result<Url, String> {
    let mut url = Url::parse(base_url).map_err(|e| format!("invalid base URL: {e}"))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot use scheme '{scheme}' on '{base_url}'"))?;
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

/// First occurrence of a non-empty query parameter, form-decoded.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn invalid_session_params(message: &str) -> Response<AxumBody> {
    let payload = serde_json::json!({
        "error": "Bad Request",
        "code": "INVALID_SESSION_PARAMS",
        "message": message,
    });
    json_response(StatusCode::BAD_REQUEST, payload)
}

fn configuration_error_response() -> Response<AxumBody> {
    let payload = serde_json::json!({
        "error": "Internal Server Error",
        "code": "SERVICE_NOT_CONFIGURED",
    });
    json_response(StatusCode::INTERNAL_SERVER_ERROR, payload)
}

fn json_response(status: StatusCode, payload: serde_json::Value) -> Response<AxumBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(payload.to_string()))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(AxumBody::from(payload.to_string()));
            *fallback.status_mut() = status;
            fallback
        })
}
