//! HTTP surface of the gateway.
//!
//! Wires the dispatcher, the WebSocket bridge and the gateway's own
//! endpoints into one axum router. `/health` and `/status` are reserved
//! before route resolution sees a request. Services with a WebSocket
//! endpoint get their upgrade path registered explicitly; plain HTTP on
//! those paths still flows to the proxy dispatcher.
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request, State, WebSocketUpgrade},
    routing::{any, get},
};
use http::{StatusCode, header};
use hyper::Response;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    adapters::{HealthChecker, HttpProxyDispatcher, WebSocketBridge},
    core::{BreakerRegistry, HealthStatus, ServiceRegistry},
};

/// Shared state behind every route
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<HttpProxyDispatcher>,
    pub bridge: Arc<WebSocketBridge>,
    pub breakers: Arc<BreakerRegistry>,
    pub health: Arc<HealthChecker>,
    pub listen_addr: String,
    pub started_at: Instant,
}

/// Build the gateway router over the shared state.
///
/// Route precedence: the gateway's own endpoints, then explicitly registered
/// WebSocket upgrade paths, then the catch-all that proxies everything else.
pub fn build_router(registry: &ServiceRegistry, state: GatewayState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status));

    for service in registry.iter() {
        if let Some(ws) = &service.websocket {
            tracing::info!(
                service = %service.name,
                path = %ws.upgrade_path,
                "registering websocket upgrade path"
            );
            router = router.route(&ws.upgrade_path, any(handle_service_upgrade));
        }
    }

    router
        .route("/", any(handle_proxy))
        .route("/{*path}", any(handle_proxy))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Catch-all: every unreserved path goes through the proxy dispatcher
async fn handle_proxy(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response<AxumBody> {
    state.dispatcher.dispatch(req, Some(client_addr)).await
}

/// Registered upgrade paths: Upgrade requests go to the bridge, anything
/// else proxies like a normal HTTP request.
async fn handle_service_upgrade(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
    req: Request,
) -> Response<AxumBody> {
    match ws {
        Some(ws) => state.bridge.handle_upgrade(ws, req.uri()).await,
        None => state.dispatcher.dispatch(req, Some(client_addr)).await,
    }
}

/// Gateway liveness plus per-service probe state
async fn handle_health(State(state): State<GatewayState>) -> Response<AxumBody> {
    let services: BTreeMap<String, HealthStatus> = state.health.statuses().into_iter().collect();
    let (healthy, unhealthy) = state.health.summary();

    let (status, verdict) = if unhealthy == 0 {
        (StatusCode::OK, "healthy")
    } else if healthy == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else {
        (StatusCode::OK, "degraded")
    };

    let payload = serde_json::json!({
        "status": verdict,
        "services": services,
        "healthy": healthy,
        "total": healthy + unhealthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    json_response(status, payload)
}

/// Operational snapshot: uptime, circuits, health and active WS sessions
async fn handle_status(State(state): State<GatewayState>) -> Response<AxumBody> {
    let services: BTreeMap<String, HealthStatus> = state.health.statuses().into_iter().collect();
    let circuits = state.breakers.snapshots().await;
    let sessions = state.bridge.sessions().snapshot().await;

    let payload = serde_json::json!({
        "service": "Peregrine API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "listen_addr": state.listen_addr,
        "services": services,
        "circuits": circuits,
        "websocket": {
            "active_sessions": sessions.len(),
            "sessions": sessions,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    json_response(StatusCode::OK, payload)
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
