//! Forwarding of one HTTP request to its resolved backend.
//!
//! The dispatcher composes the routing core: the path rewriter picks the
//! service and downstream path, the per-service circuit breaker gates the
//! call, and the retry executor absorbs transient faults inside the breaker's
//! accounting window. Every failure is translated into one of the documented
//! JSON error shapes; upstream responses (including 5xx) pass through with
//! their original status and body.
use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri, header};
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
    core::{
        breaker::BreakerRegistry,
        error::{ProxyError, ProxyResult},
        registry::ServiceDescriptor,
        retry::{RetryExecutor, RetryPolicy},
        rewrite::{PathRewriter, RouteTarget},
    },
    ports::http_client::{HttpClient, HttpClientError},
};

/// Headers that describe the inbound hop and must not travel upstream.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Dispatches proxied HTTP requests through the resilience pipeline
pub struct HttpProxyDispatcher {
    http_client: Arc<dyn HttpClient>,
    rewriter: Arc<PathRewriter>,
    breakers: Arc<BreakerRegistry>,
    /// `retryAfter` seconds advertised on 503s that are not tied to a
    /// breaker cooldown
    retry_after_secs: u64,
}

impl HttpProxyDispatcher {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        rewriter: Arc<PathRewriter>,
        breakers: Arc<BreakerRegistry>,
        retry_after_secs: u64,
    ) -> Self {
        Self {
            http_client,
            rewriter,
            breakers,
            retry_after_secs,
        }
    }

    /// Forward one request and translate the outcome into a client response.
    ///
    /// Never returns an error: every failure becomes a JSON error response
    /// with the documented status and shape.
    pub async fn dispatch(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let correlation_id = correlation_id_from(req.headers());

        let target = match self.rewriter.resolve(&method, &path) {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(%method, path, error = %err, "request did not resolve to a service");
                return self.error_response(&err, &correlation_id, None);
            }
        };
        let service = Arc::clone(&target.service);

        let prepared =
            match PreparedRequest::assemble(req, &target, client_addr, &correlation_id).await {
                Ok(prepared) => prepared,
                Err(err) => {
                    tracing::error!(service = %service.name, error = %err, "failed to prepare upstream request");
                    return self.error_response(&err, &correlation_id, Some(&service));
                }
            };

        let breaker = self.breakers.get_or_create(&service.name).await;
        let policy = RetryPolicy::new(service.max_retries, service.retry_delay);

        // The breaker accounts the whole retry sequence as one outcome.
        let outcome = breaker
            .execute(|| RetryExecutor::run(policy, |attempt| self.attempt(&prepared, &service, attempt)))
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) => {
                tracing::info!(
                    correlation_id,
                    %method,
                    path,
                    service = %service.name,
                    status = response.status().as_u16(),
                    elapsed_ms,
                    "proxied request"
                );
                finalize_response(response, &service.name, elapsed_ms, &correlation_id)
            }
            Err(ProxyError::UpstreamStatus { status, response, .. }) => {
                tracing::warn!(
                    correlation_id,
                    %method,
                    path,
                    service = %service.name,
                    status = status.as_u16(),
                    elapsed_ms,
                    "upstream answered with server error"
                );
                finalize_response(response, &service.name, elapsed_ms, &correlation_id)
            }
            Err(err) => {
                tracing::warn!(
                    correlation_id,
                    %method,
                    path,
                    service = %service.name,
                    elapsed_ms,
                    error = %err,
                    "dispatch failed"
                );
                self.error_response(&err, &correlation_id, Some(&service))
            }
        }
    }

    /// One attempt against the backend, bounded by the service's timeout.
    ///
    /// A 5xx answer is converted into [`ProxyError::UpstreamStatus`]: the
    /// breaker counts it as a failure, the retry layer treats it as
    /// definitive, and the dispatcher passes the original response through.
    /// Everything below 500 (including 4xx) is a successful dispatch.
    async fn attempt(
        &self,
        prepared: &PreparedRequest,
        service: &ServiceDescriptor,
        attempt: u32,
    ) -> ProxyResult<Response<AxumBody>> {
        if attempt > 0 {
            tracing::debug!(service = %service.name, attempt, "retrying upstream call");
        }
        let request = prepared.build()?;

        match timeout(service.timeout, self.http_client.send_request(request)).await {
            Ok(Ok(response)) => {
                if response.status().is_server_error() {
                    Err(ProxyError::UpstreamStatus {
                        service: service.name.clone(),
                        status: response.status(),
                        response,
                    })
                } else {
                    Ok(response)
                }
            }
            Ok(Err(err)) => Err(transport_error(&service.name, err)),
            Err(_) => Err(ProxyError::Timeout {
                service: service.name.clone(),
                detail: format!("no response within {}ms", service.timeout.as_millis()),
            }),
        }
    }

    /// Build the JSON error response documented for this failure class.
    fn error_response(
        &self,
        err: &ProxyError,
        correlation_id: &str,
        service: Option<&ServiceDescriptor>,
    ) -> Response<AxumBody> {
        let status = err.client_status();
        let (payload, retry_after) = match err {
            ProxyError::ServiceNotConfigured { .. } => (
                serde_json::json!({
                    "error": "Internal Server Error",
                    "code": "SERVICE_NOT_CONFIGURED",
                }),
                None,
            ),
            ProxyError::CircuitOpen { retry_after_secs, .. } => (
                serde_json::json!({
                    "error": "Service Unavailable",
                    "code": "CIRCUIT_BREAKER_OPEN",
                    "retryAfter": retry_after_secs,
                }),
                Some(*retry_after_secs),
            ),
            ProxyError::Connection { .. } => {
                let code = if service.is_some_and(|svc| svc.max_retries > 0) {
                    "SERVICE_UNAVAILABLE_AFTER_RETRIES"
                } else {
                    "SERVICE_UNAVAILABLE"
                };
                (
                    serde_json::json!({
                        "error": "Service Unavailable",
                        "code": code,
                        "retryAfter": self.retry_after_secs,
                    }),
                    Some(self.retry_after_secs),
                )
            }
            ProxyError::Timeout { .. } => (
                serde_json::json!({
                    "error": "Gateway Timeout",
                    "code": "GATEWAY_TIMEOUT",
                }),
                None,
            ),
            ProxyError::UpstreamStatus { .. } | ProxyError::Transport { .. } => (
                serde_json::json!({
                    "error": "Bad Gateway",
                    "code": "BAD_GATEWAY",
                }),
                None,
            ),
        };

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Correlation-Id", correlation_id);
        if let Some(secs) = retry_after {
            builder = builder.header(header::RETRY_AFTER, secs.to_string());
        }
        builder
            .body(AxumBody::from(payload.to_string()))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(AxumBody::from(payload.to_string()));
                *fallback.status_mut() = status;
                fallback
            })
    }
}

/// Reuse the caller's correlation id when it sent one, otherwise mint one.
fn correlation_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Map a transport failure onto the dispatch taxonomy.
///
/// Resets are grouped with timeouts: for the client both mean the backend
/// went away mid-exchange and answer 504.
fn transport_error(service: &str, err: HttpClientError) -> ProxyError {
    match err {
        HttpClientError::Connection(detail) => ProxyError::Connection {
            service: service.to_string(),
            detail,
        },
        HttpClientError::Reset(detail) => ProxyError::Timeout {
            service: service.to_string(),
            detail,
        },
        HttpClientError::InvalidRequest(detail) | HttpClientError::Transport(detail) => {
            ProxyError::Transport {
                service: service.to_string(),
                detail,
            }
        }
    }
}

/// Strip CORS artifacts from the backend and stamp the gateway's headers.
fn finalize_response(
    mut response: Response<AxumBody>,
    service: &str,
    elapsed_ms: u64,
    correlation_id: &str,
) -> Response<AxumBody> {
    let headers = response.headers_mut();
    let cors_headers: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in cors_headers {
        headers.remove(&name);
    }

    if let Ok(value) = HeaderValue::from_str(service) {
        headers.insert("X-Gateway-Service", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms}ms")) {
        headers.insert("X-Response-Time", value);
    }
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert("X-Correlation-Id", value);
    }
    response
}

/// An upstream request buffered so every retry attempt can replay it.
struct PreparedRequest {
    service: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl PreparedRequest {
    /// Buffer the inbound request and rewrite it for the upstream hop.
    async fn assemble(
        req: Request<AxumBody>,
        target: &RouteTarget,
        client_addr: Option<SocketAddr>,
        correlation_id: &str,
    ) -> ProxyResult<Self> {
        let service = &target.service;

        let uri_string = match req.uri().query() {
            Some(query) => format!("{}{}?{}", service.base_url, target.downstream_path, query),
            None => format!("{}{}", service.base_url, target.downstream_path),
        };
        let uri: Uri = uri_string.parse().map_err(|e| ProxyError::Transport {
            service: service.name.clone(),
            detail: format!("invalid upstream URI '{uri_string}': {e}"),
        })?;

        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Transport {
                service: service.name.clone(),
                detail: format!("failed to buffer request body: {e}"),
            })?
            .to_bytes();

        let mut headers = parts.headers;
        for name in HOP_BY_HOP_HEADERS {
            headers.remove(name);
        }
        // CORS is decided at the gateway edge; the backend must not see the
        // browser origin and start negotiating on its own.
        headers.remove(header::ORIGIN);
        // Host is rewritten to the upstream authority by the client adapter.
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if !body.is_empty() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        if let Some(addr) = client_addr {
            let client_ip = addr.ip().to_string();
            let chain = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {client_ip}"),
                None => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&chain) {
                headers.insert("X-Forwarded-For", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            headers.insert("X-Correlation-Id", value);
        }
        headers.insert("X-Gateway", HeaderValue::from_static("peregrine"));

        Ok(Self {
            service: service.name.clone(),
            method: parts.method,
            uri,
            headers,
            body,
        })
    }

    /// Materialize one attempt's request from the buffered template.
    fn build(&self) -> ProxyResult<Request<AxumBody>> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(AxumBody::from(self.body.clone()))
            .map_err(|e| ProxyError::Transport {
                service: self.service.clone(),
                detail: format!("failed to build upstream request: {e}"),
            })?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::{
        config::models::{
            GatewayConfigBuilder, GatewaySettings, RouteRuleConfig, ServiceConfig,
        },
        core::{
            breaker::{BreakerSettings, CircuitState},
            registry::ServiceRegistry,
        },
        ports::http_client::HttpClientResult,
    };

    enum MockOutcome {
        Respond {
            status: StatusCode,
            headers: Vec<(&'static str, &'static str)>,
            body: &'static str,
        },
        Fail(HttpClientError),
        Hang,
    }

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    }

    struct MockHttpClient {
        outcomes: Mutex<VecDeque<MockOutcome>>,
        captured: Mutex<Vec<CapturedRequest>>,
    }

    impl MockHttpClient {
        fn scripted(outcomes: Vec<MockOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                captured: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.captured.lock().unwrap().len()
        }

        fn captured(&self) -> Vec<CapturedRequest> {
            self.captured.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            self.captured.lock().unwrap().push(CapturedRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });

            let outcome = self.outcomes.lock().unwrap().pop_front();
            match outcome {
                Some(MockOutcome::Respond { status, headers, body }) => {
                    let mut builder = Response::builder().status(status);
                    for (name, value) in headers {
                        builder = builder.header(name, value);
                    }
                    Ok(builder.body(AxumBody::from(body)).unwrap())
                }
                Some(MockOutcome::Fail(err)) => Err(err),
                Some(MockOutcome::Hang) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Response::new(AxumBody::from("late")))
                }
                None => Ok(Response::new(AxumBody::from("ok"))),
            }
        }

        async fn health_check(&self, _url: &str, _timeout: Duration) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    fn gig_service(max_retries: u32) -> ServiceConfig {
        ServiceConfig {
            base_url: "http://gig.internal:8080".to_string(),
            timeout_ms: Some(50),
            max_retries,
            retry_delay_ms: 10,
            routes: vec![RouteRuleConfig {
                prefix: "/api/gig".to_string(),
                rewrite: Some(String::new()),
            }],
            ..Default::default()
        }
    }

    fn dispatcher_with(
        client: Arc<MockHttpClient>,
        settings: GatewaySettings,
        service: ServiceConfig,
    ) -> (HttpProxyDispatcher, Arc<BreakerRegistry>) {
        let config = GatewayConfigBuilder::default()
            .gateway(settings)
            .service("gig", service)
            .build();
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings {
            failure_threshold: config.gateway.failure_threshold,
            cooldown: Duration::from_millis(config.gateway.cooldown_ms),
        }));
        let registry = Arc::new(ServiceRegistry::from_config(&config));
        let rewriter = Arc::new(PathRewriter::new(registry));
        let dispatcher = HttpProxyDispatcher::new(
            client,
            rewriter,
            Arc::clone(&breakers),
            config.gateway.retry_after_secs,
        );
        (dispatcher, breakers)
    }

    fn get(path: &str) -> Request<AxumBody> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(AxumBody::empty())
            .unwrap()
    }

    fn client_addr() -> SocketAddr {
        "203.0.113.9:4711".parse().unwrap()
    }

    async fn json_body(response: Response<AxumBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_success_rewrites_uri_and_headers() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Respond {
            status: StatusCode::OK,
            headers: vec![
                ("access-control-allow-origin", "*"),
                ("content-type", "application/json"),
            ],
            body: r#"{"items":[]}"#,
        }]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(2));

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/gig/submissions/7?page=2")
            .header("Origin", "https://app.example.com")
            .header("Connection", "keep-alive")
            .header("X-Forwarded-For", "198.51.100.7")
            .body(AxumBody::empty())
            .unwrap();
        let response = dispatcher.dispatch(req, Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-gateway-service").unwrap(),
            "gig"
        );
        assert!(response.headers().contains_key("x-response-time"));
        assert!(response.headers().contains_key("x-correlation-id"));
        assert!(!response.headers().contains_key("access-control-allow-origin"));

        let captured = client.captured();
        assert_eq!(captured.len(), 1);
        let upstream = &captured[0];
        assert_eq!(
            upstream.uri.to_string(),
            "http://gig.internal:8080/submissions/7?page=2"
        );
        assert_eq!(
            upstream.headers.get("x-forwarded-for").unwrap(),
            "198.51.100.7, 203.0.113.9"
        );
        assert_eq!(upstream.headers.get("x-gateway").unwrap(), "peregrine");
        assert!(upstream.headers.contains_key("x-correlation-id"));
        assert!(!upstream.headers.contains_key("origin"));
        assert!(!upstream.headers.contains_key("connection"));
    }

    #[tokio::test]
    async fn test_client_error_passes_through_without_breaker_failure() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Respond {
            status: StatusCode::NOT_FOUND,
            headers: vec![],
            body: "missing",
        }]);
        let (dispatcher, breakers) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(2));

        let response = dispatcher.dispatch(get("/api/gig/nope"), Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(client.calls(), 1); // 4xx is definitive, no retry

        let breaker = breakers.get_or_create("gig").await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_5xx_passes_through_and_counts_failure() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Respond {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers: vec![("content-type", "text/plain")],
            body: "backend down",
        }]);
        let (dispatcher, breakers) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(3));

        let response = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;

        // Original status and body, not the gateway's JSON shape.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"backend down");

        assert_eq!(client.calls(), 1); // a definitive answer is not retried
        let breaker = breakers.get_or_create("gig").await;
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries_then_503() {
        let client = MockHttpClient::scripted(vec![
            MockOutcome::Fail(HttpClientError::Connection("refused".into())),
            MockOutcome::Fail(HttpClientError::Connection("refused".into())),
            MockOutcome::Fail(HttpClientError::Connection("refused".into())),
        ]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(2));

        let response = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
        assert_eq!(client.calls(), 3); // 1 initial + 2 retries

        let body = json_body(response).await;
        assert_eq!(body["error"], "Service Unavailable");
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE_AFTER_RETRIES");
        assert_eq!(body["retryAfter"], 30);
    }

    #[tokio::test]
    async fn test_connection_refused_without_retry_budget_is_plain_unavailable() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Fail(
            HttpClientError::Connection("refused".into()),
        )]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(0));

        let response = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(client.calls(), 1);
        let body = json_body(response).await;
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_attempt_timeout_maps_to_gateway_timeout() {
        // The mock hangs past the 50ms service timeout.
        let client = MockHttpClient::scripted(vec![MockOutcome::Hang]);
        let (dispatcher, breakers) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(0));

        let response = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Gateway Timeout");
        assert_eq!(body["code"], "GATEWAY_TIMEOUT");

        let breaker = breakers.get_or_create("gig").await;
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_reset_maps_to_gateway_timeout() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Fail(
            HttpClientError::Reset("socket hang up".into()),
        )]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(0));

        let response = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = json_body(response).await;
        assert_eq!(body["code"], "GATEWAY_TIMEOUT");
    }

    #[tokio::test]
    async fn test_unresolved_path_is_configuration_error() {
        let client = MockHttpClient::scripted(vec![]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(2));

        let response = dispatcher
            .dispatch(get("/api/unknown/thing"), Some(client_addr()))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(client.calls(), 0);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["code"], "SERVICE_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_with_circuit_code() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Fail(
            HttpClientError::Connection("refused".into()),
        )]);
        let settings = GatewaySettings {
            failure_threshold: 1,
            ..Default::default()
        };
        let (dispatcher, _) = dispatcher_with(Arc::clone(&client), settings, gig_service(0));

        let first = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let second = dispatcher.dispatch(get("/api/gig/list"), Some(client_addr())).await;
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        // The second call never reached the network.
        assert_eq!(client.calls(), 1);

        let body = json_body(second).await;
        assert_eq!(body["code"], "CIRCUIT_BREAKER_OPEN");
        let retry_after = body["retryAfter"].as_u64().unwrap();
        assert!((1..=60).contains(&retry_after), "retryAfter {retry_after}");
    }

    #[tokio::test]
    async fn test_body_replayed_across_retries() {
        let client = MockHttpClient::scripted(vec![MockOutcome::Fail(
            HttpClientError::Connection("refused".into()),
        )]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(1));

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/gig")
            .header("content-type", "application/json")
            .body(AxumBody::from(r#"{"title":"mix"}"#))
            .unwrap();
        let response = dispatcher.dispatch(req, Some(client_addr())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let captured = client.captured();
        assert_eq!(captured.len(), 2);
        for upstream in &captured {
            assert_eq!(&upstream.body[..], br#"{"title":"mix"}"#);
            assert_eq!(
                upstream.headers.get(header::CONTENT_LENGTH).unwrap(),
                &HeaderValue::from(upstream.body.len())
            );
        }
        // Empty remainder normalizes to "/".
        assert_eq!(captured[0].uri.path(), "/");
    }

    #[tokio::test]
    async fn test_inbound_correlation_id_is_reused() {
        let client = MockHttpClient::scripted(vec![]);
        let (dispatcher, _) =
            dispatcher_with(Arc::clone(&client), GatewaySettings::default(), gig_service(0));

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/gig/list")
            .header("X-Correlation-Id", "req-12345")
            .body(AxumBody::empty())
            .unwrap();
        let response = dispatcher.dispatch(req, Some(client_addr())).await;

        assert_eq!(
            response.headers().get("x-correlation-id").unwrap(),
            "req-12345"
        );
        let captured = client.captured();
        assert_eq!(
            captured[0].headers.get("x-correlation-id").unwrap(),
            "req-12345"
        );
    }
}
