use std::{error::Error as _, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Forwards prepared requests and classifies transport failures so the
///   dispatcher can tell "never reached" from "died mid-exchange"
/// * Pins upstream requests to HTTP/1.1 regardless of the inbound version
/// * Performs HEAD based health probes with a bounded budget
///
/// Retries, circuit breaking and per-attempt deadlines live in the
/// dispatcher; this adapter stays a thin transport.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self { client })
    }

    /// Identify the gateway to upstreams unless the caller already set an agent.
    fn add_default_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static("Peregrine-Gateway/1.0"),
            );
        }
    }
}

/// Render an error with its full cause chain, root cause last.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Map a legacy client error onto the port's taxonomy.
///
/// The interesting information sits at the bottom of the source chain as an
/// `io::Error`; refusals and unresolvable hosts mean the upstream was never
/// reached, resets and timeouts mean it went away mid-exchange.
fn classify_error(err: hyper_util::client::legacy::Error) -> HttpClientError {
    let detail = error_chain(&err);

    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io_err.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::NotFound
                | ErrorKind::AddrNotAvailable
                | ErrorKind::HostUnreachable
                | ErrorKind::NetworkUnreachable => HttpClientError::Connection(detail),
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::UnexpectedEof => HttpClientError::Reset(detail),
                _ if err.is_connect() => HttpClientError::Connection(detail),
                _ => HttpClientError::Transport(detail),
            };
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>()
            && (hyper_err.is_incomplete_message() || hyper_err.is_timeout())
        {
            return HttpClientError::Reset(detail);
        }
        source = cause.source();
    }

    if err.is_connect() {
        HttpClientError::Connection(detail)
    } else {
        HttpClientError::Transport(detail)
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::add_default_headers(&mut req);

        let span = tracing::debug_span!(
            "upstream_request",
            http.method = %req.method(),
            http.path = %req.uri().path(),
            upstream = %req.uri().authority().map_or_else(|| "unknown".to_string(), |a| a.to_string()),
            http.status_code = tracing::field::Empty,
        );
        let _enter = span.enter();

        // Rewrite Host to the upstream authority so virtual-hosted backends
        // answer for the right site.
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let host_value = match req.uri().port() {
            Some(port) => HeaderValue::from_str(&format!("{host}:{}", port.as_u16())),
            None => HeaderValue::from_str(host),
        }
        .map_err(|e| HttpClientError::InvalidRequest(format!("invalid host header: {e}")))?;
        req.headers_mut().insert(header::HOST, host_value);

        let (mut parts, body) = req.into_parts();
        // An inbound h2 request would otherwise carry its version into the
        // connection pool, which only speaks HTTP/1.1.
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        match self.client.request(outgoing).await {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // Hyper already decoded the framing; leaving the header in
                // would let Axum re-announce chunking it no longer controls.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(err) => {
                let classified = classify_error(err);
                tracing::debug!(error = %classified, "upstream request failed");
                Err(classified)
            }
        }
    }

    async fn health_check(&self, url: &str, probe_timeout: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method("HEAD")
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(probe_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let is_healthy = response.status().is_success();
                // Consume the body to prevent resource leaks
                let _ = response.into_body().collect().await;
                tracing::debug!(url, is_healthy, "health probe answered");
                Ok(is_healthy)
            }
            Ok(Err(err)) => {
                tracing::debug!(url, error = %err, "health probe failed");
                Ok(false)
            }
            Err(_) => {
                tracing::debug!(url, timeout_ms = probe_timeout.as_millis() as u64, "health probe timed out");
                Ok(false)
            }
        }
    }
}
