use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failures surfaced by an [`HttpClient`].
///
/// The variants mirror how the dispatcher answers the client: connection
/// failures mean the upstream was never reached, resets mean it died
/// mid-exchange, and everything else is a generic transport fault.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The upstream could not be reached (refused, unresolvable)
    #[error("connection failed: {0}")]
    Connection(String),

    /// The upstream accepted the connection but the exchange died mid-flight
    #[error("connection reset: {0}")]
    Reset(String),

    /// The request could not be constructed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other transport fault
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for forwarding HTTP requests to upstream services.
///
/// Per-attempt deadlines are owned by the dispatcher, so `send_request` runs
/// without a timeout of its own. Health probes carry their own budget.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward a fully prepared request to an upstream service.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe `url`, returning whether it answered a success status within
    /// `timeout`.
    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}
