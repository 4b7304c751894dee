use axum::body::Body;
use http::StatusCode;
use hyper::Response;

/// Result alias for the dispatch pipeline
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failure taxonomy for one forwarded call.
///
/// Every variant maps to exactly one client-visible response shape; the
/// dispatcher owns that translation. The retry loop consults
/// [`ProxyError::is_transient`] and the circuit breaker counts every variant
/// except [`ProxyError::CircuitOpen`] (a rejected call never reaches the
/// breaker's outcome accounting).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No route rule across all services matched the inbound path.
    #[error("no service is configured for path '{path}'")]
    ServiceNotConfigured { path: String },

    /// The backend could not be reached: refused, unknown host, unreachable.
    #[error("connection to '{service}' failed: {detail}")]
    Connection { service: String, detail: String },

    /// The per-attempt timeout elapsed or the peer reset the connection.
    #[error("call to '{service}' timed out: {detail}")]
    Timeout { service: String, detail: String },

    /// The service's circuit is open; the operation was never invoked.
    #[error("circuit for '{service}' is open, retry in {retry_after_secs}s")]
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
    },

    /// The backend answered with a 5xx status. Carries the full response so
    /// the dispatcher can pass status and body through unchanged after the
    /// breaker has recorded the failure.
    #[error("'{service}' answered {status}")]
    UpstreamStatus {
        service: String,
        status: StatusCode,
        response: Response<Body>,
    },

    /// Any other failure while talking to the backend.
    #[error("request to '{service}' failed: {detail}")]
    Transport { service: String, detail: String },
}

impl ProxyError {
    /// Whether a retry against the same backend can plausibly succeed.
    ///
    /// Only connection and timeout failures qualify. A 5xx answer is a
    /// definitive response, an open circuit must not be hammered, and an
    /// unresolved route cannot improve by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// The client-facing status for this failure.
    pub fn client_status(&self) -> StatusCode {
        match self {
            Self::ServiceNotConfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connection { .. } | Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus { status, .. } => *status,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}
