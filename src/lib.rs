//! Peregrine - a resilient API gateway for service fleets.
//!
//! Peregrine fronts a set of backend services with a **hexagonal architecture**:
//! business logic lives in `core`, the `ports` module defines the traits the
//! core depends on, and `adapters` provides the HTTP client, proxy dispatcher,
//! WebSocket bridge and router implementations.
//!
//! # Features
//! - Declarative path routing: ordered prefix → rewrite tables per service,
//!   first match wins, segment-aware matching
//! - Per-service circuit breaking (closed / open / half-open with a single
//!   trial call after the cooldown)
//! - Bounded retries with exponential backoff for transient transport failures
//! - WebSocket bridging with paired backend connections, fallback mode when
//!   the backend is unreachable, and newest-wins session displacement
//! - Active health checking and `/health` + `/status` self-endpoints
//! - Structured tracing via `tracing`, graceful shutdown on SIGINT/SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use peregrine::core::{PathRewriter, ServiceRegistry};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! // Load a configuration (TOML, YAML or JSON)
//! let cfg = peregrine::config::load_config("config.toml").await?;
//! let registry = Arc::new(ServiceRegistry::from_config(&cfg));
//! let rewriter = PathRewriter::new(registry);
//! // You would normally wire this into the dispatcher and router adapters
//! // (see the binary crate).
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. End users should prefer the
//! re-exports documented below instead of reaching into internal modules
//! directly.
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` with context attached via `WrapErr`.
//! The dispatch path uses the domain error type [`core::ProxyError`]; clients
//! always receive a JSON error body, never a bare status.
//!
//! # Concurrency & Data Structures
//! Shared mutable maps (circuit breakers, WebSocket sessions) use
//! `scc::HashMap` for predictable performance under contention.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{GatewayState, HealthChecker, HttpClientAdapter, HttpProxyDispatcher,
        WebSocketBridge, build_router},
    core::{BreakerRegistry, BreakerSettings, PathRewriter, ServiceRegistry, SessionRegistry},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
