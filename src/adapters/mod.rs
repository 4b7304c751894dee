pub mod dispatcher;
pub mod health_checker;
pub mod http_client;
pub mod router;
pub mod ws_bridge;

/// Re-export commonly used types from adapters
pub use dispatcher::HttpProxyDispatcher;
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use router::{GatewayState, build_router};
pub use ws_bridge::WebSocketBridge;
