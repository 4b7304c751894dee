pub mod breaker;
pub mod error;
pub mod health;
pub mod registry;
pub mod retry;
pub mod rewrite;
pub mod session;

pub use breaker::{BreakerRegistry, BreakerSettings, CircuitBreaker, CircuitState};
pub use error::{ProxyError, ProxyResult};
pub use health::{HealthStatus, ServiceHealth};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use retry::{RetryExecutor, RetryPolicy};
pub use rewrite::{PathRewriter, RouteTarget};
pub use session::{SessionKey, SessionRegistry};
