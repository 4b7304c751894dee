//! Configuration data structures for Peregrine.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that minimal configs remain concise.
//! The builder is considered part of the public API for embedding and tests.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default listen address for the gateway
fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default per-attempt downstream timeout when a service does not set one
fn default_timeout_ms() -> u64 {
    30_000
}

/// Default number of retries after the initial attempt
fn default_max_retries() -> u32 {
    2
}

/// Default base delay for exponential backoff between retries
fn default_retry_delay_ms() -> u64 {
    100
}

/// Default health probe path on a backend service
fn default_health_check_path() -> String {
    "/health".to_string()
}

/// Default consecutive-failure count that opens a circuit
fn default_failure_threshold() -> u32 {
    5
}

/// Default cooldown before an open circuit admits a trial call
fn default_cooldown_ms() -> u64 {
    60_000
}

/// Default bound on a downstream WebSocket connect attempt
fn default_ws_connect_timeout_ms() -> u64 {
    5_000
}

/// Default `retryAfter` seconds advertised on 503 responses
fn default_retry_after_secs() -> u64 {
    30
}

/// Default query parameter carrying the user identifier on upgrade requests
fn default_user_param() -> String {
    "userId".to_string()
}

/// Top-level gateway configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Address the gateway listens on, e.g. "0.0.0.0:8080"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Resilience and dispatch settings shared by all services
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Backend services keyed by service name (e.g. "clan", "socialMedia")
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    /// Active health probing of backend services
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            gateway: GatewaySettings::default(),
            services: HashMap::new(),
            health_check: HealthCheckConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Gateway-wide dispatch and resilience settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewaySettings {
    /// Per-attempt downstream timeout used when a service sets none (ms)
    pub default_timeout_ms: u64,
    /// Consecutive failures that open a service's circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before a trial (ms)
    pub cooldown_ms: u64,
    /// Bound on downstream WebSocket connect attempts (ms)
    pub ws_connect_timeout_ms: u64,
    /// `retryAfter` seconds on 503 responses not tied to a cooldown
    pub retry_after_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            ws_connect_timeout_ms: default_ws_connect_timeout_ms(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

/// One backend service reachable from the gateway.
///
/// The service name is the key in [`GatewayConfig::services`]. Multi-word names use
/// camelCase ("socialMedia") and are mapped to kebab-case API prefixes
/// ("/api/social-media") when no explicit route rules are given.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Base URL of the service, http or https
    pub base_url: String,
    /// Per-attempt timeout in milliseconds; gateway default when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Retries after the initial attempt (total tries = max_retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Path probed by the health checker
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Ordered rewrite rules; first matching prefix wins. Empty list gets a
    /// synthesized pass-through rule for `/api/<kebab-name>`.
    #[serde(default)]
    pub routes: Vec<RouteRuleConfig>,
    /// WebSocket endpoint exposed by this service, if any
    #[serde(default)]
    pub websocket: Option<WebsocketEndpointConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            health_check_path: default_health_check_path(),
            routes: Vec::new(),
            websocket: None,
        }
    }
}

/// One prefix → rewrite pair in a service's route table.
///
/// `rewrite: None` passes the inbound path through unchanged. `rewrite: Some(base)`
/// produces `base + remainder`, where the remainder is what follows the matched
/// prefix; an empty result is normalized to `/`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteRuleConfig {
    /// Inbound path prefix, matched segment-aware (never mid-segment)
    pub prefix: String,
    /// Replacement for the matched prefix; omit for pass-through
    #[serde(default)]
    pub rewrite: Option<String>,
}

/// WebSocket endpoint configuration for a service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebsocketEndpointConfig {
    /// Public path that accepts upgrade requests, e.g. "/api/notifications/ws"
    pub upgrade_path: String,
    /// Query parameter carrying the user identifier (required on every upgrade)
    #[serde(default = "default_user_param")]
    pub user_param: String,
    /// Additional required query parameter naming a resource (e.g. "clanId")
    #[serde(default)]
    pub resource_param: Option<String>,
    /// Downstream path for the bridged connection; when set, upgrades always
    /// resolve here regardless of the rest of the inbound path
    #[serde(default)]
    pub downstream_path: Option<String>,
}

/// Health check configuration for backend probing
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Whether active health checking is enabled
    pub enabled: bool,
    /// Interval between checks in seconds
    pub interval_secs: u64,
    /// Timeout for each probe in seconds
    pub timeout_secs: u64,
    /// Consecutive failures before marking a service unhealthy
    pub unhealthy_threshold: u32,
    /// Consecutive successes before marking a service healthy again
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Log output format selection
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Structured JSON lines, one event per line
    #[default]
    Json,
    /// Human-readable console output
    Pretty,
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
pub struct GatewayConfigBuilder {
    listen_addr: Option<String>,
    gateway: Option<GatewaySettings>,
    services: HashMap<String, ServiceConfig>,
    health_check: Option<HealthCheckConfig>,
    log_format: Option<LogFormat>,
}

impl Default for GatewayConfigBuilder {
    fn default() -> Self {
        Self {
            listen_addr: None,
            gateway: None,
            services: HashMap::new(),
            health_check: None,
            log_format: None,
        }
    }
}

impl GatewayConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the gateway-wide dispatch settings
    pub fn gateway(mut self, settings: GatewaySettings) -> Self {
        self.gateway = Some(settings);
        self
    }

    /// Add a service under the given name
    pub fn service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Set the health check configuration
    pub fn health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Set the log output format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            gateway: self.gateway.unwrap_or_default(),
            services: self.services,
            health_check: self.health_check.unwrap_or_default(),
            log_format: self.log_format.unwrap_or_default(),
        }
    }
}
