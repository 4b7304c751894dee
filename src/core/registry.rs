//! Static registry of backend services.
//!
//! Built once from configuration at startup and immutable afterwards. The registry
//! owns the resolved [`ServiceDescriptor`]s, including each service's ordered route
//! table; services are kept sorted by name so route resolution is deterministic
//! regardless of how the configuration file ordered them.
use std::{sync::Arc, time::Duration};

use crate::config::models::{GatewayConfig, ServiceConfig};

/// One prefix → rewrite pair in a service's route table.
///
/// `rewrite: None` passes the inbound path through to the backend unchanged;
/// `rewrite: Some(base)` replaces the matched prefix with `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub prefix: String,
    pub rewrite: Option<String>,
}

/// WebSocket endpoint surface of a service
#[derive(Debug, Clone)]
pub struct WebsocketEndpoint {
    /// Public path accepting upgrade requests
    pub upgrade_path: String,
    /// Required query parameter carrying the user identifier
    pub user_param: String,
    /// Required query parameter naming a resource, when the route needs one
    pub resource_param: Option<String>,
    /// Fixed downstream path for bridged connections; when set, upgrades
    /// resolve here no matter what the inbound path looked like
    pub downstream_path: Option<String>,
}

/// Immutable descriptor of one backend service
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_url: String,
    /// Per-attempt downstream timeout
    pub timeout: Duration,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_delay: Duration,
    pub health_check_path: String,
    /// Ordered rewrite rules; first match wins
    pub routes: Vec<RouteRule>,
    pub websocket: Option<WebsocketEndpoint>,
}

impl ServiceDescriptor {
    fn from_config(name: &str, config: &ServiceConfig, default_timeout_ms: u64) -> Self {
        let routes = if config.routes.is_empty() {
            // A service without explicit rules is reachable under its
            // kebab-case name with the inbound path passed through unchanged.
            vec![RouteRule {
                prefix: format!("/api/{}", kebab_case(name)),
                rewrite: None,
            }]
        } else {
            config
                .routes
                .iter()
                .map(|rule| RouteRule {
                    prefix: rule.prefix.clone(),
                    rewrite: rule.rewrite.clone(),
                })
                .collect()
        };

        Self {
            name: name.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms.unwrap_or(default_timeout_ms)),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            health_check_path: config.health_check_path.clone(),
            routes,
            websocket: config.websocket.as_ref().map(|ws| WebsocketEndpoint {
                upgrade_path: ws.upgrade_path.clone(),
                user_param: ws.user_param.clone(),
                resource_param: ws.resource_param.clone(),
                downstream_path: ws.downstream_path.clone(),
            }),
        }
    }

    /// Full URL probed by the health checker
    pub fn health_check_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_check_path)
    }
}

/// Registry of all configured services
pub struct ServiceRegistry {
    services: Vec<Arc<ServiceDescriptor>>,
}

impl ServiceRegistry {
    /// Build the registry from a loaded configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut services: Vec<Arc<ServiceDescriptor>> = config
            .services
            .iter()
            .map(|(name, service)| {
                Arc::new(ServiceDescriptor::from_config(
                    name,
                    service,
                    config.gateway.default_timeout_ms,
                ))
            })
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Self { services }
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services
            .iter()
            .find(|service| service.name == name)
            .cloned()
    }

    /// Iterate services in resolution order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Map a camelCase or snake_case service name to its kebab-case API prefix
/// segment: "socialMedia" → "social-media", "work_history" → "work-history".
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '_' {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else {
            out.push(ch);
        }
    }
    out
}
