//! Data-driven path rewriting.
//!
//! Translates public API paths into the paths backend services expect. Every
//! per-service quirk is a row in that service's route table, never a branch in
//! code: adding a service or changing its public surface is a configuration
//! change. Rules are ordered and the first matching prefix wins, so tables
//! list specific prefixes before generic ones.
use std::sync::Arc;

use http::Method;
use tracing::{debug, trace};

use crate::core::{
    error::ProxyError,
    registry::{RouteRule, ServiceDescriptor, ServiceRegistry},
};

/// Outcome of route resolution: the owning service and the path the backend
/// expects.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub service: Arc<ServiceDescriptor>,
    pub downstream_path: String,
}

/// Resolves inbound paths against the per-service route tables
pub struct PathRewriter {
    registry: Arc<ServiceRegistry>,
}

impl PathRewriter {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve an inbound HTTP request path to a service and downstream path.
    ///
    /// Services are evaluated in registry order, each service's rules in
    /// declared order; the first matching prefix wins. No match across all
    /// services is a configuration gap reported as an error, never a silent
    /// proxy to some default backend.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<RouteTarget, ProxyError> {
        for service in self.registry.iter() {
            for rule in &service.routes {
                if let Some(remainder) = match_prefix(path, &rule.prefix) {
                    let downstream_path = apply_rewrite(rule, path, remainder);
                    trace!(
                        service = %service.name,
                        prefix = %rule.prefix,
                        %path,
                        %downstream_path,
                        "route rule matched"
                    );
                    return Ok(RouteTarget {
                        service: Arc::clone(service),
                        downstream_path,
                    });
                }
            }
        }

        debug!(%method, %path, "no route rule matched");
        Err(ProxyError::ServiceNotConfigured {
            path: path.to_string(),
        })
    }

    /// Resolve a WebSocket upgrade path.
    ///
    /// The upgrade path identifies the owning service. An endpoint that pins a
    /// downstream path sends every upgrade there regardless of the rest of the
    /// inbound path; otherwise the service's own route table applies, falling
    /// back to pass-through.
    pub fn resolve_upgrade(&self, path: &str) -> Result<RouteTarget, ProxyError> {
        for service in self.registry.iter() {
            let Some(ws) = &service.websocket else {
                continue;
            };
            if match_prefix(path, &ws.upgrade_path).is_none() {
                continue;
            }

            if let Some(pinned) = &ws.downstream_path {
                return Ok(RouteTarget {
                    service: Arc::clone(service),
                    downstream_path: normalize(pinned.clone()),
                });
            }

            for rule in &service.routes {
                if let Some(remainder) = match_prefix(path, &rule.prefix) {
                    return Ok(RouteTarget {
                        service: Arc::clone(service),
                        downstream_path: apply_rewrite(rule, path, remainder),
                    });
                }
            }

            return Ok(RouteTarget {
                service: Arc::clone(service),
                downstream_path: path.to_string(),
            });
        }

        debug!(%path, "no websocket endpoint matched");
        Err(ProxyError::ServiceNotConfigured {
            path: path.to_string(),
        })
    }
}

/// Segment-aware prefix match: the prefix matches the exact path or a path
/// continuing with `/`, never mid-segment ("/api/clan" does not match
/// "/api/clans/1"). Returns the remainder after the prefix.
fn match_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let remainder = path.strip_prefix(prefix)?;
    if remainder.is_empty() || remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

/// Apply a rule's rewrite to the matched remainder. A rule without a rewrite
/// passes the full inbound path through unchanged.
fn apply_rewrite(rule: &RouteRule, path: &str, remainder: &str) -> String {
    match &rule.rewrite {
        None => path.to_string(),
        Some(base) => normalize(format!("{base}{remainder}")),
    }
}

fn normalize(path: String) -> String {
    if path.is_empty() { "/".to_string() } else { path }
}
