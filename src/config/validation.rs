use std::net::SocketAddr;

use eyre::Result;

use crate::config::models::{
    GatewayConfig, GatewaySettings, HealthCheckConfig, RouteRuleConfig, ServiceConfig,
    WebsocketEndpointConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        // Validate listen address
        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(mut settings_errors) = Self::validate_gateway_settings(&config.gateway) {
            errors.append(&mut settings_errors);
        }

        // Validate services
        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        } else {
            for (name, service) in &config.services {
                if let Err(mut service_errors) = Self::validate_service(name, service) {
                    errors.append(&mut service_errors);
                }
            }
        }

        if let Err(mut health_check_errors) =
            Self::validate_health_check_config(&config.health_check)
        {
            errors.append(&mut health_check_errors);
        }

        if let Err(conflict_error_list) = Self::check_route_conflicts(config) {
            errors.extend(conflict_error_list);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate gateway-wide dispatch settings
    fn validate_gateway_settings(settings: &GatewaySettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if settings.default_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "gateway.default_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if settings.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "gateway.failure_threshold".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if settings.cooldown_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "gateway.cooldown_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if settings.ws_connect_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "gateway.ws_connect_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate a single service configuration
    fn validate_service(name: &str, service: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if name.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "service name".to_string(),
                message: "Service names cannot be empty".to_string(),
            });
        }

        if let Err(e) = Self::validate_url(&service.base_url, &format!("service '{name}' base_url"))
        {
            errors.push(e);
        }

        if let Some(timeout_ms) = service.timeout_ms
            && timeout_ms == 0
        {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' timeout_ms"),
                message: "Must be greater than 0".to_string(),
            });
        }

        if service.max_retries > 0 && service.retry_delay_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' retry_delay_ms"),
                message: "Must be greater than 0 when retries are configured".to_string(),
            });
        }

        if !service.health_check_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' health_check_path"),
                message: "Must start with '/'".to_string(),
            });
        }

        for rule in &service.routes {
            if let Err(e) = Self::validate_route_rule(name, rule) {
                errors.push(e);
            }
        }

        if let Some(ws) = &service.websocket
            && let Err(mut ws_errors) = Self::validate_websocket_endpoint(name, ws)
        {
            errors.append(&mut ws_errors);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate a single prefix → rewrite rule
    fn validate_route_rule(name: &str, rule: &RouteRuleConfig) -> ValidationResult<()> {
        if !rule.prefix.starts_with('/') {
            return Err(ValidationError::InvalidField {
                field: format!("service '{name}' route prefix '{}'", rule.prefix),
                message: "Route prefixes must start with '/'".to_string(),
            });
        }

        // An empty rewrite strips the prefix; anything else must be a path.
        if let Some(rewrite) = &rule.rewrite
            && !rewrite.is_empty()
            && !rewrite.starts_with('/')
        {
            return Err(ValidationError::InvalidField {
                field: format!("service '{name}' route rewrite '{rewrite}'"),
                message: "Rewrites must be empty or start with '/'".to_string(),
            });
        }

        Ok(())
    }

    /// Validate a WebSocket endpoint declaration
    fn validate_websocket_endpoint(
        name: &str,
        ws: &WebsocketEndpointConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !ws.upgrade_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' websocket.upgrade_path"),
                message: "Must start with '/'".to_string(),
            });
        }

        if ws.user_param.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' websocket.user_param"),
                message: "Cannot be empty".to_string(),
            });
        }

        if let Some(resource_param) = &ws.resource_param
            && resource_param.trim().is_empty()
        {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' websocket.resource_param"),
                message: "Cannot be empty when set".to_string(),
            });
        }

        if let Some(downstream_path) = &ws.downstream_path
            && !downstream_path.starts_with('/')
        {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' websocket.downstream_path"),
                message: "Must start with '/'".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_health_check_config(
        config: &HealthCheckConfig,
    ) -> Result<(), Vec<ValidationError>> {
        if !config.enabled {
            return Ok(());
        }

        let mut errors = Vec::new();

        if config.interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.interval_secs".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.timeout_secs".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.unhealthy_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.unhealthy_threshold".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.healthy_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.healthy_threshold".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Check for conflicting route declarations across services.
    ///
    /// Two services claiming the same rule prefix would make resolution depend on
    /// evaluation order; the same goes for duplicate WebSocket upgrade paths.
    fn check_route_conflicts(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let mut prefixes: Vec<(&str, &str)> = Vec::new();
        for (name, service) in &config.services {
            for rule in &service.routes {
                if let Some((other, _)) = prefixes.iter().find(|(_, p)| *p == rule.prefix) {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "Route prefix '{}' is declared by both '{other}' and '{name}'",
                            rule.prefix
                        ),
                    });
                } else {
                    prefixes.push((name, &rule.prefix));
                }
            }
        }

        let mut upgrade_paths: Vec<(&str, &str)> = Vec::new();
        for (name, service) in &config.services {
            if let Some(ws) = &service.websocket {
                if let Some((other, _)) = upgrade_paths.iter().find(|(_, p)| *p == ws.upgrade_path)
                {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "WebSocket upgrade path '{}' is declared by both '{other}' and '{name}'",
                            ws.upgrade_path
                        ),
                    });
                } else {
                    upgrade_paths.push((name, &ws.upgrade_path));
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
