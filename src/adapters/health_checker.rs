//! Active health probing of backend services.
//!
//! Probes every registered service on a fixed interval and keeps a
//! consecutive-success/failure tally per service. Health state is surfaced on
//! the gateway's own `/health` and `/status` endpoints; it never gates
//! dispatch, which relies on circuit breakers instead.
use std::{sync::Arc, time::Duration};

use eyre::Result;
use tokio::time::sleep;

use crate::{
    config::models::HealthCheckConfig,
    core::{HealthStatus, ServiceHealth, ServiceRegistry},
    ports::HttpClient,
};

/// One probed service: its name, resolved probe URL and running tally.
struct ProbeTarget {
    service: String,
    url: String,
    health: ServiceHealth,
}

/// Health checker adapter for monitoring backend services
pub struct HealthChecker {
    http_client: Arc<dyn HttpClient>,
    config: HealthCheckConfig,
    targets: Vec<ProbeTarget>,
}

impl HealthChecker {
    pub fn new(
        registry: &ServiceRegistry,
        http_client: Arc<dyn HttpClient>,
        config: HealthCheckConfig,
    ) -> Self {
        // Registry order is sorted by name, so snapshots come out stable.
        let targets = registry
            .iter()
            .map(|service| ProbeTarget {
                service: service.name.clone(),
                url: service.health_check_url(),
                health: ServiceHealth::new(),
            })
            .collect();
        Self {
            http_client,
            config,
            targets,
        }
    }

    /// Run the health checker loop
    pub async fn run(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("health checking is disabled");
            return Ok(());
        }

        let interval = Duration::from_secs(self.config.interval_secs);
        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            services = self.targets.len(),
            "starting health checker"
        );

        loop {
            // Sleep at the beginning so probes do not race service startup
            sleep(interval).await;
            self.run_cycle().await;
            tracing::debug!("health check cycle completed");
        }
    }

    /// Probe every service once and record the outcomes
    pub async fn run_cycle(&self) {
        let probe_timeout = Duration::from_secs(self.config.timeout_secs);

        for target in &self.targets {
            tracing::debug!(service = %target.service, url = %target.url, "probing service");
            match self
                .http_client
                .health_check(&target.url, probe_timeout)
                .await
            {
                Ok(true) => self.record_success(target),
                Ok(false) => self.record_failure(target, "unhealthy response"),
                Err(err) => self.record_failure(target, &format!("probe error: {err}")),
            }
        }
    }

    fn record_success(&self, target: &ProbeTarget) {
        if let Some(HealthStatus::Healthy) =
            target.health.record_success(self.config.healthy_threshold)
        {
            tracing::info!(service = %target.service, "service recovered, marking healthy");
        }
    }

    fn record_failure(&self, target: &ProbeTarget, reason: &str) {
        let transition = target.health.record_failure(self.config.unhealthy_threshold);
        tracing::info!(
            service = %target.service,
            reason,
            failures = target.health.consecutive_failures(),
            threshold = self.config.unhealthy_threshold,
            "health probe failed"
        );
        if let Some(HealthStatus::Unhealthy) = transition {
            tracing::warn!(service = %target.service, "service marked unhealthy");
        }
    }

    /// Current status of every probed service, sorted by service name
    pub fn statuses(&self) -> Vec<(String, HealthStatus)> {
        self.targets
            .iter()
            .map(|target| (target.service.clone(), target.health.status()))
            .collect()
    }

    /// Count of (healthy, unhealthy) services
    pub fn summary(&self) -> (usize, usize) {
        let mut healthy = 0;
        let mut unhealthy = 0;
        for target in &self.targets {
            match target.health.status() {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
            }
        }
        (healthy, unhealthy)
    }
}
