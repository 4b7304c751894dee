//! Per-service health bookkeeping fed by the background prober.
//!
//! Health state is advisory: it is surfaced on the status endpoint and in
//! logs, but never gates dispatch. The circuit breaker reacts to real
//! traffic; the prober only gives operators an early signal.
use std::{
    fmt,
    sync::atomic::{AtomicU8, AtomicU32, Ordering},
};

use serde::Serialize;

const STATUS_UNHEALTHY: u8 = 0;
const STATUS_HEALTHY: u8 = 1;

/// Probe-derived health of one upstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Tracks probe outcomes for one service.
///
/// Transitions are hysteretic: a service must fail `unhealthy_threshold`
/// probes in a row to be marked unhealthy, and pass `healthy_threshold`
/// probes in a row to recover. Services start healthy so a slow first probe
/// does not flap the status page on boot.
#[derive(Debug)]
pub struct ServiceHealth {
    status: AtomicU8,
    consecutive_successes: AtomicU32,
    consecutive_failures: AtomicU32,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(STATUS_HEALTHY),
            consecutive_successes: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> HealthStatus {
        if self.status.load(Ordering::Acquire) == STATUS_HEALTHY {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Record a passing probe. Returns the new status when this probe flipped
    /// an unhealthy service back to healthy.
    pub fn record_success(&self, healthy_threshold: u32) -> Option<HealthStatus> {
        self.consecutive_failures.store(0, Ordering::Release);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;

        if self.status() == HealthStatus::Unhealthy && successes >= healthy_threshold {
            self.status.store(STATUS_HEALTHY, Ordering::Release);
            return Some(HealthStatus::Healthy);
        }
        None
    }

    /// Record a failing probe. Returns the new status when this probe tipped
    /// a healthy service over the failure threshold.
    pub fn record_failure(&self, unhealthy_threshold: u32) -> Option<HealthStatus> {
        self.consecutive_successes.store(0, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if self.status() == HealthStatus::Healthy && failures >= unhealthy_threshold {
            self.status.store(STATUS_UNHEALTHY, Ordering::Release);
            return Some(HealthStatus::Unhealthy);
        }
        None
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let health = ServiceHealth::new();
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_failures_below_threshold_keep_status() {
        let health = ServiceHealth::new();
        assert_eq!(health.record_failure(3), None);
        assert_eq!(health.record_failure(3), None);
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures(), 2);
    }

    #[test]
    fn test_threshold_failure_transitions_to_unhealthy() {
        let health = ServiceHealth::new();
        health.record_failure(3);
        health.record_failure(3);
        assert_eq!(health.record_failure(3), Some(HealthStatus::Unhealthy));
        assert_eq!(health.status(), HealthStatus::Unhealthy);
        // Already unhealthy, no further transition reported.
        assert_eq!(health.record_failure(3), None);
    }

    #[test]
    fn test_recovery_requires_consecutive_successes() {
        let health = ServiceHealth::new();
        for _ in 0..3 {
            health.record_failure(3);
        }
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        assert_eq!(health.record_success(2), None);
        assert_eq!(health.record_success(2), Some(HealthStatus::Healthy));
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let health = ServiceHealth::new();
        health.record_failure(3);
        health.record_failure(3);
        health.record_success(2);
        assert_eq!(health.consecutive_failures(), 0);

        // The streak starts over, two more failures are not enough.
        health.record_failure(3);
        health.record_failure(3);
        assert_eq!(health.status(), HealthStatus::Healthy);
    }
}
