//! Per-service circuit breaking.
//!
//! One breaker exists per service name, created on first use and kept for the
//! life of the process. All breaker state sits behind a single mutex that is
//! only ever locked for transition decisions, never across an await point, so
//! concurrent outcomes against the same service cannot lose updates.
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::core::error::{ProxyError, ProxyResult};

/// Breaker tuning shared by every service's circuit
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before admitting a trial
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_millis(60_000),
        }
    }
}

/// Observable state of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally; consecutive failures are counted
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// One trial call is in flight; everyone else is rejected
    HalfOpen,
}

/// Point-in-time view of a circuit, for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Seconds since the most recent recorded failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_secs: Option<u64>,
    /// Seconds until an open circuit admits a trial call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

struct BreakerCell {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
}

/// Circuit breaker for a single backend service.
///
/// `HalfOpen` doubles as the trial claim: the caller that flips an elapsed
/// `Open` circuit to `HalfOpen` is the one trial call, and every other caller
/// is rejected until that trial reports an outcome. A trial whose future is
/// dropped before completing reverts the circuit to `Open` with the elapsed
/// deadline intact, so the next caller claims a fresh trial immediately.
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    cell: Mutex<BreakerCell>,
}

enum Admission {
    Normal,
    Probe,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            service: service.into(),
            settings,
            cell: Mutex::new(BreakerCell {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                next_attempt: None,
            }),
        }
    }

    /// Run `op` through the circuit.
    ///
    /// Rejected calls fail with [`ProxyError::CircuitOpen`] without invoking
    /// `op`. Otherwise the operation's own error is returned unchanged after
    /// the outcome has been recorded.
    pub async fn execute<T, F, Fut>(&self, op: F) -> ProxyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProxyResult<T>>,
    {
        let admission = self.try_acquire()?;
        let mut trial = TrialGuard::new(self, matches!(admission, Admission::Probe));

        let result = op().await;
        trial.disarm();

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Decide whether a call may proceed right now
    fn try_acquire(&self) -> ProxyResult<Admission> {
        let mut cell = self.lock();
        match cell.state {
            CircuitState::Closed => Ok(Admission::Normal),
            // The trial slot is taken; reject until it reports back.
            CircuitState::HalfOpen => Err(self.open_error(&cell)),
            CircuitState::Open => {
                let now = Instant::now();
                match cell.next_attempt {
                    Some(at) if now < at => Err(self.open_error(&cell)),
                    _ => {
                        cell.state = CircuitState::HalfOpen;
                        info!(service = %self.service, "cooldown elapsed, admitting trial call");
                        Ok(Admission::Probe)
                    }
                }
            }
        }
    }

    fn on_success(&self) {
        let mut cell = self.lock();
        match cell.state {
            CircuitState::HalfOpen => {
                info!(service = %self.service, "trial call succeeded, circuit closed");
                cell.state = CircuitState::Closed;
                cell.failure_count = 0;
                cell.last_failure = None;
                cell.next_attempt = None;
            }
            CircuitState::Closed => {
                cell.failure_count = 0;
            }
            // A call admitted before the circuit opened finished late; the
            // cooldown still stands.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut cell = self.lock();
        let now = Instant::now();
        cell.last_failure = Some(now);
        match cell.state {
            CircuitState::Closed => {
                cell.failure_count += 1;
                if cell.failure_count >= self.settings.failure_threshold {
                    cell.state = CircuitState::Open;
                    cell.next_attempt = Some(now + self.settings.cooldown);
                    warn!(
                        service = %self.service,
                        failures = cell.failure_count,
                        cooldown_ms = self.settings.cooldown.as_millis() as u64,
                        "failure threshold reached, circuit open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                cell.state = CircuitState::Open;
                cell.next_attempt = Some(now + self.settings.cooldown);
                warn!(service = %self.service, "trial call failed, circuit reopened");
            }
            CircuitState::Open => {
                cell.failure_count += 1;
            }
        }
    }

    fn open_error(&self, cell: &BreakerCell) -> ProxyError {
        let remaining = cell
            .next_attempt
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        // Round up and never advertise zero: "retry immediately" on a
        // rejected call would just bounce off the trial slot again.
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        ProxyError::CircuitOpen {
            service: self.service.clone(),
            retry_after_secs: secs.max(1),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let cell = self.lock();
        let retry_after_secs = match cell.state {
            CircuitState::Closed => None,
            _ => cell
                .next_attempt
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs()),
        };
        CircuitSnapshot {
            service: self.service.clone(),
            state: cell.state,
            failure_count: cell.failure_count,
            last_failure_secs: cell.last_failure.map(|at| at.elapsed().as_secs()),
            retry_after_secs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCell> {
        // A poisoned lock means a panic elsewhere; the counters inside are
        // still coherent, so keep serving rather than propagate the panic.
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reverts an unreported trial when its future is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.probe {
            let mut cell = self.breaker.lock();
            if cell.state == CircuitState::HalfOpen {
                cell.state = CircuitState::Open;
            }
        }
    }
}

/// Owned registry of circuit breakers, one per service name.
///
/// Passed explicitly into the dispatcher and the WebSocket bridge; breakers
/// are created lazily on first use and live until process exit.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: scc::HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: scc::HashMap::new(),
        }
    }

    /// Fetch the breaker for a service, creating it on first use
    pub async fn get_or_create(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read_async(service, |_, breaker| Arc::clone(breaker))
            .await
        {
            return breaker;
        }

        let entry = self
            .breakers
            .entry_async(service.to_string())
            .await
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.settings.clone())));
        Arc::clone(entry.get())
    }

    /// Snapshots of every breaker created so far, sorted by service name
    pub async fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots = Vec::new();
        self.breakers
            .iter_async(|_, breaker| {
                snapshots.push(breaker.snapshot());
                true
            })
            .await;
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
