//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: trial requests test whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failure_count reaches threshold
//! Open → Half-Open: more than recovery_timeout since the last failure
//! Half-Open → Closed: probe request succeeds (failure_count = 0)
//! Half-Open → Open: probe request fails (re-armed at threshold)
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Open → Half-Open is evaluated lazily when the state is checked; no timer
//! - Every transition happens under one mutex per service
//! - Probe slots belong to a half-open generation; stale completions cannot free them
//!
//! Every operation has an `*_at(now)` form so callers and tests control the clock.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::routing::ServiceName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning shared by every breaker in a registry.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_probes: u32,
    pub reset_on_success: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            half_open_max_probes: config.half_open_max_probes.max(1),
            reset_on_success: config.reset_on_success,
        }
    }
}

/// Proof of admission, handed back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    /// State the breaker was in when the call was admitted.
    pub state: CircuitState,
    generation: u64,
    probe: bool,
}

impl Ticket {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Why a call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// `Open`, or `HalfOpen` when every probe slot is taken.
    pub state: CircuitState,
}

/// How an admitted call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Neither success nor failure (client went away, or no upstream call was made).
    Abandoned,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub service: ServiceName,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    generation: u64,
    probes_in_flight: u32,
}

/// State machine for a single upstream service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: ServiceName,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: ServiceName, settings: BreakerSettings) -> Self {
        metrics::set_circuit_state(service.as_str(), CircuitState::Closed);
        Self {
            service,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                generation: 0,
                probes_in_flight: 0,
            }),
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, moving Open → Half-Open first if the recovery timeout has passed.
    pub fn check_state(&self) -> CircuitState {
        self.check_state_at(Instant::now())
    }

    pub fn check_state_at(&self, now: Instant) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        self.on_failure(&mut inner, now);
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now())
    }

    pub fn record_success_at(&self, now: Instant) {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        self.on_success(&mut inner);
    }

    /// Admit a call, or refuse it while open or when half-open probes are exhausted.
    pub fn try_acquire(&self) -> Result<Ticket, Rejection> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<Ticket, Rejection> {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(Ticket {
                state: CircuitState::Closed,
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => Err(Rejection {
                state: CircuitState::Open,
            }),
            CircuitState::HalfOpen => {
                if inner.probes_in_flight >= self.settings.half_open_max_probes {
                    return Err(Rejection {
                        state: CircuitState::HalfOpen,
                    });
                }
                inner.probes_in_flight += 1;
                Ok(Ticket {
                    state: CircuitState::HalfOpen,
                    generation: inner.generation,
                    probe: true,
                })
            }
        }
    }

    /// Report how an admitted call ended.
    pub fn complete(&self, ticket: Ticket, outcome: CallOutcome) {
        self.complete_at(ticket, outcome, Instant::now())
    }

    pub fn complete_at(&self, ticket: Ticket, outcome: CallOutcome, now: Instant) {
        let mut inner = self.lock();

        let current_probe = ticket.probe
            && ticket.generation == inner.generation
            && inner.state == CircuitState::HalfOpen;
        if current_probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match outcome {
            CallOutcome::Failure => self.on_failure(&mut inner, now),
            // Only a probe of the current half-open period may close the breaker.
            CallOutcome::Success if current_probe => self.on_success(&mut inner),
            CallOutcome::Success if inner.state == CircuitState::Closed => {
                self.on_success(&mut inner)
            }
            CallOutcome::Success | CallOutcome::Abandoned => {}
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }

    /// Force Closed with a zero failure count.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.probes_in_flight = 0;
        inner.failure_count = 0;
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Every critical section leaves the record consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = match inner.last_failure {
            Some(at) => now.saturating_duration_since(at) > self.settings.recovery_timeout,
            None => true,
        };
        if due {
            inner.generation += 1;
            inner.probes_in_flight = 0;
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner, now: Instant) {
        inner.last_failure = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.settings.failure_threshold {
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count = self.settings.failure_threshold;
                inner.probes_in_flight = 0;
                self.transition(inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
        }
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.probes_in_flight = 0;
                self.transition(inner, CircuitState::Closed);
            }
            CircuitState::Closed if self.settings.reset_on_success => {
                inner.failure_count = 0;
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = %from,
                failures = inner.failure_count,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                service = %self.service,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::set_circuit_state(self.service.as_str(), to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            ServiceName::new("restaurant-service"),
            BreakerSettings {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                half_open_max_probes: 1,
                reset_on_success: false,
            },
        )
    }

    fn secs(t0: Instant, s: f64) -> Instant {
        t0 + Duration::from_secs_f64(s)
    }

    #[test]
    fn test_trips_at_threshold() {
        let cb = breaker(5, 60);
        let t0 = Instant::now();

        for i in 0..4 {
            cb.record_failure_at(secs(t0, i as f64));
            assert_eq!(cb.check_state_at(secs(t0, i as f64)), CircuitState::Closed);
        }
        cb.record_failure_at(secs(t0, 4.0));
        assert_eq!(cb.check_state_at(secs(t0, 4.0)), CircuitState::Open);
        assert_eq!(cb.failure_count(), 5);
    }

    #[test]
    fn test_recovery_requires_strictly_more_than_timeout() {
        let cb = breaker(5, 60);
        let t0 = Instant::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }

        assert_eq!(cb.check_state_at(secs(t0, 30.0)), CircuitState::Open);
        assert_eq!(cb.check_state_at(secs(t0, 60.0)), CircuitState::Open);
        assert_eq!(cb.check_state_at(secs(t0, 60.001)), CircuitState::HalfOpen);

        cb.record_success_at(secs(t0, 61.0));
        let snap = cb.snapshot_at(secs(t0, 61.0));
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_rearms() {
        let cb = breaker(3, 10);
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_failure_at(t0);
        }
        assert_eq!(cb.check_state_at(secs(t0, 11.0)), CircuitState::HalfOpen);

        cb.record_failure_at(secs(t0, 12.0));
        assert_eq!(cb.failure_count(), 3);
        // The open period restarts from the probe failure.
        assert_eq!(cb.check_state_at(secs(t0, 21.0)), CircuitState::Open);
        assert_eq!(cb.check_state_at(secs(t0, 22.5)), CircuitState::HalfOpen);
    }

    #[test]
    fn test_success_while_closed_keeps_count_by_default() {
        let cb = breaker(5, 60);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);
        cb.record_success_at(t0);
        assert_eq!(cb.failure_count(), 2);

        let resetting = CircuitBreaker::new(
            ServiceName::new("auth-service"),
            BreakerSettings {
                reset_on_success: true,
                ..BreakerSettings::default()
            },
        );
        resetting.record_failure_at(t0);
        resetting.record_success_at(t0);
        assert_eq!(resetting.failure_count(), 0);
    }

    #[test]
    fn test_success_while_open_is_ignored() {
        let cb = breaker(2, 60);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);

        cb.record_success_at(secs(t0, 1.0));
        assert_eq!(cb.check_state_at(secs(t0, 1.0)), CircuitState::Open);
        assert_eq!(cb.failure_count(), 2);
    }

    #[test]
    fn test_failure_while_open_extends_open_period() {
        let cb = breaker(2, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);

        cb.record_failure_at(secs(t0, 8.0));
        assert_eq!(cb.failure_count(), 3);
        assert_eq!(cb.check_state_at(secs(t0, 15.0)), CircuitState::Open);
        assert_eq!(cb.check_state_at(secs(t0, 18.5)), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let cb = breaker(1, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        assert_eq!(
            cb.try_acquire_at(secs(t0, 5.0)),
            Err(Rejection {
                state: CircuitState::Open
            })
        );

        let probe = cb.try_acquire_at(secs(t0, 11.0)).unwrap();
        assert!(probe.is_probe());
        assert_eq!(probe.state, CircuitState::HalfOpen);
        assert_eq!(
            cb.try_acquire_at(secs(t0, 11.0)),
            Err(Rejection {
                state: CircuitState::HalfOpen
            })
        );

        // An abandoned probe frees its slot without moving the state.
        cb.complete_at(probe, CallOutcome::Abandoned, secs(t0, 12.0));
        assert_eq!(cb.check_state_at(secs(t0, 12.0)), CircuitState::HalfOpen);

        let probe = cb.try_acquire_at(secs(t0, 12.0)).unwrap();
        cb.complete_at(probe, CallOutcome::Success, secs(t0, 13.0));
        assert_eq!(cb.check_state_at(secs(t0, 13.0)), CircuitState::Closed);
        assert!(!cb.try_acquire_at(secs(t0, 13.0)).unwrap().is_probe());
    }

    #[test]
    fn test_stale_probe_cannot_close_next_generation() {
        let cb = breaker(1, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        let stale = cb.try_acquire_at(secs(t0, 11.0)).unwrap();
        // Another probe fails meanwhile and a new half-open period begins.
        cb.record_failure_at(secs(t0, 11.5));
        let fresh = cb.try_acquire_at(secs(t0, 22.0)).unwrap();

        cb.complete_at(stale, CallOutcome::Success, secs(t0, 22.5));
        assert_eq!(cb.check_state_at(secs(t0, 22.5)), CircuitState::HalfOpen);
        assert!(cb.try_acquire_at(secs(t0, 22.5)).is_err());

        cb.complete_at(fresh, CallOutcome::Success, secs(t0, 23.0));
        assert_eq!(cb.check_state_at(secs(t0, 23.0)), CircuitState::Closed);
    }

    #[test]
    fn test_closed_ticket_success_does_not_close_half_open() {
        let cb = breaker(1, 10);
        let t0 = Instant::now();
        let early = cb.try_acquire_at(t0).unwrap();

        cb.record_failure_at(t0);
        assert_eq!(cb.check_state_at(secs(t0, 11.0)), CircuitState::HalfOpen);

        cb.complete_at(early, CallOutcome::Success, secs(t0, 11.0));
        assert_eq!(cb.check_state_at(secs(t0, 11.0)), CircuitState::HalfOpen);
    }

    #[test]
    fn test_force_close() {
        let cb = breaker(1, 60);
        cb.record_failure();
        assert_eq!(cb.check_state(), CircuitState::Open);

        cb.force_close();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let cb = Arc::new(breaker(1_000, 60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cb.failure_count(), 800);
        assert_eq!(cb.check_state(), CircuitState::Closed);
    }

    #[test]
    fn test_state_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }
}
