//! Per-service circuit breaker registry.
//!
//! One registry is built at startup and shared by handle with every request.
//! Breakers are created on first reference and live for the process lifetime.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{
    BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState,
};
use crate::routing::ServiceName;

#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<ServiceName, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(BreakerSettings::from(config))
    }

    /// Breaker for `service`, created on first use.
    pub fn breaker(&self, service: &ServiceName) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service.as_str()) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(service.clone()).or_insert_with(|| {
            tracing::debug!(service = %service, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(service.clone(), self.settings.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Breaker for `service` if it has been seen.
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| Arc::clone(b.value()))
    }

    pub fn check_state(&self, service: &ServiceName) -> CircuitState {
        self.breaker(service).check_state()
    }

    pub fn check_state_at(&self, service: &ServiceName, now: Instant) -> CircuitState {
        self.breaker(service).check_state_at(now)
    }

    pub fn record_failure(&self, service: &ServiceName) {
        self.breaker(service).record_failure()
    }

    pub fn record_failure_at(&self, service: &ServiceName, now: Instant) {
        self.breaker(service).record_failure_at(now)
    }

    pub fn record_success(&self, service: &ServiceName) {
        self.breaker(service).record_success()
    }

    pub fn record_success_at(&self, service: &ServiceName, now: Instant) {
        self.breaker(service).record_success_at(now)
    }

    /// Snapshots of every known breaker, sorted by service.
    pub fn snapshot_at(&self, now: Instant) -> Vec<BreakerSnapshot> {
        // Collect handles first so no shard lock is held while a breaker is locked.
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();

        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot_at(now)).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    /// Force a known breaker closed. Returns false for a service never seen.
    pub fn reset(&self, service: &str) -> bool {
        match self.get(service) {
            Some(breaker) => {
                breaker.force_close();
                tracing::info!(service = %service, "Circuit breaker reset");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
