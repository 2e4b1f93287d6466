//! Per-target circuit breakers.
//!
//! One [`CircuitBreaker`] per target service name, created lazily on the
//! first call and kept for the life of the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use platform_common::{
    Admission, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError,
    CircuitState,
};
use serde::Serialize;
use tracing::debug;

/// Serializable view of one breaker for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    /// `closed`, `open` or `half_open`
    pub state: &'static str,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When the circuit last opened
    pub opened_at: Option<DateTime<Utc>>,
}

impl From<BreakerSnapshot> for BreakerStatus {
    fn from(snapshot: BreakerSnapshot) -> Self {
        Self {
            state: snapshot.state.as_str(),
            consecutive_failures: snapshot.consecutive_failures,
            last_failure_time: snapshot.last_failure_time,
            opened_at: snapshot.opened_at,
        }
    }
}

/// Breakers keyed by target service name.
#[derive(Debug)]
pub struct CircuitBreakerSet {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerSet {
    /// Empty set; every breaker it creates uses `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Settings shared by every breaker.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `target`, created on first use.
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(target) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(target.to_string()).or_insert_with(|| {
            debug!(target_service = %target, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(target, self.config.clone()))
        }))
    }

    /// Decide whether a call to `target` may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] without any I/O while the target's
    /// circuit is open or a half-open trial is in flight.
    pub fn before_call(&self, target: &str) -> Result<Admission, CircuitOpenError> {
        self.breaker(target).before_call()
    }

    /// Record a successful call to `target` made under `admission`.
    pub fn record_success(&self, target: &str, admission: Admission) {
        self.breaker(target).record_success(admission);
    }

    /// Record a failed call to `target` made under `admission`.
    pub fn record_failure(&self, target: &str, admission: Admission, error: &dyn std::error::Error) {
        debug!(target_service = %target, error = %error, "Recording failure");
        self.breaker(target).record_failure(admission);
    }

    /// Return an admission that never reached the network.
    pub fn release(&self, target: &str, admission: Admission) {
        self.breaker(target).release(admission);
    }

    /// State of `target`'s breaker; `Closed` if none exists yet.
    #[must_use]
    pub fn get_state(&self, target: &str) -> CircuitState {
        self.breakers
            .read()
            .get(target)
            .map_or(CircuitState::Closed, |b| b.state())
    }

    /// Force `target`'s breaker closed. Returns false if none exists.
    pub fn reset(&self, target: &str) -> bool {
        self.breakers.read().get(target).is_some_and(|b| {
            b.reset();
            true
        })
    }

    /// Snapshot of every breaker, sorted by target.
    #[must_use]
    pub fn snapshot_all(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .read()
            .iter()
            .map(|(target, breaker)| (target.clone(), breaker.snapshot().into()))
            .collect()
    }
}

impl Default for CircuitBreakerSet {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
