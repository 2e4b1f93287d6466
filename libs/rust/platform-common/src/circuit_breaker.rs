//! Circuit breaker implementation for resilience.
//!
//! This module provides a circuit breaker for a single downstream target.
//! It protects callers from cascading failures when that target keeps
//! failing, and lets exactly one trial call through once the target has had
//! time to recover.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, a single trial request is in flight
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name used in logs and health payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Timeout applied to every call made through the breaker
    pub request_timeout: Duration,
    /// Number of consecutive failures before opening the circuit
    pub max_failures: u32,
    /// Time to wait in the open state before admitting a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(5000),
            max_failures: 3,
            reset_timeout: Duration::from_millis(30_000),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with custom request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create a new config with custom failure threshold.
    #[must_use]
    pub const fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Create a new config with custom reset timeout.
    #[must_use]
    pub const fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }
}

/// Permission granted by [`CircuitBreaker::before_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Regular call through a closed circuit
    Normal,
    /// The single trial call that decides whether a half-open circuit closes
    Trial,
}

impl Admission {
    /// Whether this admission is the half-open trial.
    #[must_use]
    pub const fn is_trial(self) -> bool {
        matches!(self, Self::Trial)
    }
}

/// Rejection returned while the circuit is open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit breaker open for {name}, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the protected target
    pub name: String,
    /// Time remaining until a trial call may be admitted
    pub retry_after: Duration,
}

/// Point-in-time view of a breaker, for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time the circuit last opened
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl Stamp {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Stamp>,
    opened: Option<Stamp>,
    trial_started: Option<Instant>,
}

impl BreakerState {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened: None,
            trial_started: None,
        }
    }
}

/// Circuit breaker protecting one downstream target.
///
/// Implements the circuit breaker pattern with three states:
/// - Closed: Normal operation, requests are allowed
/// - Open: Failure threshold reached, requests are rejected without I/O
/// - Half-Open: One trial request is in flight; everything else is rejected
///
/// All transitions happen under a single mutex so they are totally ordered.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    /// Create a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Name of the protected target.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the circuit is open, or while a
    /// half-open trial is already in flight.
    pub fn before_call(&self) -> Result<Admission, CircuitOpenError> {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = s
                    .opened
                    .map_or(self.config.reset_timeout, |o| o.instant.elapsed());
                if elapsed >= self.config.reset_timeout {
                    s.state = CircuitState::HalfOpen;
                    s.trial_started = Some(Instant::now());
                    info!(circuit = %self.name, "Circuit transitioning to half-open");
                    Ok(Admission::Trial)
                } else {
                    Err(self.rejection(self.config.reset_timeout - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                let elapsed = s
                    .trial_started
                    .map_or(self.config.reset_timeout, |t| t.elapsed());
                if elapsed >= self.config.reset_timeout {
                    // The previous trial never reported back.
                    s.trial_started = Some(Instant::now());
                    warn!(circuit = %self.name, "Reclaiming abandoned half-open trial");
                    Ok(Admission::Trial)
                } else {
                    Err(self.rejection(self.config.reset_timeout - elapsed))
                }
            }
        }
    }

    /// Record a successful call made under `admission`.
    ///
    /// A successful trial closes a half-open circuit. Any success clears the
    /// failure count of a closed one. While half-open, outcomes of calls
    /// admitted before the circuit opened are ignored.
    pub fn record_success(&self, admission: Admission) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::HalfOpen if admission.is_trial() => {
                s.state = CircuitState::Closed;
                s.consecutive_failures = 0;
                s.opened = None;
                s.trial_started = None;
                info!(circuit = %self.name, "Circuit closed after recovery");
            }
            CircuitState::HalfOpen => {
                debug!(circuit = %self.name, "Ignoring stale success while half-open");
            }
            CircuitState::Closed => {
                s.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call made under `admission`.
    ///
    /// Reaching `max_failures` consecutive failures opens a closed circuit;
    /// a failed trial re-opens a half-open one. While half-open, outcomes of
    /// calls admitted before the circuit opened are ignored.
    pub fn record_failure(&self, admission: Admission) {
        let now = Stamp::now();
        let mut s = self.state.lock();
        if s.state == CircuitState::HalfOpen && !admission.is_trial() {
            debug!(circuit = %self.name, "Ignoring stale failure while half-open");
            return;
        }
        s.last_failure = Some(now);
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        match s.state {
            CircuitState::Closed => {
                if s.consecutive_failures >= self.config.max_failures {
                    s.state = CircuitState::Open;
                    s.opened = Some(now);
                    warn!(
                        circuit = %self.name,
                        failures = s.consecutive_failures,
                        "Circuit opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                s.state = CircuitState::Open;
                s.opened = Some(now);
                s.trial_started = None;
                warn!(circuit = %self.name, "Circuit re-opened from half-open");
            }
            CircuitState::Open => {}
        }
    }

    /// Give back an admission that never reached the network.
    ///
    /// Returning a trial puts the circuit back into the open state without
    /// moving `opened_at`, so the next caller is admitted as the new trial.
    pub fn release(&self, admission: Admission) {
        if !admission.is_trial() {
            return;
        }
        let mut s = self.state.lock();
        if s.state == CircuitState::HalfOpen {
            s.state = CircuitState::Open;
            s.trial_started = None;
        }
    }

    /// Get the current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Snapshot of the breaker for observability.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let s = self.state.lock();
        BreakerSnapshot {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            last_failure_time: s.last_failure.map(|f| f.wall),
            opened_at: s.opened.map(|o| o.wall),
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::new();
        info!(circuit = %self.name, "Circuit manually reset");
    }

    fn rejection(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_max_failures(3)
            .with_reset_timeout(Duration::from_millis(10))
    }

    fn open(cb: &CircuitBreaker) {
        for _ in 0..cb.config().max_failures {
            cb.record_failure(Admission::Normal);
        }
    }

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::with_defaults("job-service");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.before_call(), Ok(Admission::Normal));
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.reset_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn test_opens_after_failures() {
        let cb = CircuitBreaker::new("job-service", quick_config());

        cb.record_failure(Admission::Normal);
        cb.record_failure(Admission::Normal);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Admission::Normal);

        assert_eq!(cb.state(), CircuitState::Open);
        let err = cb.before_call().unwrap_err();
        assert_eq!(err.name, "job-service");
        assert!(err.retry_after <= Duration::from_millis(10));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new("job-service", quick_config());

        cb.record_failure(Admission::Normal);
        cb.record_failure(Admission::Normal);
        cb.record_success(Admission::Normal);

        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);

        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cb.before_call(), Ok(Admission::Trial));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn test_trial_success_closes() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);
        std::thread::sleep(Duration::from_millis(15));

        let trial = cb.before_call().unwrap();
        cb.record_success(trial);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.snapshot().opened_at.is_none());
    }

    #[test]
    fn test_trial_failure_reopens() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);
        std::thread::sleep(Duration::from_millis(15));
        let first_open = cb.snapshot().opened_at;

        let trial = cb.before_call().unwrap();
        cb.record_failure(trial);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at > first_open);
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn test_straggler_outcomes_do_not_decide_half_open() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        let straggler = cb.before_call().unwrap();
        open(&cb);
        std::thread::sleep(Duration::from_millis(15));

        let trial = cb.before_call().unwrap();
        assert_eq!(trial, Admission::Trial);

        cb.record_success(straggler);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure(straggler);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.before_call().is_err());

        cb.record_success(trial);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_release_returns_trial_slot() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);
        std::thread::sleep(Duration::from_millis(15));

        let admission = cb.before_call().unwrap();
        cb.release(admission);

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.before_call(), Ok(Admission::Trial));
    }

    #[test]
    fn test_abandoned_trial_is_reclaimed() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cb.before_call(), Ok(Admission::Trial));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cb.before_call(), Ok(Admission::Trial));
    }

    #[test]
    fn test_snapshot_tracks_failures() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        cb.record_failure(Admission::Normal);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot.last_failure_time.is_some());
        assert!(snapshot.opened_at.is_none());
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::new("job-service", quick_config());
        open(&cb);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }
}
