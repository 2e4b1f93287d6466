//! Property-based tests for platform-common crate.
//!
//! These tests verify universal properties across all inputs using proptest.

use std::time::Duration;

use platform_common::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy,
};
use proptest::prelude::*;

// Property: Circuit Breaker Threshold
// *For any* threshold N, N-1 consecutive failures keep the circuit closed
// and the Nth opens it; an open circuit rejects before its reset timeout.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_circuit_opens_exactly_at_threshold(max_failures in 1u32..20) {
        let config = CircuitBreakerConfig::default()
            .with_max_failures(max_failures)
            .with_reset_timeout(Duration::from_secs(60));
        let cb = CircuitBreaker::new("target", config);

        for _ in 0..max_failures - 1 {
            cb.record_failure(Admission::Normal);
        }
        prop_assert_eq!(cb.state(), CircuitState::Closed);
        prop_assert_eq!(cb.before_call(), Ok(Admission::Normal));

        cb.record_failure(Admission::Normal);
        prop_assert_eq!(cb.state(), CircuitState::Open);
        prop_assert!(cb.before_call().is_err());
    }

    #[test]
    fn prop_success_interrupts_failure_streak(
        max_failures in 2u32..10,
        before in 1u32..10,
    ) {
        let before = before.min(max_failures - 1);
        let cb = CircuitBreaker::new(
            "target",
            CircuitBreakerConfig::default().with_max_failures(max_failures),
        );

        for _ in 0..before {
            cb.record_failure(Admission::Normal);
        }
        cb.record_success(Admission::Normal);
        for _ in 0..max_failures - 1 {
            cb.record_failure(Admission::Normal);
        }

        prop_assert_eq!(cb.state(), CircuitState::Closed);
        prop_assert_eq!(cb.failure_count(), max_failures - 1);
    }
}

// Property: Backoff Bounds
// *For any* attempt number, the delay without jitter never exceeds the
// configured maximum and never decreases between attempts.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_backoff_is_monotonic_and_capped(
        initial_ms in 1u64..500,
        max_ms in 500u64..5000,
        attempt in 0u32..16,
    ) {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms))
                .without_jitter(),
        );

        let current = policy.delay_for_attempt(attempt);
        let next = policy.delay_for_attempt(attempt + 1);

        prop_assert!(current <= Duration::from_millis(max_ms));
        prop_assert!(next >= current);
    }

    #[test]
    fn prop_jitter_stays_within_quarter(attempt in 0u32..6) {
        let policy = RetryPolicy::new(
            RetryConfig::default().with_max_delay(Duration::from_secs(60)),
        );
        let plain = RetryPolicy::new(
            RetryConfig::default()
                .with_max_delay(Duration::from_secs(60))
                .without_jitter(),
        );

        let base = plain.delay_for_attempt(attempt);
        let jittered = policy.delay_for_attempt(attempt);

        prop_assert!(jittered >= base);
        prop_assert!(jittered.as_millis() <= base.as_millis() * 5 / 4 + 1);
    }
}
