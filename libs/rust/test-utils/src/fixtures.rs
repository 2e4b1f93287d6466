//! Test fixtures with sample data.

use std::time::Duration;

use platform_common::CircuitBreakerConfig;
use secrecy::SecretString;
use service_fabric::{AuthConfig, FabricConfig, ServiceCredential, ServiceDescriptor};

/// Signing secret shared by every fixture.
pub const TEST_SIGNING_SECRET: &str = "test-signing-secret-0123456789abcdef";

/// `job-service` at `http://localhost:3003`.
#[must_use]
pub fn job_service_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("job-service", "localhost", 3003).with_version("1.0.0")
}

/// `user-service-1` with `users.read` and `users.write`.
#[must_use]
pub fn user_service_credential() -> ServiceCredential {
    ServiceCredential::new("user-service-1", "user-service", "user-service-secret")
        .with_permissions(["users.read", "users.write"])
        .with_roles(["service"])
}

/// Auth settings with the default TTL and skew.
#[must_use]
pub fn test_auth_config() -> AuthConfig {
    AuthConfig::new(SecretString::from(TEST_SIGNING_SECRET))
}

/// Node config for `service_name`, with breakers that recover in 50ms and
/// no retries.
#[must_use]
pub fn test_fabric_config(service_name: &str) -> FabricConfig {
    let mut config = FabricConfig::new(format!("{service_name}-1"), service_name, TEST_SIGNING_SECRET);
    config.circuit_breaker = CircuitBreakerConfig::default()
        .with_request_timeout(Duration::from_millis(500))
        .with_reset_timeout(Duration::from_millis(50));
    config.retry = platform_common::RetryConfig::no_retries();
    config
}

/// Breaker config with a short reset timeout.
#[must_use]
pub fn quick_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig::default()
        .with_max_failures(3)
        .with_reset_timeout(Duration::from_millis(20))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_valid() {
        assert!(test_fabric_config("user-service").validate().is_ok());
        assert_eq!(job_service_descriptor().url, "http://localhost:3003");
        assert!(user_service_credential().has_permission("users.write"));
        assert_eq!(test_auth_config().ttl, Duration::from_secs(300));
    }
}
