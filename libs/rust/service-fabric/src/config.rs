//! Type-Safe Configuration with Validation
//!
//! Loads fabric settings from environment variables, applies the platform
//! defaults and validates them before any component is built.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use platform_common::{CircuitBreakerConfig, RetryConfig, TracingConfig};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::auth::AuthConfig;

/// Minimum length of the HMAC signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted token lifetime, in seconds.
pub const MAX_TOKEN_TTL_SECS: u64 = 86_400;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid port number
    #[error("Invalid port for {field}: must be between 1 and 65535")]
    InvalidPort {
        /// Offending variable
        field: String,
    },

    /// Invalid threshold value
    #[error("Invalid threshold for {field}: must be greater than 0")]
    InvalidThreshold {
        /// Offending variable
        field: String,
    },

    /// Value above its allowed maximum
    #[error("Invalid value for {field}: must be at most {max}")]
    OutOfRange {
        /// Offending variable
        field: String,
        /// Largest accepted value
        max: u64,
    },

    /// Signing secret too short
    #[error("Signing secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },

    /// Credential file could not be read or parsed
    #[error("Failed to load credentials from {path}: {reason}")]
    Credentials {
        /// File path
        path: String,
        /// Underlying failure
        reason: String,
    },
}

/// Fabric node configuration.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Unique identity of this service instance
    pub service_id: String,
    /// Logical service name
    pub service_name: String,
    /// Host other services reach this instance on
    pub host: String,
    /// Port other services reach this instance on
    pub port: u16,
    /// Deployed version
    pub version: String,
    /// Deployment region
    pub region: String,
    /// Port for the admin surface
    pub admin_port: u16,
    /// HMAC secret used to sign inter-service tokens
    pub signing_secret: SecretString,
    /// `iss` claim stamped on every token
    pub token_issuer: String,
    /// Token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Tolerated clock skew for expiry checks, in seconds
    pub clock_skew_secs: u64,
    /// Per-target breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings for outbound calls
    pub retry: RetryConfig,
    /// Optional JSON file with static credentials
    pub credentials_file: Option<PathBuf>,
    /// Log filter
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
}

impl FabricConfig {
    /// Configuration with defaults for everything but identity and secret.
    #[must_use]
    pub fn new(
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_name: service_name.into(),
            host: "localhost".to_string(),
            port: 3000,
            version: "1.0.0".to_string(),
            region: "local".to_string(),
            admin_port: 9090,
            signing_secret: SecretString::from(signing_secret.into()),
            token_issuer: "talentsphere-fabric".to_string(),
            token_ttl_secs: 300,
            clock_skew_secs: 5,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            credentials_file: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }

    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is missing, unparsable or
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let service_name = require_env("SERVICE_NAME")?;
        let service_id =
            env::var("SERVICE_ID").unwrap_or_else(|_| format!("{service_name}-{}", std::process::id()));
        let secret = require_env("FABRIC_SIGNING_SECRET")?;

        let mut config = Self::new(service_id, service_name, secret);
        config.host = env::var("SERVICE_HOST").unwrap_or(config.host);
        config.port = parse_env("SERVICE_PORT", config.port)?;
        config.version = env::var("SERVICE_VERSION").unwrap_or(config.version);
        config.region = env::var("SERVICE_REGION").unwrap_or(config.region);
        config.admin_port = parse_env("ADMIN_PORT", config.admin_port)?;
        config.token_issuer = env::var("FABRIC_TOKEN_ISSUER").unwrap_or(config.token_issuer);
        config.token_ttl_secs = parse_env("TOKEN_TTL_SECS", config.token_ttl_secs)?;
        config.clock_skew_secs = parse_env("TOKEN_CLOCK_SKEW_SECS", config.clock_skew_secs)?;
        config.circuit_breaker = CircuitBreakerConfig::default()
            .with_request_timeout(Duration::from_millis(parse_env("CB_TIMEOUT_MS", 5000)?))
            .with_max_failures(parse_env("CB_MAX_FAILURES", 3)?)
            .with_reset_timeout(Duration::from_millis(parse_env("CB_RESET_TIMEOUT_MS", 30_000)?));
        config.retry = RetryConfig::default()
            .with_max_retries(parse_env("RETRY_MAX_ATTEMPTS", 2)?)
            .with_initial_delay(Duration::from_millis(parse_env("RETRY_INITIAL_DELAY_MS", 100)?));
        config.credentials_file = env::var("FABRIC_CREDENTIALS_FILE").ok().map(PathBuf::from);
        config.log_level = env::var("LOG_LEVEL").unwrap_or(config.log_level);
        config.log_json = parse_env("LOG_JSON", false)?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::MissingRequired("SERVICE_NAME".to_string()));
        }
        if self.service_id.is_empty() {
            return Err(ConfigError::MissingRequired("SERVICE_ID".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "SERVICE_PORT".to_string(),
            });
        }
        if self.admin_port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "ADMIN_PORT".to_string(),
            });
        }
        if self.signing_secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "TOKEN_TTL_SECS".to_string(),
            });
        }
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::OutOfRange {
                field: "TOKEN_TTL_SECS".to_string(),
                max: MAX_TOKEN_TTL_SECS,
            });
        }
        if self.circuit_breaker.max_failures == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "CB_MAX_FAILURES".to_string(),
            });
        }
        if self.circuit_breaker.request_timeout.is_zero() {
            return Err(ConfigError::InvalidThreshold {
                field: "CB_TIMEOUT_MS".to_string(),
            });
        }
        if self.circuit_breaker.reset_timeout.is_zero() {
            return Err(ConfigError::InvalidThreshold {
                field: "CB_RESET_TIMEOUT_MS".to_string(),
            });
        }
        Ok(())
    }

    /// Token settings derived from this config.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.signing_secret.clone())
            .with_issuer(&self.token_issuer)
            .with_ttl(Duration::from_secs(self.token_ttl_secs))
            .with_clock_skew(Duration::from_secs(self.clock_skew_secs))
    }

    /// Subscriber settings derived from this config.
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        let config = TracingConfig::default()
            .with_service_name(&self.service_name)
            .with_log_level(&self.log_level);
        if self.log_json { config.with_json_output() } else { config }
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingRequired(name.to_string()))
}

/// Parse an environment variable with a default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn test_config_base() -> FabricConfig {
        FabricConfig::new("user-service-1", "user-service", SECRET)
    }

    #[test]
    fn test_defaults_are_consistent() {
        let config = test_config_base();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_ttl_secs, 300);
        assert_eq!(config.clock_skew_secs, 5);
        assert_eq!(config.circuit_breaker.max_failures, 3);
        assert_eq!(config.circuit_breaker.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = test_config_base();
        config.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort { .. })));
    }

    #[test]
    fn test_config_validation_weak_secret() {
        let config = FabricConfig::new("a-1", "a", "short");
        assert!(matches!(config.validate(), Err(ConfigError::WeakSecret)));
    }

    #[test]
    fn test_config_validation_zero_threshold() {
        let mut config = test_config_base();
        config.circuit_breaker = config.circuit_breaker.with_max_failures(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_config_validation_zero_ttl() {
        let mut config = test_config_base();
        config.token_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_ttl_ceiling() {
        let mut config = test_config_base();
        config.token_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.validate().is_ok());

        config.token_ttl_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { max: MAX_TOKEN_TTL_SECS, .. })
        ));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = test_config_base();
        assert!(!format!("{config:?}").contains(SECRET));
    }

    #[test]
    fn test_parse_env_reports_variable() {
        let result: Result<u16, _> = parse_env("FABRIC_TEST_UNSET_PORT_VAR", 42);
        assert_eq!(result.ok(), Some(42));
    }

    #[test]
    fn test_auth_config_derivation() {
        let config = test_config_base();
        let auth = config.auth_config();
        assert_eq!(auth.ttl, Duration::from_secs(300));
        assert_eq!(auth.issuer, "talentsphere-fabric");
    }
}
