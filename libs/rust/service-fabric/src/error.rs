//! Error handling for the communication fabric.
//!
//! Expected failure kinds are explicit variants that callers must match on.
//! Only programming faults end up in [`FabricError::Internal`], and its
//! details are never rendered to remote callers.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use platform_common::{CircuitOpenError, Retryable};
use serde::Serialize;
use thiserror::Error;

use crate::auth::TokenRejection;
use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type FabricResult<T> = Result<T, FabricError>;

/// Non-exhaustive error enum for forward compatibility
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FabricError {
    /// The registry has no instance for the requested name
    #[error("Service not found: {service}")]
    ServiceNotFound {
        /// Requested logical service name
        service: String,
    },

    /// Instances exist but every one is marked unhealthy
    #[error("No healthy instance for service: {service}")]
    NoHealthyInstance {
        /// Requested logical service name
        service: String,
    },

    /// An auth operation referenced a service id with no credential
    #[error("Unknown service: {service_id}")]
    UnknownService {
        /// The unregistered service instance id
        service_id: String,
    },

    /// Token is past its expiry
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// Token failed signature, shape, issuer or audience checks
    #[error("Token invalid: {reason}")]
    TokenInvalid {
        /// Description of the failed check
        reason: String,
    },

    /// Caller lacks the permission an operation requires
    #[error("Permission denied: {service_id} lacks {permission}")]
    PermissionDenied {
        /// Calling service instance id
        service_id: String,
        /// The missing permission
        permission: String,
    },

    /// Circuit breaker is open for the target
    #[error("Circuit breaker open for service: {service}")]
    CircuitOpen {
        /// Target service name
        service: String,
        /// When a trial call may be admitted
        retry_after: Duration,
    },

    /// The outbound call exceeded its timeout
    #[error("Request to {service} timed out after {duration:?}")]
    Timeout {
        /// Target service name
        service: String,
        /// Timeout that elapsed
        duration: Duration,
    },

    /// Transport failure or non-2xx response
    #[error("Network error calling {service}: {message}")]
    Network {
        /// Target service name
        service: String,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Description of the failure
        message: String,
    },

    /// A descriptor could not be built from the given data
    #[error("Invalid service descriptor: {reason}")]
    InvalidDescriptor {
        /// Why the descriptor was rejected
        reason: String,
    },

    /// Configuration could not be loaded or validated
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected fault (details never rendered to callers)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable error codes for admin responses and span tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No instance registered
    ServiceNotFound,
    /// Every instance unhealthy
    NoHealthyInstance,
    /// No credential for the caller
    UnknownService,
    /// Token past expiry
    TokenExpired,
    /// Token failed verification
    TokenInvalid,
    /// Missing permission
    PermissionDenied,
    /// Breaker open
    CircuitOpen,
    /// Call timed out
    Timeout,
    /// Transport failure or non-2xx
    Network,
    /// Bad descriptor
    InvalidDescriptor,
    /// Bad configuration
    Config,
    /// JSON failure
    Serialization,
    /// Unexpected fault
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::NoHealthyInstance => "NO_HEALTHY_INSTANCE",
            Self::UnknownService => "UNKNOWN_SERVICE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Timeout => "NETWORK_TIMEOUT",
            Self::Network => "NETWORK_ERROR",
            Self::InvalidDescriptor => "INVALID_DESCRIPTOR",
            Self::Config => "CONFIG_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error crosses the admin surface
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::ServiceNotFound => StatusCode::NOT_FOUND,
            Self::NoHealthyInstance | Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnknownService | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Network => StatusCode::BAD_GATEWAY,
            Self::InvalidDescriptor | Self::Serialization => StatusCode::BAD_REQUEST,
            Self::Config | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl FabricError {
    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            Self::NoHealthyInstance { .. } => ErrorCode::NoHealthyInstance,
            Self::UnknownService { .. } => ErrorCode::UnknownService,
            Self::TokenExpired { .. } => ErrorCode::TokenExpired,
            Self::TokenInvalid { .. } => ErrorCode::TokenInvalid,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Network { .. } => ErrorCode::Network,
            Self::InvalidDescriptor { .. } => ErrorCode::InvalidDescriptor,
            Self::Config(_) => ErrorCode::Config,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this failure counts against the target's circuit breaker.
    #[must_use]
    pub const fn is_target_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }

    /// Get retry-after duration if applicable
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Message safe to send to a remote caller
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Config(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn network(service: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }
}

impl Retryable for FabricError {
    /// Timeouts, transport failures, 5xx and 429 are transient; trust and
    /// configuration failures never are.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }
}

impl From<CircuitOpenError> for FabricError {
    fn from(err: CircuitOpenError) -> Self {
        Self::CircuitOpen {
            service: err.name,
            retry_after: err.retry_after,
        }
    }
}

impl From<TokenRejection> for FabricError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired { expired_at } => Self::TokenExpired { expired_at },
            other => Self::TokenInvalid {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u128>,
}

impl IntoResponse for FabricError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = ErrorBody {
            error: self.public_message(),
            code: code.as_str(),
            retry_after_ms: self.retry_after().map(|d| d.as_millis()),
        };
        (code.http_status(), Json(body)).into_response()
    }
}
