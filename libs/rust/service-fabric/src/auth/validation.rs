//! Structured token validation results.
//!
//! Validation never returns `Err`. Callers branch on [`TokenValidation`]
//! and convert to [`crate::FabricError`] only when they want to propagate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::error::{FabricError, FabricResult};

/// Why a token was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenRejection {
    /// No bearer token was presented
    #[error("missing bearer token")]
    Missing,

    /// Token could not be parsed
    #[error("malformed token: {reason}")]
    Malformed {
        /// Parser message
        reason: String,
    },

    /// Signature does not match the claims
    #[error("token signature mismatch")]
    SignatureMismatch,

    /// Token is past its expiry
    #[error("token expired at {expired_at}")]
    Expired {
        /// Expiry claim
        expired_at: DateTime<Utc>,
    },

    /// Token was issued by someone else
    #[error("unexpected issuer {issuer}")]
    WrongIssuer {
        /// Issuer claim
        issuer: String,
    },

    /// Issue time lies in the future beyond the tolerated skew
    #[error("token issued in the future at {issued_at}")]
    NotYetValid {
        /// Issue time claim
        issued_at: DateTime<Utc>,
    },

    /// Token is scoped to a different target
    #[error("token scoped to {audience}, not {expected}")]
    WrongAudience {
        /// Audience claim
        audience: String,
        /// Target doing the validation
        expected: String,
    },

    /// `X-Service-ID` disagrees with the token subject
    #[error("caller header {header} does not match token subject {subject}")]
    CallerMismatch {
        /// Value of the header
        header: String,
        /// Subject claim
        subject: String,
    },
}

impl TokenRejection {
    /// Error kind name reported to callers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Expired { .. } => "TokenExpiredError",
            _ => "TokenInvalidError",
        }
    }
}

/// Verified identity of a calling service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    /// Calling instance id
    pub service_id: String,
    /// Calling service name
    pub service_name: String,
    /// Granted permissions
    pub permissions: BTreeSet<String>,
    /// Granted roles
    pub roles: BTreeSet<String>,
    /// Target the token was scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
    /// Token id
    pub token_id: String,
}

impl ServiceIdentity {
    /// Whether the token grants `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Whether the token grants `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// # Errors
    ///
    /// Returns [`FabricError::PermissionDenied`] if `permission` was not granted.
    pub fn require_permission(&self, permission: &str) -> FabricResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(FabricError::PermissionDenied {
                service_id: self.service_id.clone(),
                permission: permission.to_string(),
            })
        }
    }
}

/// Outcome of validating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    /// Signature, expiry, issuer and audience all check out
    Valid(ServiceIdentity),
    /// Some check failed
    Invalid(TokenRejection),
}

impl TokenValidation {
    /// Whether validation succeeded.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The verified identity, if any.
    #[must_use]
    pub const fn identity(&self) -> Option<&ServiceIdentity> {
        match self {
            Self::Valid(identity) => Some(identity),
            Self::Invalid(_) => None,
        }
    }

    /// The rejection, if any.
    #[must_use]
    pub const fn rejection(&self) -> Option<&TokenRejection> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(rejection) => Some(rejection),
        }
    }

    /// Convert into a `Result` for `?` propagation.
    ///
    /// # Errors
    ///
    /// Returns the rejection as a [`FabricError`].
    pub fn into_result(self) -> FabricResult<ServiceIdentity> {
        match self {
            Self::Valid(identity) => Ok(identity),
            Self::Invalid(rejection) => Err(rejection.into()),
        }
    }
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    valid: bool,
    #[serde(flatten)]
    identity: Option<&'a ServiceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

// Renders as `{valid: true, serviceId, ...}` or `{valid: false, error, kind}`.
impl Serialize for TokenValidation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = ValidationBody {
            valid: self.is_valid(),
            identity: self.identity(),
            error: self.rejection().map(ToString::to_string),
            kind: self.rejection().map(TokenRejection::kind),
        };
        body.serialize(serializer)
    }
}
