//! Signed service tokens and their claims.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

use super::validation::TokenRejection;

/// Only algorithm the fabric signs or accepts.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT claims carried by a service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    /// Issuer
    pub iss: String,
    /// Calling service instance id
    pub sub: String,
    /// Target service name, when the token is scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Unique token id
    pub jti: String,
    /// Calling service name
    pub service_name: String,
    /// Granted permissions
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Granted roles
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

/// A token issued to a calling service.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Encoded JWT
    pub token_string: String,
    /// Always `"jwt"`
    #[serde(rename = "type")]
    pub token_type: &'static str,
    /// Calling service instance id
    pub service_id: String,
    /// Calling service name
    pub service_name: String,
    /// Target the token is scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry, always `issued_at` plus the configured TTL
    pub expires_at: DateTime<Utc>,
    /// Granted permissions
    pub permissions: BTreeSet<String>,
    /// Granted roles
    pub roles: BTreeSet<String>,
}

impl Token {
    /// The encoded token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token_string
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token_string)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_string", &"[REDACTED]")
            .field("service_id", &self.service_id)
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

/// Read the claims without checking the signature.
///
/// Used only to order the checks: expiry is reported before a signature
/// mismatch. Nothing read here is trusted until [`verify`] succeeds.
pub(crate) fn peek(raw: &str) -> Result<ServiceClaims, TokenRejection> {
    let header = decode_header(raw).map_err(|e| TokenRejection::Malformed {
        reason: format!("invalid header: {e}"),
    })?;
    if header.alg != TOKEN_ALGORITHM {
        return Err(TokenRejection::Malformed {
            reason: format!("unsupported algorithm {:?}", header.alg),
        });
    }

    let mut validation = base_validation();
    validation.insecure_disable_signature_validation();
    decode::<ServiceClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| TokenRejection::Malformed {
            reason: format!("invalid claims: {e}"),
        })
}

/// Verify the HMAC signature and return the claims it covers.
pub(crate) fn verify(raw: &str, key: &DecodingKey) -> Result<ServiceClaims, TokenRejection> {
    decode::<ServiceClaims>(raw, key, &base_validation())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenRejection::SignatureMismatch,
            _ => TokenRejection::Malformed {
                reason: e.to_string(),
            },
        })
}

// Time-based and audience checks run in the caller so they can be ordered
// and given their own rejection kinds.
fn base_validation() -> Validation {
    let mut validation = Validation::new(TOKEN_ALGORITHM);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}
