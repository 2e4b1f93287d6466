//! Service-to-service authentication.
//!
//! [`InterServiceAuth`] owns the credential store and is the only issuer and
//! validator of service tokens. Tokens are HS256 JWTs signed with a
//! fabric-wide secret, so any node holding the secret can verify a token
//! without a session store.
//!
//! The credential store is read on every token operation and written only
//! at startup, so it lives behind an [`ArcSwap`]: readers never lock, and a
//! registration publishes a fresh map atomically.

mod credential;
mod token;
mod validation;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, encode};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::error::{FabricError, FabricResult};

pub use credential::ServiceCredential;
pub use token::{ServiceClaims, TOKEN_ALGORITHM, Token};
pub use validation::{ServiceIdentity, TokenRejection, TokenValidation};

use credential::CredentialRecord;

/// Header naming the calling service instance.
pub const SERVICE_ID_HEADER: &str = "x-service-id";
/// Header carrying the caller's send time (RFC 3339).
pub const REQUEST_TIME_HEADER: &str = "x-request-time";

const BEARER_PREFIX: &str = "Bearer ";

/// Token issuance and validation settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC key shared by every node of the fabric
    pub signing_secret: SecretString,
    /// `iss` claim stamped on and required of every token
    pub issuer: String,
    /// Token lifetime
    pub ttl: Duration,
    /// Tolerated clock difference between nodes
    pub clock_skew: Duration,
}

impl AuthConfig {
    /// Config with a five minute TTL and five seconds of skew.
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            signing_secret,
            issuer: "talentsphere-fabric".to_string(),
            ttl: Duration::from_secs(300),
            clock_skew: Duration::from_secs(5),
        }
    }

    /// Set the issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Set the token lifetime.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the tolerated clock skew.
    #[must_use]
    pub const fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }
}

type CredentialMap = HashMap<String, Arc<ServiceCredential>>;

/// Credential store plus token issuer and validator.
pub struct InterServiceAuth {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    credentials: ArcSwap<CredentialMap>,
}

impl fmt::Debug for InterServiceAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterServiceAuth")
            .field("issuer", &self.config.issuer)
            .field("ttl", &self.config.ttl)
            .field("credentials", &self.credentials.load().len())
            .finish_non_exhaustive()
    }
}

impl InterServiceAuth {
    /// Create an empty store using `config`.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let secret = config.signing_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            config,
            credentials: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Store a credential, replacing any previous one with the same id.
    pub fn register_service_credentials(&self, credential: ServiceCredential) {
        let service_id = credential.service_id.clone();
        let permissions = credential.permissions.len();
        let credential = Arc::new(credential);
        self.credentials.rcu(|current| {
            let mut next = CredentialMap::clone(current);
            next.insert(service_id.clone(), Arc::clone(&credential));
            next
        });
        info!(service_id = %service_id, permissions, "Service credentials registered");
    }

    /// Look up a stored credential.
    #[must_use]
    pub fn credential(&self, service_id: &str) -> Option<Arc<ServiceCredential>> {
        self.credentials.load().get(service_id).cloned()
    }

    /// Number of stored credentials.
    #[must_use]
    pub fn credential_count(&self) -> usize {
        self.credentials.load().len()
    }

    /// Bulk-register credentials from a JSON array file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Credentials`] if the file cannot be read or
    /// parsed. Nothing is registered in that case.
    pub fn load_credentials(&self, path: &Path) -> FabricResult<usize> {
        let fail = |reason: String| ConfigError::Credentials {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let records: Vec<CredentialRecord> =
            serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;

        let count = records.len();
        for record in records {
            self.register_service_credentials(record.into());
        }
        info!(path = %path.display(), count, "Credentials loaded");
        Ok(count)
    }

    /// Issue a token carrying every permission and role of the caller.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownService`] if the caller has no
    /// credential.
    pub fn generate_token(&self, caller_service_id: &str, target: Option<&str>) -> FabricResult<Token> {
        let credential = self.require_credential(caller_service_id)?;
        self.issue(&credential, target, credential.permissions.clone())
    }

    /// Issue a token carrying only the requested permissions.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownService`] for an unregistered caller and
    /// [`FabricError::PermissionDenied`] if a requested permission is not
    /// declared on the credential.
    pub fn generate_scoped_token<I, S>(
        &self,
        caller_service_id: &str,
        target: Option<&str>,
        permissions: I,
    ) -> FabricResult<Token>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credential = self.require_credential(caller_service_id)?;
        let mut granted = BTreeSet::new();
        for permission in permissions {
            let permission = permission.as_ref();
            if !credential.has_permission(permission) {
                warn!(service_id = %caller_service_id, permission, "Scoped token requested undeclared permission");
                return Err(FabricError::PermissionDenied {
                    service_id: caller_service_id.to_string(),
                    permission: permission.to_string(),
                });
            }
            granted.insert(permission.to_string());
        }
        self.issue(&credential, target, granted)
    }

    fn require_credential(&self, service_id: &str) -> FabricResult<Arc<ServiceCredential>> {
        self.credential(service_id)
            .ok_or_else(|| FabricError::UnknownService {
                service_id: service_id.to_string(),
            })
    }

    fn issue(
        &self,
        credential: &ServiceCredential,
        target: Option<&str>,
        permissions: BTreeSet<String>,
    ) -> FabricResult<Token> {
        let ttl = TimeDelta::from_std(self.config.ttl).map_err(anyhow::Error::from)?;
        let now = Utc::now();
        let issued_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| anyhow::anyhow!("token ttl {ttl} overflows the expiry timestamp"))?;

        let claims = ServiceClaims {
            iss: self.config.issuer.clone(),
            sub: credential.service_id.clone(),
            aud: target.map(str::to_string),
            jti: Uuid::new_v4().to_string(),
            service_name: credential.service_name.clone(),
            permissions,
            roles: credential.roles.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token_string = encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding_key)
            .map_err(anyhow::Error::from)?;

        debug!(service_id = %claims.sub, target = ?claims.aud, "Service token issued");
        Ok(Token {
            token_string,
            token_type: "jwt",
            service_id: claims.sub,
            service_name: claims.service_name,
            audience: claims.aud,
            issued_at,
            expires_at,
            permissions: claims.permissions,
            roles: claims.roles,
        })
    }

    /// Validate a token against the current time.
    ///
    /// An unscoped token is accepted by every target; a scoped one only by
    /// the target it names.
    #[must_use]
    pub fn validate_token(&self, token: &str, expected_target: Option<&str>) -> TokenValidation {
        self.validate_token_at(token, expected_target, Utc::now())
    }

    /// Validate a token as of `now`.
    ///
    /// Checks run in order: shape, expiry, signature, issuer, issue time,
    /// audience. The first failure is reported.
    #[must_use]
    pub fn validate_token_at(
        &self,
        token: &str,
        expected_target: Option<&str>,
        now: DateTime<Utc>,
    ) -> TokenValidation {
        match self.check(token, expected_target, now) {
            Ok(identity) => TokenValidation::Valid(identity),
            Err(rejection) => {
                debug!(error = %rejection, kind = rejection.kind(), "Token rejected");
                TokenValidation::Invalid(rejection)
            }
        }
    }

    fn check(
        &self,
        token: &str,
        expected_target: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ServiceIdentity, TokenRejection> {
        let raw = token.trim();
        if raw.is_empty() {
            return Err(TokenRejection::Missing);
        }

        let skew = TimeDelta::from_std(self.config.clock_skew).unwrap_or(TimeDelta::zero());
        let unverified = token::peek(raw)?;
        let expires_at = timestamp(unverified.exp)?;
        let expiry_limit = expires_at
            .checked_add_signed(skew)
            .ok_or_else(|| TokenRejection::Malformed {
                reason: format!("expiry {} out of range", unverified.exp),
            })?;
        if now > expiry_limit {
            return Err(TokenRejection::Expired {
                expired_at: expires_at,
            });
        }

        let claims = token::verify(raw, &self.decoding_key)?;
        if claims.iss != self.config.issuer {
            return Err(TokenRejection::WrongIssuer { issuer: claims.iss });
        }
        let issued_at = timestamp(claims.iat)?;
        let issue_limit = now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if issued_at > issue_limit {
            return Err(TokenRejection::NotYetValid { issued_at });
        }
        if let (Some(expected), Some(audience)) = (expected_target, claims.aud.as_deref()) {
            if audience != expected {
                return Err(TokenRejection::WrongAudience {
                    audience: audience.to_string(),
                    expected: expected.to_string(),
                });
            }
        }

        Ok(ServiceIdentity {
            service_id: claims.sub,
            service_name: claims.service_name,
            permissions: claims.permissions,
            roles: claims.roles,
            audience: claims.aud,
            expires_at: timestamp(claims.exp)?,
            token_id: claims.jti,
        })
    }

    /// Whether the stored credential for `service_id` declares `permission`.
    /// False for an unknown id.
    #[must_use]
    pub fn has_permission(&self, service_id: &str, permission: &str) -> bool {
        self.credentials
            .load()
            .get(service_id)
            .is_some_and(|c| c.has_permission(permission))
    }

    /// Turn a validation result into `Ok(())` only if it grants `permission`.
    ///
    /// # Errors
    ///
    /// Returns the token error for an invalid token, or
    /// [`FabricError::PermissionDenied`].
    pub fn require_permission(&self, validation: &TokenValidation, permission: &str) -> FabricResult<()> {
        match validation {
            TokenValidation::Valid(identity) => identity.require_permission(permission),
            TokenValidation::Invalid(rejection) => Err(rejection.clone().into()),
        }
    }

    /// Compare a presented bootstrap secret with the stored one in constant time.
    #[must_use]
    pub fn verify_service_secret(&self, service_id: &str, presented: &str) -> bool {
        self.credential(service_id).is_some_and(|c| {
            let stored = c.secret_key.expose_secret().as_bytes();
            bool::from(stored.ct_eq(presented.as_bytes()))
        })
    }

    /// Headers a caller attaches to an outbound request.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownService`] if the caller has no credential.
    pub fn get_auth_headers(&self, caller_service_id: &str, target: Option<&str>) -> FabricResult<HeaderMap> {
        let token = self.generate_token(caller_service_id, target)?;
        let request_time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&token.bearer())?);
        headers.insert(SERVICE_ID_HEADER, header_value(caller_service_id)?);
        headers.insert(REQUEST_TIME_HEADER, header_value(&request_time)?);
        Ok(headers)
    }

    /// Validate the bearer token in inbound headers.
    ///
    /// When `X-Service-ID` is present it must equal the token subject.
    #[must_use]
    pub fn extract_token_from_headers(
        &self,
        headers: &HeaderMap,
        expected_target: Option<&str>,
    ) -> TokenValidation {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return TokenValidation::Invalid(TokenRejection::Missing);
        };
        let Some(token) = value.to_str().ok().and_then(|v| v.strip_prefix(BEARER_PREFIX)) else {
            return TokenValidation::Invalid(TokenRejection::Malformed {
                reason: "authorization header is not a bearer token".to_string(),
            });
        };

        let validation = self.validate_token(token, expected_target);
        let TokenValidation::Valid(identity) = &validation else {
            return validation;
        };
        match headers.get(SERVICE_ID_HEADER).map(HeaderValue::to_str) {
            Some(Ok(caller)) if caller != identity.service_id => {
                warn!(header = caller, subject = %identity.service_id, "Caller header does not match token");
                TokenValidation::Invalid(TokenRejection::CallerMismatch {
                    header: caller.to_string(),
                    subject: identity.service_id.clone(),
                })
            }
            Some(Err(_)) => TokenValidation::Invalid(TokenRejection::Malformed {
                reason: "service id header is not visible ASCII".to_string(),
            }),
            _ => validation,
        }
    }

    /// Drop every stored credential.
    pub fn shutdown(&self) {
        let count = self.credential_count();
        self.credentials.store(Arc::new(HashMap::new()));
        info!(credentials = count, "Credential store cleared");
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenRejection> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| TokenRejection::Malformed {
        reason: format!("timestamp {secs} out of range"),
    })
}

fn header_value(value: &str) -> FabricResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| FabricError::Internal(anyhow::Error::from(e)))
}
