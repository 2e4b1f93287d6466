//! Static service credentials.

use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::Deserialize;

/// Secret plus permission and role set a service instance proves its
/// identity with. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ServiceCredential {
    /// Unique instance identity
    pub service_id: String,
    /// Logical service name
    pub service_name: String,
    /// Shared secret presented by the instance at bootstrap
    pub secret_key: SecretString,
    /// Declared permissions
    pub permissions: BTreeSet<String>,
    /// Declared roles
    pub roles: BTreeSet<String>,
}

impl ServiceCredential {
    /// Credential with no permissions or roles.
    #[must_use]
    pub fn new(
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_name: service_name.into(),
            secret_key: SecretString::from(secret_key.into()),
            permissions: BTreeSet::new(),
            roles: BTreeSet::new(),
        }
    }

    /// Add permissions.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Add roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Whether the credential declares `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// On-disk shape of one entry in a credentials file.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialRecord {
    service_id: String,
    service_name: String,
    secret_key: String,
    #[serde(default)]
    permissions: BTreeSet<String>,
    #[serde(default)]
    roles: BTreeSet<String>,
}

impl From<CredentialRecord> for ServiceCredential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            service_id: record.service_id,
            service_name: record.service_name,
            secret_key: SecretString::from(record.secret_key),
            permissions: record.permissions,
            roles: record.roles,
        }
    }
}
