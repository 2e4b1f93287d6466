//! Typed admin operations.
//!
//! Every admin operation is an [`AdminCommand`] variant handled by
//! [`crate::Fabric::dispatch`] through an exhaustive match, so adding a
//! variant without a handler does not compile.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::breaker::BreakerStatus;
use crate::client::ClientHealth;
use crate::registry::{Registration, RegistryStats, ServiceDescriptor};

/// An admin operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Full topology
    ListServices,
    /// Registry counts
    RegistryStats,
    /// Add or refresh an instance
    RegisterService(ServiceDescriptor),
    /// Remove one instance
    DeregisterService {
        /// Logical name
        service_name: String,
        /// Instance host
        host: String,
        /// Instance port
        port: u16,
    },
    /// Pick an instance the way a client would
    ResolveService {
        /// Logical name
        service_name: String,
    },
    /// Every breaker
    BreakerStates,
    /// Force a breaker closed
    ResetBreaker {
        /// Target service name
        target: String,
    },
    /// Node health
    Health,
}

impl AdminCommand {
    /// Operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListServices => "list_services",
            Self::RegistryStats => "registry_stats",
            Self::RegisterService(_) => "register_service",
            Self::DeregisterService { .. } => "deregister_service",
            Self::ResolveService { .. } => "resolve_service",
            Self::BreakerStates => "breaker_states",
            Self::ResetBreaker { .. } => "reset_breaker",
            Self::Health => "health",
        }
    }

    /// Whether the command changes fabric state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::RegisterService(_) | Self::DeregisterService { .. } | Self::ResetBreaker { .. }
        )
    }
}

/// Node health summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `healthy`, or `degraded` while any circuit is open
    pub status: &'static str,
    /// This node's instance id
    pub service_id: String,
    /// This node's service name
    pub service_name: String,
    /// Deployed version
    pub version: String,
    /// When the fabric was initialised
    pub started_at: DateTime<Utc>,
    /// Registry counts
    pub registry: RegistryStats,
    /// Stored credentials
    pub credentials: usize,
    /// Targets whose circuit is open
    pub open_circuits: Vec<String>,
    /// Per-client health
    pub clients: Vec<ClientHealth>,
}

/// Result of an [`AdminCommand`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AdminReply {
    /// `serviceName -> instances`
    Services(BTreeMap<String, Vec<ServiceDescriptor>>),
    /// Registry counts
    Stats(RegistryStats),
    /// Registration outcome
    Registered {
        /// Added or updated
        registration: Registration,
        /// Stored descriptor
        service: ServiceDescriptor,
    },
    /// Instance removed
    Deregistered {
        /// Always true; a missing instance is an error
        removed: bool,
    },
    /// Selected instance
    Resolved(ServiceDescriptor),
    /// Breakers by target
    Breakers(BTreeMap<String, BreakerStatus>),
    /// Breaker reset outcome
    BreakerReset {
        /// Target service name
        target: String,
        /// False if the target had no breaker yet
        reset: bool,
    },
    /// Node health
    Health(Box<HealthReport>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations() {
        assert!(AdminCommand::ResetBreaker { target: "x".to_string() }.is_mutation());
        assert!(!AdminCommand::ListServices.is_mutation());
        assert_eq!(AdminCommand::Health.name(), "health");
    }

    #[test]
    fn test_untagged_replies() {
        let reply = AdminReply::Deregistered { removed: true };
        assert_eq!(serde_json::to_value(reply).unwrap(), serde_json::json!({"removed": true}));

        let stats = AdminReply::Stats(RegistryStats {
            total_services: 1,
            total_instances: 2,
            healthy_instances: 2,
        });
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["totalServices"], 1);
        assert_eq!(json["totalInstances"], 2);
    }
}
