//! Fabric lifecycle.
//!
//! [`Fabric`] builds every component of a node from one [`FabricConfig`] and
//! injects them into each other. There is no process-global state: two
//! fabrics in one process are fully independent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::auth::InterServiceAuth;
use crate::breaker::CircuitBreakerSet;
use crate::client::{ClientOptions, ServiceClient, ServiceClientFactory};
use crate::config::FabricConfig;
use crate::dispatch::{AdminCommand, AdminReply, HealthReport};
use crate::error::{FabricError, FabricResult};
use crate::registry::{Registration, ServiceDescriptor, ServiceRegistry};
use crate::trace::{LogSink, SpanSink, Tracer};

/// One node's registry, credential store, breakers and clients.
#[derive(Debug)]
pub struct Fabric {
    config: FabricConfig,
    registry: Arc<ServiceRegistry>,
    auth: Arc<InterServiceAuth>,
    breakers: Arc<CircuitBreakerSet>,
    tracer: Tracer,
    clients: ServiceClientFactory,
    started_at: DateTime<Utc>,
}

impl Fabric {
    /// Build a node whose finished spans are logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the credentials file
    /// cannot be loaded or the HTTP client cannot be built.
    pub fn init(config: FabricConfig) -> FabricResult<Self> {
        Self::init_with_sink(config, Arc::new(LogSink))
    }

    /// Build a node reporting spans to `sink`.
    ///
    /// # Errors
    ///
    /// See [`Fabric::init`].
    pub fn init_with_sink(config: FabricConfig, sink: Arc<dyn SpanSink>) -> FabricResult<Self> {
        config.validate()?;

        let registry = Arc::new(ServiceRegistry::new());
        let auth = Arc::new(InterServiceAuth::new(config.auth_config()));
        if let Some(path) = &config.credentials_file {
            auth.load_credentials(path)?;
        }
        let breakers = Arc::new(CircuitBreakerSet::new(config.circuit_breaker.clone()));
        let tracer = Tracer::new(config.service_name.clone(), sink);
        let defaults = ClientOptions::default()
            .with_timeout(config.circuit_breaker.request_timeout)
            .with_retry(config.retry.clone());
        let clients = ServiceClientFactory::new(
            config.service_id.clone(),
            Arc::clone(&registry),
            Arc::clone(&auth),
            Arc::clone(&breakers),
            tracer.clone(),
            defaults,
        )?;

        info!(
            service_id = %config.service_id,
            service = %config.service_name,
            credentials = auth.credential_count(),
            "Fabric initialised"
        );
        Ok(Self {
            config,
            registry,
            auth,
            breakers,
            tracer,
            clients,
            started_at: Utc::now(),
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Service registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Credential store and token issuer.
    #[must_use]
    pub fn auth(&self) -> &Arc<InterServiceAuth> {
        &self.auth
    }

    /// Per-target breakers.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerSet> {
        &self.breakers
    }

    /// Span tracer.
    #[must_use]
    pub const fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Client factory.
    #[must_use]
    pub const fn clients(&self) -> &ServiceClientFactory {
        &self.clients
    }

    /// Shorthand for [`ServiceClientFactory::create_client`].
    pub fn create_client(&self, name: &str, options: Option<ClientOptions>) -> Arc<ServiceClient> {
        self.clients.create_client(name, options)
    }

    /// Descriptor for this node.
    #[must_use]
    pub fn self_descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(&self.config.service_name, &self.config.host, self.config.port)
            .with_version(&self.config.version)
            .with_region(&self.config.region)
    }

    /// Register this node in its own registry.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::InvalidDescriptor`] for an unusable host.
    pub fn register_self(&self) -> FabricResult<Registration> {
        self.registry.register_service(self.self_descriptor())
    }

    /// Run one admin operation.
    ///
    /// # Errors
    ///
    /// Propagates the registry error of the operation, or
    /// [`FabricError::ServiceNotFound`] when deregistering an unknown instance.
    pub fn dispatch(&self, command: AdminCommand) -> FabricResult<AdminReply> {
        if command.is_mutation() {
            info!(command = command.name(), "Admin command");
        }
        match command {
            AdminCommand::ListServices => Ok(AdminReply::Services(self.registry.get_all_services())),
            AdminCommand::RegistryStats => Ok(AdminReply::Stats(self.registry.get_registry_stats())),
            AdminCommand::RegisterService(descriptor) => {
                let registration = self.registry.register_service(descriptor.clone())?;
                Ok(AdminReply::Registered {
                    registration,
                    service: descriptor,
                })
            }
            AdminCommand::DeregisterService {
                service_name,
                host,
                port,
            } => {
                if self.registry.deregister_service(&service_name, &host, port) {
                    Ok(AdminReply::Deregistered { removed: true })
                } else {
                    Err(FabricError::ServiceNotFound {
                        service: format!("{service_name} at {host}:{port}"),
                    })
                }
            }
            AdminCommand::ResolveService { service_name } => {
                Ok(AdminReply::Resolved(self.registry.get_service(&service_name)?))
            }
            AdminCommand::BreakerStates => Ok(AdminReply::Breakers(self.breakers.snapshot_all())),
            AdminCommand::ResetBreaker { target } => {
                let reset = self.breakers.reset(&target);
                Ok(AdminReply::BreakerReset { target, reset })
            }
            AdminCommand::Health => Ok(AdminReply::Health(Box::new(self.health()))),
        }
    }

    /// Node health summary.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let open_circuits: Vec<String> = self
            .breakers
            .snapshot_all()
            .into_iter()
            .filter(|(_, status)| status.state == "open")
            .map(|(target, _)| target)
            .collect();
        HealthReport {
            status: if open_circuits.is_empty() { "healthy" } else { "degraded" },
            service_id: self.config.service_id.clone(),
            service_name: self.config.service_name.clone(),
            version: self.config.version.clone(),
            started_at: self.started_at,
            registry: self.registry.get_registry_stats(),
            credentials: self.auth.credential_count(),
            open_circuits,
            clients: self.clients.get_health_status(),
        }
    }

    /// Clear registry and credential state. Instances must re-register
    /// after a restart.
    pub fn shutdown(&self) {
        let stats = self.registry.get_registry_stats();
        if stats.total_instances > 0 {
            warn!(
                instances = stats.total_instances,
                "Shutting down with registered instances"
            );
        }
        self.registry.shutdown();
        self.auth.shutdown();
        info!(service_id = %self.config.service_id, "Fabric shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ServiceCredential;
    use platform_common::Admission;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn fabric() -> Fabric {
        let mut config = FabricConfig::new("user-service-1", "user-service", SECRET);
        config.port = 3001;
        Fabric::init(config).unwrap()
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = FabricConfig::new("a-1", "a", "short");
        assert!(matches!(Fabric::init(config), Err(FabricError::Config(_))));
    }

    #[test]
    fn test_register_self() {
        let fabric = fabric();
        assert_eq!(fabric.register_self().unwrap(), Registration::Added);
        let found = fabric.registry().get_service("user-service").unwrap();
        assert_eq!(found.port, 3001);
        assert_eq!(found.version, "1.0.0");
    }

    #[test]
    fn test_dispatch_register_resolve_deregister() {
        let fabric = fabric();
        let descriptor = ServiceDescriptor::from_url("job-service", "http://localhost:3003").unwrap();

        let reply = fabric.dispatch(AdminCommand::RegisterService(descriptor)).unwrap();
        assert!(matches!(reply, AdminReply::Registered { registration: Registration::Added, .. }));

        let reply = fabric
            .dispatch(AdminCommand::ResolveService {
                service_name: "job-service".to_string(),
            })
            .unwrap();
        assert!(matches!(reply, AdminReply::Resolved(d) if d.port == 3003));

        let command = AdminCommand::DeregisterService {
            service_name: "job-service".to_string(),
            host: "localhost".to_string(),
            port: 3003,
        };
        assert!(fabric.dispatch(command.clone()).is_ok());
        assert!(matches!(
            fabric.dispatch(command),
            Err(FabricError::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_dispatch_breakers() {
        let fabric = fabric();
        let reply = fabric
            .dispatch(AdminCommand::ResetBreaker {
                target: "job-service".to_string(),
            })
            .unwrap();
        assert!(matches!(reply, AdminReply::BreakerReset { reset: false, .. }));

        for _ in 0..3 {
            fabric.breakers().breaker("job-service").record_failure(Admission::Normal);
        }
        assert_eq!(fabric.health().status, "degraded");
        assert_eq!(fabric.health().open_circuits, vec!["job-service".to_string()]);

        fabric
            .dispatch(AdminCommand::ResetBreaker {
                target: "job-service".to_string(),
            })
            .unwrap();
        assert_eq!(fabric.health().status, "healthy");
    }

    #[test]
    fn test_shutdown_clears_state() {
        let fabric = fabric();
        fabric.register_self().unwrap();
        fabric
            .auth()
            .register_service_credentials(ServiceCredential::new("user-service-1", "user-service", "k"));

        fabric.shutdown();
        assert_eq!(fabric.registry().get_registry_stats().total_instances, 0);
        assert_eq!(fabric.auth().credential_count(), 0);
    }

    #[test]
    fn test_two_fabrics_are_independent() {
        let a = fabric();
        let b = fabric();
        a.register_self().unwrap();
        assert!(b.registry().get_all_services().is_empty());
    }
}
