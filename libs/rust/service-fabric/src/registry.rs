//! Service registry for discovery.
//!
//! Maps a logical service name to its live instances. Lookups rotate
//! round-robin across the healthy instances of a name. Every mutation
//! happens under one write lock, so a reader never observes a half-written
//! descriptor.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FabricError, FabricResult};

/// Health of one registered instance, as reported by an external health checker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    /// Eligible for selection
    #[default]
    Healthy,
    /// Skipped by round-robin selection
    Unhealthy,
}

/// Registry record identifying one running instance of a named service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    /// Logical service name shared by all instances
    pub service_name: String,
    /// Host the instance listens on
    pub host: String,
    /// Port the instance listens on
    pub port: u16,
    /// Base URL requests are sent to
    pub url: String,
    /// Deployed version
    #[serde(default)]
    pub version: String,
    /// Deployment region
    #[serde(default)]
    pub region: String,
    /// When the instance first registered
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
    /// Current health
    #[serde(default)]
    pub health: InstanceHealth,
}

impl ServiceDescriptor {
    /// Descriptor for `http://{host}:{port}`.
    #[must_use]
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            service_name: service_name.into(),
            url: format!("http://{host}:{port}"),
            host,
            port,
            version: String::new(),
            region: String::new(),
            registered_at: Utc::now(),
            health: InstanceHealth::Healthy,
        }
    }

    /// Descriptor parsed from a base URL such as `http://localhost:3003`.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::InvalidDescriptor`] if the URL does not parse
    /// or has no host.
    pub fn from_url(service_name: impl Into<String>, url: &str) -> FabricResult<Self> {
        let parsed = Url::parse(url).map_err(|e| FabricError::InvalidDescriptor {
            reason: format!("{url}: {e}"),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FabricError::InvalidDescriptor {
                reason: format!("{url}: missing host"),
            })?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| FabricError::InvalidDescriptor {
                reason: format!("{url}: missing port"),
            })?;

        let mut descriptor = Self::new(service_name, host, port);
        descriptor.url = url.trim_end_matches('/').to_string();
        Ok(descriptor)
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Whether this descriptor names the given instance.
    #[must_use]
    pub fn is_instance(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    fn validate(&self) -> FabricResult<()> {
        let reason = if self.service_name.trim().is_empty() {
            "service name is empty"
        } else if self.host.trim().is_empty() {
            "host is empty"
        } else if self.port == 0 {
            "port must be non-zero"
        } else {
            return Ok(());
        };
        Err(FabricError::InvalidDescriptor {
            reason: reason.to_string(),
        })
    }
}

/// Whether a registration created or refreshed an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    /// New instance appended
    Added,
    /// Existing (name, host, port) refreshed in place
    Updated,
}

/// Counts for health and monitoring endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Distinct service names
    pub total_services: usize,
    /// Registered instances across all names
    pub total_instances: usize,
    /// Instances currently marked healthy
    pub healthy_instances: usize,
}

#[derive(Debug, Default)]
struct ServiceEntry {
    instances: Vec<ServiceDescriptor>,
    cursor: AtomicUsize,
}

/// Concurrency-safe registry of service instances.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, or refresh it if (name, host, port) is already known.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::InvalidDescriptor`] for an empty name or host,
    /// or a zero port.
    pub fn register_service(&self, descriptor: ServiceDescriptor) -> FabricResult<Registration> {
        descriptor.validate()?;

        let mut services = self.services.write();
        let entry = services.entry(descriptor.service_name.clone()).or_default();

        if let Some(existing) = entry
            .instances
            .iter_mut()
            .find(|d| d.is_instance(&descriptor.host, descriptor.port))
        {
            let registered_at = existing.registered_at;
            *existing = ServiceDescriptor {
                registered_at,
                ..descriptor
            };
            debug!(service = %existing.service_name, url = %existing.url, "Service instance refreshed");
            return Ok(Registration::Updated);
        }

        info!(
            service = %descriptor.service_name,
            url = %descriptor.url,
            version = %descriptor.version,
            "Service instance registered"
        );
        entry.instances.push(descriptor);
        Ok(Registration::Added)
    }

    /// Select one healthy instance, rotating round-robin.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::ServiceNotFound`] if nothing is registered for
    /// the name, or [`FabricError::NoHealthyInstance`] if every instance is
    /// unhealthy.
    pub fn get_service(&self, service_name: &str) -> FabricResult<ServiceDescriptor> {
        let services = self.services.read();
        let entry = services
            .get(service_name)
            .filter(|e| !e.instances.is_empty())
            .ok_or_else(|| FabricError::ServiceNotFound {
                service: service_name.to_string(),
            })?;

        let healthy: Vec<&ServiceDescriptor> = entry
            .instances
            .iter()
            .filter(|d| d.health == InstanceHealth::Healthy)
            .collect();
        if healthy.is_empty() {
            return Err(FabricError::NoHealthyInstance {
                service: service_name.to_string(),
            });
        }

        let turn = entry.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(healthy[turn % healthy.len()].clone())
    }

    /// All instances registered under one name.
    #[must_use]
    pub fn get_instances(&self, service_name: &str) -> Vec<ServiceDescriptor> {
        self.services
            .read()
            .get(service_name)
            .map(|e| e.instances.clone())
            .unwrap_or_default()
    }

    /// Full topology, sorted by service name.
    #[must_use]
    pub fn get_all_services(&self) -> BTreeMap<String, Vec<ServiceDescriptor>> {
        self.services
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.instances.clone()))
            .collect()
    }

    /// Counts of services and instances.
    #[must_use]
    pub fn get_registry_stats(&self) -> RegistryStats {
        let services = self.services.read();
        let instances = services.values().flat_map(|e| e.instances.iter());
        let (total, healthy) = instances.fold((0, 0), |(t, h), d| {
            (t + 1, h + usize::from(d.health == InstanceHealth::Healthy))
        });
        RegistryStats {
            total_services: services.len(),
            total_instances: total,
            healthy_instances: healthy,
        }
    }

    /// Remove one instance. Returns whether anything was removed.
    pub fn deregister_service(&self, service_name: &str, host: &str, port: u16) -> bool {
        let mut services = self.services.write();
        let Some(entry) = services.get_mut(service_name) else {
            return false;
        };

        let before = entry.instances.len();
        entry.instances.retain(|d| !d.is_instance(host, port));
        let removed = entry.instances.len() < before;

        if entry.instances.is_empty() {
            services.remove(service_name);
        }
        if removed {
            info!(service = %service_name, host, port, "Service instance deregistered");
        }
        removed
    }

    /// Flip the health of one instance.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::ServiceNotFound`] if the instance is unknown.
    pub fn mark_health(
        &self,
        service_name: &str,
        host: &str,
        port: u16,
        health: InstanceHealth,
    ) -> FabricResult<()> {
        let mut services = self.services.write();
        let instance = services
            .get_mut(service_name)
            .and_then(|e| e.instances.iter_mut().find(|d| d.is_instance(host, port)))
            .ok_or_else(|| FabricError::ServiceNotFound {
                service: service_name.to_string(),
            })?;

        if instance.health != health {
            warn!(service = %service_name, host, port, ?health, "Instance health changed");
            instance.health = health;
        }
        Ok(())
    }

    /// Drop every registration. Instances must re-register afterwards.
    pub fn shutdown(&self) {
        let mut services = self.services.write();
        let count = services.len();
        services.clear();
        info!(services = count, "Service registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get_job_service() {
        let registry = ServiceRegistry::new();
        let descriptor = ServiceDescriptor::from_url("job-service", "http://localhost:3003").unwrap();
        registry.register_service(descriptor).unwrap();

        let found = registry.get_service("job-service").unwrap();
        assert_eq!(found.host, "localhost");
        assert_eq!(found.port, 3003);
        assert_eq!(found.url, "http://localhost:3003");
    }

    #[test]
    fn test_unknown_service_fails() {
        let registry = ServiceRegistry::new();
        let err = registry.get_service("nope").unwrap_err();
        assert!(matches!(err, FabricError::ServiceNotFound { service } if service == "nope"));
    }

    #[test]
    fn test_reregistration_updates_in_place() {
        let registry = ServiceRegistry::new();
        let first = ServiceDescriptor::new("job-service", "10.0.0.1", 3003).with_version("1.0.0");
        let registered_at = first.registered_at;
        assert_eq!(registry.register_service(first).unwrap(), Registration::Added);

        let second = ServiceDescriptor::new("job-service", "10.0.0.1", 3003).with_version("1.1.0");
        assert_eq!(registry.register_service(second).unwrap(), Registration::Updated);

        let instances = registry.get_instances("job-service");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].version, "1.1.0");
        assert_eq!(instances[0].registered_at, registered_at);
    }

    #[test]
    fn test_round_robin_visits_every_instance() {
        let registry = ServiceRegistry::new();
        for port in [4001, 4002, 4003] {
            registry
                .register_service(ServiceDescriptor::new("course-service", "localhost", port))
                .unwrap();
        }

        let ports: Vec<u16> = (0..3)
            .map(|_| registry.get_service("course-service").unwrap().port)
            .collect();
        assert_eq!(ports, vec![4001, 4002, 4003]);
        assert_eq!(registry.get_service("course-service").unwrap().port, 4001);
    }

    #[test]
    fn test_unhealthy_instances_are_skipped() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(ServiceDescriptor::new("job-service", "a", 1))
            .unwrap();
        registry
            .register_service(ServiceDescriptor::new("job-service", "b", 2))
            .unwrap();
        registry
            .mark_health("job-service", "a", 1, InstanceHealth::Unhealthy)
            .unwrap();

        for _ in 0..4 {
            assert_eq!(registry.get_service("job-service").unwrap().host, "b");
        }

        registry
            .mark_health("job-service", "b", 2, InstanceHealth::Unhealthy)
            .unwrap();
        assert!(matches!(
            registry.get_service("job-service"),
            Err(FabricError::NoHealthyInstance { .. })
        ));
    }

    #[test]
    fn test_deregister_removes_instance_and_empty_name() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(ServiceDescriptor::new("job-service", "localhost", 3003))
            .unwrap();

        assert!(!registry.deregister_service("job-service", "localhost", 9999));
        assert!(registry.deregister_service("job-service", "localhost", 3003));
        assert!(registry.get_all_services().is_empty());
        assert!(registry.get_service("job-service").is_err());
    }

    #[test]
    fn test_registry_stats() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(ServiceDescriptor::new("job-service", "a", 1))
            .unwrap();
        registry
            .register_service(ServiceDescriptor::new("job-service", "b", 2))
            .unwrap();
        registry
            .register_service(ServiceDescriptor::new("user-service", "c", 3))
            .unwrap();
        registry
            .mark_health("user-service", "c", 3, InstanceHealth::Unhealthy)
            .unwrap();

        let stats = registry.get_registry_stats();
        assert_eq!(stats.total_services, 2);
        assert_eq!(stats.total_instances, 3);
        assert_eq!(stats.healthy_instances, 2);
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let registry = ServiceRegistry::new();
        assert!(registry.register_service(ServiceDescriptor::new("", "a", 1)).is_err());
        assert!(registry.register_service(ServiceDescriptor::new("x", "a", 0)).is_err());
        assert!(ServiceDescriptor::from_url("x", "not a url").is_err());
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let descriptor = ServiceDescriptor::new("job-service", "localhost", 3003);
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["serviceName"], "job-service");
        assert_eq!(json["health"], "healthy");
    }

    #[test]
    fn test_shutdown_clears_registrations() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(ServiceDescriptor::new("job-service", "a", 1))
            .unwrap();
        registry.shutdown();
        assert_eq!(registry.get_registry_stats().total_instances, 0);
    }
}
