//! Shared proptest generators for the fabric domain types.

use std::collections::BTreeSet;
use std::time::Duration;

use platform_common::CircuitBreakerConfig;
use proptest::prelude::*;
use service_fabric::{ServiceCredential, ServiceDescriptor};

/// Generate logical service names such as `job-service`.
pub fn service_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("job-service".to_string()),
        Just("user-service".to_string()),
        Just("course-service".to_string()),
        Just("notification-service".to_string()),
        "[a-z]{3,12}-service",
    ]
}

/// Generate hosts: loopback, private addresses and DNS names.
pub fn host_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("localhost".to_string()),
        (1u8..255, 1u8..255).prop_map(|(a, b)| format!("10.0.{a}.{b}")),
        "[a-z]{3,10}\\.svc\\.cluster\\.local",
    ]
}

/// Generate dotted permissions such as `users.read`.
pub fn permission_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{3,10}", prop_oneof![Just("read"), Just("write"), Just("delete")])
        .prop_map(|(resource, action)| format!("{resource}.{action}"))
}

/// Generate permission sets of up to eight entries.
pub fn permission_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(permission_strategy(), 0..8)
}

/// Generate service descriptors.
pub fn descriptor_strategy() -> impl Strategy<Value = ServiceDescriptor> {
    (
        service_name_strategy(),
        host_strategy(),
        1024u16..65535,
        "[0-9]\\.[0-9]{1,2}\\.[0-9]{1,2}",
    )
        .prop_map(|(name, host, port, version)| {
            ServiceDescriptor::new(name, host, port).with_version(version)
        })
}

/// Generate credentials whose id is derived from the service name.
pub fn credential_strategy() -> impl Strategy<Value = ServiceCredential> {
    (
        service_name_strategy(),
        1u32..100,
        "[A-Za-z0-9]{16,32}",
        permission_set_strategy(),
        prop::collection::btree_set(prop_oneof![Just("service"), Just("admin")], 0..2),
    )
        .prop_map(|(name, instance, secret, permissions, roles)| {
            ServiceCredential::new(format!("{name}-{instance}"), name, secret)
                .with_permissions(permissions)
                .with_roles(roles)
        })
}

/// Generate breaker configs with short reset timeouts.
pub fn breaker_config_strategy() -> impl Strategy<Value = CircuitBreakerConfig> {
    (1u32..10, 1u64..50).prop_map(|(max_failures, reset_ms)| {
        CircuitBreakerConfig::default()
            .with_max_failures(max_failures)
            .with_reset_timeout(Duration::from_millis(reset_ms))
    })
}

/// Generate W3C Trace Context traceparent headers.
pub fn traceparent_strategy() -> impl Strategy<Value = String> {
    (
        Just("00"),
        "[0-9a-f]{32}",
        "[0-9a-f]{16}",
        prop_oneof![Just("00"), Just("01")],
    )
        .prop_map(|(version, trace_id, parent_id, flags)| {
            format!("{version}-{trace_id}-{parent_id}-{flags}")
        })
}
