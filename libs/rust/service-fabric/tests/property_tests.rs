//! Property-based tests for the service-fabric crate.
//!
//! These tests verify universal properties across all inputs using proptest.

use std::collections::{BTreeSet, HashSet};

use chrono::TimeDelta;
use proptest::prelude::*;
use secrecy::SecretString;
use service_fabric::{
    AuthConfig, FabricError, InterServiceAuth, ServiceCredential, ServiceDescriptor,
    ServiceRegistry, TokenRejection, TokenValidation,
};

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn auth() -> InterServiceAuth {
    InterServiceAuth::new(AuthConfig::new(SecretString::from(SECRET)))
}

fn service_name() -> impl Strategy<Value = String> {
    "[a-z]{3,10}-service"
}

fn permissions() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{3,8}\\.(read|write|delete)", 0..6)
}

// Property: Round-Robin Fairness
// *For any* N distinct instances of one name, N consecutive lookups return
// every instance exactly once, and every lookup returns a registered one.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_round_robin_visits_every_instance(
        name in service_name(),
        ports in prop::collection::hash_set(1024u16..65535, 1..8),
    ) {
        let registry = ServiceRegistry::new();
        for port in &ports {
            registry
                .register_service(ServiceDescriptor::new(&name, "10.0.0.1", *port))
                .unwrap();
        }

        let seen: HashSet<u16> = (0..ports.len())
            .map(|_| registry.get_service(&name).unwrap().port)
            .collect();
        prop_assert_eq!(seen, ports);
    }

    #[test]
    fn prop_reregistration_is_idempotent(
        name in service_name(),
        port in 1024u16..65535,
        times in 1usize..5,
    ) {
        let registry = ServiceRegistry::new();
        for _ in 0..times {
            registry
                .register_service(ServiceDescriptor::new(&name, "localhost", port))
                .unwrap();
        }
        let stats = registry.get_registry_stats();
        prop_assert_eq!(stats.total_services, 1);
        prop_assert_eq!(stats.total_instances, 1);
    }
}

// Property: Token Round Trip
// *For any* registered credential, a freshly issued token validates to the
// caller's identity and exactly the credential's permissions.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_token_round_trip(
        name in service_name(),
        target in service_name(),
        perms in permissions(),
    ) {
        let auth = auth();
        let service_id = format!("{name}-1");
        auth.register_service_credentials(
            ServiceCredential::new(&service_id, &name, "k").with_permissions(perms.clone()),
        );

        let token = auth.generate_token(&service_id, Some(&target)).unwrap();
        match auth.validate_token(token.as_str(), Some(&target)) {
            TokenValidation::Valid(identity) => {
                prop_assert_eq!(identity.service_id, service_id);
                prop_assert_eq!(identity.permissions, perms);
            }
            TokenValidation::Invalid(rejection) => {
                prop_assert!(false, "rejected: {}", rejection);
            }
        }
    }

    #[test]
    fn prop_expired_token_is_expiry_error(
        name in service_name(),
        late_secs in 6i64..100_000,
    ) {
        let auth = auth();
        auth.register_service_credentials(ServiceCredential::new("svc-1", &name, "k"));
        let token = auth.generate_token("svc-1", None).unwrap();

        let later = token.expires_at + TimeDelta::seconds(late_secs);
        let validation = auth.validate_token_at(token.as_str(), None, later);
        prop_assert_eq!(
            validation,
            TokenValidation::Invalid(TokenRejection::Expired { expired_at: token.expires_at })
        );
    }

    #[test]
    fn prop_tampered_signature_is_signature_error(
        name in service_name(),
        index in 0usize..40,
    ) {
        let auth = auth();
        auth.register_service_credentials(ServiceCredential::new("svc-1", &name, "k"));
        let token = auth.generate_token("svc-1", None).unwrap();

        let (body, signature) = token.as_str().rsplit_once('.').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        let i = index % chars.len();
        chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
        let forged = format!("{body}.{}", chars.into_iter().collect::<String>());

        let validation = auth.validate_token(&forged, None);
        prop_assert!(!validation.is_valid());
        prop_assert_eq!(validation.rejection().map(TokenRejection::kind), Some("TokenInvalidError"));
    }
}

// Property: Permission Lookup
// *For any* credential and permission p, has_permission is true iff p was
// declared, and false for every unregistered id.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_has_permission_iff_declared(
        perms in permissions(),
        permission in "[a-z]{3,8}\\.(read|write|delete)",
    ) {
        let auth = auth();
        auth.register_service_credentials(
            ServiceCredential::new("svc-1", "svc", "k").with_permissions(perms.clone()),
        );

        prop_assert_eq!(auth.has_permission("svc-1", &permission), perms.contains(&permission));
        prop_assert!(!auth.has_permission("svc-2", &permission));
    }

    #[test]
    fn prop_scoped_token_never_exceeds_credential(
        declared in permissions(),
        requested in permissions(),
    ) {
        let auth = auth();
        auth.register_service_credentials(
            ServiceCredential::new("svc-1", "svc", "k").with_permissions(declared.clone()),
        );

        match auth.generate_scoped_token("svc-1", None, &requested) {
            Ok(token) => {
                prop_assert!(requested.is_subset(&declared));
                prop_assert_eq!(token.permissions, requested);
            }
            Err(FabricError::PermissionDenied { permission, .. }) => {
                prop_assert!(!declared.contains(&permission));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}

#[test]
fn job_service_resolves_to_its_url() {
    let registry = ServiceRegistry::new();
    registry
        .register_service(ServiceDescriptor::from_url("job-service", "http://localhost:3003").unwrap())
        .unwrap();

    let found = registry.get_service("job-service").unwrap();
    assert_eq!(found.host, "localhost");
    assert_eq!(found.port, 3003);
}

#[test]
fn user_service_token_for_job_service() {
    let auth = auth();
    auth.register_service_credentials(
        ServiceCredential::new("user-service-1", "user-service", "k")
            .with_permissions(["users.read", "users.write"]),
    );

    let token = auth.generate_token("user-service-1", Some("job-service")).unwrap();
    let validation = auth.validate_token(token.as_str(), Some("job-service"));
    let identity = validation.identity().unwrap();
    assert_eq!(identity.service_id, "user-service-1");
    assert_eq!(
        identity.permissions.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["users.read", "users.write"]
    );
}

#[test]
fn unknown_service_cannot_get_headers() {
    let auth = auth();
    assert!(matches!(
        auth.get_auth_headers("nonexistent-service", None),
        Err(FabricError::UnknownService { .. })
    ));
    assert!(!auth.has_permission("nonexistent-service", "users.read"));
}
