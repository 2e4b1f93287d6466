//! Registry admin surface for ops tooling.
//!
//! Read routes are open. Routes that change state require a valid service
//! token (see [`crate::middleware::require_service_auth`]) whose identity
//! carries [`ADMIN_PERMISSION`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::auth::ServiceIdentity;
use crate::dispatch::{AdminCommand, AdminReply};
use crate::error::{FabricError, FabricResult};
use crate::fabric::Fabric;
use crate::middleware::{ServiceAuthState, require_service_auth};
use crate::registry::{Registration, ServiceDescriptor};

/// Body of `POST /admin/services`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Logical service name
    pub service_name: String,
    /// Instance host
    pub host: String,
    /// Instance port
    pub port: u16,
    /// Base URL; derived from host and port when absent
    #[serde(default)]
    pub url: Option<String>,
    /// Deployed version
    #[serde(default)]
    pub version: Option<String>,
    /// Deployment region
    #[serde(default)]
    pub region: Option<String>,
}

impl RegisterRequest {
    fn into_descriptor(self) -> FabricResult<ServiceDescriptor> {
        let mut descriptor = match &self.url {
            Some(url) => {
                let parsed = ServiceDescriptor::from_url(&self.service_name, url)?;
                if !parsed.is_instance(&self.host, self.port) {
                    return Err(FabricError::InvalidDescriptor {
                        reason: format!("url {url} does not match {}:{}", self.host, self.port),
                    });
                }
                parsed
            }
            None => ServiceDescriptor::new(&self.service_name, &self.host, self.port),
        };
        if let Some(version) = self.version {
            descriptor = descriptor.with_version(version);
        }
        if let Some(region) = self.region {
            descriptor = descriptor.with_region(region);
        }
        Ok(descriptor)
    }
}

/// Permission a caller needs to change registry or breaker state.
pub const ADMIN_PERMISSION: &str = "registry.admin";

type AdminResult = Result<Json<AdminReply>, FabricError>;

/// Router serving the admin surface of `fabric`.
pub fn admin_router(fabric: Arc<Fabric>) -> Router {
    let auth_state = ServiceAuthState::new(
        Arc::clone(fabric.auth()),
        Some(fabric.config().service_name.clone()),
    );

    let protected = Router::new()
        .route("/admin/services", post(register_service))
        .route("/admin/services/{name}/{host}/{port}", delete(deregister_service))
        .route("/admin/breakers/{target}/reset", post(reset_breaker))
        .layer(axum::middleware::from_fn_with_state(auth_state, require_service_auth));

    Router::new()
        .route("/admin/services", get(list_services))
        .route("/admin/services/stats", get(registry_stats))
        .route("/admin/services/{name}", get(resolve_service))
        .route("/admin/breakers", get(breaker_states))
        .route("/admin/health", get(health))
        .merge(protected)
        .with_state(fabric)
}

async fn list_services(State(fabric): State<Arc<Fabric>>) -> AdminResult {
    fabric.dispatch(AdminCommand::ListServices).map(Json)
}

async fn registry_stats(State(fabric): State<Arc<Fabric>>) -> AdminResult {
    fabric.dispatch(AdminCommand::RegistryStats).map(Json)
}

async fn resolve_service(State(fabric): State<Arc<Fabric>>, Path(name): Path<String>) -> AdminResult {
    fabric
        .dispatch(AdminCommand::ResolveService { service_name: name })
        .map(Json)
}

async fn breaker_states(State(fabric): State<Arc<Fabric>>) -> AdminResult {
    fabric.dispatch(AdminCommand::BreakerStates).map(Json)
}

async fn health(State(fabric): State<Arc<Fabric>>) -> AdminResult {
    fabric.dispatch(AdminCommand::Health).map(Json)
}

async fn register_service(
    State(fabric): State<Arc<Fabric>>,
    Extension(caller): Extension<ServiceIdentity>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AdminReply>), FabricError> {
    caller.require_permission(ADMIN_PERMISSION)?;
    let descriptor = request.into_descriptor()?;
    info!(caller = %caller.service_id, service = %descriptor.service_name, "Registration via admin API");

    let reply = fabric.dispatch(AdminCommand::RegisterService(descriptor))?;
    let status = match reply {
        AdminReply::Registered {
            registration: Registration::Added,
            ..
        } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(reply)))
}

async fn deregister_service(
    State(fabric): State<Arc<Fabric>>,
    Extension(caller): Extension<ServiceIdentity>,
    Path((name, host, port)): Path<(String, String, u16)>,
) -> AdminResult {
    caller.require_permission(ADMIN_PERMISSION)?;
    info!(caller = %caller.service_id, service = %name, host = %host, port, "Deregistration via admin API");
    fabric
        .dispatch(AdminCommand::DeregisterService {
            service_name: name,
            host,
            port,
        })
        .map(Json)
}

async fn reset_breaker(
    State(fabric): State<Arc<Fabric>>,
    Extension(caller): Extension<ServiceIdentity>,
    Path(target): Path<String>,
) -> AdminResult {
    caller.require_permission(ADMIN_PERMISSION)?;
    info!(caller = %caller.service_id, target_service = %target, "Breaker reset via admin API");
    fabric.dispatch(AdminCommand::ResetBreaker { target }).map(Json)
}
