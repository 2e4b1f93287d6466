//! Inter-service communication fabric.
//!
//! Lets independently deployed services find each other, prove their
//! identity to each other and call each other without cascading failures:
//!
//! - [`ServiceRegistry`]: name to instances, round-robin selection
//! - [`InterServiceAuth`]: credential store, HS256 service tokens
//! - [`CircuitBreakerSet`]: one breaker per target service
//! - [`ServiceClientFactory`] / [`ServiceClient`]: the call lifecycle
//! - [`Fabric`]: builds and wires the above for one node
//!
//! The admin surface ([`admin_router`]) and inbound auth middleware
//! ([`require_service_auth`]) are axum components.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod auth;
pub mod breaker;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod middleware;
pub mod registry;
pub mod trace;

pub use admin::{ADMIN_PERMISSION, RegisterRequest, admin_router};
pub use auth::{
    AuthConfig, InterServiceAuth, REQUEST_TIME_HEADER, SERVICE_ID_HEADER, ServiceClaims,
    ServiceCredential, ServiceIdentity, Token, TokenRejection, TokenValidation,
};
pub use breaker::{BreakerStatus, CircuitBreakerSet};
pub use client::{
    ClientHealth, ClientMetrics, ClientOptions, MetricsSnapshot, RequestConfig, ServiceClient,
    ServiceClientFactory, ServiceResponse,
};
pub use config::{ConfigError, FabricConfig};
pub use dispatch::{AdminCommand, AdminReply, HealthReport};
pub use error::{ErrorCode, FabricError, FabricResult};
pub use fabric::Fabric;
pub use middleware::{ServiceAuthState, require_service_auth};
pub use registry::{InstanceHealth, Registration, RegistryStats, ServiceDescriptor, ServiceRegistry};
pub use trace::{
    CORRELATION_ID_HEADER, LogSink, NoopSink, SpanSink, SpanStatus, TRACE_ID_HEADER,
    TRACEPARENT_HEADER, TraceContext, TraceSpan, Tracer,
};

pub use platform_common::{
    Admission, CircuitBreakerConfig, CircuitOpenError, CircuitState, RetryConfig,
};
