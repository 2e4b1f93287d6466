//! Shared library for cross-cutting concerns in TalentSphere Rust services.
//!
//! This crate provides centralized implementations for:
//! - Circuit breaker state machine for a single downstream target
//! - Retry policies with exponential backoff
//! - HTTP client configuration and building
//! - Tracing subscriber initialisation
//! - Lightweight counters and gauges in Prometheus text format

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod http;
pub mod metrics;
pub mod retry;
pub mod tracing_config;

pub use circuit_breaker::{
    Admission, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError,
    CircuitState,
};
pub use http::{HttpConfig, build_http_client};
pub use metrics::{Counter, Gauge};
pub use retry::{RetryConfig, RetryPolicy, Retryable};
pub use tracing_config::{TracingConfig, init_tracing};
