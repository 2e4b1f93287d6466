//! Resilient service-to-service client.
//!
//! Every call runs the same lifecycle: breaker admission, registry lookup,
//! auth headers, a timed network exchange, then a breaker update. Transient
//! failures are retried with backoff; each attempt goes through the whole
//! lifecycle again, so a retry never passes an open circuit and may land on
//! a different instance.

mod metrics;
mod request;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use parking_lot::{Mutex, RwLock};
use platform_common::{HttpConfig, RetryConfig, RetryPolicy, build_http_client};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::auth::InterServiceAuth;
use crate::breaker::{BreakerStatus, CircuitBreakerSet};
use crate::error::{FabricError, FabricResult};
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::trace::{TraceSpan, Tracer};

pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use request::{RequestConfig, ServiceResponse};

/// Per-client call settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for one attempt
    pub timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryConfig,
    /// Headers sent on every call
    pub default_headers: HeaderMap,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry: RetryConfig::default(),
            default_headers: HeaderMap::new(),
        }
    }
}

impl ClientOptions {
    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the headers sent on every call.
    #[must_use]
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }
}

/// Health view of one client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHealth {
    /// Client name
    pub client: String,
    /// False while any target this client called has an open circuit
    pub healthy: bool,
    /// Breakers of the targets this client has called
    pub circuit_breakers: BTreeMap<String, BreakerStatus>,
    /// Call counters
    pub metrics: MetricsSnapshot,
}

/// Shared components every client of one node uses.
#[derive(Debug, Clone)]
struct Wiring {
    caller_service_id: String,
    registry: Arc<ServiceRegistry>,
    auth: Arc<InterServiceAuth>,
    breakers: Arc<CircuitBreakerSet>,
    tracer: Tracer,
    http: reqwest::Client,
}

/// Creates named clients that share one registry, credential store and
/// breaker set.
#[derive(Debug)]
pub struct ServiceClientFactory {
    wiring: Wiring,
    defaults: ClientOptions,
    clients: RwLock<HashMap<String, Arc<ServiceClient>>>,
}

impl ServiceClientFactory {
    /// Factory calling on behalf of `caller_service_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        caller_service_id: impl Into<String>,
        registry: Arc<ServiceRegistry>,
        auth: Arc<InterServiceAuth>,
        breakers: Arc<CircuitBreakerSet>,
        tracer: Tracer,
        defaults: ClientOptions,
    ) -> FabricResult<Self> {
        let caller_service_id = caller_service_id.into();
        let http = build_http_client(&HttpConfig::for_service(&caller_service_id))
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            wiring: Wiring {
                caller_service_id,
                registry,
                auth,
                breakers,
                tracer,
                http,
            },
            defaults,
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// Options new clients get when none are given.
    #[must_use]
    pub const fn default_options(&self) -> &ClientOptions {
        &self.defaults
    }

    /// Create a client, replacing any previous client of the same name.
    pub fn create_client(&self, name: &str, options: Option<ClientOptions>) -> Arc<ServiceClient> {
        let options = options.unwrap_or_else(|| self.defaults.clone());
        let client = Arc::new(ServiceClient {
            name: name.to_string(),
            retry: RetryPolicy::new(options.retry.clone()),
            options,
            wiring: self.wiring.clone(),
            metrics: ClientMetrics::new(name),
            targets: RwLock::new(BTreeSet::new()),
        });
        self.clients.write().insert(name.to_string(), Arc::clone(&client));
        debug!(client = name, "Service client created");
        client
    }

    /// Previously created client.
    #[must_use]
    pub fn client(&self, name: &str) -> Option<Arc<ServiceClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Every breaker created by any client of this factory.
    #[must_use]
    pub fn get_circuit_breaker_states(&self) -> BTreeMap<String, BreakerStatus> {
        self.wiring.breakers.snapshot_all()
    }

    /// Health of every client, sorted by name.
    #[must_use]
    pub fn get_health_status(&self) -> Vec<ClientHealth> {
        let mut health: Vec<ClientHealth> = self
            .clients
            .read()
            .values()
            .map(|c| c.get_health_status())
            .collect();
        health.sort_by(|a, b| a.client.cmp(&b.client));
        health
    }

    /// Prometheus text for every client.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.clients
            .read()
            .values()
            .map(|c| c.metrics.to_prometheus())
            .collect()
    }
}

/// Named client able to call any registered service.
#[derive(Debug)]
pub struct ServiceClient {
    name: String,
    options: ClientOptions,
    retry: RetryPolicy,
    wiring: Wiring,
    metrics: ClientMetrics,
    targets: RwLock<BTreeSet<String>>,
}

impl ServiceClient {
    /// Client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call counters.
    #[must_use]
    pub const fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    /// `GET path` on `target`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::request`].
    pub async fn get(&self, target: &str, path: &str) -> FabricResult<ServiceResponse> {
        self.request(target, RequestConfig::get(path)).await
    }

    /// `POST path` on `target` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::request`].
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        target: &str,
        path: &str,
        body: &T,
    ) -> FabricResult<ServiceResponse> {
        self.request(target, RequestConfig::post(path).with_json(body)?).await
    }

    /// `PUT path` on `target` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::request`].
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        target: &str,
        path: &str,
        body: &T,
    ) -> FabricResult<ServiceResponse> {
        self.request(target, RequestConfig::put(path).with_json(body)?).await
    }

    /// `DELETE path` on `target`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::request`].
    pub async fn delete(&self, target: &str, path: &str) -> FabricResult<ServiceResponse> {
        self.request(target, RequestConfig::delete(path)).await
    }

    /// Call `target`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`FabricError::CircuitOpen`] without any network I/O
    /// - [`FabricError::ServiceNotFound`] or [`FabricError::NoHealthyInstance`]
    /// - [`FabricError::UnknownService`] if this node has no credential
    /// - [`FabricError::PermissionDenied`] on a 403
    /// - [`FabricError::Timeout`] or [`FabricError::Network`] once retries
    ///   are exhausted
    #[instrument(
        skip(self, target, config),
        fields(client = %self.name, target_service = %target, method = %config.method, path = %config.path)
    )]
    pub async fn request(&self, target: &str, config: RequestConfig) -> FabricResult<ServiceResponse> {
        if !self.targets.read().contains(target) {
            self.targets.write().insert(target.to_string());
        }
        self.metrics.requests_total.inc();
        self.metrics.in_flight.inc();
        let started = Instant::now();

        let mut span = self.wiring.tracer.start_span(
            format!("{} {target}", config.method),
            config.parent.as_ref(),
            config.correlation_id.as_deref(),
        );
        span.set_tag("target", target);
        span.set_tag("client", &self.name);
        span.set_tag("http.method", &config.method);
        span.set_tag("http.path", &config.path);

        let attempts = AtomicU32::new(0);
        let span = Mutex::new(span);
        let result = self
            .retry
            .execute(|| {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if attempt > 1 {
                    self.metrics.retries_total.inc();
                }
                self.attempt(target, &config, &span, attempt)
            })
            .await;

        let mut span = span.into_inner();
        let attempts = attempts.into_inner();
        span.set_tag("attempts", attempts);
        span.set_tag("duration_ms", started.elapsed().as_millis());
        match &result {
            Ok(response) => {
                span.set_tag("outcome", "success");
                span.set_tag("http.status", response.status.as_u16());
                span.set_ok();
            }
            Err(error) => {
                if matches!(error, FabricError::CircuitOpen { .. }) {
                    self.metrics.circuit_rejections_total.inc();
                }
                self.metrics.failures_total.inc();
                span.set_tag("outcome", "failure");
                span.log_error(error);
                warn!(
                    target_service = %target,
                    error_code = error.code().as_str(),
                    attempts,
                    error = %error,
                    "Service call failed"
                );
            }
        }
        self.wiring.tracer.finish(span);
        self.metrics.in_flight.dec();
        result
    }

    /// One pass through the lifecycle; a failure is logged on the span
    /// whether or not it will be retried.
    async fn attempt(
        &self,
        target: &str,
        config: &RequestConfig,
        span: &Mutex<TraceSpan>,
        attempt: u32,
    ) -> FabricResult<ServiceResponse> {
        let result = self.call_once(target, config, span).await;
        if let Err(error) = &result {
            span.lock().log_event_with(
                "attempt_failed",
                BTreeMap::from([
                    ("attempt".to_string(), attempt.to_string()),
                    ("code".to_string(), error.code().as_str().to_string()),
                    ("message".to_string(), error.to_string()),
                ]),
            );
        }
        result
    }

    async fn call_once(
        &self,
        target: &str,
        config: &RequestConfig,
        span: &Mutex<TraceSpan>,
    ) -> FabricResult<ServiceResponse> {
        let breakers = &self.wiring.breakers;
        let admission = breakers.before_call(target)?;

        let prepared = {
            let span = span.lock();
            self.prepare(target, config, &span)
        };
        let (instance, headers) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                // Nothing reached the target, so the breaker must not count it.
                breakers.release(target, admission);
                return Err(error);
            }
        };

        let result = self.send(target, &instance, config, headers).await;
        match &result {
            Ok(_) => breakers.record_success(target, admission),
            Err(error) => breakers.record_failure(target, admission, error),
        }
        result
    }

    fn prepare(
        &self,
        target: &str,
        config: &RequestConfig,
        span: &TraceSpan,
    ) -> FabricResult<(ServiceDescriptor, HeaderMap)> {
        let instance = self.wiring.registry.get_service(target)?;
        let auth_headers = self
            .wiring
            .auth
            .get_auth_headers(&self.wiring.caller_service_id, Some(target))?;

        let mut headers = self.options.default_headers.clone();
        headers.extend(config.headers.clone());
        headers.extend(auth_headers);
        span.inject(&mut headers);
        Ok((instance, headers))
    }

    async fn send(
        &self,
        target: &str,
        instance: &ServiceDescriptor,
        config: &RequestConfig,
        headers: HeaderMap,
    ) -> FabricResult<ServiceResponse> {
        let url = format!("{}{}", instance.url, config.path);
        let mut builder = self
            .wiring
            .http
            .request(config.method.clone(), &url)
            .headers(headers);
        if !config.query.is_empty() {
            builder = builder.query(&config.query);
        }
        if let Some(body) = &config.body {
            builder = builder.json(body);
        }

        let timeout = config.timeout.unwrap_or(self.options.timeout);
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let data = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, data))
        };

        let timed_out = || FabricError::Timeout {
            service: target.to_string(),
            duration: timeout,
        };
        let (status, headers, data) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => return Err(timed_out()),
            Ok(Err(e)) if e.is_timeout() => return Err(timed_out()),
            Ok(Err(e)) => {
                return Err(FabricError::network(
                    target,
                    e.status().map(|s| s.as_u16()),
                    e.to_string(),
                ));
            }
            Ok(Ok(parts)) => parts,
        };

        if status == StatusCode::FORBIDDEN {
            return Err(FabricError::PermissionDenied {
                service_id: self.wiring.caller_service_id.clone(),
                permission: format!("{} {} on {target}", config.method, config.path),
            });
        }
        if !status.is_success() {
            return Err(FabricError::network(
                target,
                Some(status.as_u16()),
                format!("{} {} returned {status}", config.method, config.path),
            ));
        }

        debug!(target_service = %target, url = %url, status = status.as_u16(), "Service call succeeded");
        Ok(ServiceResponse {
            status,
            headers,
            data,
            instance_url: instance.url.clone(),
        })
    }

    /// Breakers of the targets this client has called.
    #[must_use]
    pub fn get_circuit_breaker_states(&self) -> BTreeMap<String, BreakerStatus> {
        let targets = self.targets.read();
        self.wiring
            .breakers
            .snapshot_all()
            .into_iter()
            .filter(|(target, _)| targets.contains(target))
            .collect()
    }

    /// Breaker states plus call counters.
    #[must_use]
    pub fn get_health_status(&self) -> ClientHealth {
        let circuit_breakers = self.get_circuit_breaker_states();
        ClientHealth {
            client: self.name.clone(),
            healthy: circuit_breakers.values().all(|b| b.state != "open"),
            circuit_breakers,
            metrics: self.metrics.snapshot(),
        }
    }
}
