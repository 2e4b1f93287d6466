//! Request and response types for [`super::ServiceClient`].

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::FabricResult;
use crate::trace::TraceContext;

/// One outbound call, minus the target.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// HTTP method
    pub method: Method,
    /// Path appended to the instance URL, always starting with `/`
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Extra headers; auth and trace headers take precedence
    pub headers: HeaderMap,
    /// Overrides the client timeout for this call
    pub timeout: Option<Duration>,
    /// Correlation id to propagate instead of a fresh one
    pub correlation_id: Option<String>,
    /// Inbound trace to continue
    pub parent: Option<TraceContext>,
}

impl RequestConfig {
    /// Request with no body, query or extra headers.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            path: if path.starts_with('/') { path } else { format!("/{path}") },
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            correlation_id: None,
            parent: None,
        }
    }

    /// `GET path`
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `DELETE path`
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `body` cannot be encoded.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> FabricResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Correlation id to propagate.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Continue an inbound trace.
    #[must_use]
    pub fn with_parent(mut self, parent: TraceContext) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Successful response from a target.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    /// HTTP status, always 2xx
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub data: Bytes,
    /// Base URL of the instance that answered
    pub instance_url: String,
}

impl ServiceResponse {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> FabricResult<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_path_normalized() {
        assert_eq!(RequestConfig::get("jobs").path, "/jobs");
        assert_eq!(RequestConfig::get("/jobs").path, "/jobs");
    }

    #[test]
    fn test_builder() {
        let config = RequestConfig::post("/jobs")
            .with_query("page", "2")
            .with_json(&serde_json::json!({"title": "Engineer"}))
            .unwrap()
            .with_timeout(Duration::from_millis(250))
            .with_correlation_id("req-1");

        assert_eq!(config.method, Method::POST);
        assert_eq!(config.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(config.body.unwrap()["title"], "Engineer");
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.correlation_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_response_json() {
        #[derive(Deserialize)]
        struct Job {
            id: u32,
        }

        let response = ServiceResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            data: Bytes::from_static(br#"{"id": 7}"#),
            instance_url: "http://localhost:3003".to_string(),
        };
        assert_eq!(response.json::<Job>().unwrap().id, 7);
        assert!(response.json::<Vec<u32>>().is_err());
        assert_eq!(response.text(), r#"{"id": 7}"#);
    }
}
