//! Tracing hooks for outbound calls.
//!
//! A [`Tracer`] opens a [`TraceSpan`] per call and hands it to a
//! [`SpanSink`] when the span finishes. Components always hold a tracer; the
//! default sink is [`NoopSink`], so call sites never branch on whether
//! tracing is configured.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::FabricError;

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// W3C vendor state header.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Plain trace id header.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Correlation id header, stable across every hop of one logical request.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// W3C Trace Context for distributed tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// W3C traceparent header value
    pub traceparent: String,
    /// Optional tracestate header value
    pub tracestate: Option<String>,
}

impl TraceContext {
    /// Create a new trace context.
    #[must_use]
    pub fn new(traceparent: impl Into<String>) -> Self {
        Self {
            traceparent: traceparent.into(),
            tracestate: None,
        }
    }

    /// Context for a span, sampled.
    #[must_use]
    pub fn for_span(trace_id: &str, span_id: &str) -> Self {
        Self::new(format!("00-{trace_id}-{span_id}-01"))
    }

    /// Create with tracestate.
    #[must_use]
    pub fn with_tracestate(mut self, tracestate: impl Into<String>) -> Self {
        self.tracestate = Some(tracestate.into());
        self
    }

    /// Read a valid context from inbound headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let traceparent = headers.get(TRACEPARENT_HEADER)?.to_str().ok()?;
        let mut context = Self::new(traceparent);
        if let Some(state) = headers.get(TRACESTATE_HEADER).and_then(|v| v.to_str().ok()) {
            context = context.with_tracestate(state);
        }
        context.is_valid().then_some(context)
    }

    /// Check if traceparent is valid W3C format.
    /// Format: version-trace_id-parent_id-flags (00-{32hex}-{16hex}-{2hex})
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let parts: Vec<&str> = self.traceparent.split('-').collect();
        let hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
        parts.len() == 4
            && hex(parts[0], 2)
            && hex(parts[1], 32)
            && hex(parts[2], 16)
            && hex(parts[3], 2)
    }

    /// Get the trace ID from traceparent.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.traceparent.split('-').nth(1)
    }

    /// Get the parent span ID from traceparent.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.traceparent.split('-').nth(2)
    }

    /// Get the flags from traceparent.
    #[must_use]
    pub fn flags(&self) -> Option<&str> {
        self.traceparent.split('-').nth(3)
    }

    /// Check if trace is sampled (flag bit 0 set).
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags()
            .and_then(|f| u8::from_str_radix(f, 16).ok())
            .is_some_and(|f| f & 0x01 != 0)
    }

    /// Propagate context to a new span.
    #[must_use]
    pub fn propagate(&self, new_span_id: &str) -> Self {
        let parts: Vec<&str> = self.traceparent.split('-').collect();
        if parts.len() != 4 {
            return self.clone();
        }

        Self {
            traceparent: format!("{}-{}-{}-{}", parts[0], parts[1], new_span_id, parts[3]),
            tracestate: self.tracestate.clone(),
        }
    }
}

/// Final outcome of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Still open, or closed without an outcome
    Unset,
    /// Call succeeded
    Ok,
    /// Call failed
    Error,
}

/// Timestamped event inside a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanEvent {
    /// Event name
    pub name: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Event attributes
    pub attributes: BTreeMap<String, String>,
}

/// One traced unit of work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    /// Operation name
    pub name: String,
    /// 16 hex chars
    pub span_id: String,
    /// 32 hex chars
    pub trace_id: String,
    /// Parent span, when continuing an inbound trace
    pub parent_span_id: Option<String>,
    /// Correlation id shared by the logical request
    pub correlation_id: String,
    /// Tags
    pub tags: BTreeMap<String, String>,
    /// Events in the order they were logged
    pub events: Vec<SpanEvent>,
    /// Open time
    pub start_time: DateTime<Utc>,
    /// Close time
    pub end_time: Option<DateTime<Utc>>,
    /// Outcome
    pub status: SpanStatus,
}

impl TraceSpan {
    /// Set a tag, replacing any previous value.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl ToString) {
        self.tags.insert(key.into(), value.to_string());
    }

    /// Append an event with no attributes.
    pub fn log_event(&mut self, name: impl Into<String>) {
        self.log_event_with(name, BTreeMap::new());
    }

    /// Append an event.
    pub fn log_event_with(&mut self, name: impl Into<String>, attributes: BTreeMap<String, String>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    /// Mark the span failed and log the error as an event.
    pub fn log_error(&mut self, error: &FabricError) {
        let code = error.code().as_str();
        self.status = SpanStatus::Error;
        self.set_tag("error", true);
        self.set_tag("error.code", code);
        self.log_event_with(
            "error",
            BTreeMap::from([
                ("code".to_string(), code.to_string()),
                ("message".to_string(), error.to_string()),
            ]),
        );
    }

    /// Mark the span successful.
    pub fn set_ok(&mut self) {
        self.status = SpanStatus::Ok;
    }

    /// Context to send downstream so the callee continues this trace.
    #[must_use]
    pub fn context(&self) -> TraceContext {
        TraceContext::for_span(&self.trace_id, &self.span_id)
    }

    /// Write propagation headers for this span.
    pub fn inject(&self, headers: &mut HeaderMap) {
        let values = [
            (TRACEPARENT_HEADER, self.context().traceparent),
            (TRACE_ID_HEADER, self.trace_id.clone()),
            (CORRELATION_ID_HEADER, self.correlation_id.clone()),
        ];
        for (name, value) in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = name, "Skipping unencodable trace header"),
            }
        }
    }

    /// Elapsed time, once finished.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }

    fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }
}

/// Destination for finished spans.
pub trait SpanSink: Send + Sync + Debug {
    /// Called exactly once per span, after it is closed.
    fn on_finish(&self, span: &TraceSpan);
}

/// Discards every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl SpanSink for NoopSink {
    fn on_finish(&self, _span: &TraceSpan) {}
}

/// Writes each finished span as one structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SpanSink for LogSink {
    fn on_finish(&self, span: &TraceSpan) {
        let duration_ms = span.duration().map_or(0, |d| d.as_millis());
        let target = span.tags.get("target").map_or("", String::as_str);
        match span.status {
            SpanStatus::Error => warn!(
                span = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                correlation_id = %span.correlation_id,
                target,
                error_code = span.tags.get("error.code").map_or("", String::as_str),
                duration_ms,
                "Span failed"
            ),
            SpanStatus::Ok | SpanStatus::Unset => info!(
                span = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                correlation_id = %span.correlation_id,
                target,
                duration_ms,
                "Span finished"
            ),
        }
    }
}

/// Opens and closes spans on behalf of one service.
#[derive(Debug, Clone)]
pub struct Tracer {
    service_name: String,
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    /// Tracer reporting to `sink`.
    #[must_use]
    pub fn new(service_name: impl Into<String>, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            service_name: service_name.into(),
            sink,
        }
    }

    /// Tracer that discards spans.
    #[must_use]
    pub fn noop(service_name: impl Into<String>) -> Self {
        Self::new(service_name, Arc::new(NoopSink))
    }

    /// Open a span, continuing `parent` when it is given.
    #[must_use]
    pub fn start_span(
        &self,
        name: impl Into<String>,
        parent: Option<&TraceContext>,
        correlation_id: Option<&str>,
    ) -> TraceSpan {
        let parent = parent.filter(|p| p.is_valid());
        let trace_id = parent
            .and_then(TraceContext::trace_id)
            .map_or_else(new_trace_id, str::to_string);
        let mut span = TraceSpan {
            name: name.into(),
            span_id: new_span_id(),
            parent_span_id: parent.and_then(TraceContext::parent_id).map(str::to_string),
            correlation_id: correlation_id.map_or_else(|| trace_id.clone(), str::to_string),
            trace_id,
            tags: BTreeMap::new(),
            events: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            status: SpanStatus::Unset,
        };
        span.set_tag("service", &self.service_name);
        span
    }

    /// Close `span` and hand it to the sink.
    pub fn finish(&self, mut span: TraceSpan) {
        span.finish();
        self.sink.on_finish(&span);
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
