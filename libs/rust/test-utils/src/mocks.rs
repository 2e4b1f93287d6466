//! Test doubles.

use parking_lot::Mutex;
use service_fabric::{SpanSink, SpanStatus, TraceSpan};

/// Span sink that keeps every finished span for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    spans: Mutex<Vec<TraceSpan>>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every span recorded so far, in finish order.
    #[must_use]
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans.lock().clone()
    }

    /// Spans tagged with `target`.
    #[must_use]
    pub fn spans_for(&self, target: &str) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.tags.get("target").is_some_and(|t| t == target))
            .cloned()
            .collect()
    }

    /// Number of failed spans.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.status == SpanStatus::Error)
            .count()
    }

    /// Forget every span.
    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl SpanSink for RecordingSink {
    fn on_finish(&self, span: &TraceSpan) {
        self.spans.lock().push(span.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_fabric::Tracer;
    use std::sync::Arc;

    #[test]
    fn test_records_finished_spans() {
        let sink = Arc::new(RecordingSink::new());
        let tracer = Tracer::new("user-service", sink.clone());

        let mut span = tracer.start_span("GET job-service", None, None);
        span.set_tag("target", "job-service");
        span.set_ok();
        tracer.finish(span);

        assert_eq!(sink.spans().len(), 1);
        assert_eq!(sink.spans_for("job-service").len(), 1);
        assert!(sink.spans_for("user-service").is_empty());
        assert_eq!(sink.error_count(), 0);

        sink.clear();
        assert!(sink.spans().is_empty());
    }
}
