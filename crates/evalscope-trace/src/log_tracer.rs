//! Tracer that forwards span lifecycles to the `tracing` ecosystem.
//!
//! Useful when no telemetry exporter is wired up: every span becomes a
//! `tracing` span named `evalscope.span`, and attribute/status/link updates
//! become events inside it, so they show up in whatever subscriber the
//! process installed.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::span::*;

#[derive(Debug)]
struct LogSpanState {
    status: SpanStatus,
    ended: bool,
}

/// Span produced by [`LogTracer`].
#[derive(Debug)]
pub struct LogSpan {
    context: SpanContext,
    name: String,
    inner: tracing::Span,
    state: Mutex<LogSpanState>,
}

impl LogSpan {
    fn is_ended(&self) -> bool {
        self.state.lock().map(|s| s.ended).unwrap_or(true)
    }
}

impl Span for LogSpan {
    fn context(&self) -> SpanContext {
        self.context.clone()
    }

    fn set_attribute(&self, key: &str, value: AttrValue) {
        if self.is_ended() {
            return;
        }
        debug!(parent: &self.inner, event = "span.attribute", key = %key, value = %value);
    }

    fn set_status(&self, status: SpanStatus) {
        if let Ok(mut state) = self.state.lock() {
            if state.ended || status == SpanStatus::Unset || state.status == SpanStatus::Ok {
                return;
            }
            state.status = status;
        }
    }

    fn record_exception(&self, message: &str) {
        if self.is_ended() {
            return;
        }
        warn!(parent: &self.inner, event = "span.exception", message = %message);
    }

    fn add_link(&self, link: SpanLink) {
        if self.is_ended() {
            return;
        }
        debug!(
            parent: &self.inner,
            event = "span.link",
            linked_trace_id = %link.context.trace_id,
            linked_span_id = %link.context.span_id,
        );
    }

    fn end(&self) {
        let status = match self.state.lock() {
            Ok(mut state) if !state.ended => {
                state.ended = true;
                state.status.clone()
            }
            _ => return,
        };
        match status {
            SpanStatus::Error { message } => {
                warn!(parent: &self.inner, event = "span.ended", name = %self.name, status = "error", message = %message)
            }
            SpanStatus::Ok => {
                info!(parent: &self.inner, event = "span.ended", name = %self.name, status = "ok")
            }
            SpanStatus::Unset => {
                info!(parent: &self.inner, event = "span.ended", name = %self.name, status = "unset")
            }
        }
    }
}

/// Tracer backed by `tracing` spans and events.
#[derive(Debug, Default, Clone)]
pub struct LogTracer;

impl LogTracer {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, options: SpanOptions) -> Arc<dyn Span> {
        let context = SpanContext::child_of(options.parent.as_ref());
        let inner = tracing::info_span!(
            "evalscope.span",
            otel.name = %options.name,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );
        for (key, value) in &options.attributes {
            debug!(parent: &inner, event = "span.attribute", key = %key, value = %value);
        }
        for link in &options.links {
            debug!(
                parent: &inner,
                event = "span.link",
                linked_trace_id = %link.context.trace_id,
                linked_span_id = %link.context.span_id,
            );
        }
        Arc::new(LogSpan {
            context,
            name: options.name,
            inner,
            state: Mutex::new(LogSpanState {
                status: SpanStatus::Unset,
                ended: false,
            }),
        })
    }
}
