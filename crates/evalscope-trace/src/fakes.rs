//! In-memory tracer (testing only)
//!
//! `MemoryTracer` records every span it starts so tests can assert on names,
//! parentage, attributes, status, exceptions and links without an exporter.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::span::*;

/// Immutable snapshot of a recorded span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    pub name: String,
    pub context: SpanContext,
    pub parent: Option<SpanContext>,
    pub attributes: Attributes,
    pub status: SpanStatus,
    pub exceptions: Vec<String>,
    pub links: Vec<SpanLink>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SpanData {
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Span recorded by [`MemoryTracer`].
#[derive(Debug)]
pub struct MemorySpan {
    data: Mutex<SpanData>,
}

impl MemorySpan {
    fn lock(&self) -> MutexGuard<'_, SpanData> {
        // A poisoned lock still holds consistent span data.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SpanData {
        self.lock().clone()
    }
}

impl Span for MemorySpan {
    fn context(&self) -> SpanContext {
        self.lock().context.clone()
    }

    fn set_attribute(&self, key: &str, value: AttrValue) {
        let mut data = self.lock();
        if data.ended_at.is_none() {
            data.attributes.insert(key.to_string(), value);
        }
    }

    /// Follows OpenTelemetry semantics: `Unset` is ignored and `Ok` is final.
    fn set_status(&self, status: SpanStatus) {
        let mut data = self.lock();
        if data.ended_at.is_some() || status == SpanStatus::Unset || data.status == SpanStatus::Ok
        {
            return;
        }
        data.status = status;
    }

    fn record_exception(&self, message: &str) {
        let mut data = self.lock();
        if data.ended_at.is_none() {
            data.exceptions.push(message.to_string());
        }
    }

    fn add_link(&self, link: SpanLink) {
        let mut data = self.lock();
        if data.ended_at.is_none() {
            data.links.push(link);
        }
    }

    fn end(&self) {
        let mut data = self.lock();
        if data.ended_at.is_none() {
            data.ended_at = Some(Utc::now());
        }
    }
}

/// Tracer that keeps every started span in memory.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    spans: Mutex<Vec<Arc<MemorySpan>>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<MemorySpan>>> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshots of all spans in start order.
    pub fn spans(&self) -> Vec<SpanData> {
        self.lock().iter().map(|s| s.snapshot()).collect()
    }

    /// Snapshots of spans whose name starts with `prefix`.
    pub fn spans_named(&self, prefix: &str) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(|s| s.name.starts_with(prefix))
            .collect()
    }

    /// Find a span by its context.
    pub fn find(&self, context: &SpanContext) -> Option<SpanData> {
        self.spans().into_iter().find(|s| &s.context == context)
    }

    /// Direct children of `parent`.
    pub fn children_of(&self, parent: &SpanContext) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(|s| s.parent.as_ref() == Some(parent))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Tracer for MemoryTracer {
    fn start_span(&self, options: SpanOptions) -> Arc<dyn Span> {
        let span = Arc::new(MemorySpan {
            data: Mutex::new(SpanData {
                name: options.name,
                context: SpanContext::child_of(options.parent.as_ref()),
                parent: options.parent,
                attributes: options.attributes,
                status: SpanStatus::Unset,
                exceptions: Vec::new(),
                links: options.links,
                started_at: Utc::now(),
                ended_at: None,
            }),
        });
        self.lock().push(Arc::clone(&span));
        span
    }
}
