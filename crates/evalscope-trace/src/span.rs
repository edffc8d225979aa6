//! Tracer and span trait definitions
//!
//! These traits describe the tracing capability the evaluation runtime
//! consumes:
//! - `Tracer`: starts spans with a name, optional parent, attributes and links
//! - `Span`: attribute updates, terminal status, exceptions, links, end
//!
//! Backends are pluggable. `fakes::MemoryTracer` records spans for tests and
//! `LogTracer` forwards span lifecycles to the `tracing` ecosystem.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TraceError, TraceResult};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

fn is_valid_hex_id(s: &str, len: usize) -> bool {
    s.len() == len && hex::decode(s).is_ok_and(|bytes| bytes.iter().any(|b| *b != 0))
}

/// W3C trace id: 32 lowercase hex chars, never all zeros.
///
/// The inner field is private so a `TraceId` is always valid (and therefore
/// never empty) once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn generate() -> Self {
        TraceId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TraceId {
    type Error = TraceError;

    fn try_from(s: String) -> TraceResult<Self> {
        let lower = s.to_ascii_lowercase();
        if !is_valid_hex_id(&lower, 32) {
            return Err(TraceError::InvalidTraceId(s));
        }
        Ok(TraceId(lower))
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// W3C span id: 16 lowercase hex chars, never all zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(String);

impl SpanId {
    /// Generate a fresh random span id.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        SpanId(hex::encode(&uuid.as_bytes()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SpanId {
    type Error = TraceError;

    fn try_from(s: String) -> TraceResult<Self> {
        let lower = s.to_ascii_lowercase();
        if !is_valid_hex_id(&lower, 16) {
            return Err(TraceError::InvalidSpanId(s));
        }
        Ok(SpanId(lower))
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a span within a trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }

    /// Context for a child of `parent` (same trace), or a new root when
    /// `parent` is `None`.
    pub fn child_of(parent: Option<&SpanContext>) -> Self {
        let trace_id = parent
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(TraceId::generate);
        Self {
            trace_id,
            span_id: SpanId::generate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attributes, status, links
// ---------------------------------------------------------------------------

/// A span attribute value. Structured JSON is flattened to a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrArray(Vec<String>),
}

impl AttrValue {
    /// Convert arbitrary JSON into an attribute value. Scalars map to their
    /// natural variant; arrays and objects are serialized to a JSON string.
    pub fn json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => AttrValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => AttrValue::Str(s.clone()),
            other => AttrValue::Str(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(x) => write!(f, "{x}"),
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::StrArray(items) => write!(f, "[{}]", items.join(",")),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<usize> for AttrValue {
    fn from(v: usize) -> Self {
        AttrValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::StrArray(v)
    }
}

/// Attribute bag keyed by attribute name.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Terminal status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error {
        message: String,
    },
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

/// Non-hierarchical reference from one span to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub context: SpanContext,
    pub attributes: Attributes,
}

impl SpanLink {
    pub fn new(context: SpanContext) -> Self {
        Self {
            context,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// Everything needed to start a span.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    pub name: String,
    pub parent: Option<SpanContext>,
    pub attributes: Attributes,
    pub links: Vec<SpanLink>,
}

impl SpanOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: Option<SpanContext>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_link(mut self, link: SpanLink) -> Self {
        self.links.push(link);
        self
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A live span. Methods take `&self` so a span can be shared behind an `Arc`
/// between the code that started it and code running inside its scope.
///
/// Guarantees expected from implementations:
/// - `context()` is stable for the lifetime of the span.
/// - Calls after `end()` are ignored.
pub trait Span: Send + Sync {
    fn context(&self) -> SpanContext;

    fn set_attribute(&self, key: &str, value: AttrValue);

    fn set_status(&self, status: SpanStatus);

    fn record_exception(&self, message: &str);

    fn add_link(&self, link: SpanLink);

    fn end(&self);
}

/// Span factory.
pub trait Tracer: Send + Sync {
    fn start_span(&self, options: SpanOptions) -> Arc<dyn Span>;
}
