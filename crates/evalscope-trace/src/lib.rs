//! evalscope-trace: tracing capability consumed by the evalscope runtime
//!
//! The evaluation core never sets up a telemetry backend itself. It talks to
//! a [`Tracer`] that can start spans with attributes, set terminal status,
//! record exceptions, end spans and link one span context to another.
//!
//! ## Key Components
//!
//! - `Tracer` / `Span`: the backend-agnostic traits
//! - `TraceId` / `SpanId` / `SpanContext`: validated W3C identifiers
//! - `fakes::MemoryTracer`: records spans for assertions in tests
//! - `LogTracer`: forwards span lifecycles to `tracing` subscribers

mod error;
pub mod fakes;
mod log_tracer;
pub mod span;

pub use error::{TraceError, TraceResult};
pub use log_tracer::{LogSpan, LogTracer};
pub use span::{
    AttrValue, Attributes, Span, SpanContext, SpanId, SpanLink, SpanOptions, SpanStatus, TraceId,
    Tracer,
};
