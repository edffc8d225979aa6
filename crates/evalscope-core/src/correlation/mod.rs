//! Span Correlator: attribute vocabulary, ambient active span and the
//! mapping from evaluation records to spans and links.

pub mod attributes;
pub mod context;
pub mod correlator;

pub use context::{
    current_correlation, current_span, with_active_span, with_capability_span, ActiveSpan,
    BorrowedSpan,
};
pub use correlator::{resolve_correlation, ExperimentMeta, SpanCorrelator};
