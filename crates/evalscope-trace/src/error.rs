//! Error types for evalscope-trace

use thiserror::Error;

/// Errors produced when parsing or validating trace identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// Trace id was not 32 lowercase hex characters (or was all zeros)
    #[error("Invalid trace id: {0:?}")]
    InvalidTraceId(String),

    /// Span id was not 16 lowercase hex characters (or was all zeros)
    #[error("Invalid span id: {0:?}")]
    InvalidSpanId(String),
}

/// Result type for evalscope-trace operations
pub type TraceResult<T> = std::result::Result<T, TraceError>;
