//! Domain-level error taxonomy for evalscope.

use serde::{Deserialize, Serialize};

/// Errors produced by flag/fact schema validation and suite definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown flag path: {path}")]
    UnknownFlag { path: String },

    #[error("unknown fact path: {path}")]
    UnknownFact { path: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("type mismatch at {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("flag {path} is outside the namespaces this suite may override ({allowed})")]
    NamespaceNotAllowed { path: String, allowed: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid suite definition: {0}")]
    InvalidSuite(String),

    #[error("NaN/Infinity not permitted in canonical JSON")]
    NonFiniteNumber,
}

/// Coarse classification of an [`EvalError`], stable for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Task,
    Scorer,
    Timeout,
    Correlation,
    Internal,
}

/// evalscope domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("task failed: {message}")]
    Task { message: String },

    #[error("scorer {scorer} failed: {message}")]
    Scorer { scorer: String, message: String },

    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    #[error("correlation error: {0}")]
    Correlation(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::Config(_) => ErrorKind::Config,
            EvalError::Task { .. } => ErrorKind::Task,
            EvalError::Scorer { .. } => ErrorKind::Scorer,
            EvalError::Timeout { .. } => ErrorKind::Timeout,
            EvalError::Correlation(_) => ErrorKind::Correlation,
            EvalError::Dataset(_) | EvalError::Serialization(_) | EvalError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<evalscope_trace::TraceError> for EvalError {
    fn from(err: evalscope_trace::TraceError) -> Self {
        EvalError::Correlation(err.to_string())
    }
}

/// Result type for evalscope domain operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
