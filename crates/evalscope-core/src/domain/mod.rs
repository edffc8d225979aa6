//! Domain models for evalscope.
//!
//! Canonical definitions for the core entities:
//! - `EvalRun`: one invocation of an evaluation suite
//! - `ExperimentCase`: one dataset record under evaluation
//! - `Trial` / `TrialOutcome`: one task execution and its terminal state
//! - `ScoreResult` / `ScorerAggregate`: per-trial scores and their reduction
//! - `Correlation`: link target in a production trace

pub mod correlation;
pub mod digest;
pub mod error;
pub mod eval;

pub use correlation::Correlation;
pub use error::{ConfigError, ErrorKind, EvalError, EvalResult};
pub use eval::{
    CaseRecord, CaseResult, EvalRun, ExperimentCase, ScoreResult, ScorerAggregate, ScorerFailure,
    Trial, TrialError, TrialErrorKind, TrialOutcome,
};
