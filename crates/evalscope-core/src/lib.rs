//! evalscope core library
//!
//! Runs evaluation suites (dataset cases through a task, N trials per case,
//! scored and aggregated per scorer) and correlates evaluation spans with
//! the production traces that produced the evaluated artifacts.
//!
//! ## Key Components
//!
//! - `flags`: ambient, task-scoped flag overrides over a declared schema
//! - `aggregation`: mean / median / pass@k / pass^k reductions
//! - `scorer`: uniform invocation of sync and async scoring functions
//! - `trial` / `runner`: trial execution and per-case orchestration
//! - `correlation`: span vocabulary, ambient active span, span links
//! - `online`: awaited and fire-and-forget online evaluation
//! - `suite`: suite definition, registry and runs
//! - `reporting`: serializable run reports

pub mod aggregation;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod flags;
pub mod metrics;
pub mod obs;
pub mod online;
pub mod reporting;
pub mod runner;
pub mod scorer;
pub mod suite;
pub mod telemetry;
pub mod trial;

pub use evalscope_trace;

pub use aggregation::Aggregation;
pub use config::RunnerConfig;
pub use correlation::{
    current_correlation, current_span, with_capability_span, ExperimentMeta, SpanCorrelator,
};
pub use domain::{
    CaseRecord, CaseResult, ConfigError, Correlation, ErrorKind, EvalError, EvalResult, EvalRun,
    ExperimentCase, ScoreResult, ScorerAggregate, ScorerFailure, Trial, TrialError,
    TrialErrorKind, TrialOutcome,
};
pub use flags::{
    create_app_scope, pick_flags, AppScope, AppScopeConfig, FlagOverrides, FlagSchema, FlagScope,
};
pub use online::{
    online_eval, OnlineEvalFailure, OnlineEvalOutcome, OnlineEvalRequest, OnlineEvaluator,
};
pub use reporting::{render_report_md, write_eval_report_json, EvalReport, ScorerSummary};
pub use runner::{aggregate_case, CaseRunner};
pub use scorer::{ScoreValue, Scorer, ScorerArgs};
pub use suite::{
    define_eval_suite, DataSource, DatasetSupplier, EvalRunOptions, EvalSuite, EvalSuiteOptions,
    SuiteRegistry,
};
pub use trial::{Task, TaskInput};
