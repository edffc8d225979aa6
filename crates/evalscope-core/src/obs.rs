//! Structured observability hooks for evaluation lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `EvalRunSpan` RAII guard
//! - Emission functions for run start/finish, trial and scorer failures,
//!   and online evaluation dispatch/failure
//!
//! Events are emitted at `info!` level, failures at `warn!` (configurable via
//! the `EVALSCOPE_LOG` env var). For JSON output, set `EVALSCOPE_LOG_FORMAT=json`.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a
/// synchronous section of a run.
///
/// # Example
///
/// ```ignore
/// let _span = EvalRunSpan::enter("3f0c...", "qa-suite");
/// // tracing calls here carry run_id and suite
/// ```
pub struct EvalRunSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvalRunSpan {
    /// Create and enter a span tagged with the run id and suite name.
    pub fn enter(run_id: &str, suite: &str) -> Self {
        Self {
            _span: run_span(run_id, suite).entered(),
        }
    }
}

/// The un-entered run span, for instrumenting futures.
pub fn run_span(run_id: &str, suite: &str) -> tracing::Span {
    tracing::info_span!("evalscope.run", run_id = %run_id, suite = %suite)
}

/// Emit event: run started.
///
/// # Example
///
/// ```ignore
/// emit_run_started("run-123", "qa-suite", 12, 3);
/// // logs: event=run.started run_id=run-123 suite=qa-suite cases=12 trials=3
/// ```
pub fn emit_run_started(run_id: &str, suite: &str, cases: usize, trials: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        suite = %suite,
        cases = cases,
        trials = trials,
    );
}

/// Emit event: run finished with duration and failure counts.
pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    failed_trials: usize,
    scorer_failures: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed_trials = failed_trials,
        scorer_failures = scorer_failures,
    );
}

/// Emit event: a trial settled as failed (warning level).
pub fn emit_trial_failed(case_index: usize, trial: u32, kind: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "trial.failed",
        case_index = case_index,
        trial = trial,
        kind = %kind,
        error = %error,
    );
}

/// Emit event: a scorer produced no result for a trial (warning level).
pub fn emit_scorer_failed(scorer: &str, trial: u32, error: &dyn std::fmt::Display) {
    warn!(event = "scorer.failed", scorer = %scorer, trial = trial, error = %error);
}

/// Emit event: an online evaluation was handed to a background task.
pub fn emit_online_eval_dispatched(capability: &str, trace_id: &str, scorers: usize) {
    info!(
        event = "online_eval.dispatched",
        capability = %capability,
        trace_id = %trace_id,
        scorers = scorers,
    );
}

/// Emit event: an online evaluation failed (warning level). This is the log
/// sink of the online error channel.
pub fn emit_online_eval_failed(capability: &str, error: &dyn std::fmt::Display) {
    warn!(event = "online_eval.failed", capability = %capability, error = %error);
}

/// Emit event: a scorer failed during an online evaluation.
pub fn emit_online_scorer_failed(capability: &str, scorer: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "online_eval.scorer_failed",
        capability = %capability,
        scorer = %scorer,
        error = %error,
    );
}

/// Emit event: `pick_flags` was asked for a namespace the schema lacks.
pub fn emit_unknown_namespace(namespace: &str) {
    warn!(event = "flags.unknown_namespace", namespace = %namespace);
}
