//! Trial Executor: one task invocation under its own flag frame and span.
//!
//! A trial is `Pending -> Running -> Succeeded | Failed` and settles exactly
//! once. Errors, panics and timeouts in the task become a `Failed` outcome;
//! nothing is re-thrown to the Case Runner. Scorers only run against a
//! succeeded trial's output.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use evalscope_trace::SpanContext;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::RunnerConfig;
use crate::correlation::{with_active_span, ActiveSpan, BorrowedSpan, SpanCorrelator};
use crate::domain::{
    ExperimentCase, ScoreResult, ScorerFailure, Trial, TrialError, TrialErrorKind, TrialOutcome,
};
use crate::flags::{enter_frame, FlagOverrides, ScopeFrame};
use crate::metrics::METRICS;
use crate::obs;
use crate::scorer::{panic_message, Scorer, ScorerArgs};

/// What the task function receives for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInput {
    pub input: Value,
    pub metadata: Map<String, Value>,
    /// 1-based trial index.
    pub trial: u32,
}

type TaskFn = dyn Fn(TaskInput) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// The function under evaluation.
#[derive(Clone)]
pub struct Task {
    name: String,
    func: Arc<TaskFn>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |input: TaskInput| f(input).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything shared by the trials of one case.
pub struct TrialPlan<'a> {
    pub task: &'a Task,
    pub scorers: &'a [Scorer],
    pub case: &'a ExperimentCase,
    /// Span the task spans are parented to.
    pub case_span: Option<&'a SpanContext>,
    pub correlator: &'a SpanCorrelator,
    /// Frame holding the case's effective overrides. Each trial gets its own
    /// child so access and fact records stay per-trial.
    pub base_frame: &'a ScopeFrame,
    pub config: &'a RunnerConfig,
    pub capability: &'a str,
    pub step: Option<&'a str>,
}

/// Run trial `index` of `plan.case` to a terminal state and score it.
pub async fn execute_trial(plan: &TrialPlan<'_>, index: u32) -> Trial {
    let span = plan
        .correlator
        .start_task_span(plan.case_span, plan.task.name(), index);
    let frame = Arc::new(plan.base_frame.child(&FlagOverrides::new()));
    // The task sees its span but cannot settle it; status follows the outcome.
    let active = ActiveSpan::new(BorrowedSpan::wrap(Arc::clone(&span)))
        .with_capability(plan.capability, plan.step);

    let func = Arc::clone(&plan.task.func);
    let input = TaskInput {
        input: plan.case.input.clone(),
        metadata: plan.case.metadata.clone(),
        trial: index,
    };
    let call = AssertUnwindSafe(async move { func(input).await }).catch_unwind();
    // Dropping `scoped` on timeout tears down both the frame and the active
    // span along with the task future.
    let scoped = enter_frame(Arc::clone(&frame), with_active_span(active, call));

    let started = Instant::now();
    let limit = plan.config.trial_timeout();
    let outcome = match tokio::time::timeout(limit, scoped).await {
        Ok(Ok(Ok(output))) => TrialOutcome::Succeeded { output },
        Ok(Ok(Err(e))) => failed(TrialErrorKind::Task, format!("{e:#}")),
        Ok(Err(panic)) => failed(TrialErrorKind::Task, panic_message(panic.as_ref())),
        Err(_) => failed(
            TrialErrorKind::Timeout,
            format!("task timed out after {}ms", limit.as_millis()),
        ),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    METRICS.inc_trials_executed();
    if let Some(error) = outcome.error() {
        METRICS.inc_trials_failed();
        let kind = match error.kind {
            TrialErrorKind::Task => "task",
            TrialErrorKind::Timeout => "timeout",
        };
        obs::emit_trial_failed(plan.case.index, index, kind, &error.message);
    }

    let (scores, scorer_failures) = match outcome.output() {
        Some(output) => score_output(plan, index, output, &span.context()).await,
        None => (Vec::new(), Vec::new()),
    };

    let flags = frame.accessed();
    plan.correlator.record_task_flags(span.as_ref(), &flags);
    plan.correlator
        .finish_task_span(span.as_ref(), &outcome, duration_ms);

    Trial {
        index,
        outcome,
        duration_ms,
        scores,
        scorer_failures,
        flags,
        facts: frame.facts(),
    }
}

fn failed(kind: TrialErrorKind, message: String) -> TrialOutcome {
    TrialOutcome::Failed {
        error: TrialError { kind, message },
    }
}

/// Invoke every scorer against `output`. One scorer failing never affects
/// the others.
async fn score_output(
    plan: &TrialPlan<'_>,
    index: u32,
    output: &Value,
    task_span: &SpanContext,
) -> (Vec<ScoreResult>, Vec<ScorerFailure>) {
    let args = ScorerArgs::new(
        plan.case.input.clone(),
        output.clone(),
        plan.case.expected.clone(),
    );
    let limit = plan.config.scorer_timeout();
    let results = join_all(
        plan.scorers
            .iter()
            .map(|scorer| scorer.invoke(args.clone(), limit)),
    )
    .await;

    let mut scores = Vec::new();
    let mut failures = Vec::new();
    for (scorer, result) in plan.scorers.iter().zip(results) {
        match result {
            Ok(score) => {
                plan.correlator.record_score(
                    Some(task_span),
                    &score,
                    scorer.aggregation().name(),
                    None,
                );
                scores.push(score);
            }
            Err(e) => {
                METRICS.inc_scorer_failures();
                obs::emit_scorer_failed(scorer.name(), index, &e);
                let failure = ScorerFailure::from_error(scorer.name(), &e);
                plan.correlator
                    .record_scorer_failure(Some(task_span), &failure, None);
                failures.push(failure);
            }
        }
    }
    (scores, failures)
}
