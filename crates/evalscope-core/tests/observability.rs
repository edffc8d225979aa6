//! Structured log events for run lifecycle, failures and online evals.

use std::sync::Arc;

use evalscope_core::evalscope_trace::fakes::MemoryTracer;
use evalscope_core::metrics::METRICS;
use evalscope_core::obs::{self, EvalRunSpan};
use evalscope_core::{
    define_eval_suite, pick_flags, CaseRecord, Correlation, DataSource, EvalRunOptions,
    EvalSuiteOptions, FlagSchema, OnlineEvalRequest, OnlineEvaluator, Scorer, ScorerArgs, Task,
    TaskInput,
};
use serde_json::json;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emitters_log_event_names() {
    obs::emit_run_started("run-1", "qa", 3, 2);
    obs::emit_run_finished("run-1", 1200, 1, 0);
    obs::emit_trial_failed(0, 2, "task", &"boom");
    assert!(logs_contain("run.started"));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain("trial.failed"));
}

#[traced_test]
#[test]
fn test_run_span_enter_and_drop() {
    let span = EvalRunSpan::enter("run-2", "qa");
    tracing::info!("inside run span");
    drop(span);
    assert!(logs_contain("inside run span"));
}

#[traced_test]
#[test]
fn test_pick_flags_warns_on_unknown_namespace() {
    let schema = FlagSchema::new(json!({"model": {"name": "small"}})).unwrap();
    let picked = pick_flags(&schema, &["model", "ui"]);
    assert!(picked.contains("model.name"));
    assert!(logs_contain("flags.unknown_namespace"));
}

#[traced_test]
#[tokio::test]
async fn test_suite_run_logs_failures_and_counts_metrics() {
    let task = Task::new("flaky", |input: TaskInput| async move {
        if input.trial == 2 {
            anyhow::bail!("flaky backend");
        }
        Ok(input.input)
    });
    let broken = Scorer::new("judge", |_a: &ScorerArgs| -> anyhow::Result<f64> {
        anyhow::bail!("judge offline")
    });
    let suite = define_eval_suite(
        "observed",
        EvalSuiteOptions::new(
            "echo",
            DataSource::records(vec![CaseRecord::new(json!("x"), Some(json!("x")))]),
            task,
        )
        .with_scorer(broken)
        .with_trials(2),
    )
    .unwrap();
    let failed_before = METRICS.trials_failed();

    let report = suite
        .run(Arc::new(MemoryTracer::new()), EvalRunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failed_trials, 1);
    assert_eq!(report.scorer_failures, 1);

    assert!(METRICS.trials_failed() > failed_before);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("trial.failed"));
    assert!(logs_contain("flaky backend"));
    assert!(logs_contain("scorer.failed"));
    assert!(logs_contain("judge offline"));
    assert!(logs_contain("run.finished"));
}

#[traced_test]
#[tokio::test]
async fn test_dispatched_online_eval_logs_failure_channel() {
    let broken = Scorer::new("judge", |_a: &ScorerArgs| -> anyhow::Result<f64> {
        anyhow::bail!("judge offline")
    });
    let evaluator = OnlineEvaluator::new(Arc::new(MemoryTracer::new()), vec![broken]);
    let correlation =
        Correlation::parse("4bf92f3577b34da6a3ce929d0e0e4736", None, "agent", None).unwrap();

    let handle = evaluator
        .dispatch(Some(correlation), OnlineEvalRequest::new(json!("x")))
        .unwrap();
    handle.await.unwrap();

    assert!(logs_contain("online_eval.dispatched"));
    assert!(logs_contain("online_eval.scorer_failed"));
    assert!(logs_contain("online_eval.failed"));

    // No correlation and no channel: still only a log line.
    assert!(evaluator
        .dispatch(None, OnlineEvalRequest::new(json!("x")))
        .is_none());
    assert!(logs_contain("no active span"));
}
