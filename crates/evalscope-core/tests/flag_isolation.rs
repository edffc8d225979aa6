//! Flag override isolation across concurrent runs, cases and trials.
//!
//! Every run below reads `temperature` through the same `AppScope`; the only
//! thing that differs is the override set the run was started with.

use std::sync::Arc;
use std::time::Duration;

use evalscope_core::correlation::attributes as attr;
use evalscope_core::evalscope_trace::fakes::MemoryTracer;
use evalscope_core::{
    create_app_scope, define_eval_suite, AppScope, AppScopeConfig, CaseRecord, ConfigError,
    DataSource, EvalError, EvalRunOptions, EvalSuite, EvalSuiteOptions, FlagOverrides, FlagSchema,
    RunnerConfig, Scorer, ScorerArgs, Task, TaskInput, TrialErrorKind,
};
use serde_json::{json, Value};

fn app() -> AppScope {
    create_app_scope(AppScopeConfig::new(json!({
        "temperature": 0.7,
        "model": {"name": "small"}
    })))
    .expect("valid flag schema")
}

/// Task that suspends before and after reading the flag so concurrently
/// polled runs interleave.
fn temperature_task(app: AppScope) -> Task {
    Task::new("read-temperature", move |_input: TaskInput| {
        let app = app.clone();
        async move {
            tokio::task::yield_now().await;
            let temperature = app.flag("temperature", json!(0.7))?;
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>(temperature)
        }
    })
}

fn suite(app: AppScope, trials: u32) -> EvalSuite {
    let cases = (0..3).map(|i| CaseRecord::new(json!(i), None)).collect();
    define_eval_suite(
        "temperature-probe",
        EvalSuiteOptions::new("chat", DataSource::records(cases), temperature_task(app))
            .with_config_flags(FlagSchema::new(json!({"temperature": 0.7})).unwrap())
            .with_scorer(Scorer::new("is_number", |a: &ScorerArgs| Ok(a.output.is_number())))
            .with_trials(trials),
    )
    .unwrap()
}

fn outputs(report: &evalscope_core::EvalReport) -> Vec<Value> {
    report
        .cases
        .iter()
        .flat_map(|c| &c.trials)
        .map(|t| t.outcome.output().cloned().unwrap_or(Value::Null))
        .collect()
}

#[tokio::test]
async fn test_concurrent_runs_observe_only_their_own_override() {
    let app = app();
    let suite = suite(app.clone(), 2);
    let hot_tracer = Arc::new(MemoryTracer::new());
    let cold_tracer = Arc::new(MemoryTracer::new());

    let hot = EvalRunOptions::default()
        .with_overrides(FlagOverrides::new().set("temperature", json!(0.9)));
    let cold = EvalRunOptions::default()
        .with_overrides(FlagOverrides::new().set("temperature", json!(0.2)));

    let (hot, cold) = tokio::join!(
        suite.run(hot_tracer.clone(), hot),
        suite.run(cold_tracer.clone(), cold),
    );
    let (hot, cold) = (hot.unwrap(), cold.unwrap());

    assert_eq!(outputs(&hot), vec![json!(0.9); 6]);
    assert_eq!(outputs(&cold), vec![json!(0.2); 6]);

    for trial in hot.cases.iter().flat_map(|c| &c.trials) {
        assert_eq!(trial.flags.get("temperature"), Some(&json!(0.9)));
    }
    for span in cold_tracer.spans_named("task") {
        let flags = span.attr(attr::TASK_FLAGS).expect("flags recorded");
        assert!(flags.to_string().contains("0.2"), "unexpected flags {flags}");
    }
}

#[tokio::test]
async fn test_default_applies_without_override_and_outside_runs() {
    let app = app();
    let report = suite(app.clone(), 1)
        .run(Arc::new(MemoryTracer::new()), EvalRunOptions::default())
        .await
        .unwrap();
    assert_eq!(outputs(&report), vec![json!(0.7); 3]);

    // Nothing leaks back out of a finished run.
    assert_eq!(app.flag("temperature", json!(0.0)).unwrap(), json!(0.7));
}

#[tokio::test]
async fn test_run_nested_in_outer_scope_inherits_and_shadows() {
    let app = app();
    let outer = FlagOverrides::new()
        .set("temperature", json!(0.5))
        .set("model.name", json!("large"));

    let report = app
        .flag_scope()
        .with_overrides(outer, async {
            let inner = EvalRunOptions::default()
                .with_overrides(FlagOverrides::new().set("temperature", json!(0.1)));
            let report = suite(app.clone(), 1)
                .run(Arc::new(MemoryTracer::new()), inner)
                .await
                .unwrap();
            // The run's layer is gone again once it returns.
            assert_eq!(app.flag("temperature", json!(0.0)).unwrap(), json!(0.5));
            assert_eq!(app.flag("model.name", json!("")).unwrap(), json!("large"));
            report
        })
        .await
        .unwrap();

    assert_eq!(outputs(&report), vec![json!(0.1); 3]);
}

#[tokio::test]
async fn test_override_outside_suite_namespaces_is_rejected() {
    let app = app();
    let options = EvalRunOptions::default()
        .with_overrides(FlagOverrides::new().set("model.name", json!("large")));
    let tracer = Arc::new(MemoryTracer::new());

    let err = suite(app, 1).run(tracer.clone(), options).await.unwrap_err();
    assert!(matches!(
        err,
        EvalError::Config(ConfigError::NamespaceNotAllowed { .. })
    ));
    assert!(tracer.is_empty(), "no spans for a rejected run");
}

#[tokio::test]
async fn test_unknown_flag_read_fails_the_trial_not_the_run() {
    let app = app();
    let task = {
        let app = app.clone();
        Task::new("typo", move |_input: TaskInput| {
            let app = app.clone();
            async move { Ok::<_, anyhow::Error>(app.flag("temprature", json!(0.7))?) }
        })
    };
    let suite = define_eval_suite(
        "typo",
        EvalSuiteOptions::new(
            "chat",
            DataSource::records(vec![CaseRecord::new(json!(1), None)]),
            task,
        )
        .with_scorer(Scorer::new("any", |_a: &ScorerArgs| Ok(1.0))),
    )
    .unwrap();

    let report = suite
        .run(Arc::new(MemoryTracer::new()), EvalRunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failed_trials, 1);
    let error = report.cases[0].trials[0].outcome.error().unwrap();
    assert!(error.message.contains("temprature"));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_trial_does_not_leak_its_activation() {
    let app = app();
    let task = {
        let app = app.clone();
        Task::new("stall-after-read", move |input: TaskInput| {
            let app = app.clone();
            async move {
                let temperature = app.flag("temperature", json!(0.7))?;
                if input.trial == 1 {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok::<_, anyhow::Error>(temperature)
            }
        })
    };
    let suite = define_eval_suite(
        "stalls",
        EvalSuiteOptions::new(
            "chat",
            DataSource::records(vec![CaseRecord::new(json!(1), None)]),
            task,
        )
        .with_scorer(Scorer::new("is_number", |a: &ScorerArgs| Ok(a.output.is_number())))
        .with_trials(2),
    )
    .unwrap();
    let options = EvalRunOptions::default()
        .with_overrides(FlagOverrides::new().set("temperature", json!(0.9)))
        .with_config(RunnerConfig::default().with_trial_timeout(Duration::from_secs(5)));

    let report = suite.run(Arc::new(MemoryTracer::new()), options).await.unwrap();

    let trials = &report.cases[0].trials;
    assert_eq!(trials[0].outcome.error().map(|e| e.kind), Some(TrialErrorKind::Timeout));
    assert_eq!(trials[1].outcome.output(), Some(&json!(0.9)));
    assert_eq!(app.flag("temperature", json!(0.0)).unwrap(), json!(0.7));
}

#[tokio::test]
async fn test_failing_run_inside_outer_scope_restores_outer_layer() {
    let app = app();
    let failing = {
        let app = app.clone();
        Task::new("read-then-throw", move |_input: TaskInput| {
            let app = app.clone();
            async move {
                app.flag("temperature", json!(0.7))?;
                Err::<Value, _>(anyhow::anyhow!("backend down"))
            }
        })
    };
    let suite = define_eval_suite(
        "throws",
        EvalSuiteOptions::new(
            "chat",
            DataSource::records(vec![CaseRecord::new(json!(1), None)]),
            failing,
        )
        .with_scorer(Scorer::new("any", |_a: &ScorerArgs| Ok(1.0))),
    )
    .unwrap();

    app.flag_scope()
        .with_overrides(FlagOverrides::new().set("temperature", json!(0.5)), async {
            let inner = EvalRunOptions::default()
                .with_overrides(FlagOverrides::new().set("temperature", json!(0.1)));
            let report = suite
                .run(Arc::new(MemoryTracer::new()), inner)
                .await
                .unwrap();
            assert_eq!(report.failed_trials, 1);
            assert_eq!(
                report.cases[0].trials[0].flags.get("temperature"),
                Some(&json!(0.1))
            );
            assert_eq!(app.flag("temperature", json!(0.0)).unwrap(), json!(0.5));
        })
        .await
        .unwrap();
    assert_eq!(app.flag("temperature", json!(0.0)).unwrap(), json!(0.7));
}
