//! Case Runner: drives the trials of each case and reduces their scores.
//!
//! Trials of one case run concurrently on the caller's task and keep their
//! 1-based indices regardless of completion order. Cases run on spawned
//! tasks bounded by `max_concurrent_cases`; each spawned case inherits the
//! caller's flag frame through [`bind_current`].

use std::sync::Arc;

use evalscope_trace::SpanContext;
use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{instrument, warn, Instrument};

use crate::config::RunnerConfig;
use crate::correlation::SpanCorrelator;
use crate::domain::{
    CaseResult, ExperimentCase, ScorerAggregate, Trial, TrialError, TrialErrorKind, TrialOutcome,
};
use crate::flags::{bind_current, current_frame};
use crate::metrics::METRICS;
use crate::obs;
use crate::scorer::{panic_message, Scorer};
use crate::trial::{execute_trial, Task, TrialPlan};

/// Runs cases of one suite. Cheap to clone; clones share task and scorers.
#[derive(Debug, Clone)]
pub struct CaseRunner {
    task: Task,
    scorers: Arc<[Scorer]>,
    correlator: SpanCorrelator,
    config: RunnerConfig,
    trials: u32,
    capability: String,
    step: Option<String>,
}

impl CaseRunner {
    pub fn new(task: Task, scorers: Vec<Scorer>, correlator: SpanCorrelator) -> Self {
        Self {
            task,
            scorers: scorers.into(),
            correlator,
            config: RunnerConfig::default(),
            trials: 1,
            capability: String::new(),
            step: None,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Trials per case; at least one.
    pub fn with_trials(mut self, trials: u32) -> Self {
        self.trials = trials.max(1);
        self
    }

    pub fn with_capability(mut self, capability: &str, step: Option<&str>) -> Self {
        self.capability = capability.to_string();
        self.step = step.map(str::to_string);
        self
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    /// Run every trial of `case` and aggregate per scorer. Trials share the
    /// case's flag activation but each records into its own frame.
    pub async fn run_case(&self, case: &ExperimentCase, parent: Option<&SpanContext>) -> CaseResult {
        let base_frame = current_frame().unwrap_or_default();
        let span = self.correlator.start_case_span(parent, case);
        let case_span = span.context();

        let plan = TrialPlan {
            task: &self.task,
            scorers: &self.scorers,
            case,
            case_span: Some(&case_span),
            correlator: &self.correlator,
            base_frame: &base_frame,
            config: &self.config,
            capability: &self.capability,
            step: self.step.as_deref(),
        };
        let trials = join_all((1..=self.trials).map(|index| execute_trial(&plan, index))).await;

        let result = CaseResult {
            case: case.clone(),
            aggregates: aggregate_case(&self.scorers, &trials),
            trials,
        };
        self.correlator.finish_case_span(span.as_ref(), &result);
        result
    }

    /// Run `cases` concurrently, returning results ordered by case index.
    #[instrument(skip_all, fields(cases = cases.len(), max_concurrent = self.config.max_concurrent_cases))]
    pub async fn run_cases(
        &self,
        cases: Vec<ExperimentCase>,
        parent: Option<SpanContext>,
    ) -> Vec<CaseResult> {
        let results: Arc<Mutex<Vec<CaseResult>>> = Arc::new(Mutex::new(Vec::new()));
        let sem = Arc::new(Semaphore::new(self.config.max_concurrent_cases.max(1)));

        let mut tasks = Vec::new();
        for case in cases {
            let runner = self.clone();
            let results = Arc::clone(&results);
            let sem = Arc::clone(&sem);
            let parent = parent.clone();
            let pending = case.clone();

            let task = tokio::spawn(
                bind_current(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let result = runner.run_case(&case, parent.as_ref()).await;
                    results.lock().await.push(result);
                })
                .in_current_span(),
            );
            tasks.push((pending, task));
        }

        for (case, task) in tasks {
            if let Err(e) = task.await {
                warn!(case = case.index, error = %e, "case task did not complete");
                let message = match e.try_into_panic() {
                    Ok(panic) => format!("case aborted: {}", panic_message(panic.as_ref())),
                    Err(e) => format!("case aborted: {e}"),
                };
                let result = self.abandoned_case(case, &message);
                results.lock().await.push(result);
            }
        }

        let mut results = std::mem::take(&mut *results.lock().await);
        results.sort_by_key(|r| r.case.index);
        results
    }

    /// Result for a case whose task died before producing one: every trial
    /// is failed so the case still counts in the report.
    fn abandoned_case(&self, case: ExperimentCase, message: &str) -> CaseResult {
        let trials: Vec<Trial> = (1..=self.trials)
            .map(|index| {
                METRICS.inc_trials_failed();
                obs::emit_trial_failed(case.index, index, "task", &message);
                Trial {
                    index,
                    outcome: TrialOutcome::Failed {
                        error: TrialError {
                            kind: TrialErrorKind::Task,
                            message: message.to_string(),
                        },
                    },
                    duration_ms: 0,
                    scores: Vec::new(),
                    scorer_failures: Vec::new(),
                    flags: Default::default(),
                    facts: Default::default(),
                }
            })
            .collect();
        CaseResult {
            case,
            aggregates: aggregate_case(&self.scorers, &trials),
            trials,
        }
    }
}

/// Reduce each scorer's per-trial scores.
///
/// Only trials that produced a score for the scorer feed the aggregation.
/// Failed trials and scorer failures are counted alongside, and a scorer
/// with no scored trials gets no pass verdict.
pub fn aggregate_case(scorers: &[Scorer], trials: &[Trial]) -> Vec<ScorerAggregate> {
    let failed_trials = trials.iter().filter(|t| !t.outcome.is_success()).count();
    scorers
        .iter()
        .map(|scorer| {
            let scores: Vec<f64> = trials
                .iter()
                .filter_map(|t| t.score_for(scorer.name()))
                .map(|s| s.score)
                .collect();
            let scorer_failures = trials
                .iter()
                .filter(|t| t.failure_for(scorer.name()).is_some())
                .count();
            let aggregation = scorer.aggregation();
            let value = aggregation.aggregate(&scores);
            let passed = if scores.is_empty() {
                None
            } else {
                aggregation.passed(value, scorer.threshold())
            };
            ScorerAggregate {
                scorer: scorer.name().to_string(),
                aggregation: aggregation.name().to_string(),
                threshold: scorer.threshold(),
                value,
                scored_trials: scores.len(),
                failed_trials,
                scorer_failures,
                passed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::domain::CaseRecord;
    use crate::scorer::ScorerArgs;
    use crate::trial::TaskInput;
    use evalscope_trace::fakes::MemoryTracer;
    use evalscope_trace::{Span, SpanOptions, Tracer};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn case(index: usize) -> ExperimentCase {
        ExperimentCase::from_record(index, CaseRecord::new(json!(index), Some(json!(index))))
    }

    fn echo() -> Task {
        Task::new("echo", |input: TaskInput| async move {
            Ok::<_, anyhow::Error>(input.input)
        })
    }

    fn exact() -> Scorer {
        Scorer::new("exact", |a: &ScorerArgs| Ok(a.expected.as_ref() == Some(&a.output)))
    }

    #[tokio::test]
    async fn test_trial_indices_are_one_based_and_ordered() {
        let tracer = Arc::new(MemoryTracer::new());
        let runner = CaseRunner::new(echo(), vec![exact()], SpanCorrelator::new(tracer))
            .with_trials(3);
        let result = runner.run_case(&case(0), None).await;
        let indices: Vec<u32> = result.trials.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(result.aggregate_for("exact").map(|a| a.value), Some(1.0));
    }

    #[tokio::test]
    async fn test_failed_trials_excluded_from_aggregate() {
        let tracer = Arc::new(MemoryTracer::new());
        let calls = Arc::new(AtomicU32::new(0));
        let task = {
            let calls = Arc::clone(&calls);
            Task::new("flaky", move |input: TaskInput| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if input.trial % 2 == 0 {
                        anyhow::bail!("trial {} crashed", input.trial);
                    }
                    Ok(input.input)
                }
            })
        };
        let runner = CaseRunner::new(task, vec![exact()], SpanCorrelator::new(tracer.clone()))
            .with_trials(4);
        let result = runner.run_case(&case(1), None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.failed_trials(), 2);
        let agg = result.aggregate_for("exact").unwrap();
        assert_eq!(agg.value, 1.0);
        assert_eq!(agg.scored_trials, 2);
        assert_eq!(agg.failed_trials, 2);

        let case_span = &tracer.spans_named("case")[0];
        assert!(case_span.status.is_error());
    }

    #[test]
    fn test_no_scored_trials_has_no_verdict() {
        let scorer = exact().with_aggregation(Aggregation::pass_hat_k(None));
        let aggregates = aggregate_case(&[scorer], &[]);
        assert_eq!(aggregates[0].value, 1.0);
        assert_eq!(aggregates[0].passed, None);
    }

    #[tokio::test]
    async fn test_run_cases_sorted_and_bounded() {
        let tracer = Arc::new(MemoryTracer::new());
        let runner = CaseRunner::new(echo(), vec![exact()], SpanCorrelator::new(tracer.clone()))
            .with_config(RunnerConfig::default().with_max_concurrent_cases(2));
        let cases: Vec<ExperimentCase> = (0..5).rev().map(case).collect();
        let results = runner.run_cases(cases, None).await;

        let indices: Vec<usize> = results.iter().map(|r| r.case.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(tracer.spans_named("case").len(), 5);
    }

    /// Tracer that panics when asked for one particular span.
    struct PanicOn {
        inner: MemoryTracer,
        name: &'static str,
    }

    impl Tracer for PanicOn {
        fn start_span(&self, options: SpanOptions) -> Arc<dyn Span> {
            if options.name == self.name {
                panic!("exporter crashed on {}", options.name);
            }
            self.inner.start_span(options)
        }
    }

    #[tokio::test]
    async fn test_panicked_case_task_still_reported_as_failed() {
        let tracer = Arc::new(PanicOn {
            inner: MemoryTracer::new(),
            name: "case 1",
        });
        let runner = CaseRunner::new(echo(), vec![exact()], SpanCorrelator::new(tracer.clone()))
            .with_trials(2);
        let results = runner.run_cases((0..3).map(case).collect(), None).await;

        let indices: Vec<usize> = results.iter().map(|r| r.case.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let aborted = &results[1];
        assert_eq!(aborted.failed_trials(), 2);
        let error = aborted.trials[0].outcome.error().unwrap();
        assert!(error.message.contains("exporter crashed on case 1"));
        let agg = aborted.aggregate_for("exact").unwrap();
        assert_eq!(agg.scored_trials, 0);
        assert_eq!(agg.failed_trials, 2);
        assert_eq!(results[2].failed_trials(), 0);
        assert_eq!(tracer.inner.spans_named("case").len(), 2);
    }
}
