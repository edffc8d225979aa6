//! Maps runs, cases, trials and scores onto spans, and links online
//! evaluations to the production spans they judge.
//!
//! Span hierarchy inside a run is `run -> case -> task -> score`. Online
//! evaluations start a root span carrying a link to the production span;
//! the link, not any parent/child nesting, is the relationship consumers
//! should rely on.

use std::collections::BTreeMap;
use std::sync::Arc;

use evalscope_trace::{AttrValue, Span, SpanContext, SpanLink, SpanOptions, SpanStatus, Tracer};

use crate::correlation::attributes as attr;
use crate::correlation::context::current_correlation;
use crate::domain::{
    CaseResult, Correlation, EvalError, EvalResult, EvalRun, ExperimentCase, ScoreResult,
    ScorerFailure, TrialErrorKind, TrialOutcome,
};

/// Experiment-level attributes that are not part of [`EvalRun`] itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentMeta {
    /// Digest of the suite definition.
    pub version: Option<String>,
    pub group: Option<String>,
    pub base_id: Option<String>,
    pub base_name: Option<String>,
    pub dataset_name: Option<String>,
    pub dataset_split: Option<String>,
    pub dataset_size: usize,
}

/// Creates and annotates evaluation spans through a [`Tracer`].
#[derive(Clone)]
pub struct SpanCorrelator {
    tracer: Arc<dyn Tracer>,
}

impl std::fmt::Debug for SpanCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanCorrelator").finish_non_exhaustive()
    }
}

impl SpanCorrelator {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    // -- run --------------------------------------------------------------

    pub fn start_run_span(&self, run: &EvalRun, meta: &ExperimentMeta) -> Arc<dyn Span> {
        let run_id = run.run_id.to_string();
        let mut options = SpanOptions::new(format!("eval {}", run.name))
            .with_attribute(attr::RUN_ID, run_id.as_str())
            .with_attribute(attr::RUN_NAME, run.name.as_str())
            .with_attribute(attr::RUN_TYPE, attr::TYPE_OFFLINE)
            .with_attribute(attr::RUN_ITERATION, 1)
            .with_attribute(attr::RUN_TAGS, run.tags.clone())
            .with_attribute(attr::EXPERIMENT_ID, run_id.as_str())
            .with_attribute(attr::EXPERIMENT_NAME, run.name.as_str())
            .with_attribute(attr::EXPERIMENT_TYPE, attr::TYPE_OFFLINE)
            .with_attribute(attr::EXPERIMENT_TAGS, run.tags.clone())
            .with_attribute(attr::EXPERIMENT_TRIALS, run.trials)
            .with_attribute(attr::DATASET_SIZE, meta.dataset_size)
            .with_attribute(attr::CAPABILITY, run.capability.as_str());
        if let Some(step) = &run.step {
            options = options.with_attribute(attr::STEP, step.as_str());
        }

        let optional = [
            (attr::EXPERIMENT_VERSION, &meta.version),
            (attr::EXPERIMENT_GROUP, &meta.group),
            (attr::EXPERIMENT_BASE_ID, &meta.base_id),
            (attr::EXPERIMENT_BASE_NAME, &meta.base_name),
            (attr::DATASET_NAME, &meta.dataset_name),
            (attr::DATASET_SPLIT, &meta.dataset_split),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                options = options.with_attribute(key, value.as_str());
            }
        }
        let dataset_id = match (&meta.dataset_name, &meta.dataset_split) {
            (Some(name), Some(split)) => format!("{name}:{split}"),
            (Some(name), None) => name.clone(),
            _ => format!("{}:dataset", run.name),
        };
        options = options.with_attribute(attr::DATASET_ID, dataset_id);

        self.tracer.start_span(options)
    }

    /// End the run span. The run itself completed, so status is `ok`; failures
    /// are carried as counts.
    pub fn finish_run_span(&self, span: &dyn Span, cases: &[CaseResult]) {
        let failed_trials: usize = cases.iter().map(CaseResult::failed_trials).sum();
        let scorer_failures: usize = cases
            .iter()
            .flat_map(|c| &c.trials)
            .map(|t| t.scorer_failures.len())
            .sum();
        span.set_attribute(attr::RUN_CASES, AttrValue::from(cases.len()));
        span.set_attribute(attr::RUN_FAILED_TRIALS, AttrValue::from(failed_trials));
        span.set_attribute(attr::RUN_SCORER_FAILURES, AttrValue::from(scorer_failures));
        span.set_status(SpanStatus::Ok);
        span.end();
    }

    // -- case -------------------------------------------------------------

    pub fn start_case_span(
        &self,
        parent: Option<&SpanContext>,
        case: &ExperimentCase,
    ) -> Arc<dyn Span> {
        let mut options = SpanOptions::new(format!("case {}", case.index))
            .with_parent(parent.cloned())
            .with_attribute(attr::CASE_ID, case.case_id())
            .with_attribute(attr::CASE_INDEX, case.index)
            .with_attribute(attr::CASE_INPUT, AttrValue::json(&case.input));
        if let Some(expected) = &case.expected {
            options = options.with_attribute(attr::CASE_EXPECTED, AttrValue::json(expected));
        }
        if !case.metadata.is_empty() {
            let metadata = serde_json::Value::Object(case.metadata.clone());
            options = options.with_attribute(attr::CASE_METADATA, AttrValue::json(&metadata));
        }
        if let Some(description) = &case.description {
            options = options.with_attribute(attr::CASE_DESCRIPTION, description.as_str());
        }
        self.tracer.start_span(options)
    }

    /// End a case span: `error` if any trial failed, `ok` otherwise.
    pub fn finish_case_span(&self, span: &dyn Span, result: &CaseResult) {
        let outputs: Vec<serde_json::Value> = result
            .trials
            .iter()
            .map(|t| t.outcome.output().cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        span.set_attribute(
            attr::CASE_OUTPUT,
            AttrValue::json(&serde_json::Value::Array(outputs)),
        );

        let failed = result.failed_trials();
        if failed > 0 {
            let message = format!("{failed} of {} trials failed", result.trials.len());
            span.set_attribute(attr::TRIAL_ERROR, AttrValue::from(message.as_str()));
            span.set_status(SpanStatus::error(message));
        } else {
            span.set_status(SpanStatus::Ok);
        }
        span.end();
    }

    // -- task -------------------------------------------------------------

    pub fn start_task_span(
        &self,
        parent: Option<&SpanContext>,
        task_name: &str,
        trial: u32,
    ) -> Arc<dyn Span> {
        self.tracer.start_span(
            SpanOptions::new(format!("task {trial}"))
                .with_parent(parent.cloned())
                .with_attribute(attr::TASK_NAME, task_name)
                .with_attribute(attr::TASK_TYPE, attr::TYPE_TASK)
                .with_attribute(attr::TASK_TRIAL, trial),
        )
    }

    /// Record a trial's terminal state and end its span.
    ///
    /// A failed trial sets the error attribute, records the exception and
    /// sets `error` status together, so attribute and status never disagree.
    pub fn finish_task_span(&self, span: &dyn Span, outcome: &TrialOutcome, duration_ms: u64) {
        span.set_attribute(attr::TASK_DURATION_MS, AttrValue::from(duration_ms as i64));
        match outcome {
            TrialOutcome::Succeeded { output } => {
                span.set_attribute(attr::TASK_OUTPUT, AttrValue::json(output));
                span.set_status(SpanStatus::Ok);
            }
            TrialOutcome::Failed { error } => {
                let kind = match error.kind {
                    TrialErrorKind::Task => "task",
                    TrialErrorKind::Timeout => "timeout",
                };
                span.set_attribute(attr::TRIAL_ERROR, AttrValue::from(error.message.as_str()));
                span.set_attribute(attr::TRIAL_ERROR_KIND, AttrValue::from(kind));
                span.record_exception(&error.message);
                span.set_status(SpanStatus::error(error.message.clone()));
            }
        }
        span.end();
    }

    /// Attach the flag values the trial resolved.
    pub fn record_task_flags(&self, span: &dyn Span, flags: &BTreeMap<String, serde_json::Value>) {
        if flags.is_empty() {
            return;
        }
        let value = serde_json::Value::Object(
            flags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );
        span.set_attribute(attr::TASK_FLAGS, AttrValue::json(&value));
    }

    // -- score ------------------------------------------------------------

    /// Emit a completed score span under `parent`, optionally linked to a
    /// production span.
    pub fn record_score(
        &self,
        parent: Option<&SpanContext>,
        score: &ScoreResult,
        aggregation: &str,
        link: Option<SpanLink>,
    ) {
        let mut options = SpanOptions::new(format!("score {}", score.scorer))
            .with_parent(parent.cloned())
            .with_attribute(attr::SCORE_NAME, score.scorer.as_str())
            .with_attribute(attr::SCORE_SCORER, score.scorer.as_str())
            .with_attribute(attr::SCORE_VALUE, score.score)
            .with_attribute(attr::SCORE_AGGREGATION, aggregation);
        if let Some(threshold) = score.threshold {
            options = options.with_attribute(attr::SCORE_THRESHOLD, threshold);
        }
        if let Some(passed) = score.passed {
            options = options.with_attribute(attr::SCORE_PASSED, passed);
        }
        if let Some(metadata) = &score.metadata {
            options = options.with_attribute(attr::SCORE_METADATA, AttrValue::json(metadata));
        }
        if let Some(link) = link {
            options = options.with_link(link);
        }
        let span = self.tracer.start_span(options);
        span.set_status(SpanStatus::Ok);
        span.end();
    }

    /// Emit an `error` score span for a scorer that produced no result.
    pub fn record_scorer_failure(
        &self,
        parent: Option<&SpanContext>,
        failure: &ScorerFailure,
        link: Option<SpanLink>,
    ) {
        let mut options = SpanOptions::new(format!("score {}", failure.scorer))
            .with_parent(parent.cloned())
            .with_attribute(attr::SCORE_NAME, failure.scorer.as_str())
            .with_attribute(attr::SCORE_SCORER, failure.scorer.as_str());
        if let Some(link) = link {
            options = options.with_link(link);
        }
        let span = self.tracer.start_span(options);
        span.set_attribute(attr::ERROR_MESSAGE, AttrValue::from(failure.message.as_str()));
        span.record_exception(&failure.message);
        span.set_status(SpanStatus::error(failure.message.clone()));
        span.end();
    }

    // -- online -----------------------------------------------------------

    /// Link pointing at the production span named by `correlation`.
    pub fn link_for(correlation: &Correlation) -> Option<SpanLink> {
        correlation.span_context().map(|context| {
            SpanLink::new(context)
                .with_attribute(attr::LINK_TYPE, attr::LINK_TYPE_ONLINE)
                .with_attribute(attr::CAPABILITY, correlation.capability.as_str())
        })
    }

    /// Root span for one online evaluation, linked to its target.
    ///
    /// When the correlation names only a trace, the target identifiers are
    /// recorded as attributes instead of a link.
    pub fn start_online_span(&self, correlation: &Correlation) -> Arc<dyn Span> {
        let name = match &correlation.step {
            Some(step) => format!("online eval {} {step}", correlation.capability),
            None => format!("online eval {}", correlation.capability),
        };
        let mut options = SpanOptions::new(name)
            .with_attribute(attr::RUN_TYPE, attr::TYPE_ONLINE)
            .with_attribute(attr::EXPERIMENT_TYPE, attr::TYPE_ONLINE)
            .with_attribute(attr::CAPABILITY, correlation.capability.as_str())
            .with_attribute(attr::TARGET_TRACE_ID, correlation.trace_id.as_str());
        if let Some(step) = &correlation.step {
            options = options.with_attribute(attr::STEP, step.as_str());
        }
        if let Some(span_id) = &correlation.span_id {
            options = options.with_attribute(attr::TARGET_SPAN_ID, span_id.as_str());
        }
        if let Some(conversation_id) = &correlation.conversation_id {
            options = options.with_attribute(attr::CONVERSATION_ID, conversation_id.as_str());
        }
        if let Some(link) = Self::link_for(correlation) {
            options = options.with_link(link);
        }
        self.tracer.start_span(options)
    }

    pub fn finish_online_span(&self, span: &dyn Span, scorer_failures: usize) {
        if scorer_failures > 0 {
            let message = format!("{scorer_failures} scorer(s) failed");
            span.set_attribute(attr::ERROR_MESSAGE, AttrValue::from(message.as_str()));
            span.set_status(SpanStatus::error(message));
        } else {
            span.set_status(SpanStatus::Ok);
        }
        span.end();
    }

    /// End an online span whose scoring did not complete.
    pub fn abort_online_span(&self, span: &dyn Span, message: &str) {
        span.set_attribute(attr::ERROR_MESSAGE, AttrValue::from(message));
        span.record_exception(message);
        span.set_status(SpanStatus::error(message));
        span.end();
    }
}

/// Pick the correlation an online evaluation links to: an explicit hint
/// wins, then the ambient active span. Neither is a correlation error.
pub fn resolve_correlation(hint: Option<Correlation>) -> EvalResult<Correlation> {
    hint.or_else(current_correlation).ok_or_else(|| {
        EvalError::Correlation(
            "no active span and no explicit correlation supplied".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrialError;
    use evalscope_trace::fakes::MemoryTracer;

    fn correlator() -> (Arc<MemoryTracer>, SpanCorrelator) {
        let tracer = Arc::new(MemoryTracer::new());
        let correlator = SpanCorrelator::new(tracer.clone());
        (tracer, correlator)
    }

    #[test]
    fn test_failed_trial_span_is_error_with_attribute() {
        let (tracer, c) = correlator();
        let span = c.start_task_span(None, "qa", 2);
        let outcome = TrialOutcome::Failed {
            error: TrialError {
                kind: TrialErrorKind::Task,
                message: "boom".to_string(),
            },
        };
        c.finish_task_span(span.as_ref(), &outcome, 5);

        let data = &tracer.spans()[0];
        assert!(data.status.is_error());
        assert_eq!(data.attr(attr::TRIAL_ERROR).and_then(|v| v.as_str()), Some("boom"));
        assert_eq!(data.exceptions, vec!["boom".to_string()]);
        assert!(data.is_ended());
    }

    #[test]
    fn test_succeeded_trial_span_is_ok_without_error_attribute() {
        let (tracer, c) = correlator();
        let span = c.start_task_span(None, "qa", 1);
        let outcome = TrialOutcome::Succeeded {
            output: serde_json::json!("4"),
        };
        c.finish_task_span(span.as_ref(), &outcome, 5);

        let data = &tracer.spans()[0];
        assert_eq!(data.status, SpanStatus::Ok);
        assert!(data.attr(attr::TRIAL_ERROR).is_none());
        assert_eq!(data.attr(attr::TASK_OUTPUT).and_then(|v| v.as_str()), Some("4"));
    }

    #[test]
    fn test_score_span_attributes() {
        let (tracer, c) = correlator();
        let score = ScoreResult::new("exact", 1.0).with_threshold(Some(0.5));
        c.record_score(None, &score, "mean", None);

        let data = &tracer.spans()[0];
        assert_eq!(data.attr(attr::SCORE_NAME).and_then(|v| v.as_str()), Some("exact"));
        assert_eq!(data.attr(attr::SCORE_VALUE).and_then(|v| v.as_f64()), Some(1.0));
        assert_eq!(data.attr(attr::SCORE_PASSED).and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn test_online_span_links_without_parent() {
        let (tracer, c) = correlator();
        let target = SpanContext::child_of(None);
        let correlation = Correlation::for_span(&target, "agent", Some("answer"));
        let span = c.start_online_span(&correlation);
        c.finish_online_span(span.as_ref(), 0);

        let data = &tracer.spans()[0];
        assert!(data.parent.is_none());
        assert_eq!(data.links.len(), 1);
        assert_eq!(data.links[0].context, target);
    }

    #[test]
    fn test_trace_only_correlation_records_target_attribute() {
        let (tracer, c) = correlator();
        let correlation =
            Correlation::parse("4bf92f3577b34da6a3ce929d0e0e4736", None, "agent", None).unwrap();
        let span = c.start_online_span(&correlation);
        c.finish_online_span(span.as_ref(), 0);

        let data = &tracer.spans()[0];
        assert!(data.links.is_empty());
        assert_eq!(
            data.attr(attr::TARGET_TRACE_ID).and_then(|v| v.as_str()),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }

    #[tokio::test]
    async fn test_resolve_without_hint_or_span_fails() {
        let err = resolve_correlation(None).unwrap_err();
        assert!(matches!(err, EvalError::Correlation(_)));
    }
}
