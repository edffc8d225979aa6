//! Online Eval Dispatcher: score live artifacts from production code.
//!
//! Two entry points, distinguished at the type level:
//! - [`OnlineEvaluator::evaluate`] is awaited and returns the scores, for
//!   short-lived processes that flush telemetry before exiting.
//! - [`OnlineEvaluator::dispatch`] spawns the work and returns immediately.
//!   Nothing it does can fail into the caller; failures go to the error
//!   channel and the log.
//!
//! Online eval spans are roots linked to the production span they evaluate.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use evalscope_trace::Tracer;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::RunnerConfig;
use crate::correlation::{resolve_correlation, SpanCorrelator};
use crate::domain::{Correlation, ErrorKind, EvalError, EvalResult, ScoreResult, ScorerFailure};
use crate::metrics::METRICS;
use crate::obs;
use crate::scorer::{panic_message, Scorer, ScorerArgs};

/// The artifact being scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineEvalRequest {
    pub output: Value,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected: Option<Value>,
}

impl OnlineEvalRequest {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            input: Value::Null,
            expected: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }
}

/// Result of an awaited online evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineEvalOutcome {
    pub correlation: Correlation,
    pub scores: Vec<ScoreResult>,
    pub scorer_failures: Vec<ScorerFailure>,
}

/// One failure delivered on the online error channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineEvalFailure {
    /// Empty when the failure happened before a correlation was resolved.
    pub capability: String,
    pub trace_id: Option<String>,
    /// Set when a single scorer failed.
    pub scorer: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl OnlineEvalFailure {
    fn from_error(correlation: Option<&Correlation>, error: &EvalError) -> Self {
        Self {
            capability: correlation.map(|c| c.capability.clone()).unwrap_or_default(),
            trace_id: correlation.map(|c| c.trace_id.to_string()),
            scorer: None,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    fn from_scorer(correlation: &Correlation, failure: &ScorerFailure) -> Self {
        Self {
            capability: correlation.capability.clone(),
            trace_id: Some(correlation.trace_id.to_string()),
            scorer: Some(failure.scorer.clone()),
            kind: failure.kind,
            message: failure.message.clone(),
        }
    }
}

/// Scores production artifacts and links the result to their trace.
#[derive(Debug, Clone)]
pub struct OnlineEvaluator {
    correlator: SpanCorrelator,
    scorers: Arc<[Scorer]>,
    config: RunnerConfig,
    error_tx: Option<mpsc::UnboundedSender<OnlineEvalFailure>>,
}

impl OnlineEvaluator {
    pub fn new(tracer: Arc<dyn Tracer>, scorers: Vec<Scorer>) -> Self {
        Self {
            correlator: SpanCorrelator::new(tracer),
            scorers: scorers.into(),
            config: RunnerConfig::default(),
            error_tx: None,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an error channel; returns the receiving end.
    pub fn with_error_channel(mut self) -> (Self, mpsc::UnboundedReceiver<OnlineEvalFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.error_tx = Some(tx);
        (self, rx)
    }

    pub fn scorers(&self) -> &[Scorer] {
        &self.scorers
    }

    /// Score `request` and wait for the spans to be emitted.
    ///
    /// Without a `hint` the ambient active span is the target; with neither
    /// this returns [`EvalError::Correlation`]. Scorer failures are part of
    /// the outcome, not an error.
    pub async fn evaluate(
        &self,
        hint: Option<Correlation>,
        request: OnlineEvalRequest,
    ) -> EvalResult<OnlineEvalOutcome> {
        let correlation = resolve_correlation(hint)?;
        self.score(correlation, request).await
    }

    /// Score `request` on a background task.
    ///
    /// The correlation is resolved here, on the caller's task, since the
    /// ambient span does not cross the spawn. Returns `None` when nothing
    /// was spawned; the reason is on the error channel.
    pub fn dispatch(
        &self,
        hint: Option<Correlation>,
        request: OnlineEvalRequest,
    ) -> Option<JoinHandle<()>> {
        let correlation = match resolve_correlation(hint) {
            Ok(correlation) => correlation,
            Err(e) => {
                self.report(OnlineEvalFailure::from_error(None, &e));
                return None;
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = EvalError::Task {
                    message: format!("no async runtime for online eval: {e}"),
                };
                self.report(OnlineEvalFailure::from_error(Some(&correlation), &error));
                return None;
            }
        };

        obs::emit_online_eval_dispatched(
            &correlation.capability,
            correlation.trace_id.as_str(),
            self.scorers.len(),
        );
        let this = self.clone();
        let work = async move {
            let scoring = AssertUnwindSafe(this.score(correlation.clone(), request)).catch_unwind();
            match scoring.await {
                Ok(Ok(outcome)) => {
                    for failure in &outcome.scorer_failures {
                        this.report(OnlineEvalFailure::from_scorer(&correlation, failure));
                    }
                }
                Ok(Err(e)) => this.report(OnlineEvalFailure::from_error(Some(&correlation), &e)),
                Err(panic) => {
                    let error = EvalError::Task {
                        message: panic_message(panic.as_ref()),
                    };
                    this.report(OnlineEvalFailure::from_error(Some(&correlation), &error));
                }
            }
        };
        Some(runtime.spawn(work.in_current_span()))
    }

    async fn score(
        &self,
        correlation: Correlation,
        request: OnlineEvalRequest,
    ) -> EvalResult<OnlineEvalOutcome> {
        let span = self.correlator.start_online_span(&correlation);
        let parent = span.context();
        let args = ScorerArgs::new(request.input, request.output, request.expected);
        let scorer_limit = self.config.scorer_timeout();
        let scoring = join_all(
            self.scorers
                .iter()
                .map(|scorer| scorer.invoke(args.clone(), scorer_limit)),
        );

        let limit = self.config.online_eval_timeout();
        let results = match tokio::time::timeout(limit, scoring).await {
            Ok(results) => results,
            Err(_) => {
                let error = EvalError::Timeout {
                    operation: format!("online eval {}", correlation.capability),
                    limit_ms: limit.as_millis() as u64,
                };
                self.correlator
                    .abort_online_span(span.as_ref(), &error.to_string());
                return Err(error);
            }
        };

        let mut scores = Vec::new();
        let mut scorer_failures = Vec::new();
        for (scorer, result) in self.scorers.iter().zip(results) {
            let link = SpanCorrelator::link_for(&correlation);
            match result {
                Ok(score) => {
                    self.correlator
                        .record_score(Some(&parent), &score, scorer.aggregation().name(), link);
                    scores.push(score);
                }
                Err(e) => {
                    METRICS.inc_scorer_failures();
                    obs::emit_online_scorer_failed(&correlation.capability, scorer.name(), &e);
                    let failure = ScorerFailure::from_error(scorer.name(), &e);
                    self.correlator
                        .record_scorer_failure(Some(&parent), &failure, link);
                    scorer_failures.push(failure);
                }
            }
        }
        self.correlator
            .finish_online_span(span.as_ref(), scorer_failures.len());
        METRICS.inc_online_evals_completed();

        Ok(OnlineEvalOutcome {
            correlation,
            scores,
            scorer_failures,
        })
    }

    fn report(&self, failure: OnlineEvalFailure) {
        METRICS.inc_online_eval_failures();
        obs::emit_online_eval_failed(&failure.capability, &failure.message);
        if let Some(tx) = &self.error_tx {
            // A dropped receiver only loses the channel copy; the log has it.
            let _ = tx.send(failure);
        }
    }
}

/// Awaited one-shot online evaluation.
pub async fn online_eval(
    tracer: Arc<dyn Tracer>,
    hint: Option<Correlation>,
    scorers: Vec<Scorer>,
    request: OnlineEvalRequest,
) -> EvalResult<OnlineEvalOutcome> {
    OnlineEvaluator::new(tracer, scorers)
        .evaluate(hint, request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::attributes as attr;
    use crate::correlation::{current_correlation, with_capability_span};
    use evalscope_trace::fakes::MemoryTracer;
    use serde_json::json;
    use std::time::Duration;

    fn non_empty() -> Scorer {
        Scorer::new("non_empty", |a: &ScorerArgs| {
            Ok(a.output.as_str().is_some_and(|s| !s.is_empty()))
        })
    }

    fn broken() -> Scorer {
        Scorer::new("broken", |_a: &ScorerArgs| -> anyhow::Result<f64> {
            anyhow::bail!("judge offline")
        })
    }

    #[tokio::test]
    async fn test_awaited_inside_active_span_links_to_it() {
        let tracer = Arc::new(MemoryTracer::new());
        let evaluator = OnlineEvaluator::new(tracer.clone(), vec![non_empty()]);

        let outcome = with_capability_span(tracer.as_ref(), "support-agent", Some("reply"), async {
            evaluator
                .evaluate(None, OnlineEvalRequest::new(json!("hello")))
                .await
        })
        .await
        .unwrap();

        let production = tracer.spans_named("support-agent reply").remove(0);
        assert_eq!(outcome.correlation.span_context(), Some(production.context.clone()));
        assert_eq!(outcome.scores[0].score, 1.0);

        let score = tracer.spans_named("score non_empty").remove(0);
        assert_eq!(score.links.len(), 1);
        assert_eq!(score.links[0].context, production.context);
        let online = tracer.spans_named("online eval").remove(0);
        assert!(online.parent.is_none());
        assert_eq!(score.parent.as_ref(), Some(&online.context));
    }

    #[tokio::test]
    async fn test_standalone_without_correlation_is_error() {
        let tracer = Arc::new(MemoryTracer::new());
        let request = OnlineEvalRequest::new(json!("x"));
        let err = online_eval(tracer.clone(), None, vec![non_empty()], request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Correlation);
        assert_eq!(tracer.len(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_without_correlation_reports_on_channel() {
        let tracer = Arc::new(MemoryTracer::new());
        let (evaluator, mut errors) =
            OnlineEvaluator::new(tracer, vec![non_empty()]).with_error_channel();

        assert!(evaluator
            .dispatch(None, OnlineEvalRequest::new(json!("x")))
            .is_none());
        let failure = errors.recv().await.unwrap();
        assert_eq!(failure.kind, ErrorKind::Correlation);
        assert!(failure.trace_id.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_deferred_scorer_failure_goes_to_channel() {
        let tracer = Arc::new(MemoryTracer::new());
        let (evaluator, mut errors) =
            OnlineEvaluator::new(tracer.clone(), vec![non_empty(), broken()]).with_error_channel();

        let correlation = with_capability_span(tracer.as_ref(), "agent", None, async {
            Ok::<_, EvalError>(current_correlation())
        })
        .await
        .unwrap()
        .unwrap();

        let handle = evaluator
            .dispatch(Some(correlation.clone()), OnlineEvalRequest::new(json!("ok")))
            .unwrap();
        handle.await.unwrap();

        let failure = errors.recv().await.unwrap();
        assert_eq!(failure.scorer.as_deref(), Some("broken"));
        assert_eq!(failure.trace_id.as_deref(), Some(correlation.trace_id.as_str()));

        let ok = tracer.spans_named("score non_empty").remove(0);
        assert!(!ok.status.is_error());
        assert_eq!(ok.links[0].context, correlation.span_context().unwrap());
        let online = tracer.spans_named("online eval").remove(0);
        assert!(online.status.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_timeout_ends_span_with_error() {
        let tracer = Arc::new(MemoryTracer::new());
        let slow = Scorer::new_async("slow", |_args: ScorerArgs| async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok::<_, anyhow::Error>(1.0)
        });
        let evaluator = OnlineEvaluator::new(tracer.clone(), vec![slow]).with_config(
            RunnerConfig::default()
                .with_scorer_timeout(Duration::from_secs(600))
                .with_online_eval_timeout(Duration::from_secs(1)),
        );
        let correlation =
            Correlation::parse("4bf92f3577b34da6a3ce929d0e0e4736", None, "agent", None).unwrap();

        let err = evaluator
            .evaluate(Some(correlation), OnlineEvalRequest::new(json!("x")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let online = tracer.spans_named("online eval").remove(0);
        assert!(online.is_ended());
        assert!(online.status.is_error());
        assert!(online.attr(attr::ERROR_MESSAGE).is_some());
    }
}
