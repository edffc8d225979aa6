//! Scorer Invoker: named scoring functions with a uniform result shape.
//!
//! A scoring function may be sync or async and may return a number, a
//! boolean (normalized to 1/0) or a score with metadata. Errors, panics and
//! timeouts inside a scorer become [`EvalError::Scorer`] /
//! [`EvalError::Timeout`], never a task failure.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregation::Aggregation;
use crate::domain::{ErrorKind, EvalError, EvalResult, ScoreResult, ScorerFailure};

/// Arguments passed to every scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerArgs {
    pub input: Value,
    pub output: Value,
    pub expected: Option<Value>,
}

impl ScorerArgs {
    pub fn new(input: Value, output: Value, expected: Option<Value>) -> Self {
        Self {
            input,
            output,
            expected,
        }
    }
}

/// What a scoring function may return.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreValue {
    Number(f64),
    Bool(bool),
    Detailed { score: f64, metadata: Option<Value> },
}

impl ScoreValue {
    pub fn detailed(score: f64, metadata: Value) -> Self {
        ScoreValue::Detailed {
            score,
            metadata: Some(metadata),
        }
    }

    fn into_parts(self) -> (f64, Option<Value>) {
        match self {
            ScoreValue::Number(score) => (score, None),
            ScoreValue::Bool(pass) => (if pass { 1.0 } else { 0.0 }, None),
            ScoreValue::Detailed { score, metadata } => (score, metadata),
        }
    }
}

impl From<f64> for ScoreValue {
    fn from(score: f64) -> Self {
        ScoreValue::Number(score)
    }
}

impl From<bool> for ScoreValue {
    fn from(pass: bool) -> Self {
        ScoreValue::Bool(pass)
    }
}

type ScoreFn = dyn Fn(ScorerArgs) -> BoxFuture<'static, anyhow::Result<ScoreValue>> + Send + Sync;

/// Named scorer descriptor. Cheap to clone; shared across concurrent runs.
#[derive(Clone)]
pub struct Scorer {
    name: String,
    func: Arc<ScoreFn>,
    aggregation: Aggregation,
    threshold: Option<f64>,
}

impl fmt::Debug for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scorer")
            .field("name", &self.name)
            .field("aggregation", &self.aggregation)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Scorer {
    /// Scorer from a synchronous function.
    pub fn new<F, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ScorerArgs) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<ScoreValue>,
    {
        let f = Arc::new(f);
        Self::from_fn(
            name,
            Arc::new(move |args: ScorerArgs| {
                let f = Arc::clone(&f);
                async move { f(&args).map(Into::<ScoreValue>::into) }.boxed()
            }),
        )
    }

    /// Scorer from an async function.
    pub fn new_async<F, Fut, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ScorerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<ScoreValue>,
    {
        Self::from_fn(
            name,
            Arc::new(move |args: ScorerArgs| {
                f(args)
                    .map(|r| r.map(Into::<ScoreValue>::into))
                    .boxed()
            }),
        )
    }

    fn from_fn(name: impl Into<String>, func: Arc<ScoreFn>) -> Self {
        Self {
            name: name.into(),
            func,
            aggregation: Aggregation::default(),
            threshold: None,
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Per-trial pass threshold; sets `passed` on each [`ScoreResult`].
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Explicit threshold, else the aggregation's.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold.or(self.aggregation.threshold())
    }

    /// Run the scoring function once, bounded by `limit`.
    pub async fn invoke(&self, args: ScorerArgs, limit: Duration) -> EvalResult<ScoreResult> {
        let func = Arc::clone(&self.func);
        // Calling `func` inside the future keeps a panicking sync scorer
        // within `catch_unwind`.
        let call = AssertUnwindSafe(async move { func(args).await }).catch_unwind();

        let value = match tokio::time::timeout(limit, call).await {
            Err(_) => {
                return Err(EvalError::Timeout {
                    operation: format!("scorer {}", self.name),
                    limit_ms: limit.as_millis() as u64,
                })
            }
            Ok(Err(panic)) => return Err(self.error(panic_message(panic.as_ref()))),
            Ok(Ok(Err(e))) => return Err(self.error(format!("{e:#}"))),
            Ok(Ok(Ok(value))) => value,
        };

        let (score, metadata) = value.into_parts();
        if !score.is_finite() {
            return Err(self.error(format!("non-finite score {score}")));
        }
        Ok(ScoreResult::new(&self.name, score)
            .with_metadata(metadata)
            .with_threshold(self.threshold()))
    }

    fn error(&self, message: String) -> EvalError {
        EvalError::Scorer {
            scorer: self.name.clone(),
            message,
        }
    }
}

impl ScorerFailure {
    /// Failure record for `scorer` from the error [`Scorer::invoke`] returned.
    pub fn from_error(scorer: &str, error: &EvalError) -> Self {
        let message = match error {
            EvalError::Scorer { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let kind = match error.kind() {
            ErrorKind::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Scorer,
        };
        Self {
            scorer: scorer.to_string(),
            kind,
            message,
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
