//! Evaluation run, case, trial and score records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::ErrorKind;

/// One dataset record as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseRecord {
    /// Input provided to the task.
    pub input: serde_json::Value,

    /// Expected output (optional for reference-free scorers).
    pub expected: Option<serde_json::Value>,

    /// Opaque key-values carried through to spans and reports.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Purpose of this case, for humans reading the report.
    #[serde(default)]
    pub description: Option<String>,
}

impl CaseRecord {
    pub fn new(input: serde_json::Value, expected: Option<serde_json::Value>) -> Self {
        Self {
            input,
            expected,
            metadata: serde_json::Map::new(),
            description: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A dataset record under evaluation, owned by exactly one [`EvalRun`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentCase {
    /// Zero-based position in the dataset.
    pub index: usize,
    pub input: serde_json::Value,
    pub expected: Option<serde_json::Value>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub description: Option<String>,
}

impl ExperimentCase {
    pub fn from_record(index: usize, record: CaseRecord) -> Self {
        Self {
            index,
            input: record.input,
            expected: record.expected,
            metadata: record.metadata,
            description: record.description,
        }
    }

    /// Stable identifier within the run.
    pub fn case_id(&self) -> String {
        format!("case-{}", self.index)
    }
}

/// One invocation of an evaluation suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRun {
    pub run_id: Uuid,
    pub name: String,
    pub capability: String,
    pub step: Option<String>,
    /// Declared trials per case.
    pub trials: u32,
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl EvalRun {
    pub fn new(name: &str, capability: &str, step: Option<&str>, trials: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name: name.to_string(),
            capability: capability.to_string(),
            step: step.map(str::to_string),
            trials,
            tags: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Why a trial failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrialErrorKind {
    /// The task returned an error or panicked.
    Task,
    /// The task exceeded its time bound.
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialError {
    pub kind: TrialErrorKind,
    pub message: String,
}

/// Terminal state of a trial. A trial settles exactly once, so success and
/// failure are mutually exclusive by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Succeeded { output: serde_json::Value },
    Failed { error: TrialError },
}

impl TrialOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TrialOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        match self {
            TrialOutcome::Succeeded { output } => Some(output),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TrialError> {
        match self {
            TrialOutcome::Succeeded { .. } => None,
            TrialOutcome::Failed { error } => Some(error),
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            TrialOutcome::Succeeded { .. } => "succeeded",
            TrialOutcome::Failed { .. } => "failed",
        }
    }
}

/// Output of one scorer applied to one trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    pub scorer: String,
    /// Conventionally 0.0–1.0, not enforced.
    pub score: f64,
    pub metadata: Option<serde_json::Value>,
    pub threshold: Option<f64>,
    /// Present iff `threshold` is set.
    pub passed: Option<bool>,
}

impl ScoreResult {
    pub fn new(scorer: &str, score: f64) -> Self {
        Self {
            scorer: scorer.to_string(),
            score,
            metadata: None,
            threshold: None,
            passed: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self.passed = threshold.map(|t| self.score >= t);
        self
    }
}

/// A scorer that could not produce a result for a trial. Distinct from a
/// task failure: the trial itself still succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerFailure {
    pub scorer: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// One execution of the task for a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trial {
    /// 1-based, assigned at scheduling time.
    pub index: u32,
    pub outcome: TrialOutcome,
    pub duration_ms: u64,
    pub scores: Vec<ScoreResult>,
    pub scorer_failures: Vec<ScorerFailure>,
    /// Flag values the task resolved while running.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
    /// Facts the task recorded while running.
    #[serde(default)]
    pub facts: BTreeMap<String, serde_json::Value>,
}

impl Trial {
    pub fn score_for(&self, scorer: &str) -> Option<&ScoreResult> {
        self.scores.iter().find(|s| s.scorer == scorer)
    }

    pub fn failure_for(&self, scorer: &str) -> Option<&ScorerFailure> {
        self.scorer_failures.iter().find(|f| f.scorer == scorer)
    }
}

/// Per-scorer reduction over the trials of one case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerAggregate {
    pub scorer: String,
    /// Aggregation strategy name (`mean`, `median`, `pass@k`, `pass^k`).
    pub aggregation: String,
    pub threshold: Option<f64>,
    /// Aggregated over `scored_trials` only.
    pub value: f64,
    pub scored_trials: usize,
    /// Trials whose task failed; never folded into `value`.
    pub failed_trials: usize,
    pub scorer_failures: usize,
    pub passed: Option<bool>,
}

/// All trials of one case plus their per-scorer aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub case: ExperimentCase,
    pub trials: Vec<Trial>,
    pub aggregates: Vec<ScorerAggregate>,
}

impl CaseResult {
    pub fn failed_trials(&self) -> usize {
        self.trials.iter().filter(|t| !t.outcome.is_success()).count()
    }

    pub fn aggregate_for(&self, scorer: &str) -> Option<&ScorerAggregate> {
        self.aggregates.iter().find(|a| a.scorer == scorer)
    }
}
