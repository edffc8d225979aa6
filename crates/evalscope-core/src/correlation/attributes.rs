//! Span attribute vocabulary.
//!
//! These names are the wire contract with trace-analysis consumers. Never
//! rename one; add a new key instead.

// Run
pub const RUN_ID: &str = "eval.run.id";
pub const RUN_NAME: &str = "eval.run.name";
pub const RUN_TYPE: &str = "eval.run.type";
pub const RUN_ITERATION: &str = "eval.run.iteration";
pub const RUN_TAGS: &str = "eval.run.tags";
pub const RUN_CASES: &str = "eval.run.cases";
pub const RUN_FAILED_TRIALS: &str = "eval.run.failed_trials";
pub const RUN_SCORER_FAILURES: &str = "eval.run.scorer_failures";

// Experiment
pub const EXPERIMENT_ID: &str = "eval.experiment.id";
pub const EXPERIMENT_NAME: &str = "eval.experiment.name";
pub const EXPERIMENT_TYPE: &str = "eval.experiment.type";
pub const EXPERIMENT_TAGS: &str = "eval.experiment.tags";
pub const EXPERIMENT_VERSION: &str = "eval.experiment.version";
pub const EXPERIMENT_GROUP: &str = "eval.experiment.group";
pub const EXPERIMENT_BASE_ID: &str = "eval.experiment.base_id";
pub const EXPERIMENT_BASE_NAME: &str = "eval.experiment.base_name";
pub const EXPERIMENT_TRIALS: &str = "eval.experiment.trials";

// Dataset
pub const DATASET_ID: &str = "eval.dataset.id";
pub const DATASET_SIZE: &str = "eval.dataset.size";
pub const DATASET_NAME: &str = "eval.dataset.name";
pub const DATASET_SPLIT: &str = "eval.dataset.split";

// Case
pub const CASE_ID: &str = "eval.case.id";
pub const CASE_INDEX: &str = "eval.case.index";
pub const CASE_INPUT: &str = "eval.case.input";
pub const CASE_OUTPUT: &str = "eval.case.output";
pub const CASE_EXPECTED: &str = "eval.case.expected";
pub const CASE_METADATA: &str = "eval.case.metadata";
pub const CASE_DESCRIPTION: &str = "eval.case.description";

// Task
pub const TASK_OUTPUT: &str = "eval.task.output";
pub const TASK_NAME: &str = "eval.task.name";
pub const TASK_TYPE: &str = "eval.task.type";
pub const TASK_TRIAL: &str = "eval.task.trial";
pub const TASK_FLAGS: &str = "eval.task.flags";
pub const TASK_DURATION_MS: &str = "eval.task.duration_ms";

// Score
pub const SCORE_NAME: &str = "eval.score.name";
pub const SCORE_VALUE: &str = "eval.score.value";
pub const SCORE_THRESHOLD: &str = "eval.score.threshold";
pub const SCORE_PASSED: &str = "eval.score.passed";
pub const SCORE_SCORER: &str = "eval.score.scorer";
pub const SCORE_METADATA: &str = "eval.score.metadata";
pub const SCORE_AGGREGATION: &str = "eval.score.aggregation";

// Failures
pub const TRIAL_ERROR: &str = "eval.trial.error";
pub const TRIAL_ERROR_KIND: &str = "eval.trial.error_kind";
pub const ERROR_MESSAGE: &str = "error.message";

// Production-side identity
pub const CAPABILITY: &str = "gen_ai.capability.name";
pub const STEP: &str = "gen_ai.step.name";
pub const CONVERSATION_ID: &str = "gen_ai.conversation.id";

// Online eval links and correlation
pub const LINK_TYPE: &str = "eval.link.type";
pub const LINK_TYPE_ONLINE: &str = "online_eval";
pub const TARGET_TRACE_ID: &str = "eval.target.trace_id";
pub const TARGET_SPAN_ID: &str = "eval.target.span_id";

/// Prefix for facts recorded through `AppScope::fact`.
pub const FACT_PREFIX: &str = "app.fact.";

// Values of the `*.type` attributes.
pub const TYPE_OFFLINE: &str = "offline";
pub const TYPE_ONLINE: &str = "online";
pub const TYPE_TASK: &str = "task";

/// Every attribute key above, for stability checks.
pub const ALL_KEYS: &[&str] = &[
    RUN_ID,
    RUN_NAME,
    RUN_TYPE,
    RUN_ITERATION,
    RUN_TAGS,
    RUN_CASES,
    RUN_FAILED_TRIALS,
    RUN_SCORER_FAILURES,
    EXPERIMENT_ID,
    EXPERIMENT_NAME,
    EXPERIMENT_TYPE,
    EXPERIMENT_TAGS,
    EXPERIMENT_VERSION,
    EXPERIMENT_GROUP,
    EXPERIMENT_BASE_ID,
    EXPERIMENT_BASE_NAME,
    EXPERIMENT_TRIALS,
    DATASET_ID,
    DATASET_SIZE,
    DATASET_NAME,
    DATASET_SPLIT,
    CASE_ID,
    CASE_INDEX,
    CASE_INPUT,
    CASE_OUTPUT,
    CASE_EXPECTED,
    CASE_METADATA,
    CASE_DESCRIPTION,
    TASK_OUTPUT,
    TASK_NAME,
    TASK_TYPE,
    TASK_TRIAL,
    TASK_FLAGS,
    TASK_DURATION_MS,
    SCORE_NAME,
    SCORE_VALUE,
    SCORE_THRESHOLD,
    SCORE_PASSED,
    SCORE_SCORER,
    SCORE_METADATA,
    SCORE_AGGREGATION,
    TRIAL_ERROR,
    TRIAL_ERROR_KIND,
    ERROR_MESSAGE,
    CAPABILITY,
    STEP,
    CONVERSATION_ID,
    LINK_TYPE,
    TARGET_TRACE_ID,
    TARGET_SPAN_ID,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique_case_insensitively() {
        let lowered: HashSet<String> = ALL_KEYS.iter().map(|k| k.to_lowercase()).collect();
        assert_eq!(lowered.len(), ALL_KEYS.len());
    }

    #[test]
    fn test_keys_are_lowercase_dotted() {
        for key in ALL_KEYS {
            assert_eq!(*key, key.to_lowercase(), "{key} must be lowercase");
            assert!(key.contains('.'), "{key} must be namespaced");
        }
    }

    #[test]
    fn test_vocabulary_names_are_stable() {
        assert_eq!(EXPERIMENT_BASE_ID, "eval.experiment.base_id");
        assert_eq!(SCORE_PASSED, "eval.score.passed");
        assert_eq!(TASK_TRIAL, "eval.task.trial");
        assert_eq!(TRIAL_ERROR, "eval.trial.error");
    }
}
