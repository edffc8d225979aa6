//! Runner configuration: time bounds and case concurrency.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bounds applied by the Case Runner and the Online Eval Dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound for one task invocation.
    pub trial_timeout_ms: u64,
    /// Upper bound for one scorer invocation.
    pub scorer_timeout_ms: u64,
    /// Upper bound for one online evaluation, independent of the request
    /// that dispatched it.
    pub online_eval_timeout_ms: u64,
    /// Cases executing at once within a run.
    pub max_concurrent_cases: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            trial_timeout_ms: 300_000,
            scorer_timeout_ms: 60_000,
            online_eval_timeout_ms: 30_000,
            max_concurrent_cases: 4,
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Reads:
    /// - EVALSCOPE_TRIAL_TIMEOUT_MS
    /// - EVALSCOPE_SCORER_TIMEOUT_MS
    /// - EVALSCOPE_ONLINE_EVAL_TIMEOUT_MS
    /// - EVALSCOPE_MAX_CONCURRENT_CASES
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunnerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        read_var(&lookup, "EVALSCOPE_TRIAL_TIMEOUT_MS", &mut config.trial_timeout_ms);
        read_var(&lookup, "EVALSCOPE_SCORER_TIMEOUT_MS", &mut config.scorer_timeout_ms);
        read_var(
            &lookup,
            "EVALSCOPE_ONLINE_EVAL_TIMEOUT_MS",
            &mut config.online_eval_timeout_ms,
        );
        read_var(
            &lookup,
            "EVALSCOPE_MAX_CONCURRENT_CASES",
            &mut config.max_concurrent_cases,
        );
        if config.max_concurrent_cases == 0 {
            warn!(
                event = "config.invalid",
                key = "EVALSCOPE_MAX_CONCURRENT_CASES",
                "must be at least 1, using 1"
            );
            config.max_concurrent_cases = 1;
        }
        config
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_scorer_timeout(mut self, timeout: Duration) -> Self {
        self.scorer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_online_eval_timeout(mut self, timeout: Duration) -> Self {
        self.online_eval_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_cases(mut self, max: usize) -> Self {
        self.max_concurrent_cases = max.max(1);
        self
    }

    pub fn trial_timeout(&self) -> Duration {
        Duration::from_millis(self.trial_timeout_ms)
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.scorer_timeout_ms)
    }

    pub fn online_eval_timeout(&self) -> Duration {
        Duration::from_millis(self.online_eval_timeout_ms)
    }
}

fn read_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(event = "config.invalid", key = %key, value = %raw, "ignoring unparsable value"),
    }
}
