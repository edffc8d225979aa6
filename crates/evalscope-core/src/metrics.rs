//! Global atomic counters for evaluation observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters, no locking.
pub struct Metrics {
    trials_executed: AtomicU64,
    trials_failed: AtomicU64,
    scorer_failures: AtomicU64,
    online_evals_completed: AtomicU64,
    online_eval_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            trials_executed: AtomicU64::new(0),
            trials_failed: AtomicU64::new(0),
            scorer_failures: AtomicU64::new(0),
            online_evals_completed: AtomicU64::new(0),
            online_eval_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_trials_executed(&self) {
        self.trials_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_executed", "counter incremented");
    }

    pub fn inc_trials_failed(&self) {
        self.trials_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_failed", "counter incremented");
    }

    pub fn inc_scorer_failures(&self) {
        self.scorer_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "scorer_failures", "counter incremented");
    }

    pub fn inc_online_evals_completed(&self) {
        self.online_evals_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "online_evals_completed", "counter incremented");
    }

    pub fn inc_online_eval_failures(&self) {
        self.online_eval_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "online_eval_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, process shutdown)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            trials_executed = self.trials_executed(),
            trials_failed = self.trials_failed(),
            scorer_failures = self.scorer_failures(),
            online_evals_completed = self.online_evals_completed(),
            online_eval_failures = self.online_eval_failures(),
        );
    }

    pub fn trials_executed(&self) -> u64 {
        self.trials_executed.load(Ordering::Relaxed)
    }

    pub fn trials_failed(&self) -> u64 {
        self.trials_failed.load(Ordering::Relaxed)
    }

    pub fn scorer_failures(&self) -> u64 {
        self.scorer_failures.load(Ordering::Relaxed)
    }

    pub fn online_evals_completed(&self) -> u64 {
        self.online_evals_completed.load(Ordering::Relaxed)
    }

    pub fn online_eval_failures(&self) -> u64 {
        self.online_eval_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.trials_executed.store(0, Ordering::Relaxed);
        self.trials_failed.store(0, Ordering::Relaxed);
        self.scorer_failures.store(0, Ordering::Relaxed);
        self.online_evals_completed.store(0, Ordering::Relaxed);
        self.online_eval_failures.store(0, Ordering::Relaxed);
    }
}
