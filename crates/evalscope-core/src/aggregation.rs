//! Reduction of per-trial scores to one number per scorer.
//!
//! Every strategy is order-independent, so trial completion order never
//! changes a result. Empty input yields a fixed default instead of failing:
//! `mean` 0, `median` 0, `pass@k` 0, `pass^k` 1.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Threshold used by `pass@k` / `pass^k` when none is given.
pub const DEFAULT_PASS_THRESHOLD: f64 = 1.0;

/// Named reduction strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
    /// 1 if any score reaches the threshold.
    PassAtK { threshold: f64 },
    /// 1 if every score reaches the threshold.
    PassHatK { threshold: f64 },
}

impl Aggregation {
    pub fn pass_at_k(threshold: Option<f64>) -> Self {
        Aggregation::PassAtK {
            threshold: threshold.unwrap_or(DEFAULT_PASS_THRESHOLD),
        }
    }

    pub fn pass_hat_k(threshold: Option<f64>) -> Self {
        Aggregation::PassHatK {
            threshold: threshold.unwrap_or(DEFAULT_PASS_THRESHOLD),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Median => "median",
            Aggregation::PassAtK { .. } => "pass@k",
            Aggregation::PassHatK { .. } => "pass^k",
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            Aggregation::Mean | Aggregation::Median => None,
            Aggregation::PassAtK { threshold } | Aggregation::PassHatK { threshold } => {
                Some(*threshold)
            }
        }
    }

    pub fn aggregate(&self, scores: &[f64]) -> f64 {
        match self {
            Aggregation::Mean => mean(scores),
            Aggregation::Median => median(scores),
            Aggregation::PassAtK { threshold } => pass_at_k(scores, *threshold),
            Aggregation::PassHatK { threshold } => pass_hat_k(scores, *threshold),
        }
    }

    /// Whether an aggregated `value` counts as passing. Pass strategies pass
    /// at 1; `mean`/`median` pass when a scorer threshold is given and met.
    pub fn passed(&self, value: f64, scorer_threshold: Option<f64>) -> Option<bool> {
        match self {
            Aggregation::PassAtK { .. } | Aggregation::PassHatK { .. } => Some(value >= 1.0),
            Aggregation::Mean | Aggregation::Median => scorer_threshold.map(|t| value >= t),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Aggregation {
    type Err = ConfigError;

    /// Parses `mean`, `median`, `pass@k` and `pass^k`, the latter two with
    /// the default threshold.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Aggregation::Mean),
            "median" => Ok(Aggregation::Median),
            "pass@k" => Ok(Aggregation::pass_at_k(None)),
            "pass^k" => Ok(Aggregation::pass_hat_k(None)),
            other => Err(ConfigError::InvalidSuite(format!(
                "unknown aggregation strategy {other:?}"
            ))),
        }
    }
}

/// Arithmetic mean; 0 for empty input.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Middle value (average of the two middle values for even lengths); 0 for
/// empty input.
pub fn median(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// 1 if any score reaches `threshold`, else 0; 0 for empty input.
pub fn pass_at_k(scores: &[f64], threshold: f64) -> f64 {
    if scores.iter().any(|&s| s >= threshold) {
        1.0
    } else {
        0.0
    }
}

/// 1 if every score reaches `threshold`, else 0; 1 for empty input
/// (vacuous truth, intentionally unlike `pass@k`).
pub fn pass_hat_k(scores: &[f64], threshold: f64) -> f64 {
    if scores.iter().all(|&s| s >= threshold) {
        1.0
    } else {
        0.0
    }
}
