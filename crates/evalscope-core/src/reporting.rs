//! Run reports: per-case trial outcomes and per-scorer summaries.
//!
//! Failed trials are reported per trial and counted separately from scores,
//! so a 0.5 average is never confused with half the trials crashing.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CaseResult, EvalRun};

/// Report schema version written into every artifact.
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// One scorer across all cases of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerSummary {
    pub scorer: String,
    pub aggregation: String,
    /// Mean of per-case aggregated values, over cases with at least one
    /// scored trial.
    pub value: f64,
    pub cases_scored: usize,
    /// Cases with a pass verdict that passed.
    pub cases_passed: usize,
    pub scored_trials: usize,
    pub failed_trials: usize,
    pub scorer_failures: usize,
}

/// Outcome of one suite run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalReport {
    pub schema_version: String,
    pub run: EvalRun,
    /// Short digest of the suite definition.
    pub suite_version: String,
    pub suite_digest: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_trials: usize,
    pub failed_trials: usize,
    pub scorer_failures: usize,
    pub scorers: Vec<ScorerSummary>,
    pub cases: Vec<CaseResult>,
}

impl EvalReport {
    pub fn new(
        run: EvalRun,
        suite_digest: &str,
        cases: Vec<CaseResult>,
        duration_ms: u64,
    ) -> Self {
        let total_trials = cases.iter().map(|c| c.trials.len()).sum();
        let failed_trials = cases.iter().map(CaseResult::failed_trials).sum();
        let scorer_failures = cases
            .iter()
            .flat_map(|c| &c.trials)
            .map(|t| t.scorer_failures.len())
            .sum();
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run,
            suite_version: crate::domain::digest::short_digest(suite_digest).to_string(),
            suite_digest: suite_digest.to_string(),
            metadata: serde_json::Map::new(),
            finished_at: Utc::now(),
            duration_ms,
            total_trials,
            failed_trials,
            scorer_failures,
            scorers: summarize_scorers(&cases),
            cases,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn scorer(&self, name: &str) -> Option<&ScorerSummary> {
        self.scorers.iter().find(|s| s.scorer == name)
    }

    /// True when no trial failed and no scorer failed.
    pub fn is_clean(&self) -> bool {
        self.failed_trials == 0 && self.scorer_failures == 0
    }
}

fn summarize_scorers(cases: &[CaseResult]) -> Vec<ScorerSummary> {
    let mut by_name: BTreeMap<&str, ScorerSummary> = BTreeMap::new();
    let mut value_sums: BTreeMap<&str, f64> = BTreeMap::new();

    for case in cases {
        for agg in &case.aggregates {
            let summary = by_name.entry(agg.scorer.as_str()).or_insert_with(|| ScorerSummary {
                scorer: agg.scorer.clone(),
                aggregation: agg.aggregation.clone(),
                value: 0.0,
                cases_scored: 0,
                cases_passed: 0,
                scored_trials: 0,
                failed_trials: 0,
                scorer_failures: 0,
            });
            summary.scored_trials += agg.scored_trials;
            summary.failed_trials += agg.failed_trials;
            summary.scorer_failures += agg.scorer_failures;
            if agg.passed == Some(true) {
                summary.cases_passed += 1;
            }
            if agg.scored_trials > 0 {
                summary.cases_scored += 1;
                *value_sums.entry(agg.scorer.as_str()).or_default() += agg.value;
            }
        }
    }

    by_name
        .into_iter()
        .map(|(name, mut summary)| {
            if summary.cases_scored > 0 {
                let sum = value_sums.get(name).copied().unwrap_or_default();
                summary.value = sum / summary.cases_scored as f64;
            }
            summary
        })
        .collect()
}

/// Write the report as pretty JSON.
pub fn write_eval_report_json(path: &Path, report: &EvalReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize eval report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary of the report.
pub fn render_report_md(report: &EvalReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Eval: {}\n\n", report.run.name));
    out.push_str(&format!(
        "- capability: {}\n- version: {}\n- cases: {}\n- trials: {} ({} failed)\n- scorer failures: {}\n\n",
        report.run.capability,
        report.suite_version,
        report.cases.len(),
        report.total_trials,
        report.failed_trials,
        report.scorer_failures,
    ));

    out.push_str("## Scorers\n\n");
    out.push_str("| scorer | aggregation | value | cases passed | scored trials | failed trials | scorer failures |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    for s in &report.scorers {
        out.push_str(&format!(
            "| {} | {} | {:.3} | {}/{} | {} | {} | {} |\n",
            s.scorer,
            s.aggregation,
            s.value,
            s.cases_passed,
            s.cases_scored,
            s.scored_trials,
            s.failed_trials,
            s.scorer_failures,
        ));
    }

    let failures: Vec<String> = report
        .cases
        .iter()
        .flat_map(|case| {
            case.trials.iter().filter_map(move |trial| {
                trial.outcome.error().map(|e| {
                    format!(
                        "- case {} trial {}: {}\n",
                        case.case.index, trial.index, e.message
                    )
                })
            })
        })
        .collect();
    if !failures.is_empty() {
        out.push_str("\n## Failed Trials\n\n");
        for line in failures {
            out.push_str(&line);
        }
    }
    out
}
