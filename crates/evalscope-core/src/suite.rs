//! Suite definition, registry and execution.
//!
//! ```ignore
//! let suite = define_eval_suite(
//!     "support-triage",
//!     EvalSuiteOptions::new("support-agent", DataSource::records(cases), task)
//!         .with_step("categorize")
//!         .with_scorer(exact_match)
//!         .with_trials(3),
//! )?;
//! let report = suite.run(tracer, EvalRunOptions::default()).await?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use evalscope_trace::Tracer;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::RunnerConfig;
use crate::correlation::{ExperimentMeta, SpanCorrelator};
use crate::domain::digest::{compute_digest, short_digest};
use crate::domain::{CaseRecord, ConfigError, EvalError, EvalResult, EvalRun, ExperimentCase};
use crate::flags::{current_frame, enter_frame, validate_path, FlagOverrides, FlagSchema, ScopeFrame};
use crate::metrics::METRICS;
use crate::obs;
use crate::reporting::EvalReport;
use crate::runner::CaseRunner;
use crate::scorer::Scorer;
use crate::trial::Task;

/// Lazily produced dataset.
#[async_trait]
pub trait DatasetSupplier: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<CaseRecord>>;
}

struct FnSupplier<F>(F);

#[async_trait]
impl<F, Fut> DatasetSupplier for FnSupplier<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<CaseRecord>>> + Send,
{
    async fn load(&self) -> anyhow::Result<Vec<CaseRecord>> {
        (self.0)().await
    }
}

/// Where a suite's cases come from.
#[derive(Clone)]
pub enum DataSource {
    Records(Vec<CaseRecord>),
    Supplier(Arc<dyn DatasetSupplier>),
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Records(records) => write!(f, "Records({})", records.len()),
            DataSource::Supplier(_) => f.write_str("Supplier"),
        }
    }
}

impl DataSource {
    pub fn records(records: Vec<CaseRecord>) -> Self {
        DataSource::Records(records)
    }

    pub fn supplier(supplier: impl DatasetSupplier + 'static) -> Self {
        DataSource::Supplier(Arc::new(supplier))
    }

    /// Supplier from an async function, called once per run.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<CaseRecord>>> + Send + 'static,
    {
        Self::supplier(FnSupplier(f))
    }

    pub async fn load(&self) -> EvalResult<Vec<CaseRecord>> {
        match self {
            DataSource::Records(records) => Ok(records.clone()),
            DataSource::Supplier(supplier) => supplier
                .load()
                .await
                .map_err(|e| EvalError::Dataset(format!("{e:#}"))),
        }
    }
}

/// Everything [`define_eval_suite`] needs besides the name.
#[derive(Debug, Clone)]
pub struct EvalSuiteOptions {
    pub capability: String,
    pub step: Option<String>,
    /// Flags this suite may override; overrides outside it are rejected.
    pub config_flags: Option<FlagSchema>,
    pub data: DataSource,
    pub task: Task,
    pub scorers: Vec<Scorer>,
    pub trials: u32,
    pub metadata: Map<String, Value>,
}

impl EvalSuiteOptions {
    pub fn new(capability: &str, data: DataSource, task: Task) -> Self {
        Self {
            capability: capability.to_string(),
            step: None,
            config_flags: None,
            data,
            task,
            scorers: Vec::new(),
            trials: 1,
            metadata: Map::new(),
        }
    }

    pub fn with_step(mut self, step: &str) -> Self {
        self.step = Some(step.to_string());
        self
    }

    pub fn with_config_flags(mut self, flags: FlagSchema) -> Self {
        self.config_flags = Some(flags);
        self
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn with_trials(mut self, trials: u32) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Per-run options supplied by the caller (CLI or harness).
#[derive(Debug, Clone, Default)]
pub struct EvalRunOptions {
    pub tags: Vec<String>,
    pub group: Option<String>,
    pub baseline_id: Option<String>,
    pub baseline_name: Option<String>,
    pub dataset_name: Option<String>,
    pub dataset_split: Option<String>,
    /// Outermost flag layer, applied over the ambient scope.
    pub overrides: FlagOverrides,
    pub config: RunnerConfig,
}

impl EvalRunOptions {
    pub fn with_overrides(mut self, overrides: FlagOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_baseline(mut self, id: &str, name: &str) -> Self {
        self.baseline_id = Some(id.to_string());
        self.baseline_name = Some(name.to_string());
        self
    }

    pub fn with_dataset(mut self, name: &str, split: Option<&str>) -> Self {
        self.dataset_name = Some(name.to_string());
        self.dataset_split = split.map(str::to_string);
        self
    }
}

/// A validated, runnable suite.
#[derive(Debug, Clone)]
pub struct EvalSuite {
    name: String,
    options: EvalSuiteOptions,
    digest: String,
}

/// Validate and build a suite. Definition problems are `ConfigError`s.
pub fn define_eval_suite(name: &str, options: EvalSuiteOptions) -> EvalResult<EvalSuite> {
    let invalid = |msg: String| -> EvalError { ConfigError::InvalidSuite(msg).into() };

    if name.trim().is_empty() {
        return Err(invalid("suite name must not be empty".to_string()));
    }
    if options.capability.trim().is_empty() {
        return Err(invalid(format!("suite {name}: capability must not be empty")));
    }
    if options.trials == 0 {
        return Err(invalid(format!("suite {name}: trials must be at least 1")));
    }
    if options.scorers.is_empty() {
        return Err(invalid(format!("suite {name}: at least one scorer is required")));
    }
    let mut seen = BTreeSet::new();
    for scorer in &options.scorers {
        if !seen.insert(scorer.name()) {
            return Err(invalid(format!(
                "suite {name}: duplicate scorer name {:?}",
                scorer.name()
            )));
        }
    }

    let digest = compute_digest(&definition_json(name, &options))?;
    Ok(EvalSuite {
        name: name.to_string(),
        options,
        digest,
    })
}

/// The parts of a definition that identify a suite version.
fn definition_json(name: &str, options: &EvalSuiteOptions) -> Value {
    let scorers: Vec<Value> = options
        .scorers
        .iter()
        .map(|s| {
            json!({
                "name": s.name(),
                "aggregation": s.aggregation().name(),
                "threshold": s.threshold(),
            })
        })
        .collect();
    let flags: BTreeMap<&str, Value> = options
        .config_flags
        .iter()
        .flat_map(|schema| {
            schema
                .paths()
                .map(move |p| (p, schema.default_for(p).cloned().unwrap_or(Value::Null)))
        })
        .collect();
    json!({
        "name": name,
        "capability": options.capability,
        "step": options.step,
        "trials": options.trials,
        "scorers": scorers,
        "flags": flags,
    })
}

impl EvalSuite {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &str {
        &self.options.capability
    }

    pub fn step(&self) -> Option<&str> {
        self.options.step.as_deref()
    }

    pub fn trials(&self) -> u32 {
        self.options.trials
    }

    pub fn scorers(&self) -> &[Scorer] {
        &self.options.scorers
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.options.metadata
    }

    /// SHA-256 of the canonical definition.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Short form of [`EvalSuite::digest`], used as the experiment version.
    pub fn version(&self) -> &str {
        short_digest(&self.digest)
    }

    /// Check run overrides against `config_flags`. Without declared flags
    /// only path syntax is checked.
    pub fn validate_overrides(&self, overrides: &FlagOverrides) -> EvalResult<()> {
        for (path, value) in overrides.iter() {
            validate_path(path)?;
            let Some(schema) = &self.options.config_flags else {
                continue;
            };
            if schema.contains(path) {
                schema.validate_override(path, value)?;
                continue;
            }
            let top = path.split('.').next().unwrap_or(path);
            let allowed = schema.top_level();
            if allowed.contains(top) {
                return Err(ConfigError::UnknownFlag { path: path.clone() }.into());
            }
            return Err(ConfigError::NamespaceNotAllowed {
                path: path.clone(),
                allowed: allowed.into_iter().collect::<Vec<_>>().join(", "),
            }
            .into());
        }
        Ok(())
    }

    /// Execute the suite and report.
    ///
    /// Configuration and dataset problems are returned as errors; task and
    /// scorer failures are recorded in the report.
    pub async fn run(&self, tracer: Arc<dyn Tracer>, options: EvalRunOptions) -> EvalResult<EvalReport> {
        self.validate_overrides(&options.overrides)?;
        let records = self.options.data.load().await?;
        let cases: Vec<ExperimentCase> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| ExperimentCase::from_record(index, record))
            .collect();

        let run = EvalRun::new(
            &self.name,
            &self.options.capability,
            self.options.step.as_deref(),
            self.options.trials,
        )
        .with_tags(options.tags.clone());
        let run_id = run.run_id.to_string();
        let meta = ExperimentMeta {
            version: Some(self.version().to_string()),
            group: options.group.clone(),
            base_id: options.baseline_id.clone(),
            base_name: options.baseline_name.clone(),
            dataset_name: options.dataset_name.clone(),
            dataset_split: options.dataset_split.clone(),
            dataset_size: cases.len(),
        };

        let correlator = SpanCorrelator::new(tracer);
        let runner = CaseRunner::new(
            self.options.task.clone(),
            self.options.scorers.clone(),
            correlator.clone(),
        )
        .with_config(options.config.clone())
        .with_trials(self.options.trials)
        .with_capability(&self.options.capability, self.options.step.as_deref());

        let frame = Arc::new(match current_frame() {
            Some(outer) => outer.child(&options.overrides),
            None => ScopeFrame::new(options.overrides.clone()),
        });

        obs::emit_run_started(&run_id, &self.name, cases.len(), self.options.trials);
        let started = Instant::now();
        let run_span = correlator.start_run_span(&run, &meta);
        let results = enter_frame(frame, runner.run_cases(cases, Some(run_span.context())))
            .instrument(obs::run_span(&run_id, &self.name))
            .await;
        correlator.finish_run_span(run_span.as_ref(), &results);

        let report = EvalReport::new(run, &self.digest, results, started.elapsed().as_millis() as u64)
            .with_metadata(self.options.metadata.clone());
        obs::emit_run_finished(
            &run_id,
            report.duration_ms,
            report.failed_trials,
            report.scorer_failures,
        );
        METRICS.flush();
        Ok(report)
    }
}

/// Defined suites by name, for runners that list and select suites.
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    suites: BTreeMap<String, EvalSuite>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suite. A second suite with the same name is rejected.
    pub fn register(&mut self, suite: EvalSuite) -> EvalResult<()> {
        if self.suites.contains_key(suite.name()) {
            return Err(ConfigError::InvalidSuite(format!(
                "suite {} is already registered",
                suite.name()
            ))
            .into());
        }
        self.suites.insert(suite.name().to_string(), suite);
        Ok(())
    }

    /// [`define_eval_suite`] then [`SuiteRegistry::register`].
    pub fn define(&mut self, name: &str, options: EvalSuiteOptions) -> EvalResult<&EvalSuite> {
        self.register(define_eval_suite(name, options)?)?;
        self.get(name)
            .ok_or_else(|| ConfigError::InvalidSuite(format!("suite {name} not registered")).into())
    }

    pub fn get(&self, name: &str) -> Option<&EvalSuite> {
        self.suites.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.suites.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    pub async fn run(
        &self,
        name: &str,
        tracer: Arc<dyn Tracer>,
        options: EvalRunOptions,
    ) -> EvalResult<EvalReport> {
        let suite = self
            .get(name)
            .ok_or_else(|| ConfigError::InvalidSuite(format!("unknown suite {name}")))?;
        suite.run(tracer, options).await
    }
}
