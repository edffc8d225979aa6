//! Application-facing handle over flags and facts.
//!
//! Application code reads flags through an [`AppScope`] so the evaluation
//! harness can swap values per run. Facts go the other way: the application
//! reports observed values (retrieved document count, chosen route, ...) and
//! they land on the current trial record and the ambient span.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use evalscope_trace::AttrValue;

use crate::correlation::attributes as attr;
use crate::correlation::context::current_span;
use crate::domain::error::{ConfigError, EvalResult};
use crate::flags::schema::{check_type, validate_path, FlagSchema};
use crate::flags::scope::{current_frame, FlagScope};

/// Schemas for [`create_app_scope`]. Both are JSON objects in the same shape
/// [`FlagSchema::new`] accepts.
#[derive(Debug, Clone)]
pub struct AppScopeConfig {
    pub flag_schema: Value,
    pub fact_schema: Option<Value>,
}

impl AppScopeConfig {
    pub fn new(flag_schema: Value) -> Self {
        Self {
            flag_schema,
            fact_schema: None,
        }
    }

    pub fn with_fact_schema(mut self, fact_schema: Value) -> Self {
        self.fact_schema = Some(fact_schema);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AppScope {
    flags: FlagScope,
    facts: Option<FlagSchema>,
}

/// Build an [`AppScope`]. Malformed schemas fail here, before any read.
pub fn create_app_scope(config: AppScopeConfig) -> EvalResult<AppScope> {
    let flags = FlagScope::new(FlagSchema::new(config.flag_schema)?);
    let facts = config.fact_schema.map(FlagSchema::new).transpose()?;
    Ok(AppScope { flags, facts })
}

impl AppScope {
    /// Resolved value of `path` in the current scope.
    pub fn flag(&self, path: &str, fallback: Value) -> EvalResult<Value> {
        self.flags.read(path, fallback)
    }

    pub fn flag_as<T>(&self, path: &str, fallback: T) -> EvalResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.flags.read_as(path, fallback)
    }

    /// Record an observed fact. Without a fact schema any well-formed path
    /// is accepted; with one, the path must be a declared leaf and the value
    /// must match its declared type.
    pub fn fact(&self, path: &str, value: Value) -> EvalResult<()> {
        validate_path(path)?;
        if let Some(schema) = &self.facts {
            let Some(default) = schema.default_for(path) else {
                return Err(ConfigError::UnknownFact {
                    path: path.to_string(),
                }
                .into());
            };
            check_type(path, default, &value)?;
        }

        if let Some(frame) = current_frame() {
            frame.record_fact(path, &value);
        }
        if let Some(active) = current_span() {
            active.span.set_attribute(
                &format!("{}{path}", attr::FACT_PREFIX),
                AttrValue::json(&value),
            );
        }
        tracing::debug!(event = "fact.recorded", path = %path);
        Ok(())
    }

    /// Schema restricted to `namespaces`.
    pub fn pick_flags(&self, namespaces: &[&str]) -> FlagSchema {
        self.flags.schema().pick(namespaces)
    }

    pub fn flag_scope(&self) -> &FlagScope {
        &self.flags
    }

    /// Leaf defaults of the flag schema, keyed by dotted path.
    pub fn flag_defaults(&self) -> BTreeMap<String, Value> {
        let schema = self.flags.schema();
        schema
            .paths()
            .filter_map(|p| schema.default_for(p).map(|v| (p.to_string(), v.clone())))
            .collect()
    }
}
