//! Run-scoped flag overrides resolved through ambient lookups.
//!
//! The active override set lives in a tokio task-local [`ScopeFrame`], not in
//! a global. `with_overrides` installs a child frame for the duration of a
//! future; the frame travels with that future across every `.await` and is
//! torn down when the future completes, errors, or is dropped. Two futures
//! polled on the same task (for example through `join_all`) each see only
//! their own frame.
//!
//! Task-locals do not cross `tokio::spawn`. Use [`bind_current`] to carry
//! the caller's frame into a spawned future.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::futures::TaskLocalFuture;

use crate::domain::error::{ConfigError, EvalResult};
use crate::flags::schema::FlagSchema;

tokio::task_local! {
    static ACTIVE_FRAME: Arc<ScopeFrame>;
}

/// Flat mapping of dotted flag paths to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagOverrides(BTreeMap<String, Value>);

impl FlagOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, value: Value) -> Self {
        self.0.insert(path.to_string(), value);
        self
    }

    /// Build from JSON. Nested objects are flattened into dotted paths, so
    /// `{"model": {"name": "x"}}` and `{"model.name": "x"}` are equivalent.
    pub fn from_value(value: &Value) -> EvalResult<Self> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidSchema(
                "flag overrides must be a JSON object".to_string(),
            )
            .into());
        };
        let mut flat = BTreeMap::new();
        flatten_into(&mut flat, "", map);
        Ok(Self(flat))
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.0.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries of `other` replace entries of `self`.
    pub fn merged_with(&self, other: &FlagOverrides) -> FlagOverrides {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        FlagOverrides(merged)
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: &str, map: &Map<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, &path, inner),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// One activation of the flag scope. Holds the effective overrides (outer
/// frames merged in) plus what the code running inside it read and recorded.
#[derive(Debug, Default)]
pub struct ScopeFrame {
    overrides: FlagOverrides,
    accessed: Mutex<BTreeMap<String, Value>>,
    facts: Mutex<BTreeMap<String, Value>>,
}

impl ScopeFrame {
    pub fn new(overrides: FlagOverrides) -> Self {
        Self {
            overrides,
            ..Default::default()
        }
    }

    /// Frame that shadows `self` with `overrides`.
    pub fn child(&self, overrides: &FlagOverrides) -> Self {
        Self::new(self.overrides.merged_with(overrides))
    }

    pub fn overrides(&self) -> &FlagOverrides {
        &self.overrides
    }

    /// Resolved flag values read inside this frame.
    pub fn accessed(&self) -> BTreeMap<String, Value> {
        self.accessed
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn facts(&self) -> BTreeMap<String, Value> {
        self.facts.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn record_access(&self, path: &str, value: &Value) {
        if let Ok(mut accessed) = self.accessed.lock() {
            accessed.insert(path.to_string(), value.clone());
        }
    }

    pub(crate) fn record_fact(&self, path: &str, value: &Value) {
        if let Ok(mut facts) = self.facts.lock() {
            facts.insert(path.to_string(), value.clone());
        }
    }
}

/// The frame active on the current task, if any.
pub fn current_frame() -> Option<Arc<ScopeFrame>> {
    ACTIVE_FRAME.try_with(Arc::clone).ok()
}

/// Run `fut` with `frame` as the active frame.
pub fn enter_frame<F: Future>(
    frame: Arc<ScopeFrame>,
    fut: F,
) -> TaskLocalFuture<Arc<ScopeFrame>, F> {
    ACTIVE_FRAME.scope(frame, fut)
}

/// Wrap `fut` so it runs under the caller's active frame (or an empty one).
/// Required before handing a future to `tokio::spawn`.
pub fn bind_current<F: Future>(fut: F) -> TaskLocalFuture<Arc<ScopeFrame>, F> {
    enter_frame(current_frame().unwrap_or_default(), fut)
}

/// Flag scope over a declared schema.
#[derive(Debug, Clone)]
pub struct FlagScope {
    schema: Arc<FlagSchema>,
}

impl FlagScope {
    pub fn new(schema: FlagSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &FlagSchema {
        &self.schema
    }

    /// Resolve `path`: active overrides, then the schema default, then
    /// `fallback`. Unknown paths are a `ConfigError`.
    pub fn read(&self, path: &str, fallback: Value) -> EvalResult<Value> {
        let frame = current_frame();
        let empty = BTreeMap::new();
        let overrides = frame
            .as_ref()
            .map(|f| f.overrides.as_map())
            .unwrap_or(&empty);
        let value = self.schema.resolve(path, overrides)?.unwrap_or(fallback);
        if let Some(frame) = &frame {
            frame.record_access(path, &value);
        }
        Ok(value)
    }

    /// Typed variant of [`FlagScope::read`].
    pub fn read_as<T>(&self, path: &str, fallback: T) -> EvalResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let fallback = serde_json::to_value(fallback)?;
        let value = self.read(path, fallback)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Check every override against the schema.
    pub fn validate(&self, overrides: &FlagOverrides) -> EvalResult<()> {
        for (path, value) in overrides.iter() {
            self.schema.validate_override(path, value)?;
        }
        Ok(())
    }

    /// Validated child of the current frame (or of an empty root).
    pub fn activate(&self, overrides: &FlagOverrides) -> EvalResult<Arc<ScopeFrame>> {
        self.validate(overrides)?;
        let frame = match current_frame() {
            Some(outer) => outer.child(overrides),
            None => ScopeFrame::new(overrides.clone()),
        };
        Ok(Arc::new(frame))
    }

    /// Run `fut` with `overrides` layered over the current scope. The prior
    /// scope is restored however `fut` exits, including cancellation.
    pub async fn with_overrides<F: Future>(
        &self,
        overrides: FlagOverrides,
        fut: F,
    ) -> EvalResult<F::Output> {
        let frame = self.activate(&overrides)?;
        Ok(enter_frame(frame, fut).await)
    }

    /// Synchronous variant of [`FlagScope::with_overrides`].
    pub fn with_overrides_sync<R>(
        &self,
        overrides: FlagOverrides,
        f: impl FnOnce() -> R,
    ) -> EvalResult<R> {
        let frame = self.activate(&overrides)?;
        Ok(ACTIVE_FRAME.sync_scope(frame, f))
    }
}

impl From<FlagSchema> for FlagScope {
    fn from(schema: FlagSchema) -> Self {
        Self::new(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::EvalError;
    use serde_json::json;

    fn scope() -> FlagScope {
        FlagScope::new(
            FlagSchema::new(json!({
                "temperature": 0.7,
                "model": {"name": "small", "stop": null}
            }))
            .expect("valid schema"),
        )
    }

    #[test]
    fn test_read_without_scope_uses_default() {
        let s = scope();
        assert_eq!(s.read("temperature", json!(0.1)).unwrap(), json!(0.7));
        assert_eq!(s.read("model.stop", json!("\n")).unwrap(), json!("\n"));
    }

    #[test]
    fn test_read_unknown_path_is_config_error() {
        let err = scope().read("model.nmae", json!(null)).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[tokio::test]
    async fn test_with_overrides_applies_and_restores() {
        let s = scope();
        let inner = s
            .with_overrides(FlagOverrides::new().set("temperature", json!(0.9)), async {
                s.read("temperature", json!(0.0)).unwrap()
            })
            .await
            .unwrap();
        assert_eq!(inner, json!(0.9));
        assert_eq!(s.read("temperature", json!(0.0)).unwrap(), json!(0.7));
    }

    #[tokio::test]
    async fn test_with_overrides_restores_after_error() {
        let s = scope();
        let result = s
            .with_overrides(FlagOverrides::new().set("temperature", json!(0.9)), async {
                s.read("temperature", json!(0.0))?;
                Err::<(), _>(anyhow::anyhow!("task threw"))
            })
            .await
            .unwrap();
        assert!(result.is_err());
        assert_eq!(s.read("temperature", json!(0.0)).unwrap(), json!(0.7));
        assert!(current_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_overrides_restores_after_cancellation() {
        let s = scope();
        let stalled = s.with_overrides(FlagOverrides::new().set("temperature", json!(0.9)), async {
            assert_eq!(s.read("temperature", json!(0.0)).unwrap(), json!(0.9));
            std::future::pending::<()>().await
        });
        let elapsed = tokio::time::timeout(std::time::Duration::from_secs(5), stalled).await;
        assert!(elapsed.is_err());
        assert_eq!(s.read("temperature", json!(0.0)).unwrap(), json!(0.7));
        assert!(current_frame().is_none());
    }

    #[tokio::test]
    async fn test_nested_scopes_shadow() {
        let s = scope();
        let outer = FlagOverrides::new()
            .set("temperature", json!(0.9))
            .set("model.name", json!("large"));
        let (temp, name) = s
            .with_overrides(outer, async {
                s.with_overrides(FlagOverrides::new().set("temperature", json!(0.1)), async {
                    (
                        s.read("temperature", json!(0.0)).unwrap(),
                        s.read("model.name", json!("")).unwrap(),
                    )
                })
                .await
                .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(temp, json!(0.1));
        assert_eq!(name, json!("large"));
    }

    #[tokio::test]
    async fn test_invalid_override_rejected_before_running() {
        let s = scope();
        let result = s
            .with_overrides(FlagOverrides::new().set("temperature", json!("hot")), async {})
            .await;
        assert!(matches!(result, Err(EvalError::Config(_))));
    }

    #[tokio::test]
    async fn test_scope_survives_suspension() {
        let s = scope();
        let value = s
            .with_overrides(FlagOverrides::new().set("temperature", json!(0.3)), async {
                tokio::task::yield_now().await;
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                s.read("temperature", json!(0.0)).unwrap()
            })
            .await
            .unwrap();
        assert_eq!(value, json!(0.3));
    }

    #[tokio::test]
    async fn test_accessed_flags_recorded_on_frame() {
        let s = scope();
        let frame = s
            .activate(&FlagOverrides::new().set("model.name", json!("large")))
            .unwrap();
        enter_frame(Arc::clone(&frame), async {
            s.read("model.name", json!("")).unwrap();
            s.read("temperature", json!(0.0)).unwrap();
        })
        .await;
        let accessed = frame.accessed();
        assert_eq!(accessed["model.name"], json!("large"));
        assert_eq!(accessed["temperature"], json!(0.7));
    }

    #[tokio::test]
    async fn test_bind_current_crosses_spawn() {
        let s = scope();
        let value = s
            .with_overrides(FlagOverrides::new().set("temperature", json!(0.4)), async {
                let s2 = s.clone();
                tokio::spawn(bind_current(async move {
                    s2.read("temperature", json!(0.0)).unwrap()
                }))
                .await
                .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(value, json!(0.4));
    }

    #[test]
    fn test_with_overrides_sync() {
        let s = scope();
        let value = s
            .with_overrides_sync(FlagOverrides::new().set("temperature", json!(0.5)), || {
                s.read("temperature", json!(0.0)).unwrap()
            })
            .unwrap();
        assert_eq!(value, json!(0.5));
    }

    #[test]
    fn test_read_as_typed() {
        let s = scope();
        let name: String = s.read_as("model.name", String::new()).unwrap();
        assert_eq!(name, "small");
    }

    #[test]
    fn test_overrides_from_nested_value() {
        let o = FlagOverrides::from_value(&json!({"model": {"name": "x"}, "temperature": 1}))
            .unwrap();
        assert_eq!(o.get("model.name"), Some(&json!("x")));
        assert_eq!(o.len(), 2);
    }
}
