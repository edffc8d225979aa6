//! Declared flag schema: namespaces, dotted paths and their defaults.
//!
//! A schema is declared as a JSON object. Nested objects are namespaces;
//! every other value (scalar, array, null) is a leaf flag whose value is the
//! default. A `null` default declares a flag without a default, so reads fall
//! through to the caller's fallback.
//!
//! ```ignore
//! let schema = FlagSchema::new(json!({
//!     "temperature": 0.7,
//!     "model": { "name": "small", "retries": 2 },
//! }))?;
//! assert!(schema.is_leaf("model.name"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::error::{ConfigError, EvalResult};

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid segment regex"))
}

/// Check that `path` is a well-formed dotted path.
pub fn validate_path(path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::InvalidPath {
            path: path.to_string(),
            reason: "path must not be empty".to_string(),
        });
    }
    for segment in path.split('.') {
        if !segment_regex().is_match(segment) {
            return Err(ConfigError::InvalidPath {
                path: path.to_string(),
                reason: format!("segment {segment:?} is not an identifier"),
            });
        }
    }
    Ok(())
}

/// JSON type name used in mismatch errors.
pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check an override/fact `value` against the declared `default` for `path`.
/// A `null` default accepts any value.
pub(crate) fn check_type(path: &str, default: &Value, value: &Value) -> Result<(), ConfigError> {
    if default.is_null() || value_type_name(default) == value_type_name(value) {
        return Ok(());
    }
    Err(ConfigError::TypeMismatch {
        path: path.to_string(),
        expected: value_type_name(default).to_string(),
        actual: value_type_name(value).to_string(),
    })
}

/// Flattened view of a declared schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagSchema {
    /// Leaf path -> declared default.
    defaults: BTreeMap<String, Value>,
    /// Every namespace path (including nested ones).
    namespaces: BTreeSet<String>,
}

impl FlagSchema {
    /// Build a schema from its JSON declaration. Fails on malformed keys,
    /// non-object roots, and empty namespaces.
    pub fn new(definition: Value) -> EvalResult<Self> {
        let Value::Object(root) = definition else {
            return Err(ConfigError::InvalidSchema(format!(
                "schema root must be an object, got {}",
                value_type_name(&definition)
            ))
            .into());
        };
        let mut schema = Self::default();
        schema.flatten("", &root)?;
        Ok(schema)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn flatten(&mut self, prefix: &str, map: &Map<String, Value>) -> EvalResult<()> {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if !segment_regex().is_match(key) {
                return Err(ConfigError::InvalidPath {
                    path,
                    reason: format!("key {key:?} is not an identifier"),
                }
                .into());
            }
            match value {
                Value::Object(inner) => {
                    if inner.is_empty() {
                        return Err(ConfigError::InvalidSchema(format!(
                            "namespace {path} declares no flags"
                        ))
                        .into());
                    }
                    self.namespaces.insert(path.clone());
                    self.flatten(&path, inner)?;
                }
                leaf => {
                    self.defaults.insert(path, leaf.clone());
                }
            }
        }
        Ok(())
    }

    pub fn is_leaf(&self, path: &str) -> bool {
        self.defaults.contains_key(path)
    }

    pub fn is_namespace(&self, path: &str) -> bool {
        self.namespaces.contains(path)
    }

    /// True when `path` names a leaf flag or a namespace.
    pub fn contains(&self, path: &str) -> bool {
        self.is_leaf(path) || self.is_namespace(path)
    }

    pub fn default_for(&self, path: &str) -> Option<&Value> {
        self.defaults.get(path)
    }

    /// All leaf paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.defaults.keys().map(String::as_str)
    }

    /// Top-level names: namespaces and root-level leaf flags.
    pub fn top_level(&self) -> BTreeSet<String> {
        self.defaults
            .keys()
            .chain(self.namespaces.iter())
            .map(|p| p.split('.').next().unwrap_or(p).to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    /// Validate one override entry: the path must be a declared leaf and the
    /// value must match the default's JSON type.
    pub fn validate_override(&self, path: &str, value: &Value) -> Result<(), ConfigError> {
        validate_path(path)?;
        match self.defaults.get(path) {
            Some(default) => check_type(path, default, value),
            None if self.is_namespace(path) => Err(ConfigError::InvalidPath {
                path: path.to_string(),
                reason: "overrides must target a leaf flag, not a namespace".to_string(),
            }),
            None => Err(ConfigError::UnknownFlag {
                path: path.to_string(),
            }),
        }
    }

    /// Resolve `path` against `overrides` then the declared default.
    ///
    /// Returns `Ok(None)` for a declared leaf with neither an override nor a
    /// default. Namespace paths resolve to an object assembled from their
    /// leaves; leaves without a value are omitted.
    pub fn resolve(
        &self,
        path: &str,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>, ConfigError> {
        validate_path(path)?;
        if let Some(default) = self.defaults.get(path) {
            let value = overrides.get(path).unwrap_or(default);
            return Ok((!value.is_null()).then(|| value.clone()));
        }
        if !self.is_namespace(path) {
            return Err(ConfigError::UnknownFlag {
                path: path.to_string(),
            });
        }

        let prefix = format!("{path}.");
        let mut assembled = Value::Object(Map::new());
        for (leaf, default) in self.defaults.range(prefix.clone()..) {
            let Some(rest) = leaf.strip_prefix(&prefix) else {
                break;
            };
            let value = overrides.get(leaf).unwrap_or(default);
            if !value.is_null() {
                insert_dotted(&mut assembled, rest, value.clone());
            }
        }
        Ok(Some(assembled))
    }

    /// Restrict the schema to the listed top-level namespaces. Unknown names
    /// are skipped with a warning.
    pub fn pick(&self, namespaces: &[&str]) -> FlagSchema {
        let mut picked = FlagSchema::default();
        for &ns in namespaces {
            if !self.contains(ns) {
                crate::obs::emit_unknown_namespace(ns);
                continue;
            }
            let prefix = format!("{ns}.");
            for (path, default) in &self.defaults {
                if path == ns || path.starts_with(&prefix) {
                    picked.defaults.insert(path.clone(), default.clone());
                }
            }
            for path in &self.namespaces {
                if path == ns || path.starts_with(&prefix) {
                    picked.namespaces.insert(path.clone());
                }
            }
        }
        picked
    }
}

fn insert_dotted(target: &mut Value, dotted: &str, value: Value) {
    let mut cur = target;
    let mut segments = dotted.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Value::Object(map) = cur else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        cur = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Schema restricted to `namespaces`; warns (non-fatal) on names the schema
/// does not declare.
pub fn pick_flags(schema: &FlagSchema, namespaces: &[&str]) -> FlagSchema {
    schema.pick(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> FlagSchema {
        FlagSchema::new(json!({
            "temperature": 0.7,
            "model": {"name": "small", "retries": 2, "stop": null},
            "ui": {"theme": {"mode": "dark"}}
        }))
        .expect("valid schema")
    }

    #[test]
    fn test_flatten_leaves_and_namespaces() {
        let s = schema();
        assert!(s.is_leaf("temperature"));
        assert!(s.is_leaf("model.name"));
        assert!(s.is_leaf("ui.theme.mode"));
        assert!(s.is_namespace("ui.theme"));
        assert!(!s.contains("model.nmae"));
        assert_eq!(s.top_level().len(), 3);
    }

    #[test]
    fn test_rejects_non_object_root() {
        assert!(FlagSchema::new(json!([1, 2])).is_err());
    }

    #[test]
    fn test_rejects_empty_namespace() {
        assert!(FlagSchema::new(json!({"model": {}})).is_err());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(FlagSchema::new(json!({"model.name": "x"})).is_err());
        assert!(FlagSchema::new(json!({"1st": true})).is_err());
    }

    #[test]
    fn test_validate_path_syntax() {
        assert!(validate_path("model.name").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("model..name").is_err());
        assert!(validate_path("model.").is_err());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let s = schema();
        let mut overrides = BTreeMap::new();
        overrides.insert("temperature".to_string(), json!(0.2));

        assert_eq!(s.resolve("temperature", &overrides).unwrap(), Some(json!(0.2)));
        assert_eq!(s.resolve("model.name", &overrides).unwrap(), Some(json!("small")));
        assert_eq!(s.resolve("model.stop", &overrides).unwrap(), None);
    }

    #[test]
    fn test_resolve_unknown_path_errors() {
        let err = schema()
            .resolve("model.nmae", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFlag { .. }));
    }

    #[test]
    fn test_resolve_namespace_assembles_object() {
        let s = schema();
        let mut overrides = BTreeMap::new();
        overrides.insert("model.retries".to_string(), json!(5));

        let model = s.resolve("model", &overrides).unwrap();
        assert_eq!(model, Some(json!({"name": "small", "retries": 5})));

        let ui = s.resolve("ui", &BTreeMap::new()).unwrap();
        assert_eq!(ui, Some(json!({"theme": {"mode": "dark"}})));
    }

    #[test]
    fn test_validate_override_types() {
        let s = schema();
        assert!(s.validate_override("temperature", &json!(1)).is_ok());
        assert!(s.validate_override("model.stop", &json!(["\n"])).is_ok());

        let err = s.validate_override("temperature", &json!("hot")).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));

        let err = s.validate_override("model", &json!("x")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));

        let err = s.validate_override("missing", &json!(1)).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFlag { .. }));
    }

    #[test]
    fn test_pick_restricts_namespaces() {
        let picked = pick_flags(&schema(), &["model", "nope"]);
        assert!(picked.is_leaf("model.name"));
        assert!(!picked.contains("temperature"));
        assert!(!picked.contains("ui"));
    }

    #[test]
    fn test_pick_root_leaf() {
        let picked = schema().pick(&["temperature"]);
        assert!(picked.is_leaf("temperature"));
        assert_eq!(picked.paths().count(), 1);
    }
}
