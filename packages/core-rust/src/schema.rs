//! Module configuration schemas.
//!
//! A module declares its configuration as a tree of options, each leaf
//! carrying a type, a default, an optional enum of allowed values and a doc
//! string. The core merges declared defaults with persisted overrides and
//! validates runtime patches against the same tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key that switches a module off when set to `false`.
pub const ACTIVE_KEY: &str = "active";

/// Type of a configuration leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl OptionKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            OptionKind::String => value.is_string(),
            OptionKind::Number => value.is_number(),
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::Array => value.is_array(),
            OptionKind::Object => value.is_object(),
        }
    }
}

/// Single configuration leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    pub kind: OptionKind,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl ConfigOption {
    #[must_use]
    pub fn new(kind: OptionKind, default: Value) -> Self {
        Self {
            kind,
            default,
            allowed: None,
            doc: None,
        }
    }

    #[must_use]
    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Either a leaf option or a nested group of options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigNode {
    Leaf(ConfigOption),
    Group(BTreeMap<String, ConfigNode>),
}

/// Configuration schema of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub options: BTreeMap<String, ConfigNode>,
}

impl ConfigSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level leaf.
    #[must_use]
    pub fn option(mut self, name: impl Into<String>, option: ConfigOption) -> Self {
        self.options.insert(name.into(), ConfigNode::Leaf(option));
        self
    }

    /// Adds a top-level group.
    #[must_use]
    pub fn group(mut self, name: impl Into<String>, group: ConfigSchema) -> Self {
        self.options
            .insert(name.into(), ConfigNode::Group(group.options));
        self
    }

    /// Object holding every leaf's default value.
    #[must_use]
    pub fn defaults(&self) -> Value {
        defaults_of(&self.options)
    }

    /// Validates a full or partial configuration value.
    ///
    /// Keys absent from `value` are not checked; unknown keys are rejected.
    #[must_use]
    pub fn validate(&self, value: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        validate_group(&self.options, value, "", &mut errors);
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }

    /// Keeps only the parts of `value` that validate. Returns the pruned
    /// value and one error per dropped key.
    #[must_use]
    pub fn retain_valid(&self, value: &Value) -> (Value, Vec<String>) {
        let mut errors = Vec::new();
        let kept = retain_group(&self.options, value, "", &mut errors);
        (kept, errors)
    }
}

fn retain_group(
    options: &BTreeMap<String, ConfigNode>,
    value: &Value,
    prefix: &str,
    errors: &mut Vec<String>,
) -> Value {
    let Some(object) = value.as_object() else {
        errors.push(format!("{}: expected an object", display_path(prefix)));
        return Value::Object(Map::new());
    };
    let mut kept = Map::new();
    for (key, child) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match options.get(key) {
            None => errors.push(format!("{path}: unknown option")),
            Some(ConfigNode::Group(children)) => {
                if child.is_object() {
                    kept.insert(key.clone(), retain_group(children, child, &path, errors));
                } else {
                    errors.push(format!("{path}: expected an object"));
                }
            }
            Some(ConfigNode::Leaf(option)) => {
                let before = errors.len();
                validate_leaf(option, child, &path, errors);
                if errors.len() == before {
                    kept.insert(key.clone(), child.clone());
                }
            }
        }
    }
    Value::Object(kept)
}

fn defaults_of(options: &BTreeMap<String, ConfigNode>) -> Value {
    let map: Map<String, Value> = options
        .iter()
        .map(|(key, node)| {
            let value = match node {
                ConfigNode::Leaf(option) => option.default.clone(),
                ConfigNode::Group(children) => defaults_of(children),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(map)
}

fn validate_group(
    options: &BTreeMap<String, ConfigNode>,
    value: &Value,
    prefix: &str,
    errors: &mut Vec<String>,
) {
    let Some(object) = value.as_object() else {
        errors.push(format!("{}: expected an object", display_path(prefix)));
        return;
    };
    for (key, child) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match options.get(key) {
            None => errors.push(format!("{path}: unknown option")),
            Some(ConfigNode::Group(children)) => validate_group(children, child, &path, errors),
            Some(ConfigNode::Leaf(option)) => validate_leaf(option, child, &path, errors),
        }
    }
}

fn validate_leaf(option: &ConfigOption, value: &Value, path: &str, errors: &mut Vec<String>) {
    if !option.kind.accepts(value) {
        errors.push(format!("{path}: expected {:?}, got {value}", option.kind));
        return;
    }
    if let Some(allowed) = &option.allowed {
        if !allowed.contains(value) {
            errors.push(format!("{path}: {value} is not one of the allowed values"));
        }
    }
}

fn display_path(prefix: &str) -> &str {
    if prefix.is_empty() {
        "<root>"
    } else {
        prefix
    }
}

/// Result of validating a value against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The value conforms to the schema.
    Valid,
    /// The value violates one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Merges `overlay` onto `base` leaf by leaf.
///
/// Objects merge recursively; any other overlay value replaces the base
/// value. Keys only present in `base` keep their value.
#[must_use]
pub fn merge_config(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => merge_config(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Whether a merged config leaves the module switched on.
#[must_use]
pub fn is_active(config: &Value) -> bool {
    config.get(ACTIVE_KEY).and_then(Value::as_bool) != Some(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
