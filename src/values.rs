//! Install option values.
//!
//! A [`ValueTree`] is the opaque option bag a plugin hands to its installer.
//! Leaves are strings, integers, floats or booleans; inner nodes are
//! string-keyed maps. Merging is explicit: a scalar override replaces the
//! existing entry, a map override is merged key by key.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// A single node of a value tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(ValueTree),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ValueTree> for Value {
    fn from(v: ValueTree) -> Self {
        Value::Map(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

/// String-keyed tree of option values.
///
/// Keys are kept sorted so that serialized output (and therefore the
/// values handed to `helm`) is stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueTree(BTreeMap<String, Value>);

impl ValueTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a dotted path such as `controller.service.type`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            match current {
                Value::Map(tree) => current = tree.0.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate maps. A scalar sitting where
    /// a map is needed is replaced.
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = match parts.pop() {
            Some(last) => last,
            None => return,
        };
        let mut current = self;
        for part in parts {
            let entry = current
                .0
                .entry(part.to_string())
                .or_insert_with(|| Value::Map(ValueTree::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(ValueTree::new());
            }
            let Value::Map(next) = entry else {
                return;
            };
            current = next;
        }
        current.0.insert(last.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `overrides` into `self`.
    ///
    /// Map-on-map merges recursively; any other combination replaces the
    /// existing entry with the override.
    pub fn merge(&mut self, overrides: &ValueTree) {
        for (key, value) in &overrides.0 {
            match (self.0.get_mut(key), value) {
                (Some(Value::Map(existing)), Value::Map(incoming)) => existing.merge(incoming),
                _ => {
                    self.0.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Non-mutating merge
    pub fn merged(&self, overrides: &ValueTree) -> ValueTree {
        let mut out = self.clone();
        out.merge(overrides);
        out
    }

    pub fn to_json(&self) -> JsonValue {
        // Serializing a tree of plain scalars and string-keyed maps cannot fail.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

impl FromIterator<(String, Value)> for ValueTree {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        ValueTree(iter.into_iter().collect())
    }
}
