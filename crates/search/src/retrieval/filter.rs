//! Metadata filtering
//!
//! A filter maps metadata keys to either one expected value or a list of
//! accepted values. A document passes when every key is present and
//! matches. Values compare by their textual form, so `"2"` and `2` are
//! the same page number; a list-valued metadata field matches when any
//! element does.

use super::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Conjunction of per-key constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, FilterValue>);

/// Constraint on one metadata key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Value must be one of these; an empty list matches nothing
    OneOf(Vec<Value>),
    /// Value must equal this
    Equals(Value),
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), FilterValue::Equals(value.into()));
        self
    }

    /// Require `key` to be one of `values`
    pub fn one_of<V: Into<Value>>(mut self, key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.0.insert(key.into(), FilterValue::OneOf(values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `metadata` satisfies every constraint
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0.iter().all(|(key, constraint)| {
            metadata
                .get(key)
                .is_some_and(|value| constraint.matches(value))
        })
    }
}

impl FilterValue {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FilterValue::Equals(expected) => field_matches(value, expected),
            FilterValue::OneOf(accepted) => accepted.iter().any(|expected| field_matches(value, expected)),
        }
    }
}

fn field_matches(value: &Value, expected: &Value) -> bool {
    match value {
        Value::Array(items) if !expected.is_array() => {
            items.iter().any(|item| scalar_eq(item, expected))
        }
        _ => scalar_eq(value, expected),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (text_form(a), text_form(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn text_form(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
