//! Variable values and fully-qualified variable keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single variable value
///
/// Values compare by value equality; an absent key behaves exactly like
/// [`VariableValue::Undefined`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Boolean(bool),
    Number(f64),
    String(String),
    #[default]
    Undefined,
}

impl VariableValue {
    /// Whether this is the undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// The dynamic type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Undefined => ValueType::Undefined,
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Undefined => Ok(()),
        }
    }
}

impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Type tag used when an expression result must have a particular type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    Undefined,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

/// Build the fully-qualified `namespace:name` key
pub fn qualified_key(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

/// Split a fully-qualified key at its first `:`
///
/// Returns `None` when the key has no namespace separator.
pub fn split_qualified_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}
