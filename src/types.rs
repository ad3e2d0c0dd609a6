// src/types.rs

//! Value model shared by parameters, task results and checkpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Parameter mapping handed to a run and, after resolution, to each task.
///
/// A `BTreeMap` keeps keys sorted so serialization (and therefore the run
/// identity hash) is deterministic.
pub type Params = BTreeMap<String, Value>;

/// Dynamically-typed value used for parameters and task results.
///
/// Serialized untagged, so checkpoints and config files read naturally:
/// `"text"`, `42`, `1.5`, `true`, `[..]`, `{..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value; what a task returns when it has nothing to report.
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// The type tag of this value, or `None` for [`Value::Null`].
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Float(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::String),
            Value::Sequence(_) => Some(ValueType::Sequence),
            Value::Mapping(_) => Some(ValueType::Mapping),
        }
    }

    /// Human readable type name, used in validation errors.
    pub fn type_name(&self) -> &'static str {
        self.value_type().map(ValueType::as_str).unwrap_or("null")
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse a command-line style literal.
    ///
    /// JSON literals (`42`, `1.5`, `true`, `[1,2]`, `{"a":1}`, `"quoted"`)
    /// are decoded as such; anything else is taken verbatim as a string.
    pub fn parse_literal(raw: &str) -> Value {
        serde_json::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.to_string()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            other => match serde_json::to_string(other) {
                Ok(json) => write!(f, "{json}"),
                Err(_) => write!(f, "{other:?}"),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
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

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Mapping(v)
    }
}

/// Expected type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "map", alias = "dict")]
    Mapping,
    #[serde(alias = "list", alias = "array")]
    Sequence,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
            ValueType::Mapping => "mapping",
            ValueType::Sequence => "sequence",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" => Ok(ValueType::String),
            "integer" | "int" => Ok(ValueType::Integer),
            "float" => Ok(ValueType::Float),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "mapping" | "map" | "dict" => Ok(ValueType::Mapping),
            "sequence" | "list" | "array" => Ok(ValueType::Sequence),
            other => Err(format!(
                "invalid parameter type: {other} (expected string, integer, float, boolean, mapping or sequence)"
            )),
        }
    }
}
