// src/params.rs

//! Declared task parameters and their validation.
//!
//! A task declares a [`WorkflowParams`] set; before the task is dispatched
//! the run's parameter mapping is checked against it and resolved
//! (defaults filled in). Undeclared keys pass through untouched because a
//! task may read from a shared pool larger than what it declares.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::ParameterValidationError;
use crate::types::{Params, Value, ValueType};

/// Declaration of a single named parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub required: bool,

    /// Expected type; `None` accepts any value.
    #[serde(default, rename = "type")]
    pub expected_type: Option<ValueType>,

    /// Default used when the parameter is absent. Only meaningful for
    /// optional parameters.
    #[serde(default)]
    pub default: Option<Value>,

    /// Informational only.
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    /// A required parameter of the given type.
    pub fn required(expected_type: ValueType) -> Self {
        Self {
            required: true,
            expected_type: Some(expected_type),
            default: None,
            description: String::new(),
        }
    }

    /// An optional parameter without a default; omitted when absent.
    pub fn optional(expected_type: ValueType) -> Self {
        Self {
            required: false,
            expected_type: Some(expected_type),
            default: None,
            description: String::new(),
        }
    }

    /// An optional parameter that falls back to `default` when absent.
    pub fn with_default(expected_type: ValueType, default: impl Into<Value>) -> Self {
        Self {
            required: false,
            expected_type: Some(expected_type),
            default: Some(default.into()),
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn check_type(&self, name: &str, value: &Value) -> Result<(), ParameterValidationError> {
        match self.expected_type {
            Some(expected) if value.value_type() != Some(expected) => {
                Err(ParameterValidationError::TypeMismatch {
                    parameter: name.to_string(),
                    expected: expected.to_string(),
                    actual: value.type_name().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Ordered set of parameter declarations for one task, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct WorkflowParams {
    specs: BTreeMap<String, ParameterSpec>,
}

impl WorkflowParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name`. A later declaration with the same name replaces the
    /// earlier one, so names stay unique within a task.
    pub fn param(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.specs.insert(name.into(), spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.specs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.specs.get(name)
    }

    /// Validate `values` against the declared specs and return the resolved
    /// mapping: supplied values, plus defaults for absent optional
    /// parameters, plus any undeclared keys unchanged.
    pub fn validate(&self, values: &Params) -> Result<Params, ParameterValidationError> {
        validate(self, values)
    }
}

impl FromIterator<(String, ParameterSpec)> for WorkflowParams {
    fn from_iter<I: IntoIterator<Item = (String, ParameterSpec)>>(iter: I) -> Self {
        Self {
            specs: iter.into_iter().collect(),
        }
    }
}

/// Pure validation routine behind [`WorkflowParams::validate`].
///
/// Parameters are checked in name order, so the first reported problem is
/// deterministic.
pub fn validate(specs: &WorkflowParams, values: &Params) -> Result<Params, ParameterValidationError> {
    let mut resolved = values.clone();

    for (name, spec) in specs.iter() {
        match values.get(name) {
            Some(value) => spec.check_type(name, value)?,
            None if spec.required => {
                return Err(ParameterValidationError::Missing {
                    parameter: name.to_string(),
                });
            }
            None => {
                if let Some(default) = &spec.default {
                    resolved.insert(name.to_string(), default.clone());
                }
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn specs() -> WorkflowParams {
        WorkflowParams::new()
            .param("value", ParameterSpec::required(ValueType::Integer))
            .param(
                "region",
                ParameterSpec::with_default(ValueType::String, "default").describe("target region"),
            )
            .param("verbose", ParameterSpec::optional(ValueType::Boolean))
    }

    #[test]
    fn resolves_defaults_and_keeps_supplied_values() {
        let resolved = specs().validate(&params(&[("value", 21.into())])).unwrap();
        assert_eq!(resolved.get("value"), Some(&Value::Integer(21)));
        assert_eq!(resolved.get("region"), Some(&Value::from("default")));
        assert!(!resolved.contains_key("verbose"));
    }

    #[test]
    fn missing_required_parameter_is_named() {
        let err = specs().validate(&Params::new()).unwrap_err();
        assert_eq!(
            err,
            ParameterValidationError::Missing {
                parameter: "value".to_string()
            }
        );
    }

    #[test]
    fn type_mismatch_names_expected_and_actual() {
        let err = specs()
            .validate(&params(&[("value", "not an int".into())]))
            .unwrap_err();
        match err {
            ParameterValidationError::TypeMismatch {
                parameter,
                expected,
                actual,
            } => {
                assert_eq!(parameter, "value");
                assert_eq!(expected, "integer");
                assert_eq!(actual, "string");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_keys_pass_through() {
        let resolved = specs()
            .validate(&params(&[("value", 1.into()), ("extra", true.into())]))
            .unwrap();
        assert_eq!(resolved.get("extra"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn untyped_spec_accepts_anything() {
        let specs = WorkflowParams::new().param(
            "blob",
            ParameterSpec {
                required: true,
                expected_type: None,
                default: None,
                description: String::new(),
            },
        );
        assert!(specs.validate(&params(&[("blob", Value::Null)])).is_ok());
    }
}
