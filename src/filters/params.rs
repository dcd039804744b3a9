//! Typed parameter schemas for filter definitions.
//!
//! Schemas form a closed sum type so that `list` and `tuple` can nest other
//! schemas without forward-reference gymnastics. Each variant knows how to
//! validate a value and how that value is exported to the shell.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterSchema {
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
    },
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<i64>,
    },
    Bool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<bool>,
    },
    Str {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_values: Option<Vec<String>>,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        parameter: Box<ParameterSchema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Tuple {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        parameters: Vec<ParameterSchema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
}

impl ParameterSchema {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterSchema::Float { .. } => "float",
            ParameterSchema::Int { .. } => "int",
            ParameterSchema::Bool { .. } => "bool",
            ParameterSchema::Str { .. } => "str",
            ParameterSchema::List { .. } => "list",
            ParameterSchema::Tuple { .. } => "tuple",
        }
    }

    /// The value a step gets when it does not bind this parameter: the
    /// declared default, or the variant's natural empty value.
    pub fn default_value(&self) -> Value {
        match self {
            ParameterSchema::Float { default, .. } => {
                default.map_or(Value::Null, |v| serde_json::json!(v))
            }
            ParameterSchema::Int { default, .. } => {
                default.map_or(Value::Null, |v| serde_json::json!(v))
            }
            ParameterSchema::Bool { default, .. } => default.map_or(Value::Null, Value::Bool),
            ParameterSchema::Str { default, .. } => default
                .clone()
                .map_or_else(|| Value::String(String::new()), Value::String),
            ParameterSchema::List { default, .. } => {
                default.clone().unwrap_or_else(|| Value::Array(Vec::new()))
            }
            ParameterSchema::Tuple {
                default,
                parameters,
                ..
            } => default.clone().unwrap_or_else(|| {
                Value::Array(parameters.iter().map(|p| p.default_value()).collect())
            }),
        }
    }

    /// Validate a bound value against this schema, returning its normalised
    /// form. `null` passes through untouched (an unbound optional).
    pub fn check(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ParameterSchema::Float { min, max, .. } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a float, got {value}"))?;
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    return Err(format!("value {v} out of range"));
                }
                Ok(serde_json::json!(v))
            }
            ParameterSchema::Int { min, max, .. } => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| format!("expected an int, got {value}"))?;
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    return Err(format!("value {v} out of range"));
                }
                Ok(serde_json::json!(v))
            }
            ParameterSchema::Bool { .. } => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| format!("expected a bool, got {value}"))?;
                Ok(Value::Bool(v))
            }
            ParameterSchema::Str { allowed_values, .. } => {
                let v = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {value}"))?;
                if let Some(allowed) = allowed_values {
                    if !allowed.iter().any(|a| a == v) {
                        return Err(format!("{v:?} is not one of the allowed values"));
                    }
                }
                Ok(Value::String(v.to_string()))
            }
            ParameterSchema::List { parameter, .. } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected a list, got {value}"))?;
                let checked = items
                    .iter()
                    .map(|item| parameter.check(item))
                    .collect::<Result<Vec<Value>, String>>()?;
                Ok(Value::Array(checked))
            }
            ParameterSchema::Tuple { parameters, .. } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected a tuple, got {value}"))?;
                if items.len() != parameters.len() {
                    return Err(format!(
                        "expected {} elements, got {}",
                        parameters.len(),
                        items.len()
                    ));
                }
                let checked = parameters
                    .iter()
                    .zip(items)
                    .map(|(schema, item)| schema.check(item))
                    .collect::<Result<Vec<Value>, String>>()?;
                Ok(Value::Array(checked))
            }
        }
    }
}

/// Shell string form of an exported parameter value. Compound values have no
/// flat form; they only travel via `PARAMETERS_AS_YAML`.
pub fn shell_value(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => {
            Err("list and tuple parameters require PARAMETERS_AS_YAML".to_string())
        }
    }
}
