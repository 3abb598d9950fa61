// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 FlowMesh Contributors
//
// This file is part of FlowMesh.
//
// FlowMesh is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// FlowMesh is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with FlowMesh. If not, see <https://www.gnu.org/licenses/>.

//! Input parameter validation and coercion.
//!
//! Start input is checked against the definition's declared schema before
//! an instance is created. In non-strict mode values are coerced where a
//! lossless interpretation exists (`"42"` to a number, `"true"` to a
//! bool, numbers and bools to strings); strict mode rejects any type
//! mismatch. Unknown keys pass through untouched in both modes.

use serde_json::{Map, Value};

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{InputParamSpec, ParamType};

/// Validate `input` against `schema`, applying defaults and coercions.
///
/// Returns the normalized input object. `input` must be a JSON object (or
/// null, treated as empty).
pub fn coerce_input(
    schema: &[InputParamSpec],
    input: Value,
    strict: bool,
) -> WorkflowResult<Value> {
    let mut map = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(WorkflowError::InvalidInput(format!(
                "input must be an object, got {}",
                type_name(&other)
            )))
        }
    };

    for spec in schema {
        match map.get(&spec.name) {
            Some(value) => {
                let coerced = coerce_value(spec, value.clone(), strict)?;
                map.insert(spec.name.clone(), coerced);
            }
            None => {
                if let Some(default) = &spec.default {
                    map.insert(spec.name.clone(), default.clone());
                } else if spec.required {
                    return Err(WorkflowError::InvalidInput(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
            }
        }
    }

    Ok(Value::Object(map))
}

fn coerce_value(spec: &InputParamSpec, value: Value, strict: bool) -> WorkflowResult<Value> {
    if matches(&value, spec.param_type) {
        return Ok(value);
    }
    if strict {
        return Err(WorkflowError::InvalidInput(format!(
            "parameter '{}' expected {}, got {}",
            spec.name,
            spec.param_type.as_str(),
            type_name(&value)
        )));
    }

    let coerced = match (spec.param_type, &value) {
        (ParamType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().and_then(|n| {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Some(Value::from(n as i64))
            } else {
                serde_json::Number::from_f64(n).map(Value::Number)
            }
        }),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    };

    coerced.ok_or_else(|| {
        WorkflowError::InvalidInput(format!(
            "parameter '{}' cannot be coerced to {} from {}",
            spec.name,
            spec.param_type.as_str(),
            type_name(&value)
        ))
    })
}

fn matches(value: &Value, param_type: ParamType) -> bool {
    match param_type {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, param_type: ParamType, required: bool, default: Option<Value>) -> InputParamSpec {
        InputParamSpec {
            name: name.to_string(),
            param_type,
            required,
            default,
        }
    }

    #[test]
    fn test_defaults_applied() {
        let schema = vec![spec("retries", ParamType::Number, false, Some(json!(3)))];
        let out = coerce_input(&schema, json!({}), false).unwrap();
        assert_eq!(out["retries"], json!(3));
    }

    #[test]
    fn test_missing_required_rejected() {
        let schema = vec![spec("url", ParamType::String, true, None)];
        let err = coerce_input(&schema, json!({}), false).unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_string_to_number_coercion() {
        let schema = vec![spec("count", ParamType::Number, true, None)];
        let out = coerce_input(&schema, json!({"count": "42"}), false).unwrap();
        assert_eq!(out["count"], json!(42));

        let out = coerce_input(&schema, json!({"count": "4.5"}), false).unwrap();
        assert_eq!(out["count"], json!(4.5));
    }

    #[test]
    fn test_string_to_bool_coercion() {
        let schema = vec![spec("dry_run", ParamType::Boolean, true, None)];
        let out = coerce_input(&schema, json!({"dry_run": "true"}), false).unwrap();
        assert_eq!(out["dry_run"], json!(true));

        assert!(coerce_input(&schema, json!({"dry_run": "maybe"}), false).is_err());
    }

    #[test]
    fn test_strict_mode_rejects_mismatch() {
        let schema = vec![spec("count", ParamType::Number, true, None)];
        assert!(coerce_input(&schema, json!({"count": "42"}), true).is_err());
        assert!(coerce_input(&schema, json!({"count": 42}), true).is_ok());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let schema = vec![spec("a", ParamType::String, false, None)];
        let out = coerce_input(&schema, json!({"b": [1, 2]}), true).unwrap();
        assert_eq!(out["b"], json!([1, 2]));
    }

    #[test]
    fn test_null_input_treated_as_empty() {
        let schema = vec![spec("a", ParamType::String, false, Some(json!("x")))];
        let out = coerce_input(&schema, Value::Null, false).unwrap();
        assert_eq!(out["a"], json!("x"));
    }

    #[test]
    fn test_non_object_input_rejected() {
        assert!(coerce_input(&[], json!([1]), false).is_err());
    }
}
