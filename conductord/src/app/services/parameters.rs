// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde_json::Value;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{ApplicationParameter, ParameterKind, ParameterValue};

/// Outcome of checking one raw value against its declaration. Files still need
/// a storage lookup before they become a `ParameterValue::File`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedParameter {
    File {
        source: String,
        destination: Option<String>,
        directory: bool,
    },
    Value(ParameterValue),
}

/// Returns `Ok(None)` for an absent optional parameter without a default.
pub fn parse_parameter(
    param: &ApplicationParameter,
    raw: Option<&Value>,
) -> AppResult<Option<ParsedParameter>> {
    let raw = match raw.filter(|v| !v.is_null()) {
        Some(value) => value,
        None => match &param.default_value {
            Some(default) => default,
            None if param.optional => return Ok(None),
            None => {
                return Err(AppError::verification(format!(
                    "missing required parameter '{}'",
                    param.name
                )));
            }
        },
    };

    let parsed = match &param.kind {
        ParameterKind::InputFile => parse_file(param, raw, false)?,
        ParameterKind::InputDirectory => parse_file(param, raw, true)?,
        ParameterKind::Text => match raw {
            Value::String(s) => ParsedParameter::Value(ParameterValue::Text { value: s.clone() }),
            _ => return Err(type_error(param, "a string")),
        },
        ParameterKind::Boolean => match raw {
            Value::Bool(b) => ParsedParameter::Value(ParameterValue::Boolean { value: *b }),
            _ => return Err(type_error(param, "a boolean")),
        },
        ParameterKind::Integer { min, max, .. } => {
            let value = raw.as_i64().ok_or_else(|| type_error(param, "an integer"))?;
            if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
                return Err(range_error(param, value, *min, *max));
            }
            ParsedParameter::Value(ParameterValue::Integer { value })
        }
        ParameterKind::FloatingPoint { min, max, .. } => {
            let value = raw
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| type_error(param, "a number"))?;
            if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
                return Err(range_error(param, value, *min, *max));
            }
            ParsedParameter::Value(ParameterValue::FloatingPoint { value })
        }
    };
    Ok(Some(parsed))
}

/// Accepts either a bare source path or `{ "source": .., "destination": .. }`.
fn parse_file(
    param: &ApplicationParameter,
    raw: &Value,
    directory: bool,
) -> AppResult<ParsedParameter> {
    let (source, destination) = match raw {
        Value::String(source) => (source.clone(), None),
        Value::Object(map) => {
            let source = map
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| type_error(param, "an object with a 'source' path"))?;
            let destination = match map.get("destination") {
                None | Some(Value::Null) => None,
                Some(Value::String(d)) => Some(d.clone()),
                Some(_) => return Err(type_error(param, "a destination path string")),
            };
            (source.to_string(), destination)
        }
        _ => return Err(type_error(param, "a file path")),
    };
    if source.trim().is_empty() {
        return Err(AppError::verification(format!(
            "parameter '{}' has an empty source path",
            param.name
        )));
    }
    Ok(ParsedParameter::File {
        source,
        destination,
        directory,
    })
}

fn type_error(param: &ApplicationParameter, expected: &str) -> AppError {
    AppError::verification(format!("parameter '{}' must be {expected}", param.name))
}

fn range_error<T: std::fmt::Display>(
    param: &ApplicationParameter,
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> AppError {
    let bound = match (min, max) {
        (Some(min), Some(max)) => format!("between {min} and {max}"),
        (Some(min), None) => format!("at least {min}"),
        (None, Some(max)) => format!("at most {max}"),
        (None, None) => "in range".to_string(),
    };
    AppError::verification(format!(
        "parameter '{}' is {value}, expected {bound}",
        param.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;
    use serde_json::json;

    fn param(name: &str, kind: ParameterKind) -> ApplicationParameter {
        ApplicationParameter {
            name: name.to_string(),
            optional: false,
            default_value: None,
            kind,
        }
    }

    #[test]
    fn missing_required_parameter_names_it() {
        let p = param("text", ParameterKind::Text);
        let err = parse_parameter(&p, None).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Verification);
        assert!(err.message().contains("'text'"));
    }

    #[test]
    fn optional_parameter_uses_default_or_is_skipped() {
        let mut p = param("flag", ParameterKind::Boolean);
        p.optional = true;
        assert_eq!(parse_parameter(&p, Some(&Value::Null)).unwrap(), None);

        p.default_value = Some(json!(true));
        assert_eq!(
            parse_parameter(&p, None).unwrap(),
            Some(ParsedParameter::Value(ParameterValue::Boolean { value: true }))
        );
    }

    #[test]
    fn integer_bounds_are_enforced() {
        let p = param(
            "n",
            ParameterKind::Integer {
                min: Some(1),
                max: Some(5),
                unit: None,
            },
        );
        assert!(parse_parameter(&p, Some(&json!(3))).is_ok());
        let err = parse_parameter(&p, Some(&json!(9))).unwrap_err();
        assert!(err.message().contains("between 1 and 5"));
        assert!(parse_parameter(&p, Some(&json!("3"))).is_err());
        assert!(parse_parameter(&p, Some(&json!(2.5))).is_err());
    }

    #[test]
    fn floating_point_accepts_integers_within_bounds() {
        let p = param(
            "ratio",
            ParameterKind::FloatingPoint {
                min: Some(0.0),
                max: None,
                unit: Some("s".into()),
            },
        );
        assert_eq!(
            parse_parameter(&p, Some(&json!(2))).unwrap(),
            Some(ParsedParameter::Value(ParameterValue::FloatingPoint {
                value: 2.0
            }))
        );
        assert!(parse_parameter(&p, Some(&json!(-0.5))).is_err());
    }

    #[test]
    fn file_parameters_accept_path_or_object() {
        let p = param("input", ParameterKind::InputFile);
        assert_eq!(
            parse_parameter(&p, Some(&json!("/home/alice/a.txt"))).unwrap(),
            Some(ParsedParameter::File {
                source: "/home/alice/a.txt".into(),
                destination: None,
                directory: false,
            })
        );
        let dir = param("data", ParameterKind::InputDirectory);
        assert_eq!(
            parse_parameter(
                &dir,
                Some(&json!({"source": "/home/alice/d", "destination": "in"}))
            )
            .unwrap(),
            Some(ParsedParameter::File {
                source: "/home/alice/d".into(),
                destination: Some("in".into()),
                directory: true,
            })
        );
        assert!(parse_parameter(&p, Some(&json!(42))).is_err());
        assert!(parse_parameter(&p, Some(&json!(""))).is_err());
    }
}
