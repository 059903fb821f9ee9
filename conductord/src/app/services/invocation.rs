// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;

use crate::app::services::job_paths::workspace_relative;
use crate::app::types::ParameterValue;

/// Renders an invocation template into an argument vector.
///
/// `{name}` is replaced by the parameter's value; files render as paths relative
/// to the workspace. An argument referencing an absent parameter is dropped, so
/// `--count={count}` disappears when `count` was not given.
pub fn render_invocation(
    template: &[String],
    parameters: &BTreeMap<String, ParameterValue>,
) -> Vec<String> {
    template
        .iter()
        .filter_map(|arg| render_arg(arg, parameters))
        .collect()
}

fn render_arg(arg: &str, parameters: &BTreeMap<String, ParameterValue>) -> Option<String> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        out.push_str(&rest[..open]);
        out.push_str(&render_value(parameters.get(name)?));
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

pub fn render_value(value: &ParameterValue) -> String {
    match value {
        ParameterValue::File { destination, .. } => workspace_relative(destination).to_string(),
        ParameterValue::Text { value } => value.clone(),
        ParameterValue::Boolean { value } => value.to_string(),
        ParameterValue::Integer { value } => value.to_string(),
        ParameterValue::FloatingPoint { value } => value.to_string(),
    }
}
