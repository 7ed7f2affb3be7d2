// =============================================================================
// Text Argument Coercion
// =============================================================================
// Form fields and `--arg key=value` flags arrive as text. This converts them
// into JSON values according to each parameter's declared type. The result is
// an ordinary ArgumentSet that still goes through the strict validator.

use super::validation::ValidationError;
use super::value::ParameterType;
use crate::model::{ArgumentSet, QueryDefinition};
use serde_json::{Number, Value as JsonValue};
use std::collections::HashMap;

/// Parse text arguments using the declared parameter types of `definition`
///
/// Missing parameters are left for the validator to report.
pub fn coerce_text_arguments(
    definition: &QueryDefinition,
    raw: &HashMap<String, String>,
) -> Result<ArgumentSet, ValidationError> {
    let mut unknown: Vec<&String> = raw
        .keys()
        .filter(|name| definition.parameter(name).is_none())
        .collect();
    unknown.sort();
    if let Some(name) = unknown.first() {
        return Err(ValidationError::UnknownParameter {
            name: (*name).clone(),
        });
    }

    let mut args = ArgumentSet::new();
    for param in &definition.parameters {
        let Some(text) = raw.get(&param.name) else {
            continue;
        };
        let value = parse_text(param.parameter_type, text).ok_or_else(|| {
            ValidationError::TypeMismatch {
                name: param.name.clone(),
                expected: param.parameter_type,
                actual: describe_text(text),
            }
        })?;
        args.insert(param.name.clone(), value);
    }
    Ok(args)
}

/// Parse one text value as the given type
pub fn parse_text(ty: ParameterType, text: &str) -> Option<JsonValue> {
    match ty {
        ParameterType::String => Some(JsonValue::String(text.to_string())),
        ParameterType::Number => parse_number(text.trim()).map(JsonValue::Number),
        ParameterType::Boolean => match text.trim() {
            "true" => Some(JsonValue::Bool(true)),
            "false" => Some(JsonValue::Bool(false)),
            _ => None,
        },
        ParameterType::Array => match serde_json::from_str(text) {
            Ok(JsonValue::Array(items)) => Some(JsonValue::Array(items)),
            _ => None,
        },
        ParameterType::Object => match serde_json::from_str(text) {
            Ok(JsonValue::Object(map)) => Some(JsonValue::Object(map)),
            _ => None,
        },
    }
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Some(Number::from(u));
    }
    // from_f64 rejects NaN and infinities
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn describe_text(text: &str) -> String {
    if text.trim().is_empty() {
        "empty text".to_string()
    } else {
        "unparseable text".to_string()
    }
}
