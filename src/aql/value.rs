// =============================================================================
// Typed AQL Parameter Values
// =============================================================================
// Closed set of declared parameter types and the tagged value that carries a
// validated argument from the validator to the binder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Declared type of a query parameter as it appears in the catalog
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParameterType {
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Check whether a JSON value has the runtime shape this type accepts.
    ///
    /// No implicit conversion happens here: `"21"` is not a number and `21` is
    /// not a string.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        matches!(
            (self, value),
            (ParameterType::Number, JsonValue::Number(_))
                | (ParameterType::String, JsonValue::String(_))
                | (ParameterType::Boolean, JsonValue::Bool(_))
                | (ParameterType::Array, JsonValue::Array(_))
                | (ParameterType::Object, JsonValue::Object(_))
        )
    }
}

/// Name of the runtime shape of a JSON value, used in type mismatch reports
pub fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A validated argument, tagged with the parameter type it was checked against
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Number(Number),
    String(String),
    Boolean(bool),
    Array(Vec<JsonValue>),
    Object(Map<String, JsonValue>),
}

impl TypedValue {
    /// Build a typed value from JSON if it matches `expected`
    pub fn from_json(expected: ParameterType, value: &JsonValue) -> Option<Self> {
        match (expected, value) {
            (ParameterType::Number, JsonValue::Number(n)) => Some(TypedValue::Number(n.clone())),
            (ParameterType::String, JsonValue::String(s)) => Some(TypedValue::String(s.clone())),
            (ParameterType::Boolean, JsonValue::Bool(b)) => Some(TypedValue::Boolean(*b)),
            (ParameterType::Array, JsonValue::Array(a)) => Some(TypedValue::Array(a.clone())),
            (ParameterType::Object, JsonValue::Object(o)) => Some(TypedValue::Object(o.clone())),
            _ => None,
        }
    }

    /// The parameter type this value was validated as
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            TypedValue::Number(_) => ParameterType::Number,
            TypedValue::String(_) => ParameterType::String,
            TypedValue::Boolean(_) => ParameterType::Boolean,
            TypedValue::Array(_) => ParameterType::Array,
            TypedValue::Object(_) => ParameterType::Object,
        }
    }

    /// Convert into the JSON representation used for driver bind variables
    pub fn to_bind_value(&self) -> JsonValue {
        match self {
            TypedValue::Number(n) => JsonValue::Number(n.clone()),
            TypedValue::String(s) => JsonValue::String(s.clone()),
            TypedValue::Boolean(b) => JsonValue::Bool(*b),
            TypedValue::Array(a) => JsonValue::Array(a.clone()),
            TypedValue::Object(o) => JsonValue::Object(o.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parameter_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn parameter_type_parses_catalog_spelling() {
        assert_eq!(ParameterType::from_str("number").unwrap(), ParameterType::Number);
        assert_eq!(ParameterType::from_str("object").unwrap(), ParameterType::Object);
        assert!(ParameterType::from_str("date").is_err());
        let parsed: ParameterType = serde_json::from_value(json!("boolean")).unwrap();
        assert_eq!(parsed, ParameterType::Boolean);
    }

    #[test]
    fn display_matches_serde_name() {
        for ty in ParameterType::iter() {
            let serialized = serde_json::to_value(ty).unwrap();
            assert_eq!(serialized, json!(ty.to_string()));
        }
    }

    #[test]
    fn accepts_is_strict() {
        assert!(ParameterType::Number.accepts(&json!(21)));
        assert!(ParameterType::Number.accepts(&json!(21.5)));
        assert!(!ParameterType::Number.accepts(&json!("21")));
        assert!(!ParameterType::String.accepts(&json!(21)));
        assert!(!ParameterType::Boolean.accepts(&json!("true")));
        assert!(ParameterType::Array.accepts(&json!([1, 2])));
        assert!(!ParameterType::Object.accepts(&json!([1, 2])));
        assert!(!ParameterType::Object.accepts(&JsonValue::Null));
    }

    #[test]
    fn typed_value_round_trips_to_bind_value() {
        let value = json!({"tags": ["a", "b"]});
        let typed = TypedValue::from_json(ParameterType::Object, &value).unwrap();
        assert_eq!(typed.parameter_type(), ParameterType::Object);
        assert_eq!(typed.to_bind_value(), value);
        assert!(TypedValue::from_json(ParameterType::Array, &value).is_none());
    }
}
