//! Safe binding of validated arguments
//!
//! The binder never edits query text. It pairs the unmodified template with a
//! map of bind variables which the database resolves itself, so no argument
//! value can be read as AQL syntax. No escaping is performed.
//!
//! Only placeholders that occur in the template are sent: ArangoDB rejects a
//! request that carries bind variables the query does not use.

use super::validation::ValidatedArguments;
use crate::model::QueryDefinition;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("query '{query}' uses unsupported placeholder '{placeholder}'")]
    UnsupportedPlaceholder { query: String, placeholder: String },

    #[error("placeholder '@{name}' in query '{query}' has no validated argument")]
    UnboundPlaceholder { query: String, name: String },

    #[error("arguments validated for query '{validated}' cannot be bound to '{query}'")]
    DefinitionMismatch { query: String, validated: String },
}

impl BindError {
    pub fn placeholder(&self) -> Option<String> {
        match self {
            BindError::UnsupportedPlaceholder { placeholder, .. } => Some(placeholder.clone()),
            BindError::UnboundPlaceholder { name, .. } => Some(format!("@{name}")),
            BindError::DefinitionMismatch { .. } => None,
        }
    }
}

/// A query ready to hand to the database driver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundExecution {
    pub query_name: String,
    /// Template text exactly as loaded from the catalog
    pub query: String,
    /// Values for the driver's bind-variable channel
    #[serde(rename = "bindVars")]
    pub bind_vars: Map<String, JsonValue>,
}

pub struct SafeBinder;

impl SafeBinder {
    pub fn bind(
        definition: &QueryDefinition,
        args: &ValidatedArguments,
    ) -> Result<BoundExecution, BindError> {
        if args.query() != definition.name {
            return Err(BindError::DefinitionMismatch {
                query: definition.name.clone(),
                validated: args.query().to_string(),
            });
        }

        let scan = definition.placeholders();
        if let Some(bad) = scan.unsupported().next() {
            return Err(BindError::UnsupportedPlaceholder {
                query: definition.name.clone(),
                placeholder: bad.token(),
            });
        }

        let mut bind_vars = Map::new();
        for name in scan.value_names() {
            let value = args.get(name).ok_or_else(|| BindError::UnboundPlaceholder {
                query: definition.name.clone(),
                name: name.to_string(),
            })?;
            bind_vars.insert(name.to_string(), value.to_bind_value());
        }

        for unused in definition.unreferenced_parameters() {
            tracing::debug!(
                query = %definition.name,
                parameter = unused,
                "declared parameter not referenced by template, not sent"
            );
        }

        Ok(BoundExecution {
            query_name: definition.name.clone(),
            query: definition.template.clone(),
            bind_vars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aql::validation::ParameterValidator;
    use crate::aql::value::ParameterType;
    use crate::model::{ArgumentSet, QueryParameter};
    use serde_json::json;

    fn definition(template: &str, params: &[(&str, ParameterType)]) -> QueryDefinition {
        QueryDefinition::new(
            "q",
            "",
            template,
            params
                .iter()
                .map(|(n, t)| QueryParameter {
                    name: n.to_string(),
                    parameter_type: *t,
                })
                .collect(),
        )
    }

    fn validated(def: &QueryDefinition, value: serde_json::Value) -> ValidatedArguments {
        let args: ArgumentSet = value.as_object().cloned().unwrap();
        ParameterValidator::validate(def, &args).unwrap()
    }

    #[test]
    fn hostile_string_only_travels_as_bind_variable() {
        let template = "FOR u IN users FILTER u.name == @name RETURN u";
        let def = definition(template, &[("name", ParameterType::String)]);
        let hostile = "x\" || true FILTER 1 == 1 REMOVE u IN users //";
        let bound = SafeBinder::bind(&def, &validated(&def, json!({ "name": hostile }))).unwrap();

        assert_eq!(bound.query, template);
        assert!(!bound.query.contains("REMOVE"));
        assert_eq!(bound.bind_vars["name"], json!(hostile));
    }

    #[test]
    fn unreferenced_parameter_is_not_sent() {
        let def = definition(
            "FOR u IN users FILTER u.age >= @minAge RETURN u",
            &[("minAge", ParameterType::Number), ("debug", ParameterType::Boolean)],
        );
        let bound =
            SafeBinder::bind(&def, &validated(&def, json!({"minAge": 21, "debug": true}))).unwrap();
        assert_eq!(bound.bind_vars.len(), 1);
        assert_eq!(bound.bind_vars["minAge"], json!(21));
    }

    #[test]
    fn collection_placeholder_is_unsupported() {
        let def = definition("FOR d IN @@coll RETURN d", &[]);
        let err = SafeBinder::bind(&def, &validated(&def, json!({}))).unwrap_err();
        assert_eq!(
            err,
            BindError::UnsupportedPlaceholder {
                query: "q".into(),
                placeholder: "@@coll".into(),
            }
        );
        assert_eq!(err.placeholder().as_deref(), Some("@@coll"));
    }

    #[test]
    fn arguments_for_another_query_are_refused() {
        let def = definition("RETURN 1", &[]);
        let other = QueryDefinition::new("other", "", "RETURN 2", vec![]);
        let err = SafeBinder::bind(&def, &validated(&other, json!({}))).unwrap_err();
        assert!(matches!(err, BindError::DefinitionMismatch { .. }));
    }

    #[test]
    fn serializes_with_driver_field_names() {
        let def = definition("RETURN @x", &[("x", ParameterType::Array)]);
        let bound = SafeBinder::bind(&def, &validated(&def, json!({"x": [1, 2]}))).unwrap();
        let body = serde_json::to_value(&bound).unwrap();
        assert_eq!(body["bindVars"], json!({"x": [1, 2]}));
        assert_eq!(body["query"], json!("RETURN @x"));
    }
}
