//! Parameter schema validation for catalog queries
//!
//! Checks a caller's [`ArgumentSet`] against the parameters a query declares
//! and produces a type-tagged copy of the arguments. Only that copy is
//! accepted by the binder, so arguments cannot change between validation and
//! binding.
//!
//! Policy:
//!
//! - every declared parameter is required
//! - values must already have the declared JSON shape (`"21"` is not a number)
//! - arguments the query does not declare are rejected
//!
//! Violations are reported in a fixed order: missing parameters and type
//! mismatches in declaration order, then unknown arguments sorted by name.

use super::value::{ParameterType, TypedValue, json_type_name};
use crate::model::{ArgumentSet, QueryDefinition};
use indexmap::IndexMap;
use thiserror::Error;

/// A single argument violation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required parameter '{name}'")]
    MissingParameter { name: String },

    #[error("type mismatch for parameter '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        actual: String,
    },

    #[error("unknown parameter '{name}'")]
    UnknownParameter { name: String },
}

impl ValidationError {
    /// Name of the parameter the error is about
    pub fn parameter(&self) -> &str {
        match self {
            ValidationError::MissingParameter { name }
            | ValidationError::TypeMismatch { name, .. }
            | ValidationError::UnknownParameter { name } => name,
        }
    }
}

/// Arguments that passed validation for one specific query
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedArguments {
    query: String,
    values: IndexMap<String, TypedValue>,
}

impl ValidatedArguments {
    /// Name of the query these arguments were validated against
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Stateless validator for query arguments
pub struct ParameterValidator;

impl ParameterValidator {
    /// Validate and return the first violation, if any
    pub fn validate(
        definition: &QueryDefinition,
        args: &ArgumentSet,
    ) -> Result<ValidatedArguments, ValidationError> {
        Self::validate_all(definition, args).map_err(|mut errors| errors.swap_remove(0))
    }

    /// Validate and return every violation
    ///
    /// The error vector is never empty.
    pub fn validate_all(
        definition: &QueryDefinition,
        args: &ArgumentSet,
    ) -> Result<ValidatedArguments, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut values = IndexMap::with_capacity(definition.parameters.len());

        for param in &definition.parameters {
            let Some(value) = args.get(&param.name) else {
                errors.push(ValidationError::MissingParameter {
                    name: param.name.clone(),
                });
                continue;
            };
            match TypedValue::from_json(param.parameter_type, value) {
                Some(typed) => {
                    values.insert(param.name.clone(), typed);
                }
                None => errors.push(ValidationError::TypeMismatch {
                    name: param.name.clone(),
                    expected: param.parameter_type,
                    actual: json_type_name(value).to_string(),
                }),
            }
        }

        // Missing parameters sort ahead of mismatches regardless of position.
        errors.sort_by_key(|e| !matches!(e, ValidationError::MissingParameter { .. }));

        let mut unknown: Vec<&String> = args
            .keys()
            .filter(|name| definition.parameter(name).is_none())
            .collect();
        unknown.sort();
        errors.extend(
            unknown
                .into_iter()
                .map(|name| ValidationError::UnknownParameter { name: name.clone() }),
        );

        if errors.is_empty() {
            Ok(ValidatedArguments {
                query: definition.name.clone(),
                values,
            })
        } else {
            Err(errors)
        }
    }
}
