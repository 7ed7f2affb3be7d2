use crate::aql::placeholder::{self, PlaceholderScan};
use crate::aql::value::ParameterType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Per-request arguments, keyed by parameter name
pub type ArgumentSet = Map<String, JsonValue>;

/// One declared parameter of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: ParameterType,
}

/// A named, parameterized query template loaded from the catalog
#[derive(Debug, Clone)]
pub struct QueryDefinition {
    pub name: String,
    pub description: String,
    pub template: String,
    pub parameters: Vec<QueryParameter>,
    placeholders: PlaceholderScan,
}

impl QueryDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<String>,
        parameters: Vec<QueryParameter>,
    ) -> Self {
        let template = template.into();
        let placeholders = placeholder::scan(&template);
        Self {
            name: name.into(),
            description: description.into(),
            template,
            parameters,
            placeholders,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&QueryParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Placeholder references found in the template at load time
    pub fn placeholders(&self) -> &PlaceholderScan {
        &self.placeholders
    }

    /// Declared parameters that never appear in the template
    pub fn unreferenced_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| !self.placeholders.references(&p.name))
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn summary(&self) -> QuerySummary {
        QuerySummary {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Read-only view of a query for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<QueryParameter>,
}

/// Where a normalized row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    /// Record of a plain (non-graph) result
    Document,
    /// Vertex record of a graph result
    Vertex,
    /// Edge record of a graph result
    Edge,
}

/// One record of an execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub kind: RowKind,
    pub fields: Map<String, JsonValue>,
}

impl Row {
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }
}

/// Response body for a successful execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub query: String,
    pub row_count: usize,
    pub rows: Vec<Row>,
}
