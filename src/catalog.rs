//! Catalog file format
//!
//! The catalog names the database endpoint, the credentials used to reach it
//! and the list of query templates. Parameter types are kept as raw strings
//! here so that an unsupported type is reported by the registry loader with
//! the query it belongs to, rather than as an opaque parse failure.

use crate::registry::LoadError;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::error::Category;
use std::fmt;
use std::path::Path;

#[derive(Clone, Deserialize)]
pub struct Catalog {
    pub arangodb_endpoint: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub queries: Vec<CatalogQuery>,
}

impl Catalog {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, LoadError> {
        serde_json::from_slice(bytes).map_err(|e| LoadError::Malformed(locate(&e)))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read catalog file {:?}", path))?;
        Self::from_slice(&bytes).with_context(|| format!("failed to parse catalog {:?}", path))
    }
}

/// Where a parse failed, without serde's message
///
/// serde quotes offending values, and catalog values include the password.
fn locate(err: &serde_json::Error) -> String {
    let category = match err.classify() {
        Category::Io => "read",
        Category::Syntax => "syntax",
        Category::Data => "invalid value",
        Category::Eof => "unexpected end of input",
    };
    format!("{} at line {}, column {}", category, err.line(), err.column())
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("arangodb_endpoint", &self.arangodb_endpoint)
            .field("credentials", &self.credentials)
            .field("queries", &self.queries.len())
            .finish()
    }
}

/// Database credentials; the password never appears in Debug output
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogQuery {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<CatalogParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogParameter {
    pub name: String,
    pub parameter_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "arangodb_endpoint": "http://localhost:8529/",
        "username": "root",
        "password": "hunter2",
        "queries": [
            {
                "name": "Get Users",
                "description": "Users above an age",
                "query": "FOR u IN users FILTER u.age >= @minAge RETURN u",
                "parameters": [{"name": "minAge", "parameter_type": "number"}]
            }
        ]
    }"#;

    #[test]
    fn parses_catalog_with_flattened_credentials() {
        let catalog = Catalog::from_slice(CATALOG.as_bytes()).unwrap();
        assert_eq!(catalog.credentials.username, "root");
        assert_eq!(catalog.queries.len(), 1);
        assert_eq!(catalog.queries[0].parameters[0].parameter_type, "number");
    }

    #[test]
    fn debug_output_redacts_password() {
        let catalog = Catalog::from_slice(CATALOG.as_bytes()).unwrap();
        let rendered = format!("{:?}", catalog);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn malformed_json_is_load_error() {
        let err = Catalog::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, LoadError::Malformed(_)));
        assert_eq!(err.to_string(), "catalog is malformed: syntax at line 1, column 2");
    }

    #[test]
    fn load_errors_do_not_quote_catalog_values() {
        let bytes = br#"{
            "arangodb_endpoint": "http://localhost:8529",
            "username": "root",
            "password": 1234,
            "queries": []
        }"#;
        let message = Catalog::from_slice(bytes).unwrap_err().to_string();
        assert!(!message.contains("1234"), "{message}");
        assert!(message.starts_with("catalog is malformed: invalid value at line"));
    }
}
