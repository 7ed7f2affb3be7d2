//! Error handling for query execution
//!
//! This module provides:
//! - The terminal [`ExecutionError`] wrapping every per-stage error
//! - Stable error kinds and numeric codes for API consumers
//! - Error telemetry by kind and query name
//! - Actionable suggestions attached to error responses

use crate::aql::binder::BindError;
use crate::aql::normalizer::NormalizeError;
use crate::aql::validation::ValidationError;
use crate::client::RemoteError;
use crate::registry::LoadError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use strum::{EnumIter, IntoStaticStr};
use thiserror::Error;

// =============================================================================
// EXECUTION STAGES
// =============================================================================

/// Pipeline stage an execution is in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStage {
    Lookup,
    Validate,
    Bind,
    Dispatch,
    Normalize,
}

// =============================================================================
// EXECUTION ERROR
// =============================================================================

/// The single classified failure of an execution
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("query '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("execution cancelled during {stage}")]
    Cancelled { stage: ExecutionStage },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::NotFound(_) => ErrorKind::NotFound,
            ExecutionError::Validation(ValidationError::MissingParameter { .. }) => {
                ErrorKind::MissingParameter
            }
            ExecutionError::Validation(ValidationError::TypeMismatch { .. }) => {
                ErrorKind::TypeMismatch
            }
            ExecutionError::Validation(ValidationError::UnknownParameter { .. }) => {
                ErrorKind::UnknownParameter
            }
            ExecutionError::Bind(BindError::UnsupportedPlaceholder { .. }) => {
                ErrorKind::UnsupportedPlaceholder
            }
            ExecutionError::Bind(_) => ErrorKind::InternalError,
            ExecutionError::Remote(_) => ErrorKind::RemoteError,
            ExecutionError::Normalize(_) => ErrorKind::NormalizeError,
            ExecutionError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Stage that produced the error
    pub fn stage(&self) -> ExecutionStage {
        match self {
            ExecutionError::NotFound(_) => ExecutionStage::Lookup,
            ExecutionError::Validation(_) => ExecutionStage::Validate,
            ExecutionError::Bind(_) => ExecutionStage::Bind,
            ExecutionError::Remote(_) => ExecutionStage::Dispatch,
            ExecutionError::Normalize(_) => ExecutionStage::Normalize,
            ExecutionError::Cancelled { stage } => *stage,
        }
    }

    /// Structured details for API responses. Never contains argument values.
    pub fn details(&self) -> JsonValue {
        let mut details = Map::new();
        details.insert("stage".into(), json!(self.stage()));
        match self {
            ExecutionError::NotFound(name) => {
                details.insert("query".into(), json!(name));
            }
            ExecutionError::Validation(err) => {
                details.insert("parameter".into(), json!(err.parameter()));
                if let ValidationError::TypeMismatch {
                    expected, actual, ..
                } = err
                {
                    details.insert("expected".into(), json!(expected));
                    details.insert("actual".into(), json!(actual));
                }
            }
            ExecutionError::Bind(err) => {
                if let Some(placeholder) = err.placeholder() {
                    details.insert("placeholder".into(), json!(placeholder));
                }
            }
            ExecutionError::Remote(err) => {
                details.insert("remote".into(), json!(err.label()));
                if let Some(status) = err.status() {
                    details.insert("status".into(), json!(status));
                }
                if let RemoteError::Query { error_num, .. } = err {
                    details.insert("error_num".into(), json!(error_num));
                }
            }
            ExecutionError::Normalize(NormalizeError::MixedScalar { index, found }) => {
                details.insert("index".into(), json!(index));
                details.insert("found".into(), json!(found));
            }
            ExecutionError::Cancelled { .. } => {}
        }
        JsonValue::Object(details)
    }

    pub fn suggestions(&self) -> Vec<String> {
        let tips: &[&str] = match self {
            ExecutionError::NotFound(_) => &[
                "List available queries with GET /queries",
                "Query names are case-sensitive",
            ],
            ExecutionError::Validation(ValidationError::MissingParameter { .. }) => {
                &["Every declared parameter is required"]
            }
            ExecutionError::Validation(ValidationError::TypeMismatch { .. }) => &[
                "Send values with their declared JSON type (21, not \"21\")",
                "Use the form endpoint to submit text values",
            ],
            ExecutionError::Validation(ValidationError::UnknownParameter { .. }) => {
                &["Remove arguments the query does not declare"]
            }
            ExecutionError::Bind(BindError::UnsupportedPlaceholder { .. }) => &[
                "Collection bind parameters (@@name) are not supported",
                "Name the collection literally in the query template",
            ],
            ExecutionError::Remote(RemoteError::Authentication { .. }) => {
                &["Check the catalog username and password"]
            }
            ExecutionError::Remote(RemoteError::Timeout(_) | RemoteError::PoolTimeout(_)) => &[
                "The database may be overloaded, retry later",
                "Raise the request timeout or max concurrent queries",
            ],
            ExecutionError::Remote(RemoteError::Connection(_)) => {
                &["Check that arangodb_endpoint is reachable"]
            }
            _ => &[],
        };
        tips.iter().map(|s| s.to_string()).collect()
    }

    /// Add this error to telemetry
    pub fn track(&self, query: Option<&str>) {
        ERROR_METRICS.record_error(self.kind(), query);
    }
}

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Stable error identifiers exposed to API consumers
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum ErrorKind {
    // 1xxx: the request cannot be served as sent
    /// No query with the requested name
    NotFound = 1001,
    /// A declared parameter was not supplied
    MissingParameter = 1002,
    /// A supplied value does not match the declared type
    TypeMismatch = 1003,
    /// An argument the query does not declare
    UnknownParameter = 1004,
    /// The request body or query string could not be read
    InvalidRequest = 1005,
    // 2xxx: catalog content
    /// The template uses a placeholder that cannot be bound
    UnsupportedPlaceholder = 2001,
    /// The catalog could not be loaded
    CatalogError = 2002,
    // 3xxx: the database
    /// The database call failed
    RemoteError = 3001,
    /// The database returned a result of unexpected shape
    NormalizeError = 3002,
    // 4xxx: the execution was stopped
    /// The caller cancelled the execution
    Cancelled = 4001,
    // 5xxx: this service
    /// Internal invariant violated
    InternalError = 5001,
}

impl ErrorKind {
    /// Get the integer code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::MissingParameter
            | ErrorKind::TypeMismatch
            | ErrorKind::UnknownParameter
            | ErrorKind::InvalidRequest => "client_error",
            ErrorKind::UnsupportedPlaceholder | ErrorKind::CatalogError => "catalog_error",
            ErrorKind::RemoteError | ErrorKind::NormalizeError => "upstream_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InternalError => "server_error",
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Wire form of an error, `{ kind, code, message, details }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
    pub details: JsonValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            details: JsonValue::Object(Map::new()),
            suggestions: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn from_load(err: &LoadError) -> Self {
        Self::new(ErrorKind::CatalogError, err.to_string())
            .with_suggestions(vec!["Fix the catalog file and reload".to_string()])
    }
}

impl From<&ExecutionError> for ErrorResponse {
    fn from(err: &ExecutionError) -> Self {
        Self::new(err.kind(), err.to_string())
            .with_details(err.details())
            .with_suggestions(err.suggestions())
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

/// Error metrics for telemetry
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    /// Error count by kind
    kind_counts: RwLock<HashMap<ErrorKind, AtomicU64>>,
    /// Error count by query name
    query_errors: RwLock<HashMap<String, AtomicU64>>,
    /// Error count by category
    category_counts: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error occurrence
    pub fn record_error(&self, kind: ErrorKind, query: Option<&str>) {
        increment(&self.kind_counts, &kind, || kind);

        if let Some(query_name) = query {
            increment(&self.query_errors, query_name, || query_name.to_string());
        }

        let category = kind.category();
        increment(&self.category_counts, category, || category);

        tracing::debug!(
            error_kind = %kind,
            query = query,
            category = category,
            "error recorded"
        );
    }

    pub fn get_kind_count(&self, kind: ErrorKind) -> u64 {
        load(&self.kind_counts, &kind)
    }

    pub fn get_query_error_count(&self, query: &str) -> u64 {
        load(&self.query_errors, query)
    }

    pub fn get_category_count(&self, category: &str) -> u64 {
        load(&self.category_counts, category)
    }

    /// Get all error statistics
    pub fn get_stats(&self) -> ErrorStats {
        ErrorStats {
            kind_counts: snapshot(&self.kind_counts),
            query_errors: snapshot(&self.query_errors),
            category_counts: snapshot(&self.category_counts)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.kind_counts.write().clear();
        self.query_errors.write().clear();
        self.category_counts.write().clear();
    }
}

fn increment<K, Q>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q, owned: impl FnOnce() -> K)
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
{
    {
        let read = map.read();
        if let Some(counter) = read.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .entry(owned())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn load<K, Q>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q) -> u64
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
{
    map.read()
        .get(key)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

fn snapshot<K: Clone + std::hash::Hash + Eq>(map: &RwLock<HashMap<K, AtomicU64>>) -> HashMap<K, u64> {
    map.read()
        .iter()
        .map(|(k, c)| (k.clone(), c.load(Ordering::Relaxed)))
        .collect()
}

/// Error statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub kind_counts: HashMap<ErrorKind, u64>,
    pub query_errors: HashMap<String, u64>,
    pub category_counts: HashMap<String, u64>,
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);
