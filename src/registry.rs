//! Query registry
//!
//! Built once from a catalog and read-only afterwards. Reloading builds a new
//! registry and swaps it into a [`RegistryHandle`]; requests already running
//! keep the snapshot they started with.

use crate::aql::value::ParameterType;
use crate::catalog::{Catalog, CatalogQuery};
use crate::error::ExecutionError;
use crate::model::{QueryDefinition, QueryParameter, QuerySummary};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Catalog defects found while building a registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("catalog is malformed: {0}")]
    Malformed(String),

    #[error("query at position {0} has an empty name")]
    EmptyName(usize),

    #[error("duplicate query name '{0}'")]
    DuplicateQuery(String),

    #[error("query '{query}' declares parameter '{parameter}' more than once")]
    DuplicateParameter { query: String, parameter: String },

    #[error("query '{query}' parameter '{parameter}' has unsupported type '{parameter_type}'")]
    UnsupportedParameterType {
        query: String,
        parameter: String,
        parameter_type: String,
    },

    #[error("query '{query}' references undeclared placeholder '@{placeholder}'")]
    UndeclaredPlaceholder { query: String, placeholder: String },
}

/// Immutable name -> definition map in catalog order
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: IndexMap<String, Arc<QueryDefinition>>,
}

impl QueryRegistry {
    /// Build a registry from a parsed catalog
    pub fn load(catalog: &Catalog) -> Result<Self, LoadError> {
        Self::from_queries(&catalog.queries)
    }

    pub fn from_queries(entries: &[CatalogQuery]) -> Result<Self, LoadError> {
        let mut queries = IndexMap::with_capacity(entries.len());

        for (position, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(LoadError::EmptyName(position));
            }
            if queries.contains_key(&entry.name) {
                return Err(LoadError::DuplicateQuery(entry.name.clone()));
            }
            let definition = build_definition(entry)?;
            queries.insert(entry.name.clone(), Arc::new(definition));
        }

        debug!(query_count = queries.len(), "query registry built");
        Ok(Self { queries })
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<QueryDefinition>, ExecutionError> {
        self.queries
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::NotFound(name.to_string()))
    }

    /// Introspection in catalog order
    pub fn list_queries(&self) -> Vec<QuerySummary> {
        self.queries.values().map(|q| q.summary()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn build_definition(entry: &CatalogQuery) -> Result<QueryDefinition, LoadError> {
    let mut seen = HashSet::new();
    let mut parameters = Vec::with_capacity(entry.parameters.len());

    for raw in &entry.parameters {
        if !seen.insert(raw.name.as_str()) {
            return Err(LoadError::DuplicateParameter {
                query: entry.name.clone(),
                parameter: raw.name.clone(),
            });
        }
        let parameter_type = ParameterType::from_str(raw.parameter_type.trim()).map_err(|_| {
            LoadError::UnsupportedParameterType {
                query: entry.name.clone(),
                parameter: raw.name.clone(),
                parameter_type: raw.parameter_type.clone(),
            }
        })?;
        parameters.push(QueryParameter {
            name: raw.name.clone(),
            parameter_type,
        });
    }

    let definition = QueryDefinition::new(
        entry.name.clone(),
        entry.description.clone(),
        entry.query.clone(),
        parameters,
    );

    for name in definition.placeholders().value_names() {
        if definition.parameter(name).is_none() {
            return Err(LoadError::UndeclaredPlaceholder {
                query: entry.name.clone(),
                placeholder: name.to_string(),
            });
        }
    }

    for unused in definition.unreferenced_parameters() {
        warn!(
            query = %definition.name,
            parameter = unused,
            "declared parameter does not appear in query template"
        );
    }

    for placeholder in definition.placeholders().unsupported() {
        warn!(
            query = %definition.name,
            placeholder = %placeholder.token(),
            "template uses a placeholder that cannot be bound, executions will fail"
        );
    }

    Ok(definition)
}

/// Parse catalog bytes and build a registry
pub fn load_registry(catalog_bytes: &[u8]) -> Result<QueryRegistry, LoadError> {
    let catalog = Catalog::from_slice(catalog_bytes)?;
    QueryRegistry::load(&catalog)
}

/// Shared, swappable reference to the current registry
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<QueryRegistry>>>,
    generation: Arc<AtomicU64>,
}

impl RegistryHandle {
    pub fn new(registry: QueryRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The registry in effect right now
    pub fn snapshot(&self) -> Arc<QueryRegistry> {
        self.current.read().clone()
    }

    /// Replace the registry, returning the previous one
    pub fn swap(&self, registry: QueryRegistry) -> Arc<QueryRegistry> {
        let next = Arc::new(registry);
        let count = next.len();
        let previous = std::mem::replace(&mut *self.current.write(), next);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, query_count = count, "query registry swapped");
        previous
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
