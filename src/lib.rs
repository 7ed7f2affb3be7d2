pub mod aql;
pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod server;

pub use catalog::{Catalog, Credentials};
pub use client::{ArangoClient, ClientConfig, DatabaseClient, RemoteError};
pub use config::{CliArgs, Command, ServerConfig};
pub use engine::{EngineConfig, QueryEngine};
pub use error::{ERROR_METRICS, ErrorKind, ErrorMetrics, ErrorResponse, ExecutionError};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use model::{ArgumentSet, QueryDefinition, QuerySummary, Row, RowKind};
pub use registry::{LoadError, QueryRegistry, RegistryHandle, load_registry};
pub use server::AppState;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Load the catalog and wire the engine to its database
pub fn build_engine(config: &ServerConfig) -> Result<QueryEngine> {
    let catalog = Catalog::from_path(&config.catalog_path)?;
    let registry = QueryRegistry::load(&catalog)
        .with_context(|| format!("invalid catalog {:?}", config.catalog_path))?;
    metrics::METRICS.set_registry_size(registry.len());

    let client = ArangoClient::new(
        &catalog.arangodb_endpoint,
        catalog.credentials.clone(),
        config.client_config(),
    )?;

    tracing::info!(
        catalog = %config.catalog_path.display(),
        query_count = registry.len(),
        user = %catalog.credentials.username,
        "catalog loaded"
    );

    Ok(QueryEngine::new(
        RegistryHandle::new(registry),
        Arc::new(client),
        config.engine_config(),
    ))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let engine = build_engine(&config)?;
    let state = Arc::new(AppState::new(engine, config.catalog_path.clone()));

    tracing::info!(
        bind = %config.http_bind_address,
        max_concurrent_queries = config.max_concurrent_queries,
        "starting query runner"
    );

    server::serve(state, config.http_bind_address).await
}
