//! Execution dispatcher
//!
//! Runs one request through `Lookup -> Validate -> Bind -> Dispatch ->
//! Normalize`. Every stage failure is terminal and the database is only
//! contacted once binding has succeeded. There is no automatic retry.

use crate::aql::binder::{BoundExecution, SafeBinder};
use crate::aql::coercion::coerce_text_arguments;
use crate::aql::normalizer::ResultNormalizer;
use crate::aql::validation::ParameterValidator;
use crate::client::{DatabaseClient, RemoteError};
use crate::error::{ExecutionError, ExecutionStage};
use crate::logging::execute_query_span;
use crate::metrics::{QueryMetrics, UNKNOWN_QUERY_LABEL};
use crate::model::{ArgumentSet, QueryDefinition, QuerySummary, Row};
use crate::registry::{QueryRegistry, RegistryHandle};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

/// Limits applied to every execution
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for the whole database call, all cursor batches included
    pub request_timeout: Duration,
    /// How long to wait for a free execution slot
    pub acquire_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub slow_query_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
            max_concurrent_queries: 16,
            slow_query_threshold_ms: 1_000,
        }
    }
}

/// Look up, validate and bind without touching the database
pub fn prepare(
    registry: &QueryRegistry,
    name: &str,
    args: &ArgumentSet,
) -> Result<(Arc<QueryDefinition>, BoundExecution), ExecutionError> {
    let definition = registry.lookup(name)?;
    let validated = ParameterValidator::validate(&definition, args)?;
    let bound = SafeBinder::bind(&definition, &validated)?;
    Ok((definition, bound))
}

#[derive(Clone)]
pub struct QueryEngine {
    registry: RegistryHandle,
    client: Arc<dyn DatabaseClient>,
    limiter: Arc<Semaphore>,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(
        registry: RegistryHandle,
        client: Arc<dyn DatabaseClient>,
        config: EngineConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_queries.max(1)));
        Self {
            registry,
            client,
            limiter,
            config,
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    /// Free execution slots right now
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    pub fn list_queries(&self) -> Vec<QuerySummary> {
        self.registry.snapshot().list_queries()
    }

    pub fn describe(&self, name: &str) -> Result<QuerySummary, ExecutionError> {
        Ok(self.registry.snapshot().lookup(name)?.summary())
    }

    /// Bind a query against the current registry without executing it
    pub fn prepare(&self, name: &str, args: &ArgumentSet) -> Result<BoundExecution, ExecutionError> {
        let registry = self.registry.snapshot();
        prepare(&registry, name, args).map(|(_, bound)| bound)
    }

    pub async fn execute(&self, name: &str, args: &ArgumentSet) -> Result<Vec<Row>, ExecutionError> {
        self.execute_with_cancel(name, args, &CancellationToken::new())
            .await
    }

    /// Execute with text arguments, coercing them to the declared types first
    pub async fn execute_text(
        &self,
        name: &str,
        text_args: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, ExecutionError> {
        let coerced = self
            .registry
            .snapshot()
            .lookup(name)
            .and_then(|definition| {
                coerce_text_arguments(&definition, text_args).map_err(ExecutionError::from)
            });
        match coerced {
            Ok(args) => self.execute_with_cancel(name, &args, cancel).await,
            Err(err) => {
                err.track(Some(self.metric_label(name)));
                info!(query = name, error = %err, "text arguments rejected");
                Err(err)
            }
        }
    }

    /// Execute, aborting when `cancel` fires
    ///
    /// A cancellation observed before dispatch has no side effects. During
    /// dispatch the in-flight HTTP request is dropped and any open server
    /// cursor is released; the result is always [`ExecutionError::Cancelled`].
    pub async fn execute_with_cancel(
        &self,
        name: &str,
        args: &ArgumentSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, ExecutionError> {
        let request_id = Uuid::new_v4().to_string();
        let span = execute_query_span(name, &request_id);
        let recorder = span.clone();

        async move {
            let label = self.metric_label(name);
            let metrics = QueryMetrics::new(label);
            debug!(
                arguments = ?args.keys().collect::<Vec<_>>(),
                "execution started"
            );

            let outcome = self.run_stages(name, args, cancel).await;
            let elapsed = metrics.elapsed();

            match &outcome {
                Ok(rows) => {
                    recorder.record("outcome", "success");
                    recorder.record("rows", rows.len() as u64);
                    metrics.success(rows.len());
                    crate::log_slow_operation!(
                        elapsed,
                        self.config.slow_query_threshold_ms,
                        rows = rows.len(),
                        "query executed"
                    );
                }
                Err(err) => {
                    let kind = err.kind();
                    let kind_label: &'static str = kind.into();
                    recorder.record("outcome", kind_label);
                    err.track(Some(label));
                    metrics.error(kind_label, outcome_status(err));
                    match err {
                        ExecutionError::Remote(_) | ExecutionError::Normalize(_) => warn!(
                            error_kind = %kind,
                            stage = %err.stage(),
                            error = %err,
                            "query execution failed"
                        ),
                        _ => info!(
                            error_kind = %kind,
                            stage = %err.stage(),
                            error = %err,
                            "query execution rejected"
                        ),
                    }
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Caller-supplied names only become metric labels once the registry knows them
    fn metric_label<'a>(&self, name: &'a str) -> &'a str {
        if self.registry.snapshot().contains(name) {
            name
        } else {
            UNKNOWN_QUERY_LABEL
        }
    }

    async fn run_stages(
        &self,
        name: &str,
        args: &ArgumentSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                stage: ExecutionStage::Lookup,
            });
        }

        let registry = self.registry.snapshot();
        let (_, bound) = prepare(&registry, name, args)?;
        drop(registry);

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                stage: ExecutionStage::Dispatch,
            });
        }

        let raw = self.dispatch(&bound, cancel).await?;
        Ok(ResultNormalizer::normalize(raw)?)
    }

    async fn dispatch(
        &self,
        bound: &BoundExecution,
        cancel: &CancellationToken,
    ) -> Result<Vec<JsonValue>, ExecutionError> {
        let cancelled = || ExecutionError::Cancelled {
            stage: ExecutionStage::Dispatch,
        };

        let acquire = tokio::time::timeout(self.config.acquire_timeout, self.limiter.acquire());
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            acquired = acquire => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(RemoteError::Connection("execution limiter closed".into()).into())
                }
                Err(_) => return Err(RemoteError::PoolTimeout(self.config.acquire_timeout).into()),
            },
        };

        let call = tokio::time::timeout(self.config.request_timeout, self.client.run(bound));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            finished = call => match finished {
                Ok(result) => result.map_err(ExecutionError::from),
                Err(_) => Err(RemoteError::Timeout(self.config.request_timeout).into()),
            },
        }
    }
}

fn outcome_status(err: &ExecutionError) -> &'static str {
    match err {
        ExecutionError::Cancelled { .. } => "cancelled",
        ExecutionError::Remote(remote) if remote.is_timeout() => "timeout",
        _ => "error",
    }
}
