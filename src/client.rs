//! ArangoDB HTTP cursor client
//!
//! A query runs as one `POST /_api/cursor` followed by `PUT /_api/cursor/{id}`
//! while the server reports more batches. If the future driving a cursor is
//! dropped before the last batch, the cursor is released with a best-effort
//! `DELETE`. Error text is built from `reqwest::Error::without_url` so the
//! endpoint never shows up in messages.

use crate::aql::binder::BoundExecution;
use crate::catalog::Credentials;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Failure talking to the database
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("could not reach database: {0}")]
    Connection(String),

    #[error("database rejected credentials (HTTP {status})")]
    Authentication { status: u16 },

    #[error("database query error {error_num} (HTTP {status}): {message}")]
    Query {
        status: u16,
        error_num: i64,
        message: String,
    },

    #[error("database call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no database slot available within {0:?}")]
    PoolTimeout(Duration),

    #[error("unexpected database response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Short machine-readable name of the failure
    pub fn label(&self) -> &'static str {
        match self {
            RemoteError::Connection(_) => "connection",
            RemoteError::Authentication { .. } => "authentication",
            RemoteError::Query { .. } => "query",
            RemoteError::Timeout(_) => "timeout",
            RemoteError::PoolTimeout(_) => "pool_timeout",
            RemoteError::Protocol(_) => "protocol",
        }
    }

    /// HTTP status reported by the database, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Authentication { status } | RemoteError::Query { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_) | RemoteError::PoolTimeout(_))
    }
}

/// Executes bound queries against a database
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Run the query and return every result element in order
    async fn run(&self, execution: &BoundExecution) -> Result<Vec<JsonValue>, RemoteError>;

    /// Endpoint description for logs and health output
    fn endpoint(&self) -> &str;
}

/// HTTP settings for [`ArangoClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Rows per cursor batch
    pub batch_size: u32,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            batch_size: 1000,
            pool_max_idle_per_host: 16,
        }
    }
}

/// ArangoDB client over the HTTP cursor API
#[derive(Clone)]
pub struct ArangoClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    config: ClientConfig,
}

impl std::fmt::Debug for ArangoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArangoClient")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

#[derive(Serialize)]
struct CursorRequest<'a> {
    query: &'a str,
    #[serde(rename = "bindVars")]
    bind_vars: &'a Map<String, JsonValue>,
    #[serde(rename = "batchSize")]
    batch_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorResponse {
    #[serde(default)]
    result: Vec<JsonValue>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArangoErrorBody {
    #[serde(default)]
    error_num: i64,
    #[serde(default)]
    error_message: String,
}

impl ArangoClient {
    pub fn new(endpoint: &str, credentials: Credentials, config: ClientConfig) -> Result<Self> {
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "arangodb_endpoint must be an http(s) URL"
        );
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
            config,
        })
    }

    fn cursor_url(&self) -> String {
        format!("{}/_api/cursor", self.endpoint)
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.config.connect_timeout)
        } else {
            RemoteError::Connection(err.without_url().to_string())
        }
    }

    async fn read_batch(&self, response: reqwest::Response) -> Result<CursorResponse, RemoteError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Authentication {
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ArangoErrorBody>(&body) {
                Ok(err) => RemoteError::Query {
                    status: status.as_u16(),
                    error_num: err.error_num,
                    message: err.error_message,
                },
                Err(_) => RemoteError::Protocol(format!("HTTP {} without error body", status)),
            });
        }

        serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Protocol(format!("malformed cursor response: {}", e)))
    }
}

#[async_trait]
impl DatabaseClient for ArangoClient {
    async fn run(&self, execution: &BoundExecution) -> Result<Vec<JsonValue>, RemoteError> {
        let request = CursorRequest {
            query: &execution.query,
            bind_vars: &execution.bind_vars,
            batch_size: self.config.batch_size,
        };
        let response = self
            .http
            .post(self.cursor_url())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let mut batch = self.read_batch(response).await?;
        let mut rows = std::mem::take(&mut batch.result);
        if !batch.has_more {
            return Ok(rows);
        }

        let cursor_id = batch.id.ok_or_else(|| {
            RemoteError::Protocol("cursor reports more results but has no id".into())
        })?;
        let cursor_url = format!("{}/{}", self.cursor_url(), cursor_id);
        let mut lease = CursorLease::new(self, cursor_url.clone());
        let mut batches = 1usize;

        loop {
            let response = self
                .http
                .put(&cursor_url)
                .basic_auth(&self.credentials.username, Some(&self.credentials.password))
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            let next = self.read_batch(response).await?;
            batches += 1;
            trace!(
                query = %execution.query_name,
                batch = batches,
                rows = next.result.len(),
                "cursor batch received"
            );
            rows.extend(next.result);
            if !next.has_more {
                break;
            }
        }

        lease.release();
        debug!(
            query = %execution.query_name,
            batches,
            rows = rows.len(),
            "cursor drained"
        );
        Ok(rows)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Deletes a live server cursor unless released after the last batch
struct CursorLease {
    http: reqwest::Client,
    url: String,
    credentials: Credentials,
    live: bool,
}

impl CursorLease {
    fn new(client: &ArangoClient, url: String) -> Self {
        Self {
            http: client.http.clone(),
            url,
            credentials: client.credentials.clone(),
            live: true,
        }
    }

    fn release(&mut self) {
        self.live = false;
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let request = self
            .http
            .delete(&self.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(status = %response.status(), "abandoned cursor deleted"),
                Err(err) => debug!(error = %err.without_url(), "failed to delete abandoned cursor"),
            }
        });
    }
}
