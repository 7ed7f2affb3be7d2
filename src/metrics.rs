//! Prometheus metrics for production observability
//!
//! Query executions are counted by query name and outcome, timed, and their
//! row counts accumulated. Registry reloads are tracked separately.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for execution outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryStatusLabels {
    /// Catalog query name
    pub query: String,
    /// Execution status ("success", "error", "timeout", "cancelled")
    pub status: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub query: String,
    /// Stable error kind, e.g. "type_mismatch"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryLabels {
    pub query: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReloadLabels {
    /// "success" or "error"
    pub outcome: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Executions by query and status
    pub adb_queries_total: Family<QueryStatusLabels, Counter>,

    /// Execution latency by query
    pub adb_query_duration_seconds: Family<QueryLabels, Histogram>,

    /// Executions currently in flight
    pub adb_active_queries: Gauge,

    /// Rows returned by query
    pub adb_query_rows_total: Family<QueryLabels, Counter>,

    /// Errors by query and kind
    pub adb_errors_total: Family<ErrorLabels, Counter>,

    /// Catalog reloads by outcome
    pub adb_registry_reloads_total: Family<ReloadLabels, Counter>,

    /// Queries in the active registry
    pub adb_registry_queries: Gauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with all metrics registered
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let adb_queries_total = Family::<QueryStatusLabels, Counter>::default();
        registry.register(
            "adb_queries_total",
            "Total number of query executions",
            adb_queries_total.clone(),
        );

        let adb_query_duration_seconds =
            Family::<QueryLabels, Histogram>::new_with_constructor(|| {
                // Buckets: 5ms .. ~30s
                Histogram::new(exponential_buckets(0.005, 2.5, 10))
            });
        registry.register(
            "adb_query_duration_seconds",
            "Query execution latency histogram in seconds",
            adb_query_duration_seconds.clone(),
        );

        let adb_active_queries = Gauge::default();
        registry.register(
            "adb_active_queries",
            "Number of query executions currently in flight",
            adb_active_queries.clone(),
        );

        let adb_query_rows_total = Family::<QueryLabels, Counter>::default();
        registry.register(
            "adb_query_rows_total",
            "Total number of rows returned",
            adb_query_rows_total.clone(),
        );

        let adb_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "adb_errors_total",
            "Total number of errors by query and error kind",
            adb_errors_total.clone(),
        );

        let adb_registry_reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register(
            "adb_registry_reloads_total",
            "Total number of catalog reload attempts",
            adb_registry_reloads_total.clone(),
        );

        let adb_registry_queries = Gauge::default();
        registry.register(
            "adb_registry_queries",
            "Number of queries in the active registry",
            adb_registry_queries.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            adb_queries_total,
            adb_query_duration_seconds,
            adb_active_queries,
            adb_query_rows_total,
            adb_errors_total,
            adb_registry_reloads_total,
            adb_registry_queries,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        encode(&mut buffer, &registry)?;
        Ok(buffer)
    }

    fn record_outcome(&self, query: &str, status: &str, duration: Duration) {
        self.adb_queries_total
            .get_or_create(&QueryStatusLabels {
                query: query.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.adb_query_duration_seconds
            .get_or_create(&QueryLabels {
                query: query.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_query_success(&self, query: &str, duration: Duration, rows: usize) {
        self.record_outcome(query, "success", duration);
        self.adb_query_rows_total
            .get_or_create(&QueryLabels {
                query: query.to_string(),
            })
            .inc_by(rows as u64);
    }

    /// Record a failed execution; timeouts and cancellations get their own status
    pub fn record_query_error(&self, query: &str, duration: Duration, kind: &str, status: &str) {
        self.record_outcome(query, status, duration);
        self.adb_errors_total
            .get_or_create(&ErrorLabels {
                query: query.to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_reload(&self, success: bool, query_count: usize) {
        let outcome = if success { "success" } else { "error" };
        self.adb_registry_reloads_total
            .get_or_create(&ReloadLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        if success {
            self.adb_registry_queries.set(query_count as i64);
        }
    }

    pub fn set_registry_size(&self, query_count: usize) {
        self.adb_registry_queries.set(query_count as i64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Metric label for requests naming a query the registry does not hold
pub const UNKNOWN_QUERY_LABEL: &str = "<unknown>";

/// RAII guard for execution timing and metric recording
///
/// An execution whose future is dropped before completion is recorded as
/// cancelled.
pub struct QueryMetrics {
    collector: Arc<MetricsCollector>,
    query: String,
    start: Instant,
    completed: bool,
}

impl QueryMetrics {
    /// Increments the in-flight gauge and starts timing
    pub fn new(query: &str) -> Self {
        Self::with_collector(METRICS.clone(), query)
    }

    pub fn with_collector(collector: Arc<MetricsCollector>, query: &str) -> Self {
        collector.adb_active_queries.inc();
        Self {
            collector,
            query: query.to_string(),
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn success(mut self, rows: usize) {
        self.collector
            .record_query_success(&self.query, self.start.elapsed(), rows);
        self.finish();
    }

    pub fn error(mut self, kind: &str, status: &str) {
        self.collector
            .record_query_error(&self.query, self.start.elapsed(), kind, status);
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        self.collector.adb_active_queries.dec();
    }
}

impl Drop for QueryMetrics {
    fn drop(&mut self) {
        if !self.completed {
            self.collector.record_query_error(
                &self.query,
                self.start.elapsed(),
                "cancelled",
                "cancelled",
            );
            self.finish();
        }
    }
}
