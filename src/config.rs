use crate::client::ClientConfig;
use crate::engine::EngineConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CATALOG: &str = "config.json";
const DEFAULT_HTTP_PORT: u16 = 3030;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 16;
const DEFAULT_BATCH_SIZE: u32 = 1_000;
const DEFAULT_SLOW_QUERY_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub catalog_path: PathBuf,
    pub http_bind_address: SocketAddr,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub batch_size: u32,
    pub slow_query_threshold_ms: u64,
}

impl ServerConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let file_config = if let Some(path) = args.config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            catalog: file_catalog,
            http_bind: file_http_bind,
            request_timeout_ms: file_request_timeout_ms,
            connect_timeout_ms: file_connect_timeout_ms,
            acquire_timeout_ms: file_acquire_timeout_ms,
            max_concurrent_queries: file_max_concurrent_queries,
            batch_size: file_batch_size,
            slow_query_ms: file_slow_query_ms,
        } = file_config;

        let cli_http_bind = match &args.command {
            Some(Command::Serve { bind }) => *bind,
            _ => None,
        };

        let catalog_path = args
            .catalog
            .clone()
            .or(file_catalog)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG));

        let http_bind_address = cli_http_bind.or(file_http_bind).unwrap_or_else(|| {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_HTTP_PORT))
        });

        let millis = |cli: Option<u64>, file: Option<u64>, default: u64| {
            Duration::from_millis(cli.or(file).unwrap_or(default))
        };

        let config = Self {
            catalog_path,
            http_bind_address,
            request_timeout: millis(
                args.request_timeout_ms,
                file_request_timeout_ms,
                DEFAULT_REQUEST_TIMEOUT_MS,
            ),
            connect_timeout: millis(
                args.connect_timeout_ms,
                file_connect_timeout_ms,
                DEFAULT_CONNECT_TIMEOUT_MS,
            ),
            acquire_timeout: millis(
                args.acquire_timeout_ms,
                file_acquire_timeout_ms,
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            ),
            max_concurrent_queries: args
                .max_concurrent_queries
                .or(file_max_concurrent_queries)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_QUERIES),
            batch_size: args
                .batch_size
                .or(file_batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            slow_query_threshold_ms: args
                .slow_query_ms
                .or(file_slow_query_ms)
                .unwrap_or(DEFAULT_SLOW_QUERY_MS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.catalog_path.exists(),
            "catalog file {:?} does not exist",
            self.catalog_path
        );
        anyhow::ensure!(
            self.catalog_path.is_file(),
            "catalog {:?} is not a file",
            self.catalog_path
        );
        anyhow::ensure!(
            self.max_concurrent_queries > 0,
            "max concurrent queries must be at least 1"
        );
        anyhow::ensure!(self.batch_size > 0, "cursor batch size must be at least 1");
        anyhow::ensure!(
            !self.request_timeout.is_zero(),
            "request timeout must be greater than zero"
        );
        anyhow::ensure!(
            !self.connect_timeout.is_zero(),
            "connect timeout must be greater than zero"
        );
        anyhow::ensure!(
            !self.acquire_timeout.is_zero(),
            "acquire timeout must be greater than zero"
        );
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            request_timeout: self.request_timeout,
            acquire_timeout: self.acquire_timeout,
            max_concurrent_queries: self.max_concurrent_queries,
            slow_query_threshold_ms: self.slow_query_threshold_ms,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: self.connect_timeout,
            batch_size: self.batch_size,
            pool_max_idle_per_host: self.max_concurrent_queries,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "adb-query-runner",
    about = "Run catalog AQL queries against ArangoDB",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_CATALOG",
        value_name = "FILE",
        help = "Query catalog (endpoint, credentials and queries)",
        global = true
    )]
    pub catalog: Option<PathBuf>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_REQUEST_TIMEOUT_MS",
        value_name = "MS",
        help = "Upper bound for one database call",
        global = true
    )]
    pub request_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_CONNECT_TIMEOUT_MS",
        value_name = "MS",
        help = "TCP connect timeout for the database",
        global = true
    )]
    pub connect_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_ACQUIRE_TIMEOUT_MS",
        value_name = "MS",
        help = "How long a request waits for a free execution slot",
        global = true
    )]
    pub acquire_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_MAX_CONCURRENT_QUERIES",
        value_name = "N",
        help = "Maximum number of queries running against the database at once",
        global = true
    )]
    pub max_concurrent_queries: Option<usize>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_BATCH_SIZE",
        value_name = "ROWS",
        help = "Rows fetched per cursor batch",
        global = true
    )]
    pub batch_size: Option<u32>,

    #[arg(
        long,
        env = "ADB_QUERY_RUNNER_SLOW_QUERY_MS",
        value_name = "MS",
        help = "Executions slower than this are logged as warnings",
        global = true
    )]
    pub slow_query_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve {
        #[arg(
            long,
            env = "ADB_QUERY_RUNNER_HTTP_BIND",
            value_name = "ADDR",
            help = "HTTP bind address"
        )]
        bind: Option<SocketAddr>,
    },
    /// List catalog queries
    List {
        #[arg(long, help = "Print summaries as JSON")]
        json: bool,
    },
    /// Execute one query and print its rows as JSON
    Run {
        /// Catalog query name
        name: String,

        #[arg(
            long = "arg",
            value_name = "KEY=VALUE",
            value_parser = parse_key_value,
            help = "Text argument, converted to the declared parameter type"
        )]
        args: Vec<(String, String)>,

        #[arg(
            long,
            value_name = "OBJECT",
            conflicts_with = "args",
            help = "Arguments as a JSON object, validated strictly"
        )]
        json: Option<String>,

        #[arg(long, help = "Print the bound query instead of executing it")]
        dry_run: bool,

        #[arg(long, help = "Print graph results as Cytoscape.js JSON")]
        cytoscape: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    catalog: Option<PathBuf>,
    http_bind: Option<SocketAddr>,
    request_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    max_concurrent_queries: Option<usize>,
    batch_size: Option<u32>,
    slow_query_ms: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
