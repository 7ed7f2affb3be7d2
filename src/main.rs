use adb_query_runner::aql::coercion::coerce_text_arguments;
use adb_query_runner::aql::graph::GraphView;
use adb_query_runner::model::ExecutionResponse;
use adb_query_runner::{
    ArgumentSet, Catalog, CliArgs, Command, ErrorResponse, LoggingConfig, QueryEngine,
    QueryRegistry, ServerConfig, build_engine, init_logging, run_server, shutdown_telemetry,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(&cli)?;

    let result = match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { .. } => run_server(config).await,
        Command::List { json } => list_queries(&config, json),
        Command::Run {
            name,
            args,
            json,
            dry_run,
            cytoscape,
        } => run_query(&config, &name, args, json, dry_run, cytoscape).await,
    };

    // Ensure traces are flushed before exit
    shutdown_telemetry();

    result
}

fn list_queries(config: &ServerConfig, json: bool) -> Result<()> {
    let catalog = Catalog::from_path(&config.catalog_path)?;
    let registry = QueryRegistry::load(&catalog)
        .with_context(|| format!("invalid catalog {:?}", config.catalog_path))?;
    let summaries = registry.list_queries();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for summary in summaries {
        let params = summary
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.parameter_type))
            .collect::<Vec<_>>()
            .join(", ");
        println!("{} ({})", summary.name, params);
        if !summary.description.is_empty() {
            println!("    {}", summary.description);
        }
    }
    Ok(())
}

async fn run_query(
    config: &ServerConfig,
    name: &str,
    text_args: Vec<(String, String)>,
    json_args: Option<String>,
    dry_run: bool,
    cytoscape: bool,
) -> Result<()> {
    let engine = build_engine(config)?;
    let args = resolve_arguments(&engine, name, text_args, json_args)?;

    if dry_run {
        let bound = engine.prepare(name, &args).map_err(report)?;
        println!("{}", serde_json::to_string_pretty(&bound)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let rows = engine
        .execute_with_cancel(name, &args, &cancel)
        .await
        .map_err(report)?;

    if cytoscape {
        let view = GraphView::from_rows(&rows);
        println!("{}", serde_json::to_string_pretty(&view.to_cytoscape(name))?);
    } else {
        let response = ExecutionResponse {
            query: name.to_string(),
            row_count: rows.len(),
            rows,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}

fn resolve_arguments(
    engine: &QueryEngine,
    name: &str,
    text_args: Vec<(String, String)>,
    json_args: Option<String>,
) -> Result<ArgumentSet> {
    if let Some(raw) = json_args {
        return match serde_json::from_str(&raw).context("--json is not valid JSON")? {
            serde_json::Value::Object(args) => Ok(args),
            _ => bail!("--json must be a JSON object"),
        };
    }

    let definition = engine
        .registry()
        .snapshot()
        .lookup(name)
        .map_err(report)?;
    let text: HashMap<String, String> = text_args.into_iter().collect();
    coerce_text_arguments(&definition, &text).map_err(|e| report(e.into()))
}

/// Print the structured error to stderr and hand it back for the exit status
fn report(err: adb_query_runner::ExecutionError) -> anyhow::Error {
    if let Ok(body) = serde_json::to_string_pretty(&ErrorResponse::from(&err)) {
        eprintln!("{}", body);
    }
    err.into()
}
