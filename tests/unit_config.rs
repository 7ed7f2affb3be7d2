mod support;

use std::net::SocketAddr;
use std::time::Duration;

use adb_query_runner::{CliArgs, Command, ServerConfig};
use clap::Parser;
use tempfile::TempDir;

fn catalog_arg() -> String {
    support::fixture_path("catalog.json").display().to_string()
}

fn parse(args: &[&str]) -> CliArgs {
    let mut argv = vec!["adb-query-runner"];
    argv.extend_from_slice(args);
    CliArgs::try_parse_from(argv).unwrap()
}

#[test]
fn defaults_apply_without_config_file() {
    let catalog = catalog_arg();
    let config = ServerConfig::from_args(&parse(&["--catalog", &catalog])).unwrap();

    assert_eq!(config.http_bind_address, "127.0.0.1:3030".parse::<SocketAddr>().unwrap());
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.max_concurrent_queries, 16);
    assert_eq!(config.batch_size, 1000);
    assert_eq!(config.engine_config().acquire_timeout, Duration::from_secs(5));
    assert_eq!(config.client_config().connect_timeout, Duration::from_secs(5));
}

#[test]
fn yaml_file_fills_unset_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runner.yaml");
    std::fs::write(
        &path,
        format!(
            "catalog: {}\nhttp_bind: \"0.0.0.0:9000\"\nrequest_timeout_ms: 2500\nmax_concurrent_queries: 4\n",
            catalog_arg()
        ),
    )
    .unwrap();

    let config = ServerConfig::from_args(&parse(&["--config", path.to_str().unwrap()])).unwrap();

    assert_eq!(config.catalog_path, support::fixture_path("catalog.json"));
    assert_eq!(config.http_bind_address, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.request_timeout, Duration::from_millis(2500));
    assert_eq!(config.max_concurrent_queries, 4);
}

#[test]
fn command_line_overrides_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runner.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "catalog": "/does/not/exist.json",
            "http_bind": "0.0.0.0:9000",
            "batch_size": 50
        })
        .to_string(),
    )
    .unwrap();

    let catalog = catalog_arg();
    let cli = parse(&[
        "--config",
        path.to_str().unwrap(),
        "--catalog",
        &catalog,
        "--batch-size",
        "200",
        "serve",
        "--bind",
        "127.0.0.1:4000",
    ]);
    assert_eq!(
        cli.command,
        Some(Command::Serve {
            bind: Some("127.0.0.1:4000".parse().unwrap())
        })
    );

    let config = ServerConfig::from_args(&cli).unwrap();
    assert_eq!(config.http_bind_address, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.batch_size, 200);
    assert_eq!(config.client_config().batch_size, 200);
}

#[test]
fn missing_catalog_fails_fast() {
    let err = ServerConfig::from_args(&parse(&["--catalog", "/does/not/exist.json"])).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn zero_limits_are_rejected() {
    let catalog = catalog_arg();
    let err = ServerConfig::from_args(&parse(&[
        "--catalog",
        &catalog,
        "--max-concurrent-queries",
        "0",
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("max concurrent queries"));
}

#[test]
fn unsupported_config_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runner.toml");
    std::fs::write(&path, "catalog = \"x\"").unwrap();

    let err = ServerConfig::from_args(&parse(&["--config", path.to_str().unwrap()])).unwrap_err();
    assert!(err.to_string().contains("unsupported config extension"));
}

#[test]
fn build_engine_from_fixture_catalog() {
    let catalog = catalog_arg();
    let config = ServerConfig::from_args(&parse(&["--catalog", &catalog])).unwrap();
    let engine = adb_query_runner::build_engine(&config).unwrap();

    assert_eq!(engine.endpoint(), "http://localhost:8529");
    assert_eq!(engine.list_queries().len(), 4);
    assert_eq!(engine.available_slots(), 16);
}
