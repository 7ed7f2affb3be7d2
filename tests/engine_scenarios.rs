mod support;

use std::collections::HashMap;
use std::time::Duration;

use adb_query_runner::aql::ValidationError;
use adb_query_runner::error::ExecutionStage;
use adb_query_runner::metrics::{METRICS, UNKNOWN_QUERY_LABEL};
use adb_query_runner::{
    EngineConfig, ErrorKind, ExecutionError, RemoteError, RowKind, ERROR_METRICS,
};
use assert_matches::assert_matches;
use serde_json::json;
use support::{MockDatabase, engine_with, fixture_engine, object};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn get_users_binds_min_age() {
    let db = MockDatabase::returning(vec![
        json!({"_id": "users/1", "_key": "1", "name": "Ann", "age": 34}),
        json!({"_id": "users/4", "_key": "4", "name": "Dee", "age": 21}),
    ])
    .shared();
    let engine = fixture_engine(db.clone());

    let rows = engine
        .execute("Get Users", &object(json!({"minAge": 21})))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.kind == RowKind::Document));
    assert!(
        rows.iter()
            .all(|r| r.get("age").and_then(|v| v.as_f64()).unwrap() >= 21.0)
    );

    let calls = db.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].query,
        "FOR u IN users FILTER u.age >= @minAge RETURN u"
    );
    assert_eq!(calls[0].bind_vars, object(json!({"minAge": 21})));
}

#[tokio::test]
async fn get_users_rejects_numeric_text() {
    let db = MockDatabase::returning(vec![]).shared();
    let engine = fixture_engine(db.clone());

    let err = engine
        .execute("Get Users", &object(json!({"minAge": "21"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_matches!(
        err,
        ExecutionError::Validation(ValidationError::TypeMismatch { ref name, ref actual, .. })
            if name == "minAge" && actual == "string"
    );
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn search_products_missing_price_never_reaches_database() {
    let db = MockDatabase::returning(vec![]).shared();
    let engine = fixture_engine(db.clone());

    let err = engine
        .execute("Search Products", &object(json!({"category": "books"})))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExecutionError::Validation(ValidationError::MissingParameter {
            name: "minPrice".into()
        })
    );
    assert_eq!(err.stage(), ExecutionStage::Validate);
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn user_graph_rows_are_tagged() {
    let db = MockDatabase::returning(vec![
        json!({"_id": "users/1", "_key": "1", "name": "Ann"}),
        json!({"_id": "users/2", "_key": "2", "name": "Bob"}),
        json!({"_id": "follows/7", "_key": "7", "_from": "users/1", "_to": "users/2", "since": 2019}),
    ])
    .shared();
    let engine = fixture_engine(db.clone());

    let rows = engine
        .execute("Get user graph", &object(json!({})))
        .await
        .unwrap();

    let kinds: Vec<RowKind> = rows.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RowKind::Vertex, RowKind::Vertex, RowKind::Edge]);
    assert!(db.calls()[0].bind_vars.is_empty());
}

#[tokio::test]
async fn unknown_argument_is_rejected() {
    let db = MockDatabase::returning(vec![]).shared();
    let engine = fixture_engine(db.clone());

    let err = engine
        .execute("Get user graph", &object(json!({"limit": 10})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownParameter);
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn unknown_query_is_not_found() {
    let db = MockDatabase::returning(vec![]).shared();
    let engine = fixture_engine(db.clone());

    let err = engine
        .execute("Drop Everything", &object(json!({})))
        .await
        .unwrap_err();

    assert_eq!(err, ExecutionError::NotFound("Drop Everything".into()));
    assert_eq!(ERROR_METRICS.get_query_error_count("Drop Everything"), 0);
    assert!(ERROR_METRICS.get_query_error_count(UNKNOWN_QUERY_LABEL) >= 1);
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn unknown_names_share_one_metric_label() {
    let db = MockDatabase::returning(vec![]).shared();
    let engine = fixture_engine(db.clone());
    let mut text = HashMap::new();
    text.insert("minAge".to_string(), "21".to_string());

    for i in 0..50 {
        let name = format!("bogus-{i}");
        let err = engine.execute(&name, &object(json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine
            .execute_text(&name, &text, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    engine
        .execute("Get Users", &object(json!({"minAge": 21})))
        .await
        .unwrap();

    let exposition = METRICS.encode().unwrap();
    assert!(!exposition.contains("bogus-"));
    assert!(exposition.contains(UNKNOWN_QUERY_LABEL));
    assert!(exposition.contains("Get Users"));
    for i in 0..50 {
        assert_eq!(ERROR_METRICS.get_query_error_count(&format!("bogus-{i}")), 0);
    }
}

#[tokio::test]
async fn remote_failure_is_not_retried() {
    let db = MockDatabase::failing(RemoteError::Authentication { status: 401 }).shared();
    let engine = fixture_engine(db.clone());

    let err = engine
        .execute("Get Users", &object(json!({"minAge": 30})))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ExecutionError::Remote(RemoteError::Authentication { status: 401 })
    );
    assert_eq!(err.stage(), ExecutionStage::Dispatch);
    assert_eq!(db.call_count(), 1);
}

#[tokio::test]
async fn scalar_in_graph_stream_fails_normalization() {
    let db = MockDatabase::returning(vec![
        json!({"_id": "follows/1", "_from": "users/1", "_to": "users/2"}),
        json!(42),
    ])
    .shared();
    let engine = fixture_engine(db);

    let err = engine
        .execute("Get user graph", &object(json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NormalizeError);
    assert_eq!(err.stage(), ExecutionStage::Normalize);
}

#[tokio::test]
async fn cancellation_during_dispatch_aborts_call() {
    let db = MockDatabase::returning(vec![json!({"_id": "users/1"})])
        .with_delay(Duration::from_secs(10))
        .shared();
    let engine = fixture_engine(db.clone());
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = engine
        .execute_with_cancel("Get Users", &object(json!({"minAge": 1})), &token)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExecutionError::Cancelled {
            stage: ExecutionStage::Dispatch
        }
    );
    assert_eq!(db.call_count(), 1);
    // The dropped call never finished
    assert_eq!(db.in_flight(), 1);
}

#[tokio::test]
async fn slow_database_hits_request_timeout() {
    let db = MockDatabase::returning(vec![])
        .with_delay(Duration::from_secs(5))
        .shared();
    let engine = engine_with(
        db,
        EngineConfig {
            request_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    );

    let err = engine
        .execute("Get Users", &object(json!({"minAge": 1})))
        .await
        .unwrap_err();

    assert_matches!(err, ExecutionError::Remote(RemoteError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::RemoteError);
}

#[tokio::test]
async fn saturated_limiter_times_out_acquisition() {
    let db = MockDatabase::returning(vec![])
        .with_delay(Duration::from_millis(500))
        .shared();
    let engine = engine_with(
        db.clone(),
        EngineConfig {
            max_concurrent_queries: 1,
            acquire_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    );

    let busy = engine.clone();
    let first = tokio::spawn(async move {
        busy.execute("Get Users", &object(json!({"minAge": 1})))
            .await
    });

    while db.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(engine.available_slots(), 0);

    let err = engine
        .execute("Get Users", &object(json!({"minAge": 2})))
        .await
        .unwrap_err();
    assert_matches!(err, ExecutionError::Remote(RemoteError::PoolTimeout(_)));

    assert!(first.await.unwrap().is_ok());
    assert_eq!(engine.available_slots(), 1);
}

#[tokio::test]
async fn text_arguments_follow_declared_types() {
    let db = MockDatabase::returning(vec![json!("beta-search")]).shared();
    let engine = fixture_engine(db.clone());
    let text = [("enabled".to_string(), "true".to_string())]
        .into_iter()
        .collect();

    let rows = engine
        .execute_text("Active Flags", &text, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rows[0].get("value"), Some(&json!("beta-search")));
    assert_eq!(db.calls()[0].bind_vars, object(json!({"enabled": true})));

    let bad = [("enabled".to_string(), "yes".to_string())]
        .into_iter()
        .collect();
    let err = engine
        .execute_text("Active Flags", &bad, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(db.call_count(), 1);
}

#[tokio::test]
async fn concurrent_executions_are_independent() {
    let db = MockDatabase::returning(vec![json!({"_id": "users/1", "age": 40})])
        .with_delay(Duration::from_millis(20))
        .shared();
    let engine = fixture_engine(db.clone());

    let handles: Vec<_> = (0..8)
        .map(|age| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute("Get Users", &object(json!({"minAge": age})))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(db.call_count(), 8);
}
