#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adb_query_runner::aql::binder::BoundExecution;
use adb_query_runner::{
    Catalog, DatabaseClient, EngineConfig, QueryEngine, QueryRegistry, RegistryHandle,
    RemoteError,
};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{post, put},
};
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpListener;

/// `Authorization` header for `root:openSesame`
pub const FIXTURE_AUTH: &str = "Basic cm9vdDpvcGVuU2VzYW1l";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

pub fn fixture_catalog() -> Catalog {
    Catalog::from_path(&fixture_path("catalog.json")).expect("fixture catalog")
}

pub fn fixture_registry() -> QueryRegistry {
    QueryRegistry::load(&fixture_catalog()).expect("fixture registry")
}

pub fn object(value: JsonValue) -> serde_json::Map<String, JsonValue> {
    value.as_object().cloned().expect("json object")
}

pub fn engine_with(client: Arc<MockDatabase>, config: EngineConfig) -> QueryEngine {
    QueryEngine::new(RegistryHandle::new(fixture_registry()), client, config)
}

pub fn fixture_engine(client: Arc<MockDatabase>) -> QueryEngine {
    engine_with(client, EngineConfig::default())
}

// =============================================================================
// In-process database double
// =============================================================================

pub enum Reply {
    Rows(Vec<JsonValue>),
    Fail(RemoteError),
}

/// Records every bound execution and answers with a canned reply
pub struct MockDatabase {
    reply: Mutex<Reply>,
    delay: Option<Duration>,
    calls: Mutex<Vec<BoundExecution>>,
    in_flight: AtomicUsize,
}

impl MockDatabase {
    pub fn returning(rows: Vec<JsonValue>) -> Self {
        Self {
            reply: Mutex::new(Reply::Rows(rows)),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: RemoteError) -> Self {
        Self {
            reply: Mutex::new(Reply::Fail(err)),
            ..Self::returning(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<BoundExecution> {
        self.calls.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseClient for MockDatabase {
    async fn run(&self, execution: &BoundExecution) -> Result<Vec<JsonValue>, RemoteError> {
        self.calls.lock().push(execution.clone());
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &*self.reply.lock() {
            Reply::Rows(rows) => Ok(rows.clone()),
            Reply::Fail(err) => Err(err.clone()),
        }
    }

    fn endpoint(&self) -> &str {
        "mock://database"
    }
}

// =============================================================================
// HTTP double of the ArangoDB cursor API
// =============================================================================

const CURSOR_ID: &str = "4711";

#[derive(Default)]
pub struct ArangoState {
    expected_auth: String,
    batches: Vec<Vec<JsonValue>>,
    failure: Option<(StatusCode, JsonValue)>,
    put_delay: Option<Duration>,
    next_batch: AtomicUsize,
    requests: Mutex<Vec<JsonValue>>,
    deleted: Mutex<Vec<String>>,
}

pub struct MockArango {
    pub url: String,
    pub state: Arc<ArangoState>,
}

impl MockArango {
    /// Serve `batches` one per cursor round trip
    pub async fn start(batches: Vec<Vec<JsonValue>>) -> Self {
        Self::spawn(ArangoState {
            expected_auth: FIXTURE_AUTH.to_string(),
            batches,
            ..ArangoState::default()
        })
        .await
    }

    /// Like [`MockArango::start`], but every follow-up batch takes `delay`
    pub async fn start_slow(batches: Vec<Vec<JsonValue>>, delay: Duration) -> Self {
        Self::spawn(ArangoState {
            expected_auth: FIXTURE_AUTH.to_string(),
            batches,
            put_delay: Some(delay),
            ..ArangoState::default()
        })
        .await
    }

    /// Answer every cursor creation with `status` and `body`
    pub async fn failing(status: StatusCode, body: JsonValue) -> Self {
        Self::spawn(ArangoState {
            expected_auth: FIXTURE_AUTH.to_string(),
            failure: Some((status, body)),
            ..ArangoState::default()
        })
        .await
    }

    async fn spawn(state: ArangoState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/_api/cursor", post(create_cursor))
            .route("/_api/cursor/{id}", put(next_batch).delete(delete_cursor))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<JsonValue> {
        self.state.requests.lock().clone()
    }

    pub fn batches_served(&self) -> usize {
        self.state.next_batch.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().clone()
    }
}

fn authorized(state: &ArangoState, headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.expected_auth)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": true, "code": 401, "errorNum": 11, "errorMessage": "not authorized to execute this request"})),
    )
        .into_response()
}

fn batch_response(state: &ArangoState) -> Response {
    let index = state.next_batch.fetch_add(1, Ordering::SeqCst);
    let result = state.batches.get(index).cloned().unwrap_or_default();
    let has_more = index + 1 < state.batches.len();
    let mut body = json!({
        "error": false,
        "code": 201,
        "result": result,
        "hasMore": has_more,
    });
    if has_more {
        body["id"] = json!(CURSOR_ID);
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn create_cursor(
    State(state): State<Arc<ArangoState>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    state.requests.lock().push(body);
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if let Some((status, body)) = &state.failure {
        return (*status, Json(body.clone())).into_response();
    }
    batch_response(&state)
}

async fn next_batch(
    State(state): State<Arc<ArangoState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if id != CURSOR_ID {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": true, "code": 404, "errorNum": 1600, "errorMessage": "cursor not found"})),
        )
            .into_response();
    }
    if let Some(delay) = state.put_delay {
        tokio::time::sleep(delay).await;
    }
    batch_response(&state)
}

async fn delete_cursor(
    State(state): State<Arc<ArangoState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.deleted.lock().push(id);
    StatusCode::ACCEPTED
}
