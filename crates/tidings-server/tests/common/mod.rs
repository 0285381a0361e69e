#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tidings_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use tidings_events::{
    Listener, ListenerError, ListenerFilter, ListenerRegistry, ResourceEvent, Veto,
};
use tidings_server::{app, middleware::USER_HEADER, AppState};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// Remembers every event it is notified of.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<ResourceEvent>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<ResourceEvent> {
        self.seen.lock().unwrap().clone()
    }
}

impl Listener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Refuses every event it sees.
pub struct Vetoing(pub u16);

impl Listener for Vetoing {
    fn name(&self) -> &str {
        "vetoing"
    }

    fn notify(&self, _event: &ResourceEvent) -> Result<(), ListenerError> {
        Err(Veto::new(self.0, "frozen resource").into())
    }
}

/// Fails on every event without vetoing.
pub struct Broken;

impl Listener for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn notify(&self, _event: &ResourceEvent) -> Result<(), ListenerError> {
        Err(ListenerError::internal("listener backend unavailable"))
    }
}

pub struct Harness {
    pub app: Router,
    pub pool: DbPool,
    pub state: AppState,
    pub recorder: Arc<Recorder>,
    _dir: TempDir,
}

/// A file-backed app whose only listener is a [`Recorder`].
pub fn harness() -> Harness {
    harness_with(|_registry| {}, |registry, recorder| {
        registry.register(recorder, ListenerFilter::all());
    })
}

/// A file-backed app. `before` registers listeners ahead of the recorder,
/// `recorder_at` registers the recorder itself.
pub fn harness_with(
    before: impl FnOnce(&mut ListenerRegistry),
    recorder_at: impl FnOnce(&mut ListenerRegistry, Arc<Recorder>),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tidings.db");
    let pool = create_pool(db_path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let recorder = Arc::new(Recorder::default());
    let mut registry = ListenerRegistry::new();
    before(&mut registry);
    recorder_at(&mut registry, recorder.clone());

    let (events_tx, _) = broadcast::channel(64);
    let state = AppState::new(pool.clone(), registry, events_tx);

    Harness {
        app: app(state.clone()),
        pool,
        state,
        recorder,
        _dir: dir,
    }
}

/// Sends one request and returns status and JSON body (`Null` if empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    user: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub fn stored_count(pool: &DbPool, resource: &str) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM records WHERE resource_name = ?1",
        [resource],
        |row| row.get(0),
    )
    .unwrap()
}
