//! Tidings server library logic.

pub mod api;
pub mod api_batch;
pub mod api_records;
pub mod api_sse;
pub mod config;
pub mod listeners;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tidings_db::DbPool;
use tidings_events::{EventBinder, ListenerRegistry, ResourceEvent};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Binds the listener registry to every top-level unit of work.
    pub binder: EventBinder,
    /// Feeds `GET /events`; `broadcast` listeners publish here.
    pub events_tx: broadcast::Sender<ResourceEvent>,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        registry: ListenerRegistry,
        events_tx: broadcast::Sender<ResourceEvent>,
    ) -> Self {
        Self {
            pool,
            binder: EventBinder::new(Arc::new(registry)),
            events_tx,
        }
    }
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(api_sse::get_event_stream_handler))
        .route("/batch", post(api_batch::batch_handler))
        .route(
            "/{resource}/records",
            get(api_records::list_records_handler)
                .post(api_records::create_record_handler)
                .delete(api_records::delete_records_handler),
        )
        .route(
            "/{resource}/records/{id}",
            get(api_records::get_record_handler)
                .put(api_records::put_record_handler)
                .patch(api_records::patch_record_handler)
                .delete(api_records::delete_record_handler),
        )
        .layer(axum::middleware::from_fn(middleware::actor_middleware))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
