//! Error mapping and the unit-of-work runner shared by all handlers.

use crate::AppState;
use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use thiserror::Error;
use tidings_db::{CommitError, StoreError};
use tidings_events::{EventError, EventUnit, RequestInfo, UnitEvents, Veto};

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// A listener refused the unit of work.
    #[error("vetoed ({status}): {message}")]
    Vetoed { status: u16, message: String },
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Vetoed { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::FORBIDDEN),
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Prefixes the message, keeping the variant and status.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            ApiError::BadRequest(msg) => ApiError::BadRequest(format!("{prefix}: {msg}")),
            ApiError::NotFound(msg) => ApiError::NotFound(format!("{prefix}: {msg}")),
            ApiError::Conflict(msg) => ApiError::Conflict(format!("{prefix}: {msg}")),
            ApiError::Vetoed { status, message } => ApiError::Vetoed {
                status,
                message: format!("{prefix}: {message}"),
            },
            ApiError::InternalServerError(msg) => {
                ApiError::InternalServerError(format!("{prefix}: {msg}"))
            }
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg) => msg,
            ApiError::Vetoed { message, .. } => message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.message()
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            StoreError::InvalidData => ApiError::BadRequest(e.to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<Veto> for ApiError {
    fn from(veto: Veto) -> Self {
        ApiError::Vetoed {
            status: veto.status,
            message: veto.message,
        }
    }
}

impl From<CommitError<Veto>> for ApiError {
    fn from(e: CommitError<Veto>) -> Self {
        match e {
            CommitError::Hook(veto) => veto.into(),
            CommitError::Doomed => {
                ApiError::InternalServerError("unit of work was aborted".to_string())
            }
            CommitError::Database(e) => ApiError::InternalServerError(format!("commit failed: {e}")),
        }
    }
}

impl From<EventError> for ApiError {
    fn from(e: EventError) -> Self {
        ApiError::InternalServerError(format!("event recording failed: {e}"))
    }
}

/// Runs `work` as one unit of work on a pooled connection.
///
/// The dispatcher is bound to the unit before `work` starts. If `work`
/// fails the unit is dropped, which rolls it back and discards its events;
/// otherwise it is committed, which delivers them. Blocking: call from
/// `spawn_blocking`.
pub(crate) fn run_unit<T>(
    state: &AppState,
    ctx: &RequestInfo,
    work: impl FnOnce(&Connection, &UnitEvents) -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let mut conn = state
        .pool
        .get()
        .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;

    let mut uow = EventUnit::begin(&mut conn)
        .map_err(|e| ApiError::InternalServerError(format!("begin failed: {}", e)))?;
    let events = UnitEvents::new();
    state.binder.begin(&mut uow, ctx, &events);

    let output = work(&*uow, &events)?;
    uow.commit()?;
    Ok(output)
}

/// Runs [`run_unit`] on the blocking pool.
pub(crate) async fn run_unit_blocking<T, F>(
    state: std::sync::Arc<AppState>,
    ctx: RequestInfo,
    work: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection, &UnitEvents, &RequestInfo) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || run_unit(&state, &ctx, |conn, events| work(conn, events, &ctx)))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}
