//! `POST /batch`: several record operations as one unit of work.
//!
//! Subrequests run as nested contexts of the batch, so their events merge
//! into one aggregator and are dispatched once, when the whole batch
//! commits. The first failing subrequest rolls the batch back.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    http::Method,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidings_events::RequestInfo;

use crate::api::{run_unit_blocking, ApiError};
use crate::api_records::{execute, Target};
use crate::middleware::Actor;
use crate::AppState;

/// Maximum number of subrequests in one batch.
pub const MAX_BATCH_REQUESTS: usize = 25;

/// Request body for `POST /batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<Subrequest>,
}

/// One operation of a batch.
#[derive(Debug, Deserialize)]
pub struct Subrequest {
    /// HTTP method; defaults to `GET`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Record path, e.g. `/widgets/records/1`.
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response body for `POST /batch`, one entry per subrequest in order.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<SubResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubResponse {
    pub status: u16,
    pub path: String,
    pub body: Value,
}

struct Prepared {
    method: Method,
    target: Target,
    path: String,
    body: Option<Value>,
}

fn prepare(requests: Vec<Subrequest>) -> Result<Vec<Prepared>, ApiError> {
    if requests.is_empty() {
        return Err(ApiError::BadRequest("batch has no requests".to_string()));
    }
    if requests.len() > MAX_BATCH_REQUESTS {
        return Err(ApiError::BadRequest(format!(
            "batch has {} requests, the limit is {}",
            requests.len(),
            MAX_BATCH_REQUESTS
        )));
    }

    requests
        .into_iter()
        .enumerate()
        .map(|(index, sub)| {
            let prefix = format!("requests[{index}]");
            let method = Method::from_bytes(sub.method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ApiError::BadRequest(format!("{prefix}: invalid method")))?;
            let target = Target::parse(&sub.path).map_err(|e| e.context(&prefix))?;
            Ok(Prepared {
                method,
                target,
                path: sub.path,
                body: sub.body,
            })
        })
        .collect()
}

/// Handler for `POST /batch`.
pub async fn batch_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let prepared = prepare(payload.requests)?;
    let ctx = RequestInfo::new("batch", "/batch").with_actor(actor.0.clone());

    let responses = run_unit_blocking(state, ctx, move |conn, events, _batch| {
        let mut responses = Vec::with_capacity(prepared.len());
        for (index, sub) in prepared.into_iter().enumerate() {
            let ctx = sub.target.request_info(&sub.path, &actor).nested();
            let outcome = execute(conn, events, &ctx, &sub.method, &sub.target, sub.body)
                .map_err(|e| {
                    tracing::warn!(index, path = %sub.path, error = %e, "batch subrequest failed, rolling back");
                    e.context(&format!("requests[{index}]"))
                })?;
            responses.push(SubResponse {
                status: outcome.status.as_u16(),
                path: sub.path,
                body: outcome.body,
            });
        }
        Ok(responses)
    })
    .await?;

    Ok(Json(BatchResponse { responses }))
}
