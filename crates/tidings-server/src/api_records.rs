//! Record endpoints. Every request is one unit of work, and every store
//! operation reports its resource event into that unit.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::{Method, StatusCode, Uri},
};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tidings_db::records::{self, ID_FIELD};
use tidings_events::{Notification, RequestInfo, UnitEvents, RESERVED_FIELDS};

use crate::api::{run_unit_blocking, ApiError};
use crate::middleware::Actor;
use crate::AppState;

/// What a record path points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `/{resource}/records`
    Collection { resource: String },
    /// `/{resource}/records/{id}`
    Record { resource: String, id: String },
}

impl Target {
    /// Parses a record path.
    ///
    /// # Errors
    ///
    /// `ApiError::NotFound` for paths outside the record routes,
    /// `ApiError::BadRequest` for malformed resource names.
    pub fn parse(path: &str) -> Result<Self, ApiError> {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let target = match segments.as_slice() {
            [resource, "records"] => Target::Collection {
                resource: resource.to_string(),
            },
            [resource, "records", id] if !id.is_empty() => Target::Record {
                resource: resource.to_string(),
                id: id.to_string(),
            },
            _ => return Err(ApiError::NotFound(format!("no record route for {path}"))),
        };
        validate_resource(target.resource())?;
        Ok(target)
    }

    pub fn resource(&self) -> &str {
        match self {
            Target::Collection { resource } | Target::Record { resource, .. } => resource,
        }
    }

    /// Request context for an operation on this target. Any query string is
    /// left out of the event uri.
    pub fn request_info(&self, path: &str, actor: &Actor) -> RequestInfo {
        let path = path.split('?').next().unwrap_or_default();
        let ctx = RequestInfo::new(self.resource(), path).with_actor(actor.0.clone());
        match self {
            Target::Collection { .. } => ctx,
            Target::Record { id, .. } => ctx.with_param("id", id.as_str()),
        }
    }
}

fn validate_resource(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ApiError::BadRequest(format!("invalid resource name: {name:?}")));
    }
    // The record id travels as `<resource>_id` in events.
    let id_key = format!("{name}_id");
    if RESERVED_FIELDS.contains(&id_key.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "resource name {name:?} is reserved"
        )));
    }
    Ok(())
}

/// Result of one record operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: Value,
}

impl Outcome {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn created(body: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }
}

/// Runs one record operation inside an open unit of work.
///
/// Shared by the record handlers and by batch subrequests.
///
/// # Errors
///
/// `ApiError::BadRequest` for an unsupported method or a missing body, and
/// whatever the store reports.
pub fn execute(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    method: &Method,
    target: &Target,
    body: Option<Value>,
) -> Result<Outcome, ApiError> {
    match (method.as_str(), target) {
        ("GET", Target::Collection { resource }) => list(conn, events, ctx, resource),
        ("POST", Target::Collection { resource }) => {
            create(conn, events, ctx, resource, &require_body(body)?)
        }
        ("DELETE", Target::Collection { resource }) => delete_all(conn, events, ctx, resource),
        ("GET", Target::Record { resource, id }) => get(conn, events, ctx, resource, id),
        ("PUT", Target::Record { resource, id }) => {
            put(conn, events, ctx, resource, id, require_body(body)?)
        }
        ("PATCH", Target::Record { resource, id }) => {
            patch(conn, events, ctx, resource, id, &require_body(body)?)
        }
        ("DELETE", Target::Record { resource, id }) => delete(conn, events, ctx, resource, id),
        (method, _) => Err(ApiError::BadRequest(format!(
            "method {method} not allowed on {}",
            ctx.path()
        ))),
    }
}

fn require_body(body: Option<Value>) -> Result<Value, ApiError> {
    body.ok_or_else(|| ApiError::BadRequest("request body is required".to_string()))
}

fn list(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
) -> Result<Outcome, ApiError> {
    let found = records::list_records(conn, resource)?;
    let timestamp = records::collection_timestamp(conn, resource)?;
    events.record_event(ctx, timestamp, Notification::Read(found.clone()))?;
    Ok(Outcome::ok(json!({ "data": found })))
}

fn create(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    data: &Value,
) -> Result<Outcome, ApiError> {
    let record = records::create_record(conn, resource, data)?;
    events.record_event(
        ctx,
        records::record_timestamp(&record),
        Notification::Create(record.clone()),
    )?;
    Ok(Outcome::created(record))
}

fn delete_all(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
) -> Result<Outcome, ApiError> {
    let deletion = records::delete_records(conn, resource)?;
    if !deletion.records.is_empty() {
        events.record_event(
            ctx,
            deletion.timestamp,
            Notification::Delete(deletion.records.clone()),
        )?;
    }
    Ok(Outcome::ok(json!({ "data": deletion.records })))
}

fn get(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    id: &str,
) -> Result<Outcome, ApiError> {
    let record = records::get_record(conn, resource, id)?;
    events.record_event(
        ctx,
        records::record_timestamp(&record),
        Notification::Read(vec![record.clone()]),
    )?;
    Ok(Outcome::ok(record))
}

/// Replaces a record, creating it if it does not exist yet.
fn put(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    id: &str,
    data: Value,
) -> Result<Outcome, ApiError> {
    let mut fields = into_object(data)?;
    match fields.get(ID_FIELD) {
        Some(Value::String(body_id)) if body_id != id => {
            return Err(ApiError::BadRequest(format!(
                "record id {body_id:?} does not match path id {id:?}"
            )));
        }
        _ => {}
    }
    fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    let data = Value::Object(fields);

    match records::get_record(conn, resource, id) {
        Ok(_) => replace(conn, events, ctx, resource, id, &data),
        Err(tidings_db::StoreError::NotFound { .. }) => create(conn, events, ctx, resource, &data),
        Err(e) => Err(e.into()),
    }
}

/// Shallow-merges the body into the stored record.
fn patch(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    id: &str,
    changes: &Value,
) -> Result<Outcome, ApiError> {
    let Value::Object(changes) = changes else {
        return Err(ApiError::BadRequest(
            "patch body must be a JSON object".to_string(),
        ));
    };
    let current = records::get_record(conn, resource, id)?;
    let mut merged = into_object(current)?;
    for (key, value) in changes {
        if key != ID_FIELD {
            merged.insert(key.clone(), value.clone());
        }
    }
    replace(conn, events, ctx, resource, id, &Value::Object(merged))
}

fn replace(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    id: &str,
    data: &Value,
) -> Result<Outcome, ApiError> {
    let replacement = records::update_record(conn, resource, id, data)?;
    events.record_event(
        ctx,
        records::record_timestamp(&replacement.new),
        Notification::Update {
            new: replacement.new.clone(),
            old: replacement.old,
        },
    )?;
    Ok(Outcome::ok(replacement.new))
}

fn delete(
    conn: &Connection,
    events: &UnitEvents,
    ctx: &RequestInfo,
    resource: &str,
    id: &str,
) -> Result<Outcome, ApiError> {
    let deletion = records::delete_record(conn, resource, id)?;
    let body = deletion.records.first().cloned().unwrap_or(Value::Null);
    events.record_event(ctx, deletion.timestamp, Notification::Delete(deletion.records))?;
    Ok(Outcome::ok(body))
}

fn into_object(value: Value) -> Result<Map<String, Value>, ApiError> {
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(ApiError::BadRequest(
            "record data must be a JSON object".to_string(),
        )),
    }
}

async fn respond(
    state: Arc<AppState>,
    actor: Actor,
    method: Method,
    uri: Uri,
    target: Target,
    body: Option<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_resource(target.resource())?;
    let ctx = target.request_info(uri.path(), &actor);

    let outcome = run_unit_blocking(state, ctx, move |conn, events, ctx| {
        execute(conn, events, ctx, &method, &target, body)
    })
    .await?;

    Ok((outcome.status, Json(outcome.body)))
}

/// Handler for `GET /{resource}/records`.
pub async fn list_records_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(resource): Path<String>,
    uri: Uri,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Collection { resource };
    respond(state, actor, Method::GET, uri, target, None).await
}

/// Handler for `POST /{resource}/records`.
pub async fn create_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(resource): Path<String>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Collection { resource };
    respond(state, actor, Method::POST, uri, target, Some(body)).await
}

/// Handler for `DELETE /{resource}/records`.
pub async fn delete_records_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(resource): Path<String>,
    uri: Uri,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Collection { resource };
    respond(state, actor, Method::DELETE, uri, target, None).await
}

/// Handler for `GET /{resource}/records/{id}`.
pub async fn get_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((resource, id)): Path<(String, String)>,
    uri: Uri,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Record { resource, id };
    respond(state, actor, Method::GET, uri, target, None).await
}

/// Handler for `PUT /{resource}/records/{id}`.
pub async fn put_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((resource, id)): Path<(String, String)>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Record { resource, id };
    respond(state, actor, Method::PUT, uri, target, Some(body)).await
}

/// Handler for `PATCH /{resource}/records/{id}`.
pub async fn patch_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((resource, id)): Path<(String, String)>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Record { resource, id };
    respond(state, actor, Method::PATCH, uri, target, Some(body)).await
}

/// Handler for `DELETE /{resource}/records/{id}`.
pub async fn delete_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((resource, id)): Path<(String, String)>,
    uri: Uri,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let target = Target::Record { resource, id };
    respond(state, actor, Method::DELETE, uri, target, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_paths() {
        assert_eq!(
            Target::parse("/widgets/records").unwrap(),
            Target::Collection {
                resource: "widgets".into()
            }
        );
        assert_eq!(
            Target::parse("/widgets/records/42?x=1").unwrap(),
            Target::Record {
                resource: "widgets".into(),
                id: "42".into()
            }
        );
    }

    #[test]
    fn rejects_other_paths() {
        assert!(matches!(
            Target::parse("/batch"),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            Target::parse("/wid gets/records"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_resources_whose_id_shadows_the_actor() {
        assert!(matches!(
            Target::parse("/user/records/1"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(Target::parse("/users/records/1").is_ok());
    }

    #[test]
    fn context_uri_drops_the_query() {
        let target = Target::parse("/widgets/records/7?fields=id").unwrap();
        let ctx = target.request_info("/widgets/records/7?fields=id", &Actor(None));
        assert_eq!(ctx.path(), "/widgets/records/7");
    }

    #[test]
    fn record_context_carries_id_and_actor() {
        let target = Target::parse("/widgets/records/7").unwrap();
        let ctx = target.request_info("/widgets/records/7", &Actor(Some("alice".into())));
        assert_eq!(ctx.resource_name(), "widgets");
        assert_eq!(ctx.params().get("id").map(String::as_str), Some("7"));
        assert_eq!(ctx.actor(), Some("alice"));
        assert!(!ctx.is_nested());
    }
}
