//! Schemaless record storage.
//!
//! Records are JSON objects grouped by resource name. Every write stamps the
//! record with `id` and `last_modified`; `last_modified` is strictly
//! increasing within a resource, so it doubles as the event timestamp of the
//! write that produced it.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use thiserror::Error;
use tidings_types::{Record, Timestamp};

/// Field holding a record's identifier.
pub const ID_FIELD: &str = "id";
/// Field holding a record's modification timestamp.
pub const MODIFIED_FIELD: &str = "last_modified";

/// Errors returned by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id exists in the resource.
    #[error("record not found: {resource}/{id}")]
    NotFound {
        /// Resource name.
        resource: String,
        /// Record id.
        id: String,
    },

    /// A record with this id already exists in the resource.
    #[error("record already exists: {resource}/{id}")]
    Conflict {
        /// Resource name.
        resource: String,
        /// Record id.
        id: String,
    },

    /// The supplied data is not a JSON object.
    #[error("record data must be a JSON object")]
    InvalidData,

    /// A database operation failed.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record could not be (de)serialised.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Records removed by a delete, with the timestamp of the deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    /// The records as they were before deletion.
    pub records: Vec<Record>,
    /// Timestamp assigned to the deletion.
    pub timestamp: Timestamp,
}

/// The two states of a replaced record.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// The record as stored now.
    pub new: Record,
    /// The record as it was before.
    pub old: Record,
}

/// Reads the `last_modified` stamp of a stored record, or 0 if absent.
pub fn record_timestamp(record: &Record) -> Timestamp {
    record
        .get(MODIFIED_FIELD)
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

/// Returns the latest write timestamp of a resource, deletions included, or
/// the current time if the resource was never written.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn collection_timestamp(conn: &Connection, resource: &str) -> Result<Timestamp, StoreError> {
    Ok(high_water_mark(conn, resource)?.unwrap_or_else(now_millis))
}

/// Inserts a new record.
///
/// The id is taken from `data.id` when present, otherwise a UUID is
/// generated. Returns the stored record, stamped with `id` and
/// `last_modified`.
///
/// # Errors
///
/// `StoreError::Conflict` if the id is taken, `StoreError::InvalidData` if
/// `data` is not an object.
pub fn create_record(conn: &Connection, resource: &str, data: &Value) -> Result<Record, StoreError> {
    let mut fields = as_object(data)?;
    let id = match fields.get(ID_FIELD).and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };

    if find(conn, resource, &id)?.is_some() {
        return Err(StoreError::Conflict {
            resource: resource.to_string(),
            id,
        });
    }

    let timestamp = next_timestamp(conn, resource)?;
    stamp(&mut fields, &id, timestamp);
    let record = Value::Object(fields);

    conn.execute(
        "INSERT INTO records (resource_name, id, data_json, last_modified)
         VALUES (?1, ?2, ?3, ?4)",
        params![resource, id, serde_json::to_string(&record)?, timestamp],
    )?;

    Ok(record)
}

/// Fetches one record.
///
/// # Errors
///
/// `StoreError::NotFound` if the record does not exist.
pub fn get_record(conn: &Connection, resource: &str, id: &str) -> Result<Record, StoreError> {
    find(conn, resource, id)?.ok_or_else(|| not_found(resource, id))
}

/// Lists every record of a resource, oldest modification first.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn list_records(conn: &Connection, resource: &str) -> Result<Vec<Record>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT data_json FROM records
         WHERE resource_name = ?1
         ORDER BY last_modified ASC",
    )?;
    let rows = stmt.query_map(params![resource], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for row in rows {
        records.push(serde_json::from_str(&row?)?);
    }
    Ok(records)
}

/// Replaces the data of an existing record, keeping its id.
///
/// # Errors
///
/// `StoreError::NotFound` if the record does not exist,
/// `StoreError::InvalidData` if `data` is not an object.
pub fn update_record(
    conn: &Connection,
    resource: &str,
    id: &str,
    data: &Value,
) -> Result<Replacement, StoreError> {
    let mut fields = as_object(data)?;
    let old = get_record(conn, resource, id)?;

    let timestamp = next_timestamp(conn, resource)?;
    stamp(&mut fields, id, timestamp);
    let new = Value::Object(fields);

    conn.execute(
        "UPDATE records SET data_json = ?3, last_modified = ?4
         WHERE resource_name = ?1 AND id = ?2",
        params![resource, id, serde_json::to_string(&new)?, timestamp],
    )?;

    Ok(Replacement { new, old })
}

/// Deletes one record and returns it.
///
/// # Errors
///
/// `StoreError::NotFound` if the record does not exist.
pub fn delete_record(conn: &Connection, resource: &str, id: &str) -> Result<Deletion, StoreError> {
    let old = get_record(conn, resource, id)?;
    let timestamp = next_timestamp(conn, resource)?;
    conn.execute(
        "DELETE FROM records WHERE resource_name = ?1 AND id = ?2",
        params![resource, id],
    )?;
    Ok(Deletion {
        records: vec![old],
        timestamp,
    })
}

/// Deletes every record of a resource and returns them.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn delete_records(conn: &Connection, resource: &str) -> Result<Deletion, StoreError> {
    let records = list_records(conn, resource)?;
    let timestamp = next_timestamp(conn, resource)?;
    conn.execute(
        "DELETE FROM records WHERE resource_name = ?1",
        params![resource],
    )?;
    Ok(Deletion { records, timestamp })
}

fn find(conn: &Connection, resource: &str, id: &str) -> Result<Option<Record>, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT data_json FROM records WHERE resource_name = ?1 AND id = ?2",
            params![resource, id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
}

/// Newest stamp handed out for a resource, by a write or a deletion.
fn high_water_mark(conn: &Connection, resource: &str) -> Result<Option<Timestamp>, StoreError> {
    Ok(conn.query_row(
        "SELECT MAX(ts) FROM (
             SELECT MAX(last_modified) AS ts FROM records WHERE resource_name = ?1
             UNION ALL
             SELECT last_modified FROM resource_timestamps WHERE resource_name = ?1
         )",
        params![resource],
        |row| row.get(0),
    )?)
}

/// Current time, bumped past the resource's high-water mark, which then
/// moves to the returned stamp.
fn next_timestamp(conn: &Connection, resource: &str) -> Result<Timestamp, StoreError> {
    let now = now_millis();
    let next = match high_water_mark(conn, resource)? {
        Some(latest) if latest >= now => latest + 1,
        _ => now,
    };
    conn.execute(
        "INSERT INTO resource_timestamps (resource_name, last_modified) VALUES (?1, ?2)
         ON CONFLICT (resource_name) DO UPDATE SET last_modified = excluded.last_modified",
        params![resource, next],
    )?;
    Ok(next)
}

fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

fn as_object(data: &Value) -> Result<Map<String, Value>, StoreError> {
    data.as_object().cloned().ok_or(StoreError::InvalidData)
}

fn stamp(fields: &mut Map<String, Value>, id: &str, timestamp: Timestamp) {
    fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    fields.insert(MODIFIED_FIELD.to_string(), Value::from(timestamp));
}

fn not_found(resource: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        resource: resource.to_string(),
        id: id.to_string(),
    }
}
