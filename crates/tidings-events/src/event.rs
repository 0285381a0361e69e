//! The resource event record and the reports that feed it.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tidings_types::{Action, Record, Timestamp};

use crate::context::RequestInfo;
use crate::error::EventError;

/// Top-level keys of a serialized event. Subject parameters are flattened
/// next to them and must not reuse any of these names.
pub const RESERVED_FIELDS: &[&str] = &[
    "action",
    "timestamp",
    "resource_name",
    "uri",
    "user_id",
    "observed",
    "changes",
];

/// Identity of the resource an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    /// Resource (collection) name, e.g. `widgets`.
    pub resource_name: String,
    /// Path of the request that produced the event.
    pub uri: String,
    /// Path parameters, with `id` renamed to `<resource>_id`.
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

/// One affected record of a create, update or delete.
///
/// Creates carry only `new`, deletes only `old`, updates both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Record>,
}

impl Change {
    pub fn created(new: Record) -> Self {
        Self {
            old: None,
            new: Some(new),
        }
    }

    pub fn updated(new: Record, old: Record) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn deleted(old: Record) -> Self {
        Self {
            old: Some(old),
            new: None,
        }
    }
}

/// Action-specific part of an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Records that were read.
    Read { observed: Vec<Record> },
    /// Records that were created, updated or deleted.
    Changed { changes: Vec<Change> },
}

impl EventPayload {
    /// Number of records this payload covers.
    pub fn len(&self) -> usize {
        match self {
            Self::Read { observed } => observed.len(),
            Self::Changed { changes } => changes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Read { .. } => "observed",
            Self::Changed { .. } => "changes",
        }
    }

    fn fits(&self, action: Action) -> bool {
        matches!(self, Self::Read { .. }) != action.is_change()
    }
}

/// A single report handed to the aggregator.
///
/// The variants make the per-action input rules explicit: reads and deletes
/// cover any number of records, a create covers exactly one, and an update
/// always knows the previous state.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Read(Vec<Record>),
    Create(Record),
    Update { new: Record, old: Record },
    Delete(Vec<Record>),
}

impl Notification {
    /// Builds a notification from the loose `(action, data, previous)` form.
    ///
    /// Reads and deletes accept a single record or a JSON array of records.
    /// Creates and updates treat `data` as one record, even if it is an
    /// array. `previous` is only consulted for updates.
    ///
    /// # Errors
    ///
    /// `EventError::MissingPrevious` for an update without `previous`.
    pub fn from_parts(
        action: Action,
        data: Record,
        previous: Option<Record>,
    ) -> Result<Self, EventError> {
        Ok(match action {
            Action::Read => Self::Read(into_records(data)),
            Action::Create => Self::Create(data),
            Action::Update => Self::Update {
                new: data,
                old: previous.ok_or(EventError::MissingPrevious)?,
            },
            Action::Delete => Self::Delete(into_records(data)),
        })
    }

    pub fn action(&self) -> Action {
        match self {
            Self::Read(_) => Action::Read,
            Self::Create(_) => Action::Create,
            Self::Update { .. } => Action::Update,
            Self::Delete(_) => Action::Delete,
        }
    }

    pub(crate) fn into_payload(self) -> EventPayload {
        match self {
            Self::Read(observed) => EventPayload::Read { observed },
            Self::Create(new) => EventPayload::Changed {
                changes: vec![Change::created(new)],
            },
            Self::Update { new, old } => EventPayload::Changed {
                changes: vec![Change::updated(new, old)],
            },
            Self::Delete(old) => EventPayload::Changed {
                changes: old.into_iter().map(Change::deleted).collect(),
            },
        }
    }
}

fn into_records(data: Record) -> Vec<Record> {
    match data {
        Value::Array(records) => records,
        single => vec![single],
    }
}

/// One notification about a resource, as delivered to listeners.
///
/// Action, timestamp, subject and actor are fixed at construction; the only
/// mutation is appending more records to the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEvent {
    action: Action,
    timestamp: Timestamp,
    #[serde(flatten)]
    subject: Subject,
    user_id: Option<String>,
    #[serde(flatten)]
    payload: EventPayload,
}

impl ResourceEvent {
    /// Creates an event, capturing subject and actor from `ctx`.
    ///
    /// # Errors
    ///
    /// `EventError::PayloadMismatch` if the payload shape does not fit the
    /// action (`observed` is for reads, `changes` for everything else).
    /// `EventError::ReservedParam` if a subject parameter would collide with
    /// one of [`RESERVED_FIELDS`].
    pub fn new(
        action: Action,
        timestamp: Timestamp,
        ctx: &RequestInfo,
        payload: EventPayload,
    ) -> Result<Self, EventError> {
        if !payload.fits(action) {
            return Err(EventError::PayloadMismatch {
                action,
                attempted: payload.shape(),
            });
        }
        let subject = ctx.subject();
        if let Some(key) = subject
            .params
            .keys()
            .find(|key| RESERVED_FIELDS.contains(&key.as_str()))
        {
            return Err(EventError::ReservedParam(key.clone()));
        }
        Ok(Self {
            action,
            timestamp,
            subject,
            user_id: ctx.actor().map(str::to_string),
            payload,
        })
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn resource_name(&self) -> &str {
        &self.subject.resource_name
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Records read, for read events.
    pub fn observed(&self) -> Option<&[Record]> {
        match &self.payload {
            EventPayload::Read { observed } => Some(observed),
            EventPayload::Changed { .. } => None,
        }
    }

    /// Affected records, for create, update and delete events.
    pub fn changes(&self) -> Option<&[Change]> {
        match &self.payload {
            EventPayload::Changed { changes } => Some(changes),
            EventPayload::Read { .. } => None,
        }
    }

    /// Appends records to a read event.
    ///
    /// # Errors
    ///
    /// `EventError::PayloadMismatch` if this is not a read event.
    pub fn append_observed(
        &mut self,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<(), EventError> {
        match &mut self.payload {
            EventPayload::Read { observed } => {
                observed.extend(records);
                Ok(())
            }
            EventPayload::Changed { .. } => Err(EventError::PayloadMismatch {
                action: self.action,
                attempted: "observed",
            }),
        }
    }

    /// Appends affected records to a create, update or delete event.
    ///
    /// # Errors
    ///
    /// `EventError::PayloadMismatch` if this is a read event.
    pub fn append_changes(
        &mut self,
        changes: impl IntoIterator<Item = Change>,
    ) -> Result<(), EventError> {
        match &mut self.payload {
            EventPayload::Changed { changes: existing } => {
                existing.extend(changes);
                Ok(())
            }
            EventPayload::Read { .. } => Err(EventError::PayloadMismatch {
                action: self.action,
                attempted: "changes",
            }),
        }
    }

    pub(crate) fn merge(&mut self, payload: EventPayload) -> Result<(), EventError> {
        match payload {
            EventPayload::Read { observed } => self.append_observed(observed),
            EventPayload::Changed { changes } => self.append_changes(changes),
        }
    }
}
