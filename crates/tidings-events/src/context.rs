//! What an event needs to know about the request that produced it.

use std::collections::BTreeMap;

use crate::event::Subject;

/// Path parameter renamed to `<resource>_id` in event subjects.
const ID_PARAM: &str = "id";

/// Request-scoped context passed alongside every event report.
///
/// Subrequests of a batch are marked [`nested`](Self::nested): they share the
/// enclosing unit of work and never hook its commit themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    resource_name: String,
    path: String,
    params: BTreeMap<String, String>,
    actor: Option<String>,
    nested: bool,
}

impl RequestInfo {
    /// Context for an operation on `resource_name` reached through `path`.
    pub fn new(resource_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a path parameter (e.g. `id`).
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the acting principal; `None` means anonymous.
    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    /// Marks this context as a child of another unit of work.
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Builds the event subject for this request.
    ///
    /// The generic `id` parameter becomes `<resource>_id` so that subjects of
    /// different resources stay unambiguous once merged.
    pub fn subject(&self) -> Subject {
        let mut params = self.params.clone();
        if let Some(id) = params.remove(ID_PARAM) {
            params.insert(format!("{}_id", self.resource_name), id);
        }
        Subject {
            resource_name: self.resource_name.clone(),
            uri: self.path.clone(),
            params,
        }
    }
}
