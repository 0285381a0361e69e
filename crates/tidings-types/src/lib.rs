//! Shared types and constants for the Tidings workspace.
//!
//! This crate holds the small vocabulary every other crate agrees on: the
//! resource [`Action`] an event describes, the [`Timestamp`] representation,
//! and the JSON [`Record`] shape stored and notified about.
//!
//! No crate in the workspace depends on anything *except* `tidings-types` for
//! cross-cutting type definitions, which keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milliseconds since the Unix epoch.
///
/// Record stores hand out strictly increasing values per resource, so a
/// timestamp doubles as a cheap ordering key within one resource.
pub type Timestamp = i64;

/// A stored resource record. Records are schemaless JSON objects that carry
/// at least an `id` field once persisted.
pub type Record = serde_json::Value;

/// The action a resource event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// One record was created.
    Create,
    /// One or more records were read.
    Read,
    /// One record was replaced or patched.
    Update,
    /// One or more records were deleted.
    Delete,
}

impl Action {
    /// All actions, in declaration order.
    pub const ALL: [Action; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Returns the canonical lowercase label for this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether events of this action carry `changes` (as opposed to `observed`).
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown action string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown action: {0}")]
pub struct ParseActionError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels_parse_back() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
        }
    }

    #[test]
    fn action_rejects_unknown_label() {
        let err = "CREATE".parse::<Action>().unwrap_err();
        assert_eq!(err, ParseActionError("CREATE".to_string()));
        assert_eq!(err.to_string(), "unknown action: CREATE");
    }

    #[test]
    fn action_serializes_lowercase() {
        let json = serde_json::to_string(&Action::Update).unwrap();
        assert_eq!(json, "\"update\"");
        let parsed: Action = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(parsed, Action::Delete);
    }

    #[test]
    fn only_read_is_not_a_change() {
        assert!(!Action::Read.is_change());
        assert!(Action::Create.is_change());
        assert!(Action::Update.is_change());
        assert!(Action::Delete.is_change());
    }
}
