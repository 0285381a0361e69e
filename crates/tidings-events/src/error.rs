//! Error types for resource events and their listeners.

use thiserror::Error;
use tidings_types::Action;

use crate::binder::DispatchState;

/// Errors raised while recording events.
///
/// All of these are caller defects rather than runtime conditions; they are
/// returned so the caller fails fast at the point of misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// An update was reported without the record's previous state.
    #[error("update notifications require the previous record state")]
    MissingPrevious,

    /// A payload of the wrong shape was appended to an event.
    #[error("cannot append {attempted} payload to a {action} event")]
    PayloadMismatch {
        /// Action of the event being appended to.
        action: Action,
        /// Payload shape that was offered (`observed` or `changes`).
        attempted: &'static str,
    },

    /// A path parameter would be serialized over one of the event's own
    /// fields (e.g. `id` of a resource named `user` becomes `user_id`).
    #[error("path parameter {0:?} clashes with an event field")]
    ReservedParam(String),

    /// The unit of work already dispatched or discarded its events.
    #[error("unit of work is {0:?}; no more events can be recorded")]
    UnitClosed(DispatchState),
}

/// A listener's refusal of the operation that produced an event.
///
/// Carries the client-facing status the whole unit of work should fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("vetoed ({status}): {message}")]
pub struct Veto {
    /// HTTP-style status code reported to the client.
    pub status: u16,
    /// Human-readable reason.
    pub message: String,
}

impl Veto {
    /// Creates a veto with the given status and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Errors a listener can return from `notify`.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener wants the unit of work to fail.
    #[error(transparent)]
    Veto(#[from] Veto),

    /// The listener itself broke. Logged, never fatal to the unit of work.
    #[error("listener failed: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    /// Wraps any error as an internal listener failure.
    pub fn internal(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Internal(err.into())
    }
}
