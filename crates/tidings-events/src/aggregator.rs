//! Per-unit-of-work event accumulation.

use indexmap::map::Entry;
use indexmap::IndexMap;
use tidings_types::{Action, Timestamp};

use crate::context::RequestInfo;
use crate::error::EventError;
use crate::event::{Notification, ResourceEvent};

/// Events are merged when both resource and action match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub resource_name: String,
    pub action: Action,
}

impl std::fmt::Display for MergeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_name, self.action)
    }
}

/// Ordered collection of the events raised by one unit of work.
///
/// A key keeps the position of its first report; later reports for the same
/// key only grow that event's payload.
#[derive(Debug, Clone, Default)]
pub struct EventAggregator {
    events: IndexMap<MergeKey, ResourceEvent>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a report into the event for `(ctx.resource_name, action)`,
    /// creating that event at the end of the sequence if it is new.
    ///
    /// The new event's timestamp, subject and actor come from this first
    /// report.
    ///
    /// # Errors
    ///
    /// Propagates `EventError` from event construction; with well-formed
    /// notifications this cannot happen.
    pub fn record(
        &mut self,
        ctx: &RequestInfo,
        timestamp: Timestamp,
        notification: Notification,
    ) -> Result<(), EventError> {
        let action = notification.action();
        let key = MergeKey {
            resource_name: ctx.resource_name().to_string(),
            action,
        };
        let payload = notification.into_payload();

        match self.events.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(payload),
            Entry::Vacant(entry) => {
                tracing::trace!(key = %entry.key(), "new resource event");
                entry.insert(ResourceEvent::new(action, timestamp, ctx, payload)?);
                Ok(())
            }
        }
    }

    /// Events in dispatch order, without consuming them.
    pub fn events(&self) -> impl Iterator<Item = &ResourceEvent> + '_ {
        self.events.values()
    }

    /// The event for one merge key, if any was recorded.
    pub fn get(&self, resource_name: &str, action: Action) -> Option<&ResourceEvent> {
        self.events.get(&MergeKey {
            resource_name: resource_name.to_string(),
            action,
        })
    }

    /// Consumes the aggregator, yielding events in dispatch order.
    pub fn into_events(self) -> Vec<ResourceEvent> {
        self.events.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
