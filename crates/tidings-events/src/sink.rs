//! Notification sinks and the listener registry.

use std::sync::Arc;

use tidings_types::Action;

use crate::error::ListenerError;
use crate::event::ResourceEvent;

/// Receives dispatched events.
pub trait NotificationSink: Send + Sync {
    /// Handles one event.
    ///
    /// Return [`ListenerError::Veto`] to fail the unit of work that produced
    /// the event; any other error is logged and delivery continues.
    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError>;
}

/// A named subscriber to resource events.
pub trait Listener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one event. Same error contract as [`NotificationSink::notify`].
    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError>;
}

/// Which events a listener wants. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    pub actions: Vec<Action>,
    pub resources: Vec<String>,
}

impl ListenerFilter {
    /// A filter that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, event: &ResourceEvent) -> bool {
        let action_ok = self.actions.is_empty() || self.actions.contains(&event.action());
        let resource_ok = self.resources.is_empty()
            || self.resources.iter().any(|r| r == event.resource_name());
        action_ok && resource_ok
    }
}

struct Registration {
    listener: Arc<dyn Listener>,
    filter: ListenerFilter,
}

/// Ordered set of listeners, each behind a filter.
///
/// Listeners are called in registration order. A failing listener is logged
/// and skipped so the ones after it still hear about the event; a vetoing
/// listener stops the event's delivery and the veto is returned.
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: Vec<Registration>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn Listener>, filter: ListenerFilter) -> &mut Self {
        tracing::debug!(
            listener = listener.name(),
            actions = ?filter.actions,
            resources = ?filter.resources,
            "registered event listener"
        );
        self.registrations.push(Registration { listener, filter });
        self
    }

    /// Names of the registered listeners, in call order.
    pub fn names(&self) -> Vec<&str> {
        self.registrations
            .iter()
            .map(|r| r.listener.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl NotificationSink for ListenerRegistry {
    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError> {
        for registration in &self.registrations {
            if !registration.filter.matches(event) {
                continue;
            }
            match registration.listener.notify(event) {
                Ok(()) => {}
                Err(ListenerError::Veto(veto)) => return Err(ListenerError::Veto(veto)),
                Err(ListenerError::Internal(e)) => {
                    tracing::error!(
                        listener = registration.listener.name(),
                        resource = event.resource_name(),
                        action = %event.action(),
                        error = %e,
                        "listener failed, continuing with the next one"
                    );
                }
            }
        }
        Ok(())
    }
}
