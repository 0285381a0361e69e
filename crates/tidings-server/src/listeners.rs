//! Built-in listeners and the registry built from `[listeners]`.

use std::sync::Arc;

use indexmap::IndexMap;
use tidings_events::{Listener, ListenerError, ListenerFilter, ListenerRegistry, ResourceEvent};
use tokio::sync::broadcast;

use crate::config::{ListenerConfig, ListenerKind};

/// Writes one structured log line per event.
pub struct LogListener {
    name: String,
}

impl LogListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Listener for LogListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError> {
        tracing::info!(
            listener = %self.name,
            action = %event.action(),
            resource = event.resource_name(),
            uri = %event.subject().uri,
            user_id = event.user_id().unwrap_or("anonymous"),
            records = event.payload().len(),
            timestamp = event.timestamp(),
            "resource event"
        );
        Ok(())
    }
}

/// Publishes events on a broadcast channel, which feeds `GET /events`.
///
/// Publishing happens as soon as this listener is notified, so when a later
/// listener vetoes the unit, subscribers have already seen its events.
pub struct BroadcastListener {
    name: String,
    tx: broadcast::Sender<ResourceEvent>,
}

impl BroadcastListener {
    pub fn new(name: impl Into<String>, tx: broadcast::Sender<ResourceEvent>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }
}

impl Listener for BroadcastListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, event: &ResourceEvent) -> Result<(), ListenerError> {
        // No subscribers is the normal idle state, not a failure.
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(listener = %self.name, "no event stream subscribers");
        }
        Ok(())
    }
}

/// Builds the listener registry described by the configuration.
///
/// Every `broadcast` listener publishes on `events_tx`.
pub fn build_registry(
    listeners: &IndexMap<String, ListenerConfig>,
    events_tx: &broadcast::Sender<ResourceEvent>,
) -> ListenerRegistry {
    let mut registry = ListenerRegistry::new();
    for (name, config) in listeners {
        let listener: Arc<dyn Listener> = match config.kind {
            ListenerKind::Log => Arc::new(LogListener::new(name.as_str())),
            ListenerKind::Broadcast => {
                Arc::new(BroadcastListener::new(name.as_str(), events_tx.clone()))
            }
        };
        registry.register(
            listener,
            ListenerFilter {
                actions: config.actions.clone(),
                resources: config.resources.clone(),
            },
        );
    }
    registry
}
