//! Commit-gated delivery of aggregated events.

use std::sync::Arc;

use tidings_db::DoomFlag;

use crate::binder::UnitEvents;
use crate::error::{ListenerError, Veto};
use crate::event::ResourceEvent;
use crate::sink::NotificationSink;

/// Pushes a unit's events to a sink, in order, from inside its commit hook.
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Delivers the events of a still-pending unit and marks it delivered.
    ///
    /// A unit that was already delivered or suppressed is left alone and
    /// `Ok(0)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the [`Veto`] of the first listener that refused an event,
    /// after dooming the unit of work.
    pub fn dispatch(&self, events: &UnitEvents, doom: &DoomFlag) -> Result<usize, Veto> {
        match events.take_for_delivery() {
            Some(events) => self.deliver(&events, doom),
            None => {
                tracing::debug!(state = ?events.state(), "events already dispatched, skipping");
                Ok(0)
            }
        }
    }

    /// Sends every event to the sink and returns how many were accepted.
    ///
    /// Listener faults are logged and delivery moves on to the next event.
    /// A veto stops delivery: the unit of work is doomed and the veto
    /// returned. Events before the vetoed one have already been delivered.
    ///
    /// # Errors
    ///
    /// Returns the [`Veto`] raised by the sink.
    pub fn deliver(&self, events: &[ResourceEvent], doom: &DoomFlag) -> Result<usize, Veto> {
        let mut delivered = 0;

        for event in events {
            match self.sink.notify(event) {
                Ok(()) => delivered += 1,
                Err(ListenerError::Veto(veto)) => {
                    doom.doom();
                    tracing::warn!(
                        resource = event.resource_name(),
                        action = %event.action(),
                        status = veto.status,
                        "listener vetoed a unit of work that is already committing"
                    );
                    return Err(veto);
                }
                Err(ListenerError::Internal(e)) => {
                    tracing::error!(
                        resource = event.resource_name(),
                        action = %event.action(),
                        error = %e,
                        "unable to notify"
                    );
                }
            }
        }

        tracing::debug!(delivered, total = events.len(), "resource events dispatched");
        Ok(delivered)
    }
}
