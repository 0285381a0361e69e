//! Binding an aggregator and its dispatcher to a unit of work.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tidings_db::UnitOfWork;
use tidings_types::Timestamp;

use crate::aggregator::EventAggregator;
use crate::context::RequestInfo;
use crate::dispatch::Dispatcher;
use crate::error::{EventError, Veto};
use crate::event::{Notification, ResourceEvent};
use crate::sink::NotificationSink;

/// A unit of work whose before-commit hooks may veto with a [`Veto`].
pub type EventUnit<'conn> = UnitOfWork<'conn, Veto>;

/// Where a unit of work's events are in their lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Still collecting; nothing has been delivered.
    #[default]
    Pending,
    /// The unit committed and its events went to the sink.
    Delivered,
    /// The unit rolled back and its events were discarded.
    Suppressed,
}

#[derive(Debug, Default)]
struct UnitState {
    aggregator: Option<EventAggregator>,
    state: DispatchState,
    hooked: bool,
}

/// The events of one top-level unit of work.
///
/// Cloning shares the same underlying aggregator, which is how nested units
/// (batch subrequests) contribute to their parent. A unit of work lives on a
/// single thread, so this is deliberately `!Send`.
#[derive(Debug, Clone, Default)]
pub struct UnitEvents {
    inner: Rc<RefCell<UnitState>>,
}

impl UnitEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports an event, creating the aggregator on first use.
    ///
    /// # Errors
    ///
    /// `EventError::UnitClosed` once the unit has been dispatched or
    /// suppressed; otherwise whatever the aggregator rejects.
    pub fn record_event(
        &self,
        ctx: &RequestInfo,
        timestamp: Timestamp,
        notification: Notification,
    ) -> Result<(), EventError> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != DispatchState::Pending {
            return Err(EventError::UnitClosed(inner.state));
        }
        inner
            .aggregator
            .get_or_insert_with(EventAggregator::new)
            .record(ctx, timestamp, notification)
    }

    /// Snapshot of the events recorded so far, in dispatch order.
    pub fn get_events(&self) -> Vec<ResourceEvent> {
        self.inner
            .borrow()
            .aggregator
            .as_ref()
            .map(|agg| agg.events().cloned().collect())
            .unwrap_or_default()
    }

    pub fn state(&self) -> DispatchState {
        self.inner.borrow().state
    }

    /// Whether a dispatcher hook has been registered for these events.
    pub fn is_hooked(&self) -> bool {
        self.inner.borrow().hooked
    }

    fn mark_hooked(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        !std::mem::replace(&mut inner.hooked, true)
    }

    /// Moves `Pending` to `Delivered` and hands out the events. Any later call
    /// gets `None`.
    pub(crate) fn take_for_delivery(&self) -> Option<Vec<ResourceEvent>> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != DispatchState::Pending {
            return None;
        }
        inner.state = DispatchState::Delivered;
        Some(
            inner
                .aggregator
                .take()
                .map(EventAggregator::into_events)
                .unwrap_or_default(),
        )
    }

    /// Moves `Pending` to `Suppressed`, discarding the events.
    fn suppress(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == DispatchState::Pending {
            let discarded = inner.aggregator.take().map_or(0, |agg| agg.len());
            inner.state = DispatchState::Suppressed;
            tracing::debug!(discarded, "unit of work rolled back, events suppressed");
        }
    }
}

/// Owned by the commit hook. Dropping the hook un-run means rollback.
struct SuppressOnDrop(UnitEvents);

impl SuppressOnDrop {
    fn events(&self) -> &UnitEvents {
        &self.0
    }
}

impl Drop for SuppressOnDrop {
    fn drop(&mut self) {
        self.0.suppress();
    }
}

/// Hooks the dispatcher into every top-level unit of work.
#[derive(Clone)]
pub struct EventBinder {
    sink: Arc<dyn NotificationSink>,
}

impl EventBinder {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Called when a unit of work begins.
    ///
    /// For a top-level context this registers a before-commit hook on `uow`
    /// that delivers `events` to the sink, and returns `true`. Nested
    /// contexts share their parent's `events` and its hook, so nothing is
    /// registered for them; neither is a second hook for the same `events`.
    pub fn begin<'conn>(
        &self,
        uow: &mut EventUnit<'conn>,
        ctx: &RequestInfo,
        events: &UnitEvents,
    ) -> bool {
        if ctx.is_nested() {
            tracing::trace!(
                resource = ctx.resource_name(),
                "nested unit of work, dispatch left to parent"
            );
            return false;
        }
        if !events.mark_hooked() {
            return false;
        }

        let dispatcher = Dispatcher::new(Arc::clone(&self.sink));
        let guard = SuppressOnDrop(events.clone());
        uow.add_before_commit_hook(move |doom| {
            dispatcher.dispatch(guard.events(), doom).map(|_| ())
        });
        true
    }
}
