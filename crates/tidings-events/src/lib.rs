//! Commit-gated resource events.
//!
//! Producers report what a unit of work did to resources ("two widgets were
//! created, one gadget was read"). Reports are merged per
//! (resource, action) while the unit runs and handed to the registered
//! listeners only once the unit of work commits. A unit that rolls back
//! notifies nobody.
//!
//! # Pieces
//!
//! | Type | Role |
//! |------|------|
//! | [`ResourceEvent`] | One notification: action, timestamp, subject, actor, payload. |
//! | [`EventAggregator`] | Ordered per-unit map merging reports by [`MergeKey`]. |
//! | [`UnitEvents`] / [`EventBinder`] | Attach one aggregator to a top-level unit of work and hook its commit. |
//! | [`Dispatcher`] | Delivers the aggregated events to a [`NotificationSink`] before commit. |
//! | [`ListenerRegistry`] | The usual sink: filtered, ordered [`Listener`]s. |
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidings_events::{EventBinder, Notification, RequestInfo, UnitEvents};
//!
//! let mut uow = UnitOfWork::begin(&mut conn)?;
//! let events = UnitEvents::new();
//! let ctx = RequestInfo::new("widgets", "/widgets/records").with_actor(actor);
//! binder.begin(&mut uow, &ctx, &events);
//!
//! let record = create_record(&uow, "widgets", &body)?;
//! events.record_event(&ctx, record_timestamp(&record), Notification::Create(record))?;
//!
//! uow.commit()?; // listeners run here, or never
//! ```

mod aggregator;
mod binder;
mod context;
mod dispatch;
mod error;
mod event;
mod sink;

pub use aggregator::{EventAggregator, MergeKey};
pub use binder::{DispatchState, EventBinder, EventUnit, UnitEvents};
pub use context::RequestInfo;
pub use dispatch::Dispatcher;
pub use error::{EventError, ListenerError, Veto};
pub use event::{Change, EventPayload, Notification, ResourceEvent, Subject, RESERVED_FIELDS};
pub use sink::{Listener, ListenerFilter, ListenerRegistry, NotificationSink};
