//! Events relating to remote users, received audio, and connection state.
//!
//! Handlers are registered on a [`Driver`] via [`Driver::add_global_event`],
//! and run one at a time on a dedicated task. Slow handlers delay later
//! events, but never the audio path.
//!
//! [`Driver`]: crate::driver::Driver
//! [`Driver::add_global_event`]: crate::driver::Driver::add_global_event

pub mod context;
mod core;
mod store;

pub use self::{
    context::{context_data, EventContext},
    core::*,
    store::*,
};
pub(crate) use context::CoreContext;

use async_trait::async_trait;

/// Classes of event which may trigger an [`EventHandler`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// Fires on receipt of the given core event.
    Core(CoreEvent),
    /// Returned by a handler to remove itself. Never fired.
    Cancel,
}

impl From<CoreEvent> for Event {
    fn from(evt: CoreEvent) -> Self {
        Event::Core(evt)
    }
}

/// Trait to handle an event which can be fired per-driver.
///
/// This is an async trait, so implementations must be marked with `#[async_trait]`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Respond to one received event.
    ///
    /// Returning `Some(Event::Cancel)` removes this handler.
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event>;
}
