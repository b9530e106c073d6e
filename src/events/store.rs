use super::*;
use std::{collections::HashMap, fmt};
use tracing::{debug, trace};

/// Internal representation of an event handler and the event it listens for.
pub struct EventData {
    event: Event,
    action: Box<dyn EventHandler>,
}

impl EventData {
    /// Create a representation of an event and its associated handler.
    pub fn new<F: EventHandler + 'static>(event: Event, action: F) -> Self {
        Self {
            event,
            action: Box::new(action),
        }
    }

    /// The event this handler listens for.
    #[must_use]
    pub fn event(&self) -> Event {
        self.event
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("event", &self.event)
            .field("action", &"<fn>")
            .finish()
    }
}

/// Global handlers, keyed by the core event they listen for.
#[derive(Debug, Default)]
pub struct GlobalEvents {
    handlers: HashMap<CoreEvent, Vec<EventData>>,
}

impl GlobalEvents {
    pub(crate) fn add_event(&mut self, data: EventData) {
        match data.event {
            Event::Core(evt) => self.handlers.entry(evt).or_default().push(data),
            Event::Cancel => debug!("Ignoring handler registered for Event::Cancel."),
        }
    }

    pub(crate) fn remove_handlers(&mut self) {
        self.handlers.clear();
    }

    /// Number of handlers registered for `evt`.
    #[must_use]
    pub fn len(&self, evt: CoreEvent) -> usize {
        self.handlers.get(&evt).map_or(0, Vec::len)
    }

    /// Runs every handler of `evt` in registration order, dropping those which cancel.
    pub(crate) async fn fire_core_event(&mut self, evt: CoreEvent, ctx: EventContext<'_>) {
        let Some(handlers) = self.handlers.get_mut(&evt) else {
            return;
        };

        let mut i = 0;
        while i < handlers.len() {
            if let Some(Event::Cancel) = handlers[i].action.act(&ctx).await {
                trace!("Removing cancelled handler for {:?}.", evt);
                handlers.remove(i);
            } else {
                i += 1;
            }
        }
    }
}
