#![allow(missing_docs)]

mod core;
mod events;
mod ws;

pub use self::{core::*, events::*, ws::*};

use flume::Sender;

#[derive(Clone, Debug)]
pub struct Interconnect {
    pub core: Sender<CoreMessage>,
    pub events: Sender<EventMessage>,
}

impl Interconnect {
    pub fn poison(&self) {
        drop(self.events.send(EventMessage::Poison));
    }

    pub fn fire(&self, ctx: crate::events::CoreContext) {
        drop(self.events.send(EventMessage::FireCoreEvent(ctx)));
    }
}
