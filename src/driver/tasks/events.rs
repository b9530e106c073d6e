use super::message::*;
use crate::events::GlobalEvents;
use flume::Receiver;
use tracing::{info, instrument, trace};

/// Runs user event handlers, one event at a time, in the order events were fired.
#[instrument(skip(evt_rx))]
pub(crate) async fn runner(evt_rx: Receiver<EventMessage>) {
    let mut global = GlobalEvents::default();

    while let Ok(msg) = evt_rx.recv_async().await {
        match msg {
            EventMessage::AddGlobalEvent(data) => {
                info!("Global event added.");
                global.add_event(data);
            },
            EventMessage::FireCoreEvent(ctx) => {
                let ctx = ctx.to_user_context();
                let evt = ctx.to_core_event();

                trace!("Firing core event {:?}.", evt);

                global.fire_core_event(evt, ctx).await;
            },
            EventMessage::RemoveGlobalEvents => {
                global.remove_handlers();
            },
            EventMessage::Poison => break,
        }
    }

    trace!("Event thread exited.");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        events::{
            context::internal_data::InternalClientDisconnect,
            CoreContext,
            CoreEvent,
            Event,
            EventContext,
            EventData,
            EventHandler,
        },
        id::UserId,
    };
    use async_trait::async_trait;
    use flume::Sender;

    struct Record(Sender<UserId>);

    #[async_trait]
    impl EventHandler for Record {
        async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
            if let EventContext::ClientDisconnect(data) = ctx {
                drop(self.0.send(data.user_id));
            }
            None
        }
    }

    fn leave(user: u64) -> EventMessage {
        EventMessage::FireCoreEvent(CoreContext::ClientDisconnect(InternalClientDisconnect {
            user_id: UserId(user),
            display_name: None,
        }))
    }

    #[tokio::test]
    async fn events_reach_handlers_in_order() {
        let (evt_tx, evt_rx) = flume::unbounded();
        let (seen_tx, seen_rx) = flume::unbounded();

        let task = tokio::spawn(runner(evt_rx));

        evt_tx.send(leave(1)).unwrap();
        evt_tx
            .send(EventMessage::AddGlobalEvent(EventData::new(
                CoreEvent::ClientDisconnect.into(),
                Record(seen_tx),
            )))
            .unwrap();
        evt_tx.send(leave(2)).unwrap();
        evt_tx.send(leave(3)).unwrap();
        evt_tx.send(EventMessage::RemoveGlobalEvents).unwrap();
        evt_tx.send(leave(4)).unwrap();
        evt_tx.send(EventMessage::Poison).unwrap();

        task.await.unwrap();

        let seen: Vec<_> = seen_rx.drain().collect();
        assert_eq!(seen, vec![UserId(2), UserId(3)]);
    }
}
