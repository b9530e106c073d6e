use super::{message::*, udp_rx::KeepaliveMap};
use crate::{constants::*, driver::UdpTransport};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;
use tokio::{
    select,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, trace};

struct UdpTx {
    udp: Arc<dyn UdpTransport>,
    keepalives: KeepaliveMap,
    counter: u64,
    attempt_idx: usize,
}

impl UdpTx {
    async fn run(&mut self, interconnect: &Interconnect, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + UDP_KEEPALIVE_GAP, UDP_KEEPALIVE_GAP);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut keepalive_bytes = [0u8; KEEPALIVE_LEN];

        loop {
            select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            self.counter = self.counter.wrapping_add(1);
            let now = Instant::now();

            self.keepalives
                .retain(|_, sent| now.duration_since(*sent) < UDP_KEEPALIVE_EXPIRY);
            self.keepalives.insert(self.counter, now);

            LittleEndian::write_u64(&mut keepalive_bytes, self.counter);

            trace!("Sending UDP keepalive {}.", self.counter);
            if let Err(e) = self.udp.send(&keepalive_bytes).await {
                error!("Fatal UDP keepalive send error: {e:?}.");
                drop(
                    interconnect
                        .core
                        .send(CoreMessage::FullReconnect(self.attempt_idx)),
                );
                break;
            }
        }
    }
}

#[instrument(skip(interconnect, udp, keepalives, cancel))]
pub(crate) async fn runner(
    interconnect: Interconnect,
    udp: Arc<dyn UdpTransport>,
    keepalives: KeepaliveMap,
    attempt_idx: usize,
    cancel: CancellationToken,
) {
    trace!("UDP keepalive handle started.");

    let mut txer = UdpTx {
        udp,
        keepalives,
        counter: 0,
        attempt_idx,
    };

    txer.run(&interconnect, cancel).await;

    trace!("UDP keepalive handle stopped.");
}
