use super::message::*;
use crate::{
    constants::*,
    driver::{
        crypto::{CryptoState, SessionKey, TAG_SIZE},
        opus::{self, VoiceEncoder},
        queue::RawOutboundPacket,
        rtp::{write_header, RtpHeader, RTP_HEADER_LEN},
        state::DriverShared,
        AudioFormat,
        UdpTransport,
    },
};
use rand::random;
use std::{collections::VecDeque, sync::Arc};
use tokio::{
    select,
    sync::watch,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, trace, warn};

enum Next {
    Packet(RawOutboundPacket),
    Paused,
    Stop,
}

/// Paces encoded, encrypted voice packets onto the UDP transport.
pub(crate) struct Scheduler {
    udp: Arc<dyn UdpTransport>,
    ws: flume::Sender<WsMessage>,
    ssrc: u32,

    key_rx: watch::Receiver<SessionKey>,
    key: SessionKey,
    crypto_state: CryptoState,
    encoder: Box<dyn VoiceEncoder>,

    shared: Arc<DriverShared>,
    trailing: VecDeque<RawOutboundPacket>,

    sequence: u16,
    timestamp: u32,
    deadline: Option<Instant>,
    packet: Vec<u8>,
    speaking: bool,

    attempt_idx: usize,
}

impl Scheduler {
    pub(crate) fn new(
        udp: Arc<dyn UdpTransport>,
        ws: flume::Sender<WsMessage>,
        ssrc: u32,
        mut key_rx: watch::Receiver<SessionKey>,
        encoder: Box<dyn VoiceEncoder>,
        shared: Arc<DriverShared>,
        attempt_idx: usize,
    ) -> Self {
        let key = key_rx.borrow_and_update().clone();

        Self {
            udp,
            ws,
            ssrc,

            crypto_state: key.mode.into(),
            key_rx,
            key,
            encoder,

            shared,
            trailing: VecDeque::with_capacity(TRAILING_SILENCE_FRAMES.max(PRIMING_SILENCE_FRAMES)),

            sequence: random::<u16>(),
            timestamp: random::<u32>(),
            deadline: None,
            packet: vec![0; VOICE_PACKET_MAX],
            speaking: false,

            attempt_idx,
        }
    }

    /// Queues `frames` silent frames ahead of any audio.
    pub(crate) fn prime(&mut self, frames: usize) {
        self.trailing
            .extend((0..frames).map(|_| RawOutboundPacket::silence(FRAME_LEN_MS)));
    }

    #[instrument(skip(self, interconnect, cancel))]
    async fn run(&mut self, interconnect: &Interconnect, cancel: CancellationToken) {
        let mut pause = self.shared.pause.subscribe();

        loop {
            if !wait_unpaused(&mut pause, &cancel).await {
                break;
            }

            let mut packet = match self.next_packet(&mut pause, &cancel).await {
                Next::Packet(p) => p,
                Next::Paused => continue,
                Next::Stop => break,
            };

            let silent = packet.silence || packet.buffer.is_none();
            let duration_ms = packet.duration_ms;

            let built = self.build_packet(&mut packet);
            drop(packet);

            if let Some(len) = built {
                if !silent && !self.speaking {
                    self.speaking = true;
                    drop(self.ws.send(WsMessage::Speaking(true)));
                }

                if !self.pace(duration_ms, &cancel).await {
                    break;
                }

                if let Err(e) = self.udp.send(&self.packet[..len]).await {
                    error!("Fatal UDP packet send error: {e:?}.");
                    drop(
                        interconnect
                            .core
                            .send(CoreMessage::FullReconnect(self.attempt_idx)),
                    );
                    break;
                }

                self.sequence = self.sequence.wrapping_add(1);
                self.timestamp = self
                    .timestamp
                    .wrapping_add(AudioFormat::timestamp_step(duration_ms));
            }

            self.after_send(silent);
        }
    }

    async fn next_packet(
        &mut self,
        pause: &mut watch::Receiver<bool>,
        cancel: &CancellationToken,
    ) -> Next {
        if let Some(pkt) = self.trailing.pop_front() {
            return Next::Packet(pkt);
        }

        if let Some(pkt) = self.shared.queue.try_dequeue() {
            self.taken();
            return Next::Packet(pkt);
        }

        select! {
            biased;
            () = cancel.cancelled() => Next::Stop,
            paused = pause.wait_for(|p| *p) => if paused.is_ok() {
                Next::Paused
            } else {
                Next::Stop
            },
            pkt = self.shared.queue.dequeue() => match pkt {
                Some(pkt) => {
                    self.taken();
                    Next::Packet(pkt)
                },
                None => Next::Stop,
            },
        }
    }

    fn taken(&self) {
        self.shared.begin_playback();
        self.shared.queue.mark_taken();
    }

    fn refresh_key(&mut self) {
        if !self.key_rx.has_changed().unwrap_or(false) {
            return;
        }

        let key = self.key_rx.borrow_and_update().clone();
        if key.mode != self.key.mode {
            self.crypto_state = key.mode.into();
        }
        self.key = key;
    }

    /// Writes `packet` as an encrypted RTP datagram, returning its length.
    ///
    /// The packet's buffer is released once it has been encoded.
    fn build_packet(&mut self, packet: &mut RawOutboundPacket) -> Option<usize> {
        self.refresh_key();

        let mode = self.key.mode;
        let pcm = packet.buffer.take();

        write_header(
            &mut self.packet,
            &RtpHeader::new(self.sequence, self.timestamp, self.ssrc),
        );

        let payload_start = RTP_HEADER_LEN + TAG_SIZE;
        let payload_limit = VOICE_PACKET_MAX - mode.payload_suffix_len();

        let opus_len = match pcm {
            Some(pcm) if !packet.silence => {
                match opus::encode(
                    self.encoder.as_mut(),
                    &pcm,
                    &mut self.packet[payload_start..payload_limit],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        warn!("Dropping frame which failed to encode: {e:?}.");
                        return None;
                    },
                }
            },
            _ => {
                self.packet[payload_start..payload_start + SILENT_FRAME.len()]
                    .copy_from_slice(&SILENT_FRAME);
                SILENT_FRAME.len()
            },
        };

        let payload_len =
            self.crypto_state
                .write_packet_nonce(&mut self.packet, RTP_HEADER_LEN, TAG_SIZE + opus_len);

        if let Err(e) =
            mode.encrypt_in_place(&mut self.packet, RTP_HEADER_LEN, &self.key.cipher, payload_len)
        {
            warn!("Dropping frame which failed to encrypt: {e:?}.");
            return None;
        }

        Some(RTP_HEADER_LEN + payload_len)
    }

    /// Sleeps until the packet's send deadline. Returns `false` if cancelled.
    async fn pace(&mut self, duration_ms: u32, cancel: &CancellationToken) -> bool {
        let now = Instant::now();
        let deadline = match self.deadline {
            Some(d) if now.saturating_duration_since(d) <= MAX_PACING_LAG => d,
            Some(_) => {
                trace!("Pacing clock fell behind; resetting.");
                now
            },
            None => now,
        };

        select! {
            () = cancel.cancelled() => return false,
            () = sleep_until(deadline) => {},
        }

        self.deadline = Some(deadline + PACING_UNIT * (duration_ms / 5));
        true
    }

    fn after_send(&mut self, silent: bool) {
        if !self.trailing.is_empty() || self.shared.queue.pending() != 0 {
            return;
        }

        if silent {
            if self.speaking {
                self.speaking = false;
                drop(self.ws.send(WsMessage::Speaking(false)));
            }
            self.shared.finish_playback();
        } else {
            self.prime(TRAILING_SILENCE_FRAMES);
        }
    }
}

async fn wait_unpaused(pause: &mut watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    if !*pause.borrow() {
        return true;
    }

    trace!("Sender paused.");
    select! {
        () = cancel.cancelled() => false,
        unpaused = pause.wait_for(|p| !*p) => unpaused.is_ok(),
    }
}

#[instrument(skip(interconnect, scheduler, cancel))]
pub(crate) async fn runner(
    interconnect: Interconnect,
    mut scheduler: Scheduler,
    cancel: CancellationToken,
) {
    trace!("Packet scheduler started.");
    scheduler.run(&interconnect, cancel).await;
    trace!("Packet scheduler finished.");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        driver::{crypto::CryptoMode, test_utils::*},
        Config,
    };
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    struct Harness {
        scheduler: Scheduler,
        peer: UdpPeer,
        ws: flume::Receiver<WsMessage>,
        interconnect: Interconnect,
        core: flume::Receiver<CoreMessage>,
        shared: Arc<DriverShared>,
        key: SessionKey,
    }

    fn harness(encoder: MockEncoder) -> Harness {
        let (udp, peer) = FakeUdp::new();
        let (ws_tx, ws) = flume::unbounded();
        let (interconnect, core, _events) = test_interconnect();
        let shared = Arc::new(DriverShared::new(&Config::default()));
        let key = test_key(CryptoMode::Normal);

        let scheduler = Scheduler::new(
            udp,
            ws_tx,
            99,
            watch::channel(key.clone()).1,
            Box::new(encoder),
            shared.clone(),
            3,
        );

        Harness {
            scheduler,
            peer,
            ws,
            interconnect,
            core,
            shared,
            key,
        }
    }

    async fn enqueue_audio(shared: &DriverShared, frames: usize) {
        for _ in 0..frames {
            let buf = shared.pool.rent(1920).unwrap();
            shared
                .queue
                .enqueue(RawOutboundPacket::audio(buf, 20))
                .await
                .unwrap();
        }
    }

    async fn playback_finished(shared: &DriverShared, completed: u64) {
        let mut rx = shared.playback.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.completed >= completed),
        )
        .await
        .unwrap()
        .unwrap();
    }

    fn speaking(ws: &flume::Receiver<WsMessage>) -> Vec<bool> {
        ws.try_iter()
            .filter_map(|m| match m {
                WsMessage::Speaking(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn audio_is_followed_by_three_silent_frames() {
        let h = harness(MockEncoder::default());
        enqueue_audio(&h.shared, 3).await;

        let cancel = CancellationToken::new();
        tokio::spawn(runner(h.interconnect.clone(), h.scheduler, cancel.clone()));
        playback_finished(&h.shared, 1).await;
        sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let sent: Vec<_> = h.peer.sent.try_iter().collect();
        assert_eq!(sent.len(), 6);

        let opened: Vec<_> = sent
            .iter()
            .map(|(_, pkt)| open_voice_packet(&h.key, pkt))
            .collect();
        for (i, (header, payload)) in opened.iter().enumerate() {
            if i < 3 {
                assert_eq!(&payload[..], &MOCK_OPUS_FRAME[..]);
            } else {
                assert_eq!(&payload[..], &SILENT_FRAME[..]);
            }
            assert_eq!(header.ssrc, 99);
            assert_eq!(header.payload_type, RTP_PROFILE_TYPE);
        }

        for pair in opened.windows(2) {
            assert_eq!(pair[1].0.sequence, pair[0].0.sequence.wrapping_add(1));
            assert_eq!(pair[1].0.timestamp, pair[0].0.timestamp.wrapping_add(960));
        }
        for pair in sent.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, Duration::from_millis(20));
        }

        assert_eq!(speaking(&h.ws), vec![true, false]);

        let stats = h.shared.pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.returned, 3);
        assert_eq!(h.shared.queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_failure_drops_frames_but_releases_buffers() {
        let h = harness(MockEncoder::failing());
        enqueue_audio(&h.shared, 3).await;

        let cancel = CancellationToken::new();
        tokio::spawn(runner(h.interconnect.clone(), h.scheduler, cancel.clone()));
        playback_finished(&h.shared, 1).await;
        cancel.cancel();

        let sent: Vec<_> = h.peer.sent.try_iter().collect();
        assert_eq!(sent.len(), 3);
        assert!(sent
            .iter()
            .all(|(_, pkt)| open_voice_packet(&h.key, pkt).1 == SILENT_FRAME));

        assert!(speaking(&h.ws).is_empty());
        assert_eq!(h.shared.pool.stats().returned, 3);
        assert_eq!(h.shared.pool.stats().outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn priming_sends_silence_without_completing_playback() {
        let mut h = harness(MockEncoder::default());
        h.scheduler.prime(PRIMING_SILENCE_FRAMES);

        let cancel = CancellationToken::new();
        tokio::spawn(runner(h.interconnect.clone(), h.scheduler, cancel.clone()));
        sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        assert_eq!(h.peer.sent.try_iter().count(), PRIMING_SILENCE_FRAMES);
        assert!(speaking(&h.ws).is_empty());
        assert_eq!(*h.shared.playback.borrow(), Default::default());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_packets_until_resumed() {
        let h = harness(MockEncoder::default());
        h.shared.pause.send_replace(true);
        enqueue_audio(&h.shared, 2).await;

        let cancel = CancellationToken::new();
        tokio::spawn(runner(h.interconnect.clone(), h.scheduler, cancel.clone()));
        sleep(Duration::from_secs(1)).await;
        assert!(h.peer.sent.is_empty());
        assert_eq!(h.shared.queue.len(), 2);

        h.shared.pause.send_replace(false);
        playback_finished(&h.shared, 1).await;
        cancel.cancel();

        assert_eq!(h.peer.sent.try_iter().count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_resets_after_idle_periods() {
        let h = harness(MockEncoder::default());
        let cancel = CancellationToken::new();
        tokio::spawn(runner(h.interconnect.clone(), h.scheduler, cancel.clone()));

        enqueue_audio(&h.shared, 1).await;
        playback_finished(&h.shared, 1).await;
        sleep(Duration::from_secs(2)).await;

        let start = Instant::now();
        enqueue_audio(&h.shared, 1).await;
        playback_finished(&h.shared, 2).await;
        cancel.cancel();

        let sent: Vec<_> = h.peer.sent.try_iter().collect();
        assert_eq!(sent.len(), 8);
        assert_eq!(sent[4].0, start);
        assert_eq!(sent[5].0 - sent[4].0, Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_requests_full_reconnect() {
        let h = harness(MockEncoder::default());
        h.peer.fail_sends();
        enqueue_audio(&h.shared, 1).await;

        runner(h.interconnect.clone(), h.scheduler, CancellationToken::new()).await;

        assert!(matches!(h.core.try_recv(), Ok(CoreMessage::FullReconnect(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn renegotiated_key_is_used_for_later_packets() {
        let (udp, peer) = FakeUdp::new();
        let (ws_tx, _ws) = flume::unbounded();
        let (interconnect, _core, _events) = test_interconnect();
        let shared = Arc::new(DriverShared::new(&Config::default()));
        let (key_tx, key_rx) = watch::channel(test_key(CryptoMode::Normal));

        let scheduler = Scheduler::new(
            udp,
            ws_tx,
            99,
            key_rx,
            Box::new(MockEncoder::default()),
            shared.clone(),
            0,
        );
        let cancel = CancellationToken::new();
        tokio::spawn(runner(interconnect, scheduler, cancel.clone()));

        enqueue_audio(&shared, 1).await;
        playback_finished(&shared, 1).await;

        let lite = test_key(CryptoMode::Lite);
        key_tx.send_replace(lite.clone());
        enqueue_audio(&shared, 1).await;
        playback_finished(&shared, 2).await;
        cancel.cancel();

        let sent: Vec<_> = peer.sent.try_iter().map(|(_, p)| p).collect();
        assert_eq!(sent.len(), 8);
        assert_eq!(open_voice_packet(&lite, &sent[4]).1, MOCK_OPUS_FRAME);
    }
}
