use super::{
    error::{Error, Result},
    message::*,
};
use crate::{
    constants::*,
    driver::{
        crypto::SessionKey,
        opus::{self, DecoderFactory, VoiceDecoder},
        rtp::{self, RtpHeader},
        sequence::{SequenceClass, SequenceTracker},
        state::DriverShared,
        AudioFormat,
        DecodeMode,
        UdpTransport,
    },
    events::{context::internal_data::InternalVoicePacket, CoreContext},
    id::UserId,
    Config,
};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use dashmap::{mapref::one::RefMut, DashMap};
use parking_lot::Mutex;
use std::{fmt, ops::RangeInclusive, sync::Arc};
use tokio::{select, sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

/// Payload types of RTCP traffic sharing the voice socket.
const RTCP_PAYLOAD_TYPES: RangeInclusive<u8> = 72..=76;

/// Remote senders keyed by SSRC.
pub(crate) type SenderMap = Arc<DashMap<u32, AudioSender>>;

/// Send times of keepalives awaiting their echo, keyed by counter.
pub(crate) type KeepaliveMap = Arc<DashMap<u64, Instant>>;

/// Receive state of one remote audio stream.
///
/// The decoder sits behind a mutex so that the map can be shared between the
/// signalling and receive tasks; only the receive task ever locks it.
pub(crate) struct AudioSender {
    pub ssrc: u32,
    pub user_id: Option<UserId>,
    pub decoder: Option<Mutex<Box<dyn VoiceDecoder>>>,
    pub sequence: SequenceTracker,
}

impl AudioSender {
    pub(crate) fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            user_id: None,
            decoder: None,
            sequence: SequenceTracker::default(),
        }
    }
}

impl fmt::Debug for AudioSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSender")
            .field("ssrc", &self.ssrc)
            .field("user_id", &self.user_id)
            .field("has_decoder", &self.decoder.is_some())
            .field("sequence", &self.sequence)
            .finish()
    }
}

pub(crate) struct UdpRx {
    udp: Arc<dyn UdpTransport>,
    key: watch::Receiver<SessionKey>,
    senders: SenderMap,
    keepalives: KeepaliveMap,
    shared: Arc<DriverShared>,
    decode_mode: DecodeMode,
    format: AudioFormat,
    max_concealment_frames: usize,
    decoders: Arc<dyn DecoderFactory>,
    attempt_idx: usize,
}

impl UdpRx {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        udp: Arc<dyn UdpTransport>,
        key: watch::Receiver<SessionKey>,
        senders: SenderMap,
        keepalives: KeepaliveMap,
        shared: Arc<DriverShared>,
        config: &Config,
        attempt_idx: usize,
    ) -> Self {
        Self {
            udp,
            key,
            senders,
            keepalives,
            shared,
            decode_mode: config.decode_mode,
            format: config.audio_format,
            max_concealment_frames: config.max_concealment_frames,
            decoders: config.decoder_factory.clone(),
            attempt_idx,
        }
    }

    #[instrument(skip(self, interconnect, cancel))]
    async fn run(&mut self, interconnect: &Interconnect, cancel: CancellationToken) {
        let mut buf = [0u8; VOICE_PACKET_MAX];

        loop {
            let recv = select! {
                () = cancel.cancelled() => break,
                r = self.udp.recv(&mut buf) => r,
            };

            match recv {
                Ok(len) => {
                    if let Err(e) = self.process_datagram(&mut buf[..len], interconnect) {
                        match e {
                            Error::Crypto(_) => debug!("Dropping packet which failed authentication."),
                            Error::IllegalVoicePacket => debug!("Dropping illegal voice packet."),
                            e => warn!("Failed to process voice packet: {e}."),
                        }
                    }
                },
                Err(e) =>
                    if let Err(e) = Error::from(e).disarm_would_block() {
                        error!("Fatal UDP receive error: {e}.");
                        drop(
                            interconnect
                                .core
                                .send(CoreMessage::FullReconnect(self.attempt_idx)),
                        );
                        break;
                    },
            }
        }
    }

    pub(crate) fn process_datagram(
        &self,
        packet: &mut [u8],
        interconnect: &Interconnect,
    ) -> Result<()> {
        match packet.len() {
            KEEPALIVE_LEN => {
                self.process_keepalive(packet);
                Ok(())
            },
            n if n >= MIN_RTP_PACKET_LEN => self.process_rtp(packet, interconnect),
            n => {
                trace!("Dropping {n}-byte datagram.");
                Ok(())
            },
        }
    }

    fn process_keepalive(&self, packet: &[u8]) {
        let counter = LittleEndian::read_u64(packet);

        match self.keepalives.remove(&counter) {
            Some((_, sent)) => {
                let rtt = sent.elapsed();
                trace!("Keepalive {counter} echoed after {rtt:?}.");
                *self.shared.udp_rtt.lock() = Some(rtt);
            },
            None => trace!("Unmatched keepalive {counter}."),
        }
    }

    fn process_rtp(&self, packet: &mut [u8], interconnect: &Interconnect) -> Result<()> {
        let header = rtp::read_header(packet).ok_or(Error::IllegalVoicePacket)?;

        if header.version != RTP_VERSION {
            return Err(Error::IllegalVoicePacket);
        }

        if RTCP_PAYLOAD_TYPES.contains(&header.payload_type) {
            trace!("Ignoring RTCP packet.");
            return Ok(());
        }

        if header.payload_type != RTP_PROFILE_TYPE {
            return Err(Error::IllegalVoicePacket);
        }

        let header_len = header.header_len();
        if header_len >= packet.len() {
            return Err(Error::IllegalVoicePacket);
        }

        // New senders are only admitted once a packet from them authenticates.
        let known = self.senders.get_mut(&header.ssrc);
        let tracker = known
            .as_ref()
            .map_or_else(SequenceTracker::default, |sender| sender.sequence);

        let (sequence, gap) = match tracker.classify(header.sequence) {
            SequenceClass::OutOfOrder => {
                trace!(
                    "Dropping late packet {} from SSRC {}.",
                    header.sequence,
                    header.ssrc
                );
                return Ok(());
            },
            SequenceClass::InOrder { sequence, gap } => (sequence, gap),
        };

        if !self.decode_mode.should_decrypt() {
            let mut sender = known.unwrap_or_else(|| self.admit(header.ssrc));
            sender.sequence.accept(sequence);

            interconnect.fire(CoreContext::VoicePacket(InternalVoicePacket {
                ssrc: header.ssrc,
                user_id: sender.user_id,
                sequence,
                timestamp: header.timestamp,
                concealed: false,
                payload: Bytes::copy_from_slice(&packet[header_len..]),
                audio: None,
            }));
            return Ok(());
        }

        let (start, tail) = {
            let key = self.key.borrow();
            key.mode
                .decrypt_in_place(packet, header_len, &key.cipher)?
        };

        let mut sender = known.unwrap_or_else(|| self.admit(header.ssrc));
        sender.sequence.accept(sequence);
        let user_id = sender.user_id;

        let body = packet
            .get(header_len + start..packet.len() - tail)
            .ok_or(Error::IllegalVoicePacket)?;
        let opus_frame = strip_extension(body, &header)?;

        let audio = if self.decode_mode.should_decode() {
            let decoder = match sender.decoder.take() {
                Some(decoder) => decoder,
                None => Mutex::new(self.decoders.create(self.format)?),
            };
            let decoder = sender.decoder.insert(decoder).get_mut();

            if gap > 0 {
                self.fire_concealment(
                    decoder.as_mut(),
                    &header,
                    user_id,
                    sequence,
                    gap,
                    opus_frame,
                    interconnect,
                );
            }

            Some(opus::decode(decoder.as_mut(), opus_frame, self.format)?)
        } else {
            None
        };

        interconnect.fire(CoreContext::VoicePacket(InternalVoicePacket {
            ssrc: header.ssrc,
            user_id,
            sequence,
            timestamp: header.timestamp,
            concealed: false,
            payload: Bytes::copy_from_slice(opus_frame),
            audio,
        }));

        Ok(())
    }

    fn admit(&self, ssrc: u32) -> RefMut<'_, u32, AudioSender> {
        debug!("New audio sender on SSRC {ssrc}.");
        self.senders
            .entry(ssrc)
            .or_insert_with(|| AudioSender::new(ssrc))
    }

    #[allow(clippy::too_many_arguments)]
    fn fire_concealment(
        &self,
        decoder: &mut dyn VoiceDecoder,
        header: &RtpHeader,
        user_id: Option<UserId>,
        sequence: u64,
        gap: u64,
        next_frame: &[u8],
        interconnect: &Interconnect,
    ) {
        let step = rtp_ticks(decoder.last_sample_count(), self.format);
        let frames = opus::conceal(decoder, gap, Some(next_frame), self.max_concealment_frames);
        let count = frames.len() as u64;

        for (i, audio) in (0..count).zip(frames) {
            let back = count - i;
            interconnect.fire(CoreContext::VoicePacket(InternalVoicePacket {
                ssrc: header.ssrc,
                user_id,
                sequence: sequence - back,
                timestamp: header
                    .timestamp
                    .wrapping_sub(step.wrapping_mul(back as u32)),
                concealed: true,
                payload: Bytes::new(),
                audio: Some(audio),
            }));
        }
    }
}

/// Removes a header extension block, and any marker bytes following it, from a decrypted body.
fn strip_extension<'a>(body: &'a [u8], header: &RtpHeader) -> Result<&'a [u8]> {
    if !header.has_extension {
        return Ok(body);
    }

    let skip = rtp::extension_len(body).ok_or_else(|| {
        debug!("Extension block indicated, but insufficient space.");
        Error::IllegalVoicePacket
    })?;

    Ok(match &body[skip..] {
        [RTP_PAYLOAD_MARKER, _, frame @ ..] if !frame.is_empty() => frame,
        rest => rest,
    })
}

/// RTP clock ticks covered by `samples` interleaved samples of `format`.
fn rtp_ticks(samples: usize, format: AudioFormat) -> u32 {
    let per_channel = samples / format.channel_count().max(1);
    (per_channel * RTP_CLOCK_RATE as usize / format.sample_rate_raw().max(1)) as u32
}

#[instrument(skip(interconnect, rx, cancel))]
pub(crate) async fn runner(interconnect: Interconnect, mut rx: UdpRx, cancel: CancellationToken) {
    trace!("UDP receive handle started.");
    rx.run(&interconnect, cancel).await;
    trace!("UDP receive handle stopped.");
}
