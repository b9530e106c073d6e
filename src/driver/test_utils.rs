//! In-memory transports and codecs for exercising the driver without a network or libopus.

use super::{
    connector::{Connector, UdpTransport},
    crypto::{CryptoMode, CryptoState, SessionKey, TAG_SIZE},
    directory::UserDirectory,
    opus::{DecoderFactory, VoiceDecoder, VoiceEncoder},
    rtp::{self, RtpHeader, RTP_HEADER_LEN},
    tasks::message::*,
    AudioFormat,
};
use crate::{
    constants::*,
    id::UserId,
    model::{
        payload::{Hello, Ready, SessionDescription},
        Event,
    },
    ws::{Error as WsError, Result as WsResult, Signalling},
};
use async_trait::async_trait;
use audiopus::error::{Error as OpusError, ErrorCode};
use byteorder::{ByteOrder, NetworkEndian};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    io::{Error as IoError, ErrorKind, Result as IoResult},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use url::Url;

/// Bytes every [`MockEncoder`] emits for a frame.
pub(crate) const MOCK_OPUS_FRAME: [u8; 4] = [0xFC, 0x01, 0x02, 0x03];

/// Address reported by [`FakeUdp`]'s IP discovery answers.
pub(crate) const DISCOVERED_ADDRESS: &str = "203.0.113.7";

/// Port reported by [`FakeUdp`]'s IP discovery answers.
pub(crate) const DISCOVERED_PORT: u16 = 50_004;

#[derive(Clone, Debug, Default)]
pub(crate) struct MockEncoder {
    fail: bool,
}

impl MockEncoder {
    pub(crate) fn failing() -> Self {
        Self { fail: true }
    }
}

impl VoiceEncoder for MockEncoder {
    fn encode(&mut self, _pcm: &[i16], out: &mut [u8]) -> Result<usize, OpusError> {
        if self.fail {
            return Err(OpusError::Opus(ErrorCode::InternalError));
        }

        out[..MOCK_OPUS_FRAME.len()].copy_from_slice(&MOCK_OPUS_FRAME);
        Ok(MOCK_OPUS_FRAME.len())
    }
}

pub(crate) struct MockDecoder {
    last: usize,
    pub next_decode_len: usize,
    pub fec_calls: usize,
    pub plc_calls: usize,
    pub fail_concealment: bool,
    pub decoded: Arc<AtomicUsize>,
}

impl MockDecoder {
    pub(crate) fn new(last: usize) -> Self {
        Self {
            last,
            next_decode_len: last,
            fec_calls: 0,
            plc_calls: 0,
            fail_concealment: false,
            decoded: Arc::default(),
        }
    }
}

impl VoiceDecoder for MockDecoder {
    fn decode(&mut self, _frame: &[u8], out: &mut [i16]) -> Result<usize, OpusError> {
        if self.next_decode_len > out.len() {
            return Err(OpusError::Opus(ErrorCode::BufferTooSmall));
        }

        self.decoded.fetch_add(1, Ordering::SeqCst);
        out[..self.next_decode_len].fill(1);
        self.last = self.next_decode_len;
        Ok(self.last)
    }

    fn decode_fec(&mut self, _next: &[u8], out: &mut [i16]) -> Result<usize, OpusError> {
        self.fec_calls += 1;
        if self.fail_concealment {
            return Err(OpusError::Opus(ErrorCode::InvalidPacket));
        }
        Ok(out.len())
    }

    fn conceal(&mut self, out: &mut [i16]) -> Result<usize, OpusError> {
        self.plc_calls += 1;
        if self.fail_concealment {
            out.fill(7);
            return Err(OpusError::Opus(ErrorCode::InternalError));
        }
        Ok(out.len())
    }

    fn last_sample_count(&self) -> usize {
        self.last
    }
}

/// Creates [`MockDecoder`]s, counting creations and decodes across all of them.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingDecoderFactory {
    frame_len: usize,
    pub created: Arc<AtomicUsize>,
    pub decoded: Arc<AtomicUsize>,
}

impl CountingDecoderFactory {
    pub(crate) fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            ..Default::default()
        }
    }
}

impl DecoderFactory for CountingDecoderFactory {
    fn create(&self, _format: AudioFormat) -> Result<Box<dyn VoiceDecoder>, OpusError> {
        self.created.fetch_add(1, Ordering::SeqCst);

        let mut decoder = MockDecoder::new(self.frame_len);
        decoder.decoded = self.decoded.clone();
        Ok(Box::new(decoder))
    }
}

/// Resolves every user to `user-<id>`.
pub(crate) struct NamedUsers;

impl UserDirectory for NamedUsers {
    fn display_name(&self, user: UserId) -> Option<String> {
        Some(format!("user-{}", user.0))
    }
}

pub(crate) fn test_key(mode: CryptoMode) -> SessionKey {
    SessionKey::new(mode, &[7; 32]).unwrap()
}

pub(crate) fn test_interconnect() -> (Interconnect, Receiver<CoreMessage>, Receiver<EventMessage>) {
    let (core_tx, core_rx) = flume::unbounded();
    let (evt_tx, evt_rx) = flume::unbounded();

    (
        Interconnect {
            core: core_tx,
            events: evt_tx,
        },
        core_rx,
        evt_rx,
    )
}

/// Builds an encrypted voice datagram carrying `body` as its (plaintext) payload.
pub(crate) fn build_voice_packet(
    key: &SessionKey,
    state: &mut CryptoState,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    body: &[u8],
    extension: bool,
) -> Vec<u8> {
    let mut buf = vec![0u8; VOICE_PACKET_MAX];
    let mut header = RtpHeader::new(sequence, timestamp, ssrc);
    header.has_extension = extension;
    rtp::write_header(&mut buf, &header);

    let start = RTP_HEADER_LEN + TAG_SIZE;
    buf[start..start + body.len()].copy_from_slice(body);

    let payload_len = state.write_packet_nonce(&mut buf, RTP_HEADER_LEN, TAG_SIZE + body.len());
    key.mode
        .encrypt_in_place(&mut buf, RTP_HEADER_LEN, &key.cipher, payload_len)
        .unwrap();

    buf.truncate(RTP_HEADER_LEN + payload_len);
    buf
}

/// Decrypts a datagram produced by the sender, returning its header and Opus payload.
pub(crate) fn open_voice_packet(key: &SessionKey, packet: &[u8]) -> (RtpHeader, Vec<u8>) {
    let mut packet = packet.to_vec();
    let header = rtp::read_header(&packet).unwrap();
    let (start, tail) = key
        .mode
        .decrypt_in_place(&mut packet, RTP_HEADER_LEN, &key.cipher)
        .unwrap();

    let body = packet[RTP_HEADER_LEN + start..packet.len() - tail].to_vec();
    (header, body)
}

/// An IP discovery answer as the voice server would send it.
pub(crate) fn discovery_response(ssrc: u32, address: &str, port: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; IP_DISCOVERY_LEN];
    NetworkEndian::write_u16(&mut bytes[0..2], 2);
    NetworkEndian::write_u16(&mut bytes[2..4], IP_DISCOVERY_BODY_LEN);
    NetworkEndian::write_u32(&mut bytes[4..8], ssrc);
    bytes[8..8 + address.len()].copy_from_slice(address.as_bytes());
    NetworkEndian::write_u16(&mut bytes[72..74], port);
    bytes
}

/// A UDP transport backed by channels.
///
/// IP discovery requests are answered automatically.
pub(crate) struct FakeUdp {
    sent: Sender<(Instant, Vec<u8>)>,
    inbound_tx: Sender<Vec<u8>>,
    inbound: Receiver<Vec<u8>>,
    fail: Arc<AtomicBool>,
}

/// The far end of a [`FakeUdp`].
pub(crate) struct UdpPeer {
    pub sent: Receiver<(Instant, Vec<u8>)>,
    pub inbound: Sender<Vec<u8>>,
    fail: Arc<AtomicBool>,
}

impl UdpPeer {
    pub(crate) fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Datagrams sent after IP discovery.
    pub(crate) fn voice_traffic(&self) -> Vec<Vec<u8>> {
        self.sent
            .try_iter()
            .map(|(_, pkt)| pkt)
            .filter(|pkt| pkt.len() != IP_DISCOVERY_LEN)
            .collect()
    }
}

impl FakeUdp {
    pub(crate) fn new() -> (Arc<dyn UdpTransport>, UdpPeer) {
        let (sent_tx, sent_rx) = flume::unbounded();
        let (inbound_tx, inbound_rx) = flume::unbounded();
        let fail = Arc::new(AtomicBool::new(false));

        let udp = FakeUdp {
            sent: sent_tx,
            inbound_tx: inbound_tx.clone(),
            inbound: inbound_rx,
            fail: fail.clone(),
        };
        let peer = UdpPeer {
            sent: sent_rx,
            inbound: inbound_tx,
            fail,
        };

        (Arc::new(udp), peer)
    }
}

#[async_trait]
impl UdpTransport for FakeUdp {
    async fn send(&self, buf: &[u8]) -> IoResult<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IoError::new(ErrorKind::ConnectionRefused, "fake send failure"));
        }

        if buf.len() == IP_DISCOVERY_LEN && buf[..2] == [0, 1] {
            let ssrc = NetworkEndian::read_u32(&buf[4..8]);
            drop(self.inbound_tx.send(discovery_response(
                ssrc,
                DISCOVERED_ADDRESS,
                DISCOVERED_PORT,
            )));
        }

        drop(self.sent.send((Instant::now(), buf.to_vec())));
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> IoResult<usize> {
        let pkt = self
            .inbound
            .recv_async()
            .await
            .map_err(|_| IoError::new(ErrorKind::ConnectionAborted, "fake socket closed"))?;

        let len = pkt.len().min(buf.len());
        buf[..len].copy_from_slice(&pkt[..len]);
        Ok(len)
    }
}

/// A signalling channel backed by channels.
pub(crate) struct FakeSignalling {
    inbound: Receiver<WsResult<Event>>,
    outbound: Sender<Event>,
    closed: Arc<AtomicBool>,
}

/// The voice server's end of a [`FakeSignalling`].
pub(crate) struct FakeServer {
    to_client: Sender<WsResult<Event>>,
    from_client: Receiver<Event>,
    closed: Arc<AtomicBool>,
}

pub(crate) fn fake_signalling() -> (FakeSignalling, FakeServer) {
    let (to_client, inbound) = flume::unbounded();
    let (outbound, from_client) = flume::unbounded();
    let closed = Arc::new(AtomicBool::new(false));

    (
        FakeSignalling {
            inbound,
            outbound,
            closed: closed.clone(),
        },
        FakeServer {
            to_client,
            from_client,
            closed,
        },
    )
}

impl FakeServer {
    pub(crate) fn push(&self, event: Event) {
        drop(self.to_client.send(Ok(event)));
    }

    pub(crate) fn close_with(&self, code: u16) {
        drop(
            self.to_client
                .send(Err(WsError::WsClosed(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                })))),
        );
    }

    /// Everything the client has sent so far.
    pub(crate) fn sent(&self) -> Vec<Event> {
        self.from_client.try_iter().collect()
    }

    /// Whether the client closed its end of the channel.
    pub(crate) fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits for the client's next message.
    pub(crate) async fn next_sent(&self) -> Event {
        self.from_client.recv_async().await.unwrap()
    }
}

#[async_trait]
impl Signalling for FakeSignalling {
    async fn recv_json(&mut self) -> WsResult<Option<Event>> {
        match self.inbound.recv_async().await {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WsError::WsClosed(None)),
        }
    }

    async fn send_json(&mut self, value: &Event) -> WsResult<()> {
        self.outbound
            .send(value.clone())
            .map_err(|_| WsError::WsClosed(None))
    }

    async fn close(&mut self) -> WsResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// SSRC assigned by [`script_handshake`].
pub(crate) const SCRIPTED_SSRC: u32 = 42;

/// Queues the server side of a full handshake: Hello, Ready offering `modes`,
/// then a session description for `described` carrying the [`test_key`] secret.
pub(crate) fn script_handshake(server: &FakeServer, modes: &[&str], described: &str) {
    server.push(Event::from(Hello {
        heartbeat_interval: 41_250.0,
    }));
    server.push(Event::from(Ready {
        ssrc: SCRIPTED_SSRC,
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 5000,
        modes: modes.iter().map(|s| (*s).to_string()).collect(),
    }));
    server.push(Event::from(SessionDescription {
        mode: described.into(),
        secret_key: vec![7; 32],
    }));
}

/// Hands out prepared [`FakeSignalling`] and [`FakeUdp`] transports in order.
#[derive(Default)]
pub(crate) struct FakeConnector {
    servers: Mutex<VecDeque<FakeSignalling>>,
    sockets: Mutex<VecDeque<Arc<dyn UdpTransport>>>,
    pub urls: Mutex<Vec<Url>>,
    pub remotes: Mutex<Vec<SocketAddr>>,
}

impl FakeConnector {
    pub(crate) fn add_server(&self) -> FakeServer {
        let (client, server) = fake_signalling();
        self.servers.lock().push_back(client);
        server
    }

    pub(crate) fn add_udp(&self) -> UdpPeer {
        let (udp, peer) = FakeUdp::new();
        self.sockets.lock().push_back(udp);
        peer
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect_ws(&self, url: Url) -> WsResult<Box<dyn Signalling>> {
        self.urls.lock().push(url);
        match self.servers.lock().pop_front() {
            Some(client) => Ok(Box::new(client)),
            None => Err(WsError::WsClosed(None)),
        }
    }

    async fn bind_udp(&self, remote: SocketAddr) -> IoResult<Arc<dyn UdpTransport>> {
        self.remotes.lock().push(remote);
        self.sockets
            .lock()
            .pop_front()
            .ok_or_else(|| IoError::new(ErrorKind::AddrNotAvailable, "no fake socket prepared"))
    }
}
