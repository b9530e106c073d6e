pub mod error;

use super::{
    crypto::SessionKey,
    opus::OpusEncoder,
    state::{ConnectionPhase, DriverShared},
    tasks::{
        heartbeat,
        message::*,
        sender::{self, Scheduler},
        udp_rx::{self, KeepaliveMap, SenderMap, UdpRx},
        udp_tx,
        ws::{self as ws_task, AuxNetwork},
    },
    CryptoMode,
};
use crate::{
    constants::*,
    model::{
        payload::{Hello, Identify, Ready, Resume, SelectProtocol},
        Event as GatewayEvent,
        ProtocolData,
    },
    ws::Signalling,
    Config,
    ConnectionInfo,
};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use error::{Error, Result};
use flume::Sender;
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};
use tokio::{spawn, sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

/// A live voice session and the background tasks serving it.
///
/// Dropping a connection stops all of its tasks.
pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) ws: Sender<WsMessage>,
    cancel: CancellationToken,
}

impl Connection {
    pub(crate) async fn new(
        info: ConnectionInfo,
        interconnect: &Interconnect,
        config: &Config,
        shared: &Arc<DriverShared>,
        idx: usize,
    ) -> Result<Connection> {
        if let Some(t) = config.driver_timeout {
            timeout(
                t,
                Connection::new_inner(info, interconnect, config, shared, idx),
            )
            .await?
        } else {
            Connection::new_inner(info, interconnect, config, shared, idx).await
        }
    }

    #[instrument(skip(interconnect, config, shared))]
    pub(crate) async fn new_inner(
        mut info: ConnectionInfo,
        interconnect: &Interconnect,
        config: &Config,
        shared: &Arc<DriverShared>,
        idx: usize,
    ) -> Result<Connection> {
        let url = generate_url(&mut info.endpoint)?;

        let mut client = config.connector.connect_ws(url).await?;

        shared.set_phase(ConnectionPhase::Identifying);
        let opener = if info.resume {
            GatewayEvent::from(Resume {
                server_id: info.guild_id.into(),
                session_id: info.session_id.clone(),
                token: info.token.clone(),
            })
        } else {
            GatewayEvent::from(Identify {
                server_id: info.guild_id.into(),
                session_id: info.session_id.clone(),
                token: info.token.clone(),
                user_id: info.user_id.into(),
            })
        };
        client.send_json(&opener).await?;

        shared.set_phase(ConnectionPhase::AwaitingReady);
        let (hello, ready) = await_hello_and_ready(client.as_mut()).await?;

        let mode = CryptoMode::select(&ready.modes, &config.crypto_preference)?;
        debug!("Server offered {:?}; using {:?}.", ready.modes, mode);

        shared.set_phase(ConnectionPhase::DiscoveringEndpoint);
        let udp = config
            .connector
            .bind_udp(SocketAddr::new(ready.ip, ready.port))
            .await?;

        // The voice server echoes back the address and port it sees us at, in case NAT is in the way.
        udp.send(&discovery_request(ready.ssrc)).await?;

        let mut bytes = [0; IP_DISCOVERY_LEN];
        let len = udp.recv(&mut bytes).await?;
        let (address, port) = parse_discovery_response(&bytes[..len])?;

        shared.set_phase(ConnectionPhase::SelectingProtocol);
        client
            .send_json(&GatewayEvent::from(SelectProtocol {
                protocol: "udp".into(),
                data: ProtocolData {
                    address,
                    mode: mode.to_request_str().into(),
                    port,
                },
            }))
            .await?;

        shared.set_phase(ConnectionPhase::AwaitingSessionDescription);
        let key = init_cipher(client.as_mut(), mode).await?;

        let encoder = OpusEncoder::new(config.audio_format, config.bitrate)?;

        info!("Connected to: {}", info.endpoint);
        info!("WS heartbeat duration {}ms.", hello.heartbeat_interval);

        let ssrc = ready.ssrc;
        let cancel = shared.cancel.child_token();

        let (ws_msg_tx, ws_msg_rx) = flume::unbounded();
        let (interval_tx, interval_rx) =
            watch::channel(heartbeat::interval_from_millis(hello.heartbeat_interval));
        let (key_tx, key_rx) = watch::channel(key);
        let senders = SenderMap::default();
        let keepalives = KeepaliveMap::default();

        let mut scheduler = Scheduler::new(
            udp.clone(),
            ws_msg_tx.clone(),
            ssrc,
            key_rx.clone(),
            Box::new(encoder),
            shared.clone(),
            idx,
        );
        scheduler.prime(PRIMING_SILENCE_FRAMES);

        let aux = AuxNetwork::new(
            ws_msg_rx,
            client,
            ssrc,
            interval_tx,
            idx,
            senders.clone(),
            key_tx,
            config.user_directory.clone(),
            shared.clone(),
        );

        let receiver = UdpRx::new(
            udp.clone(),
            key_rx,
            senders,
            keepalives.clone(),
            shared.clone(),
            config,
            idx,
        );

        spawn(ws_task::runner(
            interconnect.clone(),
            aux,
            cancel.child_token(),
        ));
        spawn(heartbeat::runner(
            interval_rx,
            ws_msg_tx.clone(),
            cancel.child_token(),
        ));
        spawn(udp_tx::runner(
            interconnect.clone(),
            udp,
            keepalives,
            idx,
            cancel.child_token(),
        ));
        spawn(udp_rx::runner(
            interconnect.clone(),
            receiver,
            cancel.child_token(),
        ));
        spawn(sender::runner(
            interconnect.clone(),
            scheduler,
            cancel.child_token(),
        ));

        info.resume = true;
        shared.set_phase(ConnectionPhase::Active);

        Ok(Connection {
            info,
            ssrc,
            ws: ws_msg_tx,
            cancel,
        })
    }

    #[instrument(skip(self, config))]
    pub async fn reconnect(&mut self, config: &Config) -> Result<()> {
        if let Some(t) = config.driver_timeout {
            timeout(t, self.reconnect_inner(config)).await?
        } else {
            self.reconnect_inner(config).await
        }
    }

    /// Resumes the session over a new websocket, keeping the UDP transport and its tasks.
    #[instrument(skip(self, config))]
    pub async fn reconnect_inner(&mut self, config: &Config) -> Result<()> {
        let url = generate_url(&mut self.info.endpoint)?;

        let mut client = config.connector.connect_ws(url).await?;

        client
            .send_json(&GatewayEvent::from(Resume {
                server_id: self.info.guild_id.into(),
                session_id: self.info.session_id.clone(),
                token: self.info.token.clone(),
            }))
            .await?;

        let mut pending_hello = None;
        let mut resumed = false;

        let hello = loop {
            let Some(value) = client.recv_json().await? else {
                continue;
            };

            match value {
                GatewayEvent::Resumed => resumed = true,
                GatewayEvent::Hello(h) => pending_hello = Some(h),
                other => {
                    debug!("Expected resumed/hello; got: {:?}", other);
                },
            }

            if resumed {
                if let Some(h) = pending_hello.take() {
                    break h;
                }
            }
        };

        self.ws
            .send(WsMessage::SetKeepalive(hello.heartbeat_interval))?;
        self.ws.send(WsMessage::Ws(client))?;

        info!("Reconnected to: {}", &self.info.endpoint);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        info!("Disconnected");
    }
}

fn generate_url(endpoint: &mut String) -> Result<Url> {
    if endpoint.ends_with(":80") {
        let len = endpoint.len();

        endpoint.truncate(len - 3);
    }

    Url::parse(&format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")).or(Err(Error::EndpointUrl))
}

async fn await_hello_and_ready(client: &mut dyn Signalling) -> Result<(Hello, Ready)> {
    let mut hello = None;
    let mut ready = None;

    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::Ready(r) => ready = Some(r),
            GatewayEvent::Hello(h) => hello = Some(h),
            other => {
                debug!("Expected ready/hello; got: {:?}", other);
            },
        }

        match (hello, ready) {
            (Some(h), Some(r)) => return Ok((h, r)),
            (h, r) => (hello, ready) = (h, r),
        }
    }
}

async fn init_cipher(client: &mut dyn Signalling, mode: CryptoMode) -> Result<SessionKey> {
    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::SessionDescription(desc) => {
                if desc.mode != mode.to_request_str() {
                    return Err(Error::CryptoModeInvalid);
                }

                return SessionKey::new(mode, &desc.secret_key);
            },
            other => {
                debug!("Expected ready for key; got: {:?}", other);
            },
        }
    }
}

/// Builds the IP discovery request announcing `ssrc`.
pub(crate) fn discovery_request(ssrc: u32) -> [u8; IP_DISCOVERY_LEN] {
    let mut bytes = [0; IP_DISCOVERY_LEN];

    if let Some(mut view) = MutableIpDiscoveryPacket::new(&mut bytes[..]) {
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(IP_DISCOVERY_BODY_LEN);
        view.set_ssrc(ssrc);
    }

    bytes
}

/// Extracts our external address and port from an IP discovery response.
pub(crate) fn parse_discovery_response(bytes: &[u8]) -> Result<(IpAddr, u16)> {
    if bytes.len() < IpDiscoveryPacket::const_packet_size() {
        return Err(Error::IllegalDiscoveryResponse);
    }

    let view = IpDiscoveryPacket::new(bytes).ok_or(Error::IllegalDiscoveryResponse)?;

    if view.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // A spoofed packet may not be NUL-padded, so the address ends at the first NUL.
    let address_raw = view.get_address_raw();
    let nul_byte_index = address_raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::IllegalIp)?;

    let address_str =
        std::str::from_utf8(&address_raw[..nul_byte_index]).map_err(|_| Error::IllegalIp)?;

    let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;

    Ok((address, view.get_port()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::test_utils::*;
    use std::{net::Ipv4Addr, time::Duration};
    use tokio::time::sleep;

    fn info() -> ConnectionInfo {
        ConnectionInfo::new(1_u64, 2_u64, "voice.example.net:80", "session", "token")
    }

    fn shared() -> Arc<DriverShared> {
        Arc::new(DriverShared::new(&Config::default()))
    }

    #[test]
    fn url_drops_plain_http_port() {
        let mut endpoint = String::from("voice.example.net:80");
        let url = generate_url(&mut endpoint).unwrap();

        assert_eq!(endpoint, "voice.example.net");
        assert_eq!(url.as_str(), "wss://voice.example.net/?v=4");

        let mut bad = String::from("[not a host");
        assert!(matches!(generate_url(&mut bad), Err(Error::EndpointUrl)));
    }

    #[test]
    fn discovery_request_layout() {
        let bytes = discovery_request(0x0102_0304);

        assert_eq!(&bytes[..8], &[0, 1, 0, 70, 1, 2, 3, 4]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn discovery_response_parsing() {
        let good = discovery_response(42, "198.51.100.23", 50_004);
        assert_eq!(
            parse_discovery_response(&good).unwrap(),
            (IpAddr::V4(Ipv4Addr::new(198, 51, 100, 23)), 50_004)
        );

        let mut request_type = good.clone();
        request_type[1] = 1;
        assert!(matches!(
            parse_discovery_response(&request_type),
            Err(Error::IllegalDiscoveryResponse)
        ));

        assert!(matches!(
            parse_discovery_response(&good[..20]),
            Err(Error::IllegalDiscoveryResponse)
        ));

        let mut unterminated = good.clone();
        unterminated[8..72].fill(b'1');
        assert!(matches!(
            parse_discovery_response(&unterminated),
            Err(Error::IllegalIp)
        ));

        let nonsense = discovery_response(42, "not-an-ip", 1);
        assert!(matches!(
            parse_discovery_response(&nonsense),
            Err(Error::IllegalIp)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_reaches_active_and_primes_silence() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.add_server();
        let peer = connector.add_udp();
        script_handshake(
            &server,
            &["xsalsa20_poly1305", "xsalsa20_poly1305_lite"],
            "xsalsa20_poly1305_lite",
        );

        let config = Config::default().connector(connector.clone());
        let shared = shared();
        let (interconnect, _core, _events) = test_interconnect();

        let conn = Connection::new(info(), &interconnect, &config, &shared, 1)
            .await
            .unwrap();

        assert_eq!(conn.ssrc, 42);
        assert!(conn.info.resume);
        assert_eq!(shared.phase(), ConnectionPhase::Active);
        assert_eq!(
            connector.urls.lock()[0].as_str(),
            "wss://voice.example.net/?v=4"
        );
        assert_eq!(
            connector.remotes.lock()[..],
            [SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000)]
        );

        let sent = server.sent();
        assert!(matches!(&sent[0], GatewayEvent::Identify(i) if i.session_id == "session"));
        match &sent[1] {
            GatewayEvent::SelectProtocol(p) => {
                assert_eq!(p.data.address.to_string(), DISCOVERED_ADDRESS);
                assert_eq!(p.data.port, DISCOVERED_PORT);
                assert_eq!(p.data.mode, "xsalsa20_poly1305_lite");
            },
            other => panic!("expected SelectProtocol, got {other:?}"),
        }

        sleep(Duration::from_millis(100)).await;

        let key = test_key(CryptoMode::Lite);
        let voice = peer.voice_traffic();
        assert_eq!(voice.len(), PRIMING_SILENCE_FRAMES);
        for pkt in &voice {
            let (header, body) = open_voice_packet(&key, pkt);
            assert_eq!(header.ssrc, 42);
            assert_eq!(body, SILENT_FRAME);
        }

        drop(conn);
    }

    #[tokio::test(start_paused = true)]
    async fn resumable_sessions_open_with_resume() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.add_server();
        let _peer = connector.add_udp();
        script_handshake(&server, &["xsalsa20_poly1305_suffix"], "xsalsa20_poly1305_suffix");

        let config = Config::default().connector(connector.clone());
        let (interconnect, _core, _events) = test_interconnect();
        let mut info = info();
        info.resume = true;

        let _conn = Connection::new(info, &interconnect, &config, &shared(), 1)
            .await
            .unwrap();

        let sent = server.sent();
        assert!(matches!(&sent[0], GatewayEvent::Resume(r) if r.token == "token"));
        assert!(!sent
            .iter()
            .any(|evt| matches!(evt, GatewayEvent::Identify(_))));
    }

    #[tokio::test]
    async fn no_shared_crypto_mode_fails_before_udp() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.add_server();
        script_handshake(&server, &["aead_aes256_gcm"], "aead_aes256_gcm");

        let config = Config::default().connector(connector.clone());
        let (interconnect, _core, _events) = test_interconnect();

        let res = Connection::new(info(), &interconnect, &config, &shared(), 1).await;

        assert!(matches!(res, Err(Error::CryptoModeUnavailable)));
        assert!(connector.remotes.lock().is_empty());
    }

    #[tokio::test]
    async fn session_description_must_confirm_mode() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.add_server();
        let _peer = connector.add_udp();
        script_handshake(&server, &["xsalsa20_poly1305_lite"], "xsalsa20_poly1305");

        let config = Config::default().connector(connector.clone());
        let (interconnect, _core, _events) = test_interconnect();

        let res = Connection::new(info(), &interconnect, &config, &shared(), 1).await;

        assert!(matches!(res, Err(Error::CryptoModeInvalid)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let connector = Arc::new(FakeConnector::default());
        let _server = connector.add_server();

        let config = Config::default()
            .connector(connector.clone())
            .driver_timeout(Some(Duration::from_secs(1)));
        let (interconnect, _core, _events) = test_interconnect();

        let res = Connection::new(info(), &interconnect, &config, &shared(), 1).await;

        assert!(matches!(res, Err(Error::TimedOut)));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_hands_new_socket_to_signalling() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.add_server();
        let _peer = connector.add_udp();
        script_handshake(&server, &["xsalsa20_poly1305_lite"], "xsalsa20_poly1305_lite");

        let config = Config::default().connector(connector.clone());
        let shared = shared();
        let (interconnect, _core, _events) = test_interconnect();

        let mut conn = Connection::new(info(), &interconnect, &config, &shared, 1)
            .await
            .unwrap();

        let resumed = connector.add_server();
        resumed.push(GatewayEvent::from(Hello {
            heartbeat_interval: 5_000.0,
        }));
        resumed.push(GatewayEvent::Resumed);

        conn.reconnect(&config).await.unwrap();

        conn.ws.send(WsMessage::Speaking(true)).unwrap();
        sleep(Duration::from_millis(10)).await;

        let sent = resumed.sent();
        assert!(matches!(&sent[0], GatewayEvent::Resume(r) if r.session_id == "session"));
        assert!(sent
            .iter()
            .any(|evt| matches!(evt, GatewayEvent::Speaking(_))));
    }
}
