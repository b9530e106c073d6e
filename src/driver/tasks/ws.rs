use super::{
    heartbeat,
    message::*,
    udp_rx::{AudioSender, SenderMap},
};
use crate::{
    driver::{crypto::SessionKey, state::DriverShared, CryptoMode, UserDirectory},
    events::{context::internal_data::*, CoreContext},
    id::UserId,
    model::{
        payload::{ClientConnect, ClientDisconnect, Heartbeat, HeartbeatAck, SessionDescription, Speaking},
        Event as GatewayEvent,
        SpeakingState,
    },
    ws::{Error as WsError, Signalling},
};
use flume::Receiver;
use rand::random;
use std::{sync::Arc, time::Duration};
use tokio::{select, sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

pub(crate) struct AuxNetwork {
    rx: Receiver<WsMessage>,
    ws_client: Box<dyn Signalling>,
    dont_send: bool,

    ssrc: u32,
    heartbeat_interval: watch::Sender<Duration>,

    speaking: SpeakingState,
    last_heartbeat: Option<(u64, Instant)>,

    attempt_idx: usize,
    senders: SenderMap,
    session_key: watch::Sender<SessionKey>,
    directory: Option<Arc<dyn UserDirectory>>,
    shared: Arc<DriverShared>,
}

impl AuxNetwork {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        evt_rx: Receiver<WsMessage>,
        ws_client: Box<dyn Signalling>,
        ssrc: u32,
        heartbeat_interval: watch::Sender<Duration>,
        attempt_idx: usize,
        senders: SenderMap,
        session_key: watch::Sender<SessionKey>,
        directory: Option<Arc<dyn UserDirectory>>,
        shared: Arc<DriverShared>,
    ) -> Self {
        Self {
            rx: evt_rx,
            ws_client,
            dont_send: false,

            ssrc,
            heartbeat_interval,

            speaking: SpeakingState::empty(),
            last_heartbeat: None,

            attempt_idx,
            senders,
            session_key,
            directory,
            shared,
        }
    }

    #[instrument(skip(self, interconnect, cancel))]
    async fn run(&mut self, interconnect: &Interconnect, cancel: CancellationToken) {
        loop {
            let mut ws_error = None;

            select! {
                () = cancel.cancelled() => break,
                ws_msg = self.ws_client.recv_json(), if !self.dont_send => {
                    match ws_msg {
                        Err(e) => ws_error = Some(e),
                        Ok(Some(msg)) => self.process_ws(interconnect, msg),
                        Ok(None) => {},
                    }
                },
                inner_msg = self.rx.recv_async() => {
                    match inner_msg {
                        Ok(WsMessage::Ws(data)) => {
                            self.ws_client = data;
                            self.dont_send = false;
                        },
                        Ok(WsMessage::SetKeepalive(keepalive)) => {
                            self.heartbeat_interval
                                .send_replace(heartbeat::interval_from_millis(keepalive));
                        },
                        Ok(WsMessage::Speaking(is_speaking)) => {
                            if let Err(e) = self.set_speaking(is_speaking).await {
                                ws_error = Some(e);
                            }
                        },
                        Ok(WsMessage::Heartbeat) => {
                            if let Err(e) = self.send_heartbeat().await {
                                ws_error = Some(e);
                            }
                        },
                        Err(flume::RecvError::Disconnected) => break,
                    }
                },
            }

            if let Some(e) = ws_error {
                self.dont_send = true;

                let will_resume = e.should_resume();
                warn!("Signalling failed ({e}); resumable: {will_resume}.");

                interconnect.fire(CoreContext::SocketError(InternalSocketError {
                    error: e,
                    will_resume,
                }));

                if will_resume {
                    drop(interconnect.core.send(CoreMessage::Reconnect(self.attempt_idx)));
                } else {
                    drop(
                        interconnect
                            .core
                            .send(CoreMessage::FullReconnect(self.attempt_idx)),
                    );
                    break;
                }
            }
        }

        if !self.dont_send {
            debug!("Closing voice gateway websocket.");
            if let Err(e) = self.ws_client.close().await {
                debug!("Websocket did not close cleanly: {e}.");
            }
        }
    }

    async fn set_speaking(&mut self, is_speaking: bool) -> Result<(), WsError> {
        if self.speaking.contains(SpeakingState::MICROPHONE) == is_speaking || self.dont_send {
            return Ok(());
        }

        self.speaking.set(SpeakingState::MICROPHONE, is_speaking);
        info!("Changing to {:?}", self.speaking);

        self.ws_client
            .send_json(&GatewayEvent::from(Speaking {
                delay: Some(0),
                speaking: self.speaking,
                ssrc: self.ssrc,
                user_id: None,
            }))
            .await
    }

    async fn send_heartbeat(&mut self) -> Result<(), WsError> {
        let nonce = random::<u64>();
        self.last_heartbeat = Some((nonce, Instant::now()));

        trace!("Sent heartbeat {:?}", self.speaking);

        if !self.dont_send {
            self.ws_client
                .send_json(&GatewayEvent::from(Heartbeat { nonce }))
                .await?;
        }

        Ok(())
    }

    fn display_name(&self, user: UserId) -> Option<String> {
        self.directory.as_ref().and_then(|d| d.display_name(user))
    }

    fn process_ws(&mut self, interconnect: &Interconnect, value: GatewayEvent) {
        match value {
            GatewayEvent::Speaking(ev) => self.on_speaking(interconnect, ev),
            GatewayEvent::ClientConnect(ev) => self.on_client_connect(interconnect, ev),
            GatewayEvent::ClientDisconnect(ev) => self.on_client_disconnect(interconnect, ev),
            GatewayEvent::HeartbeatAck(ev) => self.on_heartbeat_ack(ev),
            GatewayEvent::SessionDescription(desc) => self.renegotiate(desc),
            other => {
                trace!("Received other websocket data: {:?}", other);
            },
        }
    }

    fn on_speaking(&mut self, interconnect: &Interconnect, ev: Speaking) {
        let user_id = ev.user_id.map(UserId::from);

        if let Some(user_id) = user_id {
            self.senders
                .entry(ev.ssrc)
                .or_insert_with(|| AudioSender::new(ev.ssrc))
                .user_id = Some(user_id);
        }

        interconnect.fire(CoreContext::SpeakingStateUpdate(InternalSpeaking {
            ssrc: ev.ssrc,
            user_id,
            speaking: ev.speaking,
            display_name: user_id.and_then(|u| self.display_name(u)),
        }));
    }

    fn on_client_connect(&mut self, interconnect: &Interconnect, ev: ClientConnect) {
        let user_id = UserId::from(ev.user_id);

        if ev.audio_ssrc != 0 {
            self.senders
                .entry(ev.audio_ssrc)
                .or_insert_with(|| AudioSender::new(ev.audio_ssrc))
                .user_id = Some(user_id);
        }

        interconnect.fire(CoreContext::ClientConnect(InternalClientConnect {
            user_id,
            audio_ssrc: ev.audio_ssrc,
            display_name: self.display_name(user_id),
        }));
    }

    fn on_client_disconnect(&mut self, interconnect: &Interconnect, ev: ClientDisconnect) {
        let user_id = UserId::from(ev.user_id);

        self.senders
            .retain(|_, sender| sender.user_id != Some(user_id));

        interconnect.fire(CoreContext::ClientDisconnect(InternalClientDisconnect {
            user_id,
            display_name: self.display_name(user_id),
        }));
    }

    fn on_heartbeat_ack(&mut self, ev: HeartbeatAck) {
        if let Some((nonce, sent)) = self.last_heartbeat.take() {
            if ev.nonce == nonce {
                let rtt = sent.elapsed();
                trace!("Heartbeat ACK received after {rtt:?}.");
                *self.shared.ws_rtt.lock() = Some(rtt);
            } else {
                warn!(
                    "Heartbeat nonce mismatch! Expected {}, saw {}.",
                    nonce, ev.nonce
                );
            }
        }
    }

    fn renegotiate(&mut self, desc: SessionDescription) {
        let Some(mode) = CryptoMode::from_request_str(&desc.mode) else {
            warn!("Server switched to unsupported encryption mode {:?}.", desc.mode);
            return;
        };

        match SessionKey::new(mode, &desc.secret_key) {
            Ok(key) => {
                info!("Session key renegotiated ({:?}).", mode);
                self.session_key.send_replace(key);
            },
            Err(e) => warn!("Ignoring renegotiated session: {e}."),
        }
    }
}

#[instrument(skip(interconnect, aux, cancel))]
pub(crate) async fn runner(interconnect: Interconnect, mut aux: AuxNetwork, cancel: CancellationToken) {
    trace!("WS thread started.");
    aux.run(&interconnect, cancel).await;
    trace!("WS thread finished.");
}
