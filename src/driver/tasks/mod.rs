#![allow(missing_docs)]

pub mod error;
mod events;
pub(crate) mod heartbeat;
pub mod message;
pub(crate) mod sender;
pub(crate) mod udp_rx;
pub(crate) mod udp_tx;
pub(crate) mod ws;

use super::{
    connection::{error::Error as ConnectionError, Connection},
    state::{ConnectionPhase, DriverShared},
};
use crate::{
    events::{context::internal_data::*, context_data::DisconnectKind, CoreContext},
    Config,
    ConnectionInfo,
};
use flume::{Receiver, Sender};
use message::*;
use std::sync::Arc;
use tokio::{select, spawn, time::sleep};
use tracing::{debug, error, info, instrument, trace, warn};

pub(crate) fn start(
    config: Config,
    shared: Arc<DriverShared>,
    rx: Receiver<CoreMessage>,
    tx: Sender<CoreMessage>,
) {
    spawn(async move {
        trace!("Driver started.");
        let interconnect = start_internals(tx);
        Core::new(config, shared, interconnect).run(rx).await;
        trace!("Driver finished.");
    });
}

fn start_internals(core: Sender<CoreMessage>) -> Interconnect {
    let (evt_tx, evt_rx) = flume::unbounded();

    let interconnect = Interconnect {
        core,
        events: evt_tx,
    };

    spawn(async move {
        trace!("Event processor started.");
        events::runner(evt_rx).await;
        trace!("Event processor finished.");
    });

    interconnect
}

/// Owns the active [`Connection`] and reacts to requests from the driver handle and
/// failures reported by connection tasks.
struct Core {
    config: Config,
    shared: Arc<DriverShared>,
    interconnect: Interconnect,
    connection: Option<Connection>,
    /// Identifies the newest connection. Failures reported by older ones are ignored.
    attempt_idx: usize,
}

impl Core {
    fn new(config: Config, shared: Arc<DriverShared>, interconnect: Interconnect) -> Self {
        Self {
            config,
            shared,
            interconnect,
            connection: None,
            attempt_idx: 0,
        }
    }

    #[instrument(skip(self, rx))]
    async fn run(mut self, rx: Receiver<CoreMessage>) {
        loop {
            let msg = select! {
                () = self.shared.cancel.cancelled() => break,
                msg = rx.recv_async() => msg,
            };

            match msg {
                Ok(CoreMessage::ConnectWithResult(info, tx)) => {
                    self.connection = None;
                    self.attempt_idx += 1;

                    match self.connect_with_retry(&info).await {
                        Ok(conn) => {
                            self.interconnect
                                .fire(CoreContext::DriverConnect(connect_context(&conn)));

                            // Other side may not be listening: this is fine.
                            drop(tx.send(Ok(())));
                            self.connection = Some(conn);
                        },
                        Err(why) => {
                            self.shared.set_phase(ConnectionPhase::Idle);
                            self.interconnect.fire(CoreContext::DriverDisconnect(
                                InternalDisconnect::new(DisconnectKind::Connect, Some(&why), &info),
                            ));

                            drop(tx.send(Err(why)));
                        },
                    }
                },
                Ok(CoreMessage::Disconnect) => {
                    if let Some(conn) = self.connection.take() {
                        self.interconnect.fire(CoreContext::DriverDisconnect(
                            InternalDisconnect::new(DisconnectKind::Runtime, None, &conn.info),
                        ));
                    }
                    self.reset_session();
                },
                Ok(CoreMessage::ServerUpdate(endpoint, token)) => {
                    let Some(conn) = self.connection.as_mut() else {
                        debug!("Server update received while disconnected.");
                        continue;
                    };

                    if !conn.info.apply_server_update(endpoint, token) {
                        continue;
                    }

                    let info = conn.info.clone();
                    info!("Voice server changed, reconnecting.");
                    self.connection = None;
                    self.full_reconnect(info).await;
                },
                Ok(CoreMessage::AddEvent(evt)) => {
                    drop(
                        self.interconnect
                            .events
                            .send(EventMessage::AddGlobalEvent(evt)),
                    );
                },
                Ok(CoreMessage::RemoveGlobalEvents) => {
                    drop(
                        self.interconnect
                            .events
                            .send(EventMessage::RemoveGlobalEvents),
                    );
                },
                Ok(CoreMessage::Reconnect(idx)) if idx == self.attempt_idx => {
                    self.resume().await;
                },
                Ok(CoreMessage::FullReconnect(idx)) if idx == self.attempt_idx => {
                    if let Some(conn) = self.connection.take() {
                        let mut info = conn.info.clone();
                        info.resume = false;
                        drop(conn);

                        self.full_reconnect(info).await;
                    }
                },
                Ok(CoreMessage::Reconnect(idx) | CoreMessage::FullReconnect(idx)) => {
                    trace!(
                        "Ignoring reconnect request from stale connection {} (current {}).",
                        idx,
                        self.attempt_idx
                    );
                },
                Err(_) | Ok(CoreMessage::Poison) => {
                    break;
                },
            }
        }

        trace!("Main thread exited");
        if let Some(conn) = self.connection.take() {
            self.interconnect
                .fire(CoreContext::DriverDisconnect(InternalDisconnect::new(
                    DisconnectKind::Runtime,
                    None,
                    &conn.info,
                )));
        }
        self.interconnect.poison();
    }

    /// Establishes a connection, retrying according to [`Config::driver_retry`].
    async fn connect_with_retry(&self, info: &ConnectionInfo) -> Result<Connection, ConnectionError> {
        let mut retries = 0;
        let mut last_wait = None;

        loop {
            let attempt = select! {
                () = self.shared.cancel.cancelled() => Err(ConnectionError::AttemptDiscarded),
                res = Connection::new(
                    info.clone(),
                    &self.interconnect,
                    &self.config,
                    &self.shared,
                    self.attempt_idx,
                ) => res,
            };

            let why = match attempt {
                Ok(conn) => return Ok(conn),
                Err(why) if why.should_retry() => why,
                Err(why) => return Err(why),
            };

            let Some(wait) = self.config.driver_retry.next_delay(retries, last_wait) else {
                return Err(why);
            };

            warn!("Connection attempt failed ({why}); retrying in {wait:?}.");
            retries += 1;
            last_wait = Some(wait);

            select! {
                () = self.shared.cancel.cancelled() => return Err(ConnectionError::AttemptDiscarded),
                () = sleep(wait) => {},
            }
        }
    }

    /// Replaces the connection with a freshly identified one.
    async fn full_reconnect(&mut self, info: ConnectionInfo) {
        self.attempt_idx += 1;
        self.shared.set_phase(ConnectionPhase::Reconnecting);

        match self.connect_with_retry(&info).await {
            Ok(conn) => {
                self.interconnect
                    .fire(CoreContext::DriverReconnect(connect_context(&conn)));
                self.connection = Some(conn);
            },
            Err(why) => {
                error!("Catastrophic connection failure. Stopping. {:?}", why);
                self.interconnect
                    .fire(CoreContext::DriverDisconnect(InternalDisconnect::new(
                        DisconnectKind::Reconnect,
                        Some(&why),
                        &info,
                    )));
                self.reset_session();
            },
        }
    }

    /// Resumes the session over a new websocket, falling back to a full reconnect.
    async fn resume(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };

        self.shared.set_phase(ConnectionPhase::Reconnecting);

        let res = select! {
            () = self.shared.cancel.cancelled() => Err(ConnectionError::AttemptDiscarded),
            res = conn.reconnect(&self.config) => res,
        };

        match res {
            Ok(()) => {
                self.shared.set_phase(ConnectionPhase::Active);
                self.interconnect
                    .fire(CoreContext::DriverReconnect(connect_context(conn)));
            },
            Err(why) => {
                warn!("Resume failed ({why}); identifying afresh.");

                let mut info = conn.info.clone();
                info.resume = false;
                self.connection = None;

                self.full_reconnect(info).await;
            },
        }
    }

    /// Discards queued audio and per-session measurements.
    fn reset_session(&mut self) {
        self.shared.queue.clear();
        self.shared.abandon_playback();
        self.shared.clear_rtt();
        self.shared.set_phase(ConnectionPhase::Idle);
    }
}

fn connect_context(conn: &Connection) -> InternalConnect {
    InternalConnect {
        guild_id: conn.info.guild_id,
        server: conn.info.endpoint.clone(),
        session_id: conn.info.session_id.clone(),
        ssrc: conn.ssrc,
    }
}
