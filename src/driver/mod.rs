//! Runner for a voice connection.
//!
//! The driver is a fully asynchronous system: connection management, packet
//! pacing, encryption, and event handling each run as their own task. Audio
//! written through a [`TransmitSink`] (or [`Driver::enqueue_raw`]) is encoded
//! and sent by the packet scheduler at the rate of playback, while received
//! packets are decrypted, decoded and surfaced as events.

#[cfg(feature = "internals")]
pub mod bench_internals;

pub(crate) mod connection;
mod connector;
mod crypto;
mod decode_mode;
mod directory;
mod format;
pub mod opus;
mod pool;
mod queue;
pub mod retry;
mod rtp;
mod sequence;
mod sink;
pub(crate) mod state;
pub(crate) mod tasks;
#[cfg(test)]
pub(crate) mod test_utils;

use connection::error::{Error, Result};
pub use self::{
    connector::{Connector, DefaultConnector, UdpTransport},
    crypto::CryptoMode,
    decode_mode::DecodeMode,
    directory::UserDirectory,
    format::AudioFormat,
    pool::{BufferPool, PoolStats, PooledBuffer},
    queue::{OutboundQueue, RawOutboundPacket},
    sink::{Filter, TransmitSink},
    state::ConnectionPhase,
};
pub use audiopus::{Bitrate, Channels, SampleRate};

use crate::{
    error::{AudioError, AudioResult},
    events::EventData,
    Config,
    ConnectionInfo,
    Event,
    EventHandler,
};
use byteorder::{ByteOrder, LittleEndian};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use flume::{r#async::RecvFut, SendError, Sender};
use state::DriverShared;
use std::{sync::Arc, time::Duration};
use tasks::message::CoreMessage;
use tokio::{select, sync::watch};
use tracing::{info, instrument};

/// The control object for a voice connection, handling connection,
/// encoding, en/decryption, pacing, and event generation.
///
/// Dropping a driver disposes of it.
#[derive(Debug)]
pub struct Driver {
    config: Config,
    sender: Sender<CoreMessage>,
    shared: Arc<DriverShared>,
}

impl Driver {
    /// Creates a new voice driver.
    ///
    /// This will create the core voice tasks in the background, and so must be
    /// called from within a tokio runtime.
    #[inline]
    #[must_use]
    pub fn new(config: Config) -> Self {
        let shared = Arc::new(DriverShared::new(&config));
        let sender = Self::start_inner(config.clone(), shared.clone());

        Driver {
            config,
            sender,
            shared,
        }
    }

    fn start_inner(config: Config, shared: Arc<DriverShared>) -> Sender<CoreMessage> {
        let (tx, rx) = flume::unbounded();

        tasks::start(config, shared, rx, tx.clone());

        tx
    }

    fn restart_inner(&mut self) {
        self.sender = Self::start_inner(self.config.clone(), self.shared.clone());
    }

    /// Connects to a voice server using the specified session details.
    ///
    /// This method instantly contacts the driver tasks, and its
    /// does not need to be `await`ed to start the actual connection.
    /// Any existing connection is dropped.
    #[instrument(skip(self))]
    pub fn connect(&mut self, info: ConnectionInfo) -> Connect {
        let (tx, rx) = flume::bounded(1);

        self.send(CoreMessage::ConnectWithResult(info, tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Leaves the current voice session, disconnecting from it.
    ///
    /// Queued audio is discarded. Event handlers are kept.
    #[instrument(skip(self))]
    pub fn leave(&mut self) {
        self.send(CoreMessage::Disconnect);
    }

    /// Applies a new voice server endpoint and token for the current session.
    ///
    /// If either differs from the current values, the driver re-establishes
    /// the connection against the new server.
    #[instrument(skip(self, token))]
    pub fn update_server(&mut self, endpoint: String, token: String) {
        self.send(CoreMessage::ServerUpdate(endpoint, token));
    }

    /// Creates a sink which cuts written PCM into frames of `duration_ms`
    /// and queues them for transmission.
    ///
    /// Frames may last 20, 40 or 60ms.
    pub fn transmit_sink(&self, duration_ms: u32) -> AudioResult<TransmitSink> {
        TransmitSink::new(
            self.config.audio_format,
            duration_ms,
            self.shared.queue.clone(),
            self.shared.pool.clone(),
        )
    }

    /// Queues one frame of little-endian 16-bit PCM, bypassing any sink filters.
    ///
    /// Frames shorter than `duration_ms` are padded with silence.
    #[instrument(skip(self, pcm), fields(len = pcm.len()))]
    pub async fn enqueue_raw(&self, pcm: &[u8], duration_ms: u32) -> AudioResult<()> {
        let format = self.config.audio_format;

        if !format.is_valid_duration(duration_ms) {
            return Err(AudioError::InvalidFrameDuration(duration_ms));
        }

        let max = format.frame_size(duration_ms);
        if pcm.len() > max {
            return Err(AudioError::FrameTooLarge {
                len: pcm.len(),
                max,
            });
        }

        let mut buffer = self.shared.pool.rent(format.sample_count(duration_ms))?;
        let whole = pcm.len() / 2;
        LittleEndian::read_i16_into(&pcm[..whole * 2], &mut buffer[..whole]);

        self.shared
            .queue
            .enqueue(RawOutboundPacket::audio(buffer, duration_ms))
            .await
    }

    /// Holds outgoing packets until [`resume`] is called.
    ///
    /// Nothing is lost while paused; writers wait once the queue fills.
    ///
    /// [`resume`]: Driver::resume
    #[instrument(skip(self))]
    pub fn pause(&self) {
        self.shared.pause.send_replace(true);
    }

    /// Resumes sending after a [`pause`].
    ///
    /// [`pause`]: Driver::pause
    #[instrument(skip(self))]
    pub fn resume(&self) {
        self.shared.pause.send_replace(false);
    }

    /// Whether outgoing audio is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.shared.pause.borrow()
    }

    /// Waits until every queued frame, and the silence which follows it, has been sent.
    ///
    /// Returns immediately when nothing is queued, and early if the driver is disposed.
    pub async fn wait_for_playback_finished(&self) {
        let mut playback = self.shared.playback.subscribe();
        let queue = &self.shared.queue;

        select! {
            () = self.shared.cancel.cancelled() => {},
            _ = playback.wait_for(|state| !state.playing && queue.pending() == 0) => {},
        }
    }

    /// Current stage of the voice connection.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.shared.phase()
    }

    /// Subscribes to changes of [`phase`].
    ///
    /// [`phase`]: Driver::phase
    #[must_use]
    pub fn phase_watch(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase.subscribe()
    }

    /// Attach a global event handler to the driver.
    ///
    /// Handlers run one at a time on a dedicated task, in the order events occur.
    /// A slow handler delays later events but never outgoing audio.
    #[instrument(skip(self, action))]
    pub fn add_global_event<F: EventHandler + 'static>(&mut self, event: Event, action: F) {
        self.send(CoreMessage::AddEvent(EventData::new(event, action)));
    }

    /// Removes all global event handlers from the driver.
    #[instrument(skip(self))]
    pub fn remove_all_global_events(&mut self) {
        self.send(CoreMessage::RemoveGlobalEvents);
    }

    /// Latest round-trip time of a websocket heartbeat.
    #[must_use]
    pub fn ws_rtt(&self) -> Option<Duration> {
        *self.shared.ws_rtt.lock()
    }

    /// Latest round-trip time of a UDP keepalive.
    #[must_use]
    pub fn udp_rtt(&self) -> Option<Duration> {
        *self.shared.udp_rtt.lock()
    }

    /// Usage counters of this driver's frame buffers.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// The configuration this driver was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops all background tasks and releases the connection.
    ///
    /// Queued audio is dropped, writers receive [`AudioError::QueueClosed`],
    /// and later connection attempts fail. Calling this more than once is harmless.
    #[instrument(skip(self))]
    pub fn dispose(&mut self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }

        info!("Disposing of driver.");

        self.shared.queue.close();
        self.shared.abandon_playback();
        self.shared.set_phase(ConnectionPhase::Disposed);
        self.shared.cancel.cancel();
        drop(self.sender.send(CoreMessage::Poison));
    }

    /// Sends a message to the inner tasks, restarting it if necessary.
    fn send(&mut self, status: CoreMessage) {
        if self.shared.cancel.is_cancelled() {
            return;
        }

        // Restart thread if it errored.
        if let Err(SendError(status)) = self.sender.send(status) {
            self.restart_inner();

            drop(self.sender.send(status));
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Future for a call to [`Driver::connect`].
///
/// This future awaits the *result* of a connection; the driver
/// is messaged at the time of the call.
pub struct Connect {
    inner: RecvFut<'static, Result<()>>,
}

impl Future for Connect {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(r) => Poll::Ready(r.map_err(|_| Error::AttemptDiscarded).and_then(|x| x)),
            Poll::Pending => Poll::Pending,
        }
    }
}
