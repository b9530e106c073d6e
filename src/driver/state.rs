//! Connection lifecycle and state shared between the driver handle and its tasks.

use super::{pool::BufferPool, queue::OutboundQueue};
use crate::Config;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle stage of a driver's voice connection.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ConnectionPhase {
    /// No connection exists or is being attempted.
    #[default]
    Idle,
    /// The websocket is open and Identify (or Resume) has been sent.
    Identifying,
    /// Waiting for the server's Hello and Ready.
    AwaitingReady,
    /// Performing IP discovery over the new UDP transport.
    DiscoveringEndpoint,
    /// Announcing this client's address and encryption mode.
    SelectingProtocol,
    /// Waiting for the session key.
    AwaitingSessionDescription,
    /// Voice traffic may flow.
    Active,
    /// Signalling was lost and a resume or reconnect is underway.
    Reconnecting,
    /// The driver has been disposed of and cannot connect again.
    Disposed,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct PlaybackState {
    pub playing: bool,
    pub completed: u64,
}

/// State shared between a [`Driver`] handle and its background tasks.
///
/// [`Driver`]: super::Driver
#[derive(Debug)]
pub(crate) struct DriverShared {
    pub queue: OutboundQueue,
    pub pool: BufferPool,
    pub pause: watch::Sender<bool>,
    pub playback: watch::Sender<PlaybackState>,
    pub phase: watch::Sender<ConnectionPhase>,
    pub ws_rtt: Mutex<Option<Duration>>,
    pub udp_rtt: Mutex<Option<Duration>>,
    pub cancel: CancellationToken,
}

impl DriverShared {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            queue: OutboundQueue::new(config.queue_capacity),
            pool: BufferPool::new(config.max_pooled_buffers),
            pause: watch::channel(false).0,
            playback: watch::channel(PlaybackState::default()).0,
            phase: watch::channel(ConnectionPhase::Idle).0,
            ws_rtt: Mutex::new(None),
            udp_rtt: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Moves to `phase`. Disposal is terminal.
    pub(crate) fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.send_if_modified(|current| {
            if *current == phase || *current == ConnectionPhase::Disposed {
                false
            } else {
                debug!("Connection phase {:?} -> {:?}.", current, phase);
                *current = phase;
                true
            }
        });
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    pub(crate) fn begin_playback(&self) {
        self.playback
            .send_if_modified(|state| !std::mem::replace(&mut state.playing, true));
    }

    /// Completes an armed playback. Does nothing if no audio was playing.
    pub(crate) fn finish_playback(&self) {
        self.playback.send_if_modified(|state| {
            if !state.playing {
                return false;
            }
            state.playing = false;
            state.completed += 1;
            true
        });
    }

    /// Ends playback without counting it as completed, e.g. when queued audio is discarded.
    pub(crate) fn abandon_playback(&self) {
        self.playback
            .send_if_modified(|state| std::mem::replace(&mut state.playing, false));
    }

    pub(crate) fn clear_rtt(&self) {
        *self.ws_rtt.lock() = None;
        *self.udp_rtt.lock() = None;
    }
}
