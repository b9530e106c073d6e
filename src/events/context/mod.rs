//! Details of the occurrence which fired an event.

pub mod data;
pub(crate) mod internal_data;

use super::*;
pub use data as context_data;
use data::*;
use internal_data::*;

/// Information about the occurrence which fired an event.
#[derive(Debug)]
#[non_exhaustive]
pub enum EventContext<'a> {
    /// Speaking state update, typically describing how another voice
    /// user is transmitting audio data. Clients must send at least one such
    /// packet to allow SSRC/UserID matching.
    SpeakingStateUpdate(SpeakingData<'a>),
    /// Fired whenever a client connects.
    ClientConnect(ClientConnectData<'a>),
    /// Fired whenever a client disconnects.
    ClientDisconnect(ClientDisconnectData<'a>),
    /// Opus audio frame, received from another stream or synthesised to cover a loss.
    VoicePacket(VoiceData<'a>),
    /// The signalling channel failed or was closed.
    SocketError(SocketErrorData<'a>),
    /// Fires when this driver successfully connects to a voice channel.
    DriverConnect(ConnectData<'a>),
    /// Fires when this driver successfully reconnects after a network error.
    DriverReconnect(ConnectData<'a>),
    /// Fires when this driver fails to connect to, or drops from, a voice channel.
    DriverDisconnect(DisconnectData<'a>),
}

/// Owned event details, sent from driver tasks to the event dispatcher.
#[derive(Debug)]
pub(crate) enum CoreContext {
    SpeakingStateUpdate(InternalSpeaking),
    ClientConnect(InternalClientConnect),
    ClientDisconnect(InternalClientDisconnect),
    VoicePacket(InternalVoicePacket),
    SocketError(InternalSocketError),
    DriverConnect(InternalConnect),
    DriverReconnect(InternalConnect),
    DriverDisconnect(InternalDisconnect),
}

impl<'a> CoreContext {
    pub(crate) fn to_user_context(&'a self) -> EventContext<'a> {
        match self {
            Self::SpeakingStateUpdate(evt) =>
                EventContext::SpeakingStateUpdate(SpeakingData::from(evt)),
            Self::ClientConnect(evt) => EventContext::ClientConnect(ClientConnectData::from(evt)),
            Self::ClientDisconnect(evt) =>
                EventContext::ClientDisconnect(ClientDisconnectData::from(evt)),
            Self::VoicePacket(evt) => EventContext::VoicePacket(VoiceData::from(evt)),
            Self::SocketError(evt) => EventContext::SocketError(SocketErrorData::from(evt)),
            Self::DriverConnect(evt) => EventContext::DriverConnect(ConnectData::from(evt)),
            Self::DriverReconnect(evt) => EventContext::DriverReconnect(ConnectData::from(evt)),
            Self::DriverDisconnect(evt) =>
                EventContext::DriverDisconnect(DisconnectData::from(evt)),
        }
    }
}

impl EventContext<'_> {
    /// Retrieve the event class for an event (i.e., when matching
    /// an event against the registered listeners).
    #[must_use]
    pub fn to_core_event(&self) -> CoreEvent {
        match self {
            Self::SpeakingStateUpdate(_) => CoreEvent::SpeakingStateUpdate,
            Self::ClientConnect(_) => CoreEvent::ClientConnect,
            Self::ClientDisconnect(_) => CoreEvent::ClientDisconnect,
            Self::VoicePacket(_) => CoreEvent::VoicePacket,
            Self::SocketError(_) => CoreEvent::SocketError,
            Self::DriverConnect(_) => CoreEvent::DriverConnect,
            Self::DriverReconnect(_) => CoreEvent::DriverReconnect,
            Self::DriverDisconnect(_) => CoreEvent::DriverDisconnect,
        }
    }
}
