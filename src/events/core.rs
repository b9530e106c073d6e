/// Voice core events occur on receipt of voice packets, signalling
/// messages, and changes in connection state.
///
/// Core events persist while the `action` in [`EventData`]
/// returns `None`.
///
/// ## Events from other users
/// The driver can observe when a user changes speaking state ([`SpeakingStateUpdate`]),
/// joins the session ([`ClientConnect`]) or leaves it ([`ClientDisconnect`]).
/// Received audio is surfaced through [`VoicePacket`], whose contents depend
/// on the configured [`DecodeMode`].
///
/// To obtain a user's SSRC, you must use [`SpeakingStateUpdate`] or [`ClientConnect`] events.
///
/// [`EventData`]: super::EventData
/// [`SpeakingStateUpdate`]: Self::SpeakingStateUpdate
/// [`ClientConnect`]: Self::ClientConnect
/// [`ClientDisconnect`]: Self::ClientDisconnect
/// [`VoicePacket`]: Self::VoicePacket
/// [`DecodeMode`]: crate::driver::DecodeMode
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CoreEvent {
    /// Speaking state update from the WS gateway, typically describing how another voice
    /// user is transmitting audio data. Clients must send at least one such
    /// packet to allow SSRC/UserID matching.
    SpeakingStateUpdate,

    /// Fires whenever a user connects to the same stream as the bot.
    ClientConnect,

    /// Fires whenever a user disconnects from the same stream as the bot.
    ClientDisconnect,

    /// Fires once per received voice frame, and once per frame synthesised
    /// to conceal packet loss.
    VoicePacket,

    /// Fires when the signalling channel fails or is closed by the server.
    SocketError,

    /// Fires when this driver successfully connects to a voice channel.
    DriverConnect,

    /// Fires when this driver successfully reconnects after a network error.
    DriverReconnect,

    /// Fires when this driver fails to connect to, or drops from, a voice channel.
    DriverDisconnect,
}
