use crate::{
    error::ConnectionError,
    id::*,
    model::CloseCode as VoiceCloseCode,
    ws::Error as WsError,
};

/// Voice connection details gathered at termination or failure.
///
/// In the event of a failure, this event data is gathered after
/// a reconnection strategy has exhausted all of its attempts.
#[derive(Debug)]
#[non_exhaustive]
pub struct DisconnectData<'a> {
    /// The location that a voice connection was terminated.
    pub kind: DisconnectKind,
    /// The cause of any connection failure.
    ///
    /// If `None`, then this disconnect was requested by the user in some way
    /// (i.e., leaving or disposing of the driver).
    pub reason: Option<DisconnectReason>,
    /// ID of the voice channel being joined, if it is known.
    pub channel_id: Option<ChannelId>,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: &'a str,
}

/// The location that a voice connection was terminated.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DisconnectKind {
    /// The voice driver failed to connect to the server.
    Connect,
    /// The voice driver failed to reconnect to the server.
    Reconnect,
    /// The voice connection was terminated mid-session by either
    /// the user or the server.
    ///
    /// If `reason == None`, then this disconnection was requested by the user.
    Runtime,
}

/// The reason that a voice connection failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// This (re)connection attempt was dropped due to another request.
    AttemptDiscarded,
    /// The driver had an internal error.
    Internal,
    /// A host-specific I/O error caused the fault; this is likely transient, and
    /// should be retried some time later.
    Io,
    /// The client and server disagreed on the protocol used to establish a
    /// voice connection.
    ProtocolViolation,
    /// A voice connection was not established in the specified time.
    TimedOut,
    /// The websocket connection was closed by the server.
    ///
    /// This typically indicates that the voice session has expired,
    /// and a new one needs to be requested via the gateway.
    WsClosed(Option<VoiceCloseCode>),
}

impl From<&ConnectionError> for DisconnectReason {
    fn from(e: &ConnectionError) -> Self {
        use ConnectionError::*;

        match e {
            AttemptDiscarded => Self::AttemptDiscarded,
            CryptoModeInvalid
            | CryptoModeUnavailable
            | CryptoInvalidLength
            | EndpointUrl
            | IllegalDiscoveryResponse
            | IllegalIp
            | Json(_) => Self::ProtocolViolation,
            Io(_) => Self::Io,
            Crypto(_) | InterconnectFailure(_) | Opus(_) => Self::Internal,
            Ws(ws) => ws.into(),
            TimedOut => Self::TimedOut,
        }
    }
}

impl From<&WsError> for DisconnectReason {
    fn from(e: &WsError) -> Self {
        Self::WsClosed(e.voice_close_code())
    }
}
