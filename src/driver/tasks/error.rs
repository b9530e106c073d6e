use super::message::*;
use crate::ws::Error as WsError;
use audiopus::Error as OpusError;
use crypto_secretbox::aead::Error as CryptoError;
use flume::SendError;
use std::{
    error::Error as StdError,
    fmt,
    io::{Error as IoError, ErrorKind as IoErrorKind},
};

/// Background task a failed message was addressed to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recipient {
    AuxNetwork,
    Core,
    Event,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-packet and per-message faults inside the connection tasks.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Crypto(CryptoError),
    /// Received an illegal voice packet on the voice UDP socket.
    IllegalVoicePacket,
    InterconnectFailure(Recipient),
    Io(IoError),
    Opus(OpusError),
    Ws(WsError),
}

impl Error {
    // This prevents a `WouldBlock` from triggering a full reconnect,
    // instead simply dropping the packet.
    pub(crate) fn disarm_would_block(self) -> Result<()> {
        match self {
            Self::Io(i) if i.kind() == IoErrorKind::WouldBlock => Ok(()),
            e => Err(e),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<OpusError> for Error {
    fn from(e: OpusError) -> Error {
        Error::Opus(e)
    }
}

impl From<SendError<WsMessage>> for Error {
    fn from(_e: SendError<WsMessage>) -> Error {
        Error::InterconnectFailure(Recipient::AuxNetwork)
    }
}

impl From<SendError<CoreMessage>> for Error {
    fn from(_e: SendError<CoreMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Core)
    }
}

impl From<SendError<EventMessage>> for Error {
    fn from(_e: SendError<EventMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Event)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        Error::Ws(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Crypto(_) => write!(f, "packet failed authentication"),
            Error::IllegalVoicePacket => write!(f, "illegal voice packet"),
            Error::InterconnectFailure(r) => write!(f, "failed to contact other task ({r:?})"),
            Error::Io(e) => write!(f, "socket failure: {e}"),
            Error::Opus(e) => write!(f, "opus failure: {e}"),
            Error::Ws(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Opus(e) => Some(e),
            Error::Ws(e) => Some(e),
            Error::Crypto(_) | Error::IllegalVoicePacket | Error::InterconnectFailure(_) => None,
        }
    }
}
