//! Websocket transport for the voice gateway.

use crate::model::{CloseCode as VoiceCloseCode, Event, FromPrimitive};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, instrument};
use url::Url;

/// A JSON message channel to the voice gateway.
///
/// [`WsStream`] is the production implementation; the driver obtains one per
/// (re)connection attempt from its [`Connector`].
///
/// [`Connector`]: crate::driver::Connector
#[async_trait]
pub trait Signalling: Send {
    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` for frames which carry no gateway message,
    /// such as pings or malformed JSON.
    async fn recv_json(&mut self) -> Result<Option<Event>>;

    /// Sends one message.
    async fn send_json(&mut self, value: &Event) -> Result<()>;

    /// Closes the channel.
    async fn close(&mut self) -> Result<()>;
}

/// Websocket connection to the voice gateway over TLS.
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    #[instrument]
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(Config {
                max_message_size: None,
                max_frame_size: None,
                ..Default::default()
            }),
            true,
        )
        .await?;

        Ok(Self(stream))
    }
}

#[async_trait]
impl Signalling for WsStream {
    async fn recv_json(&mut self) -> Result<Option<Event>> {
        match self.0.next().await {
            Some(Ok(msg)) => convert_ws_message(msg),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }

    async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;
        Ok(self.0.send(Message::Text(text)).await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.0.close(None).await?)
    }
}

/// Convenience type for websocket error handling.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a [`Signalling`] channel.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A message could not be (de)serialized.
    Json(JsonError),

    /// The voice gateway does not support or offer zlib compression.
    /// As a result, only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    /// The underlying websocket failed.
    Ws(TungsteniteError),

    /// The remote end closed the websocket, with an optional close frame.
    WsClosed(Option<CloseFrame<'static>>),
}

impl Error {
    /// The raw close code sent by the remote end, if any.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::WsClosed(Some(frame)) => Some(u16::from(frame.code)),
            _ => None,
        }
    }

    /// The voice gateway's interpretation of the close code, if it defines one.
    #[must_use]
    pub fn voice_close_code(&self) -> Option<VoiceCloseCode> {
        self.close_code().and_then(VoiceCloseCode::from_u16)
    }

    /// Whether the session may be resumed after this error.
    ///
    /// Only close codes which invalidate the session force a new identify;
    /// transport faults and unknown codes may resume.
    #[must_use]
    pub fn should_resume(&self) -> bool {
        match self.voice_close_code() {
            Some(code) => code.should_resume(),
            None => {
                debug!("Error sending/receiving ws {:?}.", self);
                true
            },
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        match e {
            TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed =>
                Error::WsClosed(None),
            e => Error::Ws(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(e) => write!(f, "malformed gateway message: {e}"),
            Error::UnexpectedBinaryMessage(b) =>
                write!(f, "unexpected binary message of {} bytes", b.len()),
            Error::Ws(e) => write!(f, "websocket failure: {e}"),
            Error::WsClosed(Some(frame)) =>
                write!(f, "websocket closed with code {}", u16::from(frame.code)),
            Error::WsClosed(None) => write!(f, "websocket closed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            Error::UnexpectedBinaryMessage(_) | Error::WsClosed(_) => None,
        }
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Message) -> Result<Option<Event>> {
    Ok(match message {
        Message::Text(payload) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok(),
        Message::Binary(bytes) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Message::Close(frame) => {
            return Err(Error::WsClosed(frame));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}
