//! Driver and audio path error handling.

use std::{error::Error, fmt};

pub use crate::{
    driver::connection::error::{Error as ConnectionError, Result as ConnectionResult},
    ws::Error as WsError,
};

/// Errors returned to callers writing audio into the driver.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum AudioError {
    /// Every frame buffer is in use; the queue is not being drained.
    PoolExhausted,
    /// A raw frame was longer than its duration allows.
    FrameTooLarge {
        /// Length of the offending frame, in bytes.
        len: usize,
        /// Largest permitted length, in bytes.
        max: usize,
    },
    /// Frames may only last 20, 40 or 60ms.
    InvalidFrameDuration(u32),
    /// The driver owning the outbound queue has been disposed.
    QueueClosed,
    /// Volume modifiers must lie within `0.0..=2.5`.
    InvalidVolume(f32),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to queue audio: ")?;
        match self {
            Self::PoolExhausted => write!(f, "no frame buffers are available"),
            Self::FrameTooLarge { len, max } =>
                write!(f, "frame of {len} bytes exceeds maximum of {max}"),
            Self::InvalidFrameDuration(ms) => write!(f, "{ms}ms is not a valid frame duration"),
            Self::QueueClosed => write!(f, "driver has been disposed"),
            Self::InvalidVolume(v) => write!(f, "volume {v} is outside 0.0..=2.5"),
        }
    }
}

impl Error for AudioError {}

/// Convenience type for audio path error handling.
pub type AudioResult<T> = Result<T, AudioError>;
