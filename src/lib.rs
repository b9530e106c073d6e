#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Warbler is an async client for encrypted RTP voice sessions, written in Rust.
//!
//! Given the session details handed out by a chat platform's main gateway
//! (a [`ConnectionInfo`]), a [`Driver`]:
//!  * negotiates the session over the voice server's websocket signalling
//!  channel, keeping it alive with heartbeats and resuming it when it drops,
//!  * discovers its external address over UDP, and agrees on one of three
//!  XSalsa20-Poly1305 packet encryption modes,
//!  * encodes queued PCM with Opus and sends it at the pace of playback,
//!  with silence around each burst of speech,
//!  * and receives, decrypts, reorders and decodes other users' audio,
//!  reporting it alongside connection changes as [events].
//!
//! ## Sending audio
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use warbler::{Config, ConnectionInfo, Driver};
//!
//! let mut driver = Driver::new(Config::default());
//! driver
//!     .connect(ConnectionInfo::new(1_u64, 2_u64, "voice.example.net", "session", "token"))
//!     .await?;
//!
//! let sink = driver.transmit_sink(20)?;
//! sink.write(&vec![0u8; 3840 * 50]).await?;
//! sink.flush().await?;
//! driver.wait_for_playback_finished().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Codec support
//! Opus support is provided by [audiopus] (an FFI wrapper for libopus).
//! Custom codecs may be supplied through [`Config::decoder_factory`].
//!
//! [events]: crate::events
//! [audiopus]: https://github.com/lakelezz/audiopus

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
mod info;
pub mod ws;

pub use discortp as packet;
pub use serenity_voice_model as model;

pub use crate::{
    driver::Driver,
    events::{CoreEvent, Event, EventContext, EventHandler},
};

pub use config::Config;
pub use info::ConnectionInfo;
