use crate::{
    constants::*,
    driver::{
        opus::{DecoderFactory, OpusDecoderFactory},
        retry::Retry,
        AudioFormat,
        Connector,
        CryptoMode,
        DecodeMode,
        DefaultConnector,
        UserDirectory,
    },
};
use audiopus::Bitrate;
use derivative::Derivative;
use std::{sync::Arc, time::Duration};

/// Configuration for drivers.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Encryption modes the driver is willing to use, most preferred first.
    ///
    /// The first mode also offered by the server is chosen.
    ///
    /// Defaults to [`CryptoMode::DEFAULT_PREFERENCE`]: lite, then suffix,
    /// then normal.
    pub crypto_preference: Vec<CryptoMode>,

    /// Configures how far received packets are processed before being
    /// handed to [`VoicePacket`] events.
    ///
    /// Defaults to [`DecodeMode::Decode`].
    ///
    /// [`VoicePacket`]: crate::events::CoreEvent::VoicePacket
    pub decode_mode: DecodeMode,

    /// Format of PCM written to (and decoded by) the driver.
    ///
    /// Defaults to 48kHz stereo.
    pub audio_format: AudioFormat,

    /// Target bitrate of the Opus encoder.
    ///
    /// Defaults to 128kbps.
    pub bitrate: Bitrate,

    /// Number of frames the outbound queue holds before writers must wait.
    ///
    /// Defaults to 25.
    pub queue_capacity: usize,

    /// Number of frame buffers which may be rented at once.
    ///
    /// This must cover the queue plus any frames in flight between
    /// writers, the queue, and the sender. Writers receive
    /// [`AudioError::PoolExhausted`] beyond this limit.
    ///
    /// Defaults to twice the default queue capacity, plus 8.
    ///
    /// [`AudioError::PoolExhausted`]: crate::error::AudioError::PoolExhausted
    pub max_pooled_buffers: usize,

    /// Largest number of frames synthesised to cover a single burst of loss.
    ///
    /// Defaults to 10.
    pub max_concealment_frames: usize,

    /// Connection retry logic for the driver.
    ///
    /// This controls how many times the driver will attempt to connect
    /// (or reconnect) to a voice server, and how long it waits between
    /// attempts.
    pub driver_retry: Retry,

    /// Configures the maximum amount of time to wait for an attempted voice
    /// connection to the voice server.
    ///
    /// Defaults to 10 seconds. If set to `None`, connections will never time out.
    pub driver_timeout: Option<Duration>,

    /// Source of display names for speaking and client events.
    ///
    /// Defaults to `None`.
    #[derivative(Debug = "ignore")]
    pub user_directory: Option<Arc<dyn UserDirectory>>,

    /// Opens the websocket and UDP transports of each connection.
    ///
    /// Defaults to [`DefaultConnector`].
    #[derivative(Debug = "ignore")]
    pub connector: Arc<dyn Connector>,

    /// Creates one decoder per remote sender.
    ///
    /// Defaults to [`OpusDecoderFactory`].
    #[derivative(Debug = "ignore")]
    pub decoder_factory: Arc<dyn DecoderFactory>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_preference: CryptoMode::DEFAULT_PREFERENCE.to_vec(),
            decode_mode: DecodeMode::default(),
            audio_format: AudioFormat::default(),
            bitrate: DEFAULT_BITRATE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_pooled_buffers: 2 * DEFAULT_QUEUE_CAPACITY + 8,
            max_concealment_frames: DEFAULT_MAX_CONCEALMENT_FRAMES,
            driver_retry: Retry::default(),
            driver_timeout: Some(Duration::from_secs(10)),
            user_directory: None,
            connector: Arc::new(DefaultConnector),
            decoder_factory: Arc::new(OpusDecoderFactory),
        }
    }
}

impl Config {
    /// Sets this `Config`'s encryption mode preference.
    #[must_use]
    pub fn crypto_preference(mut self, crypto_preference: Vec<CryptoMode>) -> Self {
        self.crypto_preference = crypto_preference;
        self
    }

    /// Sets this `Config`'s received packet decoding mode.
    #[must_use]
    pub fn decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    /// Sets this `Config`'s PCM format.
    #[must_use]
    pub fn audio_format(mut self, audio_format: AudioFormat) -> Self {
        self.audio_format = audio_format;
        self
    }

    /// Sets this `Config`'s Opus bitrate.
    #[must_use]
    pub fn bitrate(mut self, bitrate: Bitrate) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Sets this `Config`'s outbound queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets this `Config`'s frame buffer limit.
    #[must_use]
    pub fn max_pooled_buffers(mut self, max_pooled_buffers: usize) -> Self {
        self.max_pooled_buffers = max_pooled_buffers;
        self
    }

    /// Sets this `Config`'s concealment limit per loss burst.
    #[must_use]
    pub fn max_concealment_frames(mut self, max_concealment_frames: usize) -> Self {
        self.max_concealment_frames = max_concealment_frames;
        self
    }

    /// Sets this `Config`'s timeout for establishing a voice connection.
    #[must_use]
    pub fn driver_timeout(mut self, driver_timeout: Option<Duration>) -> Self {
        self.driver_timeout = driver_timeout;
        self
    }

    /// Sets this `Config`'s voice connection retry configuration.
    #[must_use]
    pub fn driver_retry(mut self, driver_retry: Retry) -> Self {
        self.driver_retry = driver_retry;
        self
    }

    /// Sets this `Config`'s source of user display names.
    #[must_use]
    pub fn user_directory(mut self, user_directory: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = Some(user_directory);
        self
    }

    /// Sets this `Config`'s transport connector.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sets this `Config`'s decoder factory.
    #[must_use]
    pub fn decoder_factory(mut self, decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = decoder_factory;
        self
    }
}
