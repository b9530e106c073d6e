//! Sample layout of the PCM exchanged with the driver.

use crate::constants::*;
use audiopus::{Channels, SampleRate};

/// Shape of the 16-bit PCM audio handed to (and produced by) the driver.
///
/// Frames of 20, 40 or 60ms may be sent. Samples are interleaved when stereo.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AudioFormat {
    sample_rate: SampleRate,
    channels: Channels,
}

impl AudioFormat {
    /// 48kHz stereo, the format expected by the voice backend.
    pub const DEFAULT: Self = Self {
        sample_rate: SAMPLE_RATE,
        channels: Channels::Stereo,
    };

    /// Creates a new audio format.
    ///
    /// [`Channels::Auto`] is treated as stereo.
    #[must_use]
    pub fn new(sample_rate: SampleRate, channels: Channels) -> Self {
        let channels = match channels {
            Channels::Mono => Channels::Mono,
            _ => Channels::Stereo,
        };

        Self {
            sample_rate,
            channels,
        }
    }

    /// Sample rate of this format.
    #[must_use]
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Channel layout of this format.
    #[must_use]
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate_raw(&self) -> usize {
        self.sample_rate as i32 as usize
    }

    /// Number of interleaved channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        match self.channels {
            Channels::Mono => 1,
            _ => 2,
        }
    }

    /// Whether frames of `duration_ms` may be sent.
    #[must_use]
    pub fn is_valid_duration(&self, duration_ms: u32) -> bool {
        VALID_FRAME_DURATIONS.contains(&duration_ms)
    }

    /// Number of samples per channel in a frame of `duration_ms`.
    #[must_use]
    pub fn samples_per_channel(&self, duration_ms: u32) -> usize {
        self.sample_rate_raw() * duration_ms as usize / 1000
    }

    /// Number of interleaved samples in a frame of `duration_ms`.
    #[must_use]
    pub fn sample_count(&self, duration_ms: u32) -> usize {
        self.samples_per_channel(duration_ms) * self.channel_count()
    }

    /// Size in bytes of a frame of `duration_ms` of 16-bit PCM.
    #[must_use]
    pub fn frame_size(&self, duration_ms: u32) -> usize {
        self.sample_count(duration_ms) * std::mem::size_of::<i16>()
    }

    /// Size in bytes of the longest frame which may be sent.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.frame_size(VALID_FRAME_DURATIONS[VALID_FRAME_DURATIONS.len() - 1])
    }

    /// Advance of the RTP timestamp for a frame of `duration_ms`.
    #[must_use]
    pub(crate) fn timestamp_step(duration_ms: u32) -> u32 {
        RTP_CLOCK_RATE / 1000 * duration_ms
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::DEFAULT
    }
}
