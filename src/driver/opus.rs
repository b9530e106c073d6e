//! Opus encode, decode and packet loss concealment.
//!
//! The codec sits behind [`VoiceEncoder`] and [`VoiceDecoder`] so that the
//! sender and receiver loops can be driven without libopus.

use super::AudioFormat;
use audiopus::{
    coder::{Decoder as AudiopusDecoder, Encoder as AudiopusEncoder},
    Application as CodingMode,
    Bitrate,
    Error as OpusError,
};
use tracing::{debug, warn};

/// Longest frame an Opus packet may carry.
const MAX_OPUS_FRAME_MS: u32 = 120;

/// An Opus encoder for outgoing audio.
pub trait VoiceEncoder: Send {
    /// Encodes one frame of interleaved PCM into `out`, returning the number of bytes written.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, OpusError>;
}

/// A stateful Opus decoder for one remote sender.
///
/// Sample counts are in interleaved samples, i.e., across all channels.
pub trait VoiceDecoder: Send {
    /// Decodes `frame` into `out`, returning the number of samples written.
    fn decode(&mut self, frame: &[u8], out: &mut [i16]) -> Result<usize, OpusError>;

    /// Reconstructs the frame *preceding* `next` from its in-band FEC data.
    ///
    /// `out` must be exactly as long as the frame to recover.
    fn decode_fec(&mut self, next: &[u8], out: &mut [i16]) -> Result<usize, OpusError>;

    /// Synthesises one frame of loss concealment into `out`.
    fn conceal(&mut self, out: &mut [i16]) -> Result<usize, OpusError>;

    /// Number of samples in the last frame this decoder produced from real data.
    fn last_sample_count(&self) -> usize;
}

/// Creates a decoder for each new remote sender.
pub trait DecoderFactory: Send + Sync {
    /// Builds a decoder producing audio of `format`.
    fn create(&self, format: AudioFormat) -> Result<Box<dyn VoiceDecoder>, OpusError>;
}

/// [`VoiceEncoder`] backed by libopus.
pub struct OpusEncoder {
    inner: AudiopusEncoder,
}

impl OpusEncoder {
    /// Creates an encoder for `format` at the given `bitrate`.
    pub fn new(format: AudioFormat, bitrate: Bitrate) -> Result<Self, OpusError> {
        let mut inner =
            AudiopusEncoder::new(format.sample_rate(), format.channels(), CodingMode::Audio)?;
        inner.set_bitrate(bitrate)?;

        Ok(Self { inner })
    }
}

impl VoiceEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, OpusError> {
        self.inner.encode(pcm, out)
    }
}

/// [`VoiceDecoder`] backed by libopus.
pub struct OpusDecoder {
    inner: AudiopusDecoder,
    channels: usize,
    last_samples: usize,
}

impl OpusDecoder {
    /// Creates a decoder producing audio of `format`.
    ///
    /// Until a frame is decoded, concealment assumes 20ms frames.
    pub fn new(format: AudioFormat) -> Result<Self, OpusError> {
        Ok(Self {
            inner: AudiopusDecoder::new(format.sample_rate(), format.channels())?,
            channels: format.channel_count(),
            last_samples: format.sample_count(crate::constants::FRAME_LEN_MS),
        })
    }
}

impl VoiceDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8], out: &mut [i16]) -> Result<usize, OpusError> {
        let per_channel = self.inner.decode(Some(frame), out, false)?;

        self.last_samples = per_channel * self.channels;
        Ok(self.last_samples)
    }

    fn decode_fec(&mut self, next: &[u8], out: &mut [i16]) -> Result<usize, OpusError> {
        let per_channel = self.inner.decode(Some(next), out, true)?;

        Ok(per_channel * self.channels)
    }

    fn conceal(&mut self, out: &mut [i16]) -> Result<usize, OpusError> {
        let per_channel = self.inner.decode(None::<&[u8]>, out, false)?;

        Ok(per_channel * self.channels)
    }

    fn last_sample_count(&self) -> usize {
        self.last_samples
    }
}

/// Default [`DecoderFactory`], creating an [`OpusDecoder`] per sender.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpusDecoderFactory;

impl DecoderFactory for OpusDecoderFactory {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn VoiceDecoder>, OpusError> {
        Ok(Box::new(OpusDecoder::new(format)?))
    }
}

/// Encodes one PCM frame into `dest`, returning the compressed length.
///
/// `dest` should span all space left in the packet after headers and crypto overhead.
#[inline]
pub fn encode(
    encoder: &mut dyn VoiceEncoder,
    pcm: &[i16],
    dest: &mut [u8],
) -> Result<usize, OpusError> {
    encoder.encode(pcm, dest)
}

/// Decodes one compressed frame into a freshly allocated buffer.
pub fn decode(
    decoder: &mut dyn VoiceDecoder,
    frame: &[u8],
    format: AudioFormat,
) -> Result<Vec<i16>, OpusError> {
    let mut out = vec![0; format.sample_count(MAX_OPUS_FRAME_MS)];
    let len = decoder.decode(frame, &mut out)?;
    out.truncate(len);

    Ok(out)
}

/// Synthesises the frames lost in a gap of `gap` packets.
///
/// A single lost frame is recovered from the FEC data in `next_frame` where
/// possible. Longer gaps are filled by repeated loss concealment. Every frame
/// is sized to the decoder's last known sample count, and gaps beyond
/// `max_frames` are clamped.
pub fn conceal(
    decoder: &mut dyn VoiceDecoder,
    gap: u64,
    next_frame: Option<&[u8]>,
    max_frames: usize,
) -> Vec<Vec<i16>> {
    let count = usize::try_from(gap).map_or(max_frames, |g| g.min(max_frames));
    if (count as u64) < gap {
        debug!("Clamping concealment of {gap} lost frames to {count}.");
    }

    let frame_len = decoder.last_sample_count();
    let mut frames = Vec::with_capacity(count);

    if count == 1 {
        if let Some(next) = next_frame {
            let mut out = vec![0; frame_len];
            match decoder.decode_fec(next, &mut out) {
                Ok(_) => return vec![out],
                Err(e) => debug!("FEC recovery failed, concealing instead: {e:?}."),
            }
        }
    }

    for _ in 0..count {
        let mut out = vec![0; frame_len];
        if let Err(e) = decoder.conceal(&mut out) {
            warn!("Issue while concealing missed packet: {e:?}.");
            out.fill(0);
        }
        frames.push(out);
    }

    frames
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::test_utils::MockDecoder;

    #[test]
    fn single_gap_uses_fec() {
        let mut decoder = MockDecoder::new(960);
        let frames = conceal(&mut decoder, 1, Some(&[1, 2, 3]), 10);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 960);
        assert_eq!(decoder.fec_calls, 1);
        assert_eq!(decoder.plc_calls, 0);
    }

    #[test]
    fn gaps_produce_one_frame_each() {
        for gap in 1..=10u64 {
            let mut decoder = MockDecoder::new(1920);
            let frames = conceal(&mut decoder, gap, None, 10);

            assert_eq!(frames.len() as u64, gap);
            assert!(frames.iter().all(|f| f.len() == 1920));
        }
    }

    #[test]
    fn larger_gaps_use_plc() {
        let mut decoder = MockDecoder::new(960);
        let frames = conceal(&mut decoder, 4, Some(&[1, 2, 3]), 10);

        assert_eq!(frames.len(), 4);
        assert_eq!(decoder.fec_calls, 0);
        assert_eq!(decoder.plc_calls, 4);
    }

    #[test]
    fn concealment_is_sized_to_last_real_frame() {
        let mut decoder = MockDecoder::new(960);
        let audio = decode(&mut decoder, &[0; 40], AudioFormat::default()).unwrap();
        assert_eq!(audio.len(), 960);

        decoder.next_decode_len = 5760;
        let audio = decode(&mut decoder, &[0; 40], AudioFormat::default()).unwrap();
        assert_eq!(audio.len(), 5760);

        let frames = conceal(&mut decoder, 2, None, 10);
        assert!(frames.iter().all(|f| f.len() == 5760));
    }

    #[test]
    fn huge_gaps_are_clamped() {
        let mut decoder = MockDecoder::new(960);
        let frames = conceal(&mut decoder, 4000, None, 10);
        assert_eq!(frames.len(), 10);
    }

    #[test]
    fn failed_concealment_still_fills_the_gap() {
        let mut decoder = MockDecoder::new(960);
        decoder.fail_concealment = true;

        let frames = conceal(&mut decoder, 3, Some(&[1]), 10);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().flatten().all(|s| *s == 0));
    }

    #[test]
    fn libopus_round_trip() {
        let format = AudioFormat::default();
        let mut encoder = OpusEncoder::new(format, Bitrate::BitsPerSecond(64_000)).unwrap();
        let mut decoder = OpusDecoder::new(format).unwrap();

        let pcm: Vec<i16> = (0..format.sample_count(20))
            .map(|i| ((i as f32 / 10.0).sin() * 8000.0) as i16)
            .collect();
        let mut packet = [0u8; 1275];
        let len = encode(&mut encoder, &pcm, &mut packet).unwrap();
        assert!(len > 0);

        let audio = decode(&mut decoder, &packet[..len], format).unwrap();
        assert_eq!(audio.len(), pcm.len());
        assert_eq!(decoder.last_sample_count(), pcm.len());

        let recovered = conceal(&mut decoder, 1, Some(&packet[..len]), 10);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].len(), pcm.len());

        let frames = conceal(&mut decoder, 2, None, 10);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == pcm.len()));
    }
}
