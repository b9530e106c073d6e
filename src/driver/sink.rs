//! Framing, filtering and volume control for outgoing PCM.

use super::{
    pool::BufferPool,
    queue::{OutboundQueue, RawOutboundPacket},
    AudioFormat,
};
use crate::{
    constants::MAX_VOLUME,
    error::{AudioError, AudioResult},
};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

/// An in-place transformation of outgoing audio.
///
/// Filters run on every full frame, in their installed order, before volume
/// scaling is applied.
pub trait Filter: Send + Sync {
    /// Transforms one frame of interleaved 16-bit PCM in place.
    fn transform(&self, pcm: &mut [i16], format: AudioFormat, duration_ms: u32);
}

/// Writer of raw PCM into a driver's outbound queue.
///
/// Bytes are little-endian 16-bit samples in the driver's [`AudioFormat`].
/// Writes may be of any length: they are cut into frames of the sink's duration,
/// and a trailing partial frame is held until more data or a [`flush`].
///
/// [`flush`]: TransmitSink::flush
pub struct TransmitSink {
    format: AudioFormat,
    duration_ms: u32,
    frame_bytes: usize,
    partial: AsyncMutex<Vec<u8>>,
    filters: Mutex<Vec<Arc<dyn Filter>>>,
    volume: Mutex<f32>,
    queue: OutboundQueue,
    pool: BufferPool,
}

impl TransmitSink {
    pub(crate) fn new(
        format: AudioFormat,
        duration_ms: u32,
        queue: OutboundQueue,
        pool: BufferPool,
    ) -> AudioResult<Self> {
        if !format.is_valid_duration(duration_ms) {
            return Err(AudioError::InvalidFrameDuration(duration_ms));
        }

        let frame_bytes = format.frame_size(duration_ms);

        Ok(Self {
            format,
            duration_ms,
            frame_bytes,
            partial: AsyncMutex::new(Vec::with_capacity(frame_bytes)),
            filters: Mutex::new(Vec::new()),
            volume: Mutex::new(1.0),
            queue,
            pool,
        })
    }

    /// Duration of each frame emitted by this sink.
    #[must_use]
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Appends PCM, enqueuing every frame it completes.
    ///
    /// Waits while the outbound queue is full. On error the frame being
    /// assembled is kept, and is retried by the next write or flush.
    pub async fn write(&self, mut data: &[u8]) -> AudioResult<()> {
        let mut partial = self.partial.lock().await;

        loop {
            if partial.len() == self.frame_bytes {
                self.emit(&partial).await?;
                partial.clear();
            }

            if data.is_empty() {
                break;
            }

            let take = (self.frame_bytes - partial.len()).min(data.len());
            partial.extend_from_slice(&data[..take]);
            data = &data[take..];
        }

        Ok(())
    }

    /// Pads any partial frame with silence and enqueues it.
    pub async fn flush(&self) -> AudioResult<()> {
        let mut partial = self.partial.lock().await;

        if partial.is_empty() {
            return Ok(());
        }

        trace!(
            "Flushing partial frame of {}/{} bytes.",
            partial.len(),
            self.frame_bytes
        );
        partial.resize(self.frame_bytes, 0);
        self.emit(&partial).await?;
        partial.clear();

        Ok(())
    }

    async fn emit(&self, frame: &[u8]) -> AudioResult<()> {
        let mut buffer = self.pool.rent(frame.len() / 2)?;
        LittleEndian::read_i16_into(frame, &mut buffer);

        self.process(&mut buffer);

        self.queue
            .enqueue(RawOutboundPacket::audio(buffer, self.duration_ms))
            .await
    }

    fn process(&self, pcm: &mut [i16]) {
        {
            let filters = self.filters.lock();
            for filter in filters.iter() {
                filter.transform(pcm, self.format, self.duration_ms);
            }
        }

        let volume = *self.volume.lock();
        if volume != 1.0 {
            for sample in pcm.iter_mut() {
                *sample = (f32::from(*sample) * volume) as i16;
            }
        }
    }

    /// Installs `filter` at position `order` in the chain.
    ///
    /// Positions past the end of the chain append.
    pub fn install_filter(&self, filter: Arc<dyn Filter>, order: usize) {
        let mut filters = self.filters.lock();
        let idx = order.min(filters.len());
        filters.insert(idx, filter);
    }

    /// Removes `filter`, matched by identity, returning whether it was installed.
    pub fn uninstall_filter(&self, filter: &Arc<dyn Filter>) -> bool {
        let mut filters = self.filters.lock();
        let before = filters.len();
        filters.retain(|f| !Arc::ptr_eq(f, filter));
        filters.len() != before
    }

    /// Currently installed filters, in execution order.
    #[must_use]
    pub fn filters(&self) -> Vec<Arc<dyn Filter>> {
        self.filters.lock().clone()
    }

    /// Sets the volume multiplier applied after filtering.
    pub fn set_volume(&self, volume: f32) -> AudioResult<()> {
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(AudioError::InvalidVolume(volume));
        }

        *self.volume.lock() = volume;
        Ok(())
    }

    /// Current volume multiplier.
    #[must_use]
    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

impl fmt::Debug for TransmitSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitSink")
            .field("format", &self.format)
            .field("duration_ms", &self.duration_ms)
            .field("filters", &self.filters.lock().len())
            .field("volume", &self.volume())
            .finish()
    }
}
