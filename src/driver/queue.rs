//! Bounded FIFO between PCM producers and the packet scheduler.

use super::pool::PooledBuffer;
use crate::error::AudioError;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::select;
use tokio_util::sync::CancellationToken;

/// One frame of audio awaiting transmission.
#[derive(Debug)]
pub struct RawOutboundPacket {
    /// Interleaved PCM; absent for silence.
    pub buffer: Option<PooledBuffer>,
    /// Playback duration of the frame in milliseconds.
    pub duration_ms: u32,
    /// Whether the frame is sent as the Opus silent frame.
    pub silence: bool,
}

impl RawOutboundPacket {
    pub(crate) fn audio(buffer: PooledBuffer, duration_ms: u32) -> Self {
        Self {
            buffer: Some(buffer),
            duration_ms,
            silence: false,
        }
    }

    pub(crate) fn silence(duration_ms: u32) -> Self {
        Self {
            buffer: None,
            duration_ms,
            silence: true,
        }
    }
}

/// Multi-producer queue of [`RawOutboundPacket`]s with backpressure.
///
/// `pending` counts packets which have been admitted by a producer but not yet
/// taken up by the scheduler. Producers raise it before sending and the
/// scheduler lowers it once it holds a packet, so a zero count seen by the
/// scheduler means no audio is on its way.
#[derive(Clone, Debug)]
pub struct OutboundQueue {
    tx: Sender<RawOutboundPacket>,
    rx: Receiver<RawOutboundPacket>,
    pending: Arc<AtomicUsize>,
    closed: CancellationToken,
}

impl OutboundQueue {
    /// Creates a queue holding up to `capacity` packets.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));

        Self {
            tx,
            rx,
            pending: Arc::new(AtomicUsize::new(0)),
            closed: CancellationToken::new(),
        }
    }

    /// Adds a packet, waiting while the queue is full.
    ///
    /// Fails with [`AudioError::QueueClosed`] once the owning driver is disposed.
    pub async fn enqueue(&self, packet: RawOutboundPacket) -> Result<(), AudioError> {
        if self.closed.is_cancelled() {
            return Err(AudioError::QueueClosed);
        }

        let admission = Admission::new(&self.pending);

        let res = select! {
            biased;
            () = self.closed.cancelled() => Err(AudioError::QueueClosed),
            r = self.tx.send_async(packet) => r.map_err(|_| AudioError::QueueClosed),
        };

        if res.is_ok() {
            admission.commit();
        }

        res
    }

    /// Takes the next packet without waiting.
    pub(crate) fn try_dequeue(&self) -> Option<RawOutboundPacket> {
        match self.rx.try_recv() {
            Ok(pkt) => Some(pkt),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next packet.
    pub(crate) async fn dequeue(&self) -> Option<RawOutboundPacket> {
        self.rx.recv_async().await.ok()
    }

    /// Marks one dequeued packet as taken up by the scheduler.
    pub(crate) fn mark_taken(&self) {
        // Saturate: a packet enqueued before `close` may still be in flight.
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of admitted packets not yet taken up by the scheduler.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of packets currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no packets are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drops every buffered packet, returning their buffers to the pool.
    pub(crate) fn clear(&self) {
        let drained = self.rx.drain().count();
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(drained))
            });
    }

    /// Rejects all current and future producers and drops buffered packets.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.clear();
    }
}

/// One producer's claim on the pending count.
///
/// Released on drop unless committed, so a failed or abandoned `enqueue`
/// leaves the count as it found it.
struct Admission<'a> {
    pending: &'a AtomicUsize,
    committed: bool,
}

impl<'a> Admission<'a> {
    fn new(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);

        Self {
            pending,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }
}
