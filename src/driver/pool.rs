//! Recycled PCM frame buffers for the transmit path.

use crate::error::AudioError;
use parking_lot::Mutex;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Snapshot of a [`BufferPool`]'s accounting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Buffers currently rented and not yet returned.
    pub outstanding: usize,
    /// Total number of rentals.
    pub rented: usize,
    /// Total number of returns.
    pub returned: usize,
}

struct PoolInner {
    free: Mutex<Vec<Vec<i16>>>,
    limit: usize,
    outstanding: AtomicUsize,
    rented: AtomicUsize,
    returned: AtomicUsize,
}

/// A bounded pool of sample buffers.
///
/// Each [`PooledBuffer`] returns itself to the pool when dropped, so a rental
/// is released exactly once however the packet carrying it is consumed.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool allowing at most `limit` buffers to be rented at once.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                limit,
                outstanding: AtomicUsize::new(0),
                rented: AtomicUsize::new(0),
                returned: AtomicUsize::new(0),
            }),
        }
    }

    /// Rents a zeroed buffer of `len` samples.
    ///
    /// Fails with [`AudioError::PoolExhausted`] if `limit` buffers are already out.
    pub fn rent(&self, len: usize) -> Result<PooledBuffer, AudioError> {
        let inner = &self.inner;
        inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.limit).then_some(n + 1)
            })
            .map_err(|_| AudioError::PoolExhausted)?;
        inner.rented.fetch_add(1, Ordering::Relaxed);

        let mut data = inner.free.lock().pop().unwrap_or_default();
        data.clear();
        data.resize(len, 0);

        Ok(PooledBuffer {
            data,
            pool: self.inner.clone(),
        })
    }

    /// Current accounting of this pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.inner.outstanding.load(Ordering::Acquire),
            rented: self.inner.rented.load(Ordering::Relaxed),
            returned: self.inner.returned.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("limit", &self.inner.limit)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A rented frame buffer, returned to its [`BufferPool`] on drop.
pub struct PooledBuffer {
    data: Vec<i16>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        {
            let mut free = self.pool.free.lock();
            if free.len() < self.pool.limit {
                free.push(data);
            }
        }

        self.pool.returned.fetch_add(1, Ordering::Relaxed);
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}
