//! Recycling buffer pool.
//!
//! Framing a message allocates one buffer that is then shared by reference
//! with every session transmitting it. [`BufferPool`] recycles that storage:
//! when the last holder drops a [`PooledBuffer`], its `Vec` goes back on the
//! pool's free list with capacity intact, so a steady publish rate settles
//! into zero allocations per send.
//!
//! A buffer holds only a [`Weak`] reference to its pool. A buffer still
//! queued on a slow session when the pool (and the publisher owning it) goes
//! away is unaffected; its storage is simply freed instead of recycled.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};

/// Upper bound on idle buffers kept per pool. Returns beyond this are
/// dropped so a burst does not pin memory forever.
const MAX_IDLE_BUFFERS: usize = 64;

/// A pool of reusable byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand out a buffer, reusing recycled storage when available.
    ///
    /// The buffer comes back empty (`len == 0`) but may carry capacity from
    /// its previous life.
    pub fn allocate(self: &Arc<Self>) -> PooledBuffer {
        let data = self.free.lock().unwrap().pop().unwrap_or_default();
        PooledBuffer {
            data,
            pool: Arc::downgrade(self),
        }
    }

    /// Number of idle buffers currently held by the pool.
    pub fn idle_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn recycle(&self, mut data: Vec<u8>) {
        data.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < MAX_IDLE_BUFFERS {
            free.push(data);
        }
    }
}

/// A byte buffer borrowed from a [`BufferPool`].
///
/// Derefs to `Vec<u8>` for filling. Once framed, the buffer is wrapped in an
/// `Arc` and shared read-only across sessions; when the last `Arc` drops,
/// the storage returns to the pool.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(mem::take(&mut self.data));
        }
    }
}
