//! Bounded buffer pool with leak accounting.
//!
//! Packets, payload buffers and frame buffers are drawn from pools so a
//! misbehaving stream cannot grow the heap without bound. A pool hands out
//! `PooledBuf` guards; dropping a guard returns the storage to the free list.
//! Outstanding-object accounting catches leaks: a pool dropped while buffers
//! are still out logs an error (and panics in debug builds).

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    buf_capacity: usize,
    max_buffers: usize,
}

/// Bounded pool of byte buffers of a fixed capacity.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of up to `max_buffers` buffers of `buf_capacity` bytes.
    pub fn new(buf_capacity: usize, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                buf_capacity,
                max_buffers,
            }),
        }
    }

    /// Allocate a buffer, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<PooledBuf> {
        let mut free = self.inner.free.lock();
        let data = match free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                if self.inner.outstanding.load(Ordering::Relaxed) >= self.inner.max_buffers {
                    return None;
                }
                Vec::with_capacity(self.inner.buf_capacity)
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        drop(free);

        Some(PooledBuf {
            data,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Buffer capacity this pool hands out.
    pub fn buf_capacity(&self) -> usize {
        self.inner.buf_capacity
    }

    /// Number of buffers currently held by callers.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let leaked = self.outstanding.load(Ordering::Relaxed);
        if leaked != 0 {
            error!(leaked, "buffer pool dropped with buffers still outstanding");
            debug_assert_eq!(leaked, 0, "buffer pool leak");
        }
    }
}

/// Byte buffer owned by a pool. Returns to the free list on drop.
pub struct PooledBuf {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.data
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.max_buffers {
            free.push(std::mem::take(&mut self.data));
        }
    }
}

impl Clone for PooledBuf {
    fn clone(&self) -> Self {
        // Restored packets and tests copy buffers; the clone is accounted
        // like a fresh allocation against the same pool.
        self.pool.outstanding.fetch_add(1, Ordering::Relaxed);
        Self {
            data: self.data.clone(),
            pool: Arc::clone(&self.pool),
        }
    }
}
