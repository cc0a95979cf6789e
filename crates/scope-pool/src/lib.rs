//! Zero-allocation block pool for raw hardware sample blocks.
//!
//! The acquisition path moves hundreds of megabytes per second; allocating
//! a fresh buffer per hardware block would put the allocator on the hot
//! path and introduce latency spikes. This crate pre-allocates a fixed set
//! of block buffers and circulates them between the hardware-read thread
//! and the engine thread.
//!
//! ## Memory Flow
//!
//! ```text
//! 1. BlockPool pre-allocates Vec<u8> block buffers at startup
//! 2. acquire()/try_acquire() returns a PooledBlock loan
//! 3. The source fills the buffer and sends it down the block queue
//! 4. The engine reads it; dropping the PooledBlock returns the
//!    buffer to the pool for reuse
//! ```
//!
//! The return-on-drop loan means the engine cannot leak buffers on any
//! path: a block that is dropped unprocessed (engine stopped, geometry
//! mismatch) goes straight back to the pool.
//!
//! # Example
//!
//! ```
//! use scope_pool::BlockPool;
//!
//! let pool = BlockPool::new(4, 16 * 1024);
//!
//! let mut block = pool.try_acquire().expect("pool exhausted");
//! block[0] = 0x7F;
//! drop(block); // returned to the pool
//!
//! assert_eq!(pool.available(), 4);
//! ```

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Internal state shared between the pool and its loans.
struct PoolInner {
    /// Lock-free queue of free buffers
    free: SegQueue<Vec<u8>>,
    /// Capacity of each buffer in bytes
    block_bytes: usize,
    /// Total number of buffers in the pool
    pool_size: usize,
    /// Buffers currently in the free queue
    available: AtomicUsize,
    /// Metrics: total acquires
    total_acquires: AtomicU64,
    /// Metrics: total returns
    total_returns: AtomicU64,
    /// Metrics: failed try_acquire calls (pool exhausted)
    exhausted: AtomicU64,
    /// Wakes blocked acquirers when a buffer is returned
    return_lock: Mutex<()>,
    return_cond: Condvar,
}

/// Snapshot of pool counters for observability.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Buffers currently free
    pub available: usize,
    /// Total buffers in the pool
    pub pool_size: usize,
    /// Lifetime successful acquires
    pub total_acquires: u64,
    /// Lifetime returns
    pub total_returns: u64,
    /// Lifetime failed try_acquire calls
    pub exhausted: u64,
}

/// Pool of pre-allocated raw block buffers.
///
/// Cloning the pool is cheap (an `Arc` bump); all clones share the same
/// buffers and counters.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

impl BlockPool {
    /// Create a pool of `pool_size` buffers of `block_bytes` each.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` or `block_bytes` is 0.
    #[must_use]
    pub fn new(pool_size: usize, block_bytes: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        assert!(block_bytes > 0, "block_bytes must be > 0");

        let free = SegQueue::new();
        for _ in 0..pool_size {
            free.push(vec![0u8; block_bytes]);
        }

        info!(
            pool_size,
            block_kib = block_bytes / 1024,
            total_kib = pool_size * block_bytes / 1024,
            "BlockPool created"
        );

        Self {
            inner: Arc::new(PoolInner {
                free,
                block_bytes,
                pool_size,
                available: AtomicUsize::new(pool_size),
                total_acquires: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                return_lock: Mutex::new(()),
                return_cond: Condvar::new(),
            }),
        }
    }

    /// Try to acquire a block buffer without blocking.
    ///
    /// Returns `None` when the pool is exhausted — the caller decides
    /// whether to skip the block (drop-newest) or retry later.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PooledBlock> {
        match self.inner.free.pop() {
            Some(buf) => {
                self.inner.available.fetch_sub(1, Ordering::Relaxed);
                self.inner.total_acquires.fetch_add(1, Ordering::Relaxed);
                Some(PooledBlock {
                    buf: Some(buf),
                    pool: Arc::clone(&self.inner),
                })
            }
            None => {
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Acquire a block buffer, waiting up to `timeout` for one to free up.
    ///
    /// Returns `None` on timeout. Used by the hardware-read thread, which
    /// would rather wait one block period than drop data.
    #[must_use]
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledBlock> {
        if let Some(block) = self.try_acquire() {
            return Some(block);
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.inner.return_lock.lock();
        loop {
            // A return may have raced in before we took the lock.
            if let Some(block) = self.try_acquire() {
                return Some(block);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                debug!("acquire_timeout expired with pool exhausted");
                return None;
            }
            let result = self.inner.return_cond.wait_until(&mut guard, deadline);
            if result.timed_out() {
                // A return can race the timeout; check once more.
                if let Some(block) = self.try_acquire() {
                    return Some(block);
                }
                debug!("acquire_timeout expired with pool exhausted");
                return None;
            }
        }
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.inner.available.load(Ordering::Relaxed)
    }

    /// Byte capacity of each block buffer.
    pub fn block_bytes(&self) -> usize {
        self.inner.block_bytes
    }

    /// Total buffers owned by the pool.
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available(),
            pool_size: self.inner.pool_size,
            total_acquires: self.inner.total_acquires.load(Ordering::Relaxed),
            total_returns: self.inner.total_returns.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("pool_size", &self.inner.pool_size)
            .field("block_bytes", &self.inner.block_bytes)
            .field("available", &self.available())
            .finish()
    }
}

/// A loaned block buffer.
///
/// Derefs to the full `block_bytes` byte slice. Returning is automatic:
/// dropping the loan pushes the buffer back onto the pool's free queue and
/// wakes one blocked acquirer.
pub struct PooledBlock {
    /// Always `Some` until drop
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Invariant: buf is Some for the lifetime of the loan.
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.push(buf);
            self.pool.available.fetch_add(1, Ordering::Relaxed);
            self.pool.total_returns.fetch_add(1, Ordering::Relaxed);
            let _guard = self.pool.return_lock.lock();
            self.pool.return_cond.notify_one();
        }
    }
}

impl std::fmt::Debug for PooledBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBlock")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_acquire_and_return() {
        let pool = BlockPool::new(2, 64);
        assert_eq!(pool.available(), 2);

        let a = pool.try_acquire().expect("first");
        let b = pool.try_acquire().expect("second");
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);

        let stats = pool.stats();
        assert_eq!(stats.total_acquires, 2);
        assert_eq!(stats.total_returns, 2);
        assert_eq!(stats.exhausted, 1);
    }

    #[test]
    fn test_buffer_is_full_size() {
        let pool = BlockPool::new(1, 128);
        let mut block = pool.try_acquire().expect("acquire");
        assert_eq!(block.len(), 128);
        block[127] = 0xAB;
        assert_eq!(block[127], 0xAB);
    }

    #[test]
    fn test_acquire_timeout_waits_for_return() {
        let pool = BlockPool::new(1, 16);
        let held = pool.try_acquire().expect("acquire");

        let pool2 = pool.clone();
        let waiter = thread::spawn(move || {
            pool2
                .acquire_timeout(Duration::from_secs(2))
                .map(|b| b.len())
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert_eq!(waiter.join().expect("join"), Some(16));
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let pool = BlockPool::new(1, 16);
        let _held = pool.try_acquire().expect("acquire");
        let got = pool.acquire_timeout(Duration::from_millis(20));
        assert!(got.is_none());
    }

    #[test]
    fn test_concurrent_churn() {
        let pool = BlockPool::new(4, 32);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(mut block) = pool.try_acquire() {
                        block[0] = block[0].wrapping_add(1);
                    }
                }
            }));
        }
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(pool.available(), 4);
    }
}
