//! Capture slot ring: producer/consumer rendezvous for completed captures.
//!
//! Pre-allocated slots circulate between a lock-free free queue and a FIFO
//! ready queue. The engine reserves a slot, copies the windowed channels
//! into it, and publishes it with metadata; a consumer on another thread
//! drains ready slots oldest-first and releases them by dropping the
//! handle.
//!
//! ```text
//!  free queue ──try_start_write()──► CaptureReservation
//!                                         │ finish(metadata)
//!  ready queue ◄───────────────────────────┘
//!       │ try_read()
//!       ▼
//!  CompletedCapture ──drop──► free queue
//! ```
//!
//! Backpressure is drop-newest: when every slot is reserved or waiting to
//! be consumed, `try_start_write` refuses immediately and the new capture
//! is counted as dropped. The producer never stalls the real-time thread
//! waiting for a slow consumer; under sustained overload the most recent
//! data is lost, never the producer's latency budget.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use scope_core::{CaptureMetadata, Sample, SampleFormat, ScopeError};

/// Channel buffers of one capture slot.
#[derive(Debug)]
struct Slot {
    /// One byte buffer per channel, `depth * bytes_per_sample` each
    channels: Vec<Vec<u8>>,
    /// Configuration generation this slot belongs to
    generation: u64,
}

/// Counter pair tracked over the ring's lifetime and since the last
/// interval reset.
#[derive(Debug, Default)]
struct Counter {
    lifetime: AtomicU64,
    interval: AtomicU64,
}

impl Counter {
    fn bump(&self) {
        self.lifetime.fetch_add(1, Ordering::Relaxed);
        self.interval.fetch_add(1, Ordering::Relaxed);
    }
}

struct CaptureRingInner {
    free: SegQueue<Slot>,
    ready: SegQueue<(Slot, CaptureMetadata)>,
    /// Bumped by `configure`; stale reservations and ready slots from an
    /// older generation are retired instead of recirculated
    generation: AtomicU64,
    produced: Counter,
    dropped: Counter,
    read: Counter,
}

/// Snapshot of the ring's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRingStats {
    /// Captures published, lifetime
    pub produced_lifetime: u64,
    /// Captures published since the last interval reset
    pub produced_interval: u64,
    /// Captures dropped because the ring was full, lifetime
    pub dropped_lifetime: u64,
    /// Captures dropped since the last interval reset
    pub dropped_interval: u64,
    /// Captures consumed, lifetime
    pub read_lifetime: u64,
    /// Captures consumed since the last interval reset
    pub read_interval: u64,
}

/// Fixed-capacity ring of capture slots.
///
/// Cloning is cheap and shares the same slots and counters; the engine
/// keeps one clone as the write side and the consumer thread another as
/// the read side.
#[derive(Clone)]
pub struct CaptureRing {
    inner: Arc<CaptureRingInner>,
    slots: usize,
}

impl CaptureRing {
    /// Create a ring of `slots` capture slots sized for the given
    /// geometry.
    ///
    /// # Panics
    ///
    /// Panics if `slots`, `channels` or `depth` is 0.
    #[must_use]
    pub fn new(slots: usize, channels: usize, depth: usize, format: SampleFormat) -> Self {
        assert!(slots > 0, "slots must be > 0");
        assert!(channels > 0, "channels must be > 0");
        assert!(depth > 0, "depth must be > 0");

        let ring = Self {
            inner: Arc::new(CaptureRingInner {
                free: SegQueue::new(),
                ready: SegQueue::new(),
                generation: AtomicU64::new(0),
                produced: Counter::default(),
                dropped: Counter::default(),
                read: Counter::default(),
            }),
            slots,
        };
        ring.fill_slots(channels, depth, format, 0);

        info!(
            slots,
            channels,
            depth,
            format = %format,
            "capture ring created"
        );
        ring
    }

    fn fill_slots(&self, channels: usize, depth: usize, format: SampleFormat, generation: u64) {
        let bytes = depth * format.bytes_per_sample();
        for _ in 0..self.slots {
            self.inner.free.push(Slot {
                channels: (0..channels).map(|_| vec![0u8; bytes]).collect(),
                generation,
            });
        }
    }

    /// Resize every slot for a new geometry and reset all counters.
    ///
    /// Legal only between captures: no `CaptureReservation` may be
    /// outstanding. A reservation or ready slot from before the call is
    /// retired on its way back rather than mixed into the new geometry.
    pub fn configure(&self, channels: usize, depth: usize, format: SampleFormat) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        // Old slots drain to the allocator; new ones replace them.
        while self.inner.free.pop().is_some() {}
        while self.inner.ready.pop().is_some() {}
        self.fill_slots(channels, depth, format, generation);

        for counter in [&self.inner.produced, &self.inner.dropped, &self.inner.read] {
            counter.lifetime.store(0, Ordering::Relaxed);
            counter.interval.store(0, Ordering::Relaxed);
        }
        debug!(channels, depth, generation, "capture ring reconfigured");
    }

    /// Reserve the next free slot for writing.
    ///
    /// Returns `None` immediately when the ring is full; the attempted
    /// capture counts as dropped and the caller continues without
    /// blocking.
    #[must_use]
    pub fn try_start_write(&self) -> Option<CaptureReservation> {
        match self.inner.free.pop() {
            Some(slot) => Some(CaptureReservation {
                slot: Some(slot),
                inner: Arc::clone(&self.inner),
            }),
            None => {
                self.inner.dropped.bump();
                None
            }
        }
    }

    /// Take the oldest unread capture, if any.
    pub fn try_read(&self) -> Option<CompletedCapture> {
        loop {
            let (slot, metadata) = self.inner.ready.pop()?;
            if slot.generation != self.inner.generation.load(Ordering::Acquire) {
                // Published before the last reconfigure; retire it.
                continue;
            }
            self.inner.read.bump();
            return Some(CompletedCapture {
                slot: Some(slot),
                metadata,
                inner: Arc::clone(&self.inner),
            });
        }
    }

    /// Number of slots configured.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CaptureRingStats {
        CaptureRingStats {
            produced_lifetime: self.inner.produced.lifetime.load(Ordering::Relaxed),
            produced_interval: self.inner.produced.interval.load(Ordering::Relaxed),
            dropped_lifetime: self.inner.dropped.lifetime.load(Ordering::Relaxed),
            dropped_interval: self.inner.dropped.interval.load(Ordering::Relaxed),
            read_lifetime: self.inner.read.lifetime.load(Ordering::Relaxed),
            read_interval: self.inner.read.interval.load(Ordering::Relaxed),
        }
    }

    /// Zero the interval counters, keeping lifetime totals.
    pub fn reset_interval_stats(&self) {
        for counter in [&self.inner.produced, &self.inner.dropped, &self.inner.read] {
            counter.interval.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for CaptureRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRing")
            .field("slots", &self.slots)
            .finish()
    }
}

/// An exclusive reservation of one capture slot.
///
/// The engine copies each channel's window into
/// [`channel_buffer`](Self::channel_buffer) and publishes with
/// [`finish`](Self::finish). Dropping an unfinished reservation abandons
/// it: the slot returns to the free queue untouched and nothing reaches
/// the consumer.
pub struct CaptureReservation {
    slot: Option<Slot>,
    inner: Arc<CaptureRingInner>,
}

impl CaptureReservation {
    /// Number of channel buffers in this slot.
    pub fn channels(&self) -> usize {
        self.slot.as_ref().map_or(0, |s| s.channels.len())
    }

    /// Writable destination for channel `i`'s window bytes.
    pub fn channel_buffer(&mut self, i: usize) -> Result<&mut [u8], ScopeError> {
        let slot = self.slot.as_mut().ok_or(ScopeError::ChannelOutOfRange {
            channel: i,
            count: 0,
        })?;
        let count = slot.channels.len();
        slot.channels
            .get_mut(i)
            .map(Vec::as_mut_slice)
            .ok_or(ScopeError::ChannelOutOfRange { channel: i, count })
    }

    /// Publish the slot to the consumer with its metadata.
    ///
    /// A reservation that survived a `configure` call belongs to the old
    /// geometry; it is retired instead of published.
    pub fn finish(mut self, metadata: CaptureMetadata) {
        if let Some(slot) = self.slot.take() {
            if slot.generation != self.inner.generation.load(Ordering::Acquire) {
                debug!("stale capture reservation retired at finish");
                return;
            }
            self.inner.produced.bump();
            self.inner.ready.push((slot, metadata));
        }
    }
}

impl Drop for CaptureReservation {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if slot.generation == self.inner.generation.load(Ordering::Acquire) {
                debug!("capture reservation abandoned");
                self.inner.free.push(slot);
            }
        }
    }
}

/// A consumed capture: channel bytes plus metadata.
///
/// Dropping releases the slot back to the free pool.
pub struct CompletedCapture {
    slot: Option<Slot>,
    metadata: CaptureMetadata,
    inner: Arc<CaptureRingInner>,
}

impl CompletedCapture {
    /// Capture metadata recorded at publish time.
    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    /// Number of channels captured.
    pub fn channels(&self) -> usize {
        self.slot.as_ref().map_or(0, |s| s.channels.len())
    }

    /// Raw little-endian bytes of channel `i`.
    pub fn channel_bytes(&self, i: usize) -> Option<&[u8]> {
        self.slot.as_ref()?.channels.get(i).map(Vec::as_slice)
    }

    /// Decode channel `i` into typed samples.
    pub fn channel_samples<S: Sample>(&self, i: usize) -> Option<Vec<S>> {
        let bytes = self.channel_bytes(i)?;
        Some(bytes.chunks_exact(S::BYTES).map(S::from_le).collect())
    }
}

impl Drop for CompletedCapture {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if slot.generation == self.inner.generation.load(Ordering::Acquire) {
                self.inner.free.push(slot);
            }
        }
    }
}
