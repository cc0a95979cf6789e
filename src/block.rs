//! Raw hardware block type delivered to the engine.

use scope_core::{ChannelMask, SampleFormat};
use scope_pool::PooledBlock;

/// One hardware block: pooled raw bytes plus the geometry tags in effect
/// when it was captured.
///
/// `start_index` counts per-channel time ticks, not interleaved sample
/// slots: a two-channel block of 8192 interleaved samples advances the
/// index by 4096. The index is monotonic for the life of a session and
/// only resets with an explicit buffer reset.
///
/// Dropping a `RawBlock` returns its buffer to the pool, so every exit
/// path of the engine loop (processed, geometry-dropped, engine stopped)
/// recycles the buffer without explicit bookkeeping.
#[derive(Debug)]
pub struct RawBlock {
    /// Pooled buffer holding the interleaved little-endian samples
    pub data: PooledBlock,
    /// Absolute per-channel sample index of the first tick in this block
    pub start_index: u64,
    /// Sample width the hardware was running at
    pub format: SampleFormat,
    /// Channels multiplexed into this block
    pub channel_mask: ChannelMask,
    /// Per-channel sample rate in hertz
    pub sample_rate_hz: f64,
}

impl RawBlock {
    /// Raw interleaved bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Per-channel time ticks carried by this block.
    pub fn ticks(&self) -> usize {
        let frame = self.format.bytes_per_sample() * self.channel_mask.count().max(1);
        self.data.len() / frame.max(1)
    }
}
