//! Trigger detection engines.
//!
//! A trigger engine consumes one channel's contiguous sample stream, block
//! by block, and reports the absolute indices where capture windows end.
//! Engines are persistent state machines: a trigger may arm in one block
//! and fire in the next, and the capture/holdoff countdowns routinely span
//! many blocks. State lives in plain fields on a long-lived struct — the
//! "process one block, return, resume later" shape is a method call with
//! mutable state, nothing more.
//!
//! # Variants
//!
//! - [`EdgeTrigger`]: rising, falling, or either edge with a hysteresis
//!   arm band (rising wins when both arm at once)
//! - [`BurstTrigger`]: arms after the signal stays quiet inside a window
//!   for a run of samples, fires when it leaves the window
//! - [`EventTrigger`]: driven by externally queued absolute sample
//!   indices instead of sample values
//!
//! All variants share the uniform [`TriggerEngine`] contract and are
//! selected at configuration time by [`build_trigger`]. The engine
//! rebuilds the variant only when the trigger type or edge direction
//! changes; other parameter updates go through `set_trigger` /
//! `set_horizontal` on the existing instance (which reset its state, since
//! configuration changes invalidate in-flight trigger state).
//!
//! # Scanning
//!
//! Threshold scans run block-wise: a cheap whole-chunk test rejects runs
//! of [`SCAN_CHUNK`] samples at a time (written so the optimizer can
//! vectorize the comparison), then a scalar pass pinpoints the exact
//! crossing sample. Reported indices are exact, never chunk-granular.

mod burst;
mod edge;
mod event;

pub use burst::BurstTrigger;
pub use edge::EdgeTrigger;
pub use event::EventTrigger;

use scope_core::{HardwareConfig, HorizontalSettings, Sample, TriggerSettings, TriggerType};

/// Samples per vector-friendly scan batch.
pub const SCAN_CHUNK: usize = 64;

/// Absolute-index results of one `process` call.
///
/// Cleared at the start of every call; indices are absolute sample
/// positions in the channel's stream, not offsets into the block.
#[derive(Debug, Default, Clone)]
pub struct ScanResults {
    /// Positions where an engine armed
    pub arm_indices: Vec<u64>,
    /// Positions where a trigger fired
    pub trigger_indices: Vec<u64>,
    /// Positions where a capture window ends (drives extraction)
    pub capture_end_indices: Vec<u64>,
}

impl ScanResults {
    /// Empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all three index lists, keeping their allocations.
    pub fn clear(&mut self) {
        self.arm_indices.clear();
        self.trigger_indices.clear();
        self.capture_end_indices.clear();
    }
}

/// Uniform contract for all trigger variants.
///
/// Object-safe so the orchestrator can hold the active variant as a
/// `Box<dyn TriggerEngine<S>>` and swap it when the configured type
/// changes.
pub trait TriggerEngine<S: Sample>: Send {
    /// Apply trigger parameters (level, hysteresis, window, direction).
    ///
    /// Resets the state machine to unarmed: parameter changes invalidate
    /// any in-flight arm, capture or holdoff progress.
    fn set_trigger(&mut self, trigger: &TriggerSettings, hardware: &HardwareConfig);

    /// Apply window geometry (depth, trigger position, extra holdoff).
    ///
    /// Resets the state machine, as with `set_trigger`.
    fn set_horizontal(&mut self, horizontal: &HorizontalSettings);

    /// Scan one block of the source channel.
    ///
    /// `start_index` is the absolute index of `samples[0]`. `results` is
    /// cleared first; a long block can complete several full
    /// arm/trigger/capture/holdoff cycles in a single call.
    fn process(&mut self, samples: &[S], start_index: u64, results: &mut ScanResults);

    /// Force the state machine back to unarmed, clearing all counters.
    fn reset(&mut self);

    /// Queue an externally detected trigger event by absolute index.
    ///
    /// Only meaningful for [`EventTrigger`]; the sample-scanning variants
    /// ignore it.
    fn push_event(&mut self, _index: u64) {}
}

/// Build the configured trigger variant.
///
/// Called at engine construction and again whenever the trigger type or
/// edge direction changes.
pub fn build_trigger<S: Sample>(
    trigger: &TriggerSettings,
    hardware: &HardwareConfig,
    horizontal: &HorizontalSettings,
) -> Box<dyn TriggerEngine<S>> {
    match trigger.active {
        TriggerType::Edge => Box::new(EdgeTrigger::new(trigger, hardware, horizontal)),
        TriggerType::Burst => Box::new(BurstTrigger::new(trigger, hardware, horizontal)),
        TriggerType::Event => Box::new(EventTrigger::new(horizontal)),
    }
}

/// Find the first index `>= from` whose sample satisfies `pred`.
///
/// Chunked scan: a whole-batch `any` test skips [`SCAN_CHUNK`] samples at
/// a time, then a scalar pass inside the hit chunk pinpoints the exact
/// crossing.
pub(crate) fn find_first<S: Sample>(
    samples: &[S],
    from: usize,
    pred: impl Fn(S) -> bool,
) -> Option<usize> {
    let mut base = from;
    while base + SCAN_CHUNK <= samples.len() {
        let chunk = &samples[base..base + SCAN_CHUNK];
        if chunk.iter().copied().any(&pred) {
            for (i, &s) in chunk.iter().enumerate() {
                if pred(s) {
                    return Some(base + i);
                }
            }
        }
        base += SCAN_CHUNK;
    }
    samples[base.min(samples.len())..]
        .iter()
        .position(|&s| pred(s))
        .map(|i| base + i)
}
