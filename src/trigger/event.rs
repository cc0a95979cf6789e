//! Event trigger: capture boundaries driven by an external index queue.

use std::collections::VecDeque;
use std::marker::PhantomData;

use scope_core::{HardwareConfig, HorizontalSettings, Sample, TriggerSettings};
use tracing::{debug, trace};

use super::{ScanResults, TriggerEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InCapture,
    InHoldoff,
}

/// Trigger variant driven by externally supplied absolute sample indices.
///
/// Instead of scanning sample values, this engine dequeues events pushed
/// via [`TriggerEngine::push_event`] — an out-of-band condition (protocol
/// decode, external hardware line) decides where captures fall. Events
/// older than the current block are discarded as stale, and no event is
/// honored until the engine has observed at least a full capture window of
/// history, so extraction can never reach before the start of the stream.
pub struct EventTrigger<S: Sample> {
    /// Pending event indices, oldest first
    queue: VecDeque<u64>,
    /// Samples observed since the last reset
    observed: u64,
    capture_depth: usize,
    capture_samples: usize,
    holdoff_samples: usize,
    phase: Phase,
    capture_remaining: usize,
    holdoff_remaining: usize,
    _marker: PhantomData<fn() -> S>,
}

impl<S: Sample> EventTrigger<S> {
    /// Build from window geometry; the queue starts empty.
    pub fn new(horizontal: &HorizontalSettings) -> Self {
        let mut engine = Self {
            queue: VecDeque::new(),
            observed: 0,
            capture_depth: 0,
            capture_samples: 0,
            holdoff_samples: 0,
            phase: Phase::Idle,
            capture_remaining: 0,
            holdoff_remaining: 0,
            _marker: PhantomData,
        };
        engine.set_horizontal(horizontal);
        engine
    }

    /// Pending events not yet consumed or discarded.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

impl<S: Sample> TriggerEngine<S> for EventTrigger<S> {
    fn set_trigger(&mut self, _trigger: &TriggerSettings, _hardware: &HardwareConfig) {
        // No sample-domain parameters; a reconfiguration still invalidates
        // in-flight state like every other variant.
        self.reset();
    }

    fn set_horizontal(&mut self, horizontal: &HorizontalSettings) {
        self.capture_depth = horizontal.capture_depth;
        self.capture_samples = horizontal.capture_samples();
        self.holdoff_samples = horizontal.holdoff_samples();
        self.reset();
    }

    fn process(&mut self, samples: &[S], start_index: u64, results: &mut ScanResults) {
        results.clear();
        let len = samples.len();
        let end_index = start_index + len as u64;
        self.observed += len as u64;

        // Drop events the stream has already moved past.
        while let Some(&front) = self.queue.front() {
            if front < start_index {
                debug!(event = front, block_start = start_index, "stale event discarded");
                self.queue.pop_front();
            } else {
                break;
            }
        }

        let mut cursor = 0usize;
        loop {
            match self.phase {
                Phase::Idle => {
                    if self.observed < self.capture_depth as u64 {
                        // Not enough buffered history for a full window yet.
                        return;
                    }
                    let Some(&event) = self.queue.front() else { return };
                    if event >= end_index {
                        return;
                    }
                    self.queue.pop_front();
                    if event < start_index + cursor as u64 {
                        // Swallowed by the capture/holdoff span of an
                        // earlier event in this same block.
                        debug!(event, "event inside previous capture span discarded");
                        continue;
                    }
                    results.trigger_indices.push(event);
                    self.phase = Phase::InCapture;
                    self.capture_remaining = self.capture_samples;
                    cursor = (event - start_index) as usize;
                    trace!(index = event, "event trigger");
                }
                Phase::InCapture => {
                    let take = self.capture_remaining.min(len - cursor);
                    cursor += take;
                    self.capture_remaining -= take;
                    if self.capture_remaining > 0 {
                        return;
                    }
                    results.capture_end_indices.push(start_index + cursor as u64);
                    if self.holdoff_samples > 0 {
                        self.phase = Phase::InHoldoff;
                        self.holdoff_remaining = self.holdoff_samples;
                    } else {
                        self.phase = Phase::Idle;
                    }
                }
                Phase::InHoldoff => {
                    let take = self.holdoff_remaining.min(len - cursor);
                    cursor += take;
                    self.holdoff_remaining -= take;
                    if self.holdoff_remaining > 0 {
                        return;
                    }
                    self.phase = Phase::Idle;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.capture_remaining = 0;
        self.holdoff_remaining = 0;
        self.observed = 0;
        self.queue.clear();
    }

    fn push_event(&mut self, index: u64) {
        self.queue.push_back(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal(depth: usize, position: usize) -> HorizontalSettings {
        HorizontalSettings {
            capture_depth: depth,
            trigger_position: position,
            extra_holdoff: 0,
        }
    }

    fn run_block(engine: &mut EventTrigger<i16>, len: usize, start: u64) -> ScanResults {
        let samples = vec![0i16; len];
        let mut results = ScanResults::new();
        engine.process(&samples, start, &mut results);
        results
    }

    #[test]
    fn test_event_fires_in_block_range() {
        let mut engine = EventTrigger::<i16>::new(&horizontal(1000, 500));
        engine.push_event(2100);

        // First two blocks build history; the event sits in the third.
        let r = run_block(&mut engine, 1000, 0);
        assert!(r.trigger_indices.is_empty());
        let r = run_block(&mut engine, 1000, 1000);
        assert!(r.trigger_indices.is_empty());
        let r = run_block(&mut engine, 1000, 2000);
        assert_eq!(r.trigger_indices, vec![2100]);
        // position 500 of a 1000-deep window: 500 post-trigger samples.
        assert_eq!(r.capture_end_indices, vec![2600]);
    }

    #[test]
    fn test_holds_event_until_history_filled() {
        let mut engine = EventTrigger::<i16>::new(&horizontal(1000, 0));
        engine.push_event(100);

        // Event is in range but only 500 samples of history exist.
        let r = run_block(&mut engine, 500, 0);
        assert!(r.trigger_indices.is_empty());
        assert_eq!(engine.pending_events(), 1);
    }

    #[test]
    fn test_stale_events_discarded() {
        let mut engine = EventTrigger::<i16>::new(&horizontal(1000, 0));
        engine.push_event(50);
        engine.push_event(5500);

        let _ = run_block(&mut engine, 1000, 0);
        let r = run_block(&mut engine, 1000, 5000);
        // The first event became stale when the stream restarted at 5000.
        assert_eq!(r.trigger_indices, vec![5500]);
        assert_eq!(engine.pending_events(), 0);
    }

    #[test]
    fn test_capture_spans_blocks() {
        let mut engine = EventTrigger::<i16>::new(&horizontal(1000, 0));
        engine.push_event(1500);

        let _ = run_block(&mut engine, 1000, 0);
        let r = run_block(&mut engine, 1000, 1000);
        assert_eq!(r.trigger_indices, vec![1500]);
        assert!(r.capture_end_indices.is_empty());
        let r = run_block(&mut engine, 1000, 2000);
        assert_eq!(r.capture_end_indices, vec![2500]);
    }

    #[test]
    fn test_reset_clears_queue_and_history() {
        let mut engine = EventTrigger::<i16>::new(&horizontal(1000, 0));
        engine.push_event(1500);
        let _ = run_block(&mut engine, 2000, 0);

        TriggerEngine::<i16>::reset(&mut engine);
        assert_eq!(engine.pending_events(), 0);

        // History restarts: an early event cannot fire until a full
        // window has been observed again.
        engine.push_event(2100);
        let r = run_block(&mut engine, 500, 2000);
        assert!(r.trigger_indices.is_empty());
    }
}
