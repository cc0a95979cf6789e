//! Burst trigger: arms on a quiet window, fires when the signal leaves it.

use scope_core::{HardwareConfig, HorizontalSettings, Sample, TriggerSettings};
use tracing::trace;

use super::{find_first, ScanResults, TriggerEngine, SCAN_CHUNK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unarmed,
    Armed,
    InCapture,
    InHoldoff,
}

/// Quiet-window burst trigger.
///
/// While unarmed, the signal must stay strictly inside `(window_low,
/// window_high)` for `in_range_period` consecutive samples; any sample at
/// or outside a boundary resets the run counter to the full requirement.
/// Once armed, the first sample at or beyond either boundary fires the
/// trigger. Capture and holdoff behave exactly as in the edge variants.
pub struct BurstTrigger<S: Sample> {
    /// Lower window bound in codes
    window_low: S,
    /// Upper window bound in codes
    window_high: S,
    /// Quiet run required before arming
    in_range_period: usize,
    capture_samples: usize,
    holdoff_samples: usize,
    phase: Phase,
    /// Quiet samples still required (counts down toward arming)
    run_remaining: usize,
    capture_remaining: usize,
    holdoff_remaining: usize,
}

impl<S: Sample> BurstTrigger<S> {
    /// Build from configuration; starts unarmed with a full quiet
    /// requirement.
    pub fn new(
        trigger: &TriggerSettings,
        hardware: &HardwareConfig,
        horizontal: &HorizontalSettings,
    ) -> Self {
        let mut engine = Self {
            window_low: S::default(),
            window_high: S::default(),
            in_range_period: 1,
            capture_samples: 0,
            holdoff_samples: 0,
            phase: Phase::Unarmed,
            run_remaining: 1,
            capture_remaining: 0,
            holdoff_remaining: 0,
        };
        engine.set_trigger(trigger, hardware);
        engine.set_horizontal(horizontal);
        engine
    }

    #[inline]
    fn in_band(&self, s: S) -> bool {
        self.window_low < s && s < self.window_high
    }

    /// Scan for the sample that completes the quiet run.
    ///
    /// Whole chunks strictly inside the band are consumed in one test;
    /// the scalar tail handles boundary samples and run resets.
    fn scan_quiet(&mut self, samples: &[S], mut i: usize) -> Option<usize> {
        while i < samples.len() {
            if self.run_remaining > SCAN_CHUNK && i + SCAN_CHUNK <= samples.len() {
                let chunk = &samples[i..i + SCAN_CHUNK];
                if chunk.iter().all(|&s| self.in_band(s)) {
                    self.run_remaining -= SCAN_CHUNK;
                    i += SCAN_CHUNK;
                    continue;
                }
            }
            if self.in_band(samples[i]) {
                self.run_remaining -= 1;
                if self.run_remaining == 0 {
                    // Reload for the next arming cycle.
                    self.run_remaining = self.in_range_period;
                    return Some(i);
                }
            } else {
                self.run_remaining = self.in_range_period;
            }
            i += 1;
        }
        None
    }
}

impl<S: Sample> TriggerEngine<S> for BurstTrigger<S> {
    fn set_trigger(&mut self, trigger: &TriggerSettings, hardware: &HardwareConfig) {
        let burst = &trigger.burst;
        self.window_low = S::from_volts(burst.window_low_volts, hardware.full_scale_volts);
        self.window_high = S::from_volts(burst.window_high_volts, hardware.full_scale_volts);
        self.in_range_period = burst.in_range_period.max(1);
        self.reset();
    }

    fn set_horizontal(&mut self, horizontal: &HorizontalSettings) {
        self.capture_samples = horizontal.capture_samples();
        self.holdoff_samples = horizontal.holdoff_samples();
        self.reset();
    }

    fn process(&mut self, samples: &[S], start_index: u64, results: &mut ScanResults) {
        results.clear();
        let mut cursor = 0usize;

        while cursor < samples.len() {
            match self.phase {
                Phase::Unarmed => {
                    let Some(i) = self.scan_quiet(samples, cursor) else {
                        return;
                    };
                    results.arm_indices.push(start_index + i as u64);
                    self.phase = Phase::Armed;
                    trace!(index = start_index + i as u64, "burst armed");
                    cursor = i + 1;
                }
                Phase::Armed => {
                    let low = self.window_low;
                    let high = self.window_high;
                    let Some(i) = find_first(samples, cursor, |s| s <= low || s >= high) else {
                        return;
                    };
                    results.trigger_indices.push(start_index + i as u64);
                    self.phase = Phase::InCapture;
                    self.capture_remaining = self.capture_samples;
                    trace!(index = start_index + i as u64, "burst trigger");
                    cursor = i;
                }
                Phase::InCapture => {
                    let take = self.capture_remaining.min(samples.len() - cursor);
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
                        self.phase = Phase::Unarmed;
                    }
                }
                Phase::InHoldoff => {
                    let take = self.holdoff_remaining.min(samples.len() - cursor);
                    cursor += take;
                    self.holdoff_remaining -= take;
                    if self.holdoff_remaining > 0 {
                        return;
                    }
                    self.phase = Phase::Unarmed;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Unarmed;
        self.run_remaining = self.in_range_period;
        self.capture_remaining = 0;
        self.holdoff_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::{BurstSettings, TriggerType};

    fn settings(low: f64, high: f64, period: usize) -> TriggerSettings {
        TriggerSettings {
            source: 0,
            active: TriggerType::Burst,
            burst: BurstSettings {
                window_low_volts: low,
                window_high_volts: high,
                in_range_period: period,
            },
            ..Default::default()
        }
    }

    fn horizontal(depth: usize, position: usize) -> HorizontalSettings {
        HorizontalSettings {
            capture_depth: depth,
            trigger_position: position,
            extra_holdoff: 0,
        }
    }

    fn engine(period: usize) -> BurstTrigger<i16> {
        BurstTrigger::new(
            &settings(-0.25, 0.25, period),
            &HardwareConfig::default(),
            &horizontal(1000, 0),
        )
    }

    #[test]
    fn test_arms_after_quiet_run_then_fires() {
        let mut engine = engine(100);

        // 200 quiet samples, then a burst well outside the window.
        let mut samples = vec![0i16; 200];
        samples.extend(std::iter::repeat(20_000i16).take(100));
        let mut results = ScanResults::new();
        engine.process(&samples, 0, &mut results);

        // Quiet run completes on the 100th in-band sample (index 99).
        assert_eq!(results.arm_indices, vec![99]);
        assert_eq!(results.trigger_indices, vec![200]);
    }

    #[test]
    fn test_out_of_band_resets_run() {
        let mut engine = engine(100);

        // 80 quiet, one excursion, 80 quiet: never arms.
        let mut samples = vec![0i16; 80];
        samples.push(20_000);
        samples.extend(std::iter::repeat(0i16).take(80));
        let mut results = ScanResults::new();
        engine.process(&samples, 0, &mut results);
        assert!(results.arm_indices.is_empty());

        // 100 more quiet samples: the run restarts after the excursion and
        // completes 100 in-band samples later.
        engine.process(&vec![0i16; 100], 161, &mut results);
        assert_eq!(results.arm_indices.len(), 1);
    }

    #[test]
    fn test_boundary_sample_fires_when_armed() {
        let mut engine = engine(10);
        let low = engine.window_low;

        let mut samples = vec![0i16; 50];
        samples.push(low); // exactly at the boundary
        let mut results = ScanResults::new();
        engine.process(&samples, 0, &mut results);
        assert_eq!(results.trigger_indices, vec![50]);
    }

    #[test]
    fn test_quiet_run_spans_blocks() {
        let mut engine = engine(150);
        let mut results = ScanResults::new();

        engine.process(&vec![0i16; 100], 0, &mut results);
        assert!(results.arm_indices.is_empty());

        engine.process(&vec![0i16; 100], 100, &mut results);
        // 50 more in-band samples complete the run at absolute index 149.
        assert_eq!(results.arm_indices, vec![149]);
    }

    #[test]
    fn test_capture_end_after_burst() {
        let mut engine = engine(50);

        let mut samples = vec![0i16; 100];
        samples.extend(std::iter::repeat(20_000i16).take(1500));
        let mut results = ScanResults::new();
        engine.process(&samples, 0, &mut results);

        assert_eq!(results.trigger_indices, vec![100]);
        // depth 1000, position 0: the window closes 1000 samples later.
        assert_eq!(results.capture_end_indices, vec![1100]);
    }

    #[test]
    fn test_reset_requires_full_quiet_run_again() {
        let mut engine = engine(100);
        let mut results = ScanResults::new();

        engine.process(&vec![0i16; 99], 0, &mut results);
        engine.reset();
        // One more quiet sample would have armed without the reset.
        engine.process(&vec![0i16; 1], 99, &mut results);
        assert!(results.arm_indices.is_empty());
    }
}
