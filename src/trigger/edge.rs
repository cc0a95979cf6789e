//! Edge trigger: rising, falling, or either edge with hysteresis arming.

use scope_core::{
    hysteresis_codes, EdgeDirection, HardwareConfig, HorizontalSettings, Sample, TriggerSettings,
};
use tracing::trace;

use super::{find_first, ScanResults, TriggerEngine};

/// Edge-trigger state machine phase.
///
/// `Any` direction uses both armed sub-states; the pure rising/falling
/// variants only ever enter their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unarmed,
    ArmedRising,
    ArmedFalling,
    InCapture,
    InHoldoff,
}

/// Level-crossing trigger with a hysteresis arm band.
///
/// Arming requires the signal to first cross the arm level on the far side
/// of the hysteresis band (for a rising trigger: a sample at or below
/// `level - hysteresis`), which rejects re-triggering on noise riding the
/// trigger level. The arm and trigger levels are quantized away from the
/// extreme codes so a rail-pinned flat line can still arm.
pub struct EdgeTrigger<S: Sample> {
    direction: EdgeDirection,
    /// Trigger level in codes
    level: S,
    /// Arm threshold below the level (rising arm)
    arm_low: S,
    /// Arm threshold above the level (falling arm)
    arm_high: S,
    /// Post-trigger samples per window
    capture_samples: usize,
    /// Quiet samples after each window
    holdoff_samples: usize,
    phase: Phase,
    capture_remaining: usize,
    holdoff_remaining: usize,
}

impl<S: Sample> EdgeTrigger<S> {
    /// Build from configuration; starts unarmed.
    pub fn new(
        trigger: &TriggerSettings,
        hardware: &HardwareConfig,
        horizontal: &HorizontalSettings,
    ) -> Self {
        let mut engine = Self {
            direction: EdgeDirection::Rising,
            level: S::default(),
            arm_low: S::default(),
            arm_high: S::default(),
            capture_samples: 0,
            holdoff_samples: 0,
            phase: Phase::Unarmed,
            capture_remaining: 0,
            holdoff_remaining: 0,
        };
        engine.set_trigger(trigger, hardware);
        engine.set_horizontal(horizontal);
        engine
    }

    /// Current trigger level in codes (for tests and introspection).
    pub fn level(&self) -> S {
        self.level
    }
}

impl<S: Sample> TriggerEngine<S> for EdgeTrigger<S> {
    fn set_trigger(&mut self, trigger: &TriggerSettings, hardware: &HardwareConfig) {
        let edge = &trigger.edge;
        let hyst = hysteresis_codes::<S>(edge.hysteresis_percent);
        self.level = S::from_volts(edge.level_volts, hardware.full_scale_volts);
        self.arm_low = S::coerce(self.level.to_i32() - hyst);
        self.arm_high = S::coerce(self.level.to_i32() + hyst);
        self.direction = edge.direction;
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
                    let arm_low = self.arm_low;
                    let arm_high = self.arm_high;
                    let hit = match self.direction {
                        EdgeDirection::Rising => find_first(samples, cursor, |s| s <= arm_low),
                        EdgeDirection::Falling => find_first(samples, cursor, |s| s >= arm_high),
                        EdgeDirection::Any => {
                            find_first(samples, cursor, |s| s <= arm_low || s >= arm_high)
                        }
                    };
                    let Some(i) = hit else { return };
                    results.arm_indices.push(start_index + i as u64);
                    self.phase = match self.direction {
                        EdgeDirection::Rising => Phase::ArmedRising,
                        EdgeDirection::Falling => Phase::ArmedFalling,
                        // Rising-edge priority: when the same sample
                        // satisfies both arm conditions, rising wins.
                        EdgeDirection::Any if samples[i] <= arm_low => Phase::ArmedRising,
                        EdgeDirection::Any => Phase::ArmedFalling,
                    };
                    trace!(index = start_index + i as u64, phase = ?self.phase, "armed");
                    // The arm sample cannot also satisfy the trigger
                    // predicate, so the armed scan may resume on it.
                    cursor = i;
                }
                Phase::ArmedRising => {
                    let level = self.level;
                    let Some(i) = find_first(samples, cursor, |s| s > level) else {
                        return;
                    };
                    results.trigger_indices.push(start_index + i as u64);
                    self.phase = Phase::InCapture;
                    self.capture_remaining = self.capture_samples;
                    trace!(index = start_index + i as u64, "rising trigger");
                    // The trigger sample is the first sample of the
                    // post-trigger span.
                    cursor = i;
                }
                Phase::ArmedFalling => {
                    let level = self.level;
                    let Some(i) = find_first(samples, cursor, |s| s < level) else {
                        return;
                    };
                    results.trigger_indices.push(start_index + i as u64);
                    self.phase = Phase::InCapture;
                    self.capture_remaining = self.capture_samples;
                    trace!(index = start_index + i as u64, "falling trigger");
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
        self.capture_remaining = 0;
        self.holdoff_remaining = 0;
    }
}
