//! Engine configuration model.
//!
//! All configuration is validated synchronously: [`EngineSettings::validate`]
//! (and the per-section `validate` methods it calls) reject semantic errors
//! before anything touches the acquisition path. The engine applies the same
//! checks when a control command mutates a single field at runtime, so an
//! invalid command is refused rather than silently coerced.
//!
//! Settings are plain serde structs loadable from TOML:
//!
//! ```toml
//! [hardware]
//! sample_rate_hz = 1_000_000.0
//! format = "bits16"
//! channel_mask = 0b0011
//! block_samples = 16384
//! full_scale_volts = 1.0
//!
//! [horizontal]
//! capture_depth = 4096
//! trigger_position = 1024
//!
//! [trigger]
//! source = 0
//! active = "edge"
//!
//! [trigger.edge]
//! level_volts = 0.1
//! hysteresis_percent = 2.5
//! direction = "rising"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, MIN_CAPTURE_DEPTH};
use crate::sample::SampleFormat;

/// Highest channel index any hardware geometry exposes.
pub const MAX_CHANNELS: usize = 4;

/// Set of enabled input channels.
///
/// The hardware multiplexes 1, 2 or 4 channels sample-by-sample into one
/// block; any other population count is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(pub u8);

impl ChannelMask {
    /// Mask with only channel 0 enabled.
    pub const CH1: ChannelMask = ChannelMask(0b0001);

    /// Number of enabled channels.
    pub fn count(self) -> usize {
        (self.0 & 0x0F).count_ones() as usize
    }

    /// Whether `channel` is enabled.
    pub fn contains(self, channel: usize) -> bool {
        channel < MAX_CHANNELS && self.0 & (1 << channel) != 0
    }

    /// Enabled channel indices in ascending order.
    ///
    /// The position of a channel in this sequence is its "slot": the index
    /// of its de-interleaved stream, its acquisition ring and its capture
    /// buffer.
    pub fn channels(self) -> impl Iterator<Item = usize> {
        let mask = self.0;
        (0..MAX_CHANNELS).filter(move |ch| mask & (1 << ch) != 0)
    }

    /// Slot index of `channel` within the enabled set, if enabled.
    pub fn slot_of(self, channel: usize) -> Option<usize> {
        self.channels().position(|ch| ch == channel)
    }

    /// Reject masks with a population count other than 1, 2 or 4, or with
    /// bits beyond the 4 hardware channels.
    pub fn validate(self) -> Result<(), ConfigError> {
        let count = self.count();
        if self.0 & !0x0F != 0 || !matches!(count, 1 | 2 | 4) {
            return Err(ConfigError::InvalidChannelMask {
                mask: self.0,
                count,
            });
        }
        Ok(())
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        ChannelMask::CH1
    }
}

/// Edge polarity for edge-triggered acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    /// Trigger when the signal rises through the level
    #[default]
    Rising,
    /// Trigger when the signal falls through the level
    Falling,
    /// Trigger on either edge, rising wins when both arm in the same scan
    Any,
}

/// Which trigger engine variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Level/hysteresis edge detection
    #[default]
    Edge,
    /// Quiet-window burst detection
    Burst,
    /// Externally queued absolute-index events
    Event,
}

/// Parameters for the edge trigger variants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeSettings {
    /// Trigger level in volts
    pub level_volts: f64,
    /// Hysteresis (arm band) as a percentage of full scale
    pub hysteresis_percent: f64,
    /// Edge polarity
    pub direction: EdgeDirection,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            level_volts: 0.0,
            hysteresis_percent: 2.5,
            direction: EdgeDirection::Rising,
        }
    }
}

/// Parameters for the burst trigger variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstSettings {
    /// Lower bound of the quiet window, volts
    pub window_low_volts: f64,
    /// Upper bound of the quiet window, volts
    pub window_high_volts: f64,
    /// Samples the signal must stay strictly inside the window before arming
    pub in_range_period: usize,
}

impl Default for BurstSettings {
    fn default() -> Self {
        Self {
            window_low_volts: -0.1,
            window_high_volts: 0.1,
            in_range_period: 128,
        }
    }
}

impl BurstSettings {
    /// Reject inverted windows and zero quiet periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_low_volts >= self.window_high_volts {
            return Err(ConfigError::BurstWindowInverted {
                low: self.window_low_volts,
                high: self.window_high_volts,
            });
        }
        if self.in_range_period == 0 {
            return Err(ConfigError::BurstPeriodZero);
        }
        Ok(())
    }
}

/// Complete trigger configuration.
///
/// Edge and burst parameter sets are both retained so switching the active
/// type back and forth does not lose the other variant's tuning — only the
/// active variant's engine is instantiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TriggerSettings {
    /// Channel the active trigger engine scans
    pub source: usize,
    /// Active engine variant
    pub active: TriggerType,
    /// Edge parameters (used when `active` is [`TriggerType::Edge`])
    #[serde(default)]
    pub edge: EdgeSettings,
    /// Burst parameters (used when `active` is [`TriggerType::Burst`])
    #[serde(default)]
    pub burst: BurstSettings,
}

impl TriggerSettings {
    /// Validate against the channel geometry the trigger will run under.
    pub fn validate(&self, channels: ChannelMask) -> Result<(), ConfigError> {
        if !channels.contains(self.source) {
            return Err(ConfigError::TriggerSourceDisabled {
                channel: self.source,
                mask: channels.0,
            });
        }
        if self.active == TriggerType::Burst {
            self.burst.validate()?;
        }
        Ok(())
    }
}

/// Capture window geometry: depth, pre-trigger split and holdoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalSettings {
    /// Samples per channel in one complete capture
    pub capture_depth: usize,
    /// Samples of the window reserved before the trigger point
    pub trigger_position: usize,
    /// Extra quiet samples appended to the derived holdoff
    #[serde(default)]
    pub extra_holdoff: usize,
}

impl Default for HorizontalSettings {
    fn default() -> Self {
        Self {
            capture_depth: 4096,
            trigger_position: 1024,
            extra_holdoff: 0,
        }
    }
}

impl HorizontalSettings {
    /// Samples consumed after the trigger fires before the window closes.
    ///
    /// Never negative: `trigger_position <= capture_depth` is enforced by
    /// [`validate`](Self::validate).
    pub fn capture_samples(&self) -> usize {
        self.capture_depth - self.trigger_position
    }

    /// Minimum quiet samples between a window end and the next arm.
    ///
    /// `capture_depth - capture_samples + extra_holdoff`; guarantees
    /// consecutive windows never alias in the acquisition ring.
    pub fn holdoff_samples(&self) -> usize {
        self.capture_depth - self.capture_samples() + self.extra_holdoff
    }

    /// Enforce the depth floor and the pre-trigger split.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture_depth < MIN_CAPTURE_DEPTH {
            return Err(ConfigError::CaptureDepthTooSmall {
                depth: self.capture_depth,
                min: MIN_CAPTURE_DEPTH,
            });
        }
        if self.trigger_position > self.capture_depth {
            return Err(ConfigError::TriggerPositionOutOfRange {
                position: self.trigger_position,
                depth: self.capture_depth,
            });
        }
        Ok(())
    }
}

/// Hardware-facing acquisition geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Per-channel sample rate in hertz
    pub sample_rate_hz: f64,
    /// ADC resolution
    pub format: SampleFormat,
    /// Enabled channel set (1, 2 or 4 channels)
    pub channel_mask: ChannelMask,
    /// Interleaved samples per hardware block (all channels combined)
    pub block_samples: usize,
    /// Positive full-scale rail in volts, for level quantization
    pub full_scale_volts: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1_000_000.0,
            format: SampleFormat::Bits16,
            channel_mask: ChannelMask::CH1,
            block_samples: 16_384,
            full_scale_volts: 1.0,
        }
    }
}

impl HardwareConfig {
    /// Per-channel samples (time ticks) carried by one block.
    pub fn ticks_per_block(&self) -> usize {
        self.block_samples / self.channel_mask.count().max(1)
    }

    /// Raw byte size of one block.
    pub fn block_bytes(&self) -> usize {
        self.block_samples * self.format.bytes_per_sample()
    }

    /// Validate rate, geometry and block divisibility.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(ConfigError::InvalidSampleRate {
                rate: self.sample_rate_hz,
            });
        }
        self.channel_mask.validate()?;
        let channels = self.channel_mask.count();
        if self.block_samples == 0 || self.block_samples % channels != 0 {
            return Err(ConfigError::BlockNotDivisible {
                samples: self.block_samples,
                channels,
            });
        }
        if !self.full_scale_volts.is_finite() || self.full_scale_volts <= 0.0 {
            return Err(ConfigError::InvalidFullScale {
                volts: self.full_scale_volts,
            });
        }
        Ok(())
    }
}

/// Acquisition run mode while the engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Capture on every trigger, indefinitely
    #[default]
    Normal,
    /// Stop after the first completed capture
    Single,
    /// Normal, plus a synthesized capture when no trigger fires in time
    Auto,
    /// Continuous synthesized captures, trigger engine ignored
    Stream,
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Hardware geometry
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Capture window geometry
    #[serde(default)]
    pub horizontal: HorizontalSettings,
    /// Trigger configuration
    #[serde(default)]
    pub trigger: TriggerSettings,
    /// Initial run mode
    #[serde(default)]
    pub mode: RunMode,
    /// Auto-mode timeout before a capture is synthesized
    #[serde(with = "humantime_serde", default = "default_auto_timeout")]
    pub auto_timeout: Duration,
    /// Capture ring slots
    #[serde(default = "default_capture_slots")]
    pub capture_slots: usize,
}

fn default_auto_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_capture_slots() -> usize {
    8
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            horizontal: HorizontalSettings::default(),
            trigger: TriggerSettings::default(),
            mode: RunMode::default(),
            auto_timeout: default_auto_timeout(),
            capture_slots: default_capture_slots(),
        }
    }
}

impl EngineSettings {
    /// Validate every section, including cross-section constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hardware.validate()?;
        self.horizontal.validate()?;
        self.trigger.validate(self.hardware.channel_mask)?;
        if self.capture_slots == 0 {
            return Err(ConfigError::ZeroSized {
                what: "capture_slots",
            });
        }
        Ok(())
    }
}
