//! Error types for the acquisition engine.
//!
//! Two layers, following the taxonomy the engine enforces:
//!
//! - [`ConfigError`]: semantic configuration problems, rejected
//!   synchronously when a configuration is validated or applied. These are
//!   never coerced into a different valid value (the only sanctioned
//!   coercion is trigger-level quantization away from the extreme codes,
//!   which happens in `Sample::from_volts`).
//! - [`ScopeError`]: runtime faults surfaced by engine components. Locally
//!   recoverable conditions (geometry-mismatched blocks, a full capture
//!   ring) are handled in place with counters and never reach this type.

use thiserror::Error;

use crate::sample::SampleFormat;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Hard floor on the capture window width, in samples per channel.
///
/// Windows below this make vectorized scanning and holdoff math meaningless;
/// configuring a smaller depth is a [`ConfigError`], not a runtime fault.
pub const MIN_CAPTURE_DEPTH: usize = 1000;

/// Semantic errors in an engine configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Capture depth below the hard minimum
    #[error("capture depth {depth} below minimum {min}")]
    CaptureDepthTooSmall { depth: usize, min: usize },

    /// Trigger position must leave a non-negative post-trigger span
    #[error("trigger position {position} exceeds capture depth {depth}")]
    TriggerPositionOutOfRange { position: usize, depth: usize },

    /// Channel geometry other than 1, 2 or 4 active channels
    #[error("invalid channel mask {mask:#06b}: {count} channels enabled, expected 1, 2 or 4")]
    InvalidChannelMask { mask: u8, count: usize },

    /// Trigger source channel is not in the enabled set
    #[error("trigger source channel {channel} is not enabled (mask {mask:#06b})")]
    TriggerSourceDisabled { channel: usize, mask: u8 },

    /// Burst window bounds are inverted or degenerate
    #[error("burst window inverted: low {low} >= high {high} (volts)")]
    BurstWindowInverted { low: f64, high: f64 },

    /// Burst quiet period of zero can never arm deterministically
    #[error("burst in-range period must be at least 1 sample")]
    BurstPeriodZero,

    /// Sample rate must be positive and finite
    #[error("invalid sample rate {rate} Hz")]
    InvalidSampleRate { rate: f64 },

    /// Full-scale rail must be positive and finite
    #[error("invalid full-scale range {volts} V")]
    InvalidFullScale { volts: f64 },

    /// Block length must be a positive multiple of the channel count
    #[error("block length {samples} samples is not divisible by {channels} channels")]
    BlockNotDivisible { samples: usize, channels: usize },

    /// Pool or ring sizing of zero slots
    #[error("{what} must be at least 1")]
    ZeroSized { what: &'static str },
}

/// Runtime errors from engine components.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Invalid configuration, see [`ConfigError`]
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raw block bytes do not decompose into whole interleaved frames
    #[error("block of {bytes} bytes is not a multiple of one {channels}-channel {format} frame")]
    BlockLengthMisaligned {
        bytes: usize,
        channels: usize,
        format: SampleFormat,
    },

    /// De-interleave called with a mismatched output set
    #[error("de-interleave output has {outputs} buffers, expected {channels}")]
    OutputChannelMismatch { outputs: usize, channels: usize },

    /// Window request outside the retained history of an acquisition ring
    #[error(
        "window ending at {end_index} unavailable: {total_written} samples written, \
         {capacity} retained"
    )]
    WindowOutOfRange {
        end_index: u64,
        total_written: u64,
        capacity: usize,
    },

    /// Channel index beyond the configured geometry
    #[error("channel {channel} out of range: {count} channels configured")]
    ChannelOutOfRange { channel: usize, count: usize },

    /// The engine thread is gone; commands can no longer be delivered
    #[error("engine control channel closed")]
    EngineGone,
}
