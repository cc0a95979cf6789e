//! `scope-core`
//!
//! Core types for the rust_scope acquisition engine.
//!
//! This crate holds the building blocks shared by every part of the
//! workspace: the typed sample abstraction over the two ADC widths, the
//! channel geometry and configuration model with synchronous validation,
//! the error taxonomy, and the capture metadata handed to consumers.
//!
//! ## Key Types
//!
//! - [`Sample`]: sealed trait over `i8`/`i16` samples
//! - [`EngineSettings`]: complete, TOML-loadable engine configuration
//! - [`ChannelMask`]: 1/2/4-channel hardware geometry
//! - [`ConfigError`] / [`ScopeError`]: configuration vs runtime failures
//! - [`CaptureMetadata`]: per-capture snapshot published to consumers

pub mod config;
pub mod error;
pub mod metadata;
pub mod sample;

pub use config::{
    BurstSettings, ChannelMask, EdgeDirection, EdgeSettings, EngineSettings, HardwareConfig,
    HorizontalSettings, RunMode, TriggerSettings, TriggerType, MAX_CHANNELS,
};
pub use error::{ConfigError, Result, ScopeError, MIN_CAPTURE_DEPTH};
pub use metadata::CaptureMetadata;
pub use sample::{hysteresis_codes, Sample, SampleFormat};
