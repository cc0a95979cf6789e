//! `rust_scope`
//!
//! Real-time acquisition and trigger/capture core of a digital
//! oscilloscope engine. Turns a continuous stream of raw ADC sample
//! blocks into discrete, correctly windowed captures for a display
//! consumer, at sustained multi-hundred-MB/s block rates.
//!
//! # Pipeline
//!
//! ```text
//! hardware block ─► shuffle (de-interleave) ─┬─► acquisition rings
//!                                            └─► trigger engine
//!                                                     │ capture end
//!                                                     ▼
//!                                    window extraction ─► capture ring
//!                                                              │
//!                                                              ▼
//!                                                    external consumer
//! ```
//!
//! The [`engine`] module owns the per-block loop and the
//! Run/Stop/Single/Auto/Stream mode machine; [`trigger`] holds the edge,
//! burst and event state machines; [`ring`] the two ring-buffer
//! disciplines; [`shuffle`] the channel de-interleave; [`source`] a mock
//! hardware producer. Shared types live in the `scope-core` crate and
//! pooled block buffers in `scope-pool`.
//!
//! # Example
//!
//! ```no_run
//! use rust_scope::engine::spawn_engine;
//! use rust_scope::source::{MockSource, MockSourceConfig};
//! use scope_core::EngineSettings;
//! use scope_pool::BlockPool;
//! use std::sync::mpsc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = EngineSettings::default();
//! let pool = BlockPool::new(8, settings.hardware.block_bytes());
//! let (block_tx, block_rx) = mpsc::sync_channel(8);
//!
//! let source = MockSource::spawn(
//!     settings.hardware.clone(),
//!     MockSourceConfig::default(),
//!     pool,
//!     block_tx,
//! );
//! let (engine, captures) = spawn_engine(settings, block_rx)?;
//! engine.run()?;
//!
//! while let Some(capture) = captures.try_read() {
//!     println!("capture #{}", capture.metadata().sequence);
//! }
//!
//! engine.shutdown();
//! source.stop();
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod engine;
pub mod ring;
pub mod shuffle;
pub mod source;
pub mod trigger;

pub use block::RawBlock;
pub use engine::{spawn_engine, AcquisitionEngine, EngineCommand, EngineHandle};
pub use ring::{AcquisitionRing, CaptureRing, ChannelRings, CompletedCapture};
pub use shuffle::deinterleave;
pub use trigger::{build_trigger, ScanResults, TriggerEngine};

// Re-export the workspace crates so binaries and tests reach everything
// through one dependency.
pub use scope_core;
pub use scope_pool;
