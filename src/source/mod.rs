//! Block sources feeding the engine.
//!
//! The engine consumes [`RawBlock`]s from a bounded channel and does not
//! care who produces them. The real hardware reader lives behind a driver
//! boundary outside this crate; [`mock::MockSource`] is the in-tree
//! stand-in used by the CLI runner and the scenario tests.

pub mod mock;

pub use mock::{MockSource, MockSourceConfig, Waveform};
