//! Control-plane message types for the acquisition engine.
//!
//! Commands are sent over an mpsc channel and applied by the engine thread
//! between blocks, so command application is serialized with block
//! processing and no state needs a lock. Fire-and-forget commands carry no
//! response; `Get*` commands embed a `oneshot::Sender` and have helper
//! constructors that hand back the matching receiver:
//!
//! ```rust
//! use rust_scope::engine::EngineCommand;
//!
//! let (cmd, rx) = EngineCommand::get_stats();
//! // cmd_tx.send(cmd)?;
//! // let stats = rx.blocking_recv()?;
//! # let _ = (cmd, rx);
//! ```
//!
//! Command latency is bounded by one block's processing time: the engine
//! polls the queue once per loop iteration.

use tokio::sync::oneshot;

use scope_core::{ChannelMask, EdgeDirection, EngineSettings, RunMode, SampleFormat, TriggerType};

use crate::ring::CaptureRingStats;

/// Commands accepted by the engine thread.
///
/// Setter commands that would produce an invalid configuration are
/// rejected in place: the engine logs a warning and keeps the previous
/// configuration (use [`EngineSettings::validate`] on the caller side for
/// synchronous feedback).
#[derive(Debug)]
pub enum EngineCommand {
    /// Start acquiring with the current mode's latch setup
    Run,
    /// Stop acquiring; queued blocks drain back to the pool unprocessed
    Stop,
    /// Capture once without a trigger, then resume normal triggering.
    /// Only effective while running; in Single mode the forced capture
    /// counts as the one capture and stops the engine.
    Force,
    /// Switch run mode (does not reset acquisition state)
    SetMode(RunMode),
    /// Capture window depth in samples per channel
    SetDepth(usize),
    /// Per-channel sample rate in hertz
    SetRate(f64),
    /// ADC resolution
    SetResolution(SampleFormat),
    /// Enabled channel set
    SetEnabledChannels(ChannelMask),
    /// Trigger source channel
    SetTriggerSource(usize),
    /// Active trigger engine variant
    SetTriggerType(TriggerType),
    /// Pre-trigger sample split within the window
    SetTriggerDelay(usize),
    /// Extra holdoff samples appended to the derived holdoff
    SetTriggerHoldoff(usize),
    /// Edge trigger level in volts
    SetEdgeLevel(f64),
    /// Edge trigger polarity
    SetEdgeDirection(EdgeDirection),
    /// Queue an absolute-index event for the event trigger variant
    PushTriggerEvent(u64),
    /// Snapshot of run state, mode and configuration
    GetStatus {
        /// Response channel
        response: oneshot::Sender<EngineStatus>,
    },
    /// Snapshot of the engine's processing counters
    GetStats {
        /// Response channel
        response: oneshot::Sender<EngineStats>,
    },
    /// Snapshot of the capture ring's counters
    GetCaptureStats {
        /// Response channel
        response: oneshot::Sender<CaptureRingStats>,
    },
    /// Zero the capture ring's interval counters
    ResetIntervalStats,
    /// Exit the engine thread cooperatively
    Shutdown,
}

impl EngineCommand {
    /// Create a [`EngineCommand::GetStatus`] with its receiver.
    pub fn get_status() -> (Self, oneshot::Receiver<EngineStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Create a [`EngineCommand::GetStats`] with its receiver.
    pub fn get_stats() -> (Self, oneshot::Receiver<EngineStats>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStats { response: tx }, rx)
    }

    /// Create a [`EngineCommand::GetCaptureStats`] with its receiver.
    pub fn get_capture_stats() -> (Self, oneshot::Receiver<CaptureRingStats>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCaptureStats { response: tx }, rx)
    }
}

/// Run state and configuration snapshot returned by `GetStatus`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Whether the engine is acquiring
    pub running: bool,
    /// Current run mode
    pub mode: RunMode,
    /// Configuration in effect
    pub settings: EngineSettings,
}

/// Processing counters kept by the engine thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Blocks fully processed
    pub blocks_processed: u64,
    /// Blocks dropped for geometry mismatch
    pub blocks_dropped: u64,
    /// Real trigger firings observed
    pub triggers_fired: u64,
    /// Captures published to the capture ring
    pub captures_published: u64,
    /// Captures lost to a full capture ring
    pub captures_dropped: u64,
    /// Forced (trigger-bypass) captures attempted
    pub captures_forced: u64,
    /// Auto-timeout captures synthesized
    pub captures_auto: u64,
}

/// Advisory notifications pushed by the engine.
///
/// Fire-and-forget over a broadcast channel: lagging or absent subscribers
/// never affect the acquisition path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Acquisition started or stopped
    RunStateChanged {
        /// New run state
        running: bool,
    },
    /// Run mode switched
    ModeChanged(RunMode),
    /// A forced capture was taken
    CaptureForced,
    /// An auto-timeout capture was synthesized
    AutoCapture,
    /// Configuration changed and acquisition state was reset
    ConfigChanged,
}
