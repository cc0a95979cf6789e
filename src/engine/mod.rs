//! Acquisition orchestrator: the per-block control loop and mode machine.
//!
//! One dedicated thread owns the entire pipeline — trigger engine,
//! acquisition rings and the write side of the capture ring — so nothing
//! on the hot path takes a lock. Blocks arrive on a bounded channel from
//! the hardware-read thread; control commands arrive on a second channel
//! polled once per loop iteration, which serializes command application
//! with block processing.
//!
//! # Per-block flow
//!
//! ```text
//! block ──geometry check──► shuffle ──► acquisition rings
//!                                           │
//!                        trigger engine ◄───┤ (or Stream bypass)
//!                              │            │
//!                  capture-end indices      │
//!                              ▼            ▼
//!                        window extraction (readWindow)
//!                              │
//!                              ▼
//!                        capture ring (drop-newest)
//! ```
//!
//! # Modes
//!
//! `Stopped`/`Running` with sub-modes `Normal`, `Single`, `Auto` and
//! `Stream` while running. `Force` bypasses the trigger for exactly one
//! capture once enough history exists. Any configuration change resets the
//! acquisition rings, reconfigures the capture ring and resets the trigger
//! engine; a geometry-mismatched block is dropped whole rather than risk
//! corrupting ring indexing.
//!
//! Shutdown is cooperative: a `Shutdown` command (or every handle going
//! away) ends the loop, and pooled block buffers drain back automatically
//! as their loans drop.

pub mod command;

pub use command::{EngineCommand, EngineEvent, EngineStats, EngineStatus};

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use scope_core::{
    CaptureMetadata, EngineSettings, RunMode, Sample, SampleFormat, ScopeError, TriggerType,
};

use crate::block::RawBlock;
use crate::ring::{CaptureRing, ChannelRings};
use crate::shuffle::{deinterleave, encode_samples};
use crate::trigger::{build_trigger, ScanResults, TriggerEngine};

/// Idle tick for the engine loop when no block is pending.
///
/// Bounds command latency and auto-timer resolution while the block
/// source is quiet; while blocks flow, the loop wakes per block.
const IDLE_TICK: Duration = Duration::from_millis(5);

/// Capacity of the advisory event channel.
const EVENT_CAPACITY: usize = 64;

/// Width-specific half of the engine: rings, trigger and scratch buffers.
struct Pipeline<S: Sample> {
    rings: ChannelRings<S>,
    trigger: Box<dyn TriggerEngine<S>>,
    /// De-interleaved per-channel streams, reused every block
    streams: Vec<Vec<S>>,
    /// Window extraction scratch, `capture_depth` samples
    window: Vec<S>,
    results: ScanResults,
}

impl<S: Sample> Pipeline<S> {
    fn new(settings: &EngineSettings) -> Self {
        let channels = settings.hardware.channel_mask.count();
        let capacity = settings.horizontal.capture_depth + settings.hardware.ticks_per_block();
        Self {
            rings: ChannelRings::new(channels, capacity),
            trigger: build_trigger(&settings.trigger, &settings.hardware, &settings.horizontal),
            streams: vec![Vec::new(); channels],
            window: vec![S::default(); settings.horizontal.capture_depth],
            results: ScanResults::new(),
        }
    }

    /// Shuffle a raw block into the per-channel rings.
    fn ingest(&mut self, raw: &[u8]) -> Result<(), ScopeError> {
        let channels = self.streams.len();
        deinterleave::<S>(raw, channels, &mut self.streams)?;
        self.rings.write(&self.streams);
        Ok(())
    }

    /// Apply a validated configuration, resetting all acquisition state.
    ///
    /// The trigger engine instance is rebuilt only when `rebuild_trigger`
    /// says the variant itself changed; otherwise the existing instance is
    /// re-parameterized (which still resets its state machine).
    fn reconfigure(&mut self, settings: &EngineSettings, rebuild_trigger: bool) {
        let channels = settings.hardware.channel_mask.count();
        let capacity = settings.horizontal.capture_depth + settings.hardware.ticks_per_block();
        if channels != self.streams.len() || capacity != self.rings.capacity() {
            self.rings = ChannelRings::new(channels, capacity);
            self.streams = vec![Vec::new(); channels];
        } else {
            self.rings.reset();
        }
        self.window.resize(settings.horizontal.capture_depth, S::default());
        if rebuild_trigger {
            self.trigger =
                build_trigger(&settings.trigger, &settings.hardware, &settings.horizontal);
        } else {
            self.trigger.set_trigger(&settings.trigger, &settings.hardware);
            self.trigger.set_horizontal(&settings.horizontal);
        }
    }

}

/// Run state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
}

/// Width-dispatched pipeline.
enum PipelineKind {
    Bits8(Pipeline<i8>),
    Bits16(Pipeline<i16>),
}

impl PipelineKind {
    fn build(settings: &EngineSettings) -> Self {
        match settings.hardware.format {
            SampleFormat::Bits8 => PipelineKind::Bits8(Pipeline::new(settings)),
            SampleFormat::Bits16 => PipelineKind::Bits16(Pipeline::new(settings)),
        }
    }

    fn total_written(&self) -> u64 {
        match self {
            PipelineKind::Bits8(p) => p.rings.total_written(),
            PipelineKind::Bits16(p) => p.rings.total_written(),
        }
    }

    fn push_event(&mut self, index: u64) {
        match self {
            PipelineKind::Bits8(p) => p.trigger.push_event(index),
            PipelineKind::Bits16(p) => p.trigger.push_event(index),
        }
    }
}

/// Mode-machine and bookkeeping state shared across sample widths.
struct Shared {
    settings: EngineSettings,
    capture_ring: CaptureRing,
    state: RunState,
    mode: RunMode,
    /// One-shot trigger bypass latch set by `Force`
    force_pending: bool,
    /// Auto-mode wall-clock deadline against block arrival
    auto_deadline: Option<Instant>,
    /// Next synthetic window end in Stream mode
    stream_next_end: u64,
    sequence: u64,
    stats: EngineStats,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn notify(&self, event: EngineEvent) {
        // Advisory only; nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn restart_auto_timer(&mut self) {
        if self.state == RunState::Running && self.mode == RunMode::Auto {
            self.auto_deadline = Some(Instant::now() + self.settings.auto_timeout);
        } else {
            self.auto_deadline = None;
        }
    }

    /// Extract the window ending at `end` into a capture slot.
    ///
    /// Returns true when a slot was published. A full ring counts a drop
    /// and the engine moves on; a window that would reach before the
    /// start of the stream is skipped (pre-trigger history not yet
    /// filled).
    fn extract<S: Sample>(&mut self, pipeline: &mut Pipeline<S>, end: u64, triggered: bool) -> bool {
        let depth = self.settings.horizontal.capture_depth;
        if end < depth as u64 {
            debug!(end, depth, "window precedes stream start, skipped");
            return false;
        }
        let Some(mut reservation) = self.capture_ring.try_start_write() else {
            self.stats.captures_dropped += 1;
            trace!(end, "capture ring full, capture dropped");
            return false;
        };
        for slot in 0..pipeline.rings.channels() {
            if let Err(err) = pipeline.rings.read_window(slot, &mut pipeline.window, end) {
                // Sizing contract violation; abandon the reservation.
                warn!(error = %err, slot, "window extraction failed");
                return false;
            }
            match reservation.channel_buffer(slot) {
                Ok(dst) => encode_samples(&pipeline.window, dst),
                Err(err) => {
                    warn!(error = %err, slot, "capture slot geometry mismatch");
                    return false;
                }
            }
        }
        reservation.finish(CaptureMetadata {
            triggered,
            trigger_channel: self.settings.trigger.source,
            sequence: self.sequence,
            end_index: end,
            timestamp: Utc::now(),
            hardware: self.settings.hardware.clone(),
            horizontal: self.settings.horizontal,
            trigger: self.settings.trigger.clone(),
        });
        self.sequence += 1;
        self.stats.captures_published += 1;
        true
    }

    /// Run one block through a width-specific pipeline.
    fn process_block<S: Sample>(&mut self, pipeline: &mut Pipeline<S>, block: &RawBlock) {
        if let Err(err) = pipeline.ingest(block.bytes()) {
            warn!(error = %err, "block rejected by de-interleave");
            self.stats.blocks_dropped += 1;
            return;
        }
        self.stats.blocks_processed += 1;

        let depth = self.settings.horizontal.capture_depth as u64;
        let total = pipeline.rings.total_written();
        let mut published = 0usize;

        if self.mode == RunMode::Stream {
            // Trigger engine bypassed entirely: one synthetic capture per
            // capture_depth of new history.
            while total >= self.stream_next_end {
                let end = self.stream_next_end;
                if self.extract(pipeline, end, false) {
                    published += 1;
                }
                self.stream_next_end += depth;
            }
        } else {
            let Some(source_slot) = self
                .settings
                .hardware
                .channel_mask
                .slot_of(self.settings.trigger.source)
            else {
                // Validation keeps this unreachable; drop the block if not.
                warn!("trigger source outside enabled mask");
                return;
            };
            let stream = &pipeline.streams[source_slot];
            let mut results = std::mem::take(&mut pipeline.results);
            pipeline.trigger.process(stream, block.start_index, &mut results);
            self.stats.triggers_fired += results.trigger_indices.len() as u64;

            for &end in &results.capture_end_indices {
                if self.extract(pipeline, end, true) {
                    published += 1;
                }
            }
            pipeline.results = results;

            if self.force_pending && total >= depth {
                self.force_pending = false;
                self.stats.captures_forced += 1;
                if self.extract(pipeline, total, false) {
                    published += 1;
                }
                self.notify(EngineEvent::CaptureForced);
            }
        }

        if published > 0 {
            self.restart_auto_timer();
            if self.mode == RunMode::Single {
                // The single-shot latch honors forced captures too.
                self.state = RunState::Stopped;
                info!(published, "single capture complete, stopping");
                self.notify(EngineEvent::RunStateChanged { running: false });
            }
        }
    }

    /// Synthesize an auto-mode capture when the timeout lapses.
    fn check_auto_timeout<S: Sample>(&mut self, pipeline: &mut Pipeline<S>) {
        if self.state != RunState::Running || self.mode != RunMode::Auto {
            return;
        }
        let Some(deadline) = self.auto_deadline else {
            self.restart_auto_timer();
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        let total = pipeline.rings.total_written();
        if total >= self.settings.horizontal.capture_depth as u64 {
            // The real trigger engine stays armed; this capture is purely
            // additive.
            self.stats.captures_auto += 1;
            if self.extract(pipeline, total, false) {
                self.notify(EngineEvent::AutoCapture);
            }
        }
        self.restart_auto_timer();
    }
}

/// The acquisition orchestrator.
///
/// Owns every piece of pipeline state; see the module docs for the loop
/// structure. Construct with [`AcquisitionEngine::new`] and either call
/// [`run`](AcquisitionEngine::run) on a thread of your own or use
/// [`spawn_engine`] for the packaged thread-plus-handle setup.
pub struct AcquisitionEngine {
    shared: Shared,
    pipeline: PipelineKind,
}

impl AcquisitionEngine {
    /// Validate `settings` and build the pipeline and capture ring.
    pub fn new(
        settings: EngineSettings,
        events: broadcast::Sender<EngineEvent>,
    ) -> Result<Self, ScopeError> {
        settings.validate()?;
        let capture_ring = CaptureRing::new(
            settings.capture_slots,
            settings.hardware.channel_mask.count(),
            settings.horizontal.capture_depth,
            settings.hardware.format,
        );
        let pipeline = PipelineKind::build(&settings);
        let mode = settings.mode;
        Ok(Self {
            shared: Shared {
                settings,
                capture_ring,
                state: RunState::Stopped,
                mode,
                force_pending: false,
                auto_deadline: None,
                stream_next_end: 0,
                sequence: 0,
                stats: EngineStats::default(),
                events,
            },
            pipeline,
        })
    }

    /// Consumer-side handle to the capture ring.
    pub fn capture_ring(&self) -> CaptureRing {
        self.shared.capture_ring.clone()
    }

    /// Engine loop: process blocks and commands until shutdown.
    ///
    /// Returns when a [`EngineCommand::Shutdown`] arrives or every command
    /// sender is gone. Queued blocks drain back to their pool as the loop
    /// exits.
    pub fn run(mut self, blocks: Receiver<RawBlock>, commands: Receiver<EngineCommand>) {
        info!("acquisition engine started");
        let mut blocks_open = true;
        loop {
            // Control plane first: commands are serialized with block
            // processing, one drain per iteration.
            let mut shutdown = false;
            loop {
                match commands.try_recv() {
                    Ok(cmd) => {
                        if self.handle_command(cmd) {
                            shutdown = true;
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        shutdown = true;
                        break;
                    }
                }
            }
            if shutdown {
                break;
            }

            if blocks_open {
                match blocks.recv_timeout(IDLE_TICK) {
                    Ok(block) => {
                        if self.shared.state == RunState::Running {
                            self.dispatch_block(&block);
                        } else {
                            trace!("block discarded while stopped");
                        }
                        // Block loan drops here, returning the buffer.
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("block source closed");
                        blocks_open = false;
                    }
                }
            } else {
                thread::sleep(IDLE_TICK);
            }

            match &mut self.pipeline {
                PipelineKind::Bits8(p) => self.shared.check_auto_timeout(p),
                PipelineKind::Bits16(p) => self.shared.check_auto_timeout(p),
            }
        }
        info!("acquisition engine exiting");
    }

    fn dispatch_block(&mut self, block: &RawBlock) {
        let hw = &self.shared.settings.hardware;
        let geometry_ok = block.format == hw.format
            && block.channel_mask == hw.channel_mask
            && block.sample_rate_hz == hw.sample_rate_hz
            && block.bytes().len() == hw.block_bytes();
        if !geometry_ok {
            warn!(
                block_format = %block.format,
                block_channels = block.channel_mask.count(),
                block_rate = block.sample_rate_hz,
                "geometry mismatch, block dropped"
            );
            self.shared.stats.blocks_dropped += 1;
            return;
        }
        match &mut self.pipeline {
            PipelineKind::Bits8(p) => self.shared.process_block(p, block),
            PipelineKind::Bits16(p) => self.shared.process_block(p, block),
        }
    }

    /// Apply one command; returns true on shutdown.
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Run => {
                if self.shared.state != RunState::Running {
                    self.shared.state = RunState::Running;
                    self.shared.force_pending = false;
                    self.shared.stream_next_end = self.pipeline.total_written()
                        + self.shared.settings.horizontal.capture_depth as u64;
                    self.shared.restart_auto_timer();
                    info!(mode = ?self.shared.mode, "run");
                    self.shared.notify(EngineEvent::RunStateChanged { running: true });
                }
            }
            EngineCommand::Stop => {
                if self.shared.state != RunState::Stopped {
                    self.shared.state = RunState::Stopped;
                    self.shared.force_pending = false;
                    self.shared.auto_deadline = None;
                    info!("stop");
                    self.shared.notify(EngineEvent::RunStateChanged { running: false });
                }
            }
            EngineCommand::Force => {
                if self.shared.state == RunState::Running {
                    self.shared.force_pending = true;
                } else {
                    debug!("force ignored while stopped");
                }
            }
            EngineCommand::SetMode(mode) => {
                if self.shared.mode != mode {
                    self.shared.mode = mode;
                    if mode == RunMode::Stream {
                        self.shared.stream_next_end = self.pipeline.total_written()
                            + self.shared.settings.horizontal.capture_depth as u64;
                    }
                    self.shared.restart_auto_timer();
                    info!(?mode, "mode changed");
                    self.shared.notify(EngineEvent::ModeChanged(mode));
                }
            }
            EngineCommand::SetDepth(depth) => {
                self.update_settings(|s| s.horizontal.capture_depth = depth);
            }
            EngineCommand::SetRate(rate) => {
                self.update_settings(|s| s.hardware.sample_rate_hz = rate);
            }
            EngineCommand::SetResolution(format) => {
                self.update_settings(|s| s.hardware.format = format);
            }
            EngineCommand::SetEnabledChannels(mask) => {
                self.update_settings(|s| s.hardware.channel_mask = mask);
            }
            EngineCommand::SetTriggerSource(source) => {
                self.update_settings(|s| s.trigger.source = source);
            }
            EngineCommand::SetTriggerType(active) => {
                self.update_settings(|s| s.trigger.active = active);
            }
            EngineCommand::SetTriggerDelay(position) => {
                self.update_settings(|s| s.horizontal.trigger_position = position);
            }
            EngineCommand::SetTriggerHoldoff(extra) => {
                self.update_settings(|s| s.horizontal.extra_holdoff = extra);
            }
            EngineCommand::SetEdgeLevel(level) => {
                self.update_settings(|s| s.trigger.edge.level_volts = level);
            }
            EngineCommand::SetEdgeDirection(direction) => {
                self.update_settings(|s| s.trigger.edge.direction = direction);
            }
            EngineCommand::PushTriggerEvent(index) => {
                if self.shared.settings.trigger.active == TriggerType::Event {
                    self.pipeline.push_event(index);
                } else {
                    debug!(index, "trigger event ignored, event variant not active");
                }
            }
            EngineCommand::GetStatus { response } => {
                let _ = response.send(EngineStatus {
                    running: self.shared.state == RunState::Running,
                    mode: self.shared.mode,
                    settings: self.shared.settings.clone(),
                });
            }
            EngineCommand::GetStats { response } => {
                let _ = response.send(self.shared.stats.clone());
            }
            EngineCommand::GetCaptureStats { response } => {
                let _ = response.send(self.shared.capture_ring.stats());
            }
            EngineCommand::ResetIntervalStats => {
                self.shared.capture_ring.reset_interval_stats();
            }
            EngineCommand::Shutdown => {
                info!("shutdown requested");
                return true;
            }
        }
        false
    }

    /// Apply a settings mutation, rejecting invalid results in place.
    ///
    /// A change that validates triggers the full reset protocol: rings
    /// cleared, capture ring reconfigured, trigger engine reset (and
    /// rebuilt only when the variant or edge direction changed).
    fn update_settings(&mut self, mutate: impl FnOnce(&mut EngineSettings)) {
        let mut next = self.shared.settings.clone();
        mutate(&mut next);
        if next == self.shared.settings {
            return;
        }
        if let Err(err) = next.validate() {
            warn!(error = %err, "configuration rejected");
            return;
        }

        let prev = std::mem::replace(&mut self.shared.settings, next);
        let s = &self.shared.settings;
        let rebuild_trigger = prev.trigger.active != s.trigger.active
            || prev.trigger.edge.direction != s.trigger.edge.direction;
        let format_changed = prev.hardware.format != s.hardware.format;

        self.shared.capture_ring.configure(
            s.hardware.channel_mask.count(),
            s.horizontal.capture_depth,
            s.hardware.format,
        );
        if format_changed {
            self.pipeline = PipelineKind::build(s);
        } else {
            match &mut self.pipeline {
                PipelineKind::Bits8(p) => p.reconfigure(s, rebuild_trigger),
                PipelineKind::Bits16(p) => p.reconfigure(s, rebuild_trigger),
            }
        }

        self.shared.force_pending = false;
        self.shared.stream_next_end = s.horizontal.capture_depth as u64;
        self.shared.restart_auto_timer();
        debug!("configuration applied, acquisition state reset");
        self.shared.notify(EngineEvent::ConfigChanged);
    }
}

/// Client handle to a spawned engine thread.
///
/// Fire-and-forget commands return immediately; the `Get*` helpers block
/// on the response. Dropping the handle shuts the engine down.
pub struct EngineHandle {
    cmd_tx: Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Send a raw command.
    pub fn send(&self, cmd: EngineCommand) -> Result<(), ScopeError> {
        self.cmd_tx.send(cmd).map_err(|_| ScopeError::EngineGone)
    }

    /// Start acquiring.
    pub fn run(&self) -> Result<(), ScopeError> {
        self.send(EngineCommand::Run)
    }

    /// Stop acquiring.
    pub fn stop(&self) -> Result<(), ScopeError> {
        self.send(EngineCommand::Stop)
    }

    /// Request one trigger-bypass capture.
    pub fn force(&self) -> Result<(), ScopeError> {
        self.send(EngineCommand::Force)
    }

    /// Switch run mode.
    pub fn set_mode(&self, mode: RunMode) -> Result<(), ScopeError> {
        self.send(EngineCommand::SetMode(mode))
    }

    /// Blocking status query.
    pub fn status(&self) -> Result<EngineStatus, ScopeError> {
        let (cmd, rx) = EngineCommand::get_status();
        self.send(cmd)?;
        rx.blocking_recv().map_err(|_| ScopeError::EngineGone)
    }

    /// Blocking engine-counter query.
    pub fn stats(&self) -> Result<EngineStats, ScopeError> {
        let (cmd, rx) = EngineCommand::get_stats();
        self.send(cmd)?;
        rx.blocking_recv().map_err(|_| ScopeError::EngineGone)
    }

    /// Blocking capture-ring-counter query.
    pub fn capture_stats(&self) -> Result<crate::ring::CaptureRingStats, ScopeError> {
        let (cmd, rx) = EngineCommand::get_capture_stats();
        self.send(cmd)?;
        rx.blocking_recv().map_err(|_| ScopeError::EngineGone)
    }

    /// Subscribe to advisory engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Shut the engine down and join its thread.
    pub fn shutdown(mut self) {
        let _ = self.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the engine on its own thread.
///
/// Returns the control handle and the consumer side of the capture ring.
/// The thread is the single owner of all pipeline state; pin it to a
/// real-time priority externally if the deployment needs it.
pub fn spawn_engine(
    settings: EngineSettings,
    blocks: Receiver<RawBlock>,
) -> Result<(EngineHandle, CaptureRing), ScopeError> {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let engine = AcquisitionEngine::new(settings, events_tx.clone())?;
    let capture_ring = engine.capture_ring();

    let thread = thread::Builder::new()
        .name("scope-engine".into())
        .spawn(move || engine.run(blocks, cmd_rx))
        .map_err(|_| ScopeError::EngineGone)?;

    Ok((
        EngineHandle {
            cmd_tx,
            events: events_tx,
            thread: Some(thread),
        },
        capture_ring,
    ))
}
