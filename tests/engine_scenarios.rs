//! End-to-end orchestrator scenarios over hand-built block streams.

use std::sync::mpsc::{self, SyncSender};
use std::time::{Duration, Instant};

use rust_scope::engine::{spawn_engine, EngineCommand, EngineHandle};
use rust_scope::ring::{CaptureRing, CompletedCapture};
use rust_scope::RawBlock;
use scope_core::{
    ChannelMask, EdgeSettings, EngineSettings, HardwareConfig, HorizontalSettings, RunMode,
    SampleFormat, TriggerSettings,
};
use scope_pool::BlockPool;

/// Settings for a single 16-bit channel with a rising-edge trigger at 0 V.
fn base_settings(block_samples: usize, mode: RunMode) -> EngineSettings {
    EngineSettings {
        hardware: HardwareConfig {
            sample_rate_hz: 1_000_000.0,
            format: SampleFormat::Bits16,
            channel_mask: ChannelMask::CH1,
            block_samples,
            full_scale_volts: 1.0,
        },
        horizontal: HorizontalSettings {
            capture_depth: 1000,
            trigger_position: 500,
            extra_holdoff: 0,
        },
        trigger: TriggerSettings::default(),
        mode,
        auto_timeout: Duration::from_millis(50),
        capture_slots: 8,
    }
}

/// Send one block of i16 samples, tagged with the settings' geometry.
fn send_block(
    tx: &SyncSender<RawBlock>,
    pool: &BlockPool,
    settings: &EngineSettings,
    samples: &[i16],
    start_index: u64,
) {
    assert_eq!(samples.len(), settings.hardware.block_samples);
    let mut block = pool.try_acquire().expect("pool exhausted");
    for (s, dst) in samples.iter().zip(block.chunks_exact_mut(2)) {
        dst.copy_from_slice(&s.to_le_bytes());
    }
    tx.send(RawBlock {
        data: block,
        start_index,
        format: settings.hardware.format,
        channel_mask: settings.hardware.channel_mask,
        sample_rate_hz: settings.hardware.sample_rate_hz,
    })
    .expect("engine gone");
}

/// Poll the capture ring until `n` captures arrive or the timeout lapses.
fn wait_for_captures(ring: &CaptureRing, n: usize, timeout: Duration) -> Vec<CompletedCapture> {
    let deadline = Instant::now() + timeout;
    let mut captures = Vec::new();
    while captures.len() < n && Instant::now() < deadline {
        while let Some(capture) = ring.try_read() {
            captures.push(capture);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    captures
}

/// Poll the engine until it reports stopped.
fn wait_until_stopped(engine: &EngineHandle, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !engine.status().expect("status").running {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn ramp(from: i16, to: i16, len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f64 / (len - 1) as f64;
            (from as f64 + (to - from) as f64 * t).round() as i16
        })
        .collect()
}

#[test]
fn single_mode_captures_once_and_stops() {
    let settings = base_settings(2000, RunMode::Single);
    let pool = BlockPool::new(4, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(4);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    // Rising ramp through the trigger level: arms low, fires near the
    // middle, window ends 500 samples later.
    let stream = ramp(-16_000, 16_000, 2000);
    send_block(&tx, &pool, &settings, &stream, 0);

    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert_eq!(got.len(), 1);
    let meta = got[0].metadata();
    assert!(meta.triggered);
    assert_eq!(meta.trigger_channel, 0);

    // The trigger sample sits at the configured position inside the
    // window: everything before it is below the level, the trigger
    // sample itself above.
    let window = got[0].channel_samples::<i16>(0).expect("channel 0");
    assert_eq!(window.len(), 1000);
    let position = settings.horizontal.trigger_position;
    assert!(window[position - 1] <= 0);
    assert!(window[position] > 0);

    assert!(wait_until_stopped(&engine, Duration::from_secs(2)));

    // Further blocks are discarded while stopped.
    send_block(&tx, &pool, &settings, &stream, 2000);
    std::thread::sleep(Duration::from_millis(50));
    assert!(captures.try_read().is_none());

    engine.shutdown();
}

#[test]
fn auto_mode_synthesizes_after_timeout() {
    let mut settings = base_settings(1000, RunMode::Auto);
    // Level far above the flat signal: arms immediately, never fires.
    settings.trigger.edge = EdgeSettings {
        level_volts: 0.5,
        hysteresis_percent: 2.5,
        direction: scope_core::EdgeDirection::Rising,
    };
    let pool = BlockPool::new(4, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(4);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    // Two blocks of flat zero build a full window of history.
    send_block(&tx, &pool, &settings, &vec![0i16; 1000], 0);
    send_block(&tx, &pool, &settings, &vec![0i16; 1000], 1000);

    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert!(!got.is_empty());
    assert!(!got[0].metadata().triggered);
    drop(got);

    // The timer restarts: a second synthetic capture follows.
    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert!(!got.is_empty());
    assert!(!got[0].metadata().triggered);

    let stats = engine.stats().expect("stats");
    assert!(stats.captures_auto >= 2);
    assert_eq!(stats.triggers_fired, 0);

    engine.shutdown();
}

#[test]
fn force_counts_as_the_single_capture() {
    let mut settings = base_settings(1000, RunMode::Single);
    // Never fires on its own.
    settings.trigger.edge.level_volts = 0.5;
    let pool = BlockPool::new(4, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(4);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    send_block(&tx, &pool, &settings, &vec![0i16; 1000], 0);
    std::thread::sleep(Duration::from_millis(20));
    // No trigger, no capture yet.
    assert!(captures.try_read().is_none());

    engine.force().expect("force");
    send_block(&tx, &pool, &settings, &vec![0i16; 1000], 1000);

    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert_eq!(got.len(), 1);
    assert!(!got[0].metadata().triggered);

    // The forced capture satisfied Single mode.
    assert!(wait_until_stopped(&engine, Duration::from_secs(2)));
    let stats = engine.stats().expect("stats");
    assert_eq!(stats.captures_forced, 1);
    assert_eq!(stats.captures_published, 1);

    engine.shutdown();
}

#[test]
fn stream_mode_ignores_trigger() {
    let mut settings = base_settings(1000, RunMode::Stream);
    settings.trigger.edge.level_volts = 0.5;
    let pool = BlockPool::new(8, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(8);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    // Flat signal, but Stream synthesizes one capture per depth of new
    // history regardless.
    for i in 0..4u64 {
        send_block(&tx, &pool, &settings, &vec![0i16; 1000], i * 1000);
    }

    let got = wait_for_captures(&captures, 4, Duration::from_secs(2));
    assert_eq!(got.len(), 4);
    for (i, capture) in got.iter().enumerate() {
        assert!(!capture.metadata().triggered);
        assert_eq!(capture.metadata().end_index, (i as u64 + 1) * 1000);
    }

    engine.shutdown();
}

#[test]
fn geometry_mismatch_drops_block() {
    let settings = base_settings(1000, RunMode::Normal);
    let pool = BlockPool::new(4, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(4);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    // Tag a block with the wrong resolution: dropped whole.
    let mut block = pool.try_acquire().expect("pool");
    block.fill(0);
    tx.send(RawBlock {
        data: block,
        start_index: 0,
        format: SampleFormat::Bits8,
        channel_mask: settings.hardware.channel_mask,
        sample_rate_hz: settings.hardware.sample_rate_hz,
    })
    .expect("send");

    // A well-formed ramp afterwards still processes normally.
    let stream = ramp(-16_000, 16_000, 1000);
    send_block(&tx, &pool, &settings, &stream, 0);
    send_block(&tx, &pool, &settings, &vec![16_000i16; 1000], 1000);

    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert_eq!(got.len(), 1);

    let stats = engine.stats().expect("stats");
    assert_eq!(stats.blocks_dropped, 1);
    assert_eq!(stats.blocks_processed, 2);

    engine.shutdown();
}

#[test]
fn depth_change_resets_and_reconfigures() {
    let settings = base_settings(1000, RunMode::Normal);
    let pool = BlockPool::new(4, settings.hardware.block_bytes());
    let (tx, rx) = mpsc::sync_channel(4);
    let (engine, captures) = spawn_engine(settings.clone(), rx).expect("spawn");
    engine.run().expect("run");

    send_block(&tx, &pool, &settings, &vec![0i16; 1000], 0);
    std::thread::sleep(Duration::from_millis(20));

    // Invalid depth is refused; the old configuration survives.
    engine.send(EngineCommand::SetDepth(999)).expect("send");
    let status = engine.status().expect("status");
    assert_eq!(status.settings.horizontal.capture_depth, 1000);

    // Valid depth applies and restarts indexing: a fresh two-block ramp
    // triggers and fills the new, deeper window.
    engine.send(EngineCommand::SetDepth(1500)).expect("send");
    let status = engine.status().expect("status");
    assert_eq!(status.settings.horizontal.capture_depth, 1500);

    let stream = ramp(-16_000, 16_000, 1000);
    send_block(&tx, &pool, &settings, &stream, 0);
    send_block(&tx, &pool, &settings, &vec![16_000i16; 1000], 1000);

    let got = wait_for_captures(&captures, 1, Duration::from_secs(2));
    assert_eq!(got.len(), 1);
    let window = got[0].channel_samples::<i16>(0).expect("channel 0");
    assert_eq!(window.len(), 1500);

    engine.shutdown();
}
