//! Simulated hardware block source.
//!
//! Produces pooled blocks of synthetic waveforms at the configured block
//! cadence, interleaved exactly as the hardware would deliver them. Lets
//! the engine, the CLI runner and the scenario tests run without physical
//! hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

use scope_core::{HardwareConfig, SampleFormat};
use scope_pool::BlockPool;

use crate::block::RawBlock;

/// Synthetic waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Sine at the given frequency
    Sine {
        /// Cycle frequency in hertz
        frequency_hz: f64,
    },
    /// Rising sawtooth at the given frequency
    Ramp {
        /// Cycle frequency in hertz
        frequency_hz: f64,
    },
    /// 50% duty-cycle square at the given frequency
    Square {
        /// Cycle frequency in hertz
        frequency_hz: f64,
    },
    /// Flat line at the configured offset
    Dc,
}

impl Waveform {
    /// Normalized value in [-1, 1] at an absolute sample tick.
    fn value(&self, tick: u64, sample_rate_hz: f64) -> f64 {
        match *self {
            Waveform::Sine { frequency_hz } => {
                let phase = tick as f64 * frequency_hz / sample_rate_hz;
                (phase * std::f64::consts::TAU).sin()
            }
            Waveform::Ramp { frequency_hz } => {
                let phase = tick as f64 * frequency_hz / sample_rate_hz;
                2.0 * phase.fract() - 1.0
            }
            Waveform::Square { frequency_hz } => {
                let phase = tick as f64 * frequency_hz / sample_rate_hz;
                if phase.fract() < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Dc => 0.0,
        }
    }
}

/// Configuration for the mock source.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSourceConfig {
    /// Waveform on every channel (attenuated slightly per channel)
    pub waveform: Waveform,
    /// Peak amplitude in volts
    pub amplitude_volts: f64,
    /// DC offset in volts
    pub offset_volts: f64,
    /// Uniform noise amplitude in volts (0 disables)
    pub noise_volts: f64,
    /// Sleep one block period between blocks (false floods as fast as the
    /// pool and queue allow, for tests)
    pub pace: bool,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine { frequency_hz: 1_000.0 },
            amplitude_volts: 0.5,
            offset_volts: 0.0,
            noise_volts: 0.0,
            pace: true,
        }
    }
}

/// Simulated hardware-read thread.
///
/// Acquires buffers from the block pool, fills them with the configured
/// waveform and sends them down the bounded block queue, tagged with the
/// geometry from `hardware`. Stops when asked or when the engine side of
/// the queue goes away.
pub struct MockSource {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MockSource {
    /// Start producing blocks on a background thread.
    pub fn spawn(
        hardware: HardwareConfig,
        config: MockSourceConfig,
        pool: BlockPool,
        tx: SyncSender<RawBlock>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::spawn(move || {
            produce_blocks(&hardware, &config, &pool, &tx, &flag);
        });

        Self {
            running,
            thread: Some(thread),
        }
    }

    /// Stop the producer and join its thread.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn produce_blocks(
    hardware: &HardwareConfig,
    config: &MockSourceConfig,
    pool: &BlockPool,
    tx: &SyncSender<RawBlock>,
    running: &AtomicBool,
) {
    let ticks = hardware.ticks_per_block();
    let channels = hardware.channel_mask.count();
    let bytes_per_sample = hardware.format.bytes_per_sample();
    let block_period = Duration::from_secs_f64(ticks as f64 / hardware.sample_rate_hz);
    let mut rng = StdRng::from_entropy();
    let mut start_index = 0u64;

    info!(
        ticks,
        channels,
        rate = hardware.sample_rate_hz,
        waveform = ?config.waveform,
        "mock source started"
    );

    while running.load(Ordering::SeqCst) {
        let Some(mut block) = pool.acquire_timeout(block_period.max(Duration::from_millis(1)))
        else {
            warn!("block pool exhausted, block skipped");
            continue;
        };

        for t in 0..ticks {
            let tick = start_index + t as u64;
            let base = config.waveform.value(tick, hardware.sample_rate_hz);
            for c in 0..channels {
                // Mild per-channel attenuation keeps multi-channel traces
                // distinguishable.
                let scale = config.amplitude_volts * (1.0 - 0.1 * c as f64);
                let mut volts = base * scale + config.offset_volts;
                if config.noise_volts > 0.0 {
                    volts += rng.gen_range(-config.noise_volts..=config.noise_volts);
                }
                let offset = (t * channels + c) * bytes_per_sample;
                quantize(volts, hardware.full_scale_volts, hardware.format, &mut block[offset..]);
            }
        }

        let mut raw = RawBlock {
            data: block,
            start_index,
            format: hardware.format,
            channel_mask: hardware.channel_mask,
            sample_rate_hz: hardware.sample_rate_hz,
        };
        // Bounded-queue backpressure without wedging shutdown: wait in
        // short slices, re-checking the running flag between attempts.
        let sent = loop {
            match tx.try_send(raw) {
                Ok(()) => break true,
                Err(mpsc::TrySendError::Full(returned)) => {
                    if !running.load(Ordering::SeqCst) {
                        break false;
                    }
                    raw = returned;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(mpsc::TrySendError::Disconnected(_)) => {
                    debug!("block queue closed, mock source exiting");
                    running.store(false, Ordering::SeqCst);
                    break false;
                }
            }
        };
        if !sent {
            break;
        }
        start_index += ticks as u64;

        if config.pace {
            thread::sleep(block_period);
        }
    }

    info!(blocks = start_index / ticks.max(1) as u64, "mock source stopped");
}

/// Quantize a voltage to the full code range (rails included — unlike
/// trigger levels, data may sit exactly at full scale).
fn quantize(volts: f64, full_scale: f64, format: SampleFormat, dst: &mut [u8]) {
    let norm = volts / full_scale;
    match format {
        SampleFormat::Bits8 => {
            let code = (norm * i8::MAX as f64)
                .round()
                .clamp(i8::MIN as f64, i8::MAX as f64) as i8;
            dst[0] = code as u8;
        }
        SampleFormat::Bits16 => {
            let code = (norm * i16::MAX as f64)
                .round()
                .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            dst[..2].copy_from_slice(&code.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::ChannelMask;
    use std::sync::mpsc;

    fn hardware() -> HardwareConfig {
        HardwareConfig {
            sample_rate_hz: 100_000.0,
            format: SampleFormat::Bits16,
            channel_mask: ChannelMask(0b0011),
            block_samples: 2048,
            full_scale_volts: 1.0,
        }
    }

    #[test]
    fn test_blocks_tagged_and_monotonic() {
        let hw = hardware();
        let pool = BlockPool::new(4, hw.block_bytes());
        let (tx, rx) = mpsc::sync_channel(4);
        let source = MockSource::spawn(
            hw.clone(),
            MockSourceConfig {
                pace: false,
                ..Default::default()
            },
            pool,
            tx,
        );

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("block");
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("block");
        source.stop();

        assert_eq!(first.start_index, 0);
        assert_eq!(second.start_index, hw.ticks_per_block() as u64);
        assert_eq!(first.format, hw.format);
        assert_eq!(first.channel_mask, hw.channel_mask);
        assert_eq!(first.bytes().len(), hw.block_bytes());
        assert_eq!(first.ticks(), hw.ticks_per_block());
    }

    #[test]
    fn test_dc_blocks_hold_offset() {
        let hw = HardwareConfig {
            channel_mask: ChannelMask::CH1,
            ..hardware()
        };
        let pool = BlockPool::new(2, hw.block_bytes());
        let (tx, rx) = mpsc::sync_channel(2);
        let source = MockSource::spawn(
            hw.clone(),
            MockSourceConfig {
                waveform: Waveform::Dc,
                offset_volts: 0.5,
                noise_volts: 0.0,
                pace: false,
                ..Default::default()
            },
            pool,
            tx,
        );

        let block = rx.recv_timeout(Duration::from_secs(2)).expect("block");
        source.stop();

        let expect = (0.5 * i16::MAX as f64).round() as i16;
        for bytes in block.bytes().chunks_exact(2) {
            assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), expect);
        }
    }

    #[test]
    fn test_ramp_is_monotonic_within_cycle() {
        let hw = HardwareConfig {
            channel_mask: ChannelMask::CH1,
            sample_rate_hz: 100_000.0,
            ..hardware()
        };
        let pool = BlockPool::new(2, hw.block_bytes());
        let (tx, rx) = mpsc::sync_channel(2);
        let source = MockSource::spawn(
            hw.clone(),
            MockSourceConfig {
                // One full cycle spans 100k samples, far longer than a
                // block: samples inside a block must be non-decreasing.
                waveform: Waveform::Ramp { frequency_hz: 1.0 },
                amplitude_volts: 0.8,
                noise_volts: 0.0,
                pace: false,
                ..Default::default()
            },
            pool,
            tx,
        );

        let block = rx.recv_timeout(Duration::from_secs(2)).expect("block");
        source.stop();

        let samples: Vec<i16> = block
            .bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        for pair in samples.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }
}
