//! CLI entry point for rust_scope.
//!
//! Runs the acquisition engine against the simulated block source —
//! useful for exercising the trigger/capture pipeline end to end without
//! hardware:
//!
//! ```bash
//! rust_scope run --duration-secs 5 --waveform sine --frequency 2000
//! rust_scope run --config scope.toml --mode single
//! rust_scope defaults > scope.toml
//! ```
//!
//! Logging goes through `tracing`; set `RUST_LOG` to adjust (e.g.
//! `RUST_LOG=rust_scope=debug`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rust_scope::engine::spawn_engine;
use rust_scope::source::{MockSource, MockSourceConfig, Waveform};
use scope_core::{EngineSettings, RunMode};
use scope_pool::BlockPool;

#[derive(Parser)]
#[command(name = "rust_scope")]
#[command(about = "Real-time oscilloscope acquisition engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from the simulated source for a fixed duration
    Run {
        /// TOML settings file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Acquisition duration in seconds
        #[arg(long, default_value_t = 5.0)]
        duration_secs: f64,

        /// Waveform: sine, ramp, square or dc
        #[arg(long, default_value = "sine")]
        waveform: String,

        /// Waveform frequency in hertz
        #[arg(long, default_value_t = 1000.0)]
        frequency: f64,

        /// Run mode override: normal, single, auto or stream
        #[arg(long)]
        mode: Option<String>,

        /// Block buffers in the pool
        #[arg(long, default_value_t = 8)]
        pool_blocks: usize,
    },

    /// Print the default settings as TOML
    Defaults,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            duration_secs,
            waveform,
            frequency,
            mode,
            pool_blocks,
        } => run(
            config.as_deref(),
            duration_secs,
            &waveform,
            frequency,
            mode.as_deref(),
            pool_blocks,
        ),
        Commands::Defaults => {
            let text = toml::to_string_pretty(&EngineSettings::default())
                .context("serializing default settings")?;
            println!("{text}");
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let settings: EngineSettings = builder
        .build()
        .context("loading configuration")?
        .try_deserialize()
        .context("parsing settings")?;
    settings.validate().context("validating settings")?;
    Ok(settings)
}

fn parse_waveform(name: &str, frequency_hz: f64) -> Result<Waveform> {
    Ok(match name {
        "sine" => Waveform::Sine { frequency_hz },
        "ramp" => Waveform::Ramp { frequency_hz },
        "square" => Waveform::Square { frequency_hz },
        "dc" => Waveform::Dc,
        other => bail!("unknown waveform '{other}'"),
    })
}

fn parse_mode(name: &str) -> Result<RunMode> {
    Ok(match name {
        "normal" => RunMode::Normal,
        "single" => RunMode::Single,
        "auto" => RunMode::Auto,
        "stream" => RunMode::Stream,
        other => bail!("unknown run mode '{other}'"),
    })
}

fn run(
    config: Option<&Path>,
    duration_secs: f64,
    waveform: &str,
    frequency: f64,
    mode: Option<&str>,
    pool_blocks: usize,
) -> Result<()> {
    let mut settings = load_settings(config)?;
    if let Some(mode) = mode {
        settings.mode = parse_mode(mode)?;
    }

    let source_config = MockSourceConfig {
        waveform: parse_waveform(waveform, frequency)?,
        ..Default::default()
    };

    info!(
        rate = settings.hardware.sample_rate_hz,
        channels = settings.hardware.channel_mask.count(),
        depth = settings.horizontal.capture_depth,
        mode = ?settings.mode,
        "starting acquisition"
    );

    let pool = BlockPool::new(pool_blocks, settings.hardware.block_bytes());
    let (block_tx, block_rx) = mpsc::sync_channel(pool_blocks);
    let source = MockSource::spawn(settings.hardware.clone(), source_config, pool, block_tx);
    let (engine, captures) = spawn_engine(settings, block_rx)?;

    // Consumer thread: drain the capture ring the way the display bridge
    // would, oldest first, releasing each slot after use.
    let consumer_running = Arc::new(AtomicBool::new(true));
    let consumer_flag = Arc::clone(&consumer_running);
    let consumer = std::thread::spawn(move || {
        let mut consumed = 0u64;
        while consumer_flag.load(Ordering::SeqCst) {
            while let Some(capture) = captures.try_read() {
                let meta = capture.metadata();
                debug!(
                    sequence = meta.sequence,
                    triggered = meta.triggered,
                    end_index = meta.end_index,
                    "capture consumed"
                );
                consumed += 1;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        consumed
    });

    engine.run()?;
    std::thread::sleep(Duration::from_secs_f64(duration_secs.max(0.0)));
    engine.stop()?;

    let stats = engine.stats()?;
    let capture_stats = engine.capture_stats()?;

    consumer_running.store(false, Ordering::SeqCst);
    let consumed = consumer.join().unwrap_or_default();
    engine.shutdown();
    source.stop();

    info!(
        blocks = stats.blocks_processed,
        blocks_dropped = stats.blocks_dropped,
        triggers = stats.triggers_fired,
        published = stats.captures_published,
        dropped = capture_stats.dropped_lifetime,
        consumed,
        "acquisition finished"
    );
    Ok(())
}
