/*!
# Cerelog Capture

Reads the 37-byte sample frames streamed by the Cerelog ADS1299 board,
resynchronizes on line noise, and converts every frame into calibrated
channel values.

## Features

- Serial capture with configurable port and baud rate
- Frame resynchronization with per-cause rejection statistics
- Live JSON-lines output on stdout for plotting front ends
- Raw byte dumps that can be replayed later
- Synthetic generator for running without hardware

## Usage

### Capture from the board
```bash
cerelog-capture capture --port /dev/ttyUSB0 --baud 115200
```

### Live output (JSON lines on stdout, logs on stderr)
```bash
cerelog-capture capture --live --scale mV
```

### Record and replay
```bash
cerelog-capture capture --dump session.bin
cerelog-capture capture --replay session.bin --live
```

### Without hardware
```bash
cerelog-capture capture --synthetic --live
```
*/

use anyhow::{Context, Result};
use cerelog_core::{CalibrationConfig, OutputScale};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod sink;
mod source;

use capture::CapturePipeline;
use config::AppConfig;
use sink::{FanOutSink, JsonLinesSink, RateLogSink, SampleSink};
use source::{ByteSource, ReaderSource, SerialSource, SyntheticSource, TeeSource};

#[derive(Parser)]
#[command(name = "cerelog-capture")]
#[command(about = "Capture and decode Cerelog ADS1299 sample frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "cerelog.toml", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start capturing frames
    Capture {
        /// Serial port (overrides config)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (overrides config)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Replay a raw dump instead of opening the serial port
        #[arg(long, conflicts_with = "synthetic")]
        replay: Option<PathBuf>,

        /// Generate synthetic frames instead of opening the serial port
        #[arg(long)]
        synthetic: bool,

        /// Copy every received byte to this file
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Write decoded samples to stdout as JSON lines
        #[arg(long)]
        live: bool,

        /// Output unit: V, mV or uV (overrides config)
        #[arg(long)]
        scale: Option<String>,

        /// PGA gain (overrides config)
        #[arg(long)]
        gain: Option<f64>,

        /// Reference voltage in volts (overrides config)
        #[arg(long)]
        vref: Option<f64>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "cerelog.toml")]
        output: PathBuf,
    },
}

/// Where the bytes come from
enum SourceKind {
    Serial,
    Replay(PathBuf),
    Synthetic,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for live output
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Some(Commands::Capture {
            port,
            baud,
            replay,
            synthetic,
            dump,
            live,
            scale,
            gain,
            vref,
        }) => {
            let mut config = AppConfig::load_or_default(&cli.config)?;
            if let Some(port) = port {
                config.serial.port = port;
            }
            if let Some(baud) = baud {
                config.serial.baud_rate = baud;
            }
            config.calibration = override_calibration(config.calibration, scale, gain, vref)?;

            let kind = match (replay, synthetic) {
                (Some(path), _) => SourceKind::Replay(path),
                (None, true) => SourceKind::Synthetic,
                (None, false) => SourceKind::Serial,
            };
            run_capture(config, kind, dump, live)
        }

        Some(Commands::Config { output }) => generate_config_file(output),

        None => {
            let config = AppConfig::load_or_default(&cli.config)?;
            run_capture(config, SourceKind::Serial, None, false)
        }
    }
}

/// Apply command line calibration overrides, revalidating the result
fn override_calibration(
    base: CalibrationConfig,
    scale: Option<String>,
    gain: Option<f64>,
    vref: Option<f64>,
) -> Result<CalibrationConfig> {
    let output_scale = match scale {
        Some(name) => name.parse::<OutputScale>()?,
        None => base.output_scale(),
    };
    let calibration = CalibrationConfig::new(
        vref.unwrap_or(base.reference_voltage()),
        gain.unwrap_or(base.gain()),
        output_scale,
    )?;
    Ok(calibration)
}

fn open_source(config: &AppConfig, kind: SourceKind) -> Result<Box<dyn ByteSource + Send>> {
    let source: Box<dyn ByteSource + Send> = match kind {
        SourceKind::Serial => Box::new(
            SerialSource::open(&config.serial)
                .with_context(|| format!("Failed to open serial port {}", config.serial.port))?,
        ),
        SourceKind::Replay(path) => Box::new(
            ReaderSource::open(&path, config.serial.read_chunk_size)
                .with_context(|| format!("Failed to open replay file {}", path.display()))?,
        ),
        SourceKind::Synthetic => {
            Box::new(SyntheticSource::new(&config.synthetic, config.calibration))
        }
    };
    Ok(source)
}

/// Run the capture pipeline until the source closes or Ctrl+C
fn run_capture(
    config: AppConfig,
    kind: SourceKind,
    dump: Option<PathBuf>,
    live: bool,
) -> Result<()> {
    let mut source = open_source(&config, kind)?;
    if let Some(path) = dump {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create dump file {}", path.display()))?;
        info!("💾 Dumping raw bytes to {}", path.display());
        source = Box::new(TeeSource::new(source, BufWriter::new(file)));
    }

    let unit = config.calibration.output_scale();
    let stats_interval = Duration::from_secs(config.pipeline.stats_interval_seconds);
    let rate_sink = RateLogSink::new(config.pipeline.sps_window_ms, stats_interval, unit);
    let sink: Box<dyn SampleSink + Send> = if live {
        info!("📺 Live output mode (JSON lines on stdout)");
        Box::new(FanOutSink::new(vec![
            Box::new(JsonLinesSink::new(io::stdout(), unit)),
            Box::new(rate_sink),
        ]))
    } else {
        Box::new(rate_sink)
    };

    let pipeline = CapturePipeline::new(config.calibration, config.pipeline.clone());

    // Set up Ctrl+C handler
    let running = pipeline.get_running_flag();
    ctrlc::set_handler(move || {
        warn!("🛑 Received Ctrl+C, shutting down gracefully...");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let report = pipeline.run(source, sink).context("Capture failed")?;
    info!(
        "✅ Capture completed: {} samples from {} bytes",
        report.samples_delivered, report.bytes_read
    );
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   cerelog-capture --config {} capture", output_path.display());

    Ok(())
}
