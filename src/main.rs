//! HydroSense - serial sensor ingestion for water-quality stations
//!
//! Reads pH / TDS / turbidity / heavy-metal readings from a sensor device,
//! averages them over fixed acquisition windows and writes one JSON line per
//! window to stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Continuous monitoring on the first USB serial port
//! hydrosense
//!
//! # Explicit port, single window
//! hydrosense --port /dev/ttyUSB0 --baud 9600 --once
//!
//! # Replay a capture file, or pipe a device through stdin
//! hydrosense --replay capture.log
//! cat /dev/ttyACM0 | hydrosense --stdin
//!
//! # No hardware at all
//! hydrosense --simulate --window-secs 5
//!
//! # Tools
//! hydrosense ports
//! hydrosense monitor --secs 15
//! hydrosense classify "pH Value: 7.02 (Neutral)" "7.1,320,4.5,0.01"
//! ```
//!
//! # Environment Variables
//!
//! - `HYDROSENSE_CONFIG`: Path to the station TOML file
//! - `RUST_LOG`: Logging level (default: info)

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hydrosense::acquisition::{
    available_ports, AcquisitionWindow, ChunkEvent, DeviceTransport, ParseReject,
    ReplayTransport, SerialTransport, SimulatedTransport,
};
use hydrosense::config::{defaults, StationConfig};
use hydrosense::pipeline::{DeviceSession, JsonLinesSink, MonitorOptions, MonitoringLoop};
use hydrosense::processing::Aggregator;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "hydrosense")]
#[command(about = "Water-quality sensor ingestion: serial device -> averaged readings")]
#[command(version)]
struct CliArgs {
    /// Station config file (overrides HYDROSENSE_CONFIG and ./station.toml)
    #[arg(long, global = true, env = "HYDROSENSE_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device path, e.g. /dev/ttyUSB0 or COM3 (default: first USB port)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Read the sensor stream from stdin instead of a serial port
    #[arg(long, global = true, conflicts_with_all = ["replay", "simulate"])]
    stdin: bool,

    /// Replay a captured sensor stream from a file
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "simulate")]
    replay: Option<PathBuf>,

    /// Delay between replayed chunks in milliseconds (0 = as fast as possible)
    #[arg(long, global = true, default_value = "0")]
    replay_delay_ms: u64,

    /// Use the built-in sensor simulator
    #[arg(long, global = true)]
    simulate: bool,

    /// Stop after a single acquisition window
    #[arg(long, global = true)]
    once: bool,

    /// Acquisition window length in seconds
    #[arg(long, global = true)]
    window_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Collect and average readings window after window (default)
    Run,

    /// List available serial ports
    Ports,

    /// Dump raw device chunks as text, escaped text and hex
    Monitor {
        /// How long to monitor, in seconds
        #[arg(long, default_value_t = defaults::MONITOR_SECS)]
        secs: u64,
    },

    /// Run the reading parser on candidate lines (arguments, or stdin if none)
    Classify {
        lines: Vec<String>,
    },
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

/// Load the station config and apply CLI overrides.
fn load_config(args: &CliArgs) -> Result<StationConfig> {
    let mut config = match &args.config {
        Some(path) => StationConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StationConfig::load(),
    };

    if let Some(port) = &args.port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(secs) = args.window_secs {
        config.acquisition.window_secs = secs;
    }

    config.validate().context("Invalid station configuration")?;
    Ok(config)
}

/// Pick the device transport from the input flags.
fn select_transport(args: &CliArgs, config: &StationConfig) -> Box<dyn DeviceTransport> {
    let chunk_size = config.acquisition.chunk_size;
    if args.simulate {
        info!("Input: simulated sensor");
        Box::new(SimulatedTransport::new())
    } else if args.stdin {
        info!("Input: stdin");
        Box::new(ReplayTransport::stdin(chunk_size))
    } else if let Some(path) = &args.replay {
        info!(file = %path.display(), "Input: replay file");
        Box::new(
            ReplayTransport::file(path, chunk_size)
                .with_pacing(Duration::from_millis(args.replay_delay_ms)),
        )
    } else {
        info!(
            port = if config.serial.port.is_empty() { "auto" } else { config.serial.port.as_str() },
            baud = config.serial.baud_rate,
            "Input: serial port"
        );
        Box::new(SerialTransport::new(chunk_size))
    }
}

fn shutdown_token() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping...");
        shutdown.cancel();
    });
    cancel_token
}

// ============================================================================
// Commands
// ============================================================================

async fn run_monitoring(args: &CliArgs) -> Result<()> {
    let config = load_config(args)?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  HydroSense - Water Quality Sensor Ingestion");
    info!(
        "  Station: {} | Location: {}",
        config.station.name,
        if config.station.location.is_empty() { "unset" } else { &config.station.location }
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let transport = select_transport(args, &config);
    let window = AcquisitionWindow::from_config(&config).context("Failed to build reading parser")?;
    let session = Arc::new(DeviceSession::new(transport, config.serial.clone(), window));

    let options = MonitorOptions {
        once: args.once,
        ..MonitorOptions::from_config(&config)
    };
    let cancel_token = shutdown_token();

    let monitor = MonitoringLoop::new(Arc::clone(&session), Aggregator::from_config(&config), cancel_token)
        .with_options(options)
        .with_reading_sink(Arc::new(JsonLinesSink::stdout(config.station.clone())));

    let result = monitor.run().await;
    session.disconnect().await;

    let stats = result.context("Monitoring stopped")?;
    info!(windows = stats.windows, averaged = stats.averaged, "Shutdown complete");
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for p in ports {
        println!("{:<20} {}", p.name, p.description);
    }
    Ok(())
}

/// Print every raw chunk the device sends for `secs` seconds.
async fn raw_monitor(args: &CliArgs, secs: u64) -> Result<()> {
    let config = load_config(args)?;
    let transport = select_transport(args, &config);
    let mut source = transport
        .open(&config.serial)
        .await
        .context("Failed to open device")?;

    let cancel_token = shutdown_token();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    let mut total_bytes = 0usize;

    info!(secs, "Raw monitor started");
    loop {
        let event = tokio::select! {
            () = cancel_token.cancelled() => break,
            read = tokio::time::timeout_at(deadline, source.read_chunk()) => match read {
                Err(_elapsed) => break,
                Ok(event) => event,
            },
        };

        match event {
            Ok(ChunkEvent::Data(bytes)) => {
                total_bytes += bytes.len();
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "[{} bytes]", bytes.len())?;
                writeln!(stdout, "  text:    {}", String::from_utf8_lossy(&bytes).trim_end())?;
                writeln!(stdout, "  escaped: {}", bytes.escape_ascii())?;
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
                writeln!(stdout, "  hex:     {}", hex.join(" "))?;
            }
            Ok(ChunkEvent::Idle) => {}
            Ok(ChunkEvent::Eof) => {
                info!("Device stream ended");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Device read failed");
                break;
            }
        }
    }

    source.close().await;
    info!(total_bytes, "Raw monitor finished");
    Ok(())
}

/// Report which wire format each line matches, or why it is rejected.
fn classify_lines(args: &CliArgs, lines: Vec<String>) -> Result<()> {
    let config = load_config(args)?;
    let window = AcquisitionWindow::from_config(&config).context("Failed to build reading parser")?;
    let parser = window.parser();

    let lines = if lines.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to read lines from stdin")?
    } else {
        lines
    };

    for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        match parser.classify(line) {
            Ok(reading) => {
                let values: Vec<String> = parser
                    .parameters()
                    .iter()
                    .zip(&reading.values)
                    .filter_map(|(p, v)| v.map(|v| format!("{}={v}", p.key)))
                    .collect();
                let qualifier = reading
                    .qualifier
                    .as_deref()
                    .map(|q| format!(" ({q})"))
                    .unwrap_or_default();
                println!("ACCEPT [{}] {}{} <- {line:?}", reading.format, values.join(" "), qualifier);
            }
            Err(ParseReject::Unrecognized) => println!("REJECT no format matched <- {line:?}"),
            Err(reason) => println!("REJECT {reason} <- {line:?}"),
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    match &args.command {
        None | Some(SubCommand::Run) => run_monitoring(&args).await,
        Some(SubCommand::Ports) => list_ports(),
        Some(SubCommand::Monitor { secs }) => raw_monitor(&args, *secs).await,
        Some(SubCommand::Classify { lines }) => classify_lines(&args, lines.clone()),
    }
}
