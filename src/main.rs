//! # Soil Link
//!
//! Connects to a BLE soil-moisture sensor, streams its readings and applies
//! the selected formula to each raw moisture value.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use soil_link::config::{Config, LoggingConfig, RadioConfig};
use soil_link::discovery::DiscoveredDevice;
use soil_link::equation::{EquationBook, EquationStore, MemoryEquationStore};
use soil_link::protocol::encoder::Command;
use soil_link::radio::btle::BtleRadio;
use soil_link::radio::{Radio, RadioEvent};
use soil_link::session::{Session, SessionState};
use soil_link::telemetry::{Recorder, TelemetryPipeline};

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How often an idle session is nudged back into scanning
const RESCAN_INTERVAL_MS: u64 = 1000;

/// Daily log file name inside `logging.directory`
const LOG_FILE_NAME: &str = "soil-link.log";

/// Main entry point for Soil Link
///
/// # Control Flow
///
/// 1. Load configuration and set up logging
/// 2. Open the bluetooth adapter and start scanning
/// 3. Connect to the first sighting matching `[radio]`
/// 4. Once ready, send `START` and `RATE` as configured
/// 5. Ingest every line, log readings with their derived value, record JSONL
/// 6. On Ctrl+C, disconnect and exit
///
/// # Errors
///
/// Returns error if the configuration is invalid or no bluetooth adapter
/// can be opened. Link faults only return the session to scanning.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("Soil Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let radio = BtleRadio::new(events_tx, config.subscribe_delay())
        .await
        .context("Failed to open bluetooth adapter")?;
    let mut session = Session::new(radio, config.session_options());

    let mut pipeline = TelemetryPipeline::new(
        config.telemetry.history_capacity,
        config.telemetry.log_capacity,
    );
    let mut recorder = config.telemetry.record.then(|| {
        Recorder::new(
            &config.telemetry.log_dir,
            config.telemetry.max_records_per_file,
            config.telemetry.max_files_to_keep,
        )
    });

    let mut book = EquationBook::new(MemoryEquationStore::new());
    book.add(&config.formula.name, &config.formula.text, true)
        .await
        .context("Failed to seed formula")?;
    info!("Using formula {:?}: {}", config.formula.name, config.formula.text);

    let mut state_rx = session.signals().subscribe_state();
    session.start_scan(true)?;

    let mut rescan = interval(Duration::from_millis(RESCAN_INTERVAL_MS));

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                let sighting = match &event {
                    RadioEvent::Sighting(device) => Some(device.clone()),
                    _ => None,
                };

                for line in session.handle_event(event) {
                    handle_line(&line, &mut pipeline, &book, recorder.as_mut());
                }

                if let Some(device) = sighting {
                    auto_connect(&mut session, &device, &config.radio);
                }
            }

            Ok(()) = state_rx.changed() => {
                let state = state_rx.borrow_and_update().clone();
                info!("Session state: {}", state);
                if let SessionState::Ready(_) = state {
                    send_ready_commands(&mut session, &config);
                }
            }

            _ = rescan.tick() => {
                if *session.state() == SessionState::Idle {
                    if let Err(e) = session.start_scan(false) {
                        warn!("Failed to restart scan: {}", e);
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                if session.state().is_ready() {
                    if let Err(e) = session.send(Command::Stop) {
                        debug!("Failed to send STOP: {}", e);
                    }
                }
                session.disconnect()?;
                info!("Total readings: {}", pipeline.history().len());
                break;
            }
        }
    }

    if let Some(recorder) = recorder.as_mut() {
        recorder.close()?;
    }

    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides `logging.level`. The returned guard must be kept
/// alive for the file writer to flush.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Whether a sighting is the configured sensor
fn matches_target(device: &DiscoveredDevice, radio: &RadioConfig) -> bool {
    if let Some(address) = &radio.device_address {
        return device.address.eq_ignore_ascii_case(address.trim());
    }

    match (&radio.name_filter, &device.name) {
        (Some(filter), Some(name)) => name
            .to_lowercase()
            .contains(&filter.trim().to_lowercase()),
        _ => false,
    }
}

fn auto_connect<R: Radio>(session: &mut Session<R>, device: &DiscoveredDevice, radio: &RadioConfig) {
    if *session.state() != SessionState::Scanning || !matches_target(device, radio) {
        return;
    }

    info!(
        "Found {} ({}, {} dBm)",
        device.name.as_deref().unwrap_or("unnamed"),
        device.address,
        device.signal_strength
    );
    if let Err(e) = session.connect(&device.address) {
        warn!("Failed to connect to {}: {}", device.address, e);
    }
}

fn send_ready_commands<R: Radio>(session: &mut Session<R>, config: &Config) {
    if config.device.start_on_ready {
        if let Err(e) = session.send(Command::Start) {
            warn!("Failed to send START: {}", e);
        }
    }

    if let Some(seconds) = config.device.sample_rate_s {
        match Command::rate(seconds) {
            Ok(command) => {
                if let Err(e) = session.send(command) {
                    warn!("Failed to send RATE: {}", e);
                }
            }
            Err(e) => warn!("Skipping RATE: {}", e),
        }
    }
}

/// Ingest one line and report the reading it produced
fn handle_line<S: EquationStore>(
    line: &str,
    pipeline: &mut TelemetryPipeline,
    book: &EquationBook<S>,
    recorder: Option<&mut Recorder>,
) {
    let ingested = pipeline.ingest(line);
    let Some(reading) = ingested.reading else {
        return;
    };

    match (reading.moisture_raw, book.selected()) {
        // Corrupted samples must not advance the previous-value chain
        (Some(raw), Some(equation)) if reading.checksum_ok => {
            match pipeline.compute_derived(raw as f64, &equation.formula) {
                Ok(value) => info!(
                    "#{} t={}°C m={} {}={:.3}",
                    reading.sequence.unwrap_or_default(),
                    reading.temperature_c.unwrap_or_default(),
                    raw,
                    equation.name,
                    value
                ),
                Err(e) => warn!("Formula {:?} failed: {}", equation.name, e),
            }
        }
        (Some(raw), _) => info!(
            "#{} m={} (checksum {})",
            reading.sequence.unwrap_or_default(),
            raw,
            if reading.checksum_ok { "ok" } else { "bad" }
        ),
        (None, _) => debug!("Line: {}", reading.raw_line),
    }

    if let Some(recorder) = recorder {
        if let Err(e) = recorder.record(&reading) {
            warn!("Failed to record reading: {}", e);
        }
    }
}
