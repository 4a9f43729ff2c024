//! gaze-link daemon
//!
//! Connects to the tracker, drains samples at a fixed tick and logs the
//! latest gaze position once per second. With `--calibrate` it runs one
//! calibration attempt first and logs the result. With `[simulation]
//! enabled = true` in the config it streams from the built-in simulated
//! tracker instead.

use gaze_link::{AppConfig, CalibrationQuality, ConnectionState, GazeClient, Result};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Consumer tick (60 Hz)
const TICK: Duration = Duration::from_micros(16_667);

const DEFAULT_CONFIG_PATH: &str = "gaze-link.toml";

/// Command line options.
///
/// Supports:
/// - `gaze-link <path>` (positional)
/// - `gaze-link --config <path>` / `-c <path>`
/// - `--calibrate` anywhere
struct Options {
    config_path: String,
    calibrate: bool,
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let calibrate = args.iter().any(|a| a == "--calibrate");

    let mut config_path = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 1;
            }
            a if !a.starts_with('-') && config_path.is_none() => {
                config_path = Some(a.to_string());
            }
            _ => {}
        }
        i += 1;
    }

    Options {
        config_path: config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
        calibrate,
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    if Path::new(path).exists() {
        AppConfig::from_file(path)
    } else {
        Ok(AppConfig::default())
    }
}

fn main() -> Result<()> {
    let options = parse_args();
    let config = load_config(&options.config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("gaze-link v{} starting...", env!("CARGO_PKG_VERSION"));
    if Path::new(&options.config_path).exists() {
        log::info!("Using config: {}", options.config_path);
    } else {
        log::info!("No config at {}, using defaults", options.config_path);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| gaze_link::Error::InvalidParameter(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut client = GazeClient::from_config(config)?;
    client.connect()?;

    let mut calibration_pending = options.calibrate;
    let mut calibrating = false;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        if calibration_pending && client.state() == ConnectionState::Connected {
            let handle = client.begin_calibration();
            log::info!(
                "Calibration attempt {} over {} targets",
                handle.attempt,
                handle.targets.len()
            );
            calibration_pending = false;
            calibrating = true;
        }

        client.tick();

        if calibrating && !client.calibration_status().phase.is_running() {
            calibrating = false;
            let result = client.calibration_result();
            match result.quality {
                CalibrationQuality::Ok | CalibrationQuality::Low => log::info!(
                    "Calibration {:?}: average error {:.1}",
                    result.quality,
                    result.average_error.unwrap_or(f64::NAN)
                ),
                _ => log::warn!(
                    "Calibration failed: {}",
                    result.failure.as_deref().unwrap_or("unknown")
                ),
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            match (client.latest(), client.latest_calibrated()) {
                (Some(sample), Some(display)) => log::info!(
                    "Gaze {:?} -> display ({:.0}, {:.0})",
                    sample.position(),
                    display.x,
                    display.y
                ),
                (Some(sample), None) => log::info!(
                    "Gaze {:?} ({:?}, t={:.3})",
                    sample.position(),
                    sample.source(),
                    sample.timestamp()
                ),
                (None, _) => log::debug!("No samples yet ({:?})", client.state()),
            }
        }

        if let Some(rest) = TICK.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    client.disconnect();
    let stats = client.stats();
    log::info!(
        "Session: {} records, {} malformed, {} reconnects, {} dropped",
        stats.data_records,
        stats.malformed_lines,
        stats.reconnects,
        stats.dropped_display + stats.dropped_recording
    );
    Ok(())
}
