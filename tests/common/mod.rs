//! Shared helpers for the end-to-end tests

#![allow(dead_code)]

use gaze_link::AppConfig;
use gaze_link::protocol::commands::DEFAULT_ENABLED_FIELDS;
use std::thread;
use std::time::{Duration, Instant};

/// Config with short timeouts so scenarios finish quickly
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.connection.retry_interval_ms = 20;
    config.connection.enable_ack_timeout_ms = 100;
    config.connection.ack_timeout_ms = 300;
    config
}

/// ACKs the session collects while enabling the stream
pub fn configure_acks() -> u64 {
    1 + DEFAULT_ENABLED_FIELDS.len() as u64
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// `REC` line with a valid best-gaze position
pub fn rec_line(counter: u64, x: f64, y: f64) -> String {
    format!(
        "<REC CNT=\"{}\" TIME=\"{:.3}\" BPOGX=\"{:.5}\" BPOGY=\"{:.5}\" BPOGV=\"1\" />",
        counter,
        counter as f64 / 150.0,
        x,
        y
    )
}
