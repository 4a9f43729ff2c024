//! Simulated tracker for running without hardware
//!
//! A [`SimulatedTransport`] answers commands the way the tracker's control
//! server does and, once `ENABLE_SEND_DATA` is on, produces `REC` records at
//! a fixed rate. Each record carries only the field groups whose enable
//! command was received.
//!
//! | Signal | Model |
//! |--------|-------|
//! | Gaze | Lissajous figure, `x = 0.5 + 0.4 sin(3t)`, `y = 0.5 + 0.3 sin(5.1t)` |
//! | Blink | last `blink_duration` of every `blink_interval`; every validity flag is 0 |
//! | Pupil | 2D diameter around 18 px, 3D diameter around 4 mm |
//! | Eye distance | around 0.6 m, left and right out of phase |
//!
//! Records are generated on read from the wall clock, so no thread runs
//! behind the transport. A reader that falls behind receives the missed
//! records in bursts until it has caught up.

use super::{Connector, Transport};
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::protocol::commands::{
    CALIBRATE_ADDPOINT, CALIBRATE_CLEAR, CALIBRATE_RESET, CALIBRATE_RESULT_SUMMARY,
    ENABLE_SEND_DATA,
};
use crate::protocol::{MessageKind, RawMessage, decode};
use crate::transport::LineBuffer;
use log::{debug, info};
use std::collections::{HashSet, VecDeque};
use std::f64::consts::PI;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Records generated by one read at most
const MAX_FRAMES_PER_READ: u64 = 32;

/// Error the simulated tracker reports for its own calibration, in display units
const SUMMARY_AVERAGE_ERROR: f64 = 18.0;

/// Simulated tracker link; clones share the same state
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Mutex<SimulatedTracker>>,
    read_timeout: Duration,
}

struct SimulatedTracker {
    config: SimulationConfig,
    commands: LineBuffer,
    outgoing: VecDeque<u8>,
    enabled_fields: HashSet<String>,
    /// Start of the record clock, set by `ENABLE_SEND_DATA`
    streaming_since: Option<Instant>,
    frames_sent: u64,
    calibration_points: u64,
    closed: bool,
}

impl SimulatedTransport {
    pub fn new(config: SimulationConfig, read_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatedTracker {
                config,
                commands: LineBuffer::new(),
                outgoing: VecDeque::new(),
                enabled_fields: HashSet::new(),
                streaming_since: None,
                frames_sent: 0,
                calibration_points: 0,
                closed: false,
            })),
            read_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedTracker> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming_since.is_some()
    }

    /// Record number `n` of the stream, independent of the clock
    pub fn frame(&self, n: u64) -> RawMessage {
        self.lock().frame(n)
    }

    /// Move pending output into `buffer`, or say how long until there is some
    fn take_pending(
        &self,
        buffer: &mut [u8],
        now: Instant,
    ) -> std::result::Result<usize, Duration> {
        let mut tracker = self.lock();
        if tracker.closed {
            return Ok(0);
        }
        if tracker.outgoing.is_empty() {
            tracker.generate_due(now);
        }
        if tracker.outgoing.is_empty() {
            return Err(tracker.until_next_frame(now).unwrap_or(self.read_timeout));
        }

        let n = tracker.outgoing.len().min(buffer.len());
        for (dst, byte) in buffer.iter_mut().zip(tracker.outgoing.drain(..n)) {
            *dst = byte;
        }
        Ok(n)
    }
}

impl SimulatedTracker {
    fn queue(&mut self, message: &RawMessage) {
        if let Ok(line) = message.encode() {
            self.outgoing.extend(line.into_bytes());
        }
    }

    fn handle_command(&mut self, line: &str) {
        let Ok(command) = decode(line) else {
            debug!("Simulated tracker ignored {:?}", line);
            return;
        };
        if !matches!(command.kind(), MessageKind::Set | MessageKind::Get) {
            return;
        }
        let Some(id) = command.id().map(str::to_string) else {
            return;
        };
        let on = command.flag("STATE");

        match id.as_str() {
            ENABLE_SEND_DATA => match on {
                Some(true) => {
                    self.streaming_since = Some(Instant::now());
                    self.frames_sent = 0;
                }
                Some(false) => self.streaming_since = None,
                None => {}
            },
            field if field.starts_with("ENABLE_SEND_") => match on {
                Some(true) => {
                    self.enabled_fields.insert(id.clone());
                }
                Some(false) => {
                    self.enabled_fields.remove(field);
                }
                None => {}
            },
            CALIBRATE_CLEAR | CALIBRATE_RESET => self.calibration_points = 0,
            CALIBRATE_ADDPOINT => self.calibration_points += 1,
            _ => {}
        }

        let mut ack = RawMessage::new("ACK").with("ID", id.as_str());
        if id == CALIBRATE_RESULT_SUMMARY {
            ack.set("AVE_ERROR", format!("{:.2}", SUMMARY_AVERAGE_ERROR));
            ack.set("VALID_POINTS", self.calibration_points.to_string());
        } else {
            for (name, value) in command.attributes() {
                if !name.eq_ignore_ascii_case("ID") {
                    ack.set(name.clone(), value.clone());
                }
            }
        }
        self.queue(&ack);
    }

    fn period(&self) -> f64 {
        1.0 / self.config.rate_hz
    }

    /// Queue every record whose time has come, up to the per-read cap
    fn generate_due(&mut self, now: Instant) {
        let Some(since) = self.streaming_since else {
            return;
        };
        let elapsed = now.saturating_duration_since(since).as_secs_f64();
        let due = (elapsed / self.period()).floor() as u64 + 1;
        let end = due.min(self.frames_sent + MAX_FRAMES_PER_READ);
        for n in self.frames_sent..end {
            let record = self.frame(n);
            self.queue(&record);
        }
        self.frames_sent = self.frames_sent.max(end);
    }

    fn until_next_frame(&self, now: Instant) -> Option<Duration> {
        let since = self.streaming_since?;
        let next = since + Duration::from_secs_f64(self.frames_sent as f64 * self.period());
        Some(next.saturating_duration_since(now))
    }

    fn is_blinking(&self, t: f64) -> bool {
        let interval = self.config.blink_interval_ms;
        if interval == 0 {
            return false;
        }
        let t_ms = (t * 1000.0) as u64;
        t_ms % interval >= interval - self.config.blink_duration_ms
    }

    fn has(&self, field: &str) -> bool {
        self.enabled_fields.contains(field)
    }

    fn frame(&self, n: u64) -> RawMessage {
        let t = n as f64 * self.period();
        let open = !self.is_blinking(t);
        let flag = if open { "1" } else { "0" };
        let num = |v: f64| if open { format!("{:.5}", v) } else { "0.00000".to_string() };

        let phase = 3.0 * t;
        let gx = 0.5 + 0.4 * phase.sin();
        let gy = 0.5 + 0.3 * (1.7 * phase).sin();

        let mut rec = RawMessage::new("REC");
        if self.has("ENABLE_SEND_COUNTER") {
            rec.set("CNT", n.to_string());
        }
        if self.has("ENABLE_SEND_TIME") {
            rec.set("TIME", format!("{:.3}", t));
        }
        for (field, prefix, dx) in [
            ("ENABLE_SEND_POG_BEST", "B", 0.0),
            ("ENABLE_SEND_POG_LEFT", "L", -0.01),
            ("ENABLE_SEND_POG_RIGHT", "R", 0.01),
            ("ENABLE_SEND_POG_FIX", "F", 0.0),
        ] {
            if self.has(field) {
                rec.set(format!("{prefix}POGX"), num(gx + dx));
                rec.set(format!("{prefix}POGY"), num(gy));
                rec.set(format!("{prefix}POGV"), flag);
            }
        }

        let breathing = (2.0 * PI * 0.1 * t).sin();
        for (prefix, distance) in [
            ("L", 0.6 + 0.15 * (0.2 * t).sin()),
            ("R", 0.6 + 0.15 * (0.2 * t).cos()),
        ] {
            if self.has(&format!("ENABLE_SEND_PUPIL_{}", side(prefix))) {
                rec.set(format!("{prefix}PD"), num(18.0 + 1.5 * breathing));
                rec.set(format!("{prefix}PV"), flag);
            }
            if self.has(&format!("ENABLE_SEND_EYE_{}", side(prefix))) {
                rec.set(format!("{prefix}EYEZ"), num(distance));
                rec.set(format!("{prefix}PUPILD"), num(0.004 + 0.001 * breathing));
                rec.set(format!("{prefix}PUPILV"), flag);
            }
        }
        rec
    }
}

fn side(prefix: &str) -> &'static str {
    if prefix == "L" { "LEFT" } else { "RIGHT" }
}

impl Transport for SimulatedTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let wait = match self.take_pending(buffer, Instant::now()) {
            Ok(n) => return Ok(n),
            Err(wait) => wait.min(self.read_timeout),
        };
        thread::sleep(wait);

        match self.take_pending(buffer, Instant::now()) {
            Ok(n) => Ok(n),
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated read timeout",
            ))),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut tracker = self.lock();
        if tracker.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated tracker closed",
            )));
        }
        tracker.commands.extend(data);
        while let Some(line) = tracker.commands.next_line() {
            tracker.handle_command(&line);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

/// Connector that opens a fresh simulated tracker on every connect
pub struct SimulatedConnector {
    config: SimulationConfig,
    read_timeout: Duration,
}

impl SimulatedConnector {
    pub fn new(config: SimulationConfig, read_timeout: Duration) -> Self {
        Self {
            config,
            read_timeout,
        }
    }
}

impl Connector for SimulatedConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        info!(
            "Simulated tracker at {} Hz, blink {} ms every {} ms",
            self.config.rate_hz, self.config.blink_duration_ms, self.config.blink_interval_ms
        );
        Ok(Box::new(SimulatedTransport::new(
            self.config.clone(),
            self.read_timeout,
        )))
    }

    fn endpoint(&self) -> String {
        "simulated".to_string()
    }
}
