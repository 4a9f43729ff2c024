//! Consumer-side drain policy

use super::queue::{QueueMode, SampleReceiver};
use super::sample::GazeSample;
use log::{info, warn};

/// Waiting samples above which a tick reports a backlog
pub const BACKLOG_WARNING: usize = 50;

/// What one tick pulled out of the queue
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Every sample drained this tick, oldest first
    pub samples: Vec<GazeSample>,
    /// More than [`BACKLOG_WARNING`] samples were waiting
    pub backlog: bool,
}

impl TickReport {
    pub fn drained(&self) -> usize {
        self.samples.len()
    }

    /// Newest sample drained this tick
    pub fn latest(&self) -> Option<&GazeSample> {
        self.samples.last()
    }
}

/// Drains the queue once per tick
///
/// Keeps the newest sample for display and, while recording, every sample.
pub struct SampleConsumer {
    rx: SampleReceiver,
    latest: Option<GazeSample>,
    latest_valid: Option<GazeSample>,
    recording: Option<Vec<GazeSample>>,
}

impl SampleConsumer {
    pub fn new(rx: SampleReceiver) -> Self {
        Self {
            rx,
            latest: None,
            latest_valid: None,
            recording: None,
        }
    }

    /// Drain everything available; never blocks
    pub fn tick(&mut self) -> TickReport {
        let waiting = self.rx.len();
        let samples = self.rx.drain_available();

        let backlog = waiting > BACKLOG_WARNING;
        if backlog {
            warn!("Consumer falling behind: {} samples were queued", waiting);
        }

        if let Some(last) = samples.last() {
            self.latest = Some(last.clone());
        }
        if let Some(valid) = samples.iter().rev().find(|s| s.is_valid()) {
            self.latest_valid = Some(valid.clone());
        }
        if let Some(recorded) = self.recording.as_mut() {
            recorded.extend(samples.iter().cloned());
        }

        TickReport { samples, backlog }
    }

    /// Newest sample seen on any tick
    pub fn latest(&self) -> Option<&GazeSample> {
        self.latest.as_ref()
    }

    /// Newest sample that carried a position, even if invalid ones followed
    pub fn latest_valid(&self) -> Option<&GazeSample> {
        self.latest_valid.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Start retaining every drained sample
    pub fn start_recording(&mut self) {
        self.rx.set_mode(QueueMode::Recording);
        self.recording = Some(Vec::new());
        info!("Recording started");
    }

    /// Stop recording and hand back what earlier ticks captured
    ///
    /// Does not drain the queue; tick first to include what is still waiting.
    pub fn stop_recording(&mut self) -> Vec<GazeSample> {
        self.rx.set_mode(QueueMode::Display);
        let recorded = self.recording.take().unwrap_or_default();
        info!(
            "Recording stopped: {} samples, {} dropped",
            recorded.len(),
            self.rx.dropped_recording()
        );
        recorded
    }

    pub fn receiver(&self) -> &SampleReceiver {
        &self.rx
    }
}
