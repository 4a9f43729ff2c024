//! Four-point calibration state machine
//!
//! Driven from the consumer tick; never blocks and never touches the network.
//!
//! ```text
//! begin -> [Settling -> Sampling -> aggregate] x 4 targets -> fit -> Completed
//!                                        |
//!                   too few valid samples +-> Failed (remaining points skipped)
//! ```
//!
//! Samples drained while a target is settling are discarded; only samples
//! drained during its sampling window count toward that target.

use super::device::{DEVICE_MIN_VALID_POINTS, DeviceSequenceState};
use super::solver::{aggregate, average_error, fit_affine};
use super::types::{
    ActiveCalibration, AffineTransform, CalibrationPoint, CalibrationQuality, CalibrationResult,
    PointPair,
};
use crate::config::CalibrationConfig;
use crate::stream::{GazePoint, GazeSample};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Target order: top-left, top-right, bottom-right, bottom-left
const TARGET_CORNERS: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    Settling,
    Sampling,
    Completed,
    Failed,
}

impl CalibrationPhase {
    pub fn is_running(self) -> bool {
        matches!(self, CalibrationPhase::Settling | CalibrationPhase::Sampling)
    }
}

/// Per-target progress
#[derive(Debug, Clone, PartialEq)]
pub struct PointProgress {
    /// Target in display units
    pub target: GazePoint,
    pub samples: usize,
    pub valid_samples: usize,
    /// Aggregated raw position once the window closed
    pub raw: Option<GazePoint>,
}

/// Snapshot returned by `calibration_status`
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStatus {
    pub attempt: u64,
    pub phase: CalibrationPhase,
    /// Index into `points` of the target being shown
    pub current_point: Option<usize>,
    pub points: Vec<PointProgress>,
    pub quality: CalibrationQuality,
    pub failure: Option<String>,
    /// Tracker-side command sequence, when the tracker is driven too
    pub device: DeviceSequenceState,
}

/// Returned by `begin`; identifies one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationHandle {
    pub attempt: u64,
    /// Targets in display units, in presentation order
    pub targets: Vec<GazePoint>,
}

pub struct CalibrationEngine {
    config: CalibrationConfig,
    active: ActiveCalibration,
    phase: CalibrationPhase,
    attempt: u64,
    current: usize,
    phase_started: Instant,
    point: Option<CalibrationPoint>,
    pairs: Vec<PointPair>,
    progress: Vec<PointProgress>,
    fitted: Option<AffineTransform>,
    local_error: Option<f64>,
    device_error: Option<f64>,
    device_valid_points: Option<u64>,
    failure: Option<String>,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig, active: ActiveCalibration) -> Self {
        Self {
            config,
            active,
            phase: CalibrationPhase::Idle,
            attempt: 0,
            current: 0,
            phase_started: Instant::now(),
            point: None,
            pairs: Vec::new(),
            progress: Vec::new(),
            fitted: None,
            local_error: None,
            device_error: None,
            device_valid_points: None,
            failure: None,
        }
    }

    /// Targets in display units, inset by the configured margin
    pub fn targets(&self) -> Vec<GazePoint> {
        self.normalized_targets()
            .into_iter()
            .map(|t| {
                GazePoint::new(t.x * self.config.display_width, t.y * self.config.display_height)
            })
            .collect()
    }

    /// Targets as fractions of the display
    pub fn normalized_targets(&self) -> Vec<GazePoint> {
        let m = self.config.target_margin;
        TARGET_CORNERS
            .iter()
            .map(|&(cx, cy)| {
                GazePoint::new(m + cx * (1.0 - 2.0 * m), m + cy * (1.0 - 2.0 * m))
            })
            .collect()
    }

    /// Start a new attempt
    ///
    /// The active result is reset to identity and every trace of the previous
    /// attempt is dropped before this returns, so the first sample accepted
    /// afterwards belongs to point 1 of this attempt.
    pub fn begin(&mut self, now: Instant) -> CalibrationHandle {
        self.active.reset();

        self.attempt += 1;
        self.phase = CalibrationPhase::Settling;
        self.current = 0;
        self.phase_started = now;
        self.point = None;
        self.pairs.clear();
        self.fitted = None;
        self.local_error = None;
        self.device_error = None;
        self.device_valid_points = None;
        self.failure = None;

        let targets = self.targets();
        self.progress = targets
            .iter()
            .map(|&target| PointProgress {
                target,
                samples: 0,
                valid_samples: 0,
                raw: None,
            })
            .collect();

        info!("Calibration attempt {} started", self.attempt);
        CalibrationHandle {
            attempt: self.attempt,
            targets,
        }
    }

    /// Advance with the samples drained this tick
    ///
    /// Returns the result on the tick the attempt ends.
    pub fn step(&mut self, now: Instant, samples: &[GazeSample]) -> Option<Arc<CalibrationResult>> {
        let elapsed = now.saturating_duration_since(self.phase_started);
        match self.phase {
            CalibrationPhase::Settling => {
                if elapsed >= self.config.settle() {
                    let target = self.progress[self.current].target;
                    self.point = Some(CalibrationPoint::new(target));
                    self.phase = CalibrationPhase::Sampling;
                    self.phase_started = now;
                }
                None
            }
            CalibrationPhase::Sampling => {
                if let Some(point) = self.point.as_mut() {
                    point.samples.extend(samples.iter().cloned());
                    let progress = &mut self.progress[self.current];
                    progress.samples = point.samples.len();
                    progress.valid_samples = point.samples.iter().filter(|s| s.is_valid()).count();
                }
                if elapsed >= self.config.sample_window() {
                    self.finish_point(now)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn finish_point(&mut self, now: Instant) -> Option<Arc<CalibrationResult>> {
        let point = self.point.take()?;
        let index = self.current + 1;
        let valid = point.valid_positions();

        if valid.len() < self.config.min_valid_samples {
            return Some(self.fail(format!(
                "point {} had {} valid samples, need {}",
                index,
                valid.len(),
                self.config.min_valid_samples
            )));
        }
        let Some(raw) = aggregate(&valid, self.config.trim_fraction) else {
            return Some(self.fail(format!("point {} could not be aggregated", index)));
        };

        info!(
            "Calibration point {}: raw ({:.4}, {:.4}) from {}/{} samples -> target ({:.0}, {:.0})",
            index,
            raw.x,
            raw.y,
            valid.len(),
            point.samples.len(),
            point.target.x,
            point.target.y
        );
        self.progress[self.current].raw = Some(raw);
        self.pairs.push(PointPair {
            raw,
            target: point.target,
        });

        self.current += 1;
        if self.current < self.progress.len() {
            self.phase = CalibrationPhase::Settling;
            self.phase_started = now;
            None
        } else {
            Some(self.solve())
        }
    }

    fn solve(&mut self) -> Arc<CalibrationResult> {
        let transform = match fit_affine(&self.pairs) {
            Ok(t) => t,
            Err(e) => return self.fail(e.to_string()),
        };
        self.fitted = Some(transform);
        self.local_error = Some(average_error(&transform, &self.pairs));

        let result = self.build_result();
        info!(
            "Calibration attempt {}: {:?}, average error {:.1} (local {:.1}, device {:?})",
            self.attempt,
            result.quality,
            result.average_error.unwrap_or(f64::NAN),
            self.local_error.unwrap_or(f64::NAN),
            self.device_error
        );
        self.phase = if result.quality == CalibrationQuality::Failed {
            CalibrationPhase::Failed
        } else {
            CalibrationPhase::Completed
        };
        self.failure = result.failure.clone();
        self.active.publish(result);
        self.active.snapshot()
    }

    /// Result from the fitted transform and whichever error is authoritative
    fn build_result(&self) -> CalibrationResult {
        let Some(local) = self.local_error else {
            return CalibrationResult::failed("no fit");
        };
        let prefer_device = self.config.prefer_device_error;
        let average = match self.device_error {
            Some(device) if prefer_device => device,
            _ => local,
        };
        let device_rejected = prefer_device
            && self
                .device_valid_points
                .is_some_and(|n| n < DEVICE_MIN_VALID_POINTS as u64);

        let quality = if device_rejected {
            CalibrationQuality::Failed
        } else {
            CalibrationQuality::classify(average, self.config.ok_threshold, self.config.low_threshold)
        };
        let usable = quality.is_usable();
        let failure = if device_rejected {
            Some(format!(
                "tracker reported {} valid points, need {}",
                self.device_valid_points.unwrap_or(0),
                DEVICE_MIN_VALID_POINTS
            ))
        } else {
            (!usable).then(|| {
                format!(
                    "average error {:.1} not below {:.1}",
                    average, self.config.low_threshold
                )
            })
        };

        CalibrationResult {
            transform: if usable { self.fitted } else { None },
            quality,
            average_error: Some(average),
            local_error: Some(local),
            device_error: self.device_error,
            pairs: self.pairs.clone(),
            failure,
        }
    }

    fn fail(&mut self, reason: String) -> Arc<CalibrationResult> {
        warn!("Calibration attempt {} failed: {}", self.attempt, reason);
        self.point = None;
        self.phase = CalibrationPhase::Failed;
        self.failure = Some(reason.clone());
        self.active.publish(CalibrationResult::failed(reason));
        self.active.snapshot()
    }

    /// Record what the tracker reported about its own calibration
    ///
    /// A finished fit is republished with it. The device values decide the
    /// result only when the config prefers them: the average error sets the
    /// quality and fewer than [`DEVICE_MIN_VALID_POINTS`] valid points fail it.
    pub fn note_device_result(&mut self, average_error: Option<f64>, valid_points: Option<u64>) {
        if self.phase == CalibrationPhase::Idle
            || (self.device_error == average_error && self.device_valid_points == valid_points)
        {
            return;
        }
        self.device_error = average_error;
        self.device_valid_points = valid_points;
        if self.local_error.is_some() {
            let result = self.build_result();
            self.phase = if result.quality.is_usable() {
                CalibrationPhase::Completed
            } else {
                CalibrationPhase::Failed
            };
            self.failure = result.failure.clone();
            self.active.publish(result);
        }
    }

    /// Abort a running attempt; returns false when nothing was running
    pub fn abort(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        self.fail("aborted".to_string());
        true
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    pub fn result(&self) -> Arc<CalibrationResult> {
        self.active.snapshot()
    }

    pub fn status(&self) -> CalibrationStatus {
        CalibrationStatus {
            attempt: self.attempt,
            phase: self.phase,
            current_point: self.phase.is_running().then_some(self.current),
            points: self.progress.clone(),
            quality: self.active.snapshot().quality,
            failure: self.failure.clone(),
            device: DeviceSequenceState::Idle,
        }
    }
}
