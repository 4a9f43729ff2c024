//! Calibration data types

use crate::stream::{GazePoint, GazeSample};
use std::sync::{Arc, RwLock};

/// Affine map from raw device coordinates to display coordinates
///
/// ```text
/// display_x = ax * raw_x + bx * raw_y + cx
/// display_y = ay * raw_x + by * raw_y + cy
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub ax: f64,
    pub bx: f64,
    pub cx: f64,
    pub ay: f64,
    pub by: f64,
    pub cy: f64,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        ax: 1.0,
        bx: 0.0,
        cx: 0.0,
        ay: 0.0,
        by: 1.0,
        cy: 0.0,
    };

    #[inline]
    pub fn apply(&self, raw: GazePoint) -> GazePoint {
        GazePoint::new(
            self.ax * raw.x + self.bx * raw.y + self.cx,
            self.ay * raw.x + self.by * raw.y + self.cy,
        )
    }
}

/// Quality class of a calibration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationQuality {
    /// No attempt has completed since the last reset
    Uncalibrated,
    Ok,
    /// Usable but flagged
    Low,
    Failed,
}

impl CalibrationQuality {
    /// Classify an average error against the two thresholds
    pub fn classify(average_error: f64, ok_threshold: f64, low_threshold: f64) -> Self {
        if !average_error.is_finite() {
            CalibrationQuality::Failed
        } else if average_error < ok_threshold {
            CalibrationQuality::Ok
        } else if average_error < low_threshold {
            CalibrationQuality::Low
        } else {
            CalibrationQuality::Failed
        }
    }

    pub fn is_usable(self) -> bool {
        matches!(self, CalibrationQuality::Ok | CalibrationQuality::Low)
    }
}

/// One calibration target and the raw samples observed while it was shown
#[derive(Debug, Clone)]
pub struct CalibrationPoint {
    /// Target in display units
    pub target: GazePoint,
    pub samples: Vec<GazeSample>,
}

impl CalibrationPoint {
    pub fn new(target: GazePoint) -> Self {
        Self {
            target,
            samples: Vec::new(),
        }
    }

    /// Raw positions of the valid samples
    pub fn valid_positions(&self) -> Vec<GazePoint> {
        self.samples.iter().filter_map(|s| s.position()).collect()
    }
}

/// Aggregated raw position paired with its known target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    pub raw: GazePoint,
    pub target: GazePoint,
}

/// Outcome of a calibration attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// `None` when the attempt failed; nothing is published then
    pub transform: Option<AffineTransform>,
    pub quality: CalibrationQuality,
    /// Error the quality was classified on, in display units
    pub average_error: Option<f64>,
    /// Residual of the local fit
    pub local_error: Option<f64>,
    /// Average error reported by the tracker, if one arrived
    pub device_error: Option<f64>,
    pub pairs: Vec<PointPair>,
    pub failure: Option<String>,
}

impl CalibrationResult {
    /// Identity mapping with no quality; the state after a reset
    pub fn identity() -> Self {
        Self {
            transform: Some(AffineTransform::IDENTITY),
            quality: CalibrationQuality::Uncalibrated,
            average_error: None,
            local_error: None,
            device_error: None,
            pairs: Vec::new(),
            failure: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            transform: None,
            quality: CalibrationQuality::Failed,
            average_error: None,
            local_error: None,
            device_error: None,
            pairs: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    /// Map a raw point to display coordinates
    pub fn apply(&self, raw: GazePoint) -> Option<GazePoint> {
        self.transform.map(|t| t.apply(raw))
    }
}

impl Default for CalibrationResult {
    fn default() -> Self {
        Self::identity()
    }
}

/// The session's single active calibration, shared for reading
///
/// Replaced as a whole, so readers always see one consistent result.
#[derive(Debug, Clone, Default)]
pub struct ActiveCalibration {
    inner: Arc<RwLock<Arc<CalibrationResult>>>,
}

impl ActiveCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<CalibrationResult> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn publish(&self, result: CalibrationResult) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(result);
    }

    /// Back to identity with no quality
    pub(crate) fn reset(&self) {
        self.publish(CalibrationResult::identity());
    }
}
