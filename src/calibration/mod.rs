//! Screen calibration
//!
//! - [`engine`]: the local four-point procedure and affine fit
//! - [`solver`]: trimmed-mean aggregation and least squares
//! - [`device`]: the tracker's own calibration records and command sequence

pub mod device;
pub mod engine;
pub mod solver;
mod types;

pub use device::{
    DeviceCalibrationReport, DeviceCalibrationState, DeviceCalibrationSummary, DeviceSequence,
    DeviceSequenceState,
};
pub use engine::{
    CalibrationEngine, CalibrationHandle, CalibrationPhase, CalibrationStatus, PointProgress,
};
pub use types::{
    ActiveCalibration, AffineTransform, CalibrationPoint, CalibrationQuality, CalibrationResult,
    PointPair,
};
