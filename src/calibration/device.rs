//! The tracker's own calibration: records it reports and the commands that drive it
//!
//! Records arrive on the reader thread and are folded into a
//! [`DeviceCalibrationState`] held by the session:
//!
//! | Record | Effect |
//! |--------|--------|
//! | `CAL ID="CALIB_START_PT"` | new [`DevicePointProgress`] |
//! | `CAL ID="CALIB_RESULT_PT"` | marks the current point finished |
//! | `CAL ID="CALIB_RESULT"` | [`DeviceCalibrationReport`] |
//! | `ACK ID="CALIBRATE_RESULT_SUMMARY"` | [`DeviceCalibrationSummary`] |
//!
//! [`DeviceSequence`] issues calibration commands one at a time from the
//! consumer tick, moving on only once the previous command was acknowledged.

use crate::error::Error;
use crate::protocol::{MessageKind, RawMessage, commands};
use crate::session::{AckHandle, AckStatus, CommandChannel};
use crate::stream::GazePoint;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Highest point index a `CALIB_RESULT` record carries
const MAX_REPORT_POINTS: usize = 5;

/// Valid points the tracker needs for its own calibration to count as a success
pub const DEVICE_MIN_VALID_POINTS: usize = 4;

/// Point the tracker is currently showing
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePointProgress {
    pub point: u64,
    /// Normalized target, when the record carried one
    pub target: Option<GazePoint>,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// One point of a `CALIB_RESULT` record (normalized coordinates)
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReportPoint {
    pub index: usize,
    pub target: GazePoint,
    pub left: Option<GazePoint>,
    pub right: Option<GazePoint>,
}

impl DeviceReportPoint {
    pub fn is_valid(&self) -> bool {
        self.left.is_some() || self.right.is_some()
    }
}

/// Final per-point result of the tracker's calibration
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCalibrationReport {
    pub points: Vec<DeviceReportPoint>,
}

impl DeviceCalibrationReport {
    pub fn from_record(record: &RawMessage) -> Self {
        let eye = |x: String, y: String, v: String| -> Option<GazePoint> {
            if record.flag(&v) != Some(true) {
                return None;
            }
            Some(GazePoint::new(record.attr_f64(&x)?, record.attr_f64(&y)?))
        };

        let points = (1..=MAX_REPORT_POINTS)
            .filter_map(|i| {
                let target = GazePoint::new(
                    record.attr_f64(&format!("CALX{i}"))?,
                    record.attr_f64(&format!("CALY{i}"))?,
                );
                Some(DeviceReportPoint {
                    index: i,
                    target,
                    left: eye(format!("LX{i}"), format!("LY{i}"), format!("LV{i}")),
                    right: eye(format!("RX{i}"), format!("RY{i}"), format!("RV{i}")),
                })
            })
            .collect();

        Self { points }
    }

    /// Points with at least one valid eye
    pub fn valid_points(&self) -> usize {
        self.points.iter().filter(|p| p.is_valid()).count()
    }

    pub fn is_success(&self) -> bool {
        self.valid_points() >= DEVICE_MIN_VALID_POINTS
    }

    /// Mean per-eye distance to the target, scaled to display units
    ///
    /// Every valid eye of every point contributes one distance.
    pub fn average_error(&self, width: f64, height: f64) -> Option<f64> {
        let errors: Vec<f64> = self
            .points
            .iter()
            .flat_map(|p| {
                [p.left, p.right].into_iter().flatten().map(move |eye| {
                    ((eye.x - p.target.x) * width).hypot((eye.y - p.target.y) * height)
                })
            })
            .collect();

        if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        }
    }
}

/// Answer to `GET CALIBRATE_RESULT_SUMMARY`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCalibrationSummary {
    /// Display units as reported by the tracker
    pub average_error: Option<f64>,
    pub valid_points: Option<u64>,
}

impl DeviceCalibrationSummary {
    pub fn from_ack(ack: &RawMessage) -> Option<Self> {
        let summary = Self {
            average_error: ack.attr_f64("AVE_ERROR"),
            valid_points: ack.attr_u64("VALID_POINTS"),
        };
        (summary.average_error.is_some() || summary.valid_points.is_some()).then_some(summary)
    }
}

/// Everything the tracker has reported about the current attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCalibrationState {
    pub progress: Option<DevicePointProgress>,
    pub report: Option<DeviceCalibrationReport>,
    pub summary: Option<DeviceCalibrationSummary>,
}

impl DeviceCalibrationState {
    /// Fold a `CAL` record in; unknown ids are ignored
    pub fn apply_record(&mut self, record: &RawMessage) {
        let Some(id) = record.id() else {
            debug!("CAL record without ID");
            return;
        };

        match id {
            "CALIB_START_PT" => {
                let Some(point) = record.attr_u64("PT") else {
                    return;
                };
                let target = record
                    .attr_f64("CALX")
                    .zip(record.attr_f64("CALY"))
                    .map(|(x, y)| GazePoint::new(x, y));
                debug!("Tracker calibration point {} started", point);
                self.progress = Some(DevicePointProgress {
                    point,
                    target,
                    started: Instant::now(),
                    finished: None,
                });
            }
            "CALIB_RESULT_PT" => {
                let point = record.attr_u64("PT");
                if let Some(progress) = self.progress.as_mut()
                    && Some(progress.point) == point
                {
                    progress.finished = Some(Instant::now());
                }
            }
            "CALIB_RESULT" => {
                let report = DeviceCalibrationReport::from_record(record);
                info!(
                    "Tracker calibration result: {}/{} valid points ({})",
                    report.valid_points(),
                    report.points.len(),
                    if report.is_success() { "ok" } else { "failed" }
                );
                self.report = Some(report);
            }
            other => debug!("Ignoring CAL record {}", other),
        }
    }

    /// Record a `CALIBRATE_RESULT_SUMMARY` acknowledgment
    pub fn apply_summary(&mut self, ack: &RawMessage) {
        if let Some(summary) = DeviceCalibrationSummary::from_ack(ack) {
            info!(
                "Tracker calibration summary: error {:?}, {:?} valid points",
                summary.average_error, summary.valid_points
            );
            self.summary = Some(summary);
        }
    }

    /// Device-side error in display units: the summary first, then the report
    pub fn average_error(&self, width: f64, height: f64) -> Option<f64> {
        self.summary
            .and_then(|s| s.average_error)
            .or_else(|| self.report.as_ref()?.average_error(width, height))
    }

    /// Valid point count: the summary first, then the report
    pub fn valid_points(&self) -> Option<u64> {
        self.summary
            .and_then(|s| s.valid_points)
            .or_else(|| Some(self.report.as_ref()?.valid_points() as u64))
    }

    /// Whether the tracker counts its own calibration as a success, once known
    pub fn is_success(&self) -> Option<bool> {
        self.valid_points()
            .map(|n| n >= DEVICE_MIN_VALID_POINTS as u64)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Progress of the device command sequence
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSequenceState {
    Idle,
    Running,
    Done,
    Failed(String),
}

/// Per-point timing the tracker applies before it starts
const DEFAULT_POINT_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_POINT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Queue of calibration commands sent one at a time, never blocking
pub struct DeviceSequence {
    steps: VecDeque<RawMessage>,
    in_flight: Option<AckHandle>,
    state: DeviceSequenceState,
    ack_timeout: Duration,
    point_delay: Duration,
    point_timeout: Duration,
}

impl DeviceSequence {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            steps: VecDeque::new(),
            in_flight: None,
            state: DeviceSequenceState::Idle,
            ack_timeout,
            point_delay: DEFAULT_POINT_DELAY,
            point_timeout: DEFAULT_POINT_TIMEOUT,
        }
    }

    /// Match the tracker's per-point animation delay and sampling time to ours
    pub fn with_point_timing(mut self, delay: Duration, timeout: Duration) -> Self {
        self.point_delay = delay;
        self.point_timeout = timeout;
        self
    }

    pub fn state(&self) -> &DeviceSequenceState {
        &self.state
    }

    /// Stop, clear, add every target, set point timing, show, start
    ///
    /// Targets are normalized `[0, 1]` screen coordinates.
    pub fn start(&mut self, targets: &[GazePoint]) {
        let mut steps = vec![commands::calibrate_start(false), commands::calibrate_clear()];
        steps.extend(targets.iter().map(|t| commands::calibrate_add_point(t.x, t.y)));
        steps.push(commands::calibrate_timeout(self.point_timeout.as_secs_f64()));
        steps.push(commands::calibrate_delay(self.point_delay.as_secs_f64()));
        steps.push(commands::calibrate_show(true));
        steps.push(commands::calibrate_start(true));
        self.replace(steps);
    }

    /// Ask for the summary and hide the tracker's calibration window
    pub fn finish(&mut self) {
        if self.state == DeviceSequenceState::Running {
            self.steps.push_back(commands::calibrate_result_summary());
            self.steps.push_back(commands::calibrate_show(false));
        } else {
            self.replace(vec![
                commands::calibrate_result_summary(),
                commands::calibrate_show(false),
            ]);
        }
    }

    fn replace(&mut self, steps: Vec<RawMessage>) {
        self.in_flight = None;
        self.steps = steps.into();
        self.state = DeviceSequenceState::Running;
    }

    /// Drop pending steps and stop the tracker without waiting for ACKs
    ///
    /// The tracker's point list goes back to its defaults.
    pub fn abort(&mut self, channel: &dyn CommandChannel) {
        self.in_flight = None;
        self.steps.clear();
        for command in [
            commands::calibrate_start(false),
            commands::calibrate_show(false),
            commands::calibrate_reset(),
        ] {
            match channel.send_command(&command, self.ack_timeout) {
                // Withdrawn right away; the late ACK is ignored as unmatched
                Ok(handle) => drop(handle),
                Err(e) => debug!("Abort command {:?} not sent: {}", command.id(), e),
            }
        }
        self.state = DeviceSequenceState::Failed("aborted".to_string());
    }

    /// Advance as far as acknowledgments allow; call once per tick
    pub fn poll(&mut self, channel: &dyn CommandChannel) -> &DeviceSequenceState {
        while self.state == DeviceSequenceState::Running {
            if let Some(handle) = &self.in_flight {
                match handle.try_poll() {
                    AckStatus::Pending => break,
                    AckStatus::Acked(ack) if ack.kind() == MessageKind::Nack => {
                        let reason = format!("{} rejected", handle.id());
                        self.fail(reason);
                        break;
                    }
                    AckStatus::Acked(_) => {
                        debug!("{} acknowledged", handle.id());
                        self.in_flight = None;
                    }
                    AckStatus::TimedOut => {
                        let reason = Error::AckTimeout {
                            id: handle.id().to_string(),
                        }
                        .to_string();
                        self.fail(reason);
                        break;
                    }
                    AckStatus::Cancelled => {
                        self.fail(Error::NotConnected.to_string());
                        break;
                    }
                }
            }

            let Some(command) = self.steps.pop_front() else {
                self.state = DeviceSequenceState::Done;
                break;
            };
            match channel.send_command(&command, self.ack_timeout) {
                Ok(handle) => self.in_flight = Some(handle),
                Err(e) => {
                    self.fail(e.to_string());
                    break;
                }
            }
        }
        &self.state
    }

    fn fail(&mut self, reason: String) {
        warn!("Tracker calibration sequence failed: {}", reason);
        self.in_flight = None;
        self.steps.clear();
        self.state = DeviceSequenceState::Failed(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::session::PendingAcks;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Records commands and hands out handles from a private registry
    struct RecordingChannel {
        acks: Arc<PendingAcks>,
        sent: RefCell<Vec<String>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                acks: Arc::new(PendingAcks::new()),
                sent: RefCell::new(Vec::new()),
            }
        }

        fn ack_last(&self) {
            let id = self.sent.borrow().last().cloned().unwrap();
            assert!(self.acks.complete(&id, RawMessage::new("ACK").with("ID", id.as_str())));
        }
    }

    impl CommandChannel for RecordingChannel {
        fn send_command(
            &self,
            command: &RawMessage,
            timeout: Duration,
        ) -> crate::error::Result<AckHandle> {
            let id = command.id().unwrap().to_string();
            let handle = self.acks.register(&id, timeout)?;
            self.sent.borrow_mut().push(id);
            Ok(handle)
        }
    }

    fn targets() -> Vec<GazePoint> {
        vec![
            GazePoint::new(0.1, 0.1),
            GazePoint::new(0.9, 0.1),
            GazePoint::new(0.9, 0.9),
            GazePoint::new(0.1, 0.9),
        ]
    }

    #[test]
    fn test_sequence_waits_for_each_ack() {
        let channel = RecordingChannel::new();
        let mut seq = DeviceSequence::new(Duration::from_secs(1));
        seq.start(&targets());

        assert_eq!(seq.poll(&channel), &DeviceSequenceState::Running);
        assert_eq!(channel.sent.borrow().len(), 1);
        // No ACK yet: nothing more goes out
        seq.poll(&channel);
        assert_eq!(channel.sent.borrow().len(), 1);

        for _ in 0..10 {
            channel.ack_last();
            seq.poll(&channel);
        }
        assert_eq!(seq.poll(&channel), &DeviceSequenceState::Done);
        assert_eq!(
            *channel.sent.borrow(),
            vec![
                "CALIBRATE_START",
                "CALIBRATE_CLEAR",
                "CALIBRATE_ADDPOINT",
                "CALIBRATE_ADDPOINT",
                "CALIBRATE_ADDPOINT",
                "CALIBRATE_ADDPOINT",
                "CALIBRATE_TIMEOUT",
                "CALIBRATE_DELAY",
                "CALIBRATE_SHOW",
                "CALIBRATE_START",
            ]
        );
    }

    #[test]
    fn test_point_timing_is_sent_in_seconds() {
        let channel = RecordingChannel::new();
        let mut seq = DeviceSequence::new(Duration::from_secs(1))
            .with_point_timing(Duration::from_millis(250), Duration::from_millis(800));
        seq.start(&targets());

        let timing: Vec<_> = seq
            .steps
            .iter()
            .filter(|c| {
                matches!(
                    c.id(),
                    Some(commands::CALIBRATE_TIMEOUT) | Some(commands::CALIBRATE_DELAY)
                )
            })
            .map(|c| (c.id().unwrap().to_string(), c.attr_f64("VALUE").unwrap()))
            .collect();
        assert_eq!(
            timing,
            vec![
                ("CALIBRATE_TIMEOUT".to_string(), 0.8),
                ("CALIBRATE_DELAY".to_string(), 0.25),
            ]
        );
        assert_eq!(seq.poll(&channel), &DeviceSequenceState::Running);
    }

    #[test]
    fn test_sequence_timeout_fails() {
        let channel = RecordingChannel::new();
        let mut seq = DeviceSequence::new(Duration::ZERO);
        seq.start(&targets());
        seq.poll(&channel);
        let state = seq.poll(&channel).clone();
        assert!(matches!(state, DeviceSequenceState::Failed(reason) if reason.contains("CALIBRATE_START")));
    }

    #[test]
    fn test_finish_sends_summary_then_hide() {
        let channel = RecordingChannel::new();
        let mut seq = DeviceSequence::new(Duration::from_secs(1));
        seq.finish();
        seq.poll(&channel);
        channel.ack_last();
        seq.poll(&channel);
        channel.ack_last();
        assert_eq!(seq.poll(&channel), &DeviceSequenceState::Done);
        assert_eq!(
            *channel.sent.borrow(),
            vec!["CALIBRATE_RESULT_SUMMARY", "CALIBRATE_SHOW"]
        );
    }

    #[test]
    fn test_abort_stops_tracker() {
        let channel = RecordingChannel::new();
        let mut seq = DeviceSequence::new(Duration::from_secs(1));
        seq.start(&targets());
        seq.poll(&channel);
        seq.abort(&channel);
        assert_eq!(seq.state(), &DeviceSequenceState::Failed("aborted".into()));
        assert_eq!(
            *channel.sent.borrow(),
            vec![
                "CALIBRATE_START",
                "CALIBRATE_START",
                "CALIBRATE_SHOW",
                "CALIBRATE_RESET"
            ]
        );
        assert!(channel.acks.is_empty());
    }

    #[test]
    fn test_point_progress() {
        let mut state = DeviceCalibrationState::default();
        state.apply_record(&decode("<CAL ID=\"CALIB_START_PT\" PT=\"2\" CALX=\"0.9\" CALY=\"0.1\" />").unwrap());
        let progress = state.progress.clone().unwrap();
        assert_eq!(progress.point, 2);
        assert_eq!(progress.target, Some(GazePoint::new(0.9, 0.1)));
        assert!(progress.finished.is_none());

        // A result for another point leaves the current one open
        state.apply_record(&decode("<CAL ID=\"CALIB_RESULT_PT\" PT=\"1\" />").unwrap());
        assert!(state.progress.as_ref().unwrap().finished.is_none());
        state.apply_record(&decode("<CAL ID=\"CALIB_RESULT_PT\" PT=\"2\" />").unwrap());
        assert!(state.progress.as_ref().unwrap().finished.is_some());
    }

    #[test]
    fn test_report_parsing_and_error() {
        let record = decode(
            "<CAL ID=\"CALIB_RESULT\" \
             CALX1=\"0.1\" CALY1=\"0.1\" LX1=\"0.11\" LY1=\"0.1\" LV1=\"1\" RX1=\"0.1\" RY1=\"0.12\" RV1=\"1\" \
             CALX2=\"0.9\" CALY2=\"0.1\" LX2=\"0.9\" LY2=\"0.1\" LV2=\"0\" RX2=\"0.9\" RY2=\"0.1\" RV2=\"0\" \
             CALX3=\"0.9\" CALY3=\"0.9\" LX3=\"0.9\" LY3=\"0.9\" LV3=\"1\" RX3=\"0.0\" RY3=\"0.0\" RV3=\"0\" />",
        )
        .unwrap();
        let mut state = DeviceCalibrationState::default();
        state.apply_record(&record);

        let report = state.report.clone().unwrap();
        assert_eq!(report.points.len(), 3);
        assert_eq!(report.valid_points(), 2);
        assert!(!report.is_success());

        // Errors: 0.01 (L1), 0.02 (R1), 0.0 (L3) in a unit display
        assert_relative_eq!(report.average_error(1.0, 1.0).unwrap(), 0.01, epsilon = 1e-9);
        assert_relative_eq!(state.average_error(100.0, 100.0).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_summary_takes_precedence_and_clear() {
        let mut state = DeviceCalibrationState::default();
        state.apply_record(
            &decode("<CAL ID=\"CALIB_RESULT\" CALX1=\"0.5\" CALY1=\"0.5\" LX1=\"0.6\" LY1=\"0.5\" LV1=\"1\" />").unwrap(),
        );
        assert_eq!(state.valid_points(), Some(1));
        assert_eq!(state.is_success(), Some(false));
        state.apply_summary(&decode("<ACK ID=\"CALIBRATE_RESULT_SUMMARY\" AVE_ERROR=\"12.5\" VALID_POINTS=\"5\" />").unwrap());
        assert_eq!(state.average_error(1920.0, 1080.0), Some(12.5));
        assert_eq!(state.valid_points(), Some(5));
        assert_eq!(state.is_success(), Some(true));

        state.clear();
        assert_eq!(state, DeviceCalibrationState::default());
    }

    #[test]
    fn test_summary_without_values_is_ignored() {
        let mut state = DeviceCalibrationState::default();
        state.apply_summary(&decode("<ACK ID=\"CALIBRATE_RESULT_SUMMARY\" />").unwrap());
        assert!(state.summary.is_none());
        assert_eq!(state.is_success(), None);
    }
}
