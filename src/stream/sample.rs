//! Gaze samples decoded from `REC` data records

use crate::protocol::RawMessage;

/// A point in either normalized device space or display space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
}

impl GazePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp to the unit square; for display only, samples keep raw values
    pub fn clamped(&self) -> Self {
        Self::new(self.x.clamp(0.0, 1.0), self.y.clamp(0.0, 1.0))
    }

    pub fn distance(&self, other: &GazePoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Which record field pair produced a sample's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GazeSource {
    /// `BPOGX`/`BPOGY`, gated by `BPOGV`
    Best,
    /// `FPOGX`/`FPOGY`, gated by `FPOGV`
    Fixation,
    /// `LPOGX`/`LPOGY`, gated by `LPOGV`
    Left,
    /// `RPOGX`/`RPOGY`, gated by `RPOGV`
    Right,
}

/// Candidate sources in priority order; the first valid pair wins
pub const GAZE_FALLBACK: [GazeSource; 4] = [
    GazeSource::Best,
    GazeSource::Fixation,
    GazeSource::Left,
    GazeSource::Right,
];

impl GazeSource {
    /// (x field, y field, validity field)
    pub fn fields(self) -> (&'static str, &'static str, &'static str) {
        match self {
            GazeSource::Best => ("BPOGX", "BPOGY", "BPOGV"),
            GazeSource::Fixation => ("FPOGX", "FPOGY", "FPOGV"),
            GazeSource::Left => ("LPOGX", "LPOGY", "LPOGV"),
            GazeSource::Right => ("RPOGX", "RPOGY", "RPOGV"),
        }
    }

    /// Position from this source, if its flag is set and both axes parse
    fn extract(self, record: &RawMessage) -> Option<GazePoint> {
        let (x, y, valid) = self.fields();
        if record.flag(valid) != Some(true) {
            return None;
        }
        Some(GazePoint::new(record.attr_f64(x)?, record.attr_f64(y)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    fn prefix(self) -> char {
        match self {
            Eye::Left => 'L',
            Eye::Right => 'R',
        }
    }
}

/// Per-eye measurements; each field is absent unless its own flag is set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeSample {
    /// 2D pupil diameter in camera pixels (`xPD`, gated by `xPV`)
    pub pupil_px: Option<f64>,
    /// 3D pupil diameter in metres (`xPUPILD`)
    pub pupil_m: Option<f64>,
    /// Eye distance from the device in metres (`xEYEZ`)
    pub distance_m: Option<f64>,
}

impl EyeSample {
    /// 3D fields are gated by `xPUPILV`, or by `xPV` when the tracker omits it
    fn from_record(record: &RawMessage, eye: Eye) -> Self {
        let p = eye.prefix();
        let pupil_valid = record.flag(&format!("{p}PV")) == Some(true);
        let valid_3d = record
            .flag(&format!("{p}PUPILV"))
            .unwrap_or(pupil_valid);

        Self {
            pupil_px: pupil_valid
                .then(|| record.attr_f64(&format!("{p}PD")))
                .flatten(),
            pupil_m: valid_3d
                .then(|| record.attr_f64(&format!("{p}PUPILD")))
                .flatten(),
            distance_m: valid_3d
                .then(|| record.attr_f64(&format!("{p}EYEZ")))
                .flatten(),
        }
    }
}

/// One decoded data record; immutable after construction
#[derive(Debug, Clone, PartialEq)]
pub struct GazeSample {
    timestamp: f64,
    counter: Option<u64>,
    position: Option<GazePoint>,
    source: Option<GazeSource>,
    left: EyeSample,
    right: EyeSample,
}

impl GazeSample {
    /// Build a sample from a `REC` record
    ///
    /// `fallback_time` is used when the record has no `TIME` field. Every
    /// field is derived from this record alone, so nothing carries over from
    /// an earlier sample.
    pub fn from_record(record: &RawMessage, fallback_time: f64) -> Self {
        let (source, position) = GAZE_FALLBACK
            .iter()
            .find_map(|&source| source.extract(record).map(|p| (source, p)))
            .unzip();

        Self {
            timestamp: record.attr_f64("TIME").unwrap_or(fallback_time),
            counter: record.attr_u64("CNT"),
            position,
            source,
            left: EyeSample::from_record(record, Eye::Left),
            right: EyeSample::from_record(record, Eye::Right),
        }
    }

    /// Valid sample at a raw position, with no eye data
    pub fn at(timestamp: f64, position: GazePoint) -> Self {
        Self {
            timestamp,
            counter: None,
            position: Some(position),
            source: Some(GazeSource::Best),
            left: EyeSample::default(),
            right: EyeSample::default(),
        }
    }

    /// Sample with no valid position (blink, tracking loss)
    pub fn invalid(timestamp: f64) -> Self {
        Self {
            timestamp,
            counter: None,
            position: None,
            source: None,
            left: EyeSample::default(),
            right: EyeSample::default(),
        }
    }

    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn counter(&self) -> Option<u64> {
        self.counter
    }

    /// True when one of the fallback sources supplied a position
    pub fn is_valid(&self) -> bool {
        self.position.is_some()
    }

    /// Raw normalized position (not clamped)
    pub fn position(&self) -> Option<GazePoint> {
        self.position
    }

    pub fn source(&self) -> Option<GazeSource> {
        self.source
    }

    pub fn eye(&self, eye: Eye) -> &EyeSample {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}
