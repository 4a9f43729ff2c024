//! Consumer-facing client
//!
//! [`GazeClient`] is constructed by the caller and owns the whole session:
//! the reader thread, the consumer half of the queue and the calibration
//! engine. Nothing here is process-global.
//!
//! ```no_run
//! use gaze_link::{AppConfig, GazeClient};
//! use std::time::Duration;
//!
//! let mut client = GazeClient::from_config(AppConfig::default())?;
//! client.connect()?;
//! loop {
//!     for sample in client.drain_available() {
//!         println!("{:?}", sample.position());
//!     }
//!     std::thread::sleep(Duration::from_millis(16));
//! #   break;
//! }
//! client.disconnect();
//! # Ok::<(), gaze_link::Error>(())
//! ```

use crate::calibration::{
    ActiveCalibration, CalibrationEngine, CalibrationHandle, CalibrationResult, CalibrationStatus,
    DeviceCalibrationState, DeviceSequence,
};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::protocol::RawMessage;
use crate::session::{AckHandle, CommandChannel, ConnectionState, Session, SessionStats};
use crate::stream::{
    GazePoint, GazeSample, SampleConsumer, StreamProducer, TickReport, acquisition_queue,
};
use crate::transport::{Connector, SimulatedConnector, TcpConnector};
use log::{error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub struct GazeClient {
    config: AppConfig,
    session: Arc<Session>,
    consumer: SampleConsumer,
    engine: CalibrationEngine,
    device: DeviceSequence,
    active: ActiveCalibration,
    /// Producer parked while no reader thread runs
    idle: Option<StreamProducer>,
    reader: Option<JoinHandle<StreamProducer>>,
}

impl GazeClient {
    /// Client over any connector; validates the config
    pub fn new(config: AppConfig, connector: Box<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(Session::new());
        let (tx, rx) = acquisition_queue(config.stream.queue_capacity);
        let producer = StreamProducer::new(
            connector,
            Arc::clone(&session),
            tx,
            config.connection.clone(),
            config.stream.enabled_fields.clone(),
        );
        let active = ActiveCalibration::new();

        Ok(Self {
            engine: CalibrationEngine::new(config.calibration.clone(), active.clone()),
            device: DeviceSequence::new(config.connection.ack_timeout())
                .with_point_timing(config.calibration.settle(), config.calibration.sample_window()),
            consumer: SampleConsumer::new(rx),
            active,
            session,
            idle: Some(producer),
            reader: None,
            config,
        })
    }

    /// Client that connects over TCP to the configured host and port
    pub fn tcp(config: AppConfig) -> Result<Self> {
        let conn = &config.connection;
        let connector = TcpConnector::new(
            &conn.host,
            conn.port,
            conn.connect_timeout(),
            conn.read_timeout(),
        );
        Self::new(config, Box::new(connector))
    }

    /// Client for the configured endpoint: the simulated tracker when
    /// `[simulation] enabled` is set, TCP otherwise
    pub fn from_config(config: AppConfig) -> Result<Self> {
        if config.simulation.enabled {
            let connector =
                SimulatedConnector::new(config.simulation.clone(), config.connection.read_timeout());
            Self::new(config, Box::new(connector))
        } else {
            Self::tcp(config)
        }
    }

    /// Start the reader thread; it keeps (re)connecting until [`disconnect`]
    ///
    /// [`disconnect`]: GazeClient::disconnect
    pub fn connect(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let mut producer = self
            .idle
            .take()
            .ok_or_else(|| Error::ThreadSpawn("reader was lost".to_string()))?;

        self.session.set_running(true);
        let handle = thread::Builder::new()
            .name("gaze-reader".into())
            .spawn(move || {
                producer.run();
                producer
            })
            .map_err(|e| {
                self.session.set_running(false);
                Error::ThreadSpawn(e.to_string())
            })?;

        self.reader = Some(handle);
        info!("Connecting to {}", self.config.endpoint());
        Ok(())
    }

    /// Stop the reader thread and close the link
    ///
    /// Closing the socket unblocks a pending read; the thread then exits on
    /// its own and is joined here.
    pub fn disconnect(&mut self) {
        let Some(handle) = self.reader.take() else {
            return;
        };
        self.session.set_running(false);
        self.session.shutdown_link();
        match handle.join() {
            Ok(producer) => self.idle = Some(producer),
            Err(_) => error!("Reader thread panicked"),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// One consumer tick: drain the queue, advance calibration, poll the tracker
    pub fn tick(&mut self) -> TickReport {
        let report = self.consumer.tick();

        if self.engine.is_running()
            && self.engine.step(Instant::now(), &report.samples).is_some()
            && self.config.calibration.drive_device
        {
            self.device.finish();
        }

        if self.config.calibration.drive_device {
            self.device.poll(self.session.as_ref());
        }
        let cal = &self.config.calibration;
        let device = self.session.device_calibration();
        let average_error = device.average_error(cal.display_width, cal.display_height);
        let valid_points = device.valid_points();
        if average_error.is_some() || valid_points.is_some() {
            self.engine.note_device_result(average_error, valid_points);
        }

        report
    }

    /// Every sample received since the last call (non-blocking)
    pub fn drain_available(&mut self) -> Vec<GazeSample> {
        self.tick().samples
    }

    /// Newest sample seen by the consumer
    pub fn latest(&self) -> Option<&GazeSample> {
        self.consumer.latest()
    }

    /// Newest valid sample mapped through the active calibration
    pub fn latest_calibrated(&self) -> Option<GazePoint> {
        let result = self.active.snapshot();
        if !result.quality.is_usable() {
            return None;
        }
        result.apply(self.consumer.latest_valid()?.position()?)
    }

    /// Start a calibration attempt, discarding the previous one
    pub fn begin_calibration(&mut self) -> CalibrationHandle {
        self.session.update_device_calibration(|device| device.clear());
        let handle = self.engine.begin(Instant::now());

        if self.config.calibration.drive_device {
            self.device.start(&self.engine.normalized_targets());
            self.device.poll(self.session.as_ref());
        }
        handle
    }

    /// Abort the running attempt; returns false when none was running
    pub fn abort_calibration(&mut self) -> bool {
        if !self.engine.abort() {
            return false;
        }
        if self.config.calibration.drive_device {
            self.device.abort(self.session.as_ref());
        }
        true
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        let mut status = self.engine.status();
        status.device = self.device.state().clone();
        status
    }

    pub fn calibration_result(&self) -> Arc<CalibrationResult> {
        self.active.snapshot()
    }

    /// Shared read handle to the active calibration, for other threads
    pub fn active_calibration(&self) -> ActiveCalibration {
        self.active.clone()
    }

    pub fn device_calibration(&self) -> DeviceCalibrationState {
        self.session.device_calibration()
    }

    /// Send an arbitrary command and register for its ACK
    pub fn send_command(&self, command: &RawMessage) -> Result<AckHandle> {
        self.session
            .send_command(command, self.config.connection.ack_timeout())
    }

    pub fn start_recording(&mut self) {
        self.consumer.start_recording();
    }

    /// Stop recording after one last tick, so samples still queued are kept
    pub fn stop_recording(&mut self) -> Vec<GazeSample> {
        self.tick();
        self.consumer.stop_recording()
    }

    pub fn stats(&self) -> SessionStats {
        let receiver = self.consumer.receiver();
        SessionStats {
            dropped_display: receiver.dropped_display(),
            dropped_recording: receiver.dropped_recording(),
            ..self.session.counters().snapshot()
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl Drop for GazeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
