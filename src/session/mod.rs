//! Transport session shared between the reader thread and the consumer
//!
//! The reader thread (see [`crate::stream::StreamProducer`]) owns the read
//! half of the link and is the only writer of [`ConnectionState`]. The
//! consumer side holds the same [`Session`] through an `Arc` and uses it to:
//!
//! - read the connection state as one atomic value
//! - send commands and await their ACK through [`Session::send_command`]
//! - read snapshots of the device calibration records and counters
//!
//! Writes go through a single mutex-guarded write handle, so concurrent
//! senders serialize and every command reaches the wire as a whole line.

mod ack;
mod stats;

pub use ack::{AckHandle, AckStatus, PendingAcks};
pub use stats::{SessionStats, StatsCounters};

use crate::calibration::DeviceCalibrationState;
use crate::error::{Error, Result};
use crate::protocol::RawMessage;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// Link state as seen by every context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// [`ConnectionState`] stored as a single atomic byte
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store and return the previous state
    fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }
}

/// Something that can send a command and hand back its ACK handle
///
/// Implemented by [`Session`]; the device calibration sequence only depends
/// on this seam.
pub trait CommandChannel {
    fn send_command(&self, command: &RawMessage, timeout: Duration) -> Result<AckHandle>;
}

/// State shared by the reader thread and the consumer
pub struct Session {
    state: AtomicConnectionState,
    running: AtomicBool,
    writer: Mutex<Option<Box<dyn Transport>>>,
    acks: Arc<PendingAcks>,
    stats: StatsCounters,
    device: RwLock<DeviceCalibrationState>,
    epoch: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            running: AtomicBool::new(false),
            writer: Mutex::new(None),
            acks: Arc::new(PendingAcks::new()),
            stats: StatsCounters::default(),
            device: RwLock::new(DeviceCalibrationState::default()),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Transition the link state (reader thread only)
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.swap(state);
        if previous != state {
            info!("Connection state: {:?} -> {:?}", previous, state);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Seconds since the session was created (fallback sample clock)
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn acks(&self) -> &Arc<PendingAcks> {
        &self.acks
    }

    pub fn counters(&self) -> &StatsCounters {
        &self.stats
    }

    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the write handle of a freshly connected link
    pub(crate) fn attach_writer(&self, writer: Box<dyn Transport>) {
        *self.writer() = Some(writer);
    }

    /// Shut down and forget the write handle; fail every pending request
    pub(crate) fn detach_writer(&self) {
        if let Some(mut writer) = self.writer().take()
            && let Err(e) = writer.shutdown()
        {
            debug!("Shutdown of closed link failed: {}", e);
        }
        let cancelled = self.acks.cancel_all();
        if cancelled > 0 {
            warn!("Link lost with {} command(s) awaiting ACK", cancelled);
        }
    }

    /// Close the underlying socket so a blocked read returns
    pub(crate) fn shutdown_link(&self) {
        if let Some(writer) = self.writer().as_mut()
            && let Err(e) = writer.shutdown()
        {
            debug!("Link shutdown failed: {}", e);
        }
    }

    /// Write one encoded line under the writer lock
    pub(crate) fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer();
        let link = writer.as_mut().ok_or(Error::NotConnected)?;
        link.write_all(line.as_bytes())?;
        link.flush()
    }

    /// Snapshot of the tracker's own calibration records
    pub fn device_calibration(&self) -> DeviceCalibrationState {
        self.device
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mutate the device calibration records under the write lock
    pub(crate) fn update_device_calibration<R>(
        &self,
        f: impl FnOnce(&mut DeviceCalibrationState) -> R,
    ) -> R {
        let mut guard = self.device.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl CommandChannel for Session {
    /// Send a command and register for the ACK carrying its `ID`
    ///
    /// The waiter is registered before the line is written. Fails with
    /// [`Error::NotConnected`] when no link is up and [`Error::CommandBusy`]
    /// while a request with the same id is outstanding.
    fn send_command(&self, command: &RawMessage, timeout: Duration) -> Result<AckHandle> {
        let id = command
            .id()
            .ok_or_else(|| Error::InvalidParameter(format!("{} command without ID", command.tag())))?;
        let line = command.encode()?;

        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let handle = self.acks.register(id, timeout)?;
        // On failure the handle is dropped here, which withdraws the request
        self.write_line(&line)?;
        debug!("Sent {}", line.trim_end());
        Ok(handle)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands;
    use crate::transport::{MockTransport, Transport};

    #[test]
    fn test_state_roundtrip() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        assert_eq!(state.swap(ConnectionState::Connecting), ConnectionState::Disconnected);
        assert_eq!(state.load(), ConnectionState::Connecting);
        state.swap(ConnectionState::Connected);
        assert_eq!(state.load(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_requires_connection() {
        let session = Session::new();
        let result = session.send_command(&commands::calibrate_clear(), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(session.acks().is_empty());
    }

    #[test]
    fn test_send_registers_and_writes() {
        let session = Session::new();
        let mock = MockTransport::new();
        session.attach_writer(Box::new(mock.clone()));
        session.set_state(ConnectionState::Connected);

        let handle = session
            .send_command(&commands::calibrate_start(true), Duration::from_secs(1))
            .unwrap();
        assert_eq!(handle.id(), "CALIBRATE_START");
        assert!(session.acks().is_pending("CALIBRATE_START"));
        assert_eq!(
            mock.written_lines(),
            vec!["<SET ID=\"CALIBRATE_START\" STATE=\"1\" />".to_string()]
        );

        assert!(matches!(
            session.send_command(&commands::calibrate_start(false), Duration::from_secs(1)),
            Err(Error::CommandBusy { .. })
        ));
    }

    #[test]
    fn test_write_failure_withdraws_request() {
        let session = Session::new();
        let mock = MockTransport::new();
        mock.close_when_drained();
        let mut reader = mock.clone();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        session.attach_writer(Box::new(mock));
        session.set_state(ConnectionState::Connected);
        assert!(session
            .send_command(&commands::calibrate_clear(), Duration::from_secs(1))
            .is_err());
        assert!(session.acks().is_empty());
    }

    #[test]
    fn test_detach_cancels_pending() {
        let session = Session::new();
        let mock = MockTransport::new();
        session.attach_writer(Box::new(mock.clone()));
        session.set_state(ConnectionState::Connected);
        let handle = session
            .send_command(&commands::calibrate_show(true), Duration::from_secs(1))
            .unwrap();

        session.detach_writer();
        assert_eq!(handle.try_poll(), AckStatus::Cancelled);
        assert!(mock.is_closed());
    }
}
