//! Reader thread: connect, configure, read, dispatch, reconnect
//!
//! # Loop
//!
//! ```text
//! Disconnected -> Connecting --ok--> Connected -> configure -> read lines ...
//!      ^              |                                          |
//!      +-- sleep -----+ (refused)               closed / error --+
//! ```
//!
//! Retries forever at the configured interval with no backoff. The sleep is
//! sliced so that [`Session`] shutdown is noticed promptly.
//!
//! Every connection starts with an empty [`LineBuffer`]: a partial line left
//! over from a dead connection never merges with the next connection's bytes.

use super::queue::{PushOutcome, SampleSender};
use super::sample::GazeSample;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::protocol::{MessageKind, RawMessage, commands, decode};
use crate::session::{AckStatus, CommandChannel, ConnectionState, Session, StatsCounters};
use crate::transport::{Connector, LineBuffer, Transport};
use log::{debug, error, info, trace, warn};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Read chunk size
const READ_BUFFER_SIZE: usize = 4096;

/// Granularity of the reconnect sleep
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Owns the connector and the producer half of the queue
pub struct StreamProducer {
    connector: Box<dyn Connector>,
    session: Arc<Session>,
    queue: SampleSender,
    config: ConnectionConfig,
    enabled_fields: Vec<String>,
    lines: LineBuffer,
}

impl StreamProducer {
    pub fn new(
        connector: Box<dyn Connector>,
        session: Arc<Session>,
        queue: SampleSender,
        config: ConnectionConfig,
        enabled_fields: Vec<String>,
    ) -> Self {
        Self {
            connector,
            session,
            queue,
            config,
            enabled_fields,
            lines: LineBuffer::new(),
        }
    }

    /// Run until the session is stopped
    pub fn run(&mut self) {
        info!("Reader started for {}", self.connector.endpoint());
        let mut outage_reported = false;

        while self.session.is_running() {
            self.session.set_state(ConnectionState::Connecting);

            match self.connector.connect() {
                Ok(link) => {
                    outage_reported = false;
                    StatsCounters::bump(&self.session.counters().connections);

                    match self.serve(link) {
                        Ok(()) => debug!("Link closed on shutdown"),
                        Err(e) if self.session.is_running() => {
                            warn!("Link to {} lost: {}", self.connector.endpoint(), e)
                        }
                        Err(e) => debug!("Link closed on shutdown: {}", e),
                    }
                    self.session.detach_writer();
                    self.session.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    self.session.set_state(ConnectionState::Disconnected);
                    if outage_reported {
                        debug!("Reconnect to {} failed: {}", self.connector.endpoint(), e);
                    } else {
                        warn!(
                            "Cannot reach tracker at {}: {} (retrying every {:?})",
                            self.connector.endpoint(),
                            e,
                            self.config.retry_interval()
                        );
                        outage_reported = true;
                    }
                }
            }

            self.sleep_while_running(self.config.retry_interval());
        }

        self.session.set_state(ConnectionState::Disconnected);
        info!("Reader stopped");
    }

    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.session.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Handle one connection until it drops or the session stops
    fn serve(&mut self, mut link: Box<dyn Transport>) -> Result<()> {
        self.lines.clear();
        self.session.attach_writer(link.try_clone()?);
        self.session.set_state(ConnectionState::Connected);

        self.configure(link.as_mut())?;
        info!(
            "Stream configured ({} fields enabled)",
            self.enabled_fields.len()
        );

        while self.session.is_running() {
            self.pump(link.as_mut())?;
        }
        Ok(())
    }

    /// Enable the data stream, then each field, awaiting every ACK in turn
    fn configure(&mut self, link: &mut dyn Transport) -> Result<()> {
        let sequence: Vec<RawMessage> = std::iter::once(commands::enable_send_data())
            .chain(self.enabled_fields.iter().map(|f| commands::enable_field(f)))
            .collect();

        for command in &sequence {
            if !self.session.is_running() {
                break;
            }
            self.enable(link, command)?;
        }
        Ok(())
    }

    fn enable(&mut self, link: &mut dyn Transport, command: &RawMessage) -> Result<()> {
        let id = command.id().unwrap_or_default().to_string();
        let attempts = self.config.enable_attempts.max(1);
        for attempt in 1..=attempts {
            let handle = self
                .session
                .send_command(command, self.config.enable_ack_timeout())?;

            loop {
                match handle.try_poll() {
                    AckStatus::Acked(ack) if ack.kind() == MessageKind::Nack => {
                        warn!("{} rejected by tracker (attempt {}/{})", id, attempt, attempts);
                        break;
                    }
                    AckStatus::Acked(_) => {
                        debug!("{} acknowledged", id);
                        return Ok(());
                    }
                    AckStatus::Pending => {
                        self.pump(link)?;
                    }
                    AckStatus::TimedOut => {
                        warn!("No ACK for {} (attempt {}/{})", id, attempt, attempts);
                        break;
                    }
                    AckStatus::Cancelled => return Err(Error::NotConnected),
                }
            }
        }

        error!("Giving up on {}; reconnecting", id);
        Err(Error::ConfigurationFailed { id })
    }

    /// One read plus dispatch of every complete line; returns lines handled
    ///
    /// A read timeout yields `Ok(0)`. End of stream is an error so the caller
    /// reconnects, but only after the lines already buffered are handled.
    fn pump(&mut self, link: &mut dyn Transport) -> Result<usize> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = match link.read(&mut buf) {
            Ok(0) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection closed by tracker",
                )));
            }
            Ok(n) => n,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(_) => return Ok(0),
        };

        if !self.lines.extend(&buf[..n]) {
            warn!("Discarded oversized undelimited input");
        }

        let mut handled = 0;
        while let Some(line) = self.lines.next_line() {
            self.handle_line(&line);
            handled += 1;
        }
        Ok(handled)
    }

    fn handle_line(&mut self, line: &str) {
        let counters = self.session.counters();
        StatsCounters::bump(&counters.lines_received);

        let message = match decode(line) {
            Ok(m) => m,
            Err(e) => {
                StatsCounters::bump(&counters.malformed_lines);
                warn!("Discarding line: {}", e);
                return;
            }
        };

        match message.kind() {
            MessageKind::Ack | MessageKind::Nack => self.handle_ack(message),
            MessageKind::Cal => {
                StatsCounters::bump(&counters.cal_records);
                self.session
                    .update_device_calibration(|device| device.apply_record(&message));
            }
            MessageKind::Rec => {
                StatsCounters::bump(&counters.data_records);
                let sample = GazeSample::from_record(&message, self.session.elapsed_secs());
                if let PushOutcome::DroppedOldest(n) = self.queue.push(sample) {
                    trace!("Queue full, {} older sample(s) evicted", n);
                }
            }
            _ => trace!("Ignoring {} message", message.tag()),
        }
    }

    fn handle_ack(&mut self, message: RawMessage) {
        let counters = self.session.counters();
        let Some(id) = message.id().map(str::to_string) else {
            StatsCounters::bump(&counters.acks_unmatched);
            debug!("Ignoring {} without ID", message.tag());
            return;
        };

        if message.kind() == MessageKind::Nack {
            warn!("Tracker rejected {}", id);
        } else if id == commands::CALIBRATE_RESULT_SUMMARY {
            self.session
                .update_device_calibration(|device| device.apply_summary(&message));
        }

        if self.session.acks().complete(&id, message) {
            StatsCounters::bump(&counters.acks_matched);
        } else {
            StatsCounters::bump(&counters.acks_unmatched);
            debug!("Ignoring unmatched ACK {}", id);
        }
    }
}
