//! Scripted in-memory transport and connector for tests
//!
//! A [`MockTransport`] plays the tracker: tests inject the bytes it "sends",
//! inspect what the session wrote, and can have it acknowledge commands
//! automatically. A [`MockConnector`] hands out scripted transports one per
//! connect attempt and refuses once the script runs out.

use super::{Connector, Transport};
use crate::error::{Error, Result};
use crate::protocol::{MessageKind, RawMessage, decode};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Simulated read timeout when no data is queued
const IDLE_READ_DELAY: Duration = Duration::from_millis(2);

/// Mock transport shared between the test and the session
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_chunks: VecDeque<Vec<u8>>,
    write_buffer: Vec<u8>,
    auto_ack: bool,
    silent_ids: HashSet<String>,
    responses: HashMap<String, RawMessage>,
    close_when_drained: bool,
    closed: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_chunks: VecDeque::new(),
                write_buffer: Vec::new(),
                auto_ack: false,
                silent_ids: HashSet::new(),
                responses: HashMap::new(),
                close_when_drained: false,
                closed: false,
            })),
        }
    }

    /// Mock that acknowledges every `SET`/`GET` it receives
    pub fn with_auto_ack() -> Self {
        let mock = Self::new();
        mock.lock().auto_ack = true;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inject one read's worth of bytes
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_chunks.push_back(data.to_vec());
    }

    /// Inject a line (delimiter appended) as its own read
    pub fn inject_line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.lock().read_chunks.push_back(data);
    }

    /// Report end-of-stream once all injected reads are consumed
    pub fn close_when_drained(&self) {
        self.lock().close_when_drained = true;
    }

    /// Never acknowledge commands with this id
    pub fn silence_ack(&self, id: &str) {
        self.lock().silent_ids.insert(id.to_string());
    }

    /// Answer commands with this id with `response` instead of a plain ACK
    pub fn set_response(&self, id: &str, response: RawMessage) {
        self.lock().responses.insert(id.to_string(), response);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.lock().write_buffer.clone()
    }

    /// Written data split into lines
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.get_written())
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Ids of the `SET`/`GET` commands written so far, in order
    pub fn written_ids(&self) -> Vec<String> {
        self.written_lines()
            .iter()
            .filter_map(|l| decode(l).ok())
            .filter_map(|m| m.id().map(str::to_string))
            .collect()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.lock().write_buffer.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MockTransportInner {
    fn acknowledge(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            let Ok(msg) = decode(line) else {
                continue;
            };
            if !matches!(msg.kind(), MessageKind::Set | MessageKind::Get) {
                continue;
            }
            let Some(id) = msg.id() else {
                continue;
            };
            if self.silent_ids.contains(id) {
                continue;
            }

            let reply = match self.responses.get(id) {
                Some(custom) => custom.clone(),
                None => {
                    let mut ack = RawMessage::new("ACK").with("ID", id);
                    for (name, value) in msg.attributes() {
                        if !name.eq_ignore_ascii_case("ID") {
                            ack.set(name.clone(), value.clone());
                        }
                    }
                    ack
                }
            };
            if let Ok(encoded) = reply.encode() {
                self.read_chunks.push_back(encoded.into_bytes());
            }
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Ok(0);
            }
            if let Some(mut chunk) = inner.read_chunks.pop_front() {
                let n = chunk.len().min(buffer.len());
                buffer[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    inner.read_chunks.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if inner.close_when_drained {
                inner.closed = true;
                return Ok(0);
            }
        }

        thread::sleep(IDLE_READ_DELAY);
        Err(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout")))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock transport closed",
            )));
        }
        inner.write_buffer.extend_from_slice(data);
        if inner.auto_ack {
            inner.acknowledge(data);
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

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector that hands out scripted transports
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Default)]
struct MockConnectorInner {
    links: VecDeque<MockTransport>,
    attempts: usize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockConnectorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a transport for the next successful connect
    pub fn push(&self, transport: MockTransport) {
        self.lock().links.push_back(transport);
    }

    /// Connect attempts made so far (successful or refused)
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }
}

impl Connector for MockConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let mut inner = self.lock();
        inner.attempts += 1;
        match inner.links.pop_front() {
            Some(link) => Ok(Box::new(link)),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock connection refused",
            ))),
        }
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}
