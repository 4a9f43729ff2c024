//! Pending acknowledgment registry
//!
//! A request registers its ack id *before* the command is written, so an ACK
//! that races back ahead of the sender's next statement is never lost. The
//! reader thread completes entries as ACK records arrive; anything it cannot
//! match is reported back so the caller can count and ignore it.

use crate::error::{Error, Result};
use crate::protocol::RawMessage;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct PendingEntry {
    tx: Sender<RawMessage>,
    deadline: Instant,
    token: u64,
}

/// Outstanding "await ACK with this id" requests, at most one per id
#[derive(Default)]
pub struct PendingAcks {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_token: AtomicU64,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in the next ACK carrying `id`
    ///
    /// Fails with [`Error::CommandBusy`] while an unexpired request for the
    /// same id is outstanding. Expired entries are replaced.
    pub fn register(self: &Arc<Self>, id: &str, timeout: Duration) -> Result<AckHandle> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(existing) = entries.get(id)
            && existing.deadline > now
        {
            return Err(Error::CommandBusy { id: id.to_string() });
        }

        let (tx, rx) = bounded(1);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let deadline = now + timeout;
        entries.insert(
            id.to_string(),
            PendingEntry {
                tx,
                deadline,
                token,
            },
        );

        Ok(AckHandle {
            id: id.to_string(),
            rx,
            deadline,
            token,
            registry: Arc::clone(self),
        })
    }

    /// Deliver an ACK to its waiter. Returns false when nobody is waiting.
    pub fn complete(&self, id: &str, message: RawMessage) -> bool {
        match self.lock().remove(id) {
            Some(entry) => {
                // Waiter may have been dropped in the meantime; still a match
                let _ = entry.tx.send(message);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding request (link lost); waiters see `Cancelled`
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: &str, token: u64) {
        let mut entries = self.lock();
        if entries.get(id).is_some_and(|e| e.token == token) {
            entries.remove(id);
        }
    }
}

/// Non-blocking view of one outstanding request
#[derive(Debug, Clone, PartialEq)]
pub enum AckStatus {
    /// Still waiting and within the deadline
    Pending,
    /// The matching record arrived
    Acked(RawMessage),
    /// Deadline passed without a match
    TimedOut,
    /// The request was dropped because the connection went away
    Cancelled,
}

/// Handle returned by `send_command`; dropping it withdraws the request
pub struct AckHandle {
    id: String,
    rx: Receiver<RawMessage>,
    deadline: Instant,
    token: u64,
    registry: Arc<PendingAcks>,
}

impl AckHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Poll without blocking
    pub fn try_poll(&self) -> AckStatus {
        match self.rx.try_recv() {
            Ok(message) => AckStatus::Acked(message),
            Err(TryRecvError::Empty) if Instant::now() >= self.deadline => AckStatus::TimedOut,
            Err(TryRecvError::Empty) => AckStatus::Pending,
            Err(TryRecvError::Disconnected) => AckStatus::Cancelled,
        }
    }

    /// Block until the ACK arrives or the deadline passes
    pub fn wait(self) -> Result<RawMessage> {
        let timeout = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(Error::AckTimeout {
                id: self.id.clone(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::NotConnected),
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        self.registry.release(&self.id, self.token);
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}
