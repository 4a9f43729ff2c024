//! Session counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped by the reader thread
#[derive(Debug, Default)]
pub struct StatsCounters {
    pub lines_received: AtomicU64,
    pub malformed_lines: AtomicU64,
    pub data_records: AtomicU64,
    pub acks_matched: AtomicU64,
    pub acks_unmatched: AtomicU64,
    pub cal_records: AtomicU64,
    pub connections: AtomicU64,
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub lines_received: u64,
    pub malformed_lines: u64,
    pub data_records: u64,
    pub acks_matched: u64,
    pub acks_unmatched: u64,
    pub cal_records: u64,
    /// Successful connections after the first one
    pub reconnects: u64,
    pub dropped_display: u64,
    /// Anything other than zero here means samples were lost while recording
    pub dropped_recording: u64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot without the queue counters (filled in by the caller)
    pub fn snapshot(&self) -> SessionStats {
        let connections = self.connections.load(Ordering::Relaxed);
        SessionStats {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            data_records: self.data_records.load(Ordering::Relaxed),
            acks_matched: self.acks_matched.load(Ordering::Relaxed),
            acks_unmatched: self.acks_unmatched.load(Ordering::Relaxed),
            cal_records: self.cal_records.load(Ordering::Relaxed),
            reconnects: connections.saturating_sub(1),
            dropped_display: 0,
            dropped_recording: 0,
        }
    }
}
