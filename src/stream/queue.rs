//! Bounded hand-off between the reader thread and the consumer
//!
//! Built on a crossbeam bounded channel. The producer half keeps its own
//! receiver clone so that, when the channel is full, it can evict the oldest
//! sample and retry instead of blocking the read loop.
//!
//! The consumer sets the mode. In [`QueueMode::Display`] an eviction is normal
//! and only counted. In [`QueueMode::Recording`] the consumer has promised to
//! keep up, so an eviction is logged as an error and counted separately.

use super::sample::GazeSample;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use log::{error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Drain policy the consumer is currently applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Only the newest sample matters; overflow drops the oldest
    Display,
    /// Every sample is retained by the consumer; overflow is a defect
    Recording,
}

/// Result of a single push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Stored after evicting this many older samples
    DroppedOldest(usize),
}

#[derive(Debug)]
struct QueueShared {
    capacity: usize,
    recording: AtomicBool,
    dropped_display: AtomicU64,
    dropped_recording: AtomicU64,
}

/// Create a queue holding at most `capacity` samples
pub fn acquisition_queue(capacity: usize) -> (SampleSender, SampleReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let shared = Arc::new(QueueShared {
        capacity,
        recording: AtomicBool::new(false),
        dropped_display: AtomicU64::new(0),
        dropped_recording: AtomicU64::new(0),
    });

    (
        SampleSender {
            tx,
            evict: rx.clone(),
            shared: Arc::clone(&shared),
        },
        SampleReceiver { rx, shared },
    )
}

/// Producer half, owned by the reader thread
pub struct SampleSender {
    tx: Sender<GazeSample>,
    evict: Receiver<GazeSample>,
    shared: Arc<QueueShared>,
}

impl SampleSender {
    /// Push without blocking, evicting the oldest sample while full
    ///
    /// The eviction receiver keeps the channel connected, so a push succeeds
    /// even after the consumer half is dropped.
    pub fn push(&self, sample: GazeSample) -> PushOutcome {
        let mut item = sample;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return if evicted == 0 {
                        PushOutcome::Stored
                    } else {
                        PushOutcome::DroppedOldest(evicted)
                    };
                }
                // Only `Full` is possible while `evict` is alive
                Err(err) => {
                    item = err.into_inner();
                    // The consumer may drain concurrently; then just retry
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                        self.record_drop();
                    }
                }
            }
        }
    }

    fn record_drop(&self) {
        if self.shared.recording.load(Ordering::Acquire) {
            let total = self.shared.dropped_recording.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                "Sample dropped while recording (queue full at {}, {} lost)",
                self.shared.capacity, total
            );
        } else {
            let total = self.shared.dropped_display.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("Queue full, dropped oldest sample ({} total)", total);
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Consumer half; never blocks
pub struct SampleReceiver {
    rx: Receiver<GazeSample>,
    shared: Arc<QueueShared>,
}

impl SampleReceiver {
    /// Every sample available right now, oldest first (possibly none)
    pub fn drain_available(&self) -> Vec<GazeSample> {
        let mut samples = Vec::with_capacity(self.rx.len());
        self.drain_into(&mut samples);
        samples
    }

    /// Append every available sample to `out`; returns how many were added
    pub fn drain_into(&self, out: &mut Vec<GazeSample>) -> usize {
        let before = out.len();
        loop {
            match self.rx.try_recv() {
                Ok(sample) => out.push(sample),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out.len() - before
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn set_mode(&self, mode: QueueMode) {
        self.shared
            .recording
            .store(mode == QueueMode::Recording, Ordering::Release);
    }

    pub fn mode(&self) -> QueueMode {
        if self.shared.recording.load(Ordering::Acquire) {
            QueueMode::Recording
        } else {
            QueueMode::Display
        }
    }

    pub fn dropped_display(&self) -> u64 {
        self.shared.dropped_display.load(Ordering::Relaxed)
    }

    pub fn dropped_recording(&self) -> u64 {
        self.shared.dropped_recording.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sample::GazePoint;
    use std::thread;
    use std::time::Duration;

    fn sample(n: u64) -> GazeSample {
        GazeSample::at(n as f64, GazePoint::new(0.5, 0.5)).with_counter(n)
    }

    #[test]
    fn test_empty_drain_is_not_an_error() {
        let (_tx, rx) = acquisition_queue(8);
        assert!(rx.drain_available().is_empty());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = acquisition_queue(8);
        for n in 0..5 {
            assert_eq!(tx.push(sample(n)), PushOutcome::Stored);
        }
        let counters: Vec<_> = rx.drain_available().iter().filter_map(|s| s.counter()).collect();
        assert_eq!(counters, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_drops_exactly_the_oldest() {
        let (tx, rx) = acquisition_queue(4);
        for n in 0..4 {
            tx.push(sample(n));
        }
        assert_eq!(tx.push(sample(4)), PushOutcome::DroppedOldest(1));
        assert_eq!(rx.len(), 4);

        let counters: Vec<_> = rx.drain_available().iter().filter_map(|s| s.counter()).collect();
        assert_eq!(counters, vec![1, 2, 3, 4]);
        assert_eq!(rx.dropped_display(), 1);
        assert_eq!(rx.dropped_recording(), 0);
    }

    #[test]
    fn test_display_mode_never_exceeds_capacity() {
        let (tx, rx) = acquisition_queue(1000);
        for n in 0..1500 {
            tx.push(sample(n));
            assert!(rx.len() <= 1000);
        }
        let drained = rx.drain_available();
        assert_eq!(drained.len(), 1000);
        assert_eq!(drained[0].counter(), Some(500));
        assert_eq!(rx.dropped_display(), 500);
    }

    #[test]
    fn test_recording_drops_are_counted_separately() {
        let (tx, rx) = acquisition_queue(2);
        rx.set_mode(QueueMode::Recording);
        assert_eq!(rx.mode(), QueueMode::Recording);
        for n in 0..3 {
            tx.push(sample(n));
        }
        assert_eq!(rx.dropped_recording(), 1);
        assert_eq!(rx.dropped_display(), 0);
    }

    #[test]
    fn test_recording_at_twice_drain_rate_loses_nothing() {
        // 10 s at 120 Hz producer, 60 Hz consumer tick
        let (tx, rx) = acquisition_queue(1024);
        rx.set_mode(QueueMode::Recording);

        let mut recorded = Vec::new();
        let mut next = 0u64;
        for _tick in 0..600 {
            for _ in 0..2 {
                assert_eq!(tx.push(sample(next)), PushOutcome::Stored);
                next += 1;
            }
            rx.drain_into(&mut recorded);
        }

        assert_eq!(recorded.len(), 1200);
        assert!(recorded
            .iter()
            .enumerate()
            .all(|(i, s)| s.counter() == Some(i as u64)));
        assert_eq!(rx.dropped_recording(), 0);
    }

    #[test]
    fn test_recording_under_contention_loses_nothing() {
        // 120 Hz producer with bursts of 600 against a 60 Hz consumer
        const CAPACITY: usize = 1024;
        const FRAMES: u64 = 240;
        const BURST: u64 = 600;

        let (tx, rx) = acquisition_queue(CAPACITY);
        rx.set_mode(QueueMode::Recording);
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut next = 0u64;
                for frame in 0..FRAMES {
                    let count = if frame % 60 == 30 { BURST } else { 1 };
                    for _ in 0..count {
                        tx.push(sample(next));
                        next += 1;
                    }
                    thread::sleep(Duration::from_micros(8_333));
                }
                done.store(true, Ordering::Release);
                next
            })
        };

        let mut recorded = Vec::new();
        let mut peak = 0;
        loop {
            let finished = done.load(Ordering::Acquire);
            peak = peak.max(rx.len());
            rx.drain_into(&mut recorded);
            if finished && rx.is_empty() {
                break;
            }
            thread::sleep(Duration::from_micros(16_667));
        }
        let pushed = producer.join().unwrap();

        assert_eq!(pushed, FRAMES - 4 + 4 * BURST);
        assert_eq!(recorded.len() as u64, pushed);
        assert!(recorded
            .iter()
            .enumerate()
            .all(|(i, s)| s.counter() == Some(i as u64)));
        assert_eq!(rx.dropped_recording(), 0);
        assert!(peak >= BURST as usize / 4, "bursts never built up a backlog");
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (tx, rx) = acquisition_queue(2);
        drop(rx);
        // The sender's own eviction receiver keeps the channel open
        assert_eq!(tx.push(sample(0)), PushOutcome::Stored);
    }
}
