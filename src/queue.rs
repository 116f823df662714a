//! FIFO output queue with atomic statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::QueueEntry;

/// A snapshot of an [`OutputQueue`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub queue_size: usize,
    pub bytes_queued: usize,
}

/// Backing counters for an `OutputQueue`, kept separate from the `VecDeque`
/// so they can be read concurrently (e.g. from [`crate::handles::IoOutput::stats`])
/// without touching the queue itself, which is only ever mutated by the task
/// that owns the handler.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    queue_size: AtomicUsize,
    bytes_queued: AtomicUsize,
}

impl QueueCounters {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            queue_size: self.queue_size.load(Ordering::Relaxed),
            bytes_queued: self.bytes_queued.load(Ordering::Relaxed),
        }
    }
}

/// FIFO of pending sends plus the counters backing [`QueueStats`].
///
/// Mutated only from the task that owns the I/O handler; `stats()` is the
/// one operation that is safe to call from any thread, because it reads only
/// the atomic counters.
#[derive(Debug)]
pub struct OutputQueue {
    entries: VecDeque<QueueEntry>,
    counters: Arc<QueueCounters>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            counters: QueueCounters::new(),
        }
    }

    /// Build a queue backed by an already-shared counters handle, so an
    /// external arena slot can read the same counters this queue updates.
    pub(crate) fn with_counters(counters: Arc<QueueCounters>) -> Self {
        Self {
            entries: VecDeque::new(),
            counters,
        }
    }

    pub(crate) fn counters(&self) -> Arc<QueueCounters> {
        Arc::clone(&self.counters)
    }

    /// Append `entry` at the tail. Never fails.
    pub fn push(&mut self, entry: QueueEntry) {
        self.counters.bytes_queued.fetch_add(entry.len(), Ordering::Relaxed);
        self.counters.queue_size.fetch_add(1, Ordering::Relaxed);
        self.entries.push_back(entry);
    }

    /// Remove and return the head entry, if any.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front()?;
        self.counters.bytes_queued.fetch_sub(entry.len(), Ordering::Relaxed);
        self.counters.queue_size.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Current counters. Safe to call concurrently from any thread.
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Sums stats across a collection of queues' counters, for applications
/// monitoring aggregate backpressure across many `IoOutput` handles.
pub fn sum_stats<I: IntoIterator<Item = QueueStats>>(stats: I) -> QueueStats {
    stats.into_iter().fold(QueueStats::default(), |mut acc, s| {
        acc.queue_size += s.queue_size;
        acc.bytes_queued += s.bytes_queued;
        acc
    })
}
