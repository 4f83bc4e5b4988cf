//! Deterministic logical-time scheduler.
//!
//! The scheduler never reads a clock. Logical time only advances when a
//! commit is applied, at which point every entry whose deadline has been
//! crossed fires — in deadline order, ties broken by insertion order —
//! before the commit's own handler runs. Because deadlines, firing order,
//! and the time source (logged commit timestamps) are all deterministic,
//! every replica runs the same callbacks at the same log positions.
//!
//! Scheduled work is a [`TimerTask`] descriptor (a registered timer tag
//! plus payload), not a closure, so the pending set serializes into
//! snapshots and survives restores bit-for-bit.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A unit of scheduled work: the tag of a registered timer handler and
/// the payload it will receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerTask {
    /// Tag of the timer handler registered on the executor.
    pub tag: String,
    /// Opaque payload handed to the handler when the task fires.
    pub payload: Bytes,
}

impl TimerTask {
    /// Create a new timer task.
    pub fn new(tag: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
        }
    }
}

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scheduled(pub(crate) u64);

/// One pending scheduler entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ScheduledEntry {
    /// Stable id, shared across firings of a recurring task.
    pub id: u64,
    /// Logical deadline in milliseconds.
    pub fire_at: u64,
    /// Insertion order, the tiebreak between equal deadlines.
    pub seq: u64,
    pub task: TimerTask,
    /// Reschedule period for recurring tasks.
    pub interval: Option<u64>,
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of timer tasks keyed by logical time.
#[derive(Debug, Default)]
pub struct LogicalScheduler {
    now: u64,
    next_seq: u64,
    next_id: u64,
    heap: BinaryHeap<Reverse<ScheduledEntry>>,
    cancelled: HashSet<u64>,
}

impl LogicalScheduler {
    /// Create an empty scheduler at logical time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance logical time to `timestamp` (monotone: regressions are
    /// ignored).
    pub(crate) fn advance(&mut self, timestamp: u64) {
        self.now = self.now.max(timestamp);
    }

    /// Schedule a one-shot task `delay_ms` past current logical time.
    pub fn schedule(&mut self, delay_ms: u64, task: TimerTask) -> Scheduled {
        self.push(self.now + delay_ms, task, None)
    }

    /// Schedule a recurring task: first firing after `delay_ms`, then
    /// every `interval_ms` of logical time.
    pub fn schedule_repeated(
        &mut self,
        delay_ms: u64,
        interval_ms: u64,
        task: TimerTask,
    ) -> Scheduled {
        self.push(self.now + delay_ms, task, Some(interval_ms))
    }

    fn push(&mut self, fire_at: u64, task: TimerTask, interval: Option<u64>) -> Scheduled {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledEntry {
            id,
            fire_at,
            seq,
            task,
            interval,
        }));
        Scheduled(id)
    }

    /// Cancel a scheduled task. Recurring tasks stop firing entirely.
    pub fn cancel(&mut self, scheduled: Scheduled) {
        self.cancelled.insert(scheduled.0);
    }

    /// Remove and return the next entry due at current logical time, in
    /// `(fire_at, insertion)` order. Cancelled entries are skipped.
    pub(crate) fn pop_due(&mut self) -> Option<ScheduledEntry> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.cancelled.contains(&entry.id) {
                let Reverse(entry) = self.heap.pop().expect("peeked entry vanished");
                self.cancelled.remove(&entry.id);
                continue;
            }
            if entry.fire_at > self.now {
                return None;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry vanished");
            return Some(entry);
        }
        None
    }

    /// Requeue a recurring entry for its next firing, keeping its id so
    /// an outstanding [`Scheduled`] handle still cancels it.
    pub(crate) fn requeue(&mut self, mut entry: ScheduledEntry) {
        let interval = entry
            .interval
            .expect("requeue called for a one-shot entry");
        entry.fire_at += interval.max(1);
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(entry));
    }

    /// Number of pending (non-cancelled) entries.
    pub fn len(&self) -> usize {
        self.heap
            .iter()
            .filter(|Reverse(e)| !self.cancelled.contains(&e.id))
            .count()
    }

    /// Whether no tasks are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in firing order, for snapshotting.
    pub(crate) fn entries(&self) -> Vec<ScheduledEntry> {
        let mut live: Vec<ScheduledEntry> = self
            .heap
            .iter()
            .filter(|Reverse(e)| !self.cancelled.contains(&e.id))
            .map(|Reverse(e)| e.clone())
            .collect();
        live.sort();
        live
    }

    /// Rebuild a scheduler from a snapshot.
    pub(crate) fn restore(now: u64, entries: Vec<ScheduledEntry>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        let next_id = entries.iter().map(|e| e.id + 1).max().unwrap_or(0);
        Self {
            now,
            next_seq,
            next_id,
            heap: entries.into_iter().map(Reverse).collect(),
            cancelled: HashSet::new(),
        }
    }
}
