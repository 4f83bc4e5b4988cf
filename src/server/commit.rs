//! The commit record handed to operation handlers.
//!
//! A [`Commit`] is the immutable view of one applied log entry: its
//! index, owning session, logged wall-clock time, operation id, and a
//! decoded value. Handlers may retain commits; a retained commit pins its
//! log index against compaction until it is closed (or dropped).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::types::{LogIndex, OperationId, SessionId};

/// Shared ledger of log indexes pinned by retained commits.
///
/// The executor hands every commit a pin; the lowest pinned index is the
/// compaction floor the surrounding engine must respect.
#[derive(Debug, Clone, Default)]
pub(crate) struct RetainedIndexes {
    pinned: Arc<Mutex<BTreeMap<u64, usize>>>,
}

impl RetainedIndexes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pin(&self, index: LogIndex) -> CommitPin {
        let mut pinned = self.pinned.lock().expect("retained index lock poisoned");
        *pinned.entry(index.value()).or_insert(0) += 1;
        CommitPin {
            ledger: self.clone(),
            index,
        }
    }

    fn release(&self, index: LogIndex) {
        let mut pinned = self.pinned.lock().expect("retained index lock poisoned");
        if let Some(count) = pinned.get_mut(&index.value()) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&index.value());
            }
        }
    }

    /// The lowest index still pinned by a retained commit, if any.
    pub(crate) fn lowest_pinned(&self) -> Option<LogIndex> {
        let pinned = self.pinned.lock().expect("retained index lock poisoned");
        pinned.keys().next().copied().map(LogIndex::new)
    }
}

/// Pin on a single log index; released on drop.
#[derive(Debug)]
pub struct CommitPin {
    ledger: RetainedIndexes,
    index: LogIndex,
}

impl Drop for CommitPin {
    fn drop(&mut self) {
        self.ledger.release(self.index);
    }
}

/// An applied log entry, as seen by a handler.
///
/// `Commit<Bytes>` is what handlers receive; [`Commit::map`] rebinds the
/// payload to a decoded value without touching the metadata or the pin.
/// Dropping (or explicitly [`Commit::close`]-ing) the commit releases its
/// index for log compaction. Holding a commit past its handler is allowed
/// and only costs compaction headroom.
#[derive(Debug)]
pub struct Commit<T> {
    index: LogIndex,
    session_id: SessionId,
    timestamp: u64,
    operation: OperationId,
    value: T,
    pin: Option<CommitPin>,
}

impl<T> Commit<T> {
    pub(crate) fn new(
        index: LogIndex,
        session_id: SessionId,
        timestamp: u64,
        operation: OperationId,
        value: T,
        pin: CommitPin,
    ) -> Self {
        Self {
            index,
            session_id,
            timestamp,
            operation,
            value,
            pin: Some(pin),
        }
    }

    /// Log index of this commit.
    #[inline]
    pub fn index(&self) -> LogIndex {
        self.index
    }

    /// The session this commit belongs to.
    #[inline]
    pub fn session(&self) -> SessionId {
        self.session_id
    }

    /// Logged wall-clock time of this commit, in milliseconds. Identical
    /// on every replica.
    #[inline]
    pub fn time(&self) -> u64 {
        self.timestamp
    }

    /// The operation that produced this commit.
    #[inline]
    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    /// The decoded value.
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Rebind the payload through a decoder, keeping metadata and pin.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Commit<U> {
        let Commit {
            index,
            session_id,
            timestamp,
            operation,
            value,
            pin,
        } = self;
        Commit {
            index,
            session_id,
            timestamp,
            operation,
            value: f(value),
            pin,
        }
    }

    /// Discard the payload, keeping metadata and pin.
    pub fn map_to_null(self) -> Commit<()> {
        self.map(|_| ())
    }

    /// Release the commit, unpinning its index for compaction.
    ///
    /// Dropping the commit has the same effect; `close` just makes the
    /// release explicit at the call site.
    pub fn close(mut self) {
        self.pin.take();
    }
}

impl Commit<Bytes> {
    /// The raw payload bytes.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(ledger: &RetainedIndexes, index: u64) -> Commit<Bytes> {
        Commit::new(
            LogIndex::new(index),
            SessionId::new(1),
            1000,
            OperationId::command("put"),
            Bytes::from_static(b"value"),
            ledger.pin(LogIndex::new(index)),
        )
    }

    #[test]
    fn test_commit_accessors() {
        let ledger = RetainedIndexes::new();
        let c = commit(&ledger, 5);
        assert_eq!(c.index(), LogIndex::new(5));
        assert_eq!(c.session(), SessionId::new(1));
        assert_eq!(c.time(), 1000);
        assert_eq!(c.operation().name(), "put");
        assert_eq!(c.payload().as_ref(), b"value");
    }

    #[test]
    fn test_map_keeps_metadata_and_pin() {
        let ledger = RetainedIndexes::new();
        let c = commit(&ledger, 5);
        let mapped = c.map(|bytes| bytes.len());
        assert_eq!(*mapped.value(), 5);
        assert_eq!(mapped.index(), LogIndex::new(5));
        // Still pinned through the mapped commit.
        assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(5)));
        drop(mapped);
        assert_eq!(ledger.lowest_pinned(), None);
    }

    #[test]
    fn test_map_to_null() {
        let ledger = RetainedIndexes::new();
        let c = commit(&ledger, 9).map_to_null();
        assert_eq!(*c.value(), ());
        assert_eq!(c.index(), LogIndex::new(9));
    }

    #[test]
    fn test_close_releases_pin() {
        let ledger = RetainedIndexes::new();
        let c = commit(&ledger, 3);
        assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(3)));
        c.close();
        assert_eq!(ledger.lowest_pinned(), None);
    }

    #[test]
    fn test_drop_releases_pin() {
        let ledger = RetainedIndexes::new();
        {
            let _c = commit(&ledger, 3);
            assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(3)));
        }
        assert_eq!(ledger.lowest_pinned(), None);
    }

    #[test]
    fn test_lowest_pinned_tracks_minimum() {
        let ledger = RetainedIndexes::new();
        let low = commit(&ledger, 2);
        let high = commit(&ledger, 10);
        assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(2)));
        drop(low);
        assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(10)));
        drop(high);
        assert_eq!(ledger.lowest_pinned(), None);
    }

    #[test]
    fn test_duplicate_pins_on_same_index() {
        let ledger = RetainedIndexes::new();
        let first = ledger.pin(LogIndex::new(4));
        let second = ledger.pin(LogIndex::new(4));
        drop(first);
        assert_eq!(ledger.lowest_pinned(), Some(LogIndex::new(4)));
        drop(second);
        assert_eq!(ledger.lowest_pinned(), None);
    }
}
