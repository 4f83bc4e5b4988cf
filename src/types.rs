//! Type-safe wrappers for session and log primitives.
//!
//! These newtypes prevent mixing up the several `u64` counters that flow
//! through the runtime: log indexes, session ids, per-session sequence
//! numbers, and event sequence numbers all have the same representation
//! but very different meanings.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A position in the replicated log.
///
/// Indexes are gap-free and strictly increasing; the first real entry is
/// at index 1. `LogIndex::ZERO` precedes every entry and is used as the
/// starting point for "highest index observed" counters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogIndex(pub u64);

impl LogIndex {
    /// The index before the first log entry.
    pub const ZERO: Self = LogIndex(0);

    /// Create a new index from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        LogIndex(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next index in the log.
    #[inline]
    pub const fn next(self) -> Self {
        LogIndex(self.0 + 1)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        LogIndex(value)
    }
}

impl From<LogIndex> for u64 {
    fn from(index: LogIndex) -> Self {
        index.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session identifier.
///
/// A session id is the log index of the `OpenSession` entry that created
/// the session, which makes ids unique and monotone across the cluster
/// without any extra allocation state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new session id from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        SessionId(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The log index at which this session was opened.
    #[inline]
    pub const fn index(self) -> LogIndex {
        LogIndex(self.0)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        SessionId(value)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-session command sequence number.
///
/// Assigned by the client at submit time, strictly increasing starting at
/// 1. The server applies commands in sequence order and dedupes retries on
/// `(session, sequence)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence before the first command on a session.
    pub const ZERO: Self = SequenceNumber(0);

    /// Create a new sequence number from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        SequenceNumber(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next sequence number.
    #[inline]
    pub const fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        SequenceNumber(value)
    }
}

impl From<SequenceNumber> for u64 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-session event sequence number.
///
/// Outbound session events carry a strictly increasing sequence; the
/// client acknowledges consumption through keep-alives, letting the server
/// drop buffered events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EventSequence(pub u64);

impl EventSequence {
    /// Create a new event sequence from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        EventSequence(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next event sequence.
    #[inline]
    pub const fn next(self) -> Self {
        EventSequence(self.0 + 1)
    }
}

impl From<u64> for EventSequence {
    fn from(value: u64) -> Self {
        EventSequence(value)
    }
}

impl From<EventSequence> for u64 {
    fn from(seq: EventSequence) -> Self {
        seq.0
    }
}

impl fmt::Display for EventSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether an operation mutates state or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Written to the log, applied on every replica, deduped per session.
    Command,
    /// Read-only; not replicated, never advances logical time.
    Query,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Command => write!(f, "command"),
            OperationKind::Query => write!(f, "query"),
        }
    }
}

/// Identifies a registered operation handler.
///
/// An operation id is an opaque tag paired with its [`OperationKind`].
/// Handlers are registered against ids; the id name is what travels on
/// the wire.
///
/// ```
/// use conclave::types::OperationId;
///
/// let put = OperationId::command("put");
/// let get = OperationId::query("get");
/// assert_ne!(put, get);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    name: String,
    kind: OperationKind,
}

impl OperationId {
    /// Create a command operation id.
    pub fn command(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Command,
        }
    }

    /// Create a query operation id.
    pub fn query(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Query,
        }
    }

    /// The operation name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operation kind.
    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// An operation to submit: a handler tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// The registered handler this operation targets.
    pub id: OperationId,
    /// Opaque payload, decoded by the handler.
    pub payload: Bytes,
}

impl Operation {
    /// Create a new operation.
    pub fn new(id: OperationId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// A command operation with the given name and payload.
    pub fn command(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(OperationId::command(name), payload)
    }

    /// A query operation with the given name and payload.
    pub fn query(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(OperationId::query(name), payload)
    }
}
