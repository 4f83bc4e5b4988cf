//! Request/response envelopes and replicated log entries.
//!
//! The client talks to the cluster through five request/response pairs
//! ([`CommandRequest`], [`QueryRequest`], [`KeepAliveRequest`],
//! [`OpenSessionRequest`], [`CloseSessionRequest`]); the surrounding Raft
//! engine delivers committed [`LogEntry`] values to the server-side
//! executor. Both sets are plain serde values — the concrete codec and
//! transport live outside this crate.
//!
//! Every response carries a [`ResponseStatus`] and the log index at which
//! the operation was applied (or, for queries, observed).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode};
use crate::types::{EventSequence, LogIndex, Operation, SequenceNumber, SessionId};

/// Query consistency level requested by the client.
///
/// The submitter marks the desired consistency; how the cluster realizes
/// it (leader read, read index, quorum round) is up to the surrounding
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Consistency {
    /// Reads observe a state at least as fresh as the session's own
    /// writes, possibly served by a follower.
    #[default]
    Sequential,
    /// Reads reflect all writes committed before the query was issued.
    Linearizable,
}

/// Outcome of a request: success or a typed wire error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The operation was applied/observed successfully.
    Ok,
    /// The operation failed with the given code; `message` carries detail
    /// for codes that have one (notably `ApplicationError`).
    Error {
        code: ErrorCode,
        message: Option<String>,
    },
}

impl ResponseStatus {
    /// Error status from a typed error.
    pub fn error(err: &Error) -> Self {
        ResponseStatus::Error {
            code: err.code(),
            message: Some(err.to_string()),
        }
    }

    /// Whether this is an OK status.
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }

    /// Convert an error status back into a typed [`Error`], scoping
    /// session-level codes to `session_id`. Returns `None` for OK.
    pub fn to_error(&self, session_id: SessionId) -> Option<Error> {
        match self {
            ResponseStatus::Ok => None,
            ResponseStatus::Error { code, message } => {
                Some(Error::from_wire(*code, message.as_deref(), session_id))
            }
        }
    }
}

/// Submit a command for replicated application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub session_id: SessionId,
    /// Client-assigned, strictly increasing per session. The server
    /// dedupes retries on `(session_id, sequence)`.
    pub sequence: SequenceNumber,
    pub operation: Operation,
}

/// Response to a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    /// Log index at which the command was applied.
    pub index: LogIndex,
    pub result: Bytes,
    /// Populated on `NoLeader` replies when the member knows who leads.
    #[serde(default)]
    pub leader_hint: Option<String>,
}

/// Evaluate a read-only query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session_id: SessionId,
    /// Highest index the session has observed; the serving member must
    /// not answer from an older state.
    pub last_index: LogIndex,
    /// Sequence of the last command submitted before this query — the
    /// "not-before" barrier for sequencing.
    pub last_sequence: SequenceNumber,
    pub operation: Operation,
    pub consistency: Consistency,
}

/// Response to a [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: ResponseStatus,
    /// Log index the query observed.
    pub index: LogIndex,
    pub result: Bytes,
    #[serde(default)]
    pub leader_hint: Option<String>,
}

/// Periodic liveness beacon, doubling as acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub session_id: SessionId,
    /// Highest command sequence whose response the client has delivered;
    /// lets the server truncate its dedup cache.
    pub command_sequence: SequenceNumber,
    /// Highest event sequence the client has consumed; lets the server
    /// drop buffered events.
    pub event_index: EventSequence,
}

/// Response to a [`KeepAliveRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub status: ResponseStatus,
    pub index: LogIndex,
    #[serde(default)]
    pub leader_hint: Option<String>,
}

/// Open a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    /// Caller-supplied identity, for diagnostics only.
    pub client_id: String,
    /// Requested session timeout. The cluster may clamp it; the response
    /// carries the granted value.
    pub timeout_ms: u64,
}

/// Response to an [`OpenSessionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub status: ResponseStatus,
    /// The new session's id (the index of its `OpenSession` entry).
    pub session_id: SessionId,
    /// Granted session timeout.
    pub timeout_ms: u64,
    pub index: LogIndex,
    #[serde(default)]
    pub leader_hint: Option<String>,
}

/// Close a session gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
}

/// Response to a [`CloseSessionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub status: ResponseStatus,
    pub index: LogIndex,
    #[serde(default)]
    pub leader_hint: Option<String>,
}

/// One committed entry delivered by the surrounding Raft engine.
///
/// The engine guarantees gap-free, strictly increasing `index` and
/// non-decreasing `timestamp` (leader wall-clock, replicated verbatim —
/// the runtime's logical time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    /// Milliseconds; monotone non-decreasing across successive entries.
    pub timestamp: u64,
    pub payload: EntryPayload,
}

impl LogEntry {
    /// Create a new entry.
    pub fn new(index: LogIndex, timestamp: u64, payload: EntryPayload) -> Self {
        Self {
            index,
            timestamp,
            payload,
        }
    }
}

/// The payload of a committed log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Create a session; the entry's index becomes the session id.
    OpenSession { client_id: String, timeout_ms: u64 },

    /// Refresh session liveness and acknowledge responses/events.
    KeepAlive {
        session_id: SessionId,
        command_sequence: SequenceNumber,
        event_index: EventSequence,
    },

    /// Close a session gracefully.
    CloseSession { session_id: SessionId },

    /// Apply a command to the state machine.
    Command {
        session_id: SessionId,
        sequence: SequenceNumber,
        operation: Operation,
    },

    /// Evaluate a query against current state. Logged only when the
    /// engine chooses to serialize reads; never advances logical time.
    Query {
        session_id: SessionId,
        operation: Operation,
        consistency: Consistency,
    },

    /// Engine-internal entry; applied as a no-op that still advances
    /// logical time (and therefore drives timers and expiry).
    Metadata,
}

impl EntryPayload {
    /// The session this entry belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            EntryPayload::OpenSession { .. } | EntryPayload::Metadata => None,
            EntryPayload::KeepAlive { session_id, .. }
            | EntryPayload::CloseSession { session_id }
            | EntryPayload::Command { session_id, .. }
            | EntryPayload::Query { session_id, .. } => Some(*session_id),
        }
    }
}
