//! Client-side session counters.
//!
//! One [`SessionState`] exists per open session, shared by the
//! submitter, sequencer, and keep-alive loop. All four counters are
//! monotone; regressions are ignored by construction (`fetch_max`), so
//! out-of-order response processing can never move a counter backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{EventSequence, LogIndex, SequenceNumber, SessionId};

/// Mutable per-session counters on the client.
///
/// A fresh session's `response_index` and `event_index` start at the
/// session id — the index of the `OpenSession` entry — since that is the
/// newest state the session has provably observed.
#[derive(Debug)]
pub struct SessionState {
    session_id: SessionId,
    timeout_ms: u64,
    /// Last command sequence assigned at submit.
    command_request: AtomicU64,
    /// Highest command sequence whose response was delivered to the
    /// caller.
    command_response: AtomicU64,
    /// Highest log index observed in any response.
    response_index: AtomicU64,
    /// Highest event sequence consumed.
    event_index: AtomicU64,
}

impl SessionState {
    /// State for a freshly opened session.
    pub fn new(session_id: SessionId, timeout_ms: u64) -> Self {
        Self {
            session_id,
            timeout_ms,
            command_request: AtomicU64::new(0),
            command_response: AtomicU64::new(0),
            response_index: AtomicU64::new(session_id.value()),
            event_index: AtomicU64::new(session_id.value()),
        }
    }

    /// The session id.
    #[inline]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Granted session timeout in milliseconds.
    #[inline]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Assign the next command sequence number.
    pub fn next_command_request(&self) -> SequenceNumber {
        SequenceNumber::new(self.command_request.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last command sequence assigned.
    pub fn command_request(&self) -> SequenceNumber {
        SequenceNumber::new(self.command_request.load(Ordering::SeqCst))
    }

    /// Highest command sequence delivered to the caller.
    pub fn command_response(&self) -> SequenceNumber {
        SequenceNumber::new(self.command_response.load(Ordering::SeqCst))
    }

    /// Record a delivered command response; regressions are ignored.
    pub fn set_command_response(&self, sequence: SequenceNumber) {
        self.command_response
            .fetch_max(sequence.value(), Ordering::SeqCst);
    }

    /// Highest log index observed in any response.
    pub fn response_index(&self) -> LogIndex {
        LogIndex::new(self.response_index.load(Ordering::SeqCst))
    }

    /// Record an observed response index; regressions are ignored.
    pub fn set_response_index(&self, index: LogIndex) {
        self.response_index
            .fetch_max(index.value(), Ordering::SeqCst);
    }

    /// Highest event sequence consumed.
    pub fn event_index(&self) -> EventSequence {
        EventSequence::new(self.event_index.load(Ordering::SeqCst))
    }

    /// Record a consumed event sequence; regressions are ignored.
    pub fn set_event_index(&self, sequence: EventSequence) {
        self.event_index
            .fetch_max(sequence.value(), Ordering::SeqCst);
    }
}
