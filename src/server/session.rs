//! Server-side sessions and the session registry.
//!
//! A [`ServerSession`] is the per-client state a replica keeps: sequence
//! bookkeeping for command dedup, the reply cache that makes retries
//! idempotent, parked out-of-order commands, buffered outbound events,
//! and the liveness timestamp expiry decisions are made from.
//!
//! All mutation happens on the executor thread, through applied commits.
//! Expiry in particular is driven by commit timestamps — never by local
//! wall-clock — so every replica reaches the identical decision.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ErrorCode;
use crate::types::{EventSequence, LogIndex, Operation, SequenceNumber, SessionId};

/// A reply retained for command dedup.
///
/// Retries of an already-applied sequence return these exact bytes (or
/// the exact error), never a re-execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReply {
    /// Index at which the command was originally applied.
    pub index: LogIndex,
    /// The original outcome: result bytes, or a reply-level error.
    pub result: Result<Bytes, (ErrorCode, String)>,
}

/// An outbound session event awaiting client acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub sequence: EventSequence,
    pub payload: Bytes,
}

/// A command that arrived with a sequence gap, held until the gap fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedCommand {
    pub index: LogIndex,
    pub timestamp: u64,
    pub operation: Operation,
}

/// Per-client state on the server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSession {
    id: SessionId,
    client_id: String,
    timeout_ms: u64,
    /// Highest command sequence applied to the state machine.
    last_applied_sequence: SequenceNumber,
    /// Logical time of the last liveness signal (open or keep-alive).
    last_keep_alive: u64,
    /// Last event sequence assigned on this session.
    last_event_sequence: EventSequence,
    /// Replies cached for dedup, keyed by command sequence.
    reply_cache: BTreeMap<SequenceNumber, CachedReply>,
    /// Out-of-order commands parked until their predecessors apply.
    parked: BTreeMap<SequenceNumber, ParkedCommand>,
    /// Events published but not yet acknowledged.
    pending_events: VecDeque<SessionEvent>,
}

impl ServerSession {
    fn new(id: SessionId, client_id: String, timeout_ms: u64, now: u64) -> Self {
        Self {
            id,
            client_id,
            timeout_ms,
            last_applied_sequence: SequenceNumber::ZERO,
            last_keep_alive: now,
            last_event_sequence: EventSequence::new(0),
            reply_cache: BTreeMap::new(),
            parked: BTreeMap::new(),
            pending_events: VecDeque::new(),
        }
    }

    /// The session id.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Client identity reported at open, for diagnostics.
    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Granted session timeout in milliseconds.
    #[inline]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Highest command sequence applied on this session.
    #[inline]
    pub fn last_applied_sequence(&self) -> SequenceNumber {
        self.last_applied_sequence
    }

    /// Logical time of the last liveness signal.
    #[inline]
    pub fn last_keep_alive(&self) -> u64 {
        self.last_keep_alive
    }

    /// Whether this session has missed its keep-alive window at logical
    /// time `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.last_keep_alive + self.timeout_ms < now
    }

    /// Record that the command at `sequence` was applied, caching its
    /// reply for retries.
    pub(crate) fn record_applied(&mut self, sequence: SequenceNumber, reply: CachedReply) {
        debug_assert_eq!(sequence, self.last_applied_sequence.next());
        self.last_applied_sequence = sequence;
        self.reply_cache.insert(sequence, reply);
    }

    /// The cached reply for an already-applied sequence, if still held.
    pub(crate) fn cached_reply(&self, sequence: SequenceNumber) -> Option<&CachedReply> {
        self.reply_cache.get(&sequence)
    }

    /// Park a command that arrived ahead of its predecessors.
    pub(crate) fn park(&mut self, sequence: SequenceNumber, command: ParkedCommand) {
        debug!(
            session_id = %self.id,
            sequence = sequence.value(),
            expected = self.last_applied_sequence.next().value(),
            "Parking out-of-order command"
        );
        self.parked.insert(sequence, command);
    }

    /// Remove and return the parked command that is now next in line.
    pub(crate) fn take_next_parked(&mut self) -> Option<(SequenceNumber, ParkedCommand)> {
        let next = self.last_applied_sequence.next();
        self.parked.remove(&next).map(|cmd| (next, cmd))
    }

    /// Publish an event on this session, assigning the next event
    /// sequence. The event stays buffered until acknowledged.
    pub fn publish(&mut self, payload: Bytes) -> EventSequence {
        let sequence = self.last_event_sequence.next();
        self.last_event_sequence = sequence;
        self.pending_events.push_back(SessionEvent { sequence, payload });
        sequence
    }

    /// Events published but not yet acknowledged, oldest first.
    pub fn pending_events(&self) -> impl Iterator<Item = &SessionEvent> {
        self.pending_events.iter()
    }

    /// Apply the acknowledgements carried by a keep-alive: drop events up
    /// to `event_index` and cached replies up to `command_sequence`.
    fn acknowledge(&mut self, command_sequence: SequenceNumber, event_index: EventSequence) {
        while self
            .pending_events
            .front()
            .is_some_and(|e| e.sequence <= event_index)
        {
            self.pending_events.pop_front();
        }
        // split_off keeps the half above the ack point.
        self.reply_cache = self.reply_cache.split_off(&command_sequence.next());
    }

    #[cfg(test)]
    pub(crate) fn reply_cache_len(&self) -> usize {
        self.reply_cache.len()
    }
}

/// Owns every server session; opens, keeps alive, expires, closes.
///
/// The registry is one of the three snapshot sections, so everything in
/// it (including parked commands and buffered events) survives log
/// compaction.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, ServerSession>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session. The id is the index of the `OpenSession` entry
    /// that is being applied.
    pub fn open_session(
        &mut self,
        id: SessionId,
        client_id: String,
        timeout_ms: u64,
        now: u64,
    ) -> &mut ServerSession {
        info!(session_id = %id, client_id = %client_id, timeout_ms, "Opening session");
        self.sessions
            .entry(id)
            .or_insert_with(|| ServerSession::new(id, client_id, timeout_ms, now))
    }

    /// Refresh a session's liveness and apply its acknowledgements.
    /// Returns `false` when the session is unknown.
    pub fn keep_alive(
        &mut self,
        id: SessionId,
        command_sequence: SequenceNumber,
        event_index: EventSequence,
        now: u64,
    ) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.last_keep_alive = now;
                session.acknowledge(command_sequence, event_index);
                true
            }
            None => false,
        }
    }

    /// Close a session. Returns `false` when the session was unknown.
    pub fn close_session(&mut self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            info!(session_id = %id, "Closed session");
        }
        removed
    }

    /// Expire every session whose keep-alive window lapsed at logical
    /// time `now`, returning the expired ids in order.
    ///
    /// `now` comes from a commit timestamp, so replicas applying the
    /// same log expire the same sessions at the same entry.
    pub fn expire_sessions(&mut self, now: u64) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id())
            .collect();
        for id in &expired {
            let session = self.sessions.remove(id);
            if let Some(session) = session {
                info!(
                    session_id = %id,
                    last_keep_alive = session.last_keep_alive,
                    timeout_ms = session.timeout_ms,
                    now,
                    "Expired session"
                );
            }
        }
        expired
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&ServerSession> {
        self.sessions.get(&id)
    }

    /// Look up a session mutably.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ServerSession> {
        self.sessions.get_mut(&id)
    }

    /// Whether a session exists.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate live sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerSession> {
        self.sessions.values()
    }
}
