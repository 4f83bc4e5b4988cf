//! The replicated state-machine executor.
//!
//! The executor is the single-threaded dispatcher at the heart of a
//! replica: committed log entries go in, handler outputs come out.
//! For every applied entry it advances logical time, fires due scheduled
//! work, drives deterministic session expiry, and routes the entry to a
//! registered operation handler. Commands are deduped per session so
//! client retries are applied exactly once; replies are cached and
//! replayed byte-for-byte.
//!
//! Handlers, timer callbacks, and session lifecycle listeners all run
//! serialized on the thread that calls [`StateMachineExecutor::apply`] —
//! the executor IS the thread context, and nothing else may touch the
//! registry, scheduler, or user state.
//!
//! # Failure semantics
//!
//! A handler error fails that one commit (the reply carries the error)
//! and nothing else. A fatal condition — out-of-order commit index,
//! snapshot install failure — halts the executor: every subsequent
//! `apply` returns [`Error::ReplicaHalted`] until a snapshot is
//! re-installed.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::ExecutorConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{EntryPayload, LogEntry};
use crate::types::{
    EventSequence, LogIndex, Operation, OperationId, OperationKind, SequenceNumber, SessionId,
};

use super::commit::{Commit, RetainedIndexes};
use super::scheduler::{LogicalScheduler, Scheduled, ScheduledEntry, TimerTask};
use super::session::{CachedReply, ParkedCommand, ServerSession, SessionRegistry};
use super::snapshot::{SnapshotReader, SnapshotWriter, Snapshottable};

/// Handler for a registered operation: `Commit → bytes`.
pub type OperationHandler =
    Box<dyn FnMut(&mut ServiceContext<'_>, Commit<Bytes>) -> Result<Bytes>>;

/// Handler for a registered timer tag.
pub type TimerHandler = Box<dyn FnMut(&mut ServiceContext<'_>, Bytes)>;

/// Listener for session lifecycle transitions.
pub type SessionListener = Box<dyn FnMut(&mut ServiceContext<'_>, SessionLifecycle)>;

/// A session lifecycle transition, delivered on the executor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// A session was opened.
    Opened(SessionId),
    /// A session was closed by the client.
    Closed(SessionId),
    /// A session missed its keep-alive window and was expired.
    Expired(SessionId),
}

/// Terminal status of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStatus {
    /// Applying entries normally.
    Running,
    /// A fatal condition occurred; only a snapshot install recovers.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextMode {
    Command,
    Query,
    Timer,
}

/// The outcome of applying one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// An `OpenSession` entry created a session.
    SessionOpened {
        session_id: SessionId,
        timeout_ms: u64,
    },
    /// A keep-alive refreshed a session.
    KeepAliveAck { session_id: SessionId },
    /// A `CloseSession` entry removed a session.
    SessionClosed { session_id: SessionId },
    /// A handler produced output.
    Reply(Bytes),
    /// The entry failed at reply level; the session (if any) lives on.
    Failed { code: ErrorCode, message: String },
    /// A command arrived ahead of its predecessors and was parked; its
    /// result surfaces later through [`StateMachineExecutor::take_completions`].
    Parked {
        session_id: SessionId,
        sequence: SequenceNumber,
    },
    /// A metadata entry; nothing to report.
    Ignored,
}

impl ApplyOutcome {
    /// Convert to the caller-facing result, scoping session-level error
    /// codes to `session_id`.
    pub fn into_reply(self, session_id: SessionId) -> Result<Bytes> {
        match self {
            ApplyOutcome::Reply(bytes) => Ok(bytes),
            ApplyOutcome::Failed { code, message } => {
                Err(Error::from_wire(code, Some(&message), session_id))
            }
            ApplyOutcome::SessionOpened { .. }
            | ApplyOutcome::KeepAliveAck { .. }
            | ApplyOutcome::SessionClosed { .. }
            | ApplyOutcome::Parked { .. }
            | ApplyOutcome::Ignored => Ok(Bytes::new()),
        }
    }
}

/// A parked command that has since applied; drained by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCommand {
    pub session_id: SessionId,
    pub sequence: SequenceNumber,
    /// Index of the log entry that carried the command.
    pub index: LogIndex,
    pub result: std::result::Result<Bytes, (ErrorCode, String)>,
}

/// Capability surface handed to handlers, timer callbacks, and session
/// listeners.
///
/// Everything reachable from here is executor-owned state, so mutations
/// are deterministic by construction.
pub struct ServiceContext<'a> {
    scheduler: &'a mut LogicalScheduler,
    sessions: &'a mut SessionRegistry,
    mode: ContextMode,
    index: LogIndex,
}

impl ServiceContext<'_> {
    /// Current logical time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Index of the entry being applied.
    #[inline]
    pub fn index(&self) -> LogIndex {
        self.index
    }

    /// Schedule a one-shot timer `delay_ms` of logical time from now.
    ///
    /// Permitted from command handlers and timer callbacks only; query
    /// handlers run on a single member and scheduling from them would
    /// diverge replicas.
    pub fn schedule(&mut self, delay_ms: u64, task: TimerTask) -> Result<Scheduled> {
        if self.mode == ContextMode::Query {
            return Err(Error::IllegalSchedule);
        }
        Ok(self.scheduler.schedule(delay_ms, task))
    }

    /// Schedule a recurring timer. Same restrictions as
    /// [`ServiceContext::schedule`].
    pub fn schedule_repeated(
        &mut self,
        delay_ms: u64,
        interval_ms: u64,
        task: TimerTask,
    ) -> Result<Scheduled> {
        if self.mode == ContextMode::Query {
            return Err(Error::IllegalSchedule);
        }
        Ok(self.scheduler.schedule_repeated(delay_ms, interval_ms, task))
    }

    /// Cancel a scheduled timer.
    pub fn cancel(&mut self, scheduled: Scheduled) {
        self.scheduler.cancel(scheduled);
    }

    /// Publish an event to a session. The event is buffered until the
    /// client acknowledges it through a keep-alive.
    pub fn publish(&mut self, session_id: SessionId, payload: Bytes) -> Result<EventSequence> {
        if self.mode == ContextMode::Query {
            return Err(Error::QueryFailure(
                "events cannot be published from a query handler".to_string(),
            ));
        }
        self.sessions
            .get_mut(session_id)
            .map(|s| s.publish(payload))
            .ok_or(Error::UnknownSession(session_id))
    }

    /// Look up a session view.
    pub fn session(&self, session_id: SessionId) -> Option<&ServerSession> {
        self.sessions.get(session_id)
    }
}

#[derive(Serialize)]
struct MetaSectionRef<'a> {
    last_applied: LogIndex,
    sessions: &'a SessionRegistry,
}

#[derive(Deserialize)]
struct MetaSection {
    last_applied: LogIndex,
    sessions: SessionRegistry,
}

#[derive(Serialize, Deserialize)]
struct SchedulerSection {
    now: u64,
    entries: Vec<ScheduledEntry>,
}

/// Single-threaded dispatcher applying committed log entries to a user
/// state machine.
pub struct StateMachineExecutor {
    config: ExecutorConfig,
    handlers: HashMap<String, (OperationKind, OperationHandler)>,
    timers: HashMap<String, TimerHandler>,
    session_listener: Option<SessionListener>,
    scheduler: LogicalScheduler,
    sessions: SessionRegistry,
    user_state: Option<Box<dyn Snapshottable>>,
    retained: RetainedIndexes,
    last_applied: LogIndex,
    status: ExecutorStatus,
    halt_reason: Option<String>,
    completions: Vec<CompletedCommand>,
}

impl StateMachineExecutor {
    /// Create an executor with the given configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            timers: HashMap::new(),
            session_listener: None,
            scheduler: LogicalScheduler::new(),
            sessions: SessionRegistry::new(),
            user_state: None,
            retained: RetainedIndexes::new(),
            last_applied: LogIndex::ZERO,
            status: ExecutorStatus::Running,
            halt_reason: None,
            completions: Vec::new(),
        }
    }

    /// Register an operation handler. Re-registering an id overwrites
    /// the prior handler; registration is static once entries start
    /// applying.
    pub fn register<F>(&mut self, id: OperationId, handler: F)
    where
        F: FnMut(&mut ServiceContext<'_>, Commit<Bytes>) -> Result<Bytes> + 'static,
    {
        self.handlers
            .insert(id.name().to_string(), (id.kind(), Box::new(handler)));
    }

    /// Register a timer handler. Scheduled tasks name their handler by
    /// tag; a snapshot can only be installed on an executor with the
    /// same tags registered.
    pub fn register_timer<F>(&mut self, tag: impl Into<String>, handler: F)
    where
        F: FnMut(&mut ServiceContext<'_>, Bytes) + 'static,
    {
        self.timers.insert(tag.into(), Box::new(handler));
    }

    /// Register the session lifecycle listener.
    pub fn set_session_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&mut ServiceContext<'_>, SessionLifecycle) + 'static,
    {
        self.session_listener = Some(Box::new(listener));
    }

    /// Register the user state machine's snapshot capability.
    pub fn set_snapshottable(&mut self, state: Box<dyn Snapshottable>) {
        self.user_state = Some(state);
    }

    /// Executor status.
    #[inline]
    pub fn status(&self) -> ExecutorStatus {
        self.status
    }

    /// Index of the last applied entry.
    #[inline]
    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Current logical time.
    #[inline]
    pub fn logical_now(&self) -> u64 {
        self.scheduler.now()
    }

    /// The live session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Lowest log index still pinned by a retained commit, if any.
    /// The surrounding engine must not compact at or above it.
    pub fn lowest_retained(&self) -> Option<LogIndex> {
        self.retained.lowest_pinned()
    }

    /// Whether enough entries have applied since `last_snapshot` to
    /// suggest taking a snapshot.
    pub fn should_snapshot(&self, last_snapshot: LogIndex) -> bool {
        self.last_applied.value() - last_snapshot.value() >= self.config.snapshot_threshold
    }

    /// Results of parked commands that applied since the last call.
    pub fn take_completions(&mut self) -> Vec<CompletedCommand> {
        std::mem::take(&mut self.completions)
    }

    /// Apply one committed entry.
    ///
    /// Fires due scheduled work and session expiry before dispatching
    /// the entry's handler. Reply-level failures come back as
    /// [`ApplyOutcome::Failed`]; an `Err` is reserved for replica-fatal
    /// conditions.
    pub fn apply(&mut self, entry: LogEntry) -> Result<ApplyOutcome> {
        if self.status == ExecutorStatus::Halted {
            return Err(Error::ReplicaHalted(
                self.halt_reason.clone().unwrap_or_default(),
            ));
        }
        if entry.index != self.last_applied.next() {
            return Err(self.halt(format!(
                "out-of-order commit index {} (expected {})",
                entry.index,
                self.last_applied.next()
            )));
        }
        self.last_applied = entry.index;

        let payload = match entry.payload {
            // Queries never advance logical time or fire timers.
            EntryPayload::Query {
                session_id,
                operation,
                ..
            } => {
                return Ok(self.dispatch_query(entry.index, session_id, operation));
            }
            payload => payload,
        };

        self.scheduler.advance(entry.timestamp);
        self.fire_due_timers(entry.index);
        self.expire_sessions(entry.index);

        let outcome = match payload {
            EntryPayload::OpenSession {
                client_id,
                timeout_ms,
            } => {
                let session_id = SessionId::new(entry.index.value());
                let granted = self.config.clamp_session_timeout(timeout_ms);
                let now = self.scheduler.now();
                self.sessions
                    .open_session(session_id, client_id, granted, now);
                self.notify_listener(entry.index, SessionLifecycle::Opened(session_id));
                ApplyOutcome::SessionOpened {
                    session_id,
                    timeout_ms: granted,
                }
            }

            EntryPayload::KeepAlive {
                session_id,
                command_sequence,
                event_index,
            } => {
                let now = self.scheduler.now();
                if self
                    .sessions
                    .keep_alive(session_id, command_sequence, event_index, now)
                {
                    ApplyOutcome::KeepAliveAck { session_id }
                } else {
                    unknown_session(session_id)
                }
            }

            EntryPayload::CloseSession { session_id } => {
                if self.sessions.close_session(session_id) {
                    self.notify_listener(entry.index, SessionLifecycle::Closed(session_id));
                    ApplyOutcome::SessionClosed { session_id }
                } else {
                    unknown_session(session_id)
                }
            }

            EntryPayload::Command {
                session_id,
                sequence,
                operation,
            } => self.apply_command(entry.index, entry.timestamp, session_id, sequence, operation),

            EntryPayload::Metadata => ApplyOutcome::Ignored,

            EntryPayload::Query { .. } => unreachable!("queries are dispatched before timers"),
        };

        Ok(outcome)
    }

    /// Evaluate a query that was not written to the log (the common
    /// path). Never advances logical time.
    pub fn query(&mut self, session_id: SessionId, operation: Operation) -> ApplyOutcome {
        self.dispatch_query(self.last_applied, session_id, operation)
    }

    /// Serialize registry, scheduler, and user state, in that order.
    pub fn snapshot(&self, writer: &mut SnapshotWriter) -> Result<()> {
        writer.write_section(&MetaSectionRef {
            last_applied: self.last_applied,
            sessions: &self.sessions,
        })?;
        writer.write_section(&SchedulerSection {
            now: self.scheduler.now(),
            entries: self.scheduler.entries(),
        })?;
        match &self.user_state {
            Some(state) => state.snapshot(writer)?,
            None => writer.write_raw_section(&[]),
        }
        Ok(())
    }

    /// Replace executor state from a snapshot stream.
    ///
    /// Any failure here is replica-fatal: the executor halts and must be
    /// re-installed. A successful install clears a prior halt.
    pub fn install(&mut self, reader: &mut SnapshotReader) -> Result<()> {
        let meta: MetaSection = match reader.read_section() {
            Ok(meta) => meta,
            Err(e) => return Err(self.halt(format!("registry section: {e}"))),
        };
        let scheduler: SchedulerSection = match reader.read_section() {
            Ok(section) => section,
            Err(e) => return Err(self.halt(format!("scheduler section: {e}"))),
        };
        for entry in &scheduler.entries {
            if !self.timers.contains_key(&entry.task.tag) {
                return Err(self.halt(format!(
                    "snapshot references unregistered timer tag '{}'",
                    entry.task.tag
                )));
            }
        }

        match &mut self.user_state {
            Some(state) => {
                if let Err(e) = state.install(reader) {
                    return Err(self.halt(format!("user state install: {e}")));
                }
            }
            None => {
                if let Err(e) = reader.read_raw_section() {
                    return Err(self.halt(format!("user section: {e}")));
                }
            }
        }

        self.sessions = meta.sessions;
        self.last_applied = meta.last_applied;
        self.scheduler = LogicalScheduler::restore(scheduler.now, scheduler.entries);
        self.completions.clear();
        self.status = ExecutorStatus::Running;
        self.halt_reason = None;
        debug!(
            last_applied = %self.last_applied,
            sessions = self.sessions.len(),
            "Installed snapshot"
        );
        Ok(())
    }

    fn halt(&mut self, reason: String) -> Error {
        error!(reason = %reason, "Halting executor");
        self.status = ExecutorStatus::Halted;
        self.halt_reason = Some(reason.clone());
        Error::ReplicaHalted(reason)
    }

    /// Fire every scheduled entry due at current logical time, in
    /// deadline order. Entries scheduled by the callbacks themselves
    /// fire too when already due.
    fn fire_due_timers(&mut self, index: LogIndex) {
        while let Some(entry) = self.scheduler.pop_due() {
            match self.timers.get_mut(&entry.task.tag) {
                Some(handler) => {
                    let mut ctx = ServiceContext {
                        scheduler: &mut self.scheduler,
                        sessions: &mut self.sessions,
                        mode: ContextMode::Timer,
                        index,
                    };
                    handler(&mut ctx, entry.task.payload.clone());
                }
                None => {
                    warn!(tag = %entry.task.tag, "No handler for scheduled timer, dropping");
                }
            }
            if entry.interval.is_some() {
                self.scheduler.requeue(entry);
            }
        }
    }

    fn expire_sessions(&mut self, index: LogIndex) {
        let now = self.scheduler.now();
        for session_id in self.sessions.expire_sessions(now) {
            self.notify_listener(index, SessionLifecycle::Expired(session_id));
        }
    }

    fn notify_listener(&mut self, index: LogIndex, event: SessionLifecycle) {
        if let Some(listener) = &mut self.session_listener {
            let mut ctx = ServiceContext {
                scheduler: &mut self.scheduler,
                sessions: &mut self.sessions,
                mode: ContextMode::Command,
                index,
            };
            listener(&mut ctx, event);
        }
    }

    fn apply_command(
        &mut self,
        index: LogIndex,
        timestamp: u64,
        session_id: SessionId,
        sequence: SequenceNumber,
        operation: Operation,
    ) -> ApplyOutcome {
        let Some(session) = self.sessions.get(session_id) else {
            return unknown_session(session_id);
        };

        let expected = session.last_applied_sequence().next();
        if sequence < expected {
            // Retry of an applied command: replay the cached reply.
            return match session.cached_reply(sequence) {
                Some(reply) => cached_to_outcome(reply),
                None => ApplyOutcome::Failed {
                    code: ErrorCode::CommandFailure,
                    message: format!("reply for sequence {sequence} no longer cached"),
                },
            };
        }

        if sequence > expected {
            let session = self.sessions.get_mut(session_id).expect("session vanished");
            session.park(
                sequence,
                ParkedCommand {
                    index,
                    timestamp,
                    operation,
                },
            );
            return ApplyOutcome::Parked {
                session_id,
                sequence,
            };
        }

        let result = self.execute_command(index, timestamp, session_id, sequence, operation);
        let outcome = result_to_outcome(&result);

        // The gap at `sequence` may have released parked successors.
        loop {
            let Some(session) = self.sessions.get_mut(session_id) else {
                break;
            };
            let Some((next_sequence, parked)) = session.take_next_parked() else {
                break;
            };
            debug!(
                session_id = %session_id,
                sequence = next_sequence.value(),
                "Applying parked command"
            );
            let result = self.execute_command(
                parked.index,
                parked.timestamp,
                session_id,
                next_sequence,
                parked.operation,
            );
            self.completions.push(CompletedCommand {
                session_id,
                sequence: next_sequence,
                index: parked.index,
                result,
            });
        }

        outcome
    }

    /// Run a command through its handler and record the reply in the
    /// session's dedup cache.
    fn execute_command(
        &mut self,
        index: LogIndex,
        timestamp: u64,
        session_id: SessionId,
        sequence: SequenceNumber,
        operation: Operation,
    ) -> std::result::Result<Bytes, (ErrorCode, String)> {
        let result = match self.handlers.get_mut(operation.id.name()) {
            None => Err((
                ErrorCode::UnknownOperation,
                format!("no handler registered for '{}'", operation.id.name()),
            )),
            Some((OperationKind::Query, _)) => Err((
                ErrorCode::UnknownOperation,
                format!("'{}' is registered as a query", operation.id.name()),
            )),
            Some((OperationKind::Command, handler)) => {
                let commit = Commit::new(
                    index,
                    session_id,
                    timestamp,
                    operation.id.clone(),
                    operation.payload,
                    self.retained.pin(index),
                );
                let mut ctx = ServiceContext {
                    scheduler: &mut self.scheduler,
                    sessions: &mut self.sessions,
                    mode: ContextMode::Command,
                    index,
                };
                handler(&mut ctx, commit).map_err(|e| reply_error(&e))
            }
        };

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.record_applied(
                sequence,
                CachedReply {
                    index,
                    result: result.clone(),
                },
            );
        }
        result
    }

    fn dispatch_query(
        &mut self,
        index: LogIndex,
        session_id: SessionId,
        operation: Operation,
    ) -> ApplyOutcome {
        if !self.sessions.contains(session_id) {
            return unknown_session(session_id);
        }
        let result = match self.handlers.get_mut(operation.id.name()) {
            None => Err((
                ErrorCode::UnknownOperation,
                format!("no handler registered for '{}'", operation.id.name()),
            )),
            Some((OperationKind::Command, _)) => Err((
                ErrorCode::UnknownOperation,
                format!("'{}' is registered as a command", operation.id.name()),
            )),
            Some((OperationKind::Query, handler)) => {
                let commit = Commit::new(
                    index,
                    session_id,
                    self.scheduler.now(),
                    operation.id.clone(),
                    operation.payload,
                    self.retained.pin(index),
                );
                let mut ctx = ServiceContext {
                    scheduler: &mut self.scheduler,
                    sessions: &mut self.sessions,
                    mode: ContextMode::Query,
                    index,
                };
                handler(&mut ctx, commit).map_err(|e| query_reply_error(&e))
            }
        };
        match result {
            Ok(bytes) => ApplyOutcome::Reply(bytes),
            Err((code, message)) => ApplyOutcome::Failed { code, message },
        }
    }
}

fn unknown_session(session_id: SessionId) -> ApplyOutcome {
    ApplyOutcome::Failed {
        code: ErrorCode::UnknownSession,
        message: format!("unknown session {session_id}"),
    }
}

/// Map a handler error to its reply-level code; anything unclassified
/// becomes an application error for this commit only.
fn reply_error(err: &Error) -> (ErrorCode, String) {
    match err.code() {
        ErrorCode::Unknown => (ErrorCode::ApplicationError, err.to_string()),
        code => (code, err.to_string()),
    }
}

fn query_reply_error(err: &Error) -> (ErrorCode, String) {
    match err {
        Error::IllegalSchedule => (ErrorCode::QueryFailure, err.to_string()),
        _ => reply_error(err),
    }
}

fn cached_to_outcome(reply: &CachedReply) -> ApplyOutcome {
    match &reply.result {
        Ok(bytes) => ApplyOutcome::Reply(bytes.clone()),
        Err((code, message)) => ApplyOutcome::Failed {
            code: *code,
            message: message.clone(),
        },
    }
}

fn result_to_outcome(result: &std::result::Result<Bytes, (ErrorCode, String)>) -> ApplyOutcome {
    match result {
        Ok(bytes) => ApplyOutcome::Reply(bytes.clone()),
        Err((code, message)) => ApplyOutcome::Failed {
            code: *code,
            message: message.clone(),
        },
    }
}
