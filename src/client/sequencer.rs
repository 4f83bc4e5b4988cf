//! Response resequencing.
//!
//! Commands go out in sequence order, but responses come back in
//! whatever order retries and connections produce. The sequencer is the
//! funnel that restores submission order on the way to the caller:
//!
//! - Command results are delivered in strictly increasing sequence
//!   order. A response for sequence `r` is buffered until every response
//!   below `r` has been delivered.
//! - Query results are delivered in submission order among themselves,
//!   and never before the command that preceded their submission (the
//!   "barrier") has been delivered.
//! - Error outcomes take the same path as successes: the slot completes
//!   exceptionally and ordering advances. Only a session-fatal error
//!   bypasses sequencing, failing every pending slot at once.
//!
//! Counters advance at delivery, not arrival: `command_response` and
//! `response_index` move only as slots are handed to the caller, so an
//! early out-of-order arrival is invisible until its turn comes.
//!
//! Callers that drop their future simply stop listening; the slot still
//! consumes its response so ordering never stalls on a cancelled
//! operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{LogIndex, SequenceNumber};

use super::state::SessionState;

/// Resolver half of a pending operation's future.
pub(crate) type Resolver = oneshot::Sender<Result<Bytes>>;

/// Identifies a registered query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueryId(u64);

/// A response waiting for its slot to reach the head of the line.
#[derive(Debug)]
struct Outcome {
    result: Result<Bytes>,
    /// Index observed in the response; `LogIndex::ZERO` for outcomes
    /// that never reached the cluster.
    index: LogIndex,
}

struct CommandSlot {
    resolver: Option<Resolver>,
    outcome: Option<Outcome>,
}

struct QuerySlot {
    id: QueryId,
    /// Command sequence that must be delivered before this query.
    barrier: SequenceNumber,
    resolver: Option<Resolver>,
    outcome: Option<Outcome>,
}

/// Reorders asynchronous responses back into submission order.
pub(crate) struct Sequencer {
    state: Arc<SessionState>,
    commands: BTreeMap<SequenceNumber, CommandSlot>,
    queries: VecDeque<QuerySlot>,
    next_query_id: u64,
}

impl Sequencer {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        Self {
            state,
            commands: BTreeMap::new(),
            queries: VecDeque::new(),
            next_query_id: 0,
        }
    }

    /// Register a command slot at submit time.
    pub(crate) fn register_command(&mut self, sequence: SequenceNumber, resolver: Resolver) {
        self.commands.insert(
            sequence,
            CommandSlot {
                resolver: Some(resolver),
                outcome: None,
            },
        );
    }

    /// Register a query slot at submit time. `barrier` is the last
    /// command sequence assigned before this query.
    pub(crate) fn register_query(
        &mut self,
        barrier: SequenceNumber,
        resolver: Resolver,
    ) -> QueryId {
        let id = QueryId(self.next_query_id);
        self.next_query_id += 1;
        self.queries.push_back(QuerySlot {
            id,
            barrier,
            resolver: Some(resolver),
            outcome: None,
        });
        id
    }

    /// Record the response for a command and deliver everything that is
    /// now head-of-line.
    ///
    /// Session-fatal errors must not come through here; use
    /// [`Sequencer::fail_all`].
    pub(crate) fn command_response(
        &mut self,
        sequence: SequenceNumber,
        result: Result<Bytes>,
        index: LogIndex,
    ) {
        match self.commands.get_mut(&sequence) {
            Some(slot) => slot.outcome = Some(Outcome { result, index }),
            None => {
                // Cleared by fail_all, or a duplicate arrival.
                debug!(sequence = sequence.value(), "Response for unknown command slot");
                return;
            }
        }
        self.drain();
    }

    /// Record the response for a query and deliver everything that is
    /// now head-of-line.
    pub(crate) fn query_response(&mut self, id: QueryId, result: Result<Bytes>, index: LogIndex) {
        match self.queries.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => slot.outcome = Some(Outcome { result, index }),
            None => {
                debug!("Response for unknown query slot");
                return;
            }
        }
        self.drain();
    }

    /// Fail every pending slot with `err` (session loss).
    pub(crate) fn fail_all(&mut self, err: Error) {
        for (_, slot) in std::mem::take(&mut self.commands) {
            if let Some(resolver) = slot.resolver {
                let _ = resolver.send(Err(err.clone()));
            }
        }
        for slot in std::mem::take(&mut self.queries) {
            if let Some(resolver) = slot.resolver {
                let _ = resolver.send(Err(err.clone()));
            }
        }
    }

    /// Number of operations still awaiting delivery.
    pub(crate) fn pending(&self) -> usize {
        self.commands.len() + self.queries.len()
    }

    fn drain(&mut self) {
        loop {
            self.drain_queries();

            let next = self.state.command_response().next();
            let ready = self
                .commands
                .get(&next)
                .is_some_and(|slot| slot.outcome.is_some());
            if !ready {
                break;
            }
            let slot = self.commands.remove(&next).expect("checked above");
            let outcome = slot.outcome.expect("checked above");
            self.state.set_command_response(next);
            deliver(slot.resolver, outcome, &self.state);
        }
        self.drain_queries();
    }

    fn drain_queries(&mut self) {
        loop {
            let deliverable = self.queries.front().is_some_and(|slot| {
                slot.outcome.is_some() && slot.barrier <= self.state.command_response()
            });
            if !deliverable {
                break;
            }
            let slot = self.queries.pop_front().expect("checked above");
            let outcome = slot.outcome.expect("checked above");
            deliver(slot.resolver, outcome, &self.state);
        }
    }
}

fn deliver(resolver: Option<Resolver>, outcome: Outcome, state: &Arc<SessionState>) {
    state.set_response_index(outcome.index);
    if let Some(resolver) = resolver {
        // A closed receiver is a cancelled operation; the response is
        // consumed regardless so ordering advances.
        let _ = resolver.send(outcome.result);
    }
}
