//! Executor behavior against the map service: scheduler determinism,
//! exactly-once commands, deterministic session expiry.

mod support;

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use conclave::config::ExecutorConfig;
use conclave::protocol::{EntryPayload, LogEntry};
use conclave::server::{
    ApplyOutcome, SessionLifecycle, StateMachineExecutor, TimerTask,
};
use conclave::types::{LogIndex, Operation, OperationId, SequenceNumber, SessionId};

use support::map::{key_payload, map_executor, put_with_ttl_payload};

fn entry(index: u64, timestamp: u64, payload: EntryPayload) -> LogEntry {
    LogEntry::new(LogIndex::new(index), timestamp, payload)
}

fn open_session(executor: &mut StateMachineExecutor, index: u64, timestamp: u64) -> SessionId {
    match executor
        .apply(entry(
            index,
            timestamp,
            EntryPayload::OpenSession {
                client_id: "test".to_string(),
                timeout_ms: 5000,
            },
        ))
        .unwrap()
    {
        ApplyOutcome::SessionOpened { session_id, .. } => session_id,
        other => panic!("expected SessionOpened, got {other:?}"),
    }
}

fn command(index: u64, timestamp: u64, session: SessionId, seq: u64, name: &str, payload: Bytes) -> LogEntry {
    entry(
        index,
        timestamp,
        EntryPayload::Command {
            session_id: session,
            sequence: SequenceNumber::new(seq),
            operation: Operation::command(name, payload),
        },
    )
}

fn reply(outcome: ApplyOutcome) -> Bytes {
    match outcome {
        ApplyOutcome::Reply(bytes) => bytes,
        other => panic!("expected Reply, got {other:?}"),
    }
}

// ============================================================================
// Scheduled Expiry (TTL)
// ============================================================================

#[test]
fn test_put_with_ttl_expires_on_logical_time() {
    let (mut executor, service) = map_executor();
    let session = open_session(&mut executor, 1, 1000);

    executor
        .apply(command(
            2,
            1000,
            session,
            1,
            "put_with_ttl",
            put_with_ttl_payload("k", b"v", 100),
        ))
        .unwrap();
    assert!(service.borrow().entries.contains_key("k"));

    // One tick before the deadline: still present.
    executor.apply(entry(3, 1099, EntryPayload::Metadata)).unwrap();
    assert!(service.borrow().entries.contains_key("k"));

    // At the deadline the eviction fires before the entry's handler: a
    // command applied at 1100 already observes the key gone.
    let outcome = executor
        .apply(command(4, 1100, session, 2, "exists", key_payload("k")))
        .unwrap();
    assert_eq!(reply(outcome), Bytes::from_static(&[0]));
    assert!(!service.borrow().entries.contains_key("k"));
}

// ============================================================================
// Scheduler Ordering (fire-before-handler, deadline order, tie order)
// ============================================================================

#[test]
fn test_timers_fire_before_handler_in_deadline_order() {
    let events: Rc<RefCell<Vec<String>>> = Rc::default();
    let mut executor = StateMachineExecutor::new(ExecutorConfig::default());

    let log = events.clone();
    executor.register_timer("note", move |ctx, payload| {
        log.borrow_mut().push(format!(
            "timer:{}@{}",
            String::from_utf8_lossy(payload.as_ref()),
            ctx.now()
        ));
    });

    let log = events.clone();
    executor.register(OperationId::command("arm"), move |ctx, _commit| {
        ctx.schedule(50, TimerTask::new("note", Bytes::from_static(b"a")))?;
        ctx.schedule(50, TimerTask::new("note", Bytes::from_static(b"b")))?;
        ctx.schedule(100, TimerTask::new("note", Bytes::from_static(b"c")))?;
        log.borrow_mut().push("armed".to_string());
        Ok(Bytes::new())
    });

    let log = events.clone();
    executor.register(OperationId::command("mark"), move |ctx, _commit| {
        log.borrow_mut().push(format!("handler@{}", ctx.now()));
        Ok(Bytes::new())
    });

    let session = open_session(&mut executor, 1, 1000);
    executor
        .apply(command(2, 1000, session, 1, "arm", Bytes::new()))
        .unwrap();

    // Commit at 1060: both 1050 timers are due, in insertion order,
    // before the mark handler runs.
    executor
        .apply(command(3, 1060, session, 2, "mark", Bytes::new()))
        .unwrap();
    // Commit at 1100: the last timer fires, again before the handler.
    executor
        .apply(command(4, 1100, session, 3, "mark", Bytes::new()))
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            "armed".to_string(),
            "timer:a@1060".to_string(),
            "timer:b@1060".to_string(),
            "handler@1060".to_string(),
            "timer:c@1100".to_string(),
            "handler@1100".to_string(),
        ]
    );
}

#[test]
fn test_callback_scheduling_more_immediate_work_fires_same_commit() {
    let events: Rc<RefCell<Vec<String>>> = Rc::default();
    let mut executor = StateMachineExecutor::new(ExecutorConfig::default());

    let log = events.clone();
    executor.register_timer("chain", move |ctx, payload| {
        let depth = payload.as_ref()[0];
        log.borrow_mut().push(format!("chain:{depth}"));
        if depth > 0 {
            // Already due: must fire before the triggering commit's
            // handler.
            ctx.schedule(0, TimerTask::new("chain", Bytes::copy_from_slice(&[depth - 1])))
                .unwrap();
        }
    });
    let log = events.clone();
    executor.register(OperationId::command("go"), move |_ctx, _commit| {
        log.borrow_mut().push("handler".to_string());
        Ok(Bytes::new())
    });
    let log = events.clone();
    executor.register(OperationId::command("arm"), move |ctx, _commit| {
        ctx.schedule(10, TimerTask::new("chain", Bytes::copy_from_slice(&[2])))?;
        log.borrow_mut().push("armed".to_string());
        Ok(Bytes::new())
    });

    let session = open_session(&mut executor, 1, 1000);
    executor
        .apply(command(2, 1000, session, 1, "arm", Bytes::new()))
        .unwrap();
    executor
        .apply(command(3, 1010, session, 2, "go", Bytes::new()))
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec!["armed", "chain:2", "chain:1", "chain:0", "handler"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}

// ============================================================================
// Exactly-Once Commands
// ============================================================================

#[test]
fn test_retried_command_applies_once_with_identical_reply() {
    let (mut executor, service) = map_executor();
    let session = open_session(&mut executor, 1, 1000);

    let payload = support::map::put_payload("foo", b"Hello world!");
    let first = reply(
        executor
            .apply(command(2, 1001, session, 1, "put", payload.clone()))
            .unwrap(),
    );

    // Arbitrary retries of the same sequence replay the original bytes
    // and never touch state again.
    for index in 3..6u64 {
        let retried = reply(
            executor
                .apply(command(index, 1001 + index, session, 1, "put", payload.clone()))
                .unwrap(),
        );
        assert_eq!(retried, first);
    }
    assert_eq!(service.borrow().version, 1);
}

// ============================================================================
// Deterministic Session Expiration
// ============================================================================

#[test]
fn test_replicas_expire_the_same_session_at_the_same_entry() {
    let run_replica = || {
        let expired: Rc<RefCell<Vec<(SessionId, u64)>>> = Rc::default();
        let (mut executor, _service) = map_executor();
        let seen = expired.clone();
        executor.set_session_listener(move |ctx, event| {
            if let SessionLifecycle::Expired(id) = event {
                seen.borrow_mut().push((id, ctx.now()));
            }
        });

        // Session 1: 1s timeout. Session 2: long timeout.
        executor
            .apply(entry(
                1,
                1000,
                EntryPayload::OpenSession {
                    client_id: "short".to_string(),
                    timeout_ms: 1000,
                },
            ))
            .unwrap();
        executor
            .apply(entry(
                2,
                1000,
                EntryPayload::OpenSession {
                    client_id: "long".to_string(),
                    timeout_ms: 60_000,
                },
            ))
            .unwrap();

        // Just inside the window: nothing expires.
        executor.apply(entry(3, 2000, EntryPayload::Metadata)).unwrap();
        // Crossing the threshold expires exactly session 1.
        executor.apply(entry(4, 2001, EntryPayload::Metadata)).unwrap();
        (executor, expired)
    };

    let (left_executor, left) = run_replica();
    let (right_executor, right) = run_replica();

    assert_eq!(*left.borrow(), vec![(SessionId::new(1), 2001)]);
    assert_eq!(*left.borrow(), *right.borrow());
    assert_eq!(left_executor.sessions().len(), 1);
    assert_eq!(right_executor.sessions().len(), 1);
}

#[test]
fn test_keep_alive_extends_session_life() {
    let (mut executor, _service) = map_executor();
    executor
        .apply(entry(
            1,
            1000,
            EntryPayload::OpenSession {
                client_id: "c".to_string(),
                timeout_ms: 1000,
            },
        ))
        .unwrap();
    let session = SessionId::new(1);

    executor
        .apply(entry(
            2,
            1900,
            EntryPayload::KeepAlive {
                session_id: session,
                command_sequence: SequenceNumber::ZERO,
                event_index: conclave::types::EventSequence::new(1),
            },
        ))
        .unwrap();

    // Without the keep-alive this entry (2001 > 1000 + 1000) would have
    // expired the session; the refreshed window keeps it alive.
    executor.apply(entry(3, 2001, EntryPayload::Metadata)).unwrap();
    assert!(executor.sessions().contains(session));

    executor.apply(entry(4, 2901, EntryPayload::Metadata)).unwrap();
    assert!(!executor.sessions().contains(session));
}
