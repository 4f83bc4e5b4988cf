//! Dedicated apply-loop thread for the executor.
//!
//! The executor is strictly single-threaded, so a replica runs it on its
//! own thread and feeds it through a channel: the surrounding engine
//! sends committed entries (and snapshot requests) from async context,
//! the loop applies them in order and replies through oneshots. Results
//! of parked commands that apply later are forwarded on an optional
//! completions channel.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::LogEntry;
use crate::types::{Operation, SessionId};

use super::executor::{ApplyOutcome, CompletedCommand, StateMachineExecutor};
use super::snapshot::{SnapshotReader, SnapshotWriter};

enum DriverRequest {
    Apply {
        entry: LogEntry,
        reply: oneshot::Sender<Result<ApplyOutcome>>,
    },
    Query {
        session_id: SessionId,
        operation: Operation,
        reply: oneshot::Sender<ApplyOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Bytes>>,
    },
    Install {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to an executor running on its own thread.
///
/// Cheap to clone; the thread exits when every handle is dropped and the
/// queue drains.
#[derive(Clone)]
pub struct ExecutorDriver {
    tx: mpsc::Sender<DriverRequest>,
}

impl ExecutorDriver {
    /// Spawn the apply loop. The factory runs on the new thread, so the
    /// executor (and the handler closures it owns) need not be `Send`.
    pub fn spawn<F>(factory: F) -> Self
    where
        F: FnOnce() -> StateMachineExecutor + Send + 'static,
    {
        Self::spawn_inner(factory, None)
    }

    /// Like [`ExecutorDriver::spawn`], additionally forwarding results
    /// of parked commands as they apply.
    pub fn spawn_with_completions<F>(
        factory: F,
        completions: mpsc::UnboundedSender<CompletedCommand>,
    ) -> Self
    where
        F: FnOnce() -> StateMachineExecutor + Send + 'static,
    {
        Self::spawn_inner(factory, Some(completions))
    }

    fn spawn_inner<F>(
        factory: F,
        completions: Option<mpsc::UnboundedSender<CompletedCommand>>,
    ) -> Self
    where
        F: FnOnce() -> StateMachineExecutor + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1024);
        std::thread::Builder::new()
            .name("executor".to_string())
            .spawn(move || {
                let executor = factory();
                apply_loop(executor, rx, completions);
            })
            .expect("failed to spawn executor thread");
        Self { tx }
    }

    /// Apply one committed entry, in commit order.
    pub async fn apply(&self, entry: LogEntry) -> Result<ApplyOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverRequest::Apply { entry, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Evaluate a query against current state.
    pub async fn query(&self, session_id: SessionId, operation: Operation) -> Result<ApplyOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverRequest::Query {
            session_id,
            operation,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Serialize the executor state into a snapshot stream.
    pub async fn snapshot(&self) -> Result<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Install a snapshot stream, replacing executor state.
    pub async fn install(&self, data: Bytes) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverRequest::Install { data, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    async fn send(&self, request: DriverRequest) -> Result<()> {
        self.tx.send(request).await.map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::ReplicaHalted("executor thread stopped".to_string())
}

fn apply_loop(
    mut executor: StateMachineExecutor,
    mut rx: mpsc::Receiver<DriverRequest>,
    completions: Option<mpsc::UnboundedSender<CompletedCommand>>,
) {
    info!("Executor apply loop started");
    while let Some(request) = rx.blocking_recv() {
        match request {
            DriverRequest::Apply { entry, reply } => {
                let index = entry.index;
                let outcome = executor.apply(entry);
                for completed in executor.take_completions() {
                    if let Some(tx) = &completions {
                        if tx.send(completed).is_err() {
                            warn!(index = %index, "Completion receiver dropped");
                        }
                    }
                }
                // A dropped reply means the caller stopped waiting; the
                // entry is applied either way.
                let _ = reply.send(outcome);
            }
            DriverRequest::Query {
                session_id,
                operation,
                reply,
            } => {
                let _ = reply.send(executor.query(session_id, operation));
            }
            DriverRequest::Snapshot { reply } => {
                let mut writer = SnapshotWriter::new();
                let result = executor.snapshot(&mut writer).map(|()| writer.finish());
                let _ = reply.send(result);
            }
            DriverRequest::Install { data, reply } => {
                let mut reader = SnapshotReader::new(data);
                let _ = reply.send(executor.install(&mut reader));
            }
        }
    }
    debug!("Executor apply loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::protocol::EntryPayload;
    use crate::types::{LogIndex, OperationId};

    fn spawn_echo() -> ExecutorDriver {
        ExecutorDriver::spawn(|| {
            let mut executor = StateMachineExecutor::new(ExecutorConfig::default());
            executor.register(OperationId::command("echo"), |_ctx, commit| {
                Ok(commit.payload().clone())
            });
            executor
        })
    }

    #[tokio::test]
    async fn test_driver_applies_in_order() {
        let driver = spawn_echo();

        let outcome = driver
            .apply(LogEntry::new(
                LogIndex::new(1),
                1000,
                EntryPayload::OpenSession {
                    client_id: "c".to_string(),
                    timeout_ms: 5000,
                },
            ))
            .await
            .unwrap();
        let session = match outcome {
            ApplyOutcome::SessionOpened { session_id, .. } => session_id,
            other => panic!("unexpected outcome {other:?}"),
        };

        let outcome = driver
            .apply(LogEntry::new(
                LogIndex::new(2),
                1001,
                EntryPayload::Command {
                    session_id: session,
                    sequence: crate::types::SequenceNumber::new(1),
                    operation: Operation::command("echo", Bytes::from_static(b"hi")),
                },
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Reply(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn test_driver_snapshot_round_trip() {
        let driver = spawn_echo();
        driver
            .apply(LogEntry::new(
                LogIndex::new(1),
                1000,
                EntryPayload::OpenSession {
                    client_id: "c".to_string(),
                    timeout_ms: 5000,
                },
            ))
            .await
            .unwrap();

        let snapshot = driver.snapshot().await.unwrap();
        assert!(!snapshot.is_empty());

        let fresh = spawn_echo();
        fresh.install(snapshot).await.unwrap();
        let outcome = fresh
            .apply(LogEntry::new(
                LogIndex::new(2),
                1001,
                EntryPayload::Metadata,
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Ignored);
    }
}
