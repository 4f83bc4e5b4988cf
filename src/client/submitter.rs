//! The client-side submit path.
//!
//! [`Submitter::submit`] assigns sequence numbers synchronously on the
//! calling context — so submission order IS sequence order, no matter how
//! the transport interleaves — registers a slot with the sequencer, and
//! dispatches the request on a background task. The returned
//! [`ResponseFuture`] resolves when the sequencer delivers the slot.
//!
//! Dispatch retries transport-level failures with the same sequence
//! number for as long as the session is alive (the server dedupes), and
//! rebinds the transport on `NoLeader` replies. A session-fatal reply
//! fails every pending operation at once and flips the session status to
//! `Expired`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use backon::Retryable;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{CommandRequest, Consistency, QueryRequest, ResponseStatus};
use crate::types::{LogIndex, Operation, OperationKind, SessionId};

use super::retry;
use super::sequencer::Sequencer;
use super::state::SessionState;
use super::transport::Transport;
use super::SessionStatus;

/// A pending operation's result.
///
/// Dropping the future cancels the caller's interest but not the
/// operation: the server may still apply it, and the sequencer consumes
/// the response to keep ordering moving.
pub struct ResponseFuture {
    inner: Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>,
}

impl ResponseFuture {
    fn new(
        rx: tokio::sync::oneshot::Receiver<Result<Bytes>>,
        timeout: Option<std::time::Duration>,
    ) -> Self {
        let wait = async move { rx.await.unwrap_or(Err(Error::ConnectionClosed)) };
        let inner: Pin<Box<dyn Future<Output = Result<Bytes>> + Send>> = match timeout {
            Some(limit) => Box::pin(async move {
                tokio::time::timeout(limit, wait)
                    .await
                    .unwrap_or(Err(Error::Timeout))
            }),
            None => Box::pin(wait),
        };
        Self { inner }
    }

    fn failed(err: Error) -> Self {
        Self {
            inner: Box::pin(async move { Err(err) }),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

pub(crate) struct SubmitterInner {
    transport: Arc<dyn Transport>,
    state: Arc<SessionState>,
    sequencer: Mutex<Sequencer>,
    status: watch::Sender<SessionStatus>,
    config: ClientConfig,
}

/// Client-side entry point for operations on one session.
#[derive(Clone)]
pub struct Submitter {
    inner: Arc<SubmitterInner>,
}

impl Submitter {
    /// Build a submitter over an open session.
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<SessionState>,
        config: ClientConfig,
    ) -> Self {
        let sequencer = Mutex::new(Sequencer::new(state.clone()));
        let (status, _) = watch::channel(SessionStatus::Open);
        Self {
            inner: Arc::new(SubmitterInner {
                transport,
                state,
                sequencer,
                status,
                config,
            }),
        }
    }

    /// The session this submitter operates on.
    pub fn session_id(&self) -> SessionId {
        self.inner.state.session_id()
    }

    /// The shared session counters.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.inner.state
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Watch session status transitions (the session listener surface).
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Operations submitted but not yet delivered.
    pub fn pending_operations(&self) -> usize {
        self.inner.sequencer.lock().expect("sequencer poisoned").pending()
    }

    /// Submit an operation, routed by its kind. Queries use the
    /// configured default consistency.
    pub fn submit(&self, operation: Operation) -> ResponseFuture {
        match operation.id.kind() {
            OperationKind::Command => self.submit_command(operation),
            OperationKind::Query => {
                self.submit_query(operation, self.inner.config.default_consistency)
            }
        }
    }

    /// Submit a query with an explicit consistency level.
    pub fn submit_query(&self, operation: Operation, consistency: Consistency) -> ResponseFuture {
        if operation.id.kind() == OperationKind::Command {
            return self.submit_command(operation);
        }
        if let Some(err) = self.terminal_error() {
            return ResponseFuture::failed(err);
        }

        let inner = self.inner.clone();
        let request = QueryRequest {
            session_id: inner.state.session_id(),
            last_index: inner.state.response_index(),
            last_sequence: inner.state.command_request(),
            operation,
            consistency,
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        let query_id = {
            let mut sequencer = inner.sequencer.lock().expect("sequencer poisoned");
            sequencer.register_query(request.last_sequence, tx)
        };

        let timeout = inner.config.operation_timeout;
        tokio::spawn(async move {
            let session_id = request.session_id;
            let result = {
                let transport = inner.transport.clone();
                let status = inner.status.subscribe();
                let request = request.clone();
                (move || {
                    let transport = transport.clone();
                    let request = request.clone();
                    async move {
                        let response = transport.query(request).await?;
                        if is_no_leader(&response.status) {
                            transport.rebind(response.leader_hint.clone()).await;
                            return Err(Error::NoLeader);
                        }
                        Ok(response)
                    }
                })
                .retry(retry::transport_policy())
                .when(move |e: &Error| e.is_retriable() && is_live(&status))
                .await
            };

            match result {
                Ok(response) => match response.status.to_error(session_id) {
                    None => inner
                        .sequencer
                        .lock()
                        .expect("sequencer poisoned")
                        .query_response(query_id, Ok(response.result), response.index),
                    Some(err) if err.is_session_fatal() => expire(&inner, err),
                    Some(err) => inner
                        .sequencer
                        .lock()
                        .expect("sequencer poisoned")
                        .query_response(query_id, Err(err), response.index),
                },
                Err(err) if err.is_session_fatal() => expire(&inner, err),
                Err(err) => inner
                    .sequencer
                    .lock()
                    .expect("sequencer poisoned")
                    .query_response(query_id, Err(err), LogIndex::ZERO),
            }
        });

        ResponseFuture::new(rx, timeout)
    }

    fn submit_command(&self, operation: Operation) -> ResponseFuture {
        if let Some(err) = self.terminal_error() {
            return ResponseFuture::failed(err);
        }

        let inner = self.inner.clone();
        // Sequence assignment is the synchronous step that pins
        // submission order.
        let sequence = inner.state.next_command_request();
        let request = CommandRequest {
            session_id: inner.state.session_id(),
            sequence,
            operation,
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        inner
            .sequencer
            .lock()
            .expect("sequencer poisoned")
            .register_command(sequence, tx);

        let timeout = inner.config.operation_timeout;
        tokio::spawn(async move {
            let session_id = request.session_id;
            debug!(session_id = %session_id, sequence = sequence.value(), "Dispatching command");
            let result = {
                let transport = inner.transport.clone();
                let status = inner.status.subscribe();
                let request = request.clone();
                (move || {
                    let transport = transport.clone();
                    let request = request.clone();
                    async move {
                        let response = transport.command(request).await?;
                        if is_no_leader(&response.status) {
                            transport.rebind(response.leader_hint.clone()).await;
                            return Err(Error::NoLeader);
                        }
                        Ok(response)
                    }
                })
                .retry(retry::transport_policy())
                .when(move |e: &Error| e.is_retriable() && is_live(&status))
                .await
            };

            match result {
                Ok(response) => match response.status.to_error(session_id) {
                    None => inner
                        .sequencer
                        .lock()
                        .expect("sequencer poisoned")
                        .command_response(sequence, Ok(response.result), response.index),
                    Some(err) if err.is_session_fatal() => expire(&inner, err),
                    Some(err) => inner
                        .sequencer
                        .lock()
                        .expect("sequencer poisoned")
                        .command_response(sequence, Err(err), response.index),
                },
                Err(err) if err.is_session_fatal() => expire(&inner, err),
                Err(err) => inner
                    .sequencer
                    .lock()
                    .expect("sequencer poisoned")
                    .command_response(sequence, Err(err), LogIndex::ZERO),
            }
        });

        ResponseFuture::new(rx, timeout)
    }

    /// Fail every pending operation and mark the session expired.
    /// Invoked on `UnknownSession` replies and keep-alive loss.
    pub(crate) fn expire_session(&self, err: Error) {
        expire(&self.inner, err);
    }

    /// Mark the session suspect (keep-alives failing, not yet expired).
    pub(crate) fn mark_suspended(&self) {
        self.inner.status.send_if_modified(|status| {
            if *status == SessionStatus::Open {
                *status = SessionStatus::Suspended;
                true
            } else {
                false
            }
        });
    }

    /// Mark the session healthy again after a successful keep-alive.
    pub(crate) fn mark_open(&self) {
        self.inner.status.send_if_modified(|status| {
            if *status == SessionStatus::Suspended {
                *status = SessionStatus::Open;
                true
            } else {
                false
            }
        });
    }

    /// Mark the session closed by the user; remaining operations fail.
    pub(crate) fn mark_closed(&self) {
        self.inner.status.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = SessionStatus::Closed;
                true
            }
        });
        let session_id = self.inner.state.session_id();
        self.inner
            .sequencer
            .lock()
            .expect("sequencer poisoned")
            .fail_all(Error::SessionExpired(session_id));
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn terminal_error(&self) -> Option<Error> {
        let session_id = self.inner.state.session_id();
        match *self.inner.status.borrow() {
            SessionStatus::Open | SessionStatus::Suspended => None,
            SessionStatus::Expired => Some(Error::SessionExpired(session_id)),
            SessionStatus::Closed => Some(Error::UnknownSession(session_id)),
        }
    }
}

fn is_no_leader(status: &ResponseStatus) -> bool {
    matches!(
        status,
        ResponseStatus::Error {
            code: ErrorCode::NoLeader,
            ..
        }
    )
}

fn is_live(status: &watch::Receiver<SessionStatus>) -> bool {
    !status.borrow().is_terminal()
}

fn expire(inner: &Arc<SubmitterInner>, err: Error) {
    let transitioned = inner.status.send_if_modified(|status| {
        if status.is_terminal() {
            false
        } else {
            *status = SessionStatus::Expired;
            true
        }
    });
    if transitioned {
        warn!(
            session_id = %inner.state.session_id(),
            error = %err,
            "Session lost, failing pending operations"
        );
    }
    inner
        .sequencer
        .lock()
        .expect("sequencer poisoned")
        .fail_all(err);
}
