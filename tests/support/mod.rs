//! Shared test support: a scriptable in-memory transport.
//!
//! Tests queue expectations keyed by request identity (command sequence,
//! query payload) and complete them in whatever order the scenario
//! needs, so response interleaving is fully controlled.

#![allow(dead_code)]

pub mod map;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use conclave::client::Transport;
use conclave::error::{Error, ErrorCode, Result};
use conclave::protocol::{
    CloseSessionRequest, CloseSessionResponse, CommandRequest, CommandResponse, KeepAliveRequest,
    KeepAliveResponse, OpenSessionRequest, OpenSessionResponse, QueryRequest, QueryResponse,
    ResponseStatus,
};
use conclave::types::{LogIndex, SessionId};

type Pending<T> = oneshot::Receiver<Result<T>>;

/// Scriptable transport. Requests without a queued expectation pend
/// forever, which models a cluster that never answers.
#[derive(Default)]
pub struct MockTransport {
    commands: Mutex<HashMap<u64, VecDeque<Pending<CommandResponse>>>>,
    queries: Mutex<HashMap<Vec<u8>, VecDeque<Pending<QueryResponse>>>>,
    keep_alives: Mutex<VecDeque<Pending<KeepAliveResponse>>>,
    open_sessions: Mutex<VecDeque<Pending<OpenSessionResponse>>>,
    close_sessions: Mutex<VecDeque<Pending<CloseSessionResponse>>>,
    pub rebinds: Mutex<Vec<Option<String>>>,
    pub keep_alive_requests: Mutex<Vec<KeepAliveRequest>>,
    keep_alives_in_flight: AtomicUsize,
    pub max_keep_alives_in_flight: AtomicUsize,
    /// When set, unscripted keep-alives fail outright instead of
    /// defaulting to an ack.
    pub fail_keep_alives: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response slot for the command with the given sequence.
    /// Queue twice to script a retry.
    pub fn expect_command(&self, sequence: u64) -> oneshot::Sender<Result<CommandResponse>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .lock()
            .unwrap()
            .entry(sequence)
            .or_default()
            .push_back(rx);
        tx
    }

    /// Queue the response slot for the query with the given payload.
    pub fn expect_query(&self, payload: &[u8]) -> oneshot::Sender<Result<QueryResponse>> {
        let (tx, rx) = oneshot::channel();
        self.queries
            .lock()
            .unwrap()
            .entry(payload.to_vec())
            .or_default()
            .push_back(rx);
        tx
    }

    /// Queue the next keep-alive response slot.
    pub fn expect_keep_alive(&self) -> oneshot::Sender<Result<KeepAliveResponse>> {
        let (tx, rx) = oneshot::channel();
        self.keep_alives.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue the next open-session response slot.
    pub fn expect_open_session(&self) -> oneshot::Sender<Result<OpenSessionResponse>> {
        let (tx, rx) = oneshot::channel();
        self.open_sessions.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue the next close-session response slot.
    pub fn expect_close_session(&self) -> oneshot::Sender<Result<CloseSessionResponse>> {
        let (tx, rx) = oneshot::channel();
        self.close_sessions.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn command(&self, request: CommandRequest) -> Result<CommandResponse> {
        let pending = self
            .commands
            .lock()
            .unwrap()
            .get_mut(&request.sequence.value())
            .and_then(|queue| queue.pop_front());
        match pending {
            Some(rx) => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            None => std::future::pending().await,
        }
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let pending = self
            .queries
            .lock()
            .unwrap()
            .get_mut(request.operation.payload.as_ref())
            .and_then(|queue| queue.pop_front());
        match pending {
            Some(rx) => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            None => std::future::pending().await,
        }
    }

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse> {
        self.keep_alive_requests.lock().unwrap().push(request);
        let in_flight = self.keep_alives_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_keep_alives_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let pending = self.keep_alives.lock().unwrap().pop_front();
        let result = match pending {
            Some(rx) => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            None if self.fail_keep_alives.load(Ordering::SeqCst) => {
                Err(Error::Protocol("injected keep-alive failure".to_string()))
            }
            None => Ok(ok_keep_alive(request.session_id)),
        };
        self.keep_alives_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn open_session(&self, _request: OpenSessionRequest) -> Result<OpenSessionResponse> {
        let pending = self.open_sessions.lock().unwrap().pop_front();
        match pending {
            Some(rx) => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            None => std::future::pending().await,
        }
    }

    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse> {
        let pending = self.close_sessions.lock().unwrap().pop_front();
        match pending {
            Some(rx) => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            None => Ok(CloseSessionResponse {
                status: ResponseStatus::Ok,
                index: request.session_id.index(),
                leader_hint: None,
            }),
        }
    }

    async fn rebind(&self, leader_hint: Option<String>) {
        self.rebinds.lock().unwrap().push(leader_hint);
    }
}

pub fn ok_command(index: u64, result: &[u8]) -> Result<CommandResponse> {
    Ok(CommandResponse {
        status: ResponseStatus::Ok,
        index: LogIndex::new(index),
        result: Bytes::copy_from_slice(result),
        leader_hint: None,
    })
}

pub fn error_command(code: ErrorCode, message: &str) -> Result<CommandResponse> {
    Ok(CommandResponse {
        status: ResponseStatus::Error {
            code,
            message: Some(message.to_string()),
        },
        index: LogIndex::ZERO,
        result: Bytes::new(),
        leader_hint: None,
    })
}

pub fn no_leader_command(leader_hint: Option<&str>) -> Result<CommandResponse> {
    Ok(CommandResponse {
        status: ResponseStatus::Error {
            code: ErrorCode::NoLeader,
            message: None,
        },
        index: LogIndex::ZERO,
        result: Bytes::new(),
        leader_hint: leader_hint.map(str::to_string),
    })
}

pub fn ok_query(index: u64, result: &[u8]) -> Result<QueryResponse> {
    Ok(QueryResponse {
        status: ResponseStatus::Ok,
        index: LogIndex::new(index),
        result: Bytes::copy_from_slice(result),
        leader_hint: None,
    })
}

pub fn ok_keep_alive(session_id: SessionId) -> KeepAliveResponse {
    KeepAliveResponse {
        status: ResponseStatus::Ok,
        index: session_id.index(),
        leader_hint: None,
    }
}

pub fn ok_open_session(session_id: u64, timeout_ms: u64) -> Result<OpenSessionResponse> {
    Ok(OpenSessionResponse {
        status: ResponseStatus::Ok,
        session_id: SessionId::new(session_id),
        timeout_ms,
        index: LogIndex::new(session_id),
        leader_hint: None,
    })
}

/// Let spawned dispatch tasks run up to their next suspension point.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
