//! Crate and wire-level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! - [`Error`]: the typed error surfaced through futures returned by the
//!   client and through executor results on the server.
//! - [`ErrorCode`]: numeric wire codes carried in response envelopes,
//!   convertible back into [`Error`] on receipt.
//!
//! # Propagation policy
//!
//! All client-visible errors reach the caller only through the future
//! returned by `submit`. Session errors (`UnknownSession`,
//! `SessionExpired`) are terminal for the whole session; operation errors
//! fail a single operation; transport errors are retried by the submitter
//! and never surface unless session liveness is lost.

use std::{io, result};

use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

use crate::types::SessionId;

pub type Result<T> = result::Result<T, Error>;

/// Errors produced by the session runtime.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum Error {
    /// The cluster does not know this session. Terminal: every pending
    /// operation on the session fails with this error.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The session missed its keep-alive window and was expired.
    /// Terminal, same handling as [`Error::UnknownSession`].
    #[error("session {0} expired")]
    SessionExpired(SessionId),

    /// No handler is registered for the requested operation.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A command could not be applied.
    #[error("command failure: {0}")]
    CommandFailure(String),

    /// A query could not be evaluated.
    #[error("query failure: {0}")]
    QueryFailure(String),

    /// A handler returned an application-level error for one commit.
    #[error("application error: {0}")]
    Application(String),

    /// The cluster has no leader to accept the request.
    #[error("no leader available")]
    NoLeader,

    /// Malformed request or response envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The per-operation timeout elapsed. Advisory: the server may still
    /// apply the operation; its result is discarded.
    #[error("operation timed out")]
    Timeout,

    /// The transport connection closed mid-request.
    #[error("connection closed")]
    ConnectionClosed,

    /// An error in the network.
    #[error("io error: {0:?}")]
    Io(io::ErrorKind),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Scheduling was attempted from a query handler.
    #[error("callbacks cannot be scheduled from query context")]
    IllegalSchedule,

    /// The replica hit a fatal condition and refuses further work until a
    /// snapshot is re-installed.
    #[error("replica halted: {0}")]
    ReplicaHalted(String),

    /// Snapshot serialization or installation failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl Error {
    /// Whether this error terminates the whole session rather than a
    /// single operation.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::UnknownSession(_) | Error::SessionExpired(_))
    }

    /// Whether the submitter may transparently retry the request that
    /// produced this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::ConnectionClosed | Error::Io(_) | Error::NoLeader
        )
    }

    /// The wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::UnknownSession(_) | Error::SessionExpired(_) => ErrorCode::UnknownSession,
            Error::UnknownOperation(_) => ErrorCode::UnknownOperation,
            Error::CommandFailure(_) => ErrorCode::CommandFailure,
            Error::QueryFailure(_) => ErrorCode::QueryFailure,
            Error::Application(_) => ErrorCode::ApplicationError,
            Error::NoLeader => ErrorCode::NoLeader,
            Error::Protocol(_) => ErrorCode::ProtocolError,
            _ => ErrorCode::Unknown,
        }
    }

    /// Rebuild a typed error from a wire code and optional message.
    ///
    /// `session_id` scopes session-level codes to the session the
    /// response belongs to.
    pub fn from_wire(code: ErrorCode, message: Option<&str>, session_id: SessionId) -> Self {
        let message = message.unwrap_or_default();
        match code {
            ErrorCode::None => Error::Protocol("error reply with code None".to_string()),
            ErrorCode::UnknownSession => Error::UnknownSession(session_id),
            ErrorCode::UnknownOperation => Error::UnknownOperation(message.to_string()),
            ErrorCode::CommandFailure => Error::CommandFailure(message.to_string()),
            ErrorCode::QueryFailure => Error::QueryFailure(message.to_string()),
            ErrorCode::ApplicationError => Error::Application(message.to_string()),
            ErrorCode::NoLeader => Error::NoLeader,
            ErrorCode::ProtocolError => Error::Protocol(message.to_string()),
            ErrorCode::Unknown => Error::Protocol(format!("unknown error: {message}")),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

/// Numeric error codes carried in response envelopes.
///
/// Codes are stable wire values; [`Error::from_wire`] maps them back to
/// typed errors together with the envelope's optional message.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    FromPrimitive,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ErrorCode {
    /// An unexpected error with no dedicated code.
    Unknown = -1,
    /// Success; present so a response status can round-trip as a code.
    #[default]
    None = 0,
    /// The session id is not known to the cluster (never opened, expired,
    /// or closed).
    UnknownSession = 1,
    /// No handler registered for the operation id.
    UnknownOperation = 2,
    /// The command could not be applied to the state machine.
    CommandFailure = 3,
    /// The query could not be evaluated.
    QueryFailure = 4,
    /// A handler raised an application-level error; the message field
    /// carries the detail.
    ApplicationError = 5,
    /// The contacted member is not the leader and knows of no leader.
    NoLeader = 6,
    /// The request or response envelope was malformed.
    ProtocolError = 7,
}
