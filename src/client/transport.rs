//! The client→cluster transport contract.
//!
//! The runtime is transport-agnostic: anything that can deliver the five
//! request/response pairs to some cluster member implements [`Transport`].
//! Implementations own connection management; the submitter only asks
//! them to [`Transport::rebind`] when a response indicates a leader
//! change.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{
    CloseSessionRequest, CloseSessionResponse, CommandRequest, CommandResponse, KeepAliveRequest,
    KeepAliveResponse, OpenSessionRequest, OpenSessionResponse, QueryRequest, QueryResponse,
};

/// Point-to-point request/response transport to a cluster member.
///
/// Errors returned here are transport-level (`Timeout`,
/// `ConnectionClosed`, `Io`); operation-level failures travel inside the
/// response envelope's status.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit a command for replicated application.
    async fn command(&self, request: CommandRequest) -> Result<CommandResponse>;

    /// Evaluate a read-only query.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse>;

    /// Send a session liveness beacon.
    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse>;

    /// Open a new session.
    async fn open_session(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse>;

    /// Close a session gracefully.
    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse>;

    /// Rebind toward the indicated leader (or probe for one when no hint
    /// is given). Called by the submitter on `NoLeader` replies before
    /// retrying.
    async fn rebind(&self, _leader_hint: Option<String>) {}
}
