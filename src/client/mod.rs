//! Client-side session runtime.
//!
//! [`SessionClient::connect`] opens a session against the cluster and
//! returns a [`SessionHandle`]: the submitter (sequence assignment,
//! dispatch, resequencing) plus a running keep-alive loop. All session
//! state lives behind the handle; clone the underlying [`Submitter`] to
//! share it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use conclave::client::{SessionClient, Transport};
//! use conclave::config::ClientConfig;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> conclave::error::Result<()> {
//! let session = SessionClient::connect(transport, ClientConfig::default()).await?;
//! let value = session.submit_command("put", &b"hello"[..]).await?;
//! let read = session.submit_query("get", &b""[..]).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Session loss (`UnknownSession` from the cluster, or a missed
//! keep-alive window) is terminal: every pending future fails, the
//! status watch flips to [`SessionStatus::Expired`], and recovery means
//! opening a fresh session — per-session ordering state cannot be
//! carried over.

mod keep_alive;
mod retry;
mod sequencer;
mod state;
mod submitter;
mod transport;

pub use keep_alive::KeepAliveLoop;
pub use state::SessionState;
pub use submitter::{ResponseFuture, Submitter};
pub use transport::Transport;

use std::sync::Arc;

use backon::Retryable;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{CloseSessionRequest, Consistency, OpenSessionRequest};
use crate::types::{Operation, SessionId};

/// Liveness of a client session, observable through
/// [`SessionHandle::status_watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Keep-alives are acknowledged; operations flow normally.
    Open,
    /// Keep-alives are failing but the timeout has not lapsed;
    /// operations still dispatch and retry.
    Suspended,
    /// The session is gone (cluster said `UnknownSession`, or the
    /// keep-alive window lapsed). Terminal.
    Expired,
    /// The session was closed by the user. Terminal.
    Closed,
}

impl SessionStatus {
    /// Whether no further operations can succeed on this session.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Closed)
    }
}

/// Factory for client sessions.
pub struct SessionClient;

impl SessionClient {
    /// Open a session and start its keep-alive loop.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<SessionHandle> {
        config.validate()?;

        let request = OpenSessionRequest {
            client_id: config.client_id.clone(),
            timeout_ms: config.session_timeout.as_millis() as u64,
        };
        let response = {
            let transport = transport.clone();
            let request = request.clone();
            (move || {
                let transport = transport.clone();
                let request = request.clone();
                async move { transport.open_session(request).await }
            })
            .retry(retry::session_policy())
            .when(Error::is_retriable)
            .await?
        };
        if let Some(err) = response.status.to_error(response.session_id) {
            return Err(err);
        }

        info!(
            session_id = %response.session_id,
            timeout_ms = response.timeout_ms,
            "Session opened"
        );

        // The cluster may clamp the requested timeout; derive the loop
        // cadence from what was granted.
        let granted = std::time::Duration::from_millis(response.timeout_ms);
        let config = ClientConfig {
            session_timeout: granted,
            keep_alive_interval: config.keep_alive_interval.min(granted / 2),
            ..config
        };

        let state = Arc::new(SessionState::new(response.session_id, response.timeout_ms));
        let submitter = Submitter::new(transport, state, config);
        let keep_alive = KeepAliveLoop::spawn(submitter.clone());

        Ok(SessionHandle {
            submitter,
            keep_alive,
        })
    }
}

/// An open session: submit surface plus liveness management.
pub struct SessionHandle {
    submitter: Submitter,
    keep_alive: KeepAliveLoop,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl SessionHandle {
    /// The session id.
    pub fn session_id(&self) -> SessionId {
        self.submitter.session_id()
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.submitter.status()
    }

    /// Watch session status transitions.
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.submitter.status_watch()
    }

    /// The submitter, for sharing across tasks.
    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    /// Submit an operation, routed by its kind.
    pub fn submit(&self, operation: Operation) -> ResponseFuture {
        self.submitter.submit(operation)
    }

    /// Submit a command by name.
    pub fn submit_command(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> ResponseFuture {
        self.submitter.submit(Operation::command(name, payload))
    }

    /// Submit a query by name at the default consistency.
    pub fn submit_query(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> ResponseFuture {
        self.submitter.submit(Operation::query(name, payload))
    }

    /// Submit a query by name at an explicit consistency level.
    pub fn submit_query_with(
        &self,
        name: impl Into<String>,
        payload: impl Into<Bytes>,
        consistency: Consistency,
    ) -> ResponseFuture {
        self.submitter
            .submit_query(Operation::query(name, payload), consistency)
    }

    /// Close the session: stop the keep-alive loop, tell the cluster,
    /// and fail any still-pending operations locally.
    pub async fn close(self) -> Result<()> {
        let session_id = self.session_id();
        let already_lost = self.status().is_terminal();
        self.keep_alive.shutdown().await;

        self.submitter.mark_closed();
        if already_lost {
            return Ok(());
        }

        let response = self
            .submitter
            .transport()
            .close_session(CloseSessionRequest { session_id })
            .await?;
        match response.status.to_error(session_id) {
            None => {
                info!(session_id = %session_id, "Session closed");
                Ok(())
            }
            // Racing a server-side expiry at close is benign.
            Some(err) if err.is_session_fatal() => Ok(()),
            Some(err) => Err(err),
        }
    }
}
