//! # Conclave
//! Rust-native replicated state-machine runtime with client sessions.
//!
//! Conclave is the core of a distributed coordination platform: a
//! server-side executor that applies a Raft-ordered commit stream to a
//! user state machine deterministically, and a client-side session layer
//! that guarantees linearizable per-session command ordering over an
//! unordered transport.
//!
//! # Goals
//! - Deterministic execution: logical time, scheduling, and session
//!   expiry are driven by logged commit timestamps, never local clocks
//! - Exactly-once commands: per-session sequence numbers with a
//!   server-side reply cache make retries safe
//! - Ordered delivery: the client resequences out-of-order responses so
//!   callers observe completions in submission order
//! - Narrow edges: Raft, transports, and storage are collaborators
//!   behind small traits, not dependencies of the core
//!
//! ## Server side
//!
//! Register operation handlers on a
//! [`StateMachineExecutor`](server::StateMachineExecutor), feed it
//! committed [`LogEntry`](protocol::LogEntry) values (usually through an
//! [`ExecutorDriver`](server::ExecutorDriver) on a dedicated thread),
//! and snapshot/install through the framed stream in
//! [`server::SnapshotWriter`].
//!
//! ```rust
//! use bytes::Bytes;
//! use conclave::config::ExecutorConfig;
//! use conclave::protocol::{EntryPayload, LogEntry};
//! use conclave::server::StateMachineExecutor;
//! use conclave::types::{LogIndex, OperationId};
//!
//! let mut executor = StateMachineExecutor::new(ExecutorConfig::default());
//! executor.register(OperationId::command("echo"), |_ctx, commit| {
//!     Ok(commit.payload().clone())
//! });
//!
//! let outcome = executor
//!     .apply(LogEntry::new(
//!         LogIndex::new(1),
//!         1000,
//!         EntryPayload::OpenSession {
//!             client_id: "example".to_string(),
//!             timeout_ms: 5000,
//!         },
//!     ))
//!     .unwrap();
//! # let _ = outcome;
//! ```
//!
//! ## Client side
//!
//! Implement [`Transport`](client::Transport) over your wire protocol
//! and connect:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conclave::client::{SessionClient, Transport};
//! use conclave::config::ClientConfig;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> conclave::error::Result<()> {
//! let session = SessionClient::connect(transport, ClientConfig::default()).await?;
//! let result = session.submit_command("put", &b"Hello world!"[..]).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports for building on the runtime.
    //!
    //! Server embedders want [`server::StateMachineExecutor`] and the
    //! snapshot types; clients want [`client::SessionClient`] and
    //! [`client::Transport`].

    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::types::{
        EventSequence, LogIndex, Operation, OperationId, OperationKind, SequenceNumber, SessionId,
    };

    pub use bytes;

    pub mod client {
        //! Client session surface.
        pub use crate::client::*;
    }

    pub mod server {
        //! Server executor surface.
        pub use crate::server::*;
    }
}
