//! Server-side replicated state-machine runtime.
//!
//! A replica wires four pieces together:
//!
//! - [`StateMachineExecutor`] applies committed entries to registered
//!   operation handlers, single-threaded and deterministic.
//! - [`SessionRegistry`] (owned by the executor) tracks client sessions:
//!   command dedup, event buffering, logical-time expiry.
//! - [`LogicalScheduler`] (owned by the executor) fires timer tasks as
//!   commit timestamps advance logical time.
//! - [`ExecutorDriver`] runs the executor on its own thread and bridges
//!   it to async callers.
//!
//! State machines register handlers with
//! [`StateMachineExecutor::register`] and participate in snapshots
//! through the [`Snapshottable`] capability:
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::collections::HashMap;
//! use std::rc::Rc;
//!
//! use bytes::Bytes;
//! use conclave::config::ExecutorConfig;
//! use conclave::server::StateMachineExecutor;
//! use conclave::types::OperationId;
//!
//! let store: Rc<RefCell<HashMap<Vec<u8>, Bytes>>> = Rc::default();
//!
//! let mut executor = StateMachineExecutor::new(ExecutorConfig::default());
//! let map = store.clone();
//! executor.register(OperationId::command("put"), move |_ctx, commit| {
//!     map.borrow_mut().insert(b"key".to_vec(), commit.payload().clone());
//!     Ok(Bytes::new())
//! });
//! let map = store.clone();
//! executor.register(OperationId::query("get"), move |_ctx, _commit| {
//!     Ok(map.borrow().get(b"key".as_slice()).cloned().unwrap_or_default())
//! });
//! ```

mod commit;
mod driver;
mod executor;
mod scheduler;
mod session;
mod snapshot;

pub use commit::{Commit, CommitPin};
pub use driver::ExecutorDriver;
pub use executor::{
    ApplyOutcome, CompletedCommand, ExecutorStatus, OperationHandler, ServiceContext,
    SessionLifecycle, SessionListener, StateMachineExecutor, TimerHandler,
};
pub use scheduler::{LogicalScheduler, Scheduled, TimerTask};
pub use session::{CachedReply, ParkedCommand, ServerSession, SessionEvent, SessionRegistry};
pub use snapshot::{SnapshotReader, SnapshotWriter, Snapshottable};
