//! A map-like state machine used to exercise the executor: versioned
//! put/get, TTL eviction through the logical scheduler, and snapshot
//! participation.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use conclave::config::ExecutorConfig;
use conclave::error::{Error, Result};
use conclave::server::{
    Snapshottable, SnapshotReader, SnapshotWriter, StateMachineExecutor, TimerTask,
};
use conclave::types::OperationId;

/// A value plus the write version that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapService {
    pub entries: HashMap<String, Versioned>,
    pub version: u64,
}

struct MapSnapshot(Rc<RefCell<MapService>>);

impl Snapshottable for MapSnapshot {
    fn snapshot(&self, writer: &mut SnapshotWriter) -> Result<()> {
        writer.write_section(&*self.0.borrow())
    }

    fn install(&mut self, reader: &mut SnapshotReader) -> Result<()> {
        *self.0.borrow_mut() = reader.read_section()?;
        Ok(())
    }
}

pub fn put_payload(key: &str, value: &[u8]) -> Bytes {
    Bytes::from(bincode::serialize(&(key.to_string(), value.to_vec())).unwrap())
}

pub fn put_with_ttl_payload(key: &str, value: &[u8], ttl_ms: u64) -> Bytes {
    Bytes::from(bincode::serialize(&(key.to_string(), value.to_vec(), ttl_ms)).unwrap())
}

pub fn key_payload(key: &str) -> Bytes {
    Bytes::from(bincode::serialize(&key.to_string()).unwrap())
}

pub fn decode_versioned(bytes: &[u8]) -> Option<Versioned> {
    if bytes.is_empty() {
        None
    } else {
        Some(bincode::deserialize(bytes).unwrap())
    }
}

/// Build an executor hosting the map service:
///
/// - `put(key, value) -> version` (command)
/// - `put_with_ttl(key, value, ttl_ms)` (command, schedules eviction)
/// - `get(key) -> Versioned | empty` (query)
/// - `exists(key) -> [0|1]` (command, for observing state at a commit)
/// - timer `evict(key)`
pub fn map_executor() -> (StateMachineExecutor, Rc<RefCell<MapService>>) {
    let service: Rc<RefCell<MapService>> = Rc::default();
    let mut executor = StateMachineExecutor::new(ExecutorConfig::default());

    let state = service.clone();
    executor.register(OperationId::command("put"), move |_ctx, commit| {
        let (key, value): (String, Vec<u8>) = bincode::deserialize(commit.payload().as_ref())
            .map_err(|e| Error::CommandFailure(e.to_string()))?;
        let mut service = state.borrow_mut();
        service.version += 1;
        let version = service.version;
        service.entries.insert(key, Versioned { value, version });
        Ok(Bytes::copy_from_slice(&version.to_be_bytes()))
    });

    let state = service.clone();
    executor.register(OperationId::command("put_with_ttl"), move |ctx, commit| {
        let (key, value, ttl_ms): (String, Vec<u8>, u64) =
            bincode::deserialize(commit.payload().as_ref())
                .map_err(|e| Error::CommandFailure(e.to_string()))?;
        let mut service = state.borrow_mut();
        service.version += 1;
        let version = service.version;
        service.entries.insert(key.clone(), Versioned { value, version });
        drop(service);
        ctx.schedule(
            ttl_ms,
            TimerTask::new("evict", Bytes::from(bincode::serialize(&key).unwrap())),
        )?;
        Ok(Bytes::new())
    });

    let state = service.clone();
    executor.register_timer("evict", move |_ctx, payload| {
        let key: String = bincode::deserialize(payload.as_ref()).unwrap();
        state.borrow_mut().entries.remove(&key);
    });

    let state = service.clone();
    executor.register(OperationId::query("get"), move |_ctx, commit| {
        let key: String = bincode::deserialize(commit.payload().as_ref())
            .map_err(|e| Error::QueryFailure(e.to_string()))?;
        match state.borrow().entries.get(&key) {
            Some(versioned) => Ok(Bytes::from(bincode::serialize(versioned).unwrap())),
            None => Ok(Bytes::new()),
        }
    });

    let state = service.clone();
    executor.register(OperationId::command("exists"), move |_ctx, commit| {
        let key: String = bincode::deserialize(commit.payload().as_ref())
            .map_err(|e| Error::CommandFailure(e.to_string()))?;
        let present = state.borrow().entries.contains_key(&key);
        Ok(Bytes::copy_from_slice(&[u8::from(present)]))
    });

    executor.set_snapshottable(Box::new(MapSnapshot(service.clone())));
    (executor, service)
}
