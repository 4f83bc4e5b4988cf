//! Snapshot stream framing.
//!
//! A snapshot is an opaque byte stream of big-endian length-prefixed
//! sections: `[len][registry][len][scheduler][len][user state]`, in that
//! fixed order. Section bodies are bincode. Length prefixes let the
//! format grow new trailing sections without breaking older readers.
//!
//! The user state machine participates through the [`Snapshottable`]
//! capability it registers on the executor.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Writes length-prefixed sections into a snapshot stream.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buf: BytesMut,
}

impl SnapshotWriter {
    /// Create an empty snapshot stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section, bincode-encoding `value` as its body.
    pub fn write_section<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body =
            bincode::serialize(value).map_err(|e| Error::Snapshot(format!("encode: {e}")))?;
        self.write_raw_section(&body);
        Ok(())
    }

    /// Append a section with a pre-encoded body.
    pub fn write_raw_section(&mut self, body: &[u8]) {
        self.buf.put_u32(body.len() as u32);
        self.buf.put_slice(body);
    }

    /// Finish the stream and return its bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Reads length-prefixed sections from a snapshot stream.
#[derive(Debug)]
pub struct SnapshotReader {
    data: Bytes,
}

impl SnapshotReader {
    /// Wrap a snapshot stream for reading.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Read the next section body.
    pub fn read_raw_section(&mut self) -> Result<Bytes> {
        if self.data.remaining() < 4 {
            return Err(Error::Snapshot(format!(
                "truncated stream: {} bytes left, need a 4-byte section length",
                self.data.remaining()
            )));
        }
        let len = self.data.get_u32() as usize;
        if self.data.remaining() < len {
            return Err(Error::Snapshot(format!(
                "truncated section: {} bytes left of {len}",
                self.data.remaining()
            )));
        }
        Ok(self.data.split_to(len))
    }

    /// Read and bincode-decode the next section body.
    pub fn read_section<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.read_raw_section()?;
        bincode::deserialize(&body).map_err(|e| Error::Snapshot(format!("decode: {e}")))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }
}

/// Capability a user state machine exposes so the executor can include
/// it in snapshots.
///
/// `snapshot` must write the state as one section; `install` must
/// consume exactly what `snapshot` wrote. An error from `install` is
/// replica-fatal: the executor halts and the surrounding engine must
/// re-install a snapshot.
pub trait Snapshottable {
    /// Serialize user state into the stream.
    fn snapshot(&self, writer: &mut SnapshotWriter) -> Result<()>;

    /// Rebuild user state from the stream, replacing current state.
    fn install(&mut self, reader: &mut SnapshotReader) -> Result<()>;
}
