//! The engine boundary: the external collaborator that consumes framed
//! mutation buffers and answers compiled queries. Only the interface is
//! specified here; the storage engine itself lives elsewhere.

use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::types::SchemaHash;

/// Per-type record of ids provisionally assigned inside one batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CreateRecord {
    /// Wire tag of the type.
    pub type_tag: u16,
    /// First provisional id assigned in this batch.
    pub first_id: u32,
    /// Number of creates for this type in this batch.
    pub count: u32,
}

/// A sealed, framed mutation buffer ready for the engine.
///
/// Ownership transfers with the value: once handed to
/// [`EngineBoundary::apply`], the client never touches the bytes again.
#[derive(Debug)]
pub struct MutationFrame {
    /// Checksum of the schema the buffer was encoded under.
    pub schema: SchemaHash,
    /// Fully framed bytes: header, opcode stream, default section, create
    /// records, trailing stream length.
    pub bytes: Vec<u8>,
    /// Create records, duplicated out of the frame for settlement without
    /// reparsing.
    pub creates: Vec<CreateRecord>,
}

/// Per-type id offsets returned by the engine after applying a batch: how
/// many ids other producers consumed ahead of this batch. Empty means
/// fire-and-forget accepted with no interleaving.
#[derive(Clone, Debug, Default)]
pub struct IdOffsets {
    offsets: FxHashMap<u16, u32>,
}

impl IdOffsets {
    /// No interleaving; every provisional id is final.
    pub fn none() -> Self {
        Self::default()
    }

    /// Records the offset for one type tag.
    pub fn set(&mut self, type_tag: u16, offset: u32) {
        self.offsets.insert(type_tag, offset);
    }

    /// Offset for a type tag; absent means zero.
    pub fn get(&self, type_tag: u16) -> u32 {
        self.offsets.get(&type_tag).copied().unwrap_or(0)
    }
}

/// Contract of the storage engine as seen from the client.
///
/// `apply` receives a moved frame and returns the id-offset map once the
/// buffer is durable. `query` receives compiled byte-code; when the
/// trailing schema checksum does not match the engine's current schema it
/// returns the single-byte stale sentinel instead of a result buffer.
pub trait EngineBoundary: Send + Sync {
    /// Applies one framed mutation buffer.
    fn apply(&self, frame: MutationFrame) -> Result<IdOffsets>;

    /// Executes compiled query byte-code, returning a framed result buffer.
    fn query(&self, bytecode: &[u8]) -> Result<Bytes>;
}
