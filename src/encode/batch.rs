//! The pending batch: one growable opcode buffer plus everything needed to
//! seal and settle it.

use rustc_hash::FxHashMap;

use crate::drain::handle::OpHandle;
use crate::encode::cursor::EncodeCursor;
use crate::encode::opcode::MSG_MUTATION;
use crate::engine::{CreateRecord, MutationFrame};
use crate::error::{Result, UmbraError};
use crate::primitives::bytes::le;
use crate::types::SchemaHash;

/// Whether an operation of a given worst-case size fits the buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fit {
    /// Appending is safe.
    Fits,
    /// The buffer must be flushed first; the operation fits a fresh one.
    NeedsFlush,
    /// The operation can never fit; fail with a size error.
    TooLarge,
}

/// One growable byte buffer, its provisional ids, and its settlement
/// handles. Created on first write after a flush; destroyed when sealed or
/// cancelled.
#[derive(Debug)]
pub struct PendingBatch {
    /// Opcode stream under construction. Writers append; main-region
    /// patches write in place.
    pub buf: Vec<u8>,
    /// Cursor dedup state for this buffer.
    pub cursor: EncodeCursor,
    schema: SchemaHash,
    ceiling: usize,
    epoch: u64,
    creates: Vec<CreateRecord>,
    creates_idx: FxHashMap<u16, usize>,
    default_bits: FxHashMap<u16, Vec<u8>>,
    handles: Vec<OpHandle>,
}

impl PendingBatch {
    /// Fresh batch under the given schema checksum and size ceiling.
    /// `epoch` identifies the schema generation for cancellation checks.
    pub fn new(schema: SchemaHash, ceiling: usize, epoch: u64) -> Self {
        Self {
            buf: Vec::with_capacity(4096.min(ceiling)),
            cursor: EncodeCursor::new(),
            schema,
            ceiling,
            epoch,
            creates: Vec::new(),
            creates_idx: FxHashMap::default(),
            default_bits: FxHashMap::default(),
            handles: Vec::new(),
        }
    }

    /// Schema generation this batch was opened under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Checksum of the schema this batch encodes against.
    pub fn schema(&self) -> SchemaHash {
        self.schema
    }

    /// Current opcode-stream length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether anything has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.handles.is_empty()
    }

    /// Classifies an operation by its worst-case encoded size.
    pub fn fit(&self, worst_case: usize) -> Fit {
        if worst_case > self.ceiling {
            Fit::TooLarge
        } else if self.buf.len() + worst_case > self.ceiling {
            Fit::NeedsFlush
        } else {
            Fit::Fits
        }
    }

    /// Hard ceiling for this buffer.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Records one create for settlement bookkeeping; first provisional id
    /// per type is what the engine's offset map translates against.
    pub fn note_create(&mut self, type_tag: u16, provisional: u32) {
        match self.creates_idx.get(&type_tag) {
            Some(&i) => self.creates[i].count += 1,
            None => {
                self.creates_idx.insert(type_tag, self.creates.len());
                self.creates.push(CreateRecord {
                    type_tag,
                    first_id: provisional,
                    count: 1,
                });
            }
        }
    }

    /// Flags a separate property (by position in the layout's separate
    /// list) to take its schema default for creates in this batch.
    pub fn flag_default(&mut self, type_tag: u16, separate_pos: usize, bitmap_len: usize) {
        let bits = self
            .default_bits
            .entry(type_tag)
            .or_insert_with(|| vec![0u8; bitmap_len]);
        bits[separate_pos / 8] |= 1 << (separate_pos % 8);
    }

    /// Registers a settlement handle for an operation in this batch.
    pub fn push_handle(&mut self, handle: OpHandle) {
        self.handles.push(handle);
    }

    /// Number of operations awaiting settlement.
    pub fn pending_ops(&self) -> usize {
        self.handles.len()
    }

    /// Cancels the batch: every handle settles with `err`, the buffer is
    /// dropped.
    pub fn cancel(self, err: UmbraError) {
        for handle in &self.handles {
            handle.settle_err(err.clone());
        }
    }

    /// Seals the batch into a framed buffer plus its handles.
    ///
    /// Frame: `[MSG_MUTATION][u64 schema]` + opcode stream + default
    /// section `[u16 n]{[u16 tag][u8 nbytes][bitmap]}` + create records
    /// `{[u16 tag][u32 first][u32 count]}` + `[u32 stream len]`.
    pub fn seal(self) -> Result<(MutationFrame, Vec<OpHandle>)> {
        let stream_len = self.buf.len();
        let mut bytes = Vec::with_capacity(stream_len + 64);
        bytes.push(MSG_MUTATION);
        le::put_u64(&mut bytes, self.schema.0);
        bytes.extend_from_slice(&self.buf);

        let mut tags: Vec<&u16> = self.default_bits.keys().collect();
        tags.sort_unstable();
        le::put_u16(&mut bytes, self.default_bits.len() as u16);
        for tag in tags {
            let bits = &self.default_bits[tag];
            if bits.len() > u8::MAX as usize {
                return Err(UmbraError::Corruption("default bitmap too wide"));
            }
            le::put_u16(&mut bytes, *tag);
            bytes.push(bits.len() as u8);
            bytes.extend_from_slice(bits);
        }

        for record in &self.creates {
            le::put_u16(&mut bytes, record.type_tag);
            le::put_u32(&mut bytes, record.first_id);
            le::put_u32(&mut bytes, record.count);
        }
        le::put_u32(&mut bytes, stream_len as u32);

        tracing::debug!(
            stream_len,
            ops = self.handles.len(),
            creates = self.creates.len(),
            "sealed mutation batch"
        );
        Ok((
            MutationFrame {
                schema: self.schema,
                bytes,
                creates: self.creates,
            },
            self.handles,
        ))
    }
}
