//! Mutation encoder: appends create/update/delete/upsert/increment/expire
//! operations to the pending batch using the deduplicating cursor
//! protocol.
//!
//! Marker dedup invariant: a `SWITCH_TYPE`/`SWITCH_FIELD`/`SWITCH_ID_*`
//! marker is emitted if and only if the corresponding cursor value differs
//! from what was last written to this buffer.

pub mod batch;
pub mod cursor;
pub mod opcode;
pub mod writers;

use smallvec::SmallVec;

use crate::config::ClientConfig;
use crate::drain::handle::OpHandle;
use crate::error::{Result, UmbraError};
use crate::primitives::bytes::le;
use crate::schema::{PropertyDef, Schema, TypeLayout, TypeTag};
use crate::types::{NodeId, PropId, Value, MAIN_PROP};

pub use batch::{Fit, PendingBatch};
pub use opcode::Opcode;
pub use writers::{SeparatePayload, WriteCtx};

/// Worst-case marker overhead per operation: one type switch (3), one
/// field switch (3), one id switch (5).
const MARKER_OVERHEAD: usize = 11;

/// Outcome of one encode call.
#[derive(Debug)]
pub enum Encoded {
    /// The operation was appended; the handle settles on flush.
    Done(OpHandle),
    /// The buffer must be flushed first; nothing was written. Retrying
    /// against a fresh buffer is guaranteed to not hit this again.
    NeedsFlush,
}

impl Encoded {
    /// Unwraps the handle; panics on `NeedsFlush`. Test convenience.
    pub fn handle(self) -> OpHandle {
        match self {
            Encoded::Done(handle) => handle,
            Encoded::NeedsFlush => panic!("operation needs a flush"),
        }
    }
}

/// Stateless view over one (schema, batch) pair; all cursor state lives in
/// the batch so the encoder can be recreated freely.
pub struct MutationEncoder<'a> {
    schema: &'a Schema,
    batch: &'a mut PendingBatch,
    config: &'a ClientConfig,
}

impl<'a> MutationEncoder<'a> {
    /// Binds an encoder to a batch. The batch must have been opened under
    /// this schema.
    pub fn new(
        schema: &'a Schema,
        batch: &'a mut PendingBatch,
        config: &'a ClientConfig,
    ) -> Result<Self> {
        if batch.schema() != schema.hash() {
            return Err(UmbraError::SchemaChanged);
        }
        Ok(Self {
            schema,
            batch,
            config,
        })
    }

    fn write_ctx(&self, layout: &TypeLayout) -> WriteCtx {
        WriteCtx {
            locale: layout.locale_id(&self.config.locale),
            compression_threshold: self.config.compression_threshold,
        }
    }

    /// Creates a node with an id assigned from the layout's counter.
    pub fn create(&mut self, type_name: &str, payload: &[(String, Value)]) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        self.create_inner(&layout, None, payload, false)
    }

    /// Creates a node with a caller-supplied id (unsafe mode). The id is
    /// final: the engine's offset map does not translate it. The counter
    /// is bumped past it so assigned ids never collide.
    pub fn create_with_id(
        &mut self,
        type_name: &str,
        id: NodeId,
        payload: &[(String, Value)],
    ) -> Result<Encoded> {
        if id.0 == 0 {
            return Err(UmbraError::invalid("node id 0 is reserved"));
        }
        let layout = self.schema.layout(type_name)?.clone();
        layout.observe_id(id);
        self.create_inner(&layout, Some(id), payload, false)
    }

    /// Create-encoded merge keyed by an alias property, which the payload
    /// must therefore contain.
    pub fn upsert(&mut self, type_name: &str, payload: &[(String, Value)]) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        self.create_inner(&layout, None, payload, true)
    }

    fn create_inner(
        &mut self,
        layout: &TypeLayout,
        verbatim: Option<NodeId>,
        payload: &[(String, Value)],
        require_alias: bool,
    ) -> Result<Encoded> {
        if require_alias {
            let has_alias = payload.iter().any(|(path, _)| {
                layout
                    .prop_by_path(path)
                    .map(|d| d.tag == TypeTag::Alias)
                    .unwrap_or(false)
            });
            if !has_alias {
                return Err(UmbraError::invalid(format!(
                    "upsert on `{}` requires an alias property in the payload",
                    layout.name
                )));
            }
        }

        let region = 1 + 4 + layout.main_default.len();
        match self.stage(layout, payload, region)? {
            Fit::Fits => {}
            Fit::NeedsFlush => return Ok(Encoded::NeedsFlush),
            Fit::TooLarge => unreachable!("stage maps TooLarge to an error"),
        }

        // Assigned only after the fit check: a rejected operation must not
        // burn an id, or the per-type (first, count) create records would
        // cover a gap.
        let (id, handle) = match verbatim {
            Some(id) => (id, OpHandle::create_verbatim(layout.tag.0, id)),
            None => {
                let id = layout.next_id()?;
                self.batch.note_create(layout.tag.0, id.0);
                (id, OpHandle::create(layout.tag.0, id))
            }
        };
        self.batch.push_handle(handle.clone());

        self.ensure_type(layout);
        self.ensure_field(MAIN_PROP, 0);
        self.ensure_id(id, true);
        self.emit_region(layout, Opcode::Create)?;

        let mut provided: SmallVec<[PropId; 16]> = SmallVec::new();
        for (path, value) in payload {
            let def = layout.prop_by_path(path)?.clone();
            provided.push(def.id);
            self.write_property(layout, &def, value, Opcode::Create)?;
        }

        // Omitted defaults are not encoded; the engine fills them from the
        // per-batch bit vector.
        for (pos, sep_id) in layout.separate.iter().enumerate() {
            let def = layout.prop(*sep_id)?;
            if def.default.is_some() && !provided.contains(sep_id) {
                self.batch
                    .flag_default(layout.tag.0, pos, layout.default_bitmap_len());
            }
        }
        Ok(Encoded::Done(handle))
    }

    /// Patches an existing node.
    pub fn update(
        &mut self,
        type_name: &str,
        id: NodeId,
        payload: &[(String, Value)],
    ) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        let region = 1 + 4 + layout.mask_len() + layout.main_default.len();
        match self.stage(&layout, payload, region)? {
            Fit::Fits => {}
            Fit::NeedsFlush => return Ok(Encoded::NeedsFlush),
            Fit::TooLarge => unreachable!("stage maps TooLarge to an error"),
        }

        let handle = OpHandle::applied(layout.tag.0);
        self.batch.push_handle(handle.clone());

        self.ensure_type(&layout);
        self.ensure_id(id, false);
        for (path, value) in payload {
            let def = layout.prop_by_path(path)?.clone();
            self.write_property(&layout, &def, value, Opcode::Update)?;
        }
        Ok(Encoded::Done(handle))
    }

    /// Deletes a node.
    pub fn delete(&mut self, type_name: &str, id: NodeId) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        if let Some(flush) = self.fit_simple(MARKER_OVERHEAD + 1)? {
            return Ok(flush);
        }
        let handle = OpHandle::applied(layout.tag.0);
        self.batch.push_handle(handle.clone());
        self.ensure_type(&layout);
        self.ensure_id(id, false);
        self.batch.buf.push(Opcode::DeleteNode as u8);
        Ok(Encoded::Done(handle))
    }

    /// Schedules a node to expire after `ttl_secs`.
    pub fn expire(&mut self, type_name: &str, id: NodeId, ttl_secs: u32) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        if let Some(flush) = self.fit_simple(MARKER_OVERHEAD + 5)? {
            return Ok(flush);
        }
        let handle = OpHandle::applied(layout.tag.0);
        self.batch.push_handle(handle.clone());
        self.ensure_type(&layout);
        self.ensure_id(id, false);
        self.batch.buf.push(Opcode::Expire as u8);
        le::put_u32(&mut self.batch.buf, ttl_secs);
        Ok(Encoded::Done(handle))
    }

    /// Applies a signed delta to a fixed numeric property without a prior
    /// read; negative deltas emit the decrement opcode with the magnitude.
    pub fn increment(
        &mut self,
        type_name: &str,
        id: NodeId,
        path: &str,
        delta: Value,
    ) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        let def = layout.prop_by_path(path)?.clone();
        if !def.is_main() {
            return Err(UmbraError::validation(path, "only fixed properties increment"));
        }
        let delta = self.apply_hooks(&def, delta)?;
        let (negative, operand) = writers::fixed::encode_delta(&def, &delta)?;
        if let Some(flush) = self.fit_simple(MARKER_OVERHEAD + 4 + operand.len())? {
            return Ok(flush);
        }
        let handle = OpHandle::applied(layout.tag.0);
        self.batch.push_handle(handle.clone());
        self.ensure_type(&layout);
        self.ensure_id(id, false);
        let op = if negative {
            Opcode::Decrement
        } else {
            Opcode::Increment
        };
        self.batch.buf.push(op as u8);
        self.batch.buf.push(def.tag as u8);
        le::put_u16(&mut self.batch.buf, def.offset);
        self.batch.buf.extend_from_slice(&operand);
        Ok(Encoded::Done(handle))
    }

    /// Drops the engine-side sort index for one property.
    pub fn delete_sort_index(&mut self, type_name: &str, path: &str) -> Result<Encoded> {
        let layout = self.schema.layout(type_name)?.clone();
        let def = layout.prop_by_path(path)?.clone();
        if let Some(flush) = self.fit_simple(3 + 2)? {
            return Ok(flush);
        }
        let handle = OpHandle::applied(layout.tag.0);
        self.batch.push_handle(handle.clone());
        self.ensure_type(&layout);
        self.batch.buf.push(Opcode::DeleteSortIndex as u8);
        self.batch.buf.push(def.id.0);
        Ok(Encoded::Done(handle))
    }

    /// Worst-case fit check for payload-carrying ops. Maps `TooLarge` to a
    /// size error so nothing is ever partially written.
    fn stage(
        &mut self,
        layout: &TypeLayout,
        payload: &[(String, Value)],
        region: usize,
    ) -> Result<Fit> {
        let mut worst = MARKER_OVERHEAD + region;
        for (path, value) in payload {
            let def = layout.prop_by_path(path)?;
            worst += if def.is_main() {
                0 // patched inside the already-counted region
            } else {
                3 + 1 + writers::estimate_payload(def, value)
            };
        }
        match self.batch.fit(worst) {
            Fit::TooLarge => Err(UmbraError::Size {
                needed: worst,
                ceiling: self.batch.ceiling(),
            }),
            fit => Ok(fit),
        }
    }

    fn fit_simple(&mut self, worst: usize) -> Result<Option<Encoded>> {
        match self.batch.fit(worst) {
            Fit::Fits => Ok(None),
            Fit::NeedsFlush => Ok(Some(Encoded::NeedsFlush)),
            Fit::TooLarge => Err(UmbraError::Size {
                needed: worst,
                ceiling: self.batch.ceiling(),
            }),
        }
    }

    fn apply_hooks(&self, def: &PropertyDef, value: Value) -> Result<Value> {
        let value = match &def.transform {
            Some(transform) => transform(value),
            None => value,
        };
        if let Some(validator) = &def.validator {
            validator(&value).map_err(|reason| UmbraError::validation(&def.path, reason))?;
        }
        Ok(value)
    }

    /// Validates and writes one property. Runs the transform and validator
    /// before any bytes exist for this property; earlier properties of the
    /// same call stay written on failure.
    fn write_property(
        &mut self,
        layout: &TypeLayout,
        def: &PropertyDef,
        value: &Value,
        op: Opcode,
    ) -> Result<()> {
        if def.tag.engine_maintained() {
            return Err(UmbraError::validation(
                &def.path,
                "engine-maintained timestamp is not writable",
            ));
        }
        let value = self.apply_hooks(def, value.clone())?;

        if def.is_main() {
            if matches!(value, Value::Null) {
                return Err(UmbraError::validation(&def.path, "main properties are not nullable"));
            }
            self.ensure_field(MAIN_PROP, 0);
            if self.batch.cursor.main_start.is_none() {
                self.emit_region(layout, op)?;
            }
            let start = self
                .batch
                .cursor
                .main_start
                .ok_or(UmbraError::Corruption("main region not open"))?;
            let end = start + layout.main_len as usize;
            TypeLayout::write_fixed(def, &value, &mut self.batch.buf[start..end])?;
            if let Some(mask_start) = self.batch.cursor.mask_start {
                let ord = def.main_ord as usize;
                self.batch.buf[mask_start + ord / 8] |= 1 << (ord % 8);
            }
            return Ok(());
        }

        let ctx = self.write_ctx(layout);
        let payload = writers::separate_payload(def, &value, &ctx)?;
        self.ensure_field(def.id, def.tag as u8);
        self.batch.buf.push(op as u8);
        self.batch.buf.push(payload.flags);
        le::put_u32(&mut self.batch.buf, payload.body.len() as u32);
        self.batch.buf.extend_from_slice(&payload.body);
        Ok(())
    }

    /// Emits the main-region opener for the current node: the op opcode, a
    /// 4-byte region length, the update mask (updates only), and the
    /// all-defaults image. Later main writes patch in place.
    fn emit_region(&mut self, layout: &TypeLayout, op: Opcode) -> Result<()> {
        let masked = matches!(op, Opcode::Update);
        let mask_len = if masked { layout.mask_len() } else { 0 };
        let total = mask_len + layout.main_default.len();
        self.batch.buf.push(op as u8);
        le::put_u32(&mut self.batch.buf, total as u32);
        if masked {
            self.batch.cursor.mask_start = Some(self.batch.buf.len());
            self.batch.buf.extend(std::iter::repeat(0u8).take(mask_len));
        }
        self.batch.cursor.main_start = Some(self.batch.buf.len());
        self.batch.buf.extend_from_slice(&layout.main_default);
        Ok(())
    }

    fn ensure_type(&mut self, layout: &TypeLayout) {
        if self.batch.cursor.tag == Some(layout.tag.0) {
            return;
        }
        self.batch.buf.push(Opcode::SwitchType as u8);
        le::put_u16(&mut self.batch.buf, layout.tag.0);
        self.batch.cursor.on_type_switch(layout.tag.0);
    }

    fn ensure_field(&mut self, prop: PropId, tag_byte: u8) {
        if self.batch.cursor.prop == Some(prop) {
            return;
        }
        self.batch.buf.push(Opcode::SwitchField as u8);
        self.batch.buf.push(prop.0);
        self.batch.buf.push(tag_byte);
        self.batch.cursor.prop = Some(prop);
    }

    fn ensure_id(&mut self, id: NodeId, creating: bool) {
        if self.batch.cursor.node == Some(id) {
            return;
        }
        let op = if creating {
            Opcode::SwitchIdCreate
        } else {
            Opcode::SwitchIdUpdate
        };
        self.batch.buf.push(op as u8);
        le::put_u32(&mut self.batch.buf, id.0);
        self.batch.cursor.on_id_switch(id);
    }
}
