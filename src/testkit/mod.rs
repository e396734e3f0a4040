//! In-memory engine honoring the wire contract, for tests and examples.
//!
//! `MemoryEngine` parses framed mutation buffers exactly as the real
//! engine would — cursor protocol, masks, default bit vectors, id
//! translation — and evaluates compiled query byte-code against its node
//! store. It is deliberately naive about performance; its job is to make
//! round-trip behavior observable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

use crate::decode::{decode_separate, DecodedValue};
use crate::encode::opcode::{Opcode, MSG_MUTATION, STALE_SENTINEL};
use crate::encode::writers::{self, WriteCtx, FLAG_EDGES};
use crate::engine::{EngineBoundary, IdOffsets, MutationFrame};
use crate::error::{Result, UmbraError};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::le;
use crate::query::ast::CmpOp;
use crate::query::compile::{sections, NODE_LEAF, NODE_OR, QueryKind};
use crate::schema::layout::value_from_json;
use crate::schema::{Schema, TypeLayout, TypeTag};
use crate::types::{LocaleId, PropId, TypeId, ITEM_TERMINATOR, REF_SEGMENT};

const NO_LOCALE: u8 = 0xFF;

#[derive(Clone, Debug)]
struct StoredSep {
    flags: u8,
    body: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct NodeState {
    main: Vec<u8>,
    seps: BTreeMap<(u8, u8), StoredSep>,
    ttl: Option<u32>,
}

#[derive(Debug, Default)]
struct TypeStore {
    nodes: BTreeMap<u32, NodeState>,
}

#[derive(Debug, Default)]
struct EngineState {
    types: FxHashMap<u16, TypeStore>,
}

/// In-memory engine boundary.
pub struct MemoryEngine {
    schema: Arc<Schema>,
    offsets: FxHashMap<u16, u32>,
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    /// Engine initialized with the same compiled schema as the client.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            offsets: FxHashMap::default(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Simulates ids consumed ahead of the client by other producers: the
    /// returned offset map will carry `offset` for `type_tag`.
    pub fn with_offset(mut self, type_tag: u16, offset: u32) -> Self {
        self.offsets.insert(type_tag, offset);
        self
    }

    /// Number of stored nodes for a type, by name.
    pub fn node_count(&self, type_name: &str) -> usize {
        let Ok(layout) = self.schema.layout(type_name) else {
            return 0;
        };
        let state = self.state.lock().expect("engine state poisoned");
        state
            .types
            .get(&layout.tag.0)
            .map(|t| t.nodes.len())
            .unwrap_or(0)
    }

    fn translate(ranges: &[(u16, u32, u32, u32)], tag: u16, id: u32) -> u32 {
        for &(t, first, count, offset) in ranges {
            if t == tag && id >= first && id < first + count {
                return id + offset;
            }
        }
        id
    }
}

struct FrameParts<'a> {
    stream: &'a [u8],
    defaults: Vec<(u16, Vec<u8>)>,
    records: Vec<(u16, u32, u32)>,
}

fn split_frame(bytes: &[u8], expected_schema: u64) -> Result<FrameParts<'_>> {
    if bytes.len() < 1 + 8 + 2 + 4 {
        return Err(UmbraError::Corruption("mutation frame too short"));
    }
    if bytes[0] != MSG_MUTATION {
        return Err(UmbraError::Corruption("not a mutation frame"));
    }
    if le::get_u64(&bytes[1..9]) != expected_schema {
        return Err(UmbraError::Engine("schema checksum mismatch".into()));
    }
    let stream_len = le::get_u32(&bytes[bytes.len() - 4..]) as usize;
    let stream_end = 9 + stream_len;
    if stream_end + 2 + 4 > bytes.len() {
        return Err(UmbraError::Corruption("mutation frame lengths disagree"));
    }
    let stream = &bytes[9..stream_end];
    let mut cur = Cursor::new(&bytes[stream_end..bytes.len() - 4]);
    let n_defaults = cur.u16()? as usize;
    let mut defaults = Vec::with_capacity(n_defaults);
    for _ in 0..n_defaults {
        let tag = cur.u16()?;
        let nb = cur.u8()? as usize;
        defaults.push((tag, cur.take(nb)?.to_vec()));
    }
    let mut records = Vec::new();
    while cur.remaining() > 0 {
        records.push((cur.u16()?, cur.u32()?, cur.u32()?));
    }
    Ok(FrameParts {
        stream,
        defaults,
        records,
    })
}

impl EngineBoundary for MemoryEngine {
    fn apply(&self, frame: MutationFrame) -> Result<IdOffsets> {
        let parts = split_frame(&frame.bytes, self.schema.hash().0)?;
        let ranges: Vec<(u16, u32, u32, u32)> = parts
            .records
            .iter()
            .map(|&(tag, first, count)| {
                (tag, first, count, self.offsets.get(&tag).copied().unwrap_or(0))
            })
            .collect();

        let mut state = self.state.lock().expect("engine state poisoned");
        self.apply_stream(&mut state, parts.stream, &ranges)?;
        self.apply_defaults(&mut state, &parts.defaults, &ranges)?;

        let mut offsets = IdOffsets::none();
        for &(tag, _, _, offset) in &ranges {
            offsets.set(tag, offset);
        }
        Ok(offsets)
    }

    fn query(&self, bytecode: &[u8]) -> Result<Bytes> {
        if bytecode.len() < 8
            || le::get_u64(&bytecode[bytecode.len() - 8..]) != self.schema.hash().0
        {
            return Ok(Bytes::from(vec![STALE_SENTINEL]));
        }
        let split = sections::split(bytecode)?;
        let state = self.state.lock().expect("engine state poisoned");
        let out = self.run_query(&state, &split)?;
        Ok(Bytes::from(out))
    }
}

impl MemoryEngine {
    fn apply_stream(
        &self,
        state: &mut EngineState,
        stream: &[u8],
        ranges: &[(u16, u32, u32, u32)],
    ) -> Result<()> {
        let mut cur = Cursor::new(stream);
        let mut layout: Option<Arc<TypeLayout>> = None;
        let mut prop: Option<PropId> = None;
        let mut node: Option<u32> = None;

        while cur.remaining() > 0 {
            let op = Opcode::from_u8(cur.u8()?)?;
            match op {
                Opcode::SwitchType => {
                    let tag = cur.u16()?;
                    layout = Some(self.schema.layout_by_tag(TypeId(tag))?.clone());
                    prop = None;
                    node = None;
                }
                Opcode::SwitchField => {
                    let id = cur.u8()?;
                    let _tag = cur.u8()?;
                    prop = Some(PropId(id));
                }
                Opcode::SwitchIdCreate | Opcode::SwitchIdUpdate => {
                    let layout = layout
                        .as_ref()
                        .ok_or(UmbraError::Corruption("id switch before type switch"))?;
                    let raw = cur.u32()?;
                    node = Some(Self::translate(ranges, layout.tag.0, raw));
                }
                Opcode::Create | Opcode::Update => {
                    let layout = layout
                        .as_ref()
                        .ok_or(UmbraError::Corruption("write before type switch"))?;
                    let prop = prop.ok_or(UmbraError::Corruption("write before field switch"))?;
                    let id = node.ok_or(UmbraError::Corruption("write before id switch"))?;
                    if prop.0 == 0 {
                        self.apply_region(state, layout, id, op, &mut cur)?;
                    } else {
                        self.apply_separate(state, layout, prop, id, &mut cur, ranges)?;
                    }
                }
                Opcode::DeleteNode => {
                    let layout = layout
                        .as_ref()
                        .ok_or(UmbraError::Corruption("delete before type switch"))?;
                    let id = node.ok_or(UmbraError::Corruption("delete before id switch"))?;
                    if let Some(store) = state.types.get_mut(&layout.tag.0) {
                        store.nodes.remove(&id);
                    }
                }
                Opcode::DeleteSortIndex => {
                    let _prop = cur.u8()?;
                }
                Opcode::Increment | Opcode::Decrement => {
                    let layout = layout
                        .as_ref()
                        .ok_or(UmbraError::Corruption("increment before type switch"))?;
                    let id = node.ok_or(UmbraError::Corruption("increment before id switch"))?;
                    self.apply_delta(state, layout, id, op, &mut cur)?;
                }
                Opcode::Expire => {
                    let layout = layout
                        .as_ref()
                        .ok_or(UmbraError::Corruption("expire before type switch"))?;
                    let id = node.ok_or(UmbraError::Corruption("expire before id switch"))?;
                    let ttl = cur.u32()?;
                    if let Some(n) = state
                        .types
                        .get_mut(&layout.tag.0)
                        .and_then(|t| t.nodes.get_mut(&id))
                    {
                        n.ttl = Some(ttl);
                    }
                }
            }
        }
        cur.ensure_consumed()
    }

    fn apply_region(
        &self,
        state: &mut EngineState,
        layout: &Arc<TypeLayout>,
        id: u32,
        op: Opcode,
        cur: &mut Cursor<'_>,
    ) -> Result<()> {
        let len = cur.u32()? as usize;
        let store = state.types.entry(layout.tag.0).or_default();
        match op {
            Opcode::Create => {
                if len != layout.main_len as usize {
                    return Err(UmbraError::Corruption("create region length mismatch"));
                }
                let image = cur.take(len)?.to_vec();
                store.nodes.insert(
                    id,
                    NodeState {
                        main: image,
                        ..NodeState::default()
                    },
                );
            }
            Opcode::Update => {
                let mask_len = layout.mask_len();
                if len != mask_len + layout.main_len as usize {
                    return Err(UmbraError::Corruption("update region length mismatch"));
                }
                let mask = cur.take(mask_len)?.to_vec();
                let image = cur.take(layout.main_len as usize)?;
                let entry = store.nodes.entry(id).or_insert_with(|| NodeState {
                    main: layout.main_default.clone(),
                    ..NodeState::default()
                });
                for def in &layout.props {
                    if !def.is_main() {
                        continue;
                    }
                    let ord = def.main_ord as usize;
                    if mask[ord / 8] & (1 << (ord % 8)) == 0 {
                        continue;
                    }
                    let start = def.offset as usize;
                    let end = start + def.len as usize;
                    entry.main[start..end].copy_from_slice(&image[start..end]);
                }
            }
            _ => unreachable!("apply_region only handles create/update"),
        }
        Ok(())
    }

    fn apply_separate(
        &self,
        state: &mut EngineState,
        layout: &Arc<TypeLayout>,
        prop: PropId,
        id: u32,
        cur: &mut Cursor<'_>,
        ranges: &[(u16, u32, u32, u32)],
    ) -> Result<()> {
        let def = layout.prop(prop)?.clone();
        let flags = cur.u8()?;
        let len = cur.u32()? as usize;
        let mut body = cur.take(len)?.to_vec();

        let store = state.types.entry(layout.tag.0).or_default();
        let entry = store.nodes.entry(id).or_insert_with(|| NodeState {
            main: layout.main_default.clone(),
            ..NodeState::default()
        });

        if body.is_empty() {
            let keys: Vec<(u8, u8)> = entry
                .seps
                .keys()
                .filter(|(p, _)| *p == prop.0)
                .copied()
                .collect();
            for key in keys {
                entry.seps.remove(&key);
            }
            return Ok(());
        }

        // Provisional ids inside reference payloads translate like ids in
        // the cursor stream.
        if matches!(def.tag, TypeTag::Reference | TypeTag::References) {
            let target_tag = def
                .target
                .as_deref()
                .and_then(|t| self.schema.layout(t).ok())
                .map(|l| l.tag.0)
                .ok_or(UmbraError::Corruption("reference without target"))?;
            if flags & FLAG_EDGES == 0 {
                for chunk in body.chunks_exact_mut(4) {
                    let translated =
                        Self::translate(ranges, target_tag, le::get_u32(chunk));
                    chunk.copy_from_slice(&translated.to_le_bytes());
                }
            } else {
                translate_edge_run(&mut body, target_tag, ranges)?;
            }
        }

        let locale = if def.tag == TypeTag::Text {
            *body.first().ok_or(UmbraError::Corruption("empty text payload"))?
        } else {
            NO_LOCALE
        };
        if def.tag == TypeTag::Cardinality {
            // Sketch writes merge; every other separate write replaces.
            let slot = entry.seps.entry((prop.0, locale)).or_insert(StoredSep {
                flags,
                body: Vec::new(),
            });
            slot.body.extend_from_slice(&body);
            return Ok(());
        }
        entry.seps.insert((prop.0, locale), StoredSep { flags, body });
        Ok(())
    }

    fn apply_delta(
        &self,
        state: &mut EngineState,
        layout: &Arc<TypeLayout>,
        id: u32,
        op: Opcode,
        cur: &mut Cursor<'_>,
    ) -> Result<()> {
        let tag = TypeTag::from_u8(cur.u8()?)?;
        let offset = cur.u16()? as usize;
        let width = tag
            .fixed_width()
            .ok_or(UmbraError::Corruption("delta on separate tag"))?;
        let operand = cur.take(width)?.to_vec();
        let Some(node) = state
            .types
            .get_mut(&layout.tag.0)
            .and_then(|t| t.nodes.get_mut(&id))
        else {
            return Ok(()); // deltas on missing nodes are dropped
        };
        let slot = &mut node.main[offset..offset + width];
        let negative = op == Opcode::Decrement;
        if tag == TypeTag::Number {
            let current = le::get_f64(slot);
            let delta = le::get_f64(&operand);
            let next = if negative { current - delta } else { current + delta };
            slot.copy_from_slice(&next.to_le_bytes());
        } else {
            let mut current = [0u8; 8];
            current[..width].copy_from_slice(slot);
            let mut delta = [0u8; 8];
            delta[..width].copy_from_slice(&operand);
            let (cur_v, delta_v) = (u64::from_le_bytes(current), u64::from_le_bytes(delta));
            let next = if negative {
                cur_v.wrapping_sub(delta_v)
            } else {
                cur_v.wrapping_add(delta_v)
            };
            slot.copy_from_slice(&next.to_le_bytes()[..width]);
        }
        Ok(())
    }

    fn apply_defaults(
        &self,
        state: &mut EngineState,
        defaults: &[(u16, Vec<u8>)],
        ranges: &[(u16, u32, u32, u32)],
    ) -> Result<()> {
        let ctx = WriteCtx {
            locale: Some(LocaleId(0)),
            compression_threshold: usize::MAX,
        };
        for (tag, bitmap) in defaults {
            let layout = self.schema.layout_by_tag(TypeId(*tag))?.clone();
            let created: Vec<u32> = ranges
                .iter()
                .filter(|(t, _, _, _)| t == tag)
                .flat_map(|&(_, first, count, offset)| {
                    (first + offset..first + count + offset).collect::<Vec<_>>()
                })
                .collect();
            for (pos, sep_id) in layout.separate.iter().enumerate() {
                if bitmap
                    .get(pos / 8)
                    .map(|b| b & (1 << (pos % 8)) == 0)
                    .unwrap_or(true)
                {
                    continue;
                }
                let def = layout.prop(*sep_id)?;
                let Some(json) = def.default.as_ref() else {
                    continue;
                };
                let Some(value) = value_from_json(def.tag, json) else {
                    continue;
                };
                let payload = writers::separate_payload(def, &value, &ctx)?;
                let locale = if def.tag == TypeTag::Text {
                    *payload.body.first().unwrap_or(&0)
                } else {
                    NO_LOCALE
                };
                let store = state.types.entry(*tag).or_default();
                for id in &created {
                    let node = store.nodes.entry(*id).or_insert_with(|| NodeState {
                        main: layout.main_default.clone(),
                        ..NodeState::default()
                    });
                    let key = (def.id.0, locale);
                    node.seps.entry(key).or_insert_with(|| StoredSep {
                        flags: payload.flags,
                        body: payload.body.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn translate_edge_run(
    body: &mut [u8],
    target_tag: u16,
    ranges: &[(u16, u32, u32, u32)],
) -> Result<()> {
    let n = le::get_u32(&body[..4]) as usize;
    let mut off = 4usize;
    for _ in 0..n {
        let id = le::get_u32(&body[off..off + 4]);
        let translated = MemoryEngine::translate(ranges, target_tag, id);
        body[off..off + 4].copy_from_slice(&translated.to_le_bytes());
        off += 4;
        let edge_count = body[off] as usize;
        off += 1;
        for _ in 0..edge_count {
            off += 2; // prop id + tag
            let len = le::get_u16(&body[off..off + 2]) as usize;
            off += 2 + len;
        }
    }
    Ok(())
}

// Query evaluation --------------------------------------------------------

#[derive(Debug)]
enum Pred {
    Leaf {
        prop: PropId,
        op: CmpOp,
        payload: Vec<u8>,
    },
    Or(Vec<Vec<Pred>>),
}

#[derive(Debug, Default)]
struct EngineInclude {
    fields: Vec<u8>,
    refs: Vec<(u8, EngineSub)>,
}

#[derive(Debug)]
struct EngineSub {
    filter: Vec<u8>,
    sort: Vec<u8>,
    range: (u32, u32),
    include: EngineInclude,
}

fn parse_filter(bytes: &[u8]) -> Result<Vec<Pred>> {
    let mut cur = Cursor::new(bytes);
    let mut preds = Vec::new();
    while cur.remaining() > 0 {
        match cur.u8()? {
            NODE_LEAF => {
                let prop = PropId(cur.u8()?);
                let _tag = cur.u8()?;
                let op = CmpOp::from_u8(cur.u8()?)?;
                let len = cur.u16()? as usize;
                preds.push(Pred::Leaf {
                    prop,
                    op,
                    payload: cur.take(len)?.to_vec(),
                });
            }
            NODE_OR => {
                let n = cur.u16()? as usize;
                let mut branches = Vec::with_capacity(n);
                for _ in 0..n {
                    let len = cur.u16()? as usize;
                    branches.push(parse_filter(cur.take(len)?)?);
                }
                preds.push(Pred::Or(branches));
            }
            _ => return Err(UmbraError::Corruption("unknown filter node kind")),
        }
    }
    Ok(preds)
}

fn parse_include(bytes: &[u8]) -> Result<EngineInclude> {
    let mut cur = Cursor::new(bytes);
    let mut include = EngineInclude::default();
    let nf = cur.u16()? as usize;
    for _ in 0..nf {
        include.fields.push(cur.u8()?);
    }
    let nr = cur.u16()? as usize;
    for _ in 0..nr {
        let prop = cur.u8()?;
        let len = cur.u16()? as usize;
        let sub_bytes = cur.take(len)?;
        let mut sub = Cursor::new(sub_bytes);
        let flen = sub.u16()? as usize;
        let filter = sub.take(flen)?.to_vec();
        let slen = sub.u16()? as usize;
        let sort = sub.take(slen)?.to_vec();
        let range = (sub.u32()?, sub.u32()?);
        let ilen = sub.u16()? as usize;
        let nested = parse_include(sub.take(ilen)?)?;
        sub.ensure_consumed()?;
        include.refs.push((
            prop,
            EngineSub {
                filter,
                sort,
                range,
                include: nested,
            },
        ));
    }
    cur.ensure_consumed()?;
    Ok(include)
}

impl MemoryEngine {
    fn stored_value(
        &self,
        layout: &TypeLayout,
        node: &NodeState,
        prop: PropId,
    ) -> Option<DecodedValue> {
        let def = layout.prop(prop).ok()?;
        if def.is_main() {
            let raw = TypeLayout::read_fixed(def, &node.main).ok()?;
            return Some(match raw {
                crate::types::Value::Bool(v) => DecodedValue::Bool(v),
                crate::types::Value::Int(v) => DecodedValue::Int(v),
                crate::types::Value::Uint(v) => DecodedValue::Uint(v),
                crate::types::Value::Number(v) => DecodedValue::Number(v),
                crate::types::Value::String(v) => DecodedValue::String(v),
                _ => DecodedValue::Null,
            });
        }
        let stored = node
            .seps
            .range((prop.0, 0)..=(prop.0, 0xFF))
            .next()
            .map(|(_, s)| s)?;
        decode_separate(def, stored.flags, &stored.body).ok()
    }

    fn eval_preds(
        &self,
        layout: &TypeLayout,
        node: &NodeState,
        preds: &[Pred],
    ) -> bool {
        preds.iter().all(|pred| match pred {
            Pred::Or(branches) => branches
                .iter()
                .any(|branch| self.eval_preds(layout, node, branch)),
            Pred::Leaf { prop, op, payload } => self.eval_leaf(layout, node, *prop, *op, payload),
        })
    }

    fn eval_leaf(
        &self,
        layout: &TypeLayout,
        node: &NodeState,
        prop: PropId,
        op: CmpOp,
        payload: &[u8],
    ) -> bool {
        let Ok(def) = layout.prop(prop) else {
            return false;
        };
        // Membership probes read the raw stored payload.
        if op == CmpOp::Has {
            let Some(stored) = node
                .seps
                .range((prop.0, 0)..=(prop.0, 0xFF))
                .next()
                .map(|(_, s)| s)
            else {
                return false;
            };
            return match def.tag {
                TypeTag::References | TypeTag::Reference => {
                    if payload.len() != 4 || stored.flags & FLAG_EDGES != 0 {
                        return false;
                    }
                    stored.body.chunks_exact(4).any(|c| c == payload)
                }
                TypeTag::Cardinality => {
                    payload.len() == 8 && stored.body.chunks_exact(8).any(|c| c == payload)
                }
                _ => false,
            };
        }

        let Some(value) = self.stored_value(layout, node, prop) else {
            return false;
        };
        match op {
            CmpOp::In => {
                let mut cur = Cursor::new(payload);
                let Ok(n) = cur.u32() else { return false };
                for _ in 0..n {
                    let Ok(len) = cur.u16() else { return false };
                    let Ok(bytes) = cur.take(len as usize) else {
                        return false;
                    };
                    if operand_matches(def, &value, bytes, CmpOp::Eq) {
                        return true;
                    }
                }
                false
            }
            CmpOp::Range => {
                let mut cur = Cursor::new(payload);
                let Ok(lo_len) = cur.u16() else { return false };
                let Ok(lo) = cur.take(lo_len as usize) else {
                    return false;
                };
                let Ok(hi_len) = cur.u16() else { return false };
                let Ok(hi) = cur.take(hi_len as usize) else {
                    return false;
                };
                operand_matches(def, &value, lo, CmpOp::Ge) && operand_matches(def, &value, hi, CmpOp::Le)
            }
            simple => operand_matches(def, &value, payload, simple),
        }
    }

    fn run_query(
        &self,
        state: &EngineState,
        split: &sections::QuerySections<'_>,
    ) -> Result<Vec<u8>> {
        let tag = le::get_u16(split.target);
        let layout = self.schema.layout_by_tag(TypeId(tag))?.clone();
        let empty = TypeStore::default();
        let store = state.types.get(&tag).unwrap_or(&empty);

        let mut candidates: Vec<u32> = match QueryKind::from_u8(split.kind)? {
            QueryKind::Scan => store.nodes.keys().copied().collect(),
            QueryKind::Id => vec![le::get_u32(&split.target[2..])],
            QueryKind::Ids => {
                let n = le::get_u32(&split.target[2..]) as usize;
                split.target[6..6 + n * 4]
                    .chunks_exact(4)
                    .map(le::get_u32)
                    .collect()
            }
            QueryKind::Alias => {
                let prop = PropId(split.target[2]);
                let hash = le::get_u64(&split.target[3..11]);
                store
                    .nodes
                    .iter()
                    .filter(|(_, node)| {
                        matches!(
                            self.stored_value(&layout, node, prop),
                            Some(DecodedValue::String(s)) if xxh64(s.as_bytes(), 0) == hash
                        )
                    })
                    .map(|(id, _)| *id)
                    .collect()
            }
        };
        candidates.retain(|id| store.nodes.contains_key(id));

        if !split.filter.is_empty() {
            let preds = parse_filter(split.filter)?;
            candidates.retain(|id| self.eval_preds(&layout, &store.nodes[id], &preds));
        }

        if !split.search.is_empty() {
            let nf = split.search[0] as usize;
            let fields: Vec<PropId> =
                split.search[1..1 + nf].iter().map(|&b| PropId(b)).collect();
            let needle =
                String::from_utf8_lossy(&split.search[1 + nf..]).to_lowercase();
            candidates.retain(|id| {
                let node = &store.nodes[id];
                fields.iter().any(|prop| {
                    matches!(
                        self.stored_value(&layout, node, *prop),
                        Some(DecodedValue::String(s)) if s.to_lowercase().contains(&needle)
                    )
                })
            });
        }

        if !split.sort.is_empty() {
            self.sort_candidates(&layout, store, split.sort, &mut candidates)?;
        }

        let (offset, limit) = split.range;
        let start = (offset as usize).min(candidates.len());
        let end = if limit == 0 {
            candidates.len()
        } else {
            (start + limit as usize).min(candidates.len())
        };
        let window = &candidates[start..end];

        let include = parse_include(split.include)?;
        let mut out = Vec::new();
        le::put_u32(&mut out, window.len() as u32);
        for id in window {
            self.emit_item(state, &layout, store, *id, &include, &mut out)?;
        }
        Ok(out)
    }

    fn sort_candidates(
        &self,
        layout: &TypeLayout,
        store: &TypeStore,
        sort: &[u8],
        candidates: &mut [u32],
    ) -> Result<()> {
        let prop = PropId(sort[0]);
        let descending = sort[2] != 0;
        let mut keyed: Vec<(u32, Option<DecodedValue>)> = candidates
            .iter()
            .map(|id| (*id, self.stored_value(layout, &store.nodes[id], prop)))
            .collect();
        keyed.sort_by(|a, b| {
            let ord = compare_decoded(&a.1, &b.1);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        for (slot, (id, _)) in candidates.iter_mut().zip(keyed) {
            *slot = id;
        }
        Ok(())
    }

    fn emit_item(
        &self,
        state: &EngineState,
        layout: &Arc<TypeLayout>,
        store: &TypeStore,
        id: u32,
        include: &EngineInclude,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let node = store
            .nodes
            .get(&id)
            .ok_or(UmbraError::Corruption("window references missing node"))?;
        le::put_u32(out, id);

        let any_main = include.fields.iter().any(|&f| {
            layout
                .prop(PropId(f))
                .map(|d| d.is_main())
                .unwrap_or(false)
        });
        if any_main {
            out.push(0);
            out.extend_from_slice(&node.main);
        }
        for &field in &include.fields {
            let def = layout.prop(PropId(field))?;
            if def.is_main() {
                continue;
            }
            if def.tag == TypeTag::Cardinality {
                if let Some(stored) = node.seps.get(&(field, NO_LOCALE)) {
                    let distinct: std::collections::BTreeSet<&[u8]> =
                        stored.body.chunks_exact(8).collect();
                    out.push(field);
                    le::put_u16(out, 1 + 8);
                    out.push(0);
                    le::put_u64(out, distinct.len() as u64);
                }
                continue;
            }
            for (&(p, _), stored) in node.seps.range((field, 0)..=(field, 0xFF)) {
                debug_assert_eq!(p, field);
                let mut body = stored.body.clone();
                if matches!(def.tag, TypeTag::References) && stored.flags & FLAG_EDGES != 0 {
                    body = edge_run_ids(&stored.body)?;
                }
                out.push(field);
                le::put_u16(out, (1 + body.len()) as u16);
                out.push(if stored.flags & FLAG_EDGES != 0 {
                    0
                } else {
                    stored.flags
                });
                out.extend_from_slice(&body);
            }
        }

        for (prop, sub) in &include.refs {
            let def = layout.prop(PropId(*prop))?;
            let target = def
                .target
                .as_deref()
                .and_then(|t| self.schema.layout(t).ok())
                .ok_or(UmbraError::Corruption("descend through non-reference"))?
                .clone();
            let target_store_empty = TypeStore::default();
            let target_store = state.types.get(&target.tag.0).unwrap_or(&target_store_empty);

            let mut ids: Vec<u32> = match node
                .seps
                .range((*prop, 0)..=(*prop, 0xFF))
                .next()
                .map(|(_, s)| s)
            {
                Some(stored) if stored.flags & FLAG_EDGES != 0 => edge_run_ids(&stored.body)?
                    .chunks_exact(4)
                    .map(le::get_u32)
                    .collect(),
                Some(stored) => stored.body.chunks_exact(4).map(le::get_u32).collect(),
                None => Vec::new(),
            };
            ids.retain(|rid| target_store.nodes.contains_key(rid));

            if !sub.filter.is_empty() {
                let preds = parse_filter(&sub.filter)?;
                ids.retain(|rid| self.eval_preds(&target, &target_store.nodes[rid], &preds));
            }
            if !sub.sort.is_empty() {
                self.sort_candidates(&target, target_store, &sub.sort, &mut ids)?;
            }
            let (offset, limit) = sub.range;
            let start = (offset as usize).min(ids.len());
            let end = if limit == 0 {
                ids.len()
            } else {
                (start + limit as usize).min(ids.len())
            };

            let mut sub_buf = Vec::new();
            le::put_u32(&mut sub_buf, (end - start) as u32);
            for rid in &ids[start..end] {
                self.emit_item(state, &target, target_store, *rid, &sub.include, &mut sub_buf)?;
            }

            out.push(REF_SEGMENT);
            out.push(*prop);
            le::put_u16(out, target.tag.0);
            le::put_u32(out, sub_buf.len() as u32);
            out.extend_from_slice(&sub_buf);
        }

        out.push(ITEM_TERMINATOR);
        Ok(())
    }
}

/// Extracts the plain id run from an edge-carrying references payload.
fn edge_run_ids(body: &[u8]) -> Result<Vec<u8>> {
    let n = le::get_u32(&body[..4]) as usize;
    let mut ids = Vec::with_capacity(n * 4);
    let mut off = 4usize;
    for _ in 0..n {
        ids.extend_from_slice(&body[off..off + 4]);
        off += 4;
        let edge_count = body[off] as usize;
        off += 1;
        for _ in 0..edge_count {
            off += 2;
            let len = le::get_u16(&body[off..off + 2]) as usize;
            off += 2 + len;
        }
    }
    Ok(ids)
}

fn compare_decoded(a: &Option<DecodedValue>, b: &Option<DecodedValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater, // missing sorts last
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &DecodedValue, b: &DecodedValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (DecodedValue::Bool(x), DecodedValue::Bool(y)) => x.cmp(y),
        (DecodedValue::Int(x), DecodedValue::Int(y)) => x.cmp(y),
        (DecodedValue::Uint(x), DecodedValue::Uint(y)) => x.cmp(y),
        (DecodedValue::Int(x), DecodedValue::Uint(y)) => (*x as i128).cmp(&(*y as i128)),
        (DecodedValue::Uint(x), DecodedValue::Int(y)) => (*x as i128).cmp(&(*y as i128)),
        (DecodedValue::Number(x), DecodedValue::Number(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (DecodedValue::String(x), DecodedValue::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn operand_matches(
    def: &crate::schema::PropertyDef,
    value: &DecodedValue,
    operand: &[u8],
    op: CmpOp,
) -> bool {
    let Some(decoded) = decode_operand(def, operand) else {
        return false;
    };
    let ord = compare_values(value, &decoded);
    match op {
        CmpOp::Eq => ord == std::cmp::Ordering::Equal,
        CmpOp::Ne => ord != std::cmp::Ordering::Equal,
        CmpOp::Gt => ord == std::cmp::Ordering::Greater,
        CmpOp::Ge => ord != std::cmp::Ordering::Less,
        CmpOp::Lt => ord == std::cmp::Ordering::Less,
        CmpOp::Le => ord != std::cmp::Ordering::Greater,
        _ => false,
    }
}

fn decode_operand(def: &crate::schema::PropertyDef, operand: &[u8]) -> Option<DecodedValue> {
    if def.is_main() {
        let mut scratch = vec![0u8; (def.offset + def.len) as usize];
        if operand.len() != def.len as usize {
            return None;
        }
        scratch[def.offset as usize..].copy_from_slice(operand);
        return match TypeLayout::read_fixed(def, &scratch).ok()? {
            crate::types::Value::Bool(v) => Some(DecodedValue::Bool(v)),
            crate::types::Value::Int(v) => Some(DecodedValue::Int(v)),
            crate::types::Value::Uint(v) => Some(DecodedValue::Uint(v)),
            crate::types::Value::Number(v) => Some(DecodedValue::Number(v)),
            crate::types::Value::String(v) => Some(DecodedValue::String(v)),
            _ => None,
        };
    }
    match def.tag {
        TypeTag::String | TypeTag::Alias | TypeTag::Text | TypeTag::Json => Some(
            DecodedValue::String(String::from_utf8(operand.to_vec()).ok()?),
        ),
        TypeTag::Binary => Some(DecodedValue::Bytes(operand.to_vec())),
        _ => None,
    }
}
