//! Reference writers: single references, reference runs, and per-reference
//! edge properties.

use crate::error::{Result, UmbraError};
use crate::primitives::bytes::le;
use crate::schema::{PropertyDef, TypeLayout};
use crate::types::{NodeId, RefEntry, Value};

use super::{separate_payload, SeparatePayload, WriteCtx, FLAG_EDGES};

fn resolve_id(def: &PropertyDef, value: &Value) -> Result<NodeId> {
    match value {
        Value::Ref(id) => Ok(*id),
        Value::Uint(v) if *v > 0 && *v <= u32::MAX as u64 => Ok(NodeId(*v as u32)),
        Value::Int(v) if *v > 0 && *v <= u32::MAX as i64 => Ok(NodeId(*v as u32)),
        other => Err(UmbraError::validation(
            &def.path,
            format!("expected a node id, got {}", other.kind_name()),
        )),
    }
}

/// Single reference: a 4-byte id. `Value::Null` is handled upstream as the
/// clear marker.
pub fn write_single(def: &PropertyDef, value: &Value) -> Result<SeparatePayload> {
    let id = resolve_id(def, value)?;
    let mut body = Vec::with_capacity(4);
    le::put_u32(&mut body, id.0);
    Ok(SeparatePayload { flags: 0, body })
}

/// Reference run. Without edge properties the payload is exactly
/// `4 * n` id bytes; with edges each reference carries its own edge
/// blocks, written through the same writer dispatch against the edge
/// layout.
pub fn write_many(def: &PropertyDef, value: &Value, ctx: &WriteCtx) -> Result<SeparatePayload> {
    let refs = match value {
        Value::Refs(refs) => refs,
        Value::Ref(id) => {
            // A lone id is accepted as a one-element run.
            let mut body = Vec::with_capacity(4);
            le::put_u32(&mut body, id.0);
            return Ok(SeparatePayload { flags: 0, body });
        }
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected refs, got {}", other.kind_name()),
            ))
        }
    };

    let has_edges = refs.iter().any(|r| !r.edges.is_empty());
    if !has_edges {
        let mut body = Vec::with_capacity(refs.len() * 4);
        for entry in refs {
            le::put_u32(&mut body, entry.id.0);
        }
        return Ok(SeparatePayload { flags: 0, body });
    }

    let edge_layout = def.edge.as_deref().ok_or_else(|| {
        UmbraError::validation(&def.path, "edge values supplied but no edge properties declared")
    })?;
    let mut body = Vec::new();
    le::put_u32(&mut body, refs.len() as u32);
    for entry in refs {
        le::put_u32(&mut body, entry.id.0);
        if entry.edges.len() > u8::MAX as usize {
            return Err(UmbraError::validation(&def.path, "too many edge properties"));
        }
        body.push(entry.edges.len() as u8);
        for (edge_path, edge_value) in &entry.edges {
            write_edge_block(def, edge_layout, edge_path, edge_value, ctx, &mut body)?;
        }
    }
    Ok(SeparatePayload {
        flags: FLAG_EDGES,
        body,
    })
}

/// One edge block: `[u8 prop id][u8 type tag][u16 len][payload]`. Fixed
/// edge properties carry their value bytes; separate ones carry
/// `[u8 flags][body]`.
fn write_edge_block(
    owner: &PropertyDef,
    edge_layout: &TypeLayout,
    path: &str,
    value: &Value,
    ctx: &WriteCtx,
    out: &mut Vec<u8>,
) -> Result<()> {
    let edge_def = edge_layout.prop_by_path(path).map_err(|_| {
        UmbraError::validation(
            &owner.path,
            format!("unknown edge property `{path}`"),
        )
    })?;
    out.push(edge_def.id.0);
    out.push(edge_def.tag as u8);
    if edge_def.is_main() {
        let mut scratch = vec![0u8; edge_layout.main_len as usize];
        TypeLayout::write_fixed(edge_def, value, &mut scratch)?;
        let start = edge_def.offset as usize;
        let bytes = &scratch[start..start + edge_def.len as usize];
        le::put_u16(out, bytes.len() as u16);
        out.extend_from_slice(bytes);
    } else {
        let payload = separate_payload(edge_def, value, ctx)?;
        let len = 1 + payload.body.len();
        if len > u16::MAX as usize {
            return Err(UmbraError::validation(&owner.path, "edge payload too large"));
        }
        le::put_u16(out, len as u16);
        out.push(payload.flags);
        out.extend_from_slice(&payload.body);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
    use crate::types::LocaleId;

    fn ctx() -> WriteCtx {
        WriteCtx {
            locale: Some(LocaleId(0)),
            compression_threshold: 64,
        }
    }

    fn friends_schema(with_edges: bool) -> Schema {
        let mut prop = PropDecl::new("friends", PropKind::References).with_target("user");
        if with_edges {
            prop = prop.with_edge_props(vec![
                PropDecl::new("since", PropKind::Timestamp),
                PropDecl::new("note", PropKind::String),
            ]);
        }
        Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("user").prop(prop))).unwrap()
    }

    #[test]
    fn plain_run_is_four_bytes_per_id() {
        let schema = friends_schema(false);
        let layout = schema.layout("user").unwrap();
        let def = layout.prop_by_path("friends").unwrap();
        let refs: Vec<RefEntry> = (1..=100).map(|i| RefEntry::plain(NodeId(i))).collect();
        let payload = write_many(def, &Value::Refs(refs), &ctx()).unwrap();
        assert_eq!(payload.flags, 0);
        assert_eq!(payload.body.len(), 400);
    }

    #[test]
    fn payload_size_is_independent_of_order() {
        let schema = friends_schema(false);
        let layout = schema.layout("user").unwrap();
        let def = layout.prop_by_path("friends").unwrap();
        let forward: Vec<RefEntry> = (1..=100).map(|i| RefEntry::plain(NodeId(i))).collect();
        let reverse: Vec<RefEntry> = (1..=100).rev().map(|i| RefEntry::plain(NodeId(i))).collect();
        let a = write_many(def, &Value::Refs(forward), &ctx()).unwrap();
        let b = write_many(def, &Value::Refs(reverse), &ctx()).unwrap();
        assert_eq!(a.body.len(), b.body.len());
    }

    #[test]
    fn edge_blocks_precede_nothing_but_their_reference() {
        let schema = friends_schema(true);
        let layout = schema.layout("user").unwrap();
        let def = layout.prop_by_path("friends").unwrap();
        let refs = vec![RefEntry::with_edges(
            NodeId(7),
            vec![("since".to_owned(), Value::Int(1_700_000_000_000))],
        )];
        let payload = write_many(def, &Value::Refs(refs), &ctx()).unwrap();
        assert_eq!(payload.flags, FLAG_EDGES);
        // count(4) + id(4) + edge_count(1) + block header(4) + timestamp(8)
        assert_eq!(payload.body.len(), 4 + 4 + 1 + 4 + 8);
        assert_eq!(le::get_u32(&payload.body[..4]), 1);
        assert_eq!(le::get_u32(&payload.body[4..8]), 7);
    }

    #[test]
    fn unknown_edge_property_is_rejected() {
        let schema = friends_schema(true);
        let layout = schema.layout("user").unwrap();
        let def = layout.prop_by_path("friends").unwrap();
        let refs = vec![RefEntry::with_edges(
            NodeId(1),
            vec![("ghost".to_owned(), Value::Int(0))],
        )];
        assert!(write_many(def, &Value::Refs(refs), &ctx()).is_err());
    }
}
