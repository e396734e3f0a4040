//! Query byte-code emission.
//!
//! Each section is length-prefixed so the engine can skip what it does not
//! understand; the buffer always ends with the 8-byte schema checksum of
//! the layout it was compiled against. Byte-code is immutable once built
//! and cacheable by structural equality of the AST.

use std::sync::Arc;

use xxhash_rust::xxh64::xxh64;

use crate::encode::writers::cardinality::value_hash64;
use crate::error::{Result, UmbraError};
use crate::primitives::bytes::le;
use crate::query::ast::{CmpOp, FilterLeaf, FilterNode, QueryAst, SearchSpec, SortSpec, Target};
use crate::query::include::{build_include, IncludeTree, RefInclude};
use crate::schema::{PropertyDef, Schema, TypeLayout, TypeTag};
use crate::types::{SchemaHash, Value};

/// Query kind byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum QueryKind {
    /// Range over a whole type.
    Scan = 0,
    /// Single node by id.
    Id = 1,
    /// Sorted id set.
    Ids = 2,
    /// Alias lookup.
    Alias = 3,
}

impl QueryKind {
    /// Parses a wire byte.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => QueryKind::Scan,
            1 => QueryKind::Id,
            2 => QueryKind::Ids,
            3 => QueryKind::Alias,
            _ => return Err(UmbraError::Corruption("unknown query kind")),
        })
    }
}

/// Filter node kind bytes.
pub const NODE_LEAF: u8 = 0;
/// OR branch marker in a filter section.
pub const NODE_OR: u8 = 1;

/// Operand sets larger than this are canonicalized (sorted, deduplicated)
/// before encoding; smaller sets stay in call order.
const fn default_inline_threshold() -> usize {
    16
}

/// Compiled artifact: the byte-code plus everything the decoder needs to
/// interpret the engine's answer.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    /// The self-contained byte-code buffer.
    pub bytes: Vec<u8>,
    /// Layout of the target type.
    pub root: Arc<TypeLayout>,
    /// Resolved include tree, shared with the result decoder.
    pub include: IncludeTree,
    /// Schema checksum the buffer trails with.
    pub schema: SchemaHash,
}

/// Compiles a query AST against a schema. Must be re-run whenever any AST
/// input or the schema changes.
pub fn compile(schema: &Schema, ast: &QueryAst) -> Result<CompiledQuery> {
    compile_with_threshold(schema, ast, default_inline_threshold())
}

/// Like [`compile`] with an explicit inline-set threshold from config.
pub fn compile_with_threshold(
    schema: &Schema,
    ast: &QueryAst,
    inline_threshold: usize,
) -> Result<CompiledQuery> {
    let root = schema.layout(ast.target.type_name())?.clone();
    let include = build_include(schema, &root, &ast.include)?;

    let mut out = vec![0u8; 4]; // crc patched last
    let (kind, target_payload) = encode_target(&root, &ast.target)?;
    out.push(kind as u8);
    push_section(&mut out, &target_payload)?;

    let range = ast.range.unwrap_or_default();
    le::put_u32(&mut out, range.offset);
    le::put_u32(&mut out, range.limit);

    let filter_bytes = match &ast.filter {
        Some(node) => encode_filter(&root, node, inline_threshold)?,
        None => Vec::new(),
    };
    push_section(&mut out, &filter_bytes)?;

    let sort_bytes = match &ast.sort {
        Some(sort) => encode_sort(&root, sort)?,
        None => Vec::new(),
    };
    push_section(&mut out, &sort_bytes)?;

    let include_bytes = encode_include(&root, &include, inline_threshold)?;
    push_section(&mut out, &include_bytes)?;

    let search_bytes = match &ast.search {
        Some(search) => encode_search(&root, search)?,
        None => Vec::new(),
    };
    push_section(&mut out, &search_bytes)?;

    le::put_u64(&mut out, schema.hash().0);

    let crc = crc32fast::hash(&out[4..]);
    out[..4].copy_from_slice(&crc.to_le_bytes());

    Ok(CompiledQuery {
        bytes: out,
        root,
        include,
        schema: schema.hash(),
    })
}

fn push_section(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if bytes.len() > u16::MAX as usize {
        return Err(UmbraError::invalid("query section exceeds 65535 bytes"));
    }
    le::put_u16(out, bytes.len() as u16);
    out.extend_from_slice(bytes);
    Ok(())
}

fn encode_target(layout: &TypeLayout, target: &Target) -> Result<(QueryKind, Vec<u8>)> {
    let mut payload = Vec::new();
    le::put_u16(&mut payload, layout.tag.0);
    Ok(match target {
        Target::Type(_) => (QueryKind::Scan, payload),
        Target::Id(_, id) => {
            le::put_u32(&mut payload, id.0);
            (QueryKind::Id, payload)
        }
        Target::Ids(_, ids) => {
            let mut sorted: Vec<u32> = ids.iter().map(|id| id.0).collect();
            sorted.sort_unstable();
            sorted.dedup();
            le::put_u32(&mut payload, sorted.len() as u32);
            for id in sorted {
                le::put_u32(&mut payload, id);
            }
            (QueryKind::Ids, payload)
        }
        Target::Alias { path, value, .. } => {
            let def = layout.prop_by_path(path)?;
            if def.tag != TypeTag::Alias {
                return Err(UmbraError::invalid(format!(
                    "`{}.{path}` is not an alias",
                    layout.name
                )));
            }
            payload.push(def.id.0);
            le::put_u64(&mut payload, xxh64(value.as_bytes(), 0));
            (QueryKind::Alias, payload)
        }
    })
}

fn encode_filter(layout: &TypeLayout, node: &FilterNode, threshold: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_filter_node(layout, node, threshold, &mut out)?;
    Ok(out)
}

fn encode_filter_node(
    layout: &TypeLayout,
    node: &FilterNode,
    threshold: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    match node {
        FilterNode::And(children) => {
            for child in children {
                encode_filter_node(layout, child, threshold, out)?;
            }
        }
        FilterNode::Or(branches) => {
            out.push(NODE_OR);
            le::put_u16(out, branches.len() as u16);
            for branch in branches {
                let bytes = encode_filter(layout, branch, threshold)?;
                le::put_u16(out, bytes.len() as u16);
                out.extend_from_slice(&bytes);
            }
        }
        FilterNode::Leaf(leaf) => encode_leaf(layout, leaf, threshold, out)?,
    }
    Ok(())
}

fn encode_leaf(
    layout: &TypeLayout,
    leaf: &FilterLeaf,
    threshold: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let def = layout.prop_by_path(&leaf.path)?;
    let (op, payload) = leaf_payload(def, leaf, threshold)?;
    out.push(NODE_LEAF);
    out.push(def.id.0);
    out.push(def.tag as u8);
    out.push(op as u8);
    if payload.len() > u16::MAX as usize {
        return Err(UmbraError::invalid("filter operand exceeds 65535 bytes"));
    }
    le::put_u16(out, payload.len() as u16);
    out.extend_from_slice(&payload);
    Ok(())
}

fn leaf_payload(def: &PropertyDef, leaf: &FilterLeaf, threshold: usize) -> Result<(CmpOp, Vec<u8>)> {
    match leaf.op {
        CmpOp::Range => {
            let [lo, hi] = leaf.values.as_slice() else {
                return Err(UmbraError::invalid("range filter needs exactly two operands"));
            };
            let lo = encode_operand(def, lo)?;
            let hi = encode_operand(def, hi)?;
            let mut payload = Vec::with_capacity(lo.len() + hi.len() + 4);
            le::put_u16(&mut payload, lo.len() as u16);
            payload.extend_from_slice(&lo);
            le::put_u16(&mut payload, hi.len() as u16);
            payload.extend_from_slice(&hi);
            Ok((CmpOp::Range, payload))
        }
        CmpOp::In => encode_set(def, leaf, threshold),
        CmpOp::Eq if leaf.values.len() != 1 => encode_set(def, leaf, threshold),
        op => {
            let [value] = leaf.values.as_slice() else {
                return Err(UmbraError::invalid("comparison needs exactly one operand"));
            };
            Ok((op, encode_operand(def, value)?))
        }
    }
}

/// Equality sets always encode count-prefixed; sets over the threshold are
/// canonicalized (sorted, deduplicated) first, smaller ones keep call
/// order so the engine can short-circuit on the common value.
fn encode_set(def: &PropertyDef, leaf: &FilterLeaf, threshold: usize) -> Result<(CmpOp, Vec<u8>)> {
    if leaf.values.is_empty() {
        return Err(UmbraError::invalid("equality set is empty"));
    }
    let mut encoded: Vec<Vec<u8>> = leaf
        .values
        .iter()
        .map(|v| encode_operand(def, v))
        .collect::<Result<_>>()?;
    if encoded.len() > threshold {
        encoded.sort_unstable();
        encoded.dedup();
    }
    let mut payload = Vec::new();
    le::put_u32(&mut payload, encoded.len() as u32);
    for bytes in encoded {
        le::put_u16(&mut payload, bytes.len() as u16);
        payload.extend_from_slice(&bytes);
    }
    Ok((CmpOp::In, payload))
}

/// Encodes one filter operand in the property's wire form: fixed-width
/// values exactly as they sit in the main region, strings as raw UTF-8,
/// references as 4-byte ids, cardinality probes as 8-byte hashes.
pub fn encode_operand(def: &PropertyDef, value: &Value) -> Result<Vec<u8>> {
    if def.is_main() {
        // Reuse the main-region codec through a scratch region.
        let mut scratch = vec![0u8; (def.offset + def.len) as usize];
        TypeLayout::write_fixed(def, value, &mut scratch)?;
        return Ok(scratch[def.offset as usize..(def.offset + def.len) as usize].to_vec());
    }
    match (def.tag, value) {
        (TypeTag::String | TypeTag::Alias | TypeTag::Text | TypeTag::Json, Value::String(s)) => {
            Ok(s.as_bytes().to_vec())
        }
        (TypeTag::Binary, Value::Bytes(b)) => Ok(b.clone()),
        (TypeTag::Reference | TypeTag::References, Value::Ref(id)) => Ok(id.0.to_le_bytes().to_vec()),
        (TypeTag::Reference | TypeTag::References, Value::Uint(v)) if *v <= u32::MAX as u64 => {
            Ok((*v as u32).to_le_bytes().to_vec())
        }
        (TypeTag::Reference | TypeTag::References, Value::Int(v))
            if *v > 0 && *v <= u32::MAX as i64 =>
        {
            Ok((*v as u32).to_le_bytes().to_vec())
        }
        (TypeTag::Cardinality, Value::String(s)) => {
            Ok(value_hash64(s.as_bytes()).to_le_bytes().to_vec())
        }
        (TypeTag::Cardinality, Value::Uint(v)) => Ok(v.to_le_bytes().to_vec()),
        (tag, other) => Err(UmbraError::validation(
            &def.path,
            format!("cannot filter {tag:?} by {}", other.kind_name()),
        )),
    }
}

fn encode_sort(layout: &TypeLayout, sort: &SortSpec) -> Result<Vec<u8>> {
    let def = layout.prop_by_path(&sort.path)?;
    let mut out = Vec::with_capacity(7);
    out.push(def.id.0);
    out.push(def.tag as u8);
    out.push(sort.descending as u8);
    if def.is_main() {
        // Fast path: the engine sorts directly on main-region bytes.
        le::put_u16(&mut out, def.offset);
        le::put_u16(&mut out, def.len);
    } else {
        le::put_u16(&mut out, u16::MAX);
        le::put_u16(&mut out, 0);
    }
    Ok(out)
}

fn encode_include(
    layout: &TypeLayout,
    tree: &IncludeTree,
    threshold: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    le::put_u16(&mut out, tree.fields.len() as u16);
    for id in &tree.fields {
        out.push(id.0);
    }
    le::put_u16(&mut out, tree.refs.len() as u16);
    for descend in &tree.refs {
        encode_ref_include(layout, descend, threshold, &mut out)?;
    }
    Ok(out)
}

fn encode_ref_include(
    _layout: &TypeLayout,
    descend: &RefInclude,
    threshold: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut sub = Vec::new();
    let filter_bytes = match &descend.filter {
        Some(node) => encode_filter(&descend.target, node, threshold)?,
        None => Vec::new(),
    };
    push_section(&mut sub, &filter_bytes)?;
    let sort_bytes = match &descend.sort {
        Some(sort) => encode_sort(&descend.target, sort)?,
        None => Vec::new(),
    };
    push_section(&mut sub, &sort_bytes)?;
    let range = descend.range.unwrap_or_default();
    le::put_u32(&mut sub, range.offset);
    le::put_u32(&mut sub, range.limit);
    let nested = encode_include(&descend.target, &descend.tree, threshold)?;
    push_section(&mut sub, &nested)?;

    out.push(descend.prop.0);
    if sub.len() > u16::MAX as usize {
        return Err(UmbraError::invalid("include subtree exceeds 65535 bytes"));
    }
    le::put_u16(out, sub.len() as u16);
    out.extend_from_slice(&sub);
    Ok(())
}

fn encode_search(layout: &TypeLayout, search: &SearchSpec) -> Result<Vec<u8>> {
    let mut fields = Vec::new();
    if search.fields.is_empty() {
        for def in &layout.props {
            if matches!(def.tag, TypeTag::String | TypeTag::Text | TypeTag::Alias) {
                fields.push(def.id.0);
            }
        }
    } else {
        for path in &search.fields {
            let def = layout.prop_by_path(path)?;
            if !matches!(def.tag, TypeTag::String | TypeTag::Text | TypeTag::Alias) {
                return Err(UmbraError::invalid(format!(
                    "search field `{path}` is not text-like"
                )));
            }
            fields.push(def.id.0);
        }
    }
    let mut out = Vec::with_capacity(2 + fields.len() + search.query.len());
    out.push(fields.len() as u8);
    out.extend_from_slice(&fields);
    out.extend_from_slice(search.query.as_bytes());
    Ok(out)
}

/// Structural views into compiled byte-code, shared by tests and the
/// in-memory engine.
pub mod sections {
    use crate::error::{Result, UmbraError};
    use crate::primitives::bytes::buf::Cursor;

    /// Raw section offsets of one compiled buffer.
    #[derive(Debug)]
    pub struct QuerySections<'a> {
        /// Leading crc.
        pub crc: u32,
        /// Query kind byte.
        pub kind: u8,
        /// Target payload.
        pub target: &'a [u8],
        /// Offset + limit.
        pub range: (u32, u32),
        /// Filter section bytes.
        pub filter: &'a [u8],
        /// Sort section bytes.
        pub sort: &'a [u8],
        /// Include section bytes.
        pub include: &'a [u8],
        /// Search section bytes.
        pub search: &'a [u8],
        /// Trailing schema checksum.
        pub schema: u64,
    }

    /// Splits a compiled buffer into its sections, verifying the crc.
    pub fn split(bytes: &[u8]) -> Result<QuerySections<'_>> {
        if bytes.len() < 4 + 1 + 2 + 8 + 8 {
            return Err(UmbraError::Corruption("query buffer too short"));
        }
        let crc = crate::primitives::bytes::le::get_u32(bytes);
        if crc32fast::hash(&bytes[4..]) != crc {
            return Err(UmbraError::Integrity("query crc mismatch"));
        }
        let mut cur = Cursor::new(&bytes[4..bytes.len() - 8]);
        let kind = cur.u8()?;
        let target_len = cur.u16()? as usize;
        let target = cur.take(target_len)?;
        let range = (cur.u32()?, cur.u32()?);
        let filter_len = cur.u16()? as usize;
        let filter = cur.take(filter_len)?;
        let sort_len = cur.u16()? as usize;
        let sort = cur.take(sort_len)?;
        let include_len = cur.u16()? as usize;
        let include = cur.take(include_len)?;
        let search_len = cur.u16()? as usize;
        let search = cur.take(search_len)?;
        cur.ensure_consumed()?;
        let schema =
            crate::primitives::bytes::le::get_u64(&bytes[bytes.len() - 8..]);
        Ok(QuerySections {
            crc,
            kind,
            target,
            range,
            filter,
            sort,
            include,
            search,
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::FilterLeaf;
    use crate::schema::{PropDecl, PropKind, SchemaDecl, TypeDecl};
    use crate::types::NodeId;

    fn schema() -> Schema {
        Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("user")
            .prop(PropDecl::new("isNice", PropKind::Boolean))
            .prop(PropDecl::new("age", PropKind::Uint16))
            .prop(PropDecl::new("email", PropKind::Alias))))
        .unwrap()
    }

    fn leaf(path: &str, op: CmpOp, values: Vec<Value>) -> FilterNode {
        FilterNode::Leaf(FilterLeaf {
            path: path.into(),
            op,
            values,
        })
    }

    #[test]
    fn buffer_ends_with_schema_checksum() {
        let schema = schema();
        let compiled = compile(&schema, &QueryAst::scan("user")).unwrap();
        let split = sections::split(&compiled.bytes).unwrap();
        assert_eq!(split.schema, schema.hash().0);
        assert_eq!(split.kind, QueryKind::Scan as u8);
    }

    #[test]
    fn boolean_eq_payload_is_one_byte() {
        let schema = schema();
        let mut ast = QueryAst::scan("user");
        ast.filter = Some(leaf("isNice", CmpOp::Eq, vec![Value::Bool(true)]));
        let compiled = compile(&schema, &ast).unwrap();
        let split = sections::split(&compiled.bytes).unwrap();
        // [NODE_LEAF][prop id][tag][op][u16 len][payload]
        assert_eq!(split.filter[0], NODE_LEAF);
        assert_eq!(split.filter[3], CmpOp::Eq as u8);
        assert_eq!(le::get_u16(&split.filter[4..6]), 1);
        assert_eq!(split.filter[6], 1);
        assert_eq!(split.filter.len(), 7);
    }

    #[test]
    fn target_ids_are_sorted_ascending() {
        let schema = schema();
        let ast = QueryAst {
            target: Target::Ids(
                "user".into(),
                vec![NodeId(9), NodeId(2), NodeId(5), NodeId(2)],
            ),
            ..QueryAst::scan("user")
        };
        let compiled = compile(&schema, &ast).unwrap();
        let split = sections::split(&compiled.bytes).unwrap();
        assert_eq!(split.kind, QueryKind::Ids as u8);
        let payload = &split.target[2..];
        assert_eq!(le::get_u32(payload), 3);
        let ids: Vec<u32> = payload[4..].chunks(4).map(le::get_u32).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn large_equality_sets_batch_encode_sorted() {
        let schema = schema();
        let values: Vec<Value> = (0..40).rev().map(|i| Value::Uint(i)).collect();
        let mut ast = QueryAst::scan("user");
        ast.filter = Some(leaf("age", CmpOp::Eq, values));
        let compiled = compile(&schema, &ast).unwrap();
        let split = sections::split(&compiled.bytes).unwrap();
        assert_eq!(split.filter[3], CmpOp::In as u8);
        let payload = &split.filter[6..];
        assert_eq!(le::get_u32(payload), 40);
        let first = le::get_u16(&payload[6..8]);
        let second = le::get_u16(&payload[12..14]);
        assert!(first < second, "batch-encoded sets are sorted");
    }

    #[test]
    fn sort_fast_path_carries_main_offsets() {
        let schema = schema();
        let ast = QueryAst {
            sort: Some(SortSpec {
                path: "age".into(),
                descending: true,
            }),
            ..QueryAst::scan("user")
        };
        let compiled = compile(&schema, &ast).unwrap();
        let split = sections::split(&compiled.bytes).unwrap();
        assert_eq!(split.sort[2], 1);
        assert_eq!(le::get_u16(&split.sort[3..5]), 1); // offset after isNice
        assert_eq!(le::get_u16(&split.sort[5..7]), 2);
    }

    #[test]
    fn recompilation_is_deterministic() {
        let schema = schema();
        let mut ast = QueryAst::scan("user");
        ast.filter = Some(leaf("isNice", CmpOp::Eq, vec![Value::Bool(false)]));
        let a = compile(&schema, &ast).unwrap();
        let b = compile(&schema, &ast).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }
}
