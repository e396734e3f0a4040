//! Compiled per-type byte layouts.
//!
//! A [`TypeLayout`] is immutable once compiled; schema changes replace the
//! whole [`Schema`](super::Schema) rather than mutating in place. The only
//! interior mutability is the id-assignment cell, which is written by the
//! single encoder thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Result, UmbraError};
use crate::primitives::bytes::le;
use crate::schema::decl::{PropDecl, PropKind, Transform, TypeDecl, Validator};
use crate::types::{LocaleId, NodeId, PropId, TypeId, Value, MAX_PROPS};

/// Wire-level property type tag; the closed enumeration every dispatch
/// table is exhaustive over.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// 1-byte boolean.
    Boolean = 1,
    /// 1-byte signed integer.
    Int8 = 2,
    /// 1-byte unsigned integer.
    Uint8 = 3,
    /// 2-byte signed integer.
    Int16 = 4,
    /// 2-byte unsigned integer.
    Uint16 = 5,
    /// 4-byte signed integer.
    Int32 = 6,
    /// 4-byte unsigned integer.
    Uint32 = 7,
    /// 8-byte float.
    Number = 8,
    /// 1-byte enum ordinal.
    Enum = 9,
    /// 8-byte millisecond timestamp.
    Timestamp = 10,
    /// Engine-maintained creation timestamp.
    Created = 11,
    /// Engine-maintained update timestamp.
    Updated = 12,
    /// Variable-length UTF-8 string.
    String = 13,
    /// Per-locale string.
    Text = 14,
    /// Raw bytes.
    Binary = 15,
    /// Single reference.
    Reference = 16,
    /// Reference list, optionally with edge properties.
    References = 17,
    /// Unique key string.
    Alias = 18,
    /// Distinct-count sketch.
    Cardinality = 19,
    /// Fixed-size numeric array.
    Vector = 20,
    /// Column-major vector.
    ColVec = 21,
    /// Json payload.
    Json = 22,
}

impl TypeTag {
    /// Fixed byte width inside the main region; `None` for separate tags.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            TypeTag::Boolean | TypeTag::Int8 | TypeTag::Uint8 | TypeTag::Enum => Some(1),
            TypeTag::Int16 | TypeTag::Uint16 => Some(2),
            TypeTag::Int32 | TypeTag::Uint32 => Some(4),
            TypeTag::Number | TypeTag::Timestamp | TypeTag::Created | TypeTag::Updated => Some(8),
            TypeTag::String
            | TypeTag::Text
            | TypeTag::Binary
            | TypeTag::Reference
            | TypeTag::References
            | TypeTag::Alias
            | TypeTag::Cardinality
            | TypeTag::Vector
            | TypeTag::ColVec
            | TypeTag::Json => None,
        }
    }

    /// Whether the property lives in the fixed main region.
    pub fn is_main(self) -> bool {
        self.fixed_width().is_some()
    }

    /// Whether the engine maintains the value; client writes are rejected.
    pub fn engine_maintained(self) -> bool {
        matches!(self, TypeTag::Created | TypeTag::Updated)
    }

    /// Parses a wire byte back into a tag.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => TypeTag::Boolean,
            2 => TypeTag::Int8,
            3 => TypeTag::Uint8,
            4 => TypeTag::Int16,
            5 => TypeTag::Uint16,
            6 => TypeTag::Int32,
            7 => TypeTag::Uint32,
            8 => TypeTag::Number,
            9 => TypeTag::Enum,
            10 => TypeTag::Timestamp,
            11 => TypeTag::Created,
            12 => TypeTag::Updated,
            13 => TypeTag::String,
            14 => TypeTag::Text,
            15 => TypeTag::Binary,
            16 => TypeTag::Reference,
            17 => TypeTag::References,
            18 => TypeTag::Alias,
            19 => TypeTag::Cardinality,
            20 => TypeTag::Vector,
            21 => TypeTag::ColVec,
            22 => TypeTag::Json,
            _ => return Err(UmbraError::Corruption("unknown property type tag")),
        })
    }

    fn from_kind(kind: PropKind, path: &str) -> Result<Self> {
        Ok(match kind {
            PropKind::Boolean => TypeTag::Boolean,
            PropKind::Int8 => TypeTag::Int8,
            PropKind::Uint8 => TypeTag::Uint8,
            PropKind::Int16 => TypeTag::Int16,
            PropKind::Uint16 => TypeTag::Uint16,
            PropKind::Int32 => TypeTag::Int32,
            PropKind::Uint32 => TypeTag::Uint32,
            PropKind::Number => TypeTag::Number,
            PropKind::Enum => TypeTag::Enum,
            PropKind::Timestamp => TypeTag::Timestamp,
            PropKind::Created => TypeTag::Created,
            PropKind::Updated => TypeTag::Updated,
            PropKind::String => TypeTag::String,
            PropKind::Text => TypeTag::Text,
            PropKind::Binary => TypeTag::Binary,
            PropKind::Reference => TypeTag::Reference,
            PropKind::References => TypeTag::References,
            PropKind::Alias => TypeTag::Alias,
            PropKind::Cardinality => TypeTag::Cardinality,
            PropKind::Vector => TypeTag::Vector,
            PropKind::Colvec => TypeTag::ColVec,
            PropKind::Json => TypeTag::Json,
            PropKind::Object => {
                return Err(UmbraError::validation(path, "object groups carry no tag"))
            }
        })
    }
}

/// One compiled property slot.
#[derive(Clone)]
pub struct PropertyDef {
    /// Property id, 1-based; 0 is the main region pseudo-property.
    pub id: PropId,
    /// Wire type tag.
    pub tag: TypeTag,
    /// Full dotted path.
    pub path: String,
    /// Byte offset within the main region (fixed tags only).
    pub offset: u16,
    /// Byte length within the main region (fixed tags only).
    pub len: u16,
    /// Ordinal among main properties; bit position in update masks.
    pub main_ord: u16,
    /// Declared default, if any.
    pub default: Option<serde_json::Value>,
    /// Custom validator hook.
    pub validator: Option<Validator>,
    /// Value transform hook.
    pub transform: Option<Transform>,
    /// Numeric lower bound.
    pub min: Option<f64>,
    /// Numeric upper bound.
    pub max: Option<f64>,
    /// Numeric step constraint.
    pub step: Option<f64>,
    /// Payload size cap for byte-like tags.
    pub max_bytes: Option<u32>,
    /// Enum variant table; ordinal = index + 1.
    pub variants: Vec<String>,
    /// Referenced type name.
    pub target: Option<String>,
    /// Reciprocal property path on the target type.
    pub reciprocal: Option<String>,
    /// Vector element tag and count.
    pub elem: Option<(TypeTag, u32)>,
    /// Edge layout for references carrying edge properties.
    pub edge: Option<Arc<TypeLayout>>,
}

impl fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDef")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl PropertyDef {
    /// Whether the property lives in the main region.
    pub fn is_main(&self) -> bool {
        self.tag.is_main()
    }

    /// Ordinal of this property in the enum variant table, if it is an
    /// enum and the name is known.
    pub fn enum_ordinal(&self, name: &str) -> Option<u8> {
        self.variants
            .iter()
            .position(|v| v == name)
            .map(|i| (i + 1) as u8)
    }
}

/// Compiled layout of one schema type (or one edge payload).
pub struct TypeLayout {
    /// Type name; edge layouts use `owner.path#edge`.
    pub name: String,
    /// Wire type tag.
    pub tag: TypeId,
    /// Size of the fixed main region in bytes.
    pub main_len: u16,
    /// Number of main properties (update-mask width in bits).
    pub main_count: u16,
    /// All-defaults image of the main region.
    pub main_default: Vec<u8>,
    /// Properties indexed by `id - 1`.
    pub props: Vec<PropertyDef>,
    /// Lookup by full dotted path.
    pub by_path: FxHashMap<String, PropId>,
    /// Separate properties in declaration order; positions index the
    /// per-batch default bit vector and drive sort-index construction.
    pub separate: Vec<PropId>,
    /// Shared locale table.
    pub locales: Arc<Vec<String>>,
    last_id: AtomicU32,
    capped: AtomicBool,
}

impl fmt::Debug for TypeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeLayout")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("main_len", &self.main_len)
            .field("props", &self.props.len())
            .field("separate", &self.separate.len())
            .finish()
    }
}

impl TypeLayout {
    /// Looks up a property by id.
    pub fn prop(&self, id: PropId) -> Result<&PropertyDef> {
        self.props
            .get(id.0 as usize - 1)
            .ok_or(UmbraError::Corruption("property id out of range"))
    }

    /// Looks up a property by full dotted path.
    pub fn prop_by_path(&self, path: &str) -> Result<&PropertyDef> {
        let id = self
            .by_path
            .get(path)
            .ok_or_else(|| UmbraError::invalid(format!("unknown property `{}.{path}`", self.name)))?;
        self.prop(*id)
    }

    /// Resolves a locale code against the shared table.
    pub fn locale_id(&self, code: &str) -> Option<LocaleId> {
        self.locales
            .iter()
            .position(|l| l == code)
            .map(|i| LocaleId(i as u8))
    }

    /// Byte width of the update mask preceding a main-region image.
    pub fn mask_len(&self) -> usize {
        (self.main_count as usize + 7) / 8
    }

    /// Byte width of the per-batch separate-default bit vector.
    pub fn default_bitmap_len(&self) -> usize {
        (self.separate.len() + 7) / 8
    }

    /// Assigns the next provisional id. Single-writer by contract; the
    /// encoder is the only caller.
    pub fn next_id(&self) -> Result<NodeId> {
        if self.capped.load(Ordering::Relaxed) {
            return Err(UmbraError::invalid(format!(
                "id space exhausted for type `{}`",
                self.name
            )));
        }
        let last = self.last_id.load(Ordering::Relaxed);
        let next = last
            .checked_add(1)
            .ok_or_else(|| {
                self.capped.store(true, Ordering::Relaxed);
                UmbraError::invalid(format!("id space exhausted for type `{}`", self.name))
            })?;
        self.last_id.store(next, Ordering::Relaxed);
        Ok(NodeId(next))
    }

    /// Bumps the id counter to at least `id` (unsafe verbatim creates).
    pub fn observe_id(&self, id: NodeId) {
        let last = self.last_id.load(Ordering::Relaxed);
        if id.0 > last {
            self.last_id.store(id.0, Ordering::Relaxed);
        }
    }

    /// Last assigned provisional id.
    pub fn last_id(&self) -> u32 {
        self.last_id.load(Ordering::Relaxed)
    }

    /// Encodes a fixed-width value into `dst` at the property's offset.
    /// `dst` must be the full main region slice.
    pub fn write_fixed(def: &PropertyDef, value: &Value, dst: &mut [u8]) -> Result<()> {
        let start = def.offset as usize;
        let end = start + def.len as usize;
        let slot = &mut dst[start..end];
        match (def.tag, value) {
            (TypeTag::Boolean, Value::Bool(v)) => slot[0] = *v as u8,
            (TypeTag::Int8, Value::Int(v)) => {
                let v = int_in_range(def, *v, i8::MIN as i64, i8::MAX as i64)?;
                slot[0] = (v as i8) as u8;
            }
            (TypeTag::Uint8, v) => {
                let v = uint_value(def, v, u8::MAX as u64)?;
                slot[0] = v as u8;
            }
            (TypeTag::Int16, Value::Int(v)) => {
                let v = int_in_range(def, *v, i16::MIN as i64, i16::MAX as i64)?;
                slot.copy_from_slice(&(v as i16).to_le_bytes());
            }
            (TypeTag::Uint16, v) => {
                let v = uint_value(def, v, u16::MAX as u64)?;
                slot.copy_from_slice(&(v as u16).to_le_bytes());
            }
            (TypeTag::Int32, Value::Int(v)) => {
                let v = int_in_range(def, *v, i32::MIN as i64, i32::MAX as i64)?;
                slot.copy_from_slice(&(v as i32).to_le_bytes());
            }
            (TypeTag::Uint32, v) => {
                let v = uint_value(def, v, u32::MAX as u64)?;
                slot.copy_from_slice(&(v as u32).to_le_bytes());
            }
            (TypeTag::Number, Value::Number(v)) => {
                check_bounds(def, *v)?;
                slot.copy_from_slice(&v.to_le_bytes());
            }
            (TypeTag::Number, Value::Int(v)) => {
                check_bounds(def, *v as f64)?;
                slot.copy_from_slice(&(*v as f64).to_le_bytes());
            }
            (TypeTag::Timestamp, Value::Int(v)) => {
                slot.copy_from_slice(&v.to_le_bytes());
            }
            (TypeTag::Timestamp, Value::Uint(v)) => {
                slot.copy_from_slice(&(*v as i64).to_le_bytes());
            }
            (TypeTag::Enum, Value::String(name)) => {
                let ord = def.enum_ordinal(name).ok_or_else(|| {
                    UmbraError::validation(&def.path, format!("unknown enum variant `{name}`"))
                })?;
                slot[0] = ord;
            }
            (TypeTag::Enum, Value::Int(v)) => {
                if *v < 1 || *v > def.variants.len() as i64 {
                    return Err(UmbraError::validation(&def.path, "enum ordinal out of range"));
                }
                slot[0] = *v as u8;
            }
            (tag, other) => {
                return Err(UmbraError::validation(
                    &def.path,
                    format!("expected {tag:?}, got {}", other.kind_name()),
                ))
            }
        }
        Ok(())
    }

    /// Decodes the fixed-width value stored at the property's offset.
    pub fn read_fixed(def: &PropertyDef, main: &[u8]) -> Result<Value> {
        let start = def.offset as usize;
        let end = start + def.len as usize;
        if end > main.len() {
            return Err(UmbraError::Corruption("main region shorter than layout"));
        }
        let slot = &main[start..end];
        Ok(match def.tag {
            TypeTag::Boolean => Value::Bool(slot[0] != 0),
            TypeTag::Int8 => Value::Int((slot[0] as i8) as i64),
            TypeTag::Uint8 => Value::Uint(slot[0] as u64),
            TypeTag::Int16 => {
                Value::Int(i16::from_le_bytes([slot[0], slot[1]]) as i64)
            }
            TypeTag::Uint16 => Value::Uint(le::get_u16(slot) as u64),
            TypeTag::Int32 => {
                Value::Int(i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]) as i64)
            }
            TypeTag::Uint32 => Value::Uint(le::get_u32(slot) as u64),
            TypeTag::Number => Value::Number(le::get_f64(slot)),
            TypeTag::Timestamp | TypeTag::Created | TypeTag::Updated => {
                Value::Int(le::get_i64(slot))
            }
            TypeTag::Enum => {
                let ord = slot[0];
                if ord == 0 {
                    Value::Null
                } else {
                    let name = def
                        .variants
                        .get(ord as usize - 1)
                        .ok_or(UmbraError::Corruption("enum ordinal out of range"))?;
                    Value::String(name.clone())
                }
            }
            _ => return Err(UmbraError::Corruption("read_fixed on separate property")),
        })
    }
}

fn check_bounds(def: &PropertyDef, v: f64) -> Result<()> {
    if let Some(min) = def.min {
        if v < min {
            return Err(UmbraError::validation(&def.path, format!("{v} below min {min}")));
        }
    }
    if let Some(max) = def.max {
        if v > max {
            return Err(UmbraError::validation(&def.path, format!("{v} above max {max}")));
        }
    }
    if let Some(step) = def.step {
        if step > 0.0 && (v / step).fract().abs() > f64::EPSILON {
            return Err(UmbraError::validation(&def.path, format!("{v} violates step {step}")));
        }
    }
    Ok(())
}

fn int_in_range(def: &PropertyDef, v: i64, lo: i64, hi: i64) -> Result<i64> {
    if v < lo || v > hi {
        return Err(UmbraError::validation(
            &def.path,
            format!("{v} outside [{lo}, {hi}]"),
        ));
    }
    check_bounds(def, v as f64)?;
    Ok(v)
}

fn uint_value(def: &PropertyDef, value: &Value, hi: u64) -> Result<u64> {
    let v = match value {
        Value::Uint(v) => *v,
        Value::Int(v) if *v >= 0 => *v as u64,
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected unsigned integer, got {}", other.kind_name()),
            ))
        }
    };
    if v > hi {
        return Err(UmbraError::validation(&def.path, format!("{v} above {hi}")));
    }
    check_bounds(def, v as f64)?;
    Ok(v)
}

/// Converts a declared json default into an input [`Value`] for the tag.
pub fn value_from_json(tag: TypeTag, json: &serde_json::Value) -> Option<Value> {
    match (tag, json) {
        (TypeTag::Boolean, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
        (TypeTag::Enum, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
        (
            TypeTag::Int8 | TypeTag::Int16 | TypeTag::Int32 | TypeTag::Timestamp,
            serde_json::Value::Number(n),
        ) => n.as_i64().map(Value::Int),
        (TypeTag::Uint8 | TypeTag::Uint16 | TypeTag::Uint32, serde_json::Value::Number(n)) => {
            n.as_u64().map(Value::Uint)
        }
        (TypeTag::Number, serde_json::Value::Number(n)) => n.as_f64().map(Value::Number),
        (TypeTag::String | TypeTag::Text | TypeTag::Alias, serde_json::Value::String(s)) => {
            Some(Value::String(s.clone()))
        }
        (TypeTag::Json, v) => Some(Value::Json(v.clone())),
        _ => None,
    }
}

struct FlattenedProp {
    path: String,
    decl: PropDecl,
}

/// Flattens nested `object` declarations into dotted paths, preserving
/// declaration order depth-first. Iterative: user input never controls the
/// machine stack.
fn flatten_props(props: &[PropDecl], type_name: &str) -> Result<Vec<FlattenedProp>> {
    let mut out = Vec::new();
    // Stack of (prefix, decls, next index) processed front-first.
    let mut stack: Vec<(String, &[PropDecl], usize)> = vec![(String::new(), props, 0)];
    while let Some(top) = stack.len().checked_sub(1) {
        let (prefix, slice, idx) = {
            let frame = &stack[top];
            (frame.0.clone(), frame.1, frame.2)
        };
        if idx >= slice.len() {
            stack.pop();
            continue;
        }
        stack[top].2 += 1;
        let decl = &slice[idx];
        let path = if prefix.is_empty() {
            decl.name.clone()
        } else {
            format!("{prefix}.{}", decl.name)
        };
        if decl.name.is_empty() || decl.name.contains('.') {
            return Err(UmbraError::validation(
                format!("{type_name}.{path}"),
                "property names must be non-empty and dot-free",
            ));
        }
        if decl.kind == PropKind::Object {
            if decl.children.is_empty() {
                return Err(UmbraError::validation(
                    format!("{type_name}.{path}"),
                    "object group declares no children",
                ));
            }
            if stack.len() >= 8 {
                return Err(UmbraError::validation(
                    format!("{type_name}.{path}"),
                    "object nesting too deep",
                ));
            }
            stack.push((path, &decl.children, 0));
        } else {
            out.push(FlattenedProp {
                path,
                decl: decl.clone(),
            });
        }
    }
    Ok(out)
}

/// Compiles one type declaration. `edge_tag_alloc` hands out wire tags for
/// edge layouts.
pub(super) fn compile_type(
    decl: &TypeDecl,
    tag: TypeId,
    locales: &Arc<Vec<String>>,
    edge_tag_alloc: &mut u16,
    type_names: &[String],
) -> Result<TypeLayout> {
    let flat = flatten_props(&decl.props, &decl.name)?;
    if flat.len() > MAX_PROPS {
        return Err(UmbraError::validation(
            &decl.name,
            format!("too many properties ({} > {MAX_PROPS})", flat.len()),
        ));
    }

    let mut props = Vec::with_capacity(flat.len());
    let mut by_path = FxHashMap::default();
    let mut separate = Vec::new();
    let mut offset = 0usize;
    let mut main_ord = 0u16;

    for (idx, fp) in flat.iter().enumerate() {
        let id = PropId((idx + 1) as u8);
        let qualified = format!("{}.{}", decl.name, fp.path);
        let tag8 = TypeTag::from_kind(fp.decl.kind, &qualified)?;

        if by_path.insert(fp.path.clone(), id).is_some() {
            return Err(UmbraError::validation(&qualified, "duplicate property path"));
        }

        match tag8 {
            TypeTag::Enum => {
                if fp.decl.variants.is_empty() || fp.decl.variants.len() > 255 {
                    return Err(UmbraError::validation(
                        &qualified,
                        "enum needs 1..=255 variants",
                    ));
                }
            }
            TypeTag::Vector | TypeTag::ColVec => {
                let spec = fp.decl.vector.as_ref().ok_or_else(|| {
                    UmbraError::validation(&qualified, "vector declares no element spec")
                })?;
                let elem_tag = TypeTag::from_kind(spec.elem, &qualified)?;
                if elem_tag.fixed_width().is_none() || elem_tag == TypeTag::Enum {
                    return Err(UmbraError::validation(
                        &qualified,
                        "vector elements must be fixed-width numeric",
                    ));
                }
                if spec.len == 0 {
                    return Err(UmbraError::validation(&qualified, "vector length is zero"));
                }
            }
            TypeTag::Reference | TypeTag::References => {
                let target = fp.decl.target.as_deref().ok_or_else(|| {
                    UmbraError::validation(&qualified, "reference declares no target type")
                })?;
                if !type_names.iter().any(|n| n == target) {
                    return Err(UmbraError::validation(
                        &qualified,
                        format!("unknown referenced type `{target}`"),
                    ));
                }
            }
            _ => {}
        }

        let edge = if tag8 == TypeTag::References && !fp.decl.edge_props.is_empty() {
            let edge_decl = TypeDecl {
                name: format!("{}.{}#edge", decl.name, fp.path),
                props: fp.decl.edge_props.clone(),
            };
            for ep in &edge_decl.props {
                if matches!(ep.kind, PropKind::Reference | PropKind::References) {
                    return Err(UmbraError::validation(
                        &qualified,
                        "edge properties cannot themselves be references",
                    ));
                }
            }
            *edge_tag_alloc += 1;
            let edge_tag = TypeId(*edge_tag_alloc);
            Some(Arc::new(compile_type(
                &edge_decl,
                edge_tag,
                locales,
                edge_tag_alloc,
                type_names,
            )?))
        } else {
            None
        };

        let (prop_offset, prop_len, ord) = if let Some(width) = tag8.fixed_width() {
            let start = offset;
            offset += width;
            if offset > u16::MAX as usize {
                return Err(UmbraError::validation(
                    &qualified,
                    "main region exceeds 65535 bytes",
                ));
            }
            let o = main_ord;
            main_ord += 1;
            (start as u16, width as u16, o)
        } else {
            separate.push(id);
            (0, 0, 0)
        };

        let elem = fp
            .decl
            .vector
            .as_ref()
            .map(|spec| Ok::<_, UmbraError>((TypeTag::from_kind(spec.elem, &qualified)?, spec.len)))
            .transpose()?;

        props.push(PropertyDef {
            id,
            tag: tag8,
            path: fp.path.clone(),
            offset: prop_offset,
            len: prop_len,
            main_ord: ord,
            default: fp.decl.default.clone(),
            validator: fp.decl.validator.clone(),
            transform: fp.decl.transform.clone(),
            min: fp.decl.min,
            max: fp.decl.max,
            step: fp.decl.step,
            max_bytes: fp.decl.max_bytes,
            variants: fp.decl.variants.clone(),
            target: fp.decl.target.clone(),
            reciprocal: fp.decl.reciprocal.clone(),
            elem,
            edge,
        });
    }

    // All-defaults image: zero-fill, then patch declared defaults once so
    // per-node buffers are copy-then-patch.
    let mut main_default = vec![0u8; offset];
    for def in &props {
        if !def.is_main() {
            continue;
        }
        let Some(json) = def.default.as_ref() else {
            continue;
        };
        let value = value_from_json(def.tag, json).ok_or_else(|| {
            UmbraError::validation(
                format!("{}.{}", decl.name, def.path),
                "default does not match property kind",
            )
        })?;
        TypeLayout::write_fixed(def, &value, &mut main_default)?;
    }

    Ok(TypeLayout {
        name: decl.name.clone(),
        tag,
        main_len: offset as u16,
        main_count: main_ord,
        main_default,
        props,
        by_path,
        separate,
        locales: Arc::clone(locales),
        last_id: AtomicU32::new(0),
        capped: AtomicBool::new(false),
    })
}
