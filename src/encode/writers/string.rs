//! String-family writers: string, alias, text, shared by json.
//!
//! Bodies over the compression threshold are snap-compressed when that
//! actually shrinks them; the CRC32 trailer is always computed over the
//! uncompressed UTF-8 so the decoder can tell corruption from version
//! skew.

use crate::error::{Result, UmbraError};
use crate::schema::PropertyDef;
use crate::types::checksum::payload_crc32;
use crate::types::Value;

use super::{SeparatePayload, WriteCtx, FLAG_COMPRESSED};

/// Encodes the body of a string-like payload: `[bytes][u32 crc]`, with the
/// compressed flag set when snap took effect.
pub(super) fn string_body(
    def: &PropertyDef,
    raw: &str,
    ctx: &WriteCtx,
) -> Result<SeparatePayload> {
    if let Some(max) = def.max_bytes {
        if raw.len() > max as usize {
            return Err(UmbraError::validation(
                &def.path,
                format!("{} bytes exceeds max_bytes {max}", raw.len()),
            ));
        }
    }
    let crc = payload_crc32(def.tag as u8, def.id.0, raw.as_bytes());
    let mut flags = 0u8;
    let mut body;
    if raw.len() > ctx.compression_threshold {
        let compressed = snap::raw::Encoder::new()
            .compress_vec(raw.as_bytes())
            .map_err(|e| UmbraError::validation(&def.path, format!("compression: {e}")))?;
        if compressed.len() < raw.len() {
            flags |= FLAG_COMPRESSED;
            body = compressed;
        } else {
            body = raw.as_bytes().to_vec();
        }
    } else {
        body = raw.as_bytes().to_vec();
    }
    body.extend_from_slice(&crc.to_le_bytes());
    Ok(SeparatePayload { flags, body })
}

fn expect_string<'v>(def: &PropertyDef, value: &'v Value) -> Result<&'v str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(UmbraError::validation(
            &def.path,
            format!("expected string, got {}", other.kind_name()),
        )),
    }
}

/// Plain string property.
pub fn write_string(def: &PropertyDef, value: &Value, ctx: &WriteCtx) -> Result<SeparatePayload> {
    string_body(def, expect_string(def, value)?, ctx)
}

/// Alias property: a unique key; empty or whitespace-only values are
/// rejected before any bytes exist.
pub fn write_alias(def: &PropertyDef, value: &Value, ctx: &WriteCtx) -> Result<SeparatePayload> {
    let raw = expect_string(def, value)?;
    if raw.trim().is_empty() {
        return Err(UmbraError::validation(
            &def.path,
            "alias must not be empty or whitespace-only",
        ));
    }
    string_body(def, raw, ctx)
}

/// Text property: one call writes exactly one locale's value; the active
/// locale must exist in the schema's locale table.
pub fn write_text(def: &PropertyDef, value: &Value, ctx: &WriteCtx) -> Result<SeparatePayload> {
    let locale = ctx.locale.ok_or_else(|| {
        UmbraError::validation(&def.path, "active locale is not in the schema's locale table")
    })?;
    let raw = expect_string(def, value)?;
    let inner = string_body(def, raw, ctx)?;
    let mut body = Vec::with_capacity(1 + inner.body.len());
    body.push(locale.0);
    body.extend_from_slice(&inner.body);
    Ok(SeparatePayload {
        flags: inner.flags,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
    use crate::types::LocaleId;

    fn def_for(kind: PropKind) -> (Schema, &'static str) {
        let schema = Schema::compile(&SchemaDecl::new().locale("en").locale("de").ty(
            TypeDecl::new("t").prop(PropDecl::new("p", kind).with_max_bytes(1 << 16)),
        ))
        .unwrap();
        (schema, "p")
    }

    fn ctx() -> WriteCtx {
        WriteCtx {
            locale: Some(LocaleId(1)),
            compression_threshold: 32,
        }
    }

    #[test]
    fn short_strings_stay_raw_with_crc() {
        let (schema, path) = def_for(PropKind::String);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path(path).unwrap();
        let payload = write_string(def, &Value::from("hi"), &ctx()).unwrap();
        assert_eq!(payload.flags, 0);
        assert_eq!(payload.body.len(), 2 + 4);
        assert_eq!(&payload.body[..2], b"hi");
    }

    #[test]
    fn long_repetitive_strings_compress() {
        let (schema, path) = def_for(PropKind::String);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path(path).unwrap();
        let raw = "abcd".repeat(64);
        let payload = write_string(def, &Value::from(raw.as_str()), &ctx()).unwrap();
        assert_eq!(payload.flags & FLAG_COMPRESSED, FLAG_COMPRESSED);
        assert!(payload.body.len() < raw.len());
    }

    #[test]
    fn alias_rejects_whitespace() {
        let (schema, path) = def_for(PropKind::Alias);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path(path).unwrap();
        assert!(write_alias(def, &Value::from("  \t"), &ctx()).is_err());
        assert!(write_alias(def, &Value::from("ok"), &ctx()).is_ok());
    }

    #[test]
    fn text_prefixes_locale_index() {
        let (schema, path) = def_for(PropKind::Text);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path(path).unwrap();
        let payload = write_text(def, &Value::from("hallo"), &ctx()).unwrap();
        assert_eq!(payload.body[0], 1);
        assert_eq!(&payload.body[1..6], b"hallo");
    }

    #[test]
    fn max_bytes_is_enforced() {
        let schema = Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("t")
            .prop(PropDecl::new("p", PropKind::String).with_max_bytes(4))))
        .unwrap();
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path("p").unwrap();
        assert!(write_string(def, &Value::from("hello"), &ctx()).is_err());
    }
}
