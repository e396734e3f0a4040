//! Json writer: the value is stringified and stored through the string
//! body path (compression threshold and CRC trailer included).

use crate::error::{Result, UmbraError};
use crate::schema::PropertyDef;
use crate::types::Value;

use super::{string, SeparatePayload, WriteCtx};

/// Stringifies json input; plain strings are stored as-is so callers can
/// hand over pre-serialized documents.
pub fn write(def: &PropertyDef, value: &Value, ctx: &WriteCtx) -> Result<SeparatePayload> {
    let text = match value {
        Value::Json(v) => serde_json::to_string(v)
            .map_err(|e| UmbraError::validation(&def.path, format!("json serialize: {e}")))?,
        Value::String(s) => s.clone(),
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected json, got {}", other.kind_name()),
            ))
        }
    };
    string::string_body(def, &text, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
    use crate::types::LocaleId;

    #[test]
    fn json_values_serialize_through_the_string_path() {
        let schema = Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("t")
            .prop(PropDecl::new("meta", PropKind::Json))))
        .unwrap();
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path("meta").unwrap();
        let ctx = WriteCtx { locale: Some(LocaleId(0)), compression_threshold: 1024 };
        let payload = write(def, &Value::Json(serde_json::json!({"a": 1})), &ctx).unwrap();
        assert_eq!(&payload.body[..payload.body.len() - 4], br#"{"a":1}"#);
    }
}
