//! Schema layout model: compiles a declarative schema into per-type byte
//! layouts. Leaf dependency for the encoder, query compiler, and decoder.

pub mod checksum;
pub mod decl;
pub mod layout;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Result, UmbraError};
use crate::types::{LocaleId, SchemaHash, TypeId};

pub use decl::{PropDecl, PropKind, SchemaDecl, TypeDecl, VectorDecl};
pub use layout::{PropertyDef, TypeLayout, TypeTag};

/// A compiled schema: every type layout plus the shared locale table and
/// the 8-byte checksum the engine verifies buffers against.
///
/// Replaced wholesale on schema change; never mutated in place.
#[derive(Debug)]
pub struct Schema {
    hash: SchemaHash,
    locales: Arc<Vec<String>>,
    types: Vec<Arc<TypeLayout>>,
    by_name: FxHashMap<String, usize>,
    by_tag: FxHashMap<u16, usize>,
}

impl Schema {
    /// Compiles a declaration. Deterministic: the same declaration always
    /// produces the same layouts and checksum.
    pub fn compile(decl: &SchemaDecl) -> Result<Schema> {
        let locales = if decl.locales.is_empty() {
            Arc::new(vec!["en".to_owned()])
        } else {
            let mut seen = FxHashMap::default();
            for code in &decl.locales {
                if seen.insert(code.clone(), ()).is_some() {
                    return Err(UmbraError::invalid(format!("duplicate locale `{code}`")));
                }
            }
            Arc::new(decl.locales.clone())
        };

        let type_names: Vec<String> = decl.types.iter().map(|t| t.name.clone()).collect();
        {
            let mut seen = FxHashMap::default();
            for name in &type_names {
                if seen.insert(name.clone(), ()).is_some() {
                    return Err(UmbraError::invalid(format!("duplicate type `{name}`")));
                }
            }
        }

        // Edge layouts get wire tags above the declared type range.
        let mut edge_tag_alloc = decl.types.len() as u16;
        let mut types = Vec::with_capacity(decl.types.len());
        for (idx, ty) in decl.types.iter().enumerate() {
            let tag = TypeId((idx + 1) as u16);
            let layout =
                layout::compile_type(ty, tag, &locales, &mut edge_tag_alloc, &type_names)?;
            types.push(Arc::new(layout));
        }

        validate_reciprocals(&types)?;

        let by_name = types
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        let by_tag = types
            .iter()
            .enumerate()
            .map(|(i, l)| (l.tag.0, i))
            .collect();

        let hash = {
            let refs: Vec<&TypeLayout> = types.iter().map(|l| l.as_ref()).collect();
            checksum::schema_hash(&locales, &refs)
        };

        Ok(Schema {
            hash,
            locales,
            types,
            by_name,
            by_tag,
        })
    }

    /// The schema checksum trailed onto every compiled buffer.
    pub fn hash(&self) -> SchemaHash {
        self.hash
    }

    /// Shared locale table.
    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    /// Resolves a locale code.
    pub fn locale_id(&self, code: &str) -> Result<LocaleId> {
        self.locales
            .iter()
            .position(|l| l == code)
            .map(|i| LocaleId(i as u8))
            .ok_or_else(|| UmbraError::invalid(format!("unknown locale `{code}`")))
    }

    /// All compiled layouts in tag order.
    pub fn types(&self) -> &[Arc<TypeLayout>] {
        &self.types
    }

    /// Layout lookup by type name.
    pub fn layout(&self, name: &str) -> Result<&Arc<TypeLayout>> {
        self.by_name
            .get(name)
            .map(|&i| &self.types[i])
            .ok_or_else(|| UmbraError::invalid(format!("unknown type `{name}`")))
    }

    /// Layout lookup by wire tag.
    pub fn layout_by_tag(&self, tag: TypeId) -> Result<&Arc<TypeLayout>> {
        self.by_tag
            .get(&tag.0)
            .map(|&i| &self.types[i])
            .ok_or(UmbraError::Corruption("unknown type tag in buffer"))
    }
}

/// A reference declaring a reciprocal must agree with the property it
/// names on the target type; two sides claiming different reciprocals is a
/// compile error, not a runtime surprise.
fn validate_reciprocals(types: &[Arc<TypeLayout>]) -> Result<()> {
    let by_name: FxHashMap<&str, &Arc<TypeLayout>> =
        types.iter().map(|l| (l.name.as_str(), l)).collect();
    for layout in types {
        for def in &layout.props {
            let (Some(target), Some(reciprocal)) = (def.target.as_deref(), def.reciprocal.as_deref())
            else {
                continue;
            };
            let target_layout = by_name
                .get(target)
                .ok_or_else(|| UmbraError::validation(
                    format!("{}.{}", layout.name, def.path),
                    format!("unknown referenced type `{target}`"),
                ))?;
            let back = target_layout.prop_by_path(reciprocal).map_err(|_| {
                UmbraError::validation(
                    format!("{}.{}", layout.name, def.path),
                    format!("reciprocal `{target}.{reciprocal}` does not exist"),
                )
            })?;
            let points_back = back.target.as_deref() == Some(layout.name.as_str());
            let agrees = back
                .reciprocal
                .as_deref()
                .map(|r| r == def.path)
                .unwrap_or(true);
            if !points_back || !agrees {
                return Err(UmbraError::validation(
                    format!("{}.{}", layout.name, def.path),
                    format!("conflicting reference back-pointer via `{target}.{reciprocal}`"),
                ));
            }
        }
    }
    Ok(())
}
