//! Schema checksum: an xxh64 digest over the canonical byte form of the
//! compiled layouts. The engine compares this against its own schema on
//! every buffer, so the digest must be deterministic across processes.

use xxhash_rust::xxh64::Xxh64;

use crate::schema::layout::TypeLayout;
use crate::types::SchemaHash;

const SEED: u64 = 0;

/// Digests the compiled layouts. Everything that affects wire layout goes
/// in: tags, ids, offsets, lengths, paths, variants, and the locale table.
pub fn schema_hash(locales: &[String], layouts: &[&TypeLayout]) -> SchemaHash {
    let mut h = Xxh64::new(SEED);
    h.update(&(locales.len() as u32).to_le_bytes());
    for locale in locales {
        h.update(&(locale.len() as u32).to_le_bytes());
        h.update(locale.as_bytes());
    }
    for layout in layouts {
        digest_layout(&mut h, layout);
    }
    SchemaHash(h.digest())
}

fn digest_layout(h: &mut Xxh64, layout: &TypeLayout) {
    h.update(&layout.tag.0.to_le_bytes());
    h.update(&layout.main_len.to_le_bytes());
    h.update(&(layout.props.len() as u32).to_le_bytes());
    for def in &layout.props {
        h.update(&[def.id.0, def.tag as u8]);
        h.update(&def.offset.to_le_bytes());
        h.update(&def.len.to_le_bytes());
        h.update(&(def.path.len() as u32).to_le_bytes());
        h.update(def.path.as_bytes());
        for variant in &def.variants {
            h.update(&(variant.len() as u32).to_le_bytes());
            h.update(variant.as_bytes());
        }
        if let Some((elem, len)) = def.elem {
            h.update(&[elem as u8]);
            h.update(&len.to_le_bytes());
        }
        if let Some(edge) = &def.edge {
            digest_layout(h, edge);
        }
    }
}
