//! Include-tree resolution: expands wildcards against the layout and
//! groups reference descends with their sub-queries.
//!
//! `*` covers all direct scalar fields; `**` recurses through references,
//! bounded by schema depth with a cycle guard, never by user input.

use std::sync::Arc;

use crate::error::{Result, UmbraError};
use crate::query::ast::{IncludeItem, QueryRange, SubAst};
use crate::query::{FilterNode, SortSpec};
use crate::schema::{Schema, TypeLayout, TypeTag};
use crate::types::PropId;

/// Resolved include tree for one layout.
#[derive(Clone, Debug, Default)]
pub struct IncludeTree {
    /// Scalar fields to decode, in ascending id order.
    pub fields: Vec<PropId>,
    /// Reference descends.
    pub refs: Vec<RefInclude>,
}

/// One resolved reference descend.
#[derive(Clone, Debug)]
pub struct RefInclude {
    /// The reference property on the parent type.
    pub prop: PropId,
    /// Layout of the referenced type.
    pub target: Arc<TypeLayout>,
    /// Include tree over the referenced type.
    pub tree: IncludeTree,
    /// Filter over referenced nodes.
    pub filter: Option<FilterNode>,
    /// Sort over referenced nodes.
    pub sort: Option<SortSpec>,
    /// Range over referenced nodes.
    pub range: Option<QueryRange>,
}

impl IncludeTree {
    /// Whether a main-region field is part of this tree.
    pub fn includes_field(&self, id: PropId) -> bool {
        self.fields.contains(&id)
    }

    /// The descend for a reference property, if requested.
    pub fn ref_for(&self, id: PropId) -> Option<&RefInclude> {
        self.refs.iter().find(|r| r.prop == id)
    }
}

/// Resolves the include items of a query against a layout. An empty list
/// behaves like `*`.
pub fn build_include(
    schema: &Schema,
    layout: &Arc<TypeLayout>,
    items: &[IncludeItem],
) -> Result<IncludeTree> {
    let depth_cap = schema.types().len() + 1;
    build_inner(schema, layout, items, depth_cap)
}

fn build_inner(
    schema: &Schema,
    layout: &Arc<TypeLayout>,
    items: &[IncludeItem],
    depth_left: usize,
) -> Result<IncludeTree> {
    let mut tree = IncludeTree::default();
    if items.is_empty() {
        add_all_scalars(layout, &mut tree);
        finish(&mut tree);
        return Ok(tree);
    }
    for item in items {
        match item {
            IncludeItem::Path(path) => add_path(schema, layout, path, &mut tree, depth_left)?,
            IncludeItem::Ref { path, nested } => {
                add_ref(schema, layout, path, nested, &mut tree, depth_left)?
            }
        }
    }
    finish(&mut tree);
    Ok(tree)
}

fn finish(tree: &mut IncludeTree) {
    tree.fields.sort_unstable();
    tree.fields.dedup();
}

fn add_all_scalars(layout: &TypeLayout, tree: &mut IncludeTree) {
    for def in &layout.props {
        match def.tag {
            TypeTag::Reference | TypeTag::References => {}
            _ => tree.fields.push(def.id),
        }
    }
}

fn add_path(
    schema: &Schema,
    layout: &Arc<TypeLayout>,
    path: &str,
    tree: &mut IncludeTree,
    depth_left: usize,
) -> Result<()> {
    if path == "*" {
        add_all_scalars(layout, tree);
        return Ok(());
    }
    if path == "**" {
        if depth_left == 0 {
            return Ok(()); // cycle bottomed out at schema depth
        }
        add_all_scalars(layout, tree);
        for def in &layout.props {
            if !matches!(def.tag, TypeTag::Reference | TypeTag::References) {
                continue;
            }
            let target = target_layout(schema, layout, &def.path)?;
            let sub = build_inner(
                schema,
                &target,
                &[IncludeItem::Path("**".into())],
                depth_left - 1,
            )?;
            merge_ref(tree, RefInclude {
                prop: def.id,
                target,
                tree: sub,
                filter: None,
                sort: None,
                range: None,
            });
        }
        return Ok(());
    }

    // A literal path wins over a reference descend: `meta.views` is a
    // flattened main field even though it contains a dot.
    if let Ok(def) = layout.prop_by_path(path) {
        match def.tag {
            TypeTag::Reference | TypeTag::References => {
                // Bare include of a reference: the ids themselves.
                tree.fields.push(def.id);
            }
            _ => tree.fields.push(def.id),
        }
        return Ok(());
    }

    // Otherwise split at the first dot whose prefix is a reference.
    let mut split = None;
    for (i, _) in path.match_indices('.') {
        let prefix = &path[..i];
        if let Ok(def) = layout.prop_by_path(prefix) {
            if matches!(def.tag, TypeTag::Reference | TypeTag::References) {
                split = Some((prefix, &path[i + 1..]));
                break;
            }
        }
    }
    let Some((prefix, rest)) = split else {
        return Err(UmbraError::invalid(format!(
            "unknown include path `{}.{path}`",
            layout.name
        )));
    };
    let nested = SubAst {
        include: vec![IncludeItem::Path(rest.to_owned())],
        ..SubAst::default()
    };
    add_ref(schema, layout, prefix, &nested, tree, depth_left)
}

fn add_ref(
    schema: &Schema,
    layout: &Arc<TypeLayout>,
    path: &str,
    nested: &SubAst,
    tree: &mut IncludeTree,
    depth_left: usize,
) -> Result<()> {
    let def = layout.prop_by_path(path)?;
    if !matches!(def.tag, TypeTag::Reference | TypeTag::References) {
        return Err(UmbraError::invalid(format!(
            "`{}.{path}` is not a reference",
            layout.name
        )));
    }
    if depth_left == 0 {
        return Err(UmbraError::invalid("include tree deeper than the schema"));
    }
    let target = target_layout(schema, layout, path)?;
    let sub = build_inner(schema, &target, &nested.include, depth_left - 1)?;
    merge_ref(tree, RefInclude {
        prop: def.id,
        target,
        tree: sub,
        filter: nested.filter.clone(),
        sort: nested.sort.clone(),
        range: nested.range,
    });
    Ok(())
}

/// Merges a descend for a property already present instead of duplicating
/// the section.
fn merge_ref(tree: &mut IncludeTree, incoming: RefInclude) {
    if let Some(existing) = tree.refs.iter_mut().find(|r| r.prop == incoming.prop) {
        existing.tree.fields.extend_from_slice(&incoming.tree.fields);
        existing.tree.fields.sort_unstable();
        existing.tree.fields.dedup();
        if existing.filter.is_none() {
            existing.filter = incoming.filter;
        }
        if existing.sort.is_none() {
            existing.sort = incoming.sort;
        }
        if existing.range.is_none() {
            existing.range = incoming.range;
        }
        return;
    }
    tree.refs.push(incoming);
}

fn target_layout(
    schema: &Schema,
    layout: &TypeLayout,
    path: &str,
) -> Result<Arc<TypeLayout>> {
    let def = layout.prop_by_path(path)?;
    let target = def.target.as_deref().ok_or_else(|| {
        UmbraError::invalid(format!("reference `{}.{path}` has no target", layout.name))
    })?;
    Ok(schema.layout(target)?.clone())
}
