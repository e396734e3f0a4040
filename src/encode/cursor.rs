//! Deduplicating cursor state for one batch buffer.

use crate::types::{NodeId, PropId};

/// Mutable dedup state held while appending to one buffer.
///
/// A `SWITCH_*` marker is emitted if and only if the corresponding value
/// differs from what was last written to this buffer; consecutive writes to
/// the same (type, id, field) never re-emit markers. Reset whenever a new
/// buffer begins.
#[derive(Debug, Default)]
pub struct EncodeCursor {
    /// Last written 2-byte type tag.
    pub tag: Option<u16>,
    /// Last written property id.
    pub prop: Option<PropId>,
    /// Last written node id.
    pub node: Option<NodeId>,
    /// Start offset of the current node's main-region image, if emitted.
    pub main_start: Option<usize>,
    /// Start offset of the current node's update mask (updates only).
    pub mask_start: Option<usize>,
}

impl EncodeCursor {
    /// Fresh cursor for a new buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything; the next write re-emits all markers.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Called after emitting `SWITCH_TYPE`: field, id, and main-region
    /// state no longer apply.
    pub fn on_type_switch(&mut self, tag: u16) {
        self.tag = Some(tag);
        self.prop = None;
        self.node = None;
        self.main_start = None;
        self.mask_start = None;
    }

    /// Called after emitting a `SWITCH_ID_*`: the main region of the
    /// previous node is closed.
    pub fn on_id_switch(&mut self, node: NodeId) {
        self.node = Some(node);
        self.main_start = None;
        self.mask_start = None;
    }
}
