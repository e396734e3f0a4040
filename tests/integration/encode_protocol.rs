//! Mutation-encoder acceptance: cursor dedup, buffer boundaries, and
//! payload shapes, checked by parsing the emitted opcode stream.

use proptest::prelude::*;

use umbra::encode::{MutationEncoder, Opcode, PendingBatch};
use umbra::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
use umbra::types::{payload, NodeId, RefEntry, Value};
use umbra::{ClientConfig, UmbraError};

fn user_schema() -> Schema {
    Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("user")
        .prop(PropDecl::new("isNice", PropKind::Boolean))
        .prop(PropDecl::new("name", PropKind::String))
        .prop(PropDecl::new("friends", PropKind::References).with_target("user"))))
    .unwrap()
}

/// Minimal stream walker: yields the opcodes in marker order, skipping
/// operand bytes by grammar. Mask widths come from the layout.
fn opcodes(schema: &Schema, buf: &[u8]) -> Vec<Opcode> {
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut field = 0u8;
    while i < buf.len() {
        let op = Opcode::from_u8(buf[i]).expect("valid opcode");
        i += 1;
        out.push(op);
        match op {
            Opcode::SwitchType => {
                let tag = u16::from_le_bytes([buf[i], buf[i + 1]]);
                assert!(
                    schema.types().iter().any(|l| l.tag.0 == tag),
                    "unknown type tag in stream"
                );
                i += 2;
            }
            Opcode::SwitchField => {
                field = buf[i];
                i += 2;
            }
            Opcode::SwitchIdCreate | Opcode::SwitchIdUpdate => i += 4,
            Opcode::Create | Opcode::Update => {
                if field == 0 {
                    let len = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap()) as usize;
                    i += 4 + len;
                } else {
                    let len =
                        u32::from_le_bytes(buf[i + 1..i + 5].try_into().unwrap()) as usize;
                    i += 1 + 4 + len;
                }
            }
            Opcode::DeleteNode => {}
            Opcode::DeleteSortIndex => i += 1,
            Opcode::Increment | Opcode::Decrement => {
                let tag = umbra::schema::TypeTag::from_u8(buf[i]).expect("fixed tag");
                i += 3 + tag.fixed_width().expect("fixed width");
            }
            Opcode::Expire => i += 4,
        }
    }
    out
}

#[test]
fn one_switch_marker_per_distinct_transition() {
    let schema = user_schema();
    let config = ClientConfig::default();
    let mut batch = PendingBatch::new(schema.hash(), 1 << 16, 0);
    let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();

    // Three writes to the same (type, id, field): markers once.
    for value in [true, false, true] {
        enc.update("user", NodeId(7), &payload([("isNice", Value::Bool(value))]))
            .unwrap();
    }
    let ops = opcodes(&schema, &batch.buf);
    let count = |needle: Opcode| ops.iter().filter(|&&op| op == needle).count();
    assert_eq!(count(Opcode::SwitchType), 1);
    assert_eq!(count(Opcode::SwitchField), 1);
    assert_eq!(count(Opcode::SwitchIdUpdate), 1);
    assert_eq!(count(Opcode::Update), 1, "one region, two in-place patches");
}

#[test]
fn exact_fit_succeeds_and_advances_exactly() {
    let schema = user_schema();
    let config = ClientConfig::default();
    // Bare create: type(3) + field(3) + id(5) + opcode(1) + len(4) + image(1).
    let exact = 17;
    let mut batch = PendingBatch::new(schema.hash(), exact, 0);
    let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();
    enc.create("user", &payload([])).unwrap().handle();
    assert_eq!(batch.len(), exact);

    let mut small = PendingBatch::new(schema.hash(), exact - 1, 0);
    let mut enc = MutationEncoder::new(&schema, &mut small, &config).unwrap();
    let err = enc.create("user", &payload([])).unwrap_err();
    assert!(matches!(err, UmbraError::Size { .. }));
    assert_eq!(small.len(), 0, "failed op leaves the buffer unchanged");
}

#[test]
fn hundred_references_serialize_to_four_hundred_payload_bytes() {
    let schema = user_schema();
    let config = ClientConfig::default();
    for reversed in [false, true] {
        let mut ids: Vec<u32> = (1..=100).collect();
        if reversed {
            ids.reverse();
        }
        let refs: Vec<RefEntry> = ids.into_iter().map(|i| RefEntry::plain(NodeId(i))).collect();
        let mut batch = PendingBatch::new(schema.hash(), 1 << 16, 0);
        let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();
        enc.update("user", NodeId(1), &payload([("friends", Value::Refs(refs))]))
            .unwrap();
        // type(3) + field(3) + id(5) + opcode(1) + flags(1) + len(4) + 400.
        assert_eq!(batch.len(), 17 + 400);
    }
}

#[test]
fn null_clears_with_a_zero_length_marker() {
    let schema = user_schema();
    let config = ClientConfig::default();
    let mut batch = PendingBatch::new(schema.hash(), 1 << 16, 0);
    let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();
    enc.update("user", NodeId(1), &payload([("name", Value::Null)]))
        .unwrap();
    let tail = &batch.buf[batch.buf.len() - 6..];
    assert_eq!(tail[0], Opcode::Update as u8);
    assert_eq!(tail[1], 0, "no flags");
    assert_eq!(u32::from_le_bytes(tail[2..6].try_into().unwrap()), 0);
}

#[test]
fn delete_and_expire_share_the_cursor() {
    let schema = user_schema();
    let config = ClientConfig::default();
    let mut batch = PendingBatch::new(schema.hash(), 1 << 16, 0);
    let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();
    enc.expire("user", NodeId(3), 60).unwrap();
    enc.delete("user", NodeId(3)).unwrap();
    let ops = opcodes(&schema, &batch.buf);
    assert_eq!(
        ops,
        vec![
            Opcode::SwitchType,
            Opcode::SwitchIdUpdate,
            Opcode::Expire,
            Opcode::DeleteNode
        ],
        "second op re-uses type and id markers"
    );
}

proptest! {
    #[test]
    fn switch_id_markers_match_id_transitions(ids in proptest::collection::vec(1u32..5, 1..40)) {
        let schema = user_schema();
        let config = ClientConfig::default();
        let mut batch = PendingBatch::new(schema.hash(), 1 << 20, 0);
        let mut enc = MutationEncoder::new(&schema, &mut batch, &config).unwrap();
        for &id in &ids {
            enc.update("user", NodeId(id), &payload([("isNice", Value::Bool(true))]))
                .unwrap();
        }
        let expected: usize = 1 + ids.windows(2).filter(|w| w[0] != w[1]).count();
        let ops = opcodes(&schema, &batch.buf);
        let switches = ops.iter().filter(|&&op| op == Opcode::SwitchIdUpdate).count();
        prop_assert_eq!(switches, expected);
        let type_switches = ops.iter().filter(|&&op| op == Opcode::SwitchType).count();
        prop_assert_eq!(type_switches, 1);
    }
}
