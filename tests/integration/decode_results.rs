//! Result-decoder acceptance: idempotence, laziness against the same
//! buffer, integrity failures, and nested reference expansion.

use std::sync::Arc;

use umbra::decode::decode_items;
use umbra::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
use umbra::testkit::MemoryEngine;
use umbra::types::payload;
use umbra::{ClientConfig, DecodedValue, QueryBuilder, Settlement, Umbra, UmbraError, Value};

fn blog_decl() -> SchemaDecl {
    SchemaDecl::new()
        .ty(TypeDecl::new("user")
            .prop(PropDecl::new("name", PropKind::String))
            .prop(PropDecl::new("karma", PropKind::Int32))
            .prop(
                PropDecl::new("posts", PropKind::References)
                    .with_target("post")
                    .with_reciprocal("author"),
            ))
        .ty(TypeDecl::new("post")
            .prop(PropDecl::new("title", PropKind::String))
            .prop(PropDecl::new("stars", PropKind::Uint16))
            .prop(
                PropDecl::new("author", PropKind::Reference)
                    .with_target("user")
                    .with_reciprocal("posts"),
            ))
}

fn seeded() -> (Umbra, Arc<Schema>) {
    let decl = blog_decl();
    let schema = Arc::new(Schema::compile(&decl).unwrap());
    let engine = Arc::new(MemoryEngine::new(schema.clone()));
    let db = Umbra::open(ClientConfig::default(), engine);
    db.set_schema(&decl).unwrap();

    let p1 = db
        .create(
            "post",
            payload([("title", Value::from("first")), ("stars", Value::Uint(5))]),
        )
        .unwrap();
    let p2 = db
        .create(
            "post",
            payload([("title", Value::from("second")), ("stars", Value::Uint(1))]),
        )
        .unwrap();
    let refs = vec![
        umbra::RefEntry::plain(p1.node_id().unwrap()),
        umbra::RefEntry::plain(p2.node_id().unwrap()),
    ];
    db.create(
        "user",
        payload([
            ("name", Value::from("ada")),
            ("karma", Value::Int(7)),
            ("posts", Value::Refs(refs)),
        ]),
    )
    .unwrap();
    db.drain();
    (db, schema)
}

#[test]
fn zero_count_decodes_to_an_empty_sequence() {
    let (db, _schema) = seeded();
    let items = db
        .query("user")
        .filter("karma", ">", 1000i64)
        .run(&db)
        .unwrap();
    assert!(items.is_empty());
}

#[test]
fn decoding_twice_yields_identical_output() {
    let (db, schema) = seeded();
    let compiled = QueryBuilder::new("user")
        .include(["name", "karma"])
        .compile(&schema)
        .unwrap();
    // Run the byte-code once, decode the same response buffer twice.
    let items_a = db.run_compiled(&compiled).unwrap();
    let items_b = db.run_compiled(&compiled).unwrap();
    assert_eq!(items_a, items_b);
}

#[test]
fn nested_reference_sections_expand_recursively() {
    let (db, _schema) = seeded();
    let items = db
        .query("user")
        .include(["name"])
        .include_ref("posts", |sub| sub.include(["title", "stars"]).sort("stars", false))
        .run(&db)
        .unwrap();
    assert_eq!(items.len(), 1);
    let posts = match items[0].get("posts").unwrap() {
        DecodedValue::Items(items) => items,
        other => panic!("expected nested items, got {other:?}"),
    };
    assert_eq!(posts.len(), 2);
    let titles: Vec<&str> = posts
        .iter()
        .map(|p| p.get("title").unwrap().as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["second", "first"], "sorted by stars ascending");
}

#[test]
fn nested_filters_apply_to_referenced_nodes() {
    let (db, _schema) = seeded();
    let items = db
        .query("user")
        .include_ref("posts", |sub| sub.filter("stars", ">=", 5i64).include(["title"]))
        .run(&db)
        .unwrap();
    let posts = match items[0].get("posts").unwrap() {
        DecodedValue::Items(items) => items,
        other => panic!("expected nested items, got {other:?}"),
    };
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].get("title").unwrap().as_str(), Some("first"));
}

#[test]
fn search_narrows_by_case_insensitive_substring() {
    let (db, _schema) = seeded();
    let items = db
        .query("post")
        .search("SEC", ["title"])
        .include(["title"])
        .run(&db)
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("title").unwrap().as_str(), Some("second"));
}

#[test]
fn json_view_nests_dotted_paths() {
    let (db, _schema) = seeded();
    let items = db.query("user").include(["name", "karma"]).run(&db).unwrap();
    let json = items[0].to_json();
    assert_eq!(json["name"], "ada");
    assert_eq!(json["karma"], 7);
}

#[test]
fn corrupted_separate_payload_is_an_integrity_error() {
    use umbra::encode::writers::{self, WriteCtx};
    use umbra::types::LocaleId;

    let decl = blog_decl();
    let schema = Schema::compile(&decl).unwrap();
    let layout = schema.layout("user").unwrap();
    let def = layout.prop_by_path("name").unwrap();
    let ctx = WriteCtx {
        locale: Some(LocaleId(0)),
        compression_threshold: 1024,
    };
    let mut stored = writers::separate_payload(def, &Value::from("ada"), &ctx).unwrap();
    stored.body[1] ^= 0x40;
    let err = umbra::decode::decode_separate(def, stored.flags, &stored.body).unwrap_err();
    assert!(matches!(err, UmbraError::Integrity(_)));
}

#[test]
fn stale_byte_code_surfaces_as_stale_query() {
    // Engine compiled under a different schema than the byte-code.
    let engine_decl = SchemaDecl::new().ty(TypeDecl::new("user")
        .prop(PropDecl::new("name", PropKind::String)));
    let engine_schema = Arc::new(Schema::compile(&engine_decl).unwrap());
    let engine = Arc::new(MemoryEngine::new(engine_schema));
    let db = Umbra::open(ClientConfig::default(), engine);
    db.set_schema(&blog_decl()).unwrap();

    let err = db.query("user").include(["name"]).run(&db).unwrap_err();
    assert!(matches!(err, UmbraError::StaleQuery));
}

#[test]
fn truncated_result_buffers_are_corruption_not_panics() {
    let decl = blog_decl();
    let schema = Schema::compile(&decl).unwrap();
    let layout = schema.layout("user").unwrap();
    let compiled = QueryBuilder::new("user")
        .include(["karma"])
        .compile(&schema)
        .unwrap();

    // count=1 but no item bytes follow.
    let bogus = bytes::Bytes::from(vec![1, 0, 0, 0]);
    let err = decode_items(layout, &compiled.include, &bogus).unwrap_err();
    assert!(matches!(err, UmbraError::Corruption(_)));
}

#[test]
fn settlement_reports_created_ids_for_queryable_nodes() {
    let (db, _schema) = seeded();
    let extra = db.create("user", payload([("karma", Value::Int(1))])).unwrap();
    db.drain();
    let id = match extra.wait().unwrap() {
        Settlement::Created(id) => id,
        other => panic!("unexpected settlement {other:?}"),
    };
    let items = db.query("user").ids([id.0]).include(["karma"]).run(&db).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
}
