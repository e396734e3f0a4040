//! End-to-end client → engine → client round trips over the in-memory
//! engine: id reconciliation, defaults, schema-change cancellation.

use std::sync::Arc;

use umbra::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
use umbra::testkit::MemoryEngine;
use umbra::types::payload;
use umbra::{ClientConfig, DecodedValue, NodeId, Settlement, Umbra, UmbraError, Value};

fn user_decl() -> SchemaDecl {
    SchemaDecl::new().ty(TypeDecl::new("user")
        .prop(PropDecl::new("isNice", PropKind::Boolean))
        .prop(PropDecl::new("age", PropKind::Uint16))
        .prop(PropDecl::new("name", PropKind::String))
        .prop(PropDecl::new("motto", PropKind::String).with_default(serde_json::json!("hello"))))
}

fn open(decl: &SchemaDecl, config: ClientConfig) -> (Umbra, Arc<MemoryEngine>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let schema = Arc::new(Schema::compile(decl).unwrap());
    let engine = Arc::new(MemoryEngine::new(schema));
    let db = Umbra::open(config, engine.clone());
    db.set_schema(decl).unwrap();
    (db, engine)
}

#[test]
fn three_creates_round_trip_with_boolean_defaults() {
    let decl = SchemaDecl::new().ty(TypeDecl::new("user")
        .prop(PropDecl::new("isNice", PropKind::Boolean)));
    let (db, _engine) = open(&decl, ClientConfig::default());

    let h1 = db.create("user", payload([])).unwrap();
    let h2 = db.create("user", payload([("isNice", Value::Bool(true))])).unwrap();
    let h3 = db.create("user", payload([("isNice", Value::Bool(false))])).unwrap();
    db.drain();

    assert_eq!(h1.wait().unwrap(), Settlement::Created(NodeId(1)));
    assert_eq!(h2.wait().unwrap(), Settlement::Created(NodeId(2)));
    assert_eq!(h3.wait().unwrap(), Settlement::Created(NodeId(3)));

    let items = db.query("user").include(["isNice"]).run(&db).unwrap();
    let got: Vec<(u32, bool)> = items
        .iter()
        .map(|item| {
            (
                item.id.0,
                item.get("isNice").unwrap().as_bool().unwrap(),
            )
        })
        .collect();
    assert_eq!(got, vec![(1, false), (2, true), (3, false)]);
}

#[test]
fn omitted_separate_defaults_are_engine_filled() {
    let (db, _engine) = open(&user_decl(), ClientConfig::default());
    let with_motto = db
        .create("user", payload([("motto", Value::from("custom"))]))
        .unwrap();
    let without = db.create("user", payload([])).unwrap();
    db.drain();
    with_motto.wait().unwrap();
    without.wait().unwrap();

    let items = db.query("user").include(["motto"]).run(&db).unwrap();
    assert_eq!(items[0].get("motto").unwrap().as_str(), Some("custom"));
    assert_eq!(items[1].get("motto").unwrap().as_str(), Some("hello"));
}

#[test]
fn engine_offsets_shift_every_provisional_id() {
    let decl = user_decl();
    let schema = Arc::new(Schema::compile(&decl).unwrap());
    let engine = Arc::new(MemoryEngine::new(schema).with_offset(1, 100));
    let db = Umbra::open(ClientConfig::default(), engine);
    db.set_schema(&decl).unwrap();

    let h1 = db.create("user", payload([])).unwrap();
    let h2 = db.create("user", payload([])).unwrap();
    db.drain();
    assert_eq!(h1.wait().unwrap(), Settlement::Created(NodeId(101)));
    assert_eq!(h2.wait().unwrap(), Settlement::Created(NodeId(102)));

    let items = db.query("user").run(&db).unwrap();
    let ids: Vec<u32> = items.iter().map(|i| i.id.0).collect();
    assert_eq!(ids, vec![101, 102]);
}

#[test]
fn references_to_pending_creates_resolve_through_tmp_ids() {
    let decl = SchemaDecl::new()
        .ty(TypeDecl::new("user")
            .prop(PropDecl::new("name", PropKind::String))
            .prop(PropDecl::new("friends", PropKind::References).with_target("user")))
        ;
    let schema = Arc::new(Schema::compile(&decl).unwrap());
    let engine = Arc::new(MemoryEngine::new(schema).with_offset(1, 10));
    // Both creates must share a batch: provisional ids only resolve within
    // the buffer they were issued against.
    let config = ClientConfig {
        drain_interval_ms: 60_000,
        ..ClientConfig::default()
    };
    let db = Umbra::open(config, engine);
    db.set_schema(&decl).unwrap();

    let a = db.create("user", payload([])).unwrap();
    let b_refs = vec![umbra::RefEntry::plain(a.node_id().unwrap())];
    let b = db
        .create("user", payload([("friends", Value::Refs(b_refs))]))
        .unwrap();
    db.drain();
    let a_final = match a.wait().unwrap() {
        Settlement::Created(id) => id,
        other => panic!("unexpected settlement {other:?}"),
    };
    b.wait().unwrap();

    let items = db.query("user").include(["friends"]).run(&db).unwrap();
    let with_friends = items.iter().find(|i| i.get("friends").is_some()).unwrap();
    assert_eq!(
        with_friends.get("friends").unwrap(),
        &DecodedValue::Refs(vec![a_final]),
        "tmp id translated by the engine offset map"
    );
}

#[test]
fn schema_change_cancels_accumulating_batches_atomically() {
    let config = ClientConfig {
        drain_interval_ms: 60_000, // keep the batch accumulating
        ..ClientConfig::default()
    };
    let (db, engine) = open(&user_decl(), config);

    let h1 = db.create("user", payload([])).unwrap();
    let h2 = db
        .update("user", NodeId(1), payload([("age", Value::Uint(9))]))
        .unwrap();

    db.set_schema(&user_decl()).unwrap();

    assert!(matches!(h1.wait(), Err(UmbraError::SchemaChanged)));
    assert!(matches!(h2.wait(), Err(UmbraError::SchemaChanged)));
    db.drain();
    assert_eq!(engine.node_count("user"), 0, "no bytes reached the engine");
}

#[test]
fn writes_after_a_schema_change_start_a_fresh_batch() {
    let config = ClientConfig {
        drain_interval_ms: 60_000,
        ..ClientConfig::default()
    };
    let (db, _engine) = open(&user_decl(), config);
    let lost = db.create("user", payload([])).unwrap();
    db.set_schema(&user_decl()).unwrap();
    assert!(matches!(lost.wait(), Err(UmbraError::SchemaChanged)));

    let kept = db.create("user", payload([])).unwrap();
    db.drain();
    assert_eq!(kept.wait().unwrap(), Settlement::Created(NodeId(1)));
}

#[test]
fn increments_apply_without_a_prior_read() {
    let (db, _engine) = open(&user_decl(), ClientConfig::default());
    let h = db
        .create("user", payload([("age", Value::Uint(40))]))
        .unwrap();
    db.drain();
    let id = match h.wait().unwrap() {
        Settlement::Created(id) => id,
        other => panic!("unexpected settlement {other:?}"),
    };

    db.increment("user", id, "age", 5i64).unwrap();
    db.increment("user", id, "age", -3i64).unwrap();
    db.drain();

    let items = db.query("user").include(["age"]).run(&db).unwrap();
    assert_eq!(items[0].get("age").unwrap().as_i64(), Some(42));
}

#[test]
fn update_patches_only_named_fields() {
    let (db, _engine) = open(&user_decl(), ClientConfig::default());
    let h = db
        .create(
            "user",
            payload([("isNice", Value::Bool(true)), ("age", Value::Uint(30))]),
        )
        .unwrap();
    db.drain();
    let id = match h.wait().unwrap() {
        Settlement::Created(id) => id,
        other => panic!("unexpected settlement {other:?}"),
    };

    db.update("user", id, payload([("age", Value::Uint(31))])).unwrap();
    db.drain();

    let items = db.query("user").include(["isNice", "age"]).run(&db).unwrap();
    assert_eq!(items[0].get("isNice").unwrap().as_bool(), Some(true));
    assert_eq!(items[0].get("age").unwrap().as_i64(), Some(31));
}

#[test]
fn delete_removes_the_node() {
    let (db, engine) = open(&user_decl(), ClientConfig::default());
    let h = db.create("user", payload([])).unwrap();
    db.drain();
    let id = match h.wait().unwrap() {
        Settlement::Created(id) => id,
        other => panic!("unexpected settlement {other:?}"),
    };
    assert_eq!(engine.node_count("user"), 1);

    db.delete("user", id).unwrap();
    db.drain();
    assert_eq!(engine.node_count("user"), 0);
}

#[test]
fn deferred_flush_coalesces_without_an_explicit_drain() {
    let config = ClientConfig {
        drain_interval_ms: 5,
        ..ClientConfig::default()
    };
    let (db, _engine) = open(&user_decl(), config);
    let handle = db.create("user", payload([])).unwrap();
    // No drain(): the worker's timer seals the accumulating batch.
    let settled = handle
        .wait_timeout(std::time::Duration::from_secs(5))
        .expect("timer flush settles the batch");
    assert_eq!(settled.unwrap(), Settlement::Created(NodeId(1)));
}

#[test]
fn upsert_requires_and_uses_an_alias() {
    let decl = SchemaDecl::new().ty(TypeDecl::new("account")
        .prop(PropDecl::new("email", PropKind::Alias))
        .prop(PropDecl::new("visits", PropKind::Uint32)));
    let (db, _engine) = open(&decl, ClientConfig::default());

    assert!(db
        .upsert("account", payload([("visits", Value::Uint(1))]))
        .is_err());

    let h = db
        .upsert(
            "account",
            payload([("email", Value::from("a@b.c")), ("visits", Value::Uint(1))]),
        )
        .unwrap();
    db.drain();
    assert!(matches!(h.wait().unwrap(), Settlement::Created(_)));

    let items = db.query("account").alias("email", "a@b.c").run(&db).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("visits").unwrap().as_i64(), Some(1));
}
