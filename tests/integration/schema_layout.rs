//! Layout-model acceptance: deterministic compilation, offsets, defaults,
//! and path-qualified declaration errors.

use umbra::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
use umbra::types::PropId;
use umbra::UmbraError;

fn blog_decl() -> SchemaDecl {
    SchemaDecl::new()
        .locale("en")
        .locale("de")
        .ty(TypeDecl::new("user")
            .prop(PropDecl::new("isNice", PropKind::Boolean))
            .prop(PropDecl::new("karma", PropKind::Int32).with_default(serde_json::json!(10)))
            .prop(PropDecl::new("email", PropKind::Alias))
            .prop(PropDecl::new("bio", PropKind::Text))
            .prop(
                PropDecl::new("posts", PropKind::References)
                    .with_target("post")
                    .with_reciprocal("author"),
            ))
        .ty(TypeDecl::new("post")
            .prop(PropDecl::new("title", PropKind::String))
            .prop(PropDecl::new("rank", PropKind::Number))
            .prop(
                PropDecl::new("author", PropKind::Reference)
                    .with_target("user")
                    .with_reciprocal("posts"),
            ))
}

#[test]
fn compilation_is_deterministic() {
    let a = Schema::compile(&blog_decl()).unwrap();
    let b = Schema::compile(&blog_decl()).unwrap();
    assert_eq!(a.hash(), b.hash());
    for (la, lb) in a.types().iter().zip(b.types()) {
        assert_eq!(la.main_len, lb.main_len);
        assert_eq!(la.separate, lb.separate);
    }
}

#[test]
fn ids_and_offsets_follow_declaration_order() {
    let schema = Schema::compile(&blog_decl()).unwrap();
    let user = schema.layout("user").unwrap();
    assert_eq!(user.prop_by_path("isNice").unwrap().id, PropId(1));
    assert_eq!(user.prop_by_path("karma").unwrap().id, PropId(2));
    assert_eq!(user.prop_by_path("posts").unwrap().id, PropId(5));

    let is_nice = user.prop_by_path("isNice").unwrap();
    let karma = user.prop_by_path("karma").unwrap();
    assert_eq!((is_nice.offset, is_nice.len), (0, 1));
    assert_eq!((karma.offset, karma.len), (1, 4));
    assert_eq!(user.main_len, 5);
}

#[test]
fn defaults_image_reflects_declared_defaults() {
    let schema = Schema::compile(&blog_decl()).unwrap();
    let user = schema.layout("user").unwrap();
    assert_eq!(user.main_default[0], 0, "booleans default to false");
    assert_eq!(
        i32::from_le_bytes(user.main_default[1..5].try_into().unwrap()),
        10
    );
}

#[test]
fn separate_properties_keep_declaration_order() {
    let schema = Schema::compile(&blog_decl()).unwrap();
    let user = schema.layout("user").unwrap();
    let paths: Vec<&str> = user
        .separate
        .iter()
        .map(|id| user.prop(*id).unwrap().path.as_str())
        .collect();
    assert_eq!(paths, vec!["email", "bio", "posts"]);
}

#[test]
fn unknown_kind_in_json_fails_before_any_encode() {
    let err = SchemaDecl::from_json(
        r#"{"types": [{"name": "t", "props": [{"name": "x", "kind": "quaternion"}]}]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, UmbraError::Invalid(_)));
}

#[test]
fn oversized_main_region_is_rejected() {
    let mut ty = TypeDecl::new("wide");
    for i in 0..250 {
        ty = ty.prop(PropDecl::new(format!("n{i}"), PropKind::Number));
    }
    // 250 * 8 = 2000 bytes fits; the property-count ceiling binds first.
    assert!(Schema::compile(&SchemaDecl::new().ty(ty.clone())).is_ok());
    let err = Schema::compile(
        &SchemaDecl::new().ty(ty.prop(PropDecl::new("overflow", PropKind::Number))),
    )
    .unwrap_err();
    assert!(err.to_string().contains("properties"), "{err}");
}

#[test]
fn schema_replacement_is_wholesale() {
    let schema = Schema::compile(&blog_decl()).unwrap();
    let user = schema.layout("user").unwrap();
    user.next_id().unwrap();
    user.next_id().unwrap();
    assert_eq!(user.last_id(), 2);

    // A recompile of the same declaration starts fresh: layouts are
    // replaced, never mutated in place.
    let replacement = Schema::compile(&blog_decl()).unwrap();
    assert_eq!(replacement.layout("user").unwrap().last_id(), 0);
}
