//! Query-compiler acceptance: section framing, filter equivalences, and
//! the schema-checksum trailer.

use umbra::query::compile::sections;
use umbra::query::{CmpOp, QueryBuilder};
use umbra::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};

fn schema() -> Schema {
    Schema::compile(
        &SchemaDecl::new()
            .ty(TypeDecl::new("user")
                .prop(PropDecl::new("isNice", PropKind::Boolean))
                .prop(PropDecl::new("age", PropKind::Uint16))
                .prop(PropDecl::new("email", PropKind::Alias))
                .prop(PropDecl::new("name", PropKind::String))
                .prop(
                    PropDecl::new("posts", PropKind::References)
                        .with_target("post")
                        .with_reciprocal("author"),
                ))
            .ty(TypeDecl::new("post")
                .prop(PropDecl::new("title", PropKind::String))
                .prop(
                    PropDecl::new("author", PropKind::Reference)
                        .with_target("user")
                        .with_reciprocal("posts"),
                )),
    )
    .unwrap()
}

#[test]
fn every_buffer_trails_its_schema_checksum() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .filter_flag("isNice")
        .include(["isNice"])
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert_eq!(split.schema, schema.hash().0);
}

#[test]
fn boolean_eq_filter_has_one_payload_byte() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .filter("isNice", "=", true)
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert_eq!(split.filter[3], CmpOp::Eq as u8);
    let len = u16::from_le_bytes(split.filter[4..6].try_into().unwrap());
    assert_eq!(len, 1);
    assert_eq!(split.filter[6], 1);
}

#[test]
fn bare_filter_is_equal_true() {
    let schema = schema();
    let explicit = QueryBuilder::new("user")
        .filter("isNice", "=", true)
        .compile(&schema)
        .unwrap();
    let bare = QueryBuilder::new("user")
        .filter_flag("isNice")
        .compile(&schema)
        .unwrap();
    assert_eq!(explicit.bytes, bare.bytes);
}

#[test]
fn recompiling_after_an_ast_change_differs() {
    let schema = schema();
    let a = QueryBuilder::new("user")
        .filter("age", ">", 30i64)
        .compile(&schema)
        .unwrap();
    let b = QueryBuilder::new("user")
        .filter("age", ">", 31i64)
        .compile(&schema)
        .unwrap();
    assert_ne!(a.bytes, b.bytes);

    let again = QueryBuilder::new("user")
        .filter("age", ">", 30i64)
        .compile(&schema)
        .unwrap();
    assert_eq!(a.bytes, again.bytes, "byte-code is cacheable by AST equality");
}

#[test]
fn recompiling_under_a_new_schema_changes_the_trailer() {
    let schema_a = schema();
    let schema_b = Schema::compile(
        &SchemaDecl::new().ty(TypeDecl::new("user")
            .prop(PropDecl::new("isNice", PropKind::Boolean))),
    )
    .unwrap();
    let build = || QueryBuilder::new("user").filter_flag("isNice");
    let a = build().compile(&schema_a).unwrap();
    let b = build().compile(&schema_b).unwrap();
    assert_ne!(
        sections::split(&a.bytes).unwrap().schema,
        sections::split(&b.bytes).unwrap().schema
    );
}

#[test]
fn alias_target_is_property_plus_hash() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .alias("email", "a@b.c")
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert_eq!(split.kind, 3);
    assert_eq!(split.target.len(), 2 + 1 + 8);
    assert_eq!(split.target[2], 3, "email is property id 3");
}

#[test]
fn include_wildcards_expand_before_encoding() {
    let schema = schema();
    let star = QueryBuilder::new("user")
        .include(["*"])
        .compile(&schema)
        .unwrap();
    assert_eq!(star.include.fields.len(), 4); // all scalars, no refs
    assert!(star.include.refs.is_empty());

    let deep = QueryBuilder::new("user")
        .include(["**"])
        .compile(&schema)
        .unwrap();
    assert_eq!(deep.include.refs.len(), 1);
    assert_eq!(deep.include.refs[0].target.name, "post");
}

#[test]
fn nested_ref_includes_compile_recursively() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .include_ref("posts", |sub| {
            sub.filter("title", "!=", "draft").include(["title"]).range(0, 10)
        })
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert!(!split.include.is_empty());
    let descend = &compiled.include.refs[0];
    assert!(descend.filter.is_some());
    assert_eq!(descend.range.unwrap().limit, 10);
}

#[test]
fn mixed_filters_and_sort_sections_coexist() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .filter("age", ">=", 18i64)
        .filter_or(|or| {
            or.branch(|b| b.filter_flag("isNice"));
            or.branch(|b| b.filter("age", ">", 65i64));
        })
        .sort_desc("age")
        .range(5, 20)
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert!(!split.filter.is_empty());
    assert!(!split.sort.is_empty());
    assert_eq!(split.range, (5, 20));
    assert_eq!(split.sort[2], 1, "descending flag");
}

#[test]
fn filter_on_unknown_property_fails_compile() {
    let schema = schema();
    let err = QueryBuilder::new("user")
        .filter("ghost", "=", 1i64)
        .compile(&schema)
        .unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}

#[test]
fn search_section_lists_text_fields_and_query() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .search("ada", ["name"])
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    assert_eq!(split.search[0], 1);
    assert_eq!(split.search[1], 4, "name is property id 4");
    assert_eq!(&split.search[2..], b"ada");
}

#[test]
fn large_id_sets_sort_and_dedup() {
    let schema = schema();
    let compiled = QueryBuilder::new("user")
        .ids([7, 3, 9, 3, 1])
        .compile(&schema)
        .unwrap();
    let split = sections::split(&compiled.bytes).unwrap();
    let n = u32::from_le_bytes(split.target[2..6].try_into().unwrap());
    assert_eq!(n, 4);
    let ids: Vec<u32> = split.target[6..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(ids, vec![1, 3, 7, 9]);
}
