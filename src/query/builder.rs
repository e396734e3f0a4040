//! Fluent query builder. Errors are deferred: a bad call poisons the
//! builder and surfaces once at build/compile time, so call chains stay
//! unconditional.

use crate::error::{Result, UmbraError};
use crate::query::ast::{
    CmpOp, FilterLeaf, FilterNode, IncludeItem, QueryAst, QueryRange, SearchSpec, SortSpec, SubAst,
    Target,
};
use crate::query::compile::{compile_with_threshold, CompiledQuery};
use crate::schema::Schema;
use crate::types::{NodeId, Value};

/// Builds a [`QueryAst`] through chained calls.
#[derive(Debug)]
pub struct QueryBuilder {
    ast: QueryAst,
    error: Option<UmbraError>,
}

impl QueryBuilder {
    /// Starts a query over every node of a type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            ast: QueryAst::scan(type_name),
            error: None,
        }
    }

    fn poisoned(&self) -> bool {
        self.error.is_some()
    }

    /// Targets a single node.
    pub fn id(mut self, id: impl Into<NodeId>) -> Self {
        if self.poisoned() {
            return self;
        }
        let ty = self.ast.target.type_name().to_owned();
        self.ast.target = Target::Id(ty, id.into());
        self
    }

    /// Targets a set of nodes; sorted ascending at compile time.
    pub fn ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        if self.poisoned() {
            return self;
        }
        let ty = self.ast.target.type_name().to_owned();
        self.ast.target = Target::Ids(ty, ids.into_iter().map(NodeId).collect());
        self
    }

    /// Targets the node holding an alias value.
    pub fn alias(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        if self.poisoned() {
            return self;
        }
        let ty = self.ast.target.type_name().to_owned();
        self.ast.target = Target::Alias {
            ty,
            path: path.into(),
            value: value.into(),
        };
        self
    }

    fn push_filter(&mut self, node: FilterNode) {
        self.ast.filter = Some(match self.ast.filter.take() {
            Some(existing) => existing.and(node),
            None => node,
        });
    }

    /// Adds one comparison to the AND list.
    pub fn filter(mut self, path: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        if self.poisoned() {
            return self;
        }
        match CmpOp::parse(op) {
            Ok(op) => self.push_filter(FilterNode::Leaf(FilterLeaf {
                path: path.into(),
                op,
                values: vec![value.into()],
            })),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Bare boolean filter: `filter_flag("isNice")` is `isNice = true`.
    pub fn filter_flag(self, path: impl Into<String>) -> Self {
        self.filter(path, "=", true)
    }

    /// Equality over a set of values.
    pub fn filter_in(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        if self.poisoned() {
            return self;
        }
        self.push_filter(FilterNode::Leaf(FilterLeaf {
            path: path.into(),
            op: CmpOp::In,
            values: values.into_iter().collect(),
        }));
        self
    }

    /// Closed-interval filter.
    pub fn filter_range(
        mut self,
        path: impl Into<String>,
        lo: impl Into<Value>,
        hi: impl Into<Value>,
    ) -> Self {
        if self.poisoned() {
            return self;
        }
        self.push_filter(FilterNode::Leaf(FilterLeaf {
            path: path.into(),
            op: CmpOp::Range,
            values: vec![lo.into(), hi.into()],
        }));
        self
    }

    /// Adds an OR branch set; each branch is an AND list built through the
    /// closure.
    pub fn filter_or<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut OrBuilder),
    {
        if self.poisoned() {
            return self;
        }
        let mut or = OrBuilder {
            branches: Vec::new(),
            error: None,
        };
        build(&mut or);
        if let Some(err) = or.error {
            self.error = Some(err);
            return self;
        }
        if or.branches.is_empty() {
            self.error = Some(UmbraError::invalid("or() requires at least one branch"));
            return self;
        }
        self.push_filter(FilterNode::Or(or.branches));
        self
    }

    /// Ascending sort.
    pub fn sort(mut self, path: impl Into<String>) -> Self {
        if self.poisoned() {
            return self;
        }
        self.ast.sort = Some(SortSpec {
            path: path.into(),
            descending: false,
        });
        self
    }

    /// Descending sort.
    pub fn sort_desc(mut self, path: impl Into<String>) -> Self {
        if self.poisoned() {
            return self;
        }
        self.ast.sort = Some(SortSpec {
            path: path.into(),
            descending: true,
        });
        self
    }

    /// Result window.
    pub fn range(mut self, offset: u32, limit: u32) -> Self {
        if self.poisoned() {
            return self;
        }
        self.ast.range = Some(QueryRange { offset, limit });
        self
    }

    /// Includes field paths (`*` and `**` wildcards allowed).
    pub fn include<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        if self.poisoned() {
            return self;
        }
        for path in paths {
            self.ast.include.push(IncludeItem::Path(path.into()));
        }
        self
    }

    /// Includes a reference descend with its own filter/sort/range.
    pub fn include_ref<F>(mut self, path: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(SubBuilder) -> SubBuilder,
    {
        if self.poisoned() {
            return self;
        }
        let sub = build(SubBuilder {
            ast: SubAst::default(),
            error: None,
        });
        if let Some(err) = sub.error {
            self.error = Some(err);
            return self;
        }
        self.ast.include.push(IncludeItem::Ref {
            path: path.into(),
            nested: Box::new(sub.ast),
        });
        self
    }

    /// Attaches a search payload.
    pub fn search<S: Into<String>>(
        mut self,
        query: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        if self.poisoned() {
            return self;
        }
        self.ast.search = Some(SearchSpec {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Finishes the AST.
    pub fn build(self) -> Result<QueryAst> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.ast),
        }
    }

    /// Compiles directly against a schema.
    pub fn compile(self, schema: &Schema) -> Result<CompiledQuery> {
        self.compile_with_threshold(schema, 16)
    }

    /// Compiles with an explicit inline-set threshold.
    pub fn compile_with_threshold(
        self,
        schema: &Schema,
        threshold: usize,
    ) -> Result<CompiledQuery> {
        let ast = self.build()?;
        compile_with_threshold(schema, &ast, threshold)
    }
}

/// Builds the branches of one OR node.
#[derive(Debug)]
pub struct OrBuilder {
    branches: Vec<FilterNode>,
    error: Option<UmbraError>,
}

impl OrBuilder {
    /// Adds one branch; multiple comparisons inside AND together.
    pub fn branch<F>(&mut self, build: F)
    where
        F: FnOnce(&mut AndBuilder),
    {
        if self.error.is_some() {
            return;
        }
        let mut and = AndBuilder {
            nodes: Vec::new(),
            error: None,
        };
        build(&mut and);
        if let Some(err) = and.error {
            self.error = Some(err);
            return;
        }
        match and.nodes.len() {
            0 => self.error = Some(UmbraError::invalid("empty or-branch")),
            1 => self.branches.push(and.nodes.into_iter().next().expect("len checked")),
            _ => self.branches.push(FilterNode::And(and.nodes)),
        }
    }
}

/// Builds one AND list inside an OR branch.
#[derive(Debug)]
pub struct AndBuilder {
    nodes: Vec<FilterNode>,
    error: Option<UmbraError>,
}

impl AndBuilder {
    /// Adds one comparison.
    pub fn filter(&mut self, path: impl Into<String>, op: &str, value: impl Into<Value>) {
        if self.error.is_some() {
            return;
        }
        match CmpOp::parse(op) {
            Ok(op) => self.nodes.push(FilterNode::Leaf(FilterLeaf {
                path: path.into(),
                op,
                values: vec![value.into()],
            })),
            Err(err) => self.error = Some(err),
        }
    }

    /// Bare boolean filter.
    pub fn filter_flag(&mut self, path: impl Into<String>) {
        self.filter(path, "=", true);
    }
}

/// Builds the nested sections of a reference include.
#[derive(Debug)]
pub struct SubBuilder {
    ast: SubAst,
    error: Option<UmbraError>,
}

impl SubBuilder {
    /// Adds one comparison over the referenced nodes.
    pub fn filter(mut self, path: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match CmpOp::parse(op) {
            Ok(op) => {
                let node = FilterNode::Leaf(FilterLeaf {
                    path: path.into(),
                    op,
                    values: vec![value.into()],
                });
                self.ast.filter = Some(match self.ast.filter.take() {
                    Some(existing) => existing.and(node),
                    None => node,
                });
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Sorts the referenced nodes.
    pub fn sort(mut self, path: impl Into<String>, descending: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.ast.sort = Some(SortSpec {
            path: path.into(),
            descending,
        });
        self
    }

    /// Windows the referenced nodes.
    pub fn range(mut self, offset: u32, limit: u32) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.ast.range = Some(QueryRange { offset, limit });
        self
    }

    /// Includes fields of the referenced type.
    pub fn include<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        if self.error.is_some() {
            return self;
        }
        for path in paths {
            self.ast.include.push(IncludeItem::Path(path.into()));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, SchemaDecl, TypeDecl};

    fn schema() -> Schema {
        Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("user")
            .prop(PropDecl::new("isNice", PropKind::Boolean))
            .prop(PropDecl::new("age", PropKind::Uint16))))
        .unwrap()
    }

    #[test]
    fn bare_filter_equals_true() {
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
    fn bad_operator_surfaces_at_build() {
        let err = QueryBuilder::new("user")
            .filter("age", "~", 3i64)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains('~'));
    }

    #[test]
    fn or_branches_build_a_tree() {
        let ast = QueryBuilder::new("user")
            .filter_or(|or| {
                or.branch(|b| b.filter("age", ">", 30i64));
                or.branch(|b| {
                    b.filter_flag("isNice");
                    b.filter("age", "<", 10i64);
                });
            })
            .build()
            .unwrap();
        match ast.filter.unwrap() {
            FilterNode::Or(branches) => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(branches[1], FilterNode::And(_)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }
}
