//! Abstract syntax of a query: immutable input to the byte-code compiler.
//!
//! Everything here is plain data; resolution against the schema layout
//! (path lookup, wildcard expansion, operator checks) happens at compile
//! time so the same AST can be recompiled after a schema change.

use crate::error::{Result, UmbraError};
use crate::types::{NodeId, Value};

/// What the query runs against.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Every node of a type, subject to filter/range.
    Type(String),
    /// One node by id.
    Id(String, NodeId),
    /// A set of nodes by id; sorted ascending before encoding.
    Ids(String, Vec<NodeId>),
    /// One node resolved through an alias property value.
    Alias {
        /// Type name.
        ty: String,
        /// Alias property path.
        path: String,
        /// Alias value; hashed at compile time.
        value: String,
    },
}

impl Target {
    /// Type name the target resolves against.
    pub fn type_name(&self) -> &str {
        match self {
            Target::Type(ty) | Target::Id(ty, _) | Target::Ids(ty, _) => ty,
            Target::Alias { ty, .. } => ty,
        }
    }
}

/// Offset + limit window; zero limit means unbounded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryRange {
    /// Items to skip.
    pub offset: u32,
    /// Maximum items to return; 0 = no limit.
    pub limit: u32,
}

/// Leaf comparison operators; discriminants are the wire bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CmpOp {
    /// Equality.
    Eq = 1,
    /// Inequality.
    Ne = 2,
    /// Greater than.
    Gt = 3,
    /// Greater or equal.
    Ge = 4,
    /// Less than.
    Lt = 5,
    /// Less or equal.
    Le = 6,
    /// Membership in a references list or cardinality sketch.
    Has = 7,
    /// Closed interval; carries two operands.
    Range = 8,
    /// Batch-encoded equality set.
    In = 9,
}

impl CmpOp {
    /// Parses the operator spelling used by the fluent builder.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(match text {
            "=" | "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            "has" | "includes" => CmpOp::Has,
            ".." => CmpOp::Range,
            "in" => CmpOp::In,
            other => return Err(UmbraError::invalid(format!("unknown operator `{other}`"))),
        })
    }

    /// Parses a wire byte.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => CmpOp::Eq,
            2 => CmpOp::Ne,
            3 => CmpOp::Gt,
            4 => CmpOp::Ge,
            5 => CmpOp::Lt,
            6 => CmpOp::Le,
            7 => CmpOp::Has,
            8 => CmpOp::Range,
            9 => CmpOp::In,
            _ => return Err(UmbraError::Corruption("unknown filter operator")),
        })
    }
}

/// One leaf comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterLeaf {
    /// Dotted property path.
    pub path: String,
    /// Operator.
    pub op: CmpOp,
    /// Operands: one for plain comparisons, two for `Range`, any number
    /// for equality sets.
    pub values: Vec<Value>,
}

/// Filter tree: an AND list of leaves or OR branches.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterNode {
    /// Single comparison.
    Leaf(FilterLeaf),
    /// Every child must hold.
    And(Vec<FilterNode>),
    /// At least one child must hold.
    Or(Vec<FilterNode>),
}

impl FilterNode {
    /// Conjoins another node onto this one, flattening AND lists.
    pub fn and(self, other: FilterNode) -> FilterNode {
        match self {
            FilterNode::And(mut children) => {
                children.push(other);
                FilterNode::And(children)
            }
            first => FilterNode::And(vec![first, other]),
        }
    }
}

/// Sort specification.
#[derive(Clone, Debug, PartialEq)]
pub struct SortSpec {
    /// Dotted property path.
    pub path: String,
    /// Descending order when set.
    pub descending: bool,
}

/// Search specification: a query string over a set of text-like fields.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchSpec {
    /// The query text.
    pub query: String,
    /// Property paths searched; empty means every string/text field.
    pub fields: Vec<String>,
}

/// One include request.
#[derive(Clone, Debug, PartialEq)]
pub enum IncludeItem {
    /// A field path, `*`, `**`, or a dotted path through references.
    Path(String),
    /// A reference descend with its own filter/sort/range/include.
    Ref {
        /// Reference property path.
        path: String,
        /// Sub-query applied to the referenced nodes.
        nested: Box<SubAst>,
    },
}

/// The sections a nested reference include may carry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubAst {
    /// Filter over referenced nodes.
    pub filter: Option<FilterNode>,
    /// Sort over referenced nodes.
    pub sort: Option<SortSpec>,
    /// Range over referenced nodes.
    pub range: Option<QueryRange>,
    /// Fields of the referenced type to include.
    pub include: Vec<IncludeItem>,
}

/// The complete query definition.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryAst {
    /// Target type/id(s)/alias.
    pub target: Target,
    /// Result window.
    pub range: Option<QueryRange>,
    /// Filter tree.
    pub filter: Option<FilterNode>,
    /// Sort spec.
    pub sort: Option<SortSpec>,
    /// Include tree; empty means all direct scalar fields.
    pub include: Vec<IncludeItem>,
    /// Search payload.
    pub search: Option<SearchSpec>,
}

impl QueryAst {
    /// A bare scan of one type.
    pub fn scan(ty: impl Into<String>) -> Self {
        Self {
            target: Target::Type(ty.into()),
            range: None,
            filter: None,
            sort: None,
            include: Vec::new(),
            search: None,
        }
    }
}
