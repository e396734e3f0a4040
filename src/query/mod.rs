//! Query byte-code compiler: turns a structured query definition into one
//! self-contained buffer the engine can evaluate, trailed by the schema
//! checksum it was compiled against.

pub mod ast;
pub mod builder;
pub mod compile;
pub mod include;

pub use ast::{
    CmpOp, FilterLeaf, FilterNode, IncludeItem, QueryAst, QueryRange, SearchSpec, SortSpec, SubAst,
    Target,
};
pub use builder::QueryBuilder;
pub use compile::{compile as compile_query, CompiledQuery, QueryKind};
pub use include::{build_include, IncludeTree, RefInclude};
