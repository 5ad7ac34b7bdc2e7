//! Typed graph queries: AST, fluent builder, predicate DSL, logical
//! planner, SQL compiler, statement cache, and pagination cursors.

pub mod ast;
pub mod builder;
pub mod cache;
pub mod compile;
pub mod cursor;
pub mod dialect;
pub mod plan;
pub mod predicate;

pub use ast::{
    AggregateExpr, CyclePolicy, ExpandMode, GroupKey, OrderBySpec, PageSpec, Projection, QueryAst,
    RecursiveSpec, Selection, SetOpKind, SortDirection, ToClause, TraversalStep, DEFAULT_MAX_HOPS,
    MAX_HOPS_LIMIT,
};
pub use builder::{GraphQuery, TraverseOptions};
pub use cache::{CacheMetrics, StatementCache};
pub use compile::{compile, CompiledQuery, OutputKind, PagePlan};
pub use cursor::{Cursor, CursorDirection};
pub use dialect::BindSlot;
pub use predicate::{
    and, meta, not, or, prop, CompareOp, FieldRef, Operand, Predicate, SimilarityMetric,
    SimilarityOptions, SystemColumn,
};
