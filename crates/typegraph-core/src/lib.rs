//! TypeGraph core - typed property-graph model over a relational store
//!
//! This crate provides the core of the TypeGraph library:
//! - Graph definition: node/edge kinds, property schemas, uniqueness
//!   constraints, cardinality, delete behavior, ontology relations
//! - Kind registry with precomputed ontology closures
//! - Constraint engine (uniqueness keys, disjointness, endpoints,
//!   cardinality, cascade planning)
//! - Immutable query builder, logical planner, and SQL compiler for
//!   SQLite and PostgreSQL
//! - The store orchestrating validated CRUD through a backend adapter
//! - Index DDL generation for external migrations

pub mod adapter;
pub mod constraint;
pub mod ddl;
pub mod definition;
pub mod error;
pub mod model;
pub mod ontology;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

// Re-exports for convenience
pub use adapter::{
    Adapter, BackendError, Capabilities, Dialect, EdgeRow, IsolationLevel, NodeRow, Row,
    SchemaRow, SqlStatement, SqlValue, UniqueRow,
};
pub use definition::{
    EdgeKindDef, GraphDefinition, GraphDefinitionBuilder, NodeKindDef, UniqueConstraint,
    UniqueScope, WhereCondition,
};
pub use error::{EndpointSide, GraphError, Result};
pub use model::{
    Cardinality, DeleteBehavior, Direction, Edge, EdgeMeta, Node, NodeMeta, NodeRef,
    TemporalMode, UpsertAction,
};
pub use ontology::{KindRegistry, OntologyRelation};
pub use query::{
    and, meta, not, or, prop, CompareOp, CyclePolicy, ExpandMode, GraphQuery, PageSpec,
    Predicate, RecursiveSpec, Selection, SortDirection, SystemColumn, TraverseOptions,
};
pub use schema::{FieldSpec, PropertySchema};
pub use store::{
    CreateOptions, EdgeCollection, EdgeOutcome, GetOrCreateOutcome, GraphStats, IfExists,
    NodeCollection, PageInfo, ParamValues, QueryResult, QueryRow, QueryValue, Store,
    UpdateOptions,
};
pub use value::{Collation, Props, ValueType};
