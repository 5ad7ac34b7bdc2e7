//! TypeGraph reference backend - SQLite adapter over the fixed schema
//!
//! This crate provides:
//! - The physical schema (four tables + mandatory indexes) shared by
//!   both dialects
//! - A SQLite adapter satisfying the core's backend contract, with
//!   savepoint-nested transactions and an in-memory constructor

pub mod schema;
pub mod sqlite;

pub use schema::{
    EDGE_COLUMNS, NODE_COLUMNS, PHYSICAL_SCHEMA_VERSION, SCHEMA_CREATE_EDGES,
    SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_NODES, SCHEMA_CREATE_NODE_UNIQUES,
    SCHEMA_CREATE_SCHEMA_VERSIONS, UNIQUE_COLUMNS,
};
pub use sqlite::SqliteAdapter;
