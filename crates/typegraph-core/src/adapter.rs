//! Backend adapter contract.
//!
//! The core drives all storage through this trait: a thin, stateless
//! executor over the fixed four-table relational schema. Adapters own
//! dialect-native storage of timestamps; the core hands them ISO-8601 UTC
//! strings and JSON property bags. Compiled queries arrive as a
//! [`SqlStatement`] with positional binds.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// SQL dialect an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Maximum number of bind parameters in a single statement.
    pub fn bind_limit(&self) -> usize {
        match self {
            Dialect::Sqlite => 999,
            Dialect::Postgres => 65_535,
        }
    }
}

/// Optional behaviors an adapter may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub cte: bool,
    pub returning: bool,
    pub jsonb: bool,
    pub gin_indexes: bool,
}

/// Transaction isolation, applied where the backend supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A bind value for a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(s.into())
    }
}

/// A compiled SQL statement with positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

/// A result row from `execute`, keyed by output column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Physical `nodes` row. Timestamps are ISO-8601 UTC strings.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub graph_id: String,
    pub kind: String,
    pub id: String,
    pub props: JsonValue,
    pub version: i64,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Physical `edges` row.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub graph_id: String,
    pub id: String,
    pub kind: String,
    pub from_kind: String,
    pub from_id: String,
    pub to_kind: String,
    pub to_id: String,
    pub props: JsonValue,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Physical `node_uniques` row.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueRow {
    pub graph_id: String,
    pub node_kind: String,
    pub constraint_name: String,
    pub key: String,
    pub node_id: String,
    pub concrete_kind: String,
    pub deleted_at: Option<String>,
}

/// Physical `schema_versions` row.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRow {
    pub graph_id: String,
    pub version: i64,
    pub schema_hash: String,
    pub schema_doc: String,
    pub is_active: bool,
    pub created_at: String,
}

/// Errors raised by backend adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A uniqueness entry insert hit a live entry for a different node.
    /// The message shape is part of the adapter contract.
    #[error("uniqueness constraint violation: '{constraint_name}' key already maps to node '{existing_node_id}'")]
    UniquenessViolation {
        constraint_name: String,
        key: String,
        existing_node_id: String,
    },

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(String),

    /// Row could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Begin/commit/rollback misuse or backend transaction failure
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// The adapter has been closed
    #[error("connection closed")]
    Closed,
}

impl BackendError {
    /// Create a Database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a Transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Whether this is the contract's uniqueness-violation signal.
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, Self::UniquenessViolation { .. })
    }
}

/// The storage contract the core consumes.
///
/// All operations may suspend on I/O. Writes issued between `begin` and
/// `commit` are atomic; errors inside a transaction leave rollback to the
/// caller (the store's scoped helper does this). Nested `begin` calls map
/// to savepoints.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn dialect(&self) -> Dialect;
    fn capabilities(&self) -> Capabilities;

    // Nodes
    async fn insert_node(&self, row: &NodeRow) -> Result<(), BackendError>;
    async fn update_node(&self, row: &NodeRow) -> Result<(), BackendError>;
    async fn delete_node(&self, graph_id: &str, kind: &str, id: &str) -> Result<(), BackendError>;
    async fn get_node(
        &self,
        graph_id: &str,
        kind: &str,
        id: &str,
    ) -> Result<Option<NodeRow>, BackendError>;
    /// All rows (any kind, live or tombstoned) sharing a logical id.
    async fn get_nodes_by_id(
        &self,
        graph_id: &str,
        id: &str,
    ) -> Result<Vec<NodeRow>, BackendError>;

    // Edges
    async fn insert_edge(&self, row: &EdgeRow) -> Result<(), BackendError>;
    async fn update_edge(&self, row: &EdgeRow) -> Result<(), BackendError>;
    async fn delete_edge(&self, graph_id: &str, id: &str) -> Result<(), BackendError>;
    async fn get_edge(&self, graph_id: &str, id: &str) -> Result<Option<EdgeRow>, BackendError>;
    /// Live edges incident to a node, both directions.
    async fn find_edges_connected_to(
        &self,
        graph_id: &str,
        node_kind: &str,
        node_id: &str,
    ) -> Result<Vec<EdgeRow>, BackendError>;

    // Uniqueness entries
    /// Insert a uniqueness entry. Same-node re-insert on the same key is
    /// idempotent; a live entry for a different node raises
    /// [`BackendError::UniquenessViolation`]; a tombstoned entry is taken
    /// over (node id replaced, `deleted_at` cleared).
    async fn insert_unique(&self, row: &UniqueRow) -> Result<(), BackendError>;
    async fn check_unique(
        &self,
        graph_id: &str,
        node_kind: &str,
        constraint_name: &str,
        key: &str,
    ) -> Result<Option<UniqueRow>, BackendError>;
    /// Soft-delete a uniqueness entry (sets `deleted_at`, preserving the
    /// row for resurrection).
    async fn delete_unique(
        &self,
        graph_id: &str,
        node_kind: &str,
        constraint_name: &str,
        key: &str,
        deleted_at: &str,
    ) -> Result<(), BackendError>;
    /// Hard-delete every uniqueness entry belonging to a node.
    async fn purge_uniques_for_node(
        &self,
        graph_id: &str,
        node_id: &str,
    ) -> Result<(), BackendError>;

    // Schema versions
    async fn insert_schema(&self, row: &SchemaRow) -> Result<(), BackendError>;
    async fn get_active_schema(&self, graph_id: &str)
        -> Result<Option<SchemaRow>, BackendError>;

    // Compiled queries
    async fn execute(&self, statement: &SqlStatement) -> Result<Vec<Row>, BackendError>;

    // Transactions
    async fn begin(&self, isolation: Option<IsolationLevel>) -> Result<(), BackendError>;
    async fn commit(&self) -> Result<(), BackendError>;
    async fn rollback(&self) -> Result<(), BackendError>;

    /// Hard-delete every row in the graph, across all four tables.
    async fn clear_graph(&self, graph_id: &str) -> Result<(), BackendError>;

    /// Release pooled connections.
    async fn close(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // The contract must stay object-safe
    fn _assert_object_safe(_: &dyn Adapter) {}

    #[test]
    fn test_uniqueness_violation_message_shape() {
        let err = BackendError::UniquenessViolation {
            constraint_name: "by_email".into(),
            key: "a@b".into(),
            existing_node_id: "p1".into(),
        };
        let msg = err.to_string().to_lowercase();
        let idx_u = msg.find("uniqueness").unwrap();
        let idx_v = msg.find("violation").unwrap();
        assert!(idx_u < idx_v);
        assert!(err.is_uniqueness_violation());
    }

    #[test]
    fn test_bind_limits() {
        assert_eq!(Dialect::Sqlite.bind_limit(), 999);
        assert_eq!(Dialect::Postgres.bind_limit(), 65_535);
    }
}
