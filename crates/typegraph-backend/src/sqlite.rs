//! SQLite adapter.
//!
//! A thin, stateless executor over the four fixed tables, wrapping
//! rusqlite behind the async [`Adapter`] contract. The connection lives
//! behind a tokio Mutex; transactions nest via savepoints keyed by
//! depth. Timestamps and property bags arrive pre-normalised from the
//! core (ISO-8601 UTC text, JSON text).

use async_trait::async_trait;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use typegraph_core::adapter::{
    Adapter, BackendError, Capabilities, Dialect, EdgeRow, IsolationLevel, NodeRow, Row,
    SchemaRow, SqlStatement, SqlValue, UniqueRow,
};

use crate::schema::{
    EDGE_COLUMNS, NODE_COLUMNS, SCHEMA_CREATE_EDGES, SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_NODES,
    SCHEMA_CREATE_NODE_UNIQUES, SCHEMA_CREATE_SCHEMA_VERSIONS, UNIQUE_COLUMNS,
};

struct SqliteState {
    conn: Option<Connection>,
    tx_depth: usize,
}

/// SQLite implementation of the backend adapter contract.
pub struct SqliteAdapter {
    state: Mutex<SqliteState>,
}

impl SqliteAdapter {
    /// Open (or create) a database file, applying the physical schema.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::database(format!("create {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// In-memory database (for tests and embedded scratch use).
    pub fn in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, BackendError> {
        Self::configure_connection(&conn).map_err(db_err)?;
        conn.execute(SCHEMA_CREATE_NODES, []).map_err(db_err)?;
        conn.execute(SCHEMA_CREATE_EDGES, []).map_err(db_err)?;
        conn.execute(SCHEMA_CREATE_NODE_UNIQUES, [])
            .map_err(db_err)?;
        conn.execute(SCHEMA_CREATE_SCHEMA_VERSIONS, [])
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES).map_err(db_err)?;
        Ok(Self {
            state: Mutex::new(SqliteState {
                conn: Some(conn),
                tx_depth: 0,
            }),
        })
    }

    /// Configure connection with pragmatic defaults
    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        // WAL for concurrent readers alongside the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let state = self.state.lock().await;
        let conn = state.conn.as_ref().ok_or(BackendError::Closed)?;
        f(conn)
    }
}

fn db_err(e: rusqlite::Error) -> BackendError {
    BackendError::database(e.to_string())
}

fn props_text(props: &JsonValue) -> Result<String, BackendError> {
    serde_json::to_string(props).map_err(BackendError::from)
}

fn map_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    let props_text: String = row.get(3)?;
    Ok(NodeRow {
        graph_id: row.get(0)?,
        kind: row.get(1)?,
        id: row.get(2)?,
        props: serde_json::from_str(&props_text).unwrap_or(JsonValue::Null),
        version: row.get(4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

fn map_edge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
    let props_text: String = row.get(7)?;
    Ok(EdgeRow {
        graph_id: row.get(0)?,
        id: row.get(1)?,
        kind: row.get(2)?,
        from_kind: row.get(3)?,
        from_id: row.get(4)?,
        to_kind: row.get(5)?,
        to_id: row.get(6)?,
        props: serde_json::from_str(&props_text).unwrap_or(JsonValue::Null),
        valid_from: row.get(8)?,
        valid_to: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

fn map_unique_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UniqueRow> {
    Ok(UniqueRow {
        graph_id: row.get(0)?,
        node_kind: row.get(1)?,
        constraint_name: row.get(2)?,
        key: row.get(3)?,
        node_id: row.get(4)?,
        concrete_kind: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn to_sqlite_value(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(i) => SqliteValue::Integer(*i),
        SqlValue::Real(f) => SqliteValue::Real(*f),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
    }
}

fn ref_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => JsonValue::Null,
    }
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            cte: true,
            returning: true,
            jsonb: false,
            gin_indexes: false,
        }
    }

    async fn insert_node(&self, row: &NodeRow) -> Result<(), BackendError> {
        let props = props_text(&row.props)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO nodes (graph_id, kind, id, props, version, valid_from, valid_to, \
                 created_at, updated_at, deleted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.graph_id,
                    row.kind,
                    row.id,
                    props,
                    row.version,
                    row.valid_from,
                    row.valid_to,
                    row.created_at,
                    row.updated_at,
                    row.deleted_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn update_node(&self, row: &NodeRow) -> Result<(), BackendError> {
        let props = props_text(&row.props)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes SET props = ?4, version = ?5, valid_from = ?6, valid_to = ?7, \
                 updated_at = ?8, deleted_at = ?9 \
                 WHERE graph_id = ?1 AND kind = ?2 AND id = ?3",
                params![
                    row.graph_id,
                    row.kind,
                    row.id,
                    props,
                    row.version,
                    row.valid_from,
                    row.valid_to,
                    row.updated_at,
                    row.deleted_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_node(&self, graph_id: &str, kind: &str, id: &str) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM nodes WHERE graph_id = ?1 AND kind = ?2 AND id = ?3",
                params![graph_id, kind, id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_node(
        &self,
        graph_id: &str,
        kind: &str,
        id: &str,
    ) -> Result<Option<NodeRow>, BackendError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE graph_id = ?1 AND kind = ?2 AND id = ?3"
                ),
                params![graph_id, kind, id],
                |row| map_node_row(row),
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn get_nodes_by_id(
        &self,
        graph_id: &str,
        id: &str,
    ) -> Result<Vec<NodeRow>, BackendError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM nodes WHERE graph_id = ?1 AND id = ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![graph_id, id], |row| map_node_row(row))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rows)
        })
        .await
    }

    async fn insert_edge(&self, row: &EdgeRow) -> Result<(), BackendError> {
        let props = props_text(&row.props)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO edges (graph_id, id, kind, from_kind, from_id, to_kind, to_id, \
                 props, valid_from, valid_to, created_at, updated_at, deleted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    row.graph_id,
                    row.id,
                    row.kind,
                    row.from_kind,
                    row.from_id,
                    row.to_kind,
                    row.to_id,
                    props,
                    row.valid_from,
                    row.valid_to,
                    row.created_at,
                    row.updated_at,
                    row.deleted_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn update_edge(&self, row: &EdgeRow) -> Result<(), BackendError> {
        let props = props_text(&row.props)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE edges SET props = ?3, valid_from = ?4, valid_to = ?5, \
                 updated_at = ?6, deleted_at = ?7 \
                 WHERE graph_id = ?1 AND id = ?2",
                params![
                    row.graph_id,
                    row.id,
                    props,
                    row.valid_from,
                    row.valid_to,
                    row.updated_at,
                    row.deleted_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_edge(&self, graph_id: &str, id: &str) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM edges WHERE graph_id = ?1 AND id = ?2",
                params![graph_id, id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_edge(&self, graph_id: &str, id: &str) -> Result<Option<EdgeRow>, BackendError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE graph_id = ?1 AND id = ?2"),
                params![graph_id, id],
                |row| map_edge_row(row),
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn find_edges_connected_to(
        &self,
        graph_id: &str,
        node_kind: &str,
        node_id: &str,
    ) -> Result<Vec<EdgeRow>, BackendError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {EDGE_COLUMNS} FROM edges WHERE graph_id = ?1 AND \
                     ((from_kind = ?2 AND from_id = ?3) OR (to_kind = ?2 AND to_id = ?3)) \
                     AND deleted_at IS NULL"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![graph_id, node_kind, node_id], |row| {
                    map_edge_row(row)
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rows)
        })
        .await
    }

    async fn insert_unique(&self, row: &UniqueRow) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            let existing: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT node_id, deleted_at FROM node_uniques \
                     WHERE graph_id = ?1 AND node_kind = ?2 AND constraint_name = ?3 AND key = ?4",
                    params![row.graph_id, row.node_kind, row.constraint_name, row.key],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(db_err)?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO node_uniques (graph_id, node_kind, constraint_name, key, \
                         node_id, concrete_kind, deleted_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                        params![
                            row.graph_id,
                            row.node_kind,
                            row.constraint_name,
                            row.key,
                            row.node_id,
                            row.concrete_kind,
                        ],
                    )
                    .map_err(db_err)?;
                    Ok(())
                }
                Some((node_id, None)) if node_id == row.node_id => {
                    // Same-node re-insert is idempotent
                    Ok(())
                }
                Some((node_id, None)) => Err(BackendError::UniquenessViolation {
                    constraint_name: row.constraint_name.clone(),
                    key: row.key.clone(),
                    existing_node_id: node_id,
                }),
                Some((_, Some(_))) => {
                    // Tombstoned entry: take it over
                    conn.execute(
                        "UPDATE node_uniques SET node_id = ?5, concrete_kind = ?6, deleted_at = NULL \
                         WHERE graph_id = ?1 AND node_kind = ?2 AND constraint_name = ?3 AND key = ?4",
                        params![
                            row.graph_id,
                            row.node_kind,
                            row.constraint_name,
                            row.key,
                            row.node_id,
                            row.concrete_kind,
                        ],
                    )
                    .map_err(db_err)?;
                    Ok(())
                }
            }
        })
        .await
    }

    async fn check_unique(
        &self,
        graph_id: &str,
        node_kind: &str,
        constraint_name: &str,
        key: &str,
    ) -> Result<Option<UniqueRow>, BackendError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {UNIQUE_COLUMNS} FROM node_uniques \
                     WHERE graph_id = ?1 AND node_kind = ?2 AND constraint_name = ?3 AND key = ?4"
                ),
                params![graph_id, node_kind, constraint_name, key],
                |row| map_unique_row(row),
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn delete_unique(
        &self,
        graph_id: &str,
        node_kind: &str,
        constraint_name: &str,
        key: &str,
        deleted_at: &str,
    ) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE node_uniques SET deleted_at = ?5 \
                 WHERE graph_id = ?1 AND node_kind = ?2 AND constraint_name = ?3 AND key = ?4 \
                 AND deleted_at IS NULL",
                params![graph_id, node_kind, constraint_name, key, deleted_at],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn purge_uniques_for_node(
        &self,
        graph_id: &str,
        node_id: &str,
    ) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM node_uniques WHERE graph_id = ?1 AND node_id = ?2",
                params![graph_id, node_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_schema(&self, row: &SchemaRow) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE schema_versions SET is_active = 0 WHERE graph_id = ?1",
                params![row.graph_id],
            )
            .map_err(db_err)?;
            conn.execute(
                "INSERT INTO schema_versions (graph_id, version, schema_hash, schema_doc, \
                 is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.graph_id,
                    row.version,
                    row.schema_hash,
                    row.schema_doc,
                    row.is_active,
                    row.created_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_active_schema(
        &self,
        graph_id: &str,
    ) -> Result<Option<SchemaRow>, BackendError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT graph_id, version, schema_hash, schema_doc, is_active, created_at \
                 FROM schema_versions WHERE graph_id = ?1 AND is_active = 1 \
                 ORDER BY version DESC LIMIT 1",
                params![graph_id],
                |row| {
                    Ok(SchemaRow {
                        graph_id: row.get(0)?,
                        version: row.get(1)?,
                        schema_hash: row.get(2)?,
                        schema_doc: row.get(3)?,
                        is_active: row.get::<_, i64>(4)? != 0,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn execute(&self, statement: &SqlStatement) -> Result<Vec<Row>, BackendError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&statement.sql).map_err(db_err)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            let values: Vec<SqliteValue> =
                statement.binds.iter().map(to_sqlite_value).collect();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(values))
                .map_err(db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(db_err)? {
                let mut record = Row::new();
                for (i, name) in column_names.iter().enumerate() {
                    let value = row.get_ref(i).map_err(db_err)?;
                    record.insert(name.clone(), ref_to_json(value));
                }
                out.push(record);
            }
            Ok(out)
        })
        .await
    }

    async fn begin(&self, _isolation: Option<IsolationLevel>) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let depth = state.tx_depth;
        let conn = state.conn.as_ref().ok_or(BackendError::Closed)?;
        if depth == 0 {
            conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err)?;
        } else {
            conn.execute_batch(&format!("SAVEPOINT sp{depth}"))
                .map_err(db_err)?;
        }
        state.tx_depth += 1;
        debug!(depth = state.tx_depth, "transaction begin");
        Ok(())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.tx_depth == 0 {
            return Err(BackendError::transaction("commit without begin"));
        }
        let depth = state.tx_depth - 1;
        let conn = state.conn.as_ref().ok_or(BackendError::Closed)?;
        if depth == 0 {
            conn.execute_batch("COMMIT").map_err(db_err)?;
        } else {
            conn.execute_batch(&format!("RELEASE sp{depth}"))
                .map_err(db_err)?;
        }
        state.tx_depth = depth;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.tx_depth == 0 {
            return Err(BackendError::transaction("rollback without begin"));
        }
        let depth = state.tx_depth - 1;
        let conn = state.conn.as_ref().ok_or(BackendError::Closed)?;
        if depth == 0 {
            conn.execute_batch("ROLLBACK").map_err(db_err)?;
        } else {
            conn.execute_batch(&format!("ROLLBACK TO sp{depth}; RELEASE sp{depth}"))
                .map_err(db_err)?;
        }
        state.tx_depth = depth;
        Ok(())
    }

    async fn clear_graph(&self, graph_id: &str) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            for table in ["nodes", "edges", "node_uniques", "schema_versions"] {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE graph_id = ?1"),
                    params![graph_id],
                )
                .map_err(db_err)?;
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.tx_depth > 0 {
            if let Some(conn) = state.conn.as_ref() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            state.tx_depth = 0;
        }
        state.conn = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_row(kind: &str, id: &str) -> NodeRow {
        NodeRow {
            graph_id: "g".to_string(),
            kind: kind.to_string(),
            id: id.to_string(),
            props: serde_json::json!({"name": "x"}),
            version: 1,
            valid_from: None,
            valid_to: None,
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
            deleted_at: None,
        }
    }

    fn unique_row(key: &str, node_id: &str) -> UniqueRow {
        UniqueRow {
            graph_id: "g".to_string(),
            node_kind: "Person".to_string(),
            constraint_name: "by_email".to_string(),
            key: key.to_string(),
            node_id: node_id.to_string(),
            concrete_kind: "Person".to_string(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let adapter = SqliteAdapter::open(&path).unwrap();
        adapter.insert_node(&node_row("Person", "a")).await.unwrap();
        assert!(path.exists());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_node_round_trip() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.insert_node(&node_row("Person", "a")).await.unwrap();
        let row = adapter.get_node("g", "Person", "a").await.unwrap().unwrap();
        assert_eq!(row.props["name"], serde_json::json!("x"));
        assert!(adapter.get_node("g", "Person", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_insert_semantics() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.insert_unique(&unique_row("k", "n1")).await.unwrap();
        // Same node, same key: idempotent
        adapter.insert_unique(&unique_row("k", "n1")).await.unwrap();
        // Different node: violation with the contract's message shape
        let err = adapter
            .insert_unique(&unique_row("k", "n2"))
            .await
            .unwrap_err();
        assert!(err.is_uniqueness_violation());
        let msg = err.to_string().to_lowercase();
        assert!(msg.contains("uniqueness"));
        assert!(msg.contains("violation"));
    }

    #[tokio::test]
    async fn test_unique_resurrection_takeover() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.insert_unique(&unique_row("k", "n1")).await.unwrap();
        adapter
            .delete_unique("g", "Person", "by_email", "k", "2024-01-02T00:00:00.000Z")
            .await
            .unwrap();
        // Tombstoned: another node may take the key over
        adapter.insert_unique(&unique_row("k", "n2")).await.unwrap();
        let entry = adapter
            .check_unique("g", "Person", "by_email", "k")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.node_id, "n2");
        assert!(entry.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.begin(None).await.unwrap();
        adapter.insert_node(&node_row("Person", "a")).await.unwrap();
        adapter.rollback().await.unwrap();
        assert!(adapter.get_node("g", "Person", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_savepoint_nesting() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.begin(None).await.unwrap();
        adapter.insert_node(&node_row("Person", "a")).await.unwrap();
        adapter.begin(None).await.unwrap();
        adapter.insert_node(&node_row("Person", "b")).await.unwrap();
        adapter.rollback().await.unwrap();
        adapter.commit().await.unwrap();
        assert!(adapter.get_node("g", "Person", "a").await.unwrap().is_some());
        assert!(adapter.get_node("g", "Person", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_maps_columns() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.insert_node(&node_row("Person", "a")).await.unwrap();
        let rows = adapter
            .execute(&SqlStatement {
                sql: "SELECT kind, COUNT(*) AS n FROM nodes WHERE graph_id = ?1 GROUP BY kind"
                    .to_string(),
                binds: vec![SqlValue::Text("g".to_string())],
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["kind"], serde_json::json!("Person"));
        assert_eq!(rows[0]["n"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_close_rejects_further_use() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.close().await.unwrap();
        let err = adapter.get_node("g", "Person", "a").await.unwrap_err();
        assert!(matches!(err, BackendError::Closed));
    }
}
