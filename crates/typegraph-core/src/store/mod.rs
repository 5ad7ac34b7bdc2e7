//! The store: validated CRUD over nodes and edges, query execution, and
//! schema-version bookkeeping.
//!
//! Every multi-statement invariant (create with uniqueness entries,
//! cascade delete, get-or-create) runs inside an adapter transaction;
//! any error aborts the transaction and propagates without partial
//! writes. The store holds no mutable global state beyond the bounded
//! statement cache.

mod edges;
mod nodes;

pub use edges::{EdgeCollection, EdgeOutcome};
pub use nodes::{GetOrCreateOutcome, NodeCollection};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::adapter::{
    Adapter, BackendError, EdgeRow, IsolationLevel, NodeRow, Row, SchemaRow, SqlStatement,
    SqlValue,
};
use crate::definition::GraphDefinition;
use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeMeta, Node, NodeMeta};
use crate::query::compile::{self, CompiledQuery, OutputKind};
use crate::query::cursor::{self, Cursor, CursorDirection};
use crate::query::dialect::{literal_to_sql, BindSlot};
use crate::query::{GraphQuery, StatementCache};
use crate::value::{format_timestamp, parse_timestamp, Props};

/// Prepared-query parameter values, by placeholder name.
pub type ParamValues = BTreeMap<String, JsonValue>;

/// What to do when a write targets an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfExists {
    /// Hand back the existing row untouched
    #[default]
    Return,
    /// Apply the new props (resurrecting a tombstoned row)
    Update,
}

/// Options for node/edge creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub id: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Options for updates.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub increment_version: bool,
    /// Optimistic check: fail with a version conflict when the stored
    /// version differs
    pub expected_version: Option<i64>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            increment_version: true,
            expected_version: None,
        }
    }
}

/// One decoded output value of a query row.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Node(Node),
    Edge(Edge),
    Scalar(JsonValue),
}

/// One decoded result row.
#[derive(Debug, Clone, Default)]
pub struct QueryRow {
    values: BTreeMap<String, QueryValue>,
}

impl QueryRow {
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.values.get(key)
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        match self.values.get(key) {
            Some(QueryValue::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn edge(&self, key: &str) -> Option<&Edge> {
        match self.values.get(key) {
            Some(QueryValue::Edge(e)) => Some(e),
            _ => None,
        }
    }

    pub fn scalar(&self, key: &str) -> Option<&JsonValue> {
        match self.values.get(key) {
            Some(QueryValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }
}

/// Cursor-pagination summary for a result page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// A fully materialised query result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
    pub page_info: Option<PageInfo>,
}

/// Live node/edge counts per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStats {
    pub node_counts: BTreeMap<String, u64>,
    pub edge_counts: BTreeMap<String, u64>,
}

/// The embedded graph store over one `graph_id`.
pub struct Store {
    graph_id: String,
    def: Arc<GraphDefinition>,
    adapter: Arc<dyn Adapter>,
    cache: Arc<StatementCache>,
    isolation: Option<IsolationLevel>,
}

impl Store {
    /// Open a store, recording the schema version on first use.
    pub async fn open(
        graph_id: impl Into<String>,
        def: GraphDefinition,
        adapter: Arc<dyn Adapter>,
    ) -> Result<Self> {
        let store = Self {
            graph_id: graph_id.into(),
            def: Arc::new(def),
            adapter,
            cache: Arc::new(StatementCache::default()),
            isolation: None,
        };
        store.record_schema().await?;
        Ok(store)
    }

    /// Select the isolation level requested for transactions, where the
    /// backend supports one.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.def
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn cache_metrics(&self) -> crate::query::CacheMetrics {
        self.cache.metrics()
    }

    /// Typed collection over a declared node kind.
    pub fn nodes(&self, kind: &str) -> Result<NodeCollection<'_>> {
        let def = self.def.require_node_kind(kind)?;
        Ok(NodeCollection::new(self, def))
    }

    /// Typed collection over a declared edge kind.
    pub fn edges(&self, kind: &str) -> Result<EdgeCollection<'_>> {
        let def = self.def.require_edge_kind(kind)?;
        Ok(EdgeCollection::new(self, def))
    }

    async fn record_schema(&self) -> Result<()> {
        let active = self.adapter.get_active_schema(&self.graph_id).await?;
        match active {
            Some(row) if row.schema_hash == self.def.schema_hash() => Ok(()),
            other => {
                let version = other.as_ref().map(|r| r.version + 1).unwrap_or(1);
                if let Some(prev) = &other {
                    warn!(
                        graph_id = %self.graph_id,
                        previous = prev.version,
                        "graph definition changed; recording schema version {version}"
                    );
                }
                self.adapter
                    .insert_schema(&SchemaRow {
                        graph_id: self.graph_id.clone(),
                        version,
                        schema_hash: self.def.schema_hash().to_string(),
                        schema_doc: self.def.schema_doc().to_string(),
                        is_active: true,
                        created_at: format_timestamp(crate::value::now()),
                    })
                    .await?;
                info!(graph_id = %self.graph_id, version, "recorded graph schema");
                Ok(())
            }
        }
    }

    /// The active schema version row, if any.
    pub async fn active_schema(&self) -> Result<Option<SchemaRow>> {
        Ok(self.adapter.get_active_schema(&self.graph_id).await?)
    }

    /// Run `op` inside a backend transaction, rolling back on any error.
    pub(crate) async fn in_transaction<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.adapter.begin(self.isolation).await?;
        match op().await {
            Ok(value) => {
                self.adapter.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.adapter.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after {err}");
                }
                Err(err)
            }
        }
    }

    /// Compile (or fetch from cache) and execute a query.
    pub async fn execute(&self, query: &GraphQuery) -> Result<QueryResult> {
        self.execute_with_params(query, &ParamValues::new()).await
    }

    /// Execute a prepared query with parameter values.
    pub async fn execute_with_params(
        &self,
        query: &GraphQuery,
        params: &ParamValues,
    ) -> Result<QueryResult> {
        let ast = query.fold()?;
        let dialect = self.adapter.dialect();
        let (cache_key, _) = compile::fingerprints(&ast, dialect);

        let compiled = match self.cache.get(&cache_key) {
            Some(hit) => hit,
            None => {
                let compiled = Arc::new(compile::compile(&ast, &self.def, dialect)?);
                self.cache.insert(cache_key, Arc::clone(&compiled));
                compiled
            }
        };
        self.run_compiled(&compiled, params).await
    }

    async fn run_compiled(
        &self,
        compiled: &CompiledQuery,
        params: &ParamValues,
    ) -> Result<QueryResult> {
        let now = format_timestamp(crate::value::now());
        let mut binds: Vec<SqlValue> = Vec::with_capacity(compiled.binds.len());
        for slot in &compiled.binds {
            binds.push(match slot {
                BindSlot::Value(v) => v.clone(),
                BindSlot::GraphId => SqlValue::Text(self.graph_id.clone()),
                BindSlot::Now => SqlValue::Text(now.clone()),
                BindSlot::Param(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        GraphError::compilation(format!("unbound parameter '{name}'"))
                    })?;
                    literal_to_sql(value)
                }
            });
        }

        debug!(sql = %compiled.sql, binds = binds.len(), "executing compiled query");
        let raw = self
            .adapter
            .execute(&SqlStatement {
                sql: compiled.sql.clone(),
                binds,
            })
            .await?;

        self.materialise(compiled, raw)
    }

    fn materialise(&self, compiled: &CompiledQuery, raw: Vec<Row>) -> Result<QueryResult> {
        let mut rows: Vec<QueryRow> = Vec::with_capacity(raw.len());
        let mut cursors: Vec<Option<Cursor>> = Vec::with_capacity(raw.len());

        for record in &raw {
            let mut out = QueryRow::default();
            for (key, kind) in &compiled.outputs {
                let value = match kind {
                    OutputKind::Node => match decode_node_output(record, key)? {
                        Some(node) => QueryValue::Node(node),
                        None => QueryValue::Scalar(JsonValue::Null),
                    },
                    OutputKind::Edge => match decode_edge_output(record, key)? {
                        Some(edge) => QueryValue::Edge(edge),
                        None => QueryValue::Scalar(JsonValue::Null),
                    },
                    OutputKind::Scalar => {
                        QueryValue::Scalar(record.get(key).cloned().unwrap_or(JsonValue::Null))
                    }
                };
                out.values.insert(key.clone(), value);
            }
            rows.push(out);

            if let Some(page) = &compiled.page {
                let mut values = Vec::with_capacity(page.cursor_len);
                for i in 0..page.cursor_len {
                    values.push(
                        record
                            .get(&format!("__cur_{i}"))
                            .cloned()
                            .unwrap_or(JsonValue::Null),
                    );
                }
                cursors.push(Some(Cursor {
                    direction: if page.backward {
                        CursorDirection::Backward
                    } else {
                        CursorDirection::Forward
                    },
                    values,
                    pk_kind: record
                        .get("__cur_pk_kind")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    pk_id: record
                        .get("__cur_pk_id")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }));
            } else {
                cursors.push(None);
            }
        }

        let page_info = if let Some(page) = &compiled.page {
            let size = page.size as usize;
            let overflow = rows.len() > size;
            if overflow {
                rows.truncate(size);
                cursors.truncate(size);
            }
            if page.backward {
                rows.reverse();
                cursors.reverse();
            }
            let encode = |c: &Option<Cursor>| {
                c.as_ref()
                    .map(|c| cursor::encode(&compiled.fingerprint, c))
            };
            Some(PageInfo {
                has_next_page: if page.backward {
                    page.from_cursor
                } else {
                    overflow
                },
                has_prev_page: if page.backward {
                    overflow
                } else {
                    page.from_cursor
                },
                start_cursor: cursors.first().and_then(encode),
                end_cursor: cursors.last().and_then(encode),
            })
        } else {
            None
        };

        Ok(QueryResult { rows, page_info })
    }

    /// Live node/edge counts per kind, one grouped statement per table.
    pub async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        for (table, target) in [
            ("nodes", &mut stats.node_counts),
            ("edges", &mut stats.edge_counts),
        ] {
            let placeholder = match self.adapter.dialect() {
                crate::adapter::Dialect::Sqlite => "?1",
                crate::adapter::Dialect::Postgres => "$1",
            };
            let rows = self
                .adapter
                .execute(&SqlStatement {
                    sql: format!(
                        "SELECT kind AS kind, COUNT(*) AS n FROM {table} \
                         WHERE graph_id = {placeholder} AND deleted_at IS NULL GROUP BY kind"
                    ),
                    binds: vec![SqlValue::Text(self.graph_id.clone())],
                })
                .await?;
            for row in rows {
                let kind = row
                    .get("kind")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                let count = row.get("n").and_then(JsonValue::as_u64).unwrap_or(0);
                target.insert(kind, count);
            }
        }
        Ok(stats)
    }

    /// Hard-delete every row in this graph and reset caches.
    pub async fn clear(&self) -> Result<()> {
        self.adapter.clear_graph(&self.graph_id).await?;
        self.cache.clear();
        info!(graph_id = %self.graph_id, "cleared graph");
        Ok(())
    }

    /// Release the underlying adapter.
    pub async fn close(&self) -> Result<()> {
        Ok(self.adapter.close().await?)
    }
}

// ----------------------------------------------------------------------
// Row materialisation helpers
// ----------------------------------------------------------------------

fn props_from_json(value: Option<&JsonValue>) -> Result<Props> {
    match value {
        None | Some(JsonValue::Null) => Ok(Props::new()),
        Some(JsonValue::Object(map)) => Ok(map.clone()),
        Some(JsonValue::String(text)) => serde_json::from_str::<JsonValue>(text)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .ok_or_else(|| {
                GraphError::Backend(BackendError::database("props column is not a JSON object"))
            }),
        Some(_) => Err(GraphError::Backend(BackendError::database(
            "props column is not a JSON object",
        ))),
    }
}

fn opt_timestamp(value: Option<&JsonValue>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => parse_timestamp(s).map(Some),
        Some(other) => Err(GraphError::temporal(format!(
            "unexpected timestamp value {other}"
        ))),
    }
}

fn req_timestamp(value: Option<&JsonValue>) -> Result<DateTime<Utc>> {
    opt_timestamp(value)?
        .ok_or_else(|| GraphError::temporal("missing required timestamp column"))
}

fn decode_node_output(record: &Row, key: &str) -> Result<Option<Node>> {
    let id = match record.get(&format!("{key}__id")) {
        Some(JsonValue::String(id)) => id.clone(),
        _ => return Ok(None),
    };
    Ok(Some(Node {
        kind: record
            .get(&format!("{key}__kind"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        id,
        props: props_from_json(record.get(&format!("{key}__props")))?,
        meta: NodeMeta {
            version: record
                .get(&format!("{key}__version"))
                .and_then(JsonValue::as_i64)
                .unwrap_or(1),
            valid_from: opt_timestamp(record.get(&format!("{key}__valid_from")))?,
            valid_to: opt_timestamp(record.get(&format!("{key}__valid_to")))?,
            created_at: req_timestamp(record.get(&format!("{key}__created_at")))?,
            updated_at: req_timestamp(record.get(&format!("{key}__updated_at")))?,
            deleted_at: opt_timestamp(record.get(&format!("{key}__deleted_at")))?,
        },
    }))
}

fn decode_edge_output(record: &Row, key: &str) -> Result<Option<Edge>> {
    let id = match record.get(&format!("{key}__id")) {
        Some(JsonValue::String(id)) => id.clone(),
        _ => return Ok(None),
    };
    let text = |col: &str| {
        record
            .get(&format!("{key}__{col}"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Ok(Some(Edge {
        kind: text("kind"),
        id,
        from_kind: text("from_kind"),
        from_id: text("from_id"),
        to_kind: text("to_kind"),
        to_id: text("to_id"),
        props: props_from_json(record.get(&format!("{key}__props")))?,
        meta: EdgeMeta {
            valid_from: opt_timestamp(record.get(&format!("{key}__valid_from")))?,
            valid_to: opt_timestamp(record.get(&format!("{key}__valid_to")))?,
            created_at: req_timestamp(record.get(&format!("{key}__created_at")))?,
            updated_at: req_timestamp(record.get(&format!("{key}__updated_at")))?,
            deleted_at: opt_timestamp(record.get(&format!("{key}__deleted_at")))?,
        },
    }))
}

/// Convert a physical node row into the caller-facing record.
pub(crate) fn node_from_row(row: &NodeRow) -> Result<Node> {
    Ok(Node {
        kind: row.kind.clone(),
        id: row.id.clone(),
        props: props_from_json(Some(&row.props))?,
        meta: NodeMeta {
            version: row.version,
            valid_from: row.valid_from.as_deref().map(parse_timestamp).transpose()?,
            valid_to: row.valid_to.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        },
    })
}

/// Convert a physical edge row into the caller-facing record.
pub(crate) fn edge_from_row(row: &EdgeRow) -> Result<Edge> {
    Ok(Edge {
        kind: row.kind.clone(),
        id: row.id.clone(),
        from_kind: row.from_kind.clone(),
        from_id: row.from_id.clone(),
        to_kind: row.to_kind.clone(),
        to_id: row.to_id.clone(),
        props: props_from_json(Some(&row.props))?,
        meta: EdgeMeta {
            valid_from: row.valid_from.as_deref().map(parse_timestamp).transpose()?,
            valid_to: row.valid_to.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_props_from_json_accepts_text_and_object() {
        let parsed = props_from_json(Some(&json!({"a": 1}))).unwrap();
        assert_eq!(parsed["a"], json!(1));
        let parsed = props_from_json(Some(&json!("{\"a\":2}"))).unwrap();
        assert_eq!(parsed["a"], json!(2));
        assert!(props_from_json(Some(&json!(42))).is_err());
        assert!(props_from_json(None).unwrap().is_empty());
    }

    #[test]
    fn test_decode_node_output_missing_is_none() {
        let record = Row::new();
        assert!(decode_node_output(&record, "p").unwrap().is_none());
    }

    #[test]
    fn test_decode_node_output_round_trip() {
        let mut record = Row::new();
        record.insert("p__kind".into(), json!("Person"));
        record.insert("p__id".into(), json!("a"));
        record.insert("p__props".into(), json!("{\"name\":\"Alice\"}"));
        record.insert("p__version".into(), json!(3));
        record.insert("p__created_at".into(), json!("2024-01-01T00:00:00.000Z"));
        record.insert("p__updated_at".into(), json!("2024-01-02T00:00:00.000Z"));
        let node = decode_node_output(&record, "p").unwrap().unwrap();
        assert_eq!(node.kind, "Person");
        assert_eq!(node.meta.version, 3);
        assert_eq!(node.props["name"], json!("Alice"));
        assert!(node.meta.is_live());
    }
}
