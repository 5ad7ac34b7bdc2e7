//! Physical schema for the four fixed tables.
//!
//! Both dialects share table and column names bit-exactly; only the
//! column types differ (TEXT/JSON here, TIMESTAMPTZ/JSONB on
//! PostgreSQL). The query compiler relies on the mandatory indexes
//! declared below.

/// Schema version stamped into fresh databases.
pub const PHYSICAL_SCHEMA_VERSION: &str = "1.0";

/// SQL to create the nodes table
///
/// Same logical `id` may exist under multiple kinds when the kinds are
/// not disjoint, hence the composite primary key.
pub const SCHEMA_CREATE_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    graph_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    id TEXT NOT NULL,

    -- Validated property bag (JSON object)
    props TEXT NOT NULL,

    -- Optimistic version counter
    version INTEGER NOT NULL,

    -- Bitemporal validity window (ISO-8601 UTC, half-open)
    valid_from TEXT,
    valid_to TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    -- Soft-delete tombstone
    deleted_at TEXT,

    PRIMARY KEY (graph_id, kind, id)
)
"#;

/// SQL to create the edges table
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    graph_id TEXT NOT NULL,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,

    from_kind TEXT NOT NULL,
    from_id TEXT NOT NULL,
    to_kind TEXT NOT NULL,
    to_id TEXT NOT NULL,

    props TEXT NOT NULL,

    valid_from TEXT,
    valid_to TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,

    PRIMARY KEY (graph_id, id)
)
"#;

/// SQL to create the uniqueness-entry table
///
/// `deleted_at` keeps tombstoned keys around so a later write with the
/// same key can resurrect the original node.
pub const SCHEMA_CREATE_NODE_UNIQUES: &str = r#"
CREATE TABLE IF NOT EXISTS node_uniques (
    graph_id TEXT NOT NULL,

    -- The declaring kind (scope namespace), not necessarily the row kind
    node_kind TEXT NOT NULL,
    constraint_name TEXT NOT NULL,

    -- Computed uniqueness key
    key TEXT NOT NULL,

    node_id TEXT NOT NULL,

    -- The actual kind of the node holding the key
    concrete_kind TEXT NOT NULL,

    deleted_at TEXT,

    PRIMARY KEY (graph_id, node_kind, constraint_name, key)
)
"#;

/// SQL to create the schema-version table
pub const SCHEMA_CREATE_SCHEMA_VERSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS schema_versions (
    graph_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    schema_hash TEXT NOT NULL,
    schema_doc TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (graph_id, version)
)
"#;

/// SQL to create the indexes the compiler plans against
pub const SCHEMA_CREATE_INDEXES: &str = r#"
-- Kind scans with tombstone filtering
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(graph_id, kind, deleted_at);
CREATE INDEX IF NOT EXISTS idx_nodes_kind_created ON nodes(graph_id, kind, deleted_at, created_at);

-- Outgoing traversals
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(graph_id, from_kind, from_id, kind, to_kind, deleted_at, valid_to);

-- Incoming traversals
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(graph_id, to_kind, to_id, kind, from_kind, deleted_at, valid_to);

-- Edge-kind scans
CREATE INDEX IF NOT EXISTS idx_edges_kind_created ON edges(graph_id, kind, deleted_at, created_at);

-- Uniqueness lookups by node (delete and purge paths)
CREATE INDEX IF NOT EXISTS idx_uniques_node ON node_uniques(graph_id, node_id);
"#;

/// Column names for node queries (in order for row mapping)
pub const NODE_COLUMNS: &str =
    "graph_id, kind, id, props, version, valid_from, valid_to, created_at, updated_at, deleted_at";

/// Column names for edge queries (in order for row mapping)
pub const EDGE_COLUMNS: &str = "graph_id, id, kind, from_kind, from_id, to_kind, to_id, props, \
                                valid_from, valid_to, created_at, updated_at, deleted_at";

/// Column names for uniqueness-entry queries (in order for row mapping)
pub const UNIQUE_COLUMNS: &str =
    "graph_id, node_kind, constraint_name, key, node_id, concrete_kind, deleted_at";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();

        conn.execute(SCHEMA_CREATE_NODES, []).unwrap();
        conn.execute(SCHEMA_CREATE_EDGES, []).unwrap();
        conn.execute(SCHEMA_CREATE_NODE_UNIQUES, []).unwrap();
        conn.execute(SCHEMA_CREATE_SCHEMA_VERSIONS, []).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"nodes".to_string()));
        assert!(tables.contains(&"edges".to_string()));
        assert!(tables.contains(&"node_uniques".to_string()));
        assert!(tables.contains(&"schema_versions".to_string()));
    }

    #[test]
    fn test_schema_creates_indexes() {
        let conn = Connection::open_in_memory().unwrap();

        conn.execute(SCHEMA_CREATE_NODES, []).unwrap();
        conn.execute(SCHEMA_CREATE_EDGES, []).unwrap();
        conn.execute(SCHEMA_CREATE_NODE_UNIQUES, []).unwrap();
        conn.execute_batch(SCHEMA_CREATE_INDEXES).unwrap();

        let indexes: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
            )
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(indexes.contains(&"idx_nodes_kind".to_string()));
        assert!(indexes.contains(&"idx_edges_from".to_string()));
        assert!(indexes.contains(&"idx_edges_to".to_string()));
    }
}
