//! Per-kind node operations.
//!
//! A [`NodeCollection`] is a thin typed view over the store for one
//! declared node kind. All writes run inside adapter transactions and
//! enforce uniqueness, disjointness, and delete policy.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::{BackendError, NodeRow, SqlStatement, SqlValue, UniqueRow};
use crate::constraint::{
    check_disjointness, check_where_predicate, compute_unique_key, plan_cascade,
};
use crate::definition::{NodeKindDef, UniqueConstraint, UniqueScope};
use crate::error::{GraphError, Result};
use crate::model::{Node, TemporalMode, UpsertAction};
use crate::query::{GraphQuery, Predicate};
use crate::store::{
    node_from_row, CreateOptions, IfExists, ParamValues, Store, UpdateOptions,
};
use crate::value::{format_timestamp, now, Props};

/// Result of a get-or-create.
#[derive(Debug, Clone)]
pub struct GetOrCreateOutcome {
    pub node: Node,
    pub action: UpsertAction,
}

/// Typed operations over one node kind.
pub struct NodeCollection<'a> {
    store: &'a Store,
    def: &'a NodeKindDef,
}

impl<'a> NodeCollection<'a> {
    pub(crate) fn new(store: &'a Store, def: &'a NodeKindDef) -> Self {
        Self { store, def }
    }

    pub fn kind(&self) -> &str {
        &self.def.name
    }

    /// Query builder rooted at this kind.
    pub fn query(&self) -> GraphQuery {
        GraphQuery::from(&self.def.name, "n")
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Node>> {
        self.get_by_id_with(id, TemporalMode::Current).await
    }

    pub async fn get_by_id_with(&self, id: &str, mode: TemporalMode) -> Result<Option<Node>> {
        let row = self
            .store
            .adapter()
            .get_node(self.store.graph_id(), &self.def.name, id)
            .await?;
        match row {
            Some(row) => {
                let node = node_from_row(&row)?;
                Ok(visible_under(&node, mode).then_some(node))
            }
            None => Ok(None),
        }
    }

    /// Order-preserving batch get; missing ids yield `None`.
    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Option<Node>>> {
        let mut found: std::collections::HashMap<String, Node> =
            std::collections::HashMap::new();
        let dialect = self.store.adapter().dialect();
        // Two binds are taken by graph_id and kind.
        let chunk_size = dialect.bind_limit().saturating_sub(2).max(1);
        for chunk in ids.chunks(chunk_size) {
            let placeholders: Vec<String> = (0..chunk.len())
                .map(|i| placeholder(dialect, i + 3))
                .collect();
            let sql = format!(
                "SELECT kind, id, props, version, valid_from, valid_to, \
                 created_at, updated_at, deleted_at FROM nodes \
                 WHERE graph_id = {} AND kind = {} AND id IN ({})",
                placeholder(dialect, 1),
                placeholder(dialect, 2),
                placeholders.join(", ")
            );
            let mut binds = vec![
                SqlValue::Text(self.store.graph_id().to_string()),
                SqlValue::Text(self.def.name.clone()),
            ];
            binds.extend(chunk.iter().map(|id| SqlValue::Text(id.clone())));
            let rows = self
                .store
                .adapter()
                .execute(&SqlStatement { sql, binds })
                .await?;
            for raw in rows {
                let row = raw_to_node_row(self.store.graph_id(), &raw)?;
                let node = node_from_row(&row)?;
                if visible_under(&node, TemporalMode::Current) {
                    found.insert(node.id.clone(), node);
                }
            }
        }
        Ok(ids.iter().map(|id| found.get(id).cloned()).collect())
    }

    /// Read-only constraint lookup.
    pub async fn find_by_constraint(&self, name: &str, props: &Props) -> Result<Option<Node>> {
        let (owner, constraint) = self.require_constraint(name)?;
        let key = compute_unique_key(props, &constraint.fields, constraint.collation);
        let entry = self
            .store
            .adapter()
            .check_unique(self.store.graph_id(), &owner, &constraint.name, &key)
            .await?;
        match entry {
            Some(entry) if entry.deleted_at.is_none() => {
                let row = self
                    .store
                    .adapter()
                    .get_node(self.store.graph_id(), &entry.concrete_kind, &entry.node_id)
                    .await?;
                match row {
                    Some(row) if row.deleted_at.is_none() => Ok(Some(node_from_row(&row)?)),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Predicate filter over this kind only.
    pub async fn find(&self, predicate: Predicate) -> Result<Vec<Node>> {
        let query = self.query().where_node(predicate);
        let result = self
            .store
            .execute_with_params(&query, &ParamValues::new())
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.node("n").cloned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a node, enforcing uniqueness and disjointness atomically.
    pub async fn create(&self, props: Props, options: CreateOptions) -> Result<Node> {
        self.store
            .in_transaction(|| async { self.create_inner(props, options).await })
            .await
    }

    /// Batched create; outputs preserve input order.
    pub async fn bulk_create(&self, items: Vec<(Props, CreateOptions)>) -> Result<Vec<Node>> {
        self.store
            .in_transaction(|| async {
                let mut out = Vec::with_capacity(items.len());
                for (props, options) in items {
                    out.push(self.create_inner(props, options).await?);
                }
                Ok(out)
            })
            .await
    }

    async fn create_inner(&self, props: Props, options: CreateOptions) -> Result<Node> {
        let props = self.def.schema.validate(&self.def.name, &props)?;
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let (Some(from), Some(to)) = (options.valid_from, options.valid_to) {
            if from > to {
                return Err(GraphError::temporal("valid_from is after valid_to"));
            }
        }

        let siblings = self
            .store
            .adapter()
            .get_nodes_by_id(self.store.graph_id(), &id)
            .await?;
        if siblings
            .iter()
            .any(|row| row.kind == self.def.name)
        {
            return Err(GraphError::validation(
                &self.def.name,
                vec!["id".to_string()],
                format!("node '{id}' already exists"),
            ));
        }
        let live_kinds: Vec<String> = siblings
            .iter()
            .filter(|row| row.deleted_at.is_none())
            .map(|row| row.kind.clone())
            .collect();
        check_disjointness(self.store.definition().registry(), &id, &self.def.name, &live_kinds)?;

        let timestamp = format_timestamp(now());
        let row = NodeRow {
            graph_id: self.store.graph_id().to_string(),
            kind: self.def.name.clone(),
            id: id.clone(),
            props: JsonValue::Object(props),
            version: 1,
            valid_from: options.valid_from.map(format_timestamp),
            valid_to: options.valid_to.map(format_timestamp),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            deleted_at: None,
        };
        self.store.adapter().insert_node(&row).await?;
        self.insert_unique_entries(&row).await?;

        debug!(kind = %self.def.name, id = %id, "created node");
        node_from_row(&row)
    }

    /// Create, return, update, or resurrect at a fixed id.
    pub async fn upsert_by_id(
        &self,
        id: &str,
        props: Props,
        if_exists: IfExists,
    ) -> Result<GetOrCreateOutcome> {
        self.store
            .in_transaction(|| async {
                let existing = self
                    .store
                    .adapter()
                    .get_node(self.store.graph_id(), &self.def.name, id)
                    .await?;
                match existing {
                    None => {
                        let node = self
                            .create_inner(
                                props,
                                CreateOptions {
                                    id: Some(id.to_string()),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        Ok(GetOrCreateOutcome {
                            node,
                            action: UpsertAction::Created,
                        })
                    }
                    Some(row) if row.deleted_at.is_none() => match if_exists {
                        IfExists::Return => Ok(GetOrCreateOutcome {
                            node: node_from_row(&row)?,
                            action: UpsertAction::Found,
                        }),
                        IfExists::Update => {
                            let validated =
                                self.def.schema.validate(&self.def.name, &props)?;
                            let node = self.update_row(row, &validated, true).await?;
                            Ok(GetOrCreateOutcome {
                                node,
                                action: UpsertAction::Updated,
                            })
                        }
                    },
                    Some(row) => match if_exists {
                        IfExists::Return => Ok(GetOrCreateOutcome {
                            node: node_from_row(&row)?,
                            action: UpsertAction::Found,
                        }),
                        IfExists::Update => {
                            let validated =
                                self.def.schema.validate(&self.def.name, &props)?;
                            let node = self.resurrect_row(row, Some(validated)).await?;
                            Ok(GetOrCreateOutcome {
                                node,
                                action: UpsertAction::Resurrected,
                            })
                        }
                    },
                }
            })
            .await
    }

    /// Batched upsert; outputs preserve input order.
    pub async fn bulk_upsert_by_id(
        &self,
        items: Vec<(String, Props)>,
        if_exists: IfExists,
    ) -> Result<Vec<GetOrCreateOutcome>> {
        let mut out = Vec::with_capacity(items.len());
        for (id, props) in items {
            out.push(self.upsert_by_id(&id, props, if_exists).await?);
        }
        Ok(out)
    }

    /// Find by uniqueness key, creating (or resurrecting) on miss.
    pub async fn get_or_create_by_constraint(
        &self,
        name: &str,
        props: Props,
        if_exists: IfExists,
    ) -> Result<GetOrCreateOutcome> {
        self.store
            .in_transaction(|| async {
                self.get_or_create_by_constraint_inner(name, props, if_exists)
                    .await
            })
            .await
    }

    /// Batched get-or-create; outputs preserve input order.
    pub async fn bulk_get_or_create_by_constraint(
        &self,
        name: &str,
        items: Vec<Props>,
        if_exists: IfExists,
    ) -> Result<Vec<GetOrCreateOutcome>> {
        self.store
            .in_transaction(|| async {
                let mut out = Vec::with_capacity(items.len());
                for props in items {
                    out.push(
                        self.get_or_create_by_constraint_inner(name, props, if_exists)
                            .await?,
                    );
                }
                Ok(out)
            })
            .await
    }

    async fn get_or_create_by_constraint_inner(
        &self,
        name: &str,
        props: Props,
        if_exists: IfExists,
    ) -> Result<GetOrCreateOutcome> {
        let (owner, constraint) = self.require_constraint(name)?;
        let validated = self.def.schema.validate(&self.def.name, &props)?;
        let key = compute_unique_key(&validated, &constraint.fields, constraint.collation);
        let entry = self
            .store
            .adapter()
            .check_unique(self.store.graph_id(), &owner, &constraint.name, &key)
            .await?;

        let Some(entry) = entry else {
            let node = self.create_inner(validated, CreateOptions::default()).await?;
            return Ok(GetOrCreateOutcome {
                node,
                action: UpsertAction::Created,
            });
        };

        let row = self
            .store
            .adapter()
            .get_node(self.store.graph_id(), &entry.concrete_kind, &entry.node_id)
            .await?
            .ok_or_else(|| {
                GraphError::Backend(BackendError::database(format!(
                    "uniqueness entry points at missing node '{}'",
                    entry.node_id
                )))
            })?;

        if entry.deleted_at.is_none() && row.deleted_at.is_none() {
            match if_exists {
                IfExists::Return => Ok(GetOrCreateOutcome {
                    node: node_from_row(&row)?,
                    action: UpsertAction::Found,
                }),
                IfExists::Update => {
                    let node = self.update_row(row, &validated, true).await?;
                    Ok(GetOrCreateOutcome {
                        node,
                        action: UpsertAction::Updated,
                    })
                }
            }
        } else {
            // Tombstoned key: resurrection brings the original row back.
            let props = match if_exists {
                IfExists::Return => None,
                IfExists::Update => Some(validated),
            };
            let node = self.resurrect_row(row, props).await?;
            Ok(GetOrCreateOutcome {
                node,
                action: UpsertAction::Resurrected,
            })
        }
    }

    /// Partial update with optimistic versioning.
    pub async fn update(
        &self,
        id: &str,
        partial: Props,
        options: UpdateOptions,
    ) -> Result<Node> {
        self.store
            .in_transaction(|| async {
                let row = self.require_live_row(id).await?;
                if let Some(expected) = options.expected_version {
                    if row.version != expected {
                        return Err(GraphError::VersionConflict {
                            kind: self.def.name.clone(),
                            id: id.to_string(),
                            expected,
                            actual: row.version,
                        });
                    }
                }
                let partial = self.def.schema.validate_partial(&self.def.name, &partial)?;
                self.update_row(row, &partial, options.increment_version).await
            })
            .await
    }

    /// Soft-delete, applying the kind's delete behavior to incident edges.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store
            .in_transaction(|| async {
                let row = self.require_live_row(id).await?;
                let connected = self
                    .store
                    .adapter()
                    .find_edges_connected_to(self.store.graph_id(), &self.def.name, id)
                    .await?;
                let plan = plan_cascade(self.def, id, &connected)?;

                let timestamp = format_timestamp(now());
                for edge in connected
                    .iter()
                    .filter(|e| plan.edge_ids.contains(&e.id))
                {
                    let mut tombstoned = edge.clone();
                    tombstoned.deleted_at = Some(timestamp.clone());
                    tombstoned.updated_at = timestamp.clone();
                    self.store.adapter().update_edge(&tombstoned).await?;
                }

                self.remove_unique_entries(&row, &timestamp).await?;

                let mut tombstoned = row;
                tombstoned.deleted_at = Some(timestamp.clone());
                tombstoned.updated_at = timestamp;
                self.store.adapter().update_node(&tombstoned).await?;
                debug!(kind = %self.def.name, id = %id, "soft-deleted node");
                Ok(())
            })
            .await
    }

    /// Hard-delete the row and purge its uniqueness entries. Incident
    /// edges still follow the kind's delete behavior.
    pub async fn hard_delete(&self, id: &str) -> Result<()> {
        self.store
            .in_transaction(|| async {
                let row = self.require_live_row(id).await?;
                let connected = self
                    .store
                    .adapter()
                    .find_edges_connected_to(self.store.graph_id(), &self.def.name, id)
                    .await?;
                let plan = plan_cascade(self.def, id, &connected)?;

                let timestamp = format_timestamp(now());
                for edge in connected
                    .iter()
                    .filter(|e| plan.edge_ids.contains(&e.id))
                {
                    let mut tombstoned = edge.clone();
                    tombstoned.deleted_at = Some(timestamp.clone());
                    tombstoned.updated_at = timestamp.clone();
                    self.store.adapter().update_edge(&tombstoned).await?;
                }

                self.store
                    .adapter()
                    .purge_uniques_for_node(self.store.graph_id(), &row.id)
                    .await?;
                self.store
                    .adapter()
                    .delete_node(self.store.graph_id(), &self.def.name, id)
                    .await?;
                debug!(kind = %self.def.name, id = %id, "hard-deleted node");
                Ok(())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn require_live_row(&self, id: &str) -> Result<NodeRow> {
        let row = self
            .store
            .adapter()
            .get_node(self.store.graph_id(), &self.def.name, id)
            .await?;
        match row {
            Some(row) if row.deleted_at.is_none() => Ok(row),
            _ => Err(GraphError::validation(
                &self.def.name,
                vec!["id".to_string()],
                format!("node '{id}' not found"),
            )),
        }
    }

    /// Apply an already-validated partial onto a row.
    async fn update_row(&self, row: NodeRow, partial: &Props, increment_version: bool) -> Result<Node> {
        let old_props = match &row.props {
            JsonValue::Object(map) => map.clone(),
            _ => Props::new(),
        };
        let mut merged = old_props.clone();
        for (k, v) in partial {
            if v.is_null() {
                merged.remove(k);
            } else {
                merged.insert(k.clone(), v.clone());
            }
        }

        let timestamp = format_timestamp(now());
        self.refresh_unique_entries(&row, &old_props, &merged, &timestamp)
            .await?;

        let mut updated = row;
        updated.props = JsonValue::Object(merged);
        if increment_version {
            updated.version += 1;
        }
        updated.updated_at = timestamp;
        self.store.adapter().update_node(&updated).await?;
        node_from_row(&updated)
    }

    async fn resurrect_row(&self, row: NodeRow, props: Option<Props>) -> Result<Node> {
        let siblings = self
            .store
            .adapter()
            .get_nodes_by_id(self.store.graph_id(), &row.id)
            .await?;
        let live_kinds: Vec<String> = siblings
            .iter()
            .filter(|r| r.deleted_at.is_none() && r.kind != row.kind)
            .map(|r| r.kind.clone())
            .collect();
        check_disjointness(
            self.store.definition().registry(),
            &row.id,
            &row.kind,
            &live_kinds,
        )?;

        let timestamp = format_timestamp(now());
        let mut revived = row;
        revived.deleted_at = None;
        if let Some(props) = props {
            revived.props = JsonValue::Object(props);
        }
        revived.version += 1;
        revived.updated_at = timestamp;
        self.store.adapter().update_node(&revived).await?;
        self.insert_unique_entries(&revived).await?;
        debug!(kind = %revived.kind, id = %revived.id, "resurrected node");
        node_from_row(&revived)
    }

    /// All uniqueness constraints applying to this kind, with the entry
    /// namespace (declaring kind) each one writes under.
    fn applicable_constraints(&self) -> Vec<(String, &'a UniqueConstraint)> {
        let registry = self.store.definition().registry();
        let mut out = Vec::new();
        for owner in self.store.definition().node_kinds() {
            for constraint in &owner.unique_constraints {
                let applies = match constraint.scope {
                    UniqueScope::Kind => owner.name == self.def.name,
                    UniqueScope::KindWithSubClasses => registry
                        .unique_scope(&owner.name)
                        .contains(&self.def.name),
                };
                if applies {
                    out.push((owner.name.clone(), constraint));
                }
            }
        }
        out
    }

    fn require_constraint(&self, name: &str) -> Result<(String, &'a UniqueConstraint)> {
        self.applicable_constraints()
            .into_iter()
            .find(|(_, c)| c.name == name)
            .ok_or_else(|| GraphError::node_constraint_not_found(&self.def.name, name))
    }

    async fn insert_unique_entries(&self, row: &NodeRow) -> Result<()> {
        let props = match &row.props {
            JsonValue::Object(map) => map.clone(),
            _ => Props::new(),
        };
        for (owner, constraint) in self.applicable_constraints() {
            if !check_where_predicate(constraint, &props) {
                continue;
            }
            let key = compute_unique_key(&props, &constraint.fields, constraint.collation);
            let result = self
                .store
                .adapter()
                .insert_unique(&UniqueRow {
                    graph_id: self.store.graph_id().to_string(),
                    node_kind: owner.clone(),
                    constraint_name: constraint.name.clone(),
                    key,
                    node_id: row.id.clone(),
                    concrete_kind: row.kind.clone(),
                    deleted_at: None,
                })
                .await;
            if let Err(err) = result {
                return Err(match err {
                    BackendError::UniquenessViolation {
                        existing_node_id, ..
                    } => GraphError::Uniqueness {
                        constraint_name: constraint.name.clone(),
                        kind: self.def.name.clone(),
                        fields: constraint.fields.clone(),
                        existing_id: existing_node_id,
                        new_id: row.id.clone(),
                    },
                    other => GraphError::Backend(other),
                });
            }
        }
        Ok(())
    }

    async fn remove_unique_entries(&self, row: &NodeRow, timestamp: &str) -> Result<()> {
        let props = match &row.props {
            JsonValue::Object(map) => map.clone(),
            _ => Props::new(),
        };
        for (owner, constraint) in self.applicable_constraints() {
            if !check_where_predicate(constraint, &props) {
                continue;
            }
            let key = compute_unique_key(&props, &constraint.fields, constraint.collation);
            self.store
                .adapter()
                .delete_unique(
                    self.store.graph_id(),
                    &owner,
                    &constraint.name,
                    &key,
                    timestamp,
                )
                .await?;
        }
        Ok(())
    }

    /// Re-point uniqueness entries whose key or participation changed.
    async fn refresh_unique_entries(
        &self,
        row: &NodeRow,
        old_props: &Props,
        new_props: &Props,
        timestamp: &str,
    ) -> Result<()> {
        for (owner, constraint) in self.applicable_constraints() {
            let touched: BTreeSet<&str> = constraint
                .fields
                .iter()
                .map(String::as_str)
                .chain(constraint.where_conditions.iter().map(|c| c.field()))
                .collect();
            let changed = touched
                .iter()
                .any(|f| old_props.get(*f) != new_props.get(*f));
            if !changed {
                continue;
            }

            let old_in = check_where_predicate(constraint, old_props);
            let new_in = check_where_predicate(constraint, new_props);
            let old_key = compute_unique_key(old_props, &constraint.fields, constraint.collation);
            let new_key = compute_unique_key(new_props, &constraint.fields, constraint.collation);

            if old_in && (!new_in || old_key != new_key) {
                self.store
                    .adapter()
                    .delete_unique(
                        self.store.graph_id(),
                        &owner,
                        &constraint.name,
                        &old_key,
                        timestamp,
                    )
                    .await?;
            }
            if new_in && (!old_in || old_key != new_key) {
                let result = self
                    .store
                    .adapter()
                    .insert_unique(&UniqueRow {
                        graph_id: self.store.graph_id().to_string(),
                        node_kind: owner.clone(),
                        constraint_name: constraint.name.clone(),
                        key: new_key,
                        node_id: row.id.clone(),
                        concrete_kind: row.kind.clone(),
                        deleted_at: None,
                    })
                    .await;
                if let Err(err) = result {
                    return Err(match err {
                        BackendError::UniquenessViolation {
                            existing_node_id, ..
                        } => GraphError::Uniqueness {
                            constraint_name: constraint.name.clone(),
                            kind: self.def.name.clone(),
                            fields: constraint.fields.clone(),
                            existing_id: existing_node_id,
                            new_id: row.id.clone(),
                        },
                        other => GraphError::Backend(other),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Visibility of a node under a temporal mode, for point reads.
fn visible_under(node: &Node, mode: TemporalMode) -> bool {
    match mode {
        TemporalMode::Current => {
            node.meta.is_live()
                && node.meta.valid_to.map(|t| t > now()).unwrap_or(true)
        }
        TemporalMode::IncludeTombstones => {
            node.meta.valid_to.map(|t| t > now()).unwrap_or(true)
        }
        TemporalMode::IncludeEnded => true,
        TemporalMode::AsOf(at) => {
            node.meta.valid_from.map(|t| t <= at).unwrap_or(true)
                && node.meta.valid_to.map(|t| t > at).unwrap_or(true)
        }
    }
}

fn placeholder(dialect: crate::adapter::Dialect, n: usize) -> String {
    match dialect {
        crate::adapter::Dialect::Sqlite => format!("?{n}"),
        crate::adapter::Dialect::Postgres => format!("${n}"),
    }
}

fn raw_to_node_row(graph_id: &str, raw: &crate::adapter::Row) -> Result<NodeRow> {
    let text = |col: &str| -> Option<String> {
        raw.get(col).and_then(JsonValue::as_str).map(str::to_string)
    };
    Ok(NodeRow {
        graph_id: graph_id.to_string(),
        kind: text("kind").unwrap_or_default(),
        id: text("id").unwrap_or_default(),
        props: raw
            .get("props")
            .cloned()
            .unwrap_or(JsonValue::Object(Props::new())),
        version: raw.get("version").and_then(JsonValue::as_i64).unwrap_or(1),
        valid_from: text("valid_from"),
        valid_to: text("valid_to"),
        created_at: text("created_at").unwrap_or_default(),
        updated_at: text("updated_at").unwrap_or_default(),
        deleted_at: text("deleted_at"),
    })
}
