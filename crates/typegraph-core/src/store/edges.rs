//! Per-kind edge operations.
//!
//! An [`EdgeCollection`] mirrors the node collection for one declared
//! edge kind: endpoint-typed, cardinality-checked writes between node
//! references, plus endpoint-based lookup shortcuts.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::EdgeRow;
use crate::constraint::{check_cardinality, validate_edge_endpoints};
use crate::definition::EdgeKindDef;
use crate::error::{GraphError, Result};
use crate::model::{Edge, NodeRef, UpsertAction};
use crate::query::{GraphQuery, Predicate};
use crate::store::{edge_from_row, CreateOptions, IfExists, ParamValues, Store};
use crate::value::{format_timestamp, now, Props};

/// Result of an endpoint-based get-or-create.
#[derive(Debug, Clone)]
pub struct EdgeOutcome {
    pub edge: Edge,
    pub action: UpsertAction,
}

/// Typed operations over one edge kind.
pub struct EdgeCollection<'a> {
    store: &'a Store,
    def: &'a EdgeKindDef,
}

impl<'a> EdgeCollection<'a> {
    pub(crate) fn new(store: &'a Store, def: &'a EdgeKindDef) -> Self {
        Self { store, def }
    }

    pub fn kind(&self) -> &str {
        &self.def.name
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Edge>> {
        let row = self
            .store
            .adapter()
            .get_edge(self.store.graph_id(), id)
            .await?;
        match row {
            Some(row) if row.kind == self.def.name && row.deleted_at.is_none() => {
                Ok(Some(edge_from_row(&row)?))
            }
            _ => Ok(None),
        }
    }

    /// Live edges of this kind leaving `node`.
    pub async fn find_from(&self, node: &NodeRef) -> Result<Vec<Edge>> {
        let rows = self
            .store
            .adapter()
            .find_edges_connected_to(self.store.graph_id(), &node.kind, &node.id)
            .await?;
        rows.iter()
            .filter(|e| {
                e.kind == self.def.name
                    && e.deleted_at.is_none()
                    && e.from_kind == node.kind
                    && e.from_id == node.id
            })
            .map(edge_from_row)
            .collect()
    }

    /// Live edges of this kind arriving at `node`.
    pub async fn find_to(&self, node: &NodeRef) -> Result<Vec<Edge>> {
        let rows = self
            .store
            .adapter()
            .find_edges_connected_to(self.store.graph_id(), &node.kind, &node.id)
            .await?;
        rows.iter()
            .filter(|e| {
                e.kind == self.def.name
                    && e.deleted_at.is_none()
                    && e.to_kind == node.kind
                    && e.to_id == node.id
            })
            .map(edge_from_row)
            .collect()
    }

    /// Predicate filter over this edge kind, covering every declared
    /// endpoint pairing (with subclass closure).
    pub async fn find(&self, predicate: Predicate) -> Result<Vec<Edge>> {
        let mut out: Vec<Edge> = Vec::new();
        for from_kind in &self.def.from_kinds {
            for to_kind in &self.def.to_kinds {
                let query = GraphQuery::from_sub_classes(from_kind, "src")
                    .traverse_with(
                        &self.def.name,
                        "e",
                        crate::query::TraverseOptions {
                            expand: crate::query::ExpandMode::None,
                            ..Default::default()
                        },
                    )
                    .to_sub_classes(to_kind, "dst")
                    .where_edge(predicate.clone())
                    .select([(
                        "e".to_string(),
                        crate::query::Selection::Edge {
                            alias: "e".to_string(),
                        },
                    )]);
                let result = self
                    .store
                    .execute_with_params(&query, &ParamValues::new())
                    .await?;
                for row in &result.rows {
                    if let Some(edge) = row.edge("e") {
                        if !out.iter().any(|e| e.id == edge.id) {
                            out.push(edge.clone());
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create an edge between two nodes, enforcing endpoint typing and
    /// cardinality.
    pub async fn create(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        props: Props,
        options: CreateOptions,
    ) -> Result<Edge> {
        self.store
            .in_transaction(|| async { self.create_inner(from, to, props, options).await })
            .await
    }

    async fn create_inner(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        props: Props,
        options: CreateOptions,
    ) -> Result<Edge> {
        let props = self.def.schema.validate(&self.def.name, &props)?;
        validate_edge_endpoints(
            self.store.definition().registry(),
            self.def,
            &from.kind,
            &to.kind,
        )?;

        for endpoint in [from, to] {
            let row = self
                .store
                .adapter()
                .get_node(self.store.graph_id(), &endpoint.kind, &endpoint.id)
                .await?;
            if !row.map(|r| r.deleted_at.is_none()).unwrap_or(false) {
                return Err(GraphError::validation(
                    &self.def.name,
                    vec!["endpoint".to_string()],
                    format!("node {}:{} does not exist", endpoint.kind, endpoint.id),
                ));
            }
        }

        if let (Some(vf), Some(vt)) = (options.valid_from, options.valid_to) {
            if vf > vt {
                return Err(GraphError::temporal("valid_from is after valid_to"));
            }
        }

        let outgoing = self.live_outgoing(from).await?;
        let (count, has_active) = match self.def.cardinality {
            crate::model::Cardinality::Unique => {
                let matching: Vec<&EdgeRow> = outgoing
                    .iter()
                    .filter(|e| e.to_kind == to.kind && e.to_id == to.id)
                    .collect();
                (matching.len() as u64, false)
            }
            _ => {
                let has_active = outgoing.iter().any(|e| e.valid_to.is_none());
                (outgoing.len() as u64, has_active)
            }
        };
        check_cardinality(
            &self.def.name,
            &from.kind,
            &from.id,
            self.def.cardinality,
            count,
            has_active,
        )?;

        let timestamp = format_timestamp(now());
        let row = EdgeRow {
            graph_id: self.store.graph_id().to_string(),
            id: options
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: self.def.name.clone(),
            from_kind: from.kind.clone(),
            from_id: from.id.clone(),
            to_kind: to.kind.clone(),
            to_id: to.id.clone(),
            props: JsonValue::Object(props),
            valid_from: options.valid_from.map(format_timestamp),
            valid_to: options.valid_to.map(format_timestamp),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            deleted_at: None,
        };
        self.store.adapter().insert_edge(&row).await?;
        debug!(kind = %self.def.name, id = %row.id, "created edge");
        edge_from_row(&row)
    }

    /// Find a live edge by endpoints (optionally matching a props subset),
    /// creating one on miss.
    pub async fn get_or_create_by_endpoints(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        props: Props,
        match_on: Option<&[&str]>,
        if_exists: IfExists,
    ) -> Result<EdgeOutcome> {
        if let Some(fields) = match_on {
            for field in fields {
                if !self.def.schema.has_field(field) {
                    return Err(GraphError::EdgeConstraintNotFound {
                        kind: self.def.name.clone(),
                        constraint_name: (*field).to_string(),
                    });
                }
            }
        }
        self.store
            .in_transaction(|| async {
                let outgoing = self.live_outgoing(from).await?;
                let existing = outgoing.into_iter().find(|e| {
                    if e.to_kind != to.kind || e.to_id != to.id {
                        return false;
                    }
                    match match_on {
                        None => true,
                        Some(fields) => {
                            let stored = e.props.as_object();
                            fields.iter().all(|f| {
                                stored.and_then(|m| m.get(*f)) == props.get(*f)
                            })
                        }
                    }
                });

                match existing {
                    Some(row) => match if_exists {
                        IfExists::Return => Ok(EdgeOutcome {
                            edge: edge_from_row(&row)?,
                            action: UpsertAction::Found,
                        }),
                        IfExists::Update => {
                            let validated =
                                self.def.schema.validate(&self.def.name, &props)?;
                            let edge = self.update_row(row, &validated).await?;
                            Ok(EdgeOutcome {
                                edge,
                                action: UpsertAction::Updated,
                            })
                        }
                    },
                    None => {
                        let edge = self
                            .create_inner(from, to, props, CreateOptions::default())
                            .await?;
                        Ok(EdgeOutcome {
                            edge,
                            action: UpsertAction::Created,
                        })
                    }
                }
            })
            .await
    }

    /// Partial props update.
    pub async fn update(&self, id: &str, partial: Props) -> Result<Edge> {
        self.store
            .in_transaction(|| async {
                let row = self.require_live_row(id).await?;
                let partial = self.def.schema.validate_partial(&self.def.name, &partial)?;
                self.update_row(row, &partial).await
            })
            .await
    }

    /// Close the edge's validity window (used with `oneActive`).
    pub async fn end(&self, id: &str, at: Option<DateTime<Utc>>) -> Result<Edge> {
        self.store
            .in_transaction(|| async {
                let mut row = self.require_live_row(id).await?;
                let at = at.unwrap_or_else(now);
                if let Some(vf) = &row.valid_from {
                    if crate::value::parse_timestamp(vf)? > at {
                        return Err(GraphError::temporal(
                            "validity window cannot end before it starts",
                        ));
                    }
                }
                row.valid_to = Some(format_timestamp(at));
                row.updated_at = format_timestamp(now());
                self.store.adapter().update_edge(&row).await?;
                edge_from_row(&row)
            })
            .await
    }

    /// Soft-delete.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store
            .in_transaction(|| async {
                let mut row = self.require_live_row(id).await?;
                let timestamp = format_timestamp(now());
                row.deleted_at = Some(timestamp.clone());
                row.updated_at = timestamp;
                self.store.adapter().update_edge(&row).await?;
                debug!(kind = %self.def.name, id = %id, "soft-deleted edge");
                Ok(())
            })
            .await
    }

    /// Hard-delete.
    pub async fn hard_delete(&self, id: &str) -> Result<()> {
        self.require_live_row(id).await?;
        self.store
            .adapter()
            .delete_edge(self.store.graph_id(), id)
            .await?;
        debug!(kind = %self.def.name, id = %id, "hard-deleted edge");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn require_live_row(&self, id: &str) -> Result<EdgeRow> {
        let row = self
            .store
            .adapter()
            .get_edge(self.store.graph_id(), id)
            .await?;
        match row {
            Some(row) if row.kind == self.def.name && row.deleted_at.is_none() => Ok(row),
            _ => Err(GraphError::validation(
                &self.def.name,
                vec!["id".to_string()],
                format!("edge '{id}' not found"),
            )),
        }
    }

    async fn update_row(&self, row: EdgeRow, partial: &Props) -> Result<Edge> {
        let mut merged = row.props.as_object().cloned().unwrap_or_default();
        for (k, v) in partial {
            if v.is_null() {
                merged.remove(k);
            } else {
                merged.insert(k.clone(), v.clone());
            }
        }
        let mut updated = row;
        updated.props = JsonValue::Object(merged);
        updated.updated_at = format_timestamp(now());
        self.store.adapter().update_edge(&updated).await?;
        edge_from_row(&updated)
    }

    /// Live edges of this kind leaving `from`.
    async fn live_outgoing(&self, from: &NodeRef) -> Result<Vec<EdgeRow>> {
        let rows = self
            .store
            .adapter()
            .find_edges_connected_to(self.store.graph_id(), &from.kind, &from.id)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|e| {
                e.kind == self.def.name
                    && e.deleted_at.is_none()
                    && e.from_kind == from.kind
                    && e.from_id == from.id
            })
            .collect())
    }
}

