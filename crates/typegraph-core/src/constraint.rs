//! Constraint engine: uniqueness keys, disjointness, endpoint typing,
//! cardinality, and delete-cascade planning.
//!
//! Everything here is a pure function over in-memory state; the store
//! fetches whatever current rows a check needs and passes them in. This
//! keeps the suspension points confined to adapter calls.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::adapter::EdgeRow;
use crate::definition::{EdgeKindDef, NodeKindDef, UniqueConstraint, WhereCondition};
use crate::error::{EndpointSide, GraphError, Result};
use crate::model::{Cardinality, DeleteBehavior};
use crate::ontology::KindRegistry;
use crate::value::{canonical_string, join_key_components, Collation, Props, UNIQUE_NULL_MARKER};

/// Compute the uniqueness key for a property bag over the given fields.
///
/// Missing or null fields contribute the reserved null marker; string
/// components are lowercased under `caseInsensitive` collation;
/// non-primitive values are canonically JSON-encoded. Deterministic.
pub fn compute_unique_key(props: &Props, fields: &[String], collation: Collation) -> String {
    let components: Vec<String> = fields
        .iter()
        .map(|field| match props.get(field) {
            None => UNIQUE_NULL_MARKER.to_string(),
            Some(value) => canonical_string(value, collation),
        })
        .collect();
    join_key_components(&components)
}

/// Whether a row participates in a partial uniqueness constraint.
pub fn check_where_predicate(constraint: &UniqueConstraint, props: &Props) -> bool {
    constraint.where_conditions.iter().all(|cond| {
        let value = props.get(cond.field());
        let is_null = matches!(value, None | Some(JsonValue::Null));
        match cond {
            WhereCondition::IsNull { .. } => is_null,
            WhereCondition::IsNotNull { .. } => !is_null,
        }
    })
}

/// Fail if any kind already held by the logical id is disjoint with the
/// kind being added.
pub fn check_disjointness(
    registry: &KindRegistry,
    node_id: &str,
    new_kind: &str,
    existing_kinds: &[String],
) -> Result<()> {
    for existing in existing_kinds {
        if registry.are_disjoint(new_kind, existing) {
            return Err(GraphError::disjoint(node_id, new_kind, existing.clone()));
        }
    }
    Ok(())
}

/// Fail unless both endpoints are assignable to some declared endpoint kind.
pub fn validate_edge_endpoints(
    registry: &KindRegistry,
    edge: &EdgeKindDef,
    from_kind: &str,
    to_kind: &str,
) -> Result<()> {
    let from_ok = edge
        .from_kinds
        .iter()
        .any(|k| registry.is_assignable_to(from_kind, k));
    if !from_ok {
        return Err(GraphError::Endpoint {
            edge_kind: edge.name.clone(),
            endpoint: EndpointSide::From,
            actual_kind: from_kind.to_string(),
            expected_kinds: edge.from_kinds.clone(),
        });
    }
    let to_ok = edge
        .to_kinds
        .iter()
        .any(|k| registry.is_assignable_to(to_kind, k));
    if !to_ok {
        return Err(GraphError::Endpoint {
            edge_kind: edge.name.clone(),
            endpoint: EndpointSide::To,
            actual_kind: to_kind.to_string(),
            expected_kinds: edge.to_kinds.clone(),
        });
    }
    Ok(())
}

/// Enforce edge cardinality given the current outgoing state of the source.
///
/// `existing_count` counts live edges of this kind from the source (for
/// `unique`, restricted to the same target); `has_active` reports whether
/// any of them has an open validity window.
pub fn check_cardinality(
    edge_kind: &str,
    from_kind: &str,
    from_id: &str,
    cardinality: Cardinality,
    existing_count: u64,
    has_active: bool,
) -> Result<()> {
    let violated = match cardinality {
        Cardinality::Many => false,
        Cardinality::One | Cardinality::Unique => existing_count > 0,
        Cardinality::OneActive => has_active,
    };
    if violated {
        Err(GraphError::Cardinality {
            edge_kind: edge_kind.to_string(),
            from_kind: from_kind.to_string(),
            from_id: from_id.to_string(),
            cardinality: cardinality.as_str().to_string(),
            existing_count,
        })
    } else {
        Ok(())
    }
}

/// The edges a node delete will soft-delete alongside the node.
#[derive(Debug, Clone)]
pub struct CascadePlan {
    pub behavior: DeleteBehavior,
    pub edge_ids: Vec<String>,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.edge_ids.is_empty()
    }
}

/// Plan the edge side of a node delete.
///
/// `connected` holds the live edges incident to the node (both directions)
/// as fetched by the store. `restrict` fails while any exist; `cascade`
/// and `disconnect` both plan a soft delete of all of them.
pub fn plan_cascade(
    node: &NodeKindDef,
    node_id: &str,
    connected: &[EdgeRow],
) -> Result<CascadePlan> {
    let live: Vec<&EdgeRow> = connected.iter().filter(|e| e.deleted_at.is_none()).collect();

    match node.on_delete {
        DeleteBehavior::Restrict => {
            if live.is_empty() {
                Ok(CascadePlan {
                    behavior: DeleteBehavior::Restrict,
                    edge_ids: Vec::new(),
                })
            } else {
                let mut edge_kinds: Vec<String> =
                    live.iter().map(|e| e.kind.clone()).collect();
                edge_kinds.sort();
                edge_kinds.dedup();
                Err(GraphError::RestrictedDelete {
                    kind: node.name.clone(),
                    id: node_id.to_string(),
                    edge_count: live.len() as u64,
                    edge_kinds,
                })
            }
        }
        behavior @ (DeleteBehavior::Cascade | DeleteBehavior::Disconnect) => {
            let edge_ids: Vec<String> = live.iter().map(|e| e.id.clone()).collect();
            debug!(
                kind = %node.name,
                id = %node_id,
                edges = edge_ids.len(),
                behavior = behavior.as_str(),
                "planned edge cleanup for node delete"
            );
            Ok(CascadePlan { behavior, edge_ids })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeKindDef, UniqueConstraint};
    use crate::ontology::{KindRegistry, OntologyRelation};
    use crate::schema::{FieldSpec, PropertySchema};
    use crate::value::ValueType;
    use serde_json::json;

    fn props(v: JsonValue) -> Props {
        v.as_object().unwrap().clone()
    }

    fn edge_row(id: &str, kind: &str, deleted: bool) -> EdgeRow {
        EdgeRow {
            graph_id: "g".into(),
            id: id.into(),
            kind: kind.into(),
            from_kind: "Book".into(),
            from_id: "b1".into(),
            to_kind: "Review".into(),
            to_id: "r1".into(),
            props: json!({}),
            valid_from: None,
            valid_to: None,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
            deleted_at: deleted.then(|| "2024-01-02T00:00:00.000Z".into()),
        }
    }

    #[test]
    fn test_unique_key_deterministic() {
        let p = props(json!({"email": "A@B.com", "org": "acme"}));
        let fields = vec!["email".to_string(), "org".to_string()];
        let k1 = compute_unique_key(&p, &fields, Collation::Binary);
        let k2 = compute_unique_key(&p, &fields, Collation::Binary);
        assert_eq!(k1, k2);

        let ci = compute_unique_key(&p, &fields, Collation::CaseInsensitive);
        assert_ne!(k1, ci);
        assert!(ci.starts_with("a@b.com"));
    }

    #[test]
    fn test_unique_key_null_marker() {
        let p = props(json!({"email": null}));
        let fields = vec!["email".to_string(), "org".to_string()];
        let key = compute_unique_key(&p, &fields, Collation::Binary);
        let parts: Vec<&str> = key.split('\u{1f}').collect();
        assert_eq!(parts, vec![UNIQUE_NULL_MARKER, UNIQUE_NULL_MARKER]);
    }

    #[test]
    fn test_where_predicate() {
        let c = UniqueConstraint::new("by_email", ["email"])
            .when(WhereCondition::IsNotNull {
                field: "email".into(),
            });
        assert!(check_where_predicate(&c, &props(json!({"email": "x"}))));
        assert!(!check_where_predicate(&c, &props(json!({"email": null}))));
        assert!(!check_where_predicate(&c, &props(json!({}))));
    }

    #[test]
    fn test_disjointness_check() {
        let reg = KindRegistry::new(
            ["Person".to_string(), "Robot".to_string(), "Employee".to_string()],
            [],
            vec![
                OntologyRelation::SubClassOf {
                    child: "Employee".into(),
                    parent: "Person".into(),
                },
                OntologyRelation::DisjointWith {
                    a: "Person".into(),
                    b: "Robot".into(),
                },
            ],
        )
        .unwrap();

        assert!(check_disjointness(&reg, "a", "Employee", &["Person".into()]).is_ok());
        let err = check_disjointness(&reg, "a", "Robot", &["Employee".into()]).unwrap_err();
        match err {
            GraphError::Disjoint {
                attempted_kind,
                conflicting_kind,
                ..
            } => {
                assert_eq!(attempted_kind, "Robot");
                assert_eq!(conflicting_kind, "Employee");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_endpoint_validation_with_subclasses() {
        let reg = KindRegistry::new(
            ["Person".to_string(), "Employee".to_string(), "Movie".to_string()],
            ["watched".to_string()],
            vec![OntologyRelation::SubClassOf {
                child: "Employee".into(),
                parent: "Person".into(),
            }],
        )
        .unwrap();
        let edge = EdgeKindDef::new("watched", ["Person"], ["Movie"]);

        assert!(validate_edge_endpoints(&reg, &edge, "Employee", "Movie").is_ok());
        let err = validate_edge_endpoints(&reg, &edge, "Movie", "Movie").unwrap_err();
        match err {
            GraphError::Endpoint { endpoint, .. } => assert_eq!(endpoint, EndpointSide::From),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cardinality() {
        assert!(check_cardinality("e", "A", "1", Cardinality::Many, 99, true).is_ok());
        assert!(check_cardinality("e", "A", "1", Cardinality::One, 0, false).is_ok());
        assert!(check_cardinality("e", "A", "1", Cardinality::One, 1, false).is_err());
        assert!(check_cardinality("e", "A", "1", Cardinality::Unique, 1, false).is_err());
        // oneActive allows ended edges, rejects a second open window
        assert!(check_cardinality("e", "A", "1", Cardinality::OneActive, 3, false).is_ok());
        assert!(check_cardinality("e", "A", "1", Cardinality::OneActive, 1, true).is_err());
    }

    #[test]
    fn test_plan_cascade_restrict() {
        let node = NodeKindDef::new(
            "Book",
            PropertySchema::new().field(FieldSpec::new("title", ValueType::String)),
        );
        let edges = vec![edge_row("e1", "hasReview", false), edge_row("e2", "hasReview", false)];
        let err = plan_cascade(&node, "b1", &edges).unwrap_err();
        match err {
            GraphError::RestrictedDelete {
                edge_count,
                edge_kinds,
                ..
            } => {
                assert_eq!(edge_count, 2);
                assert_eq!(edge_kinds, vec!["hasReview".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        // tombstoned edges do not block
        let edges = vec![edge_row("e1", "hasReview", true)];
        assert!(plan_cascade(&node, "b1", &edges).unwrap().is_empty());
    }

    #[test]
    fn test_plan_cascade_collects_live_edges() {
        let node = NodeKindDef::new("Book", PropertySchema::new())
            .on_delete(DeleteBehavior::Cascade);
        let edges = vec![
            edge_row("e1", "hasReview", false),
            edge_row("e2", "hasReview", true),
            edge_row("e3", "cites", false),
        ];
        let plan = plan_cascade(&node, "b1", &edges).unwrap();
        assert_eq!(plan.edge_ids, vec!["e1".to_string(), "e3".to_string()]);
        assert_eq!(plan.behavior, DeleteBehavior::Cascade);
    }
}
