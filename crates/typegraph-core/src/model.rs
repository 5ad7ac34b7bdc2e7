//! Logical graph entities and shared enums.
//!
//! These are the records the store hands back to callers: a [`Node`] or
//! [`Edge`] pairs the validated property bag with [`NodeMeta`]/[`EdgeMeta`]
//! carrying version and temporal/deletion timestamps. The physical row
//! layout lives in [`crate::adapter`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Props;

/// Traversal direction relative to the source alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow edges whose `from` endpoint is the source
    Out,
    /// Follow edges whose `to` endpoint is the source
    In,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }

    pub fn reversed(&self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }
}

/// Edge cardinality, enforced on every edge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    /// No constraint
    #[default]
    Many,
    /// At most one live edge of this kind from each source node
    One,
    /// At most one live edge of this kind per (from, to) pair
    Unique,
    /// At most one edge of this kind from each source with `valid_to IS NULL`
    OneActive,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::Many => "many",
            Cardinality::One => "one",
            Cardinality::Unique => "unique",
            Cardinality::OneActive => "oneActive",
        }
    }
}

/// What happens to a node's incident edges when the node is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteBehavior {
    /// Refuse the delete while live edges exist
    #[default]
    Restrict,
    /// Soft-delete all incident edges in the same transaction
    Cascade,
    /// Soft-delete incident edges, preserving them as historical joins
    Disconnect,
}

impl DeleteBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteBehavior::Restrict => "restrict",
            DeleteBehavior::Cascade => "cascade",
            DeleteBehavior::Disconnect => "disconnect",
        }
    }
}

/// Query-time filter over deletion and validity columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalMode {
    /// Live rows only: no tombstones, no ended validity
    #[default]
    Current,
    /// Live rows plus soft-deleted rows
    IncludeTombstones,
    /// Additionally include edges whose validity window has ended
    IncludeEnded,
    /// Rows whose validity window contains `t` (half-open), tombstones ignored
    AsOf(DateTime<Utc>),
}

/// Version and temporal metadata attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub version: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NodeMeta {
    /// Whether the row is live (not soft-deleted).
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Temporal metadata attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMeta {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EdgeMeta {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether the validity window is still open.
    pub fn is_active(&self) -> bool {
        self.is_live() && self.valid_to.is_none()
    }
}

/// A node as seen by callers: kind, logical id, validated props, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: String,
    pub id: String,
    pub props: Props,
    pub meta: NodeMeta,
}

impl Node {
    /// Reference to this node's identity, for edge endpoints.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            kind: self.kind.clone(),
            id: self.id.clone(),
        }
    }
}

/// An edge as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: String,
    pub id: String,
    pub from_kind: String,
    pub from_id: String,
    pub to_kind: String,
    pub to_id: String,
    pub props: Props,
    pub meta: EdgeMeta,
}

impl Edge {
    pub fn from_ref(&self) -> NodeRef {
        NodeRef {
            kind: self.from_kind.clone(),
            id: self.from_id.clone(),
        }
    }

    pub fn to_ref(&self) -> NodeRef {
        NodeRef {
            kind: self.to_kind.clone(),
            id: self.to_id.clone(),
        }
    }
}

/// A (kind, id) pair identifying a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: String,
    pub id: String,
}

impl NodeRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Outcome of a get-or-create operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Found,
    Updated,
    Resurrected,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Created => "created",
            UpsertAction::Found => "found",
            UpsertAction::Updated => "updated",
            UpsertAction::Resurrected => "resurrected",
        }
    }
}
