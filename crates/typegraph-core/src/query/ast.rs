//! Query AST node types.
//!
//! The fluent builder accumulates these; the planner consumes them. All
//! types serialize so the compiler can fingerprint a query structurally.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::model::{Direction, TemporalMode};
use crate::query::predicate::{Predicate, SystemColumn};

/// Default recursion depth cap when `max_hops` is unspecified.
pub const DEFAULT_MAX_HOPS: u32 = 100;

/// Hard upper bound for an explicit `max_hops`.
pub const MAX_HOPS_LIMIT: u32 = 1000;

/// Starting point of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FromClause {
    pub kind: String,
    pub alias: String,
    pub expand_sub_classes: bool,
}

/// Implicit widening of an edge-kind set over ontology relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpandMode {
    /// Exactly the named edge kind
    None,
    /// Add edge kinds that (transitively) imply the named kind
    Implying,
    /// Add the registered inverse, with a per-row direction swap
    #[default]
    Inverse,
    /// Both of the above
    All,
}

/// Cycle handling for recursive traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CyclePolicy {
    /// Track the path and never revisit a node on it
    #[default]
    Prevent,
    /// No per-path filtering; termination relies on the depth cap
    Allow,
}

/// Bounds and bookkeeping for a recursive traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecursiveSpec {
    pub min_hops: u32,
    /// Defaults to [`DEFAULT_MAX_HOPS`] when absent
    pub max_hops: Option<u32>,
    pub cycle_policy: CyclePolicy,
    /// Output key under which the hop count is projectable
    pub depth_alias: Option<String>,
    /// Output key under which the visited path is projectable
    pub path_alias: Option<String>,
}

impl Default for RecursiveSpec {
    fn default() -> Self {
        Self {
            min_hops: 1,
            max_hops: None,
            cycle_policy: CyclePolicy::Prevent,
            depth_alias: None,
            path_alias: None,
        }
    }
}

/// Target of a traversal step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToClause {
    pub kind: String,
    pub alias: String,
    pub include_sub_classes: bool,
}

/// One traversal step: edge kind, direction, target, and modifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalStep {
    pub edge_kind: String,
    pub edge_alias: String,
    pub direction: Direction,
    /// LEFT JOIN semantics: source rows survive with no match
    pub optional: bool,
    /// Traverse from this previously bound alias instead of the most
    /// recent one (fan-out)
    pub anchor: Option<String>,
    pub expand: ExpandMode,
    pub recursive: Option<RecursiveSpec>,
    pub to: ToClause,
}

/// Aggregate expressions for projections and `having`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "agg", rename_all = "camelCase")]
pub enum AggregateExpr {
    Count { alias: String },
    Sum { alias: String, field: String },
    Avg { alias: String, field: String },
    Min { alias: String, field: String },
    Max { alias: String, field: String },
}

impl AggregateExpr {
    pub fn alias(&self) -> &str {
        match self {
            AggregateExpr::Count { alias }
            | AggregateExpr::Sum { alias, .. }
            | AggregateExpr::Avg { alias, .. }
            | AggregateExpr::Min { alias, .. }
            | AggregateExpr::Max { alias, .. } => alias,
        }
    }
}

/// One projected output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "select", rename_all = "camelCase")]
pub enum Selection {
    /// The full node record bound to an alias
    Node { alias: String },
    /// The full edge record bound to an edge alias
    Edge { alias: String },
    /// A single property field
    Field { alias: String, field: String },
    /// A metadata column
    Meta { alias: String, column: SystemColumn },
    /// An aggregate (forces grouping)
    Aggregate(AggregateExpr),
    /// Hop count of a recursive step, by edge alias
    Depth { edge_alias: String },
    /// Visited-path string of a recursive step, by edge alias
    Path { edge_alias: String },
    /// A constant
    Literal { value: JsonValue },
}

/// Output record shape: ordered `(output key, selection)` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Projection {
    pub items: Vec<(String, Selection)>,
}

/// Grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "group", rename_all = "camelCase")]
pub enum GroupKey {
    /// Group by a property field
    Field { alias: String, field: String },
    /// Group by node identity (kind, id)
    Node { alias: String },
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(&self) -> SortDirection {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBySpec {
    pub alias: String,
    /// Property field, or `None` to order by a metadata column
    pub field: Option<String>,
    pub column: Option<SystemColumn>,
    pub direction: SortDirection,
}

/// Cursor pagination request.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PageSpec {
    pub first: Option<u64>,
    pub last: Option<u64>,
    pub after: Option<String>,
    pub before: Option<String>,
}

/// Set-operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl SetOpKind {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            SetOpKind::Union => "UNION",
            SetOpKind::UnionAll => "UNION ALL",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Except => "EXCEPT",
        }
    }
}

/// A fully accumulated query, as folded from the builder chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAst {
    pub from: FromClause,
    pub steps: Vec<TraversalStep>,
    /// Predicates over node aliases
    pub node_predicates: Vec<Predicate>,
    /// Predicates over edge aliases
    pub edge_predicates: Vec<Predicate>,
    pub projection: Option<Projection>,
    pub group_by: Vec<GroupKey>,
    pub having: Option<Predicate>,
    pub order_by: Vec<OrderBySpec>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Excluded from the structural fingerprint: a cursor must stay valid
    /// across successive pages of the same query shape
    #[serde(skip)]
    pub pagination: Option<PageSpec>,
    #[serde(skip)]
    pub set_ops: Vec<(SetOpKind, Arc<QueryAst>)>,
    #[serde(skip)]
    pub temporal: TemporalMode,
}

impl QueryAst {
    pub fn new(from: FromClause) -> Self {
        Self {
            from,
            steps: Vec::new(),
            node_predicates: Vec::new(),
            edge_predicates: Vec::new(),
            projection: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            pagination: None,
            set_ops: Vec::new(),
            temporal: TemporalMode::Current,
        }
    }

    /// All node aliases in binding order.
    pub fn node_aliases(&self) -> Vec<&str> {
        let mut out = vec![self.from.alias.as_str()];
        out.extend(self.steps.iter().map(|s| s.to.alias.as_str()));
        out
    }

    /// All edge aliases in binding order.
    pub fn edge_aliases(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.edge_alias.as_str()).collect()
    }

    pub fn is_node_alias(&self, alias: &str) -> bool {
        self.node_aliases().contains(&alias)
    }

    pub fn is_edge_alias(&self, alias: &str) -> bool {
        self.edge_aliases().contains(&alias)
    }

    /// The last bound node alias; identity tiebreaker for cursors.
    pub fn primary_alias(&self) -> &str {
        self.steps
            .last()
            .map(|s| s.to.alias.as_str())
            .unwrap_or(self.from.alias.as_str())
    }
}
