//! Fluent, immutable query builder.
//!
//! Each chained call returns a new [`GraphQuery`] whose head node points at
//! the previous chain by `Arc`, so prefixes are shared structurally and
//! never mutated through aliasing. Folding the chain into a [`QueryAst`]
//! happens at compile time, where alias and shape validation runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{GraphError, Result};
use crate::model::{Direction, TemporalMode};
use crate::query::ast::{
    CyclePolicy, ExpandMode, FromClause, GroupKey, OrderBySpec, PageSpec, Projection, QueryAst,
    RecursiveSpec, Selection, SetOpKind, SortDirection, ToClause, TraversalStep,
};
use crate::query::predicate::{Predicate, SystemColumn};

/// Modifiers for a traversal step.
#[derive(Debug, Clone, Default)]
pub struct TraverseOptions {
    pub direction: Option<Direction>,
    pub optional: bool,
    pub anchor: Option<String>,
    pub expand: ExpandMode,
    pub recursive: Option<RecursiveSpec>,
}

#[derive(Debug)]
enum BuilderOp {
    From(FromClause),
    Traverse {
        edge_kind: String,
        edge_alias: String,
        options: TraverseOptions,
    },
    To(ToClause),
    Recursive(RecursiveSpec),
    WhereNode(Predicate),
    WhereEdge(Predicate),
    Select(Projection),
    GroupBy(GroupKey),
    Having(Predicate),
    OrderBy(OrderBySpec),
    Limit(u64),
    Offset(u64),
    Paginate(PageSpec),
    SetOp(SetOpKind, GraphQuery),
    Temporal(TemporalMode),
}

#[derive(Debug)]
struct ChainNode {
    op: BuilderOp,
    prev: Option<Arc<ChainNode>>,
}

/// An immutable graph query under construction.
#[derive(Debug, Clone)]
pub struct GraphQuery {
    head: Arc<ChainNode>,
}

impl GraphQuery {
    /// Start a query at the given node kind.
    pub fn from(kind: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::start(FromClause {
            kind: kind.into(),
            alias: alias.into(),
            expand_sub_classes: false,
        })
    }

    /// Start a query at the given kind including its subclass closure.
    pub fn from_sub_classes(kind: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::start(FromClause {
            kind: kind.into(),
            alias: alias.into(),
            expand_sub_classes: true,
        })
    }

    fn start(from: FromClause) -> Self {
        Self {
            head: Arc::new(ChainNode {
                op: BuilderOp::From(from),
                prev: None,
            }),
        }
    }

    #[must_use]
    fn push(&self, op: BuilderOp) -> Self {
        Self {
            head: Arc::new(ChainNode {
                op,
                prev: Some(Arc::clone(&self.head)),
            }),
        }
    }

    /// Stable identity of this exact chain value, for identity-keyed reuse.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.head) as usize
    }

    /// Traverse outgoing edges of `edge_kind`.
    #[must_use]
    pub fn traverse(&self, edge_kind: impl Into<String>, edge_alias: impl Into<String>) -> Self {
        self.traverse_with(edge_kind, edge_alias, TraverseOptions::default())
    }

    /// Traverse incoming edges of `edge_kind`.
    #[must_use]
    pub fn traverse_in(&self, edge_kind: impl Into<String>, edge_alias: impl Into<String>) -> Self {
        self.traverse_with(
            edge_kind,
            edge_alias,
            TraverseOptions {
                direction: Some(Direction::In),
                ..Default::default()
            },
        )
    }

    /// Traverse with explicit modifiers (direction, optional, fan-out
    /// anchor, expand mode, recursion).
    #[must_use]
    pub fn traverse_with(
        &self,
        edge_kind: impl Into<String>,
        edge_alias: impl Into<String>,
        options: TraverseOptions,
    ) -> Self {
        self.push(BuilderOp::Traverse {
            edge_kind: edge_kind.into(),
            edge_alias: edge_alias.into(),
            options,
        })
    }

    /// Bind the target of the pending traversal.
    #[must_use]
    pub fn to(&self, kind: impl Into<String>, alias: impl Into<String>) -> Self {
        self.push(BuilderOp::To(ToClause {
            kind: kind.into(),
            alias: alias.into(),
            include_sub_classes: false,
        }))
    }

    /// Bind the target including its subclass closure.
    #[must_use]
    pub fn to_sub_classes(&self, kind: impl Into<String>, alias: impl Into<String>) -> Self {
        self.push(BuilderOp::To(ToClause {
            kind: kind.into(),
            alias: alias.into(),
            include_sub_classes: true,
        }))
    }

    /// Make the pending traversal recursive.
    #[must_use]
    pub fn recursive(&self, spec: RecursiveSpec) -> Self {
        self.push(BuilderOp::Recursive(spec))
    }

    /// Recursive with hop bounds and default cycle prevention.
    #[must_use]
    pub fn recursive_hops(&self, min_hops: u32, max_hops: u32) -> Self {
        self.recursive(RecursiveSpec {
            min_hops,
            max_hops: Some(max_hops),
            cycle_policy: CyclePolicy::Prevent,
            depth_alias: None,
            path_alias: None,
        })
    }

    /// Filter on node properties or metadata.
    #[must_use]
    pub fn where_node(&self, predicate: Predicate) -> Self {
        self.push(BuilderOp::WhereNode(predicate))
    }

    /// Filter on edge properties or metadata.
    #[must_use]
    pub fn where_edge(&self, predicate: Predicate) -> Self {
        self.push(BuilderOp::WhereEdge(predicate))
    }

    /// Project explicit outputs instead of the default node records.
    #[must_use]
    pub fn select(&self, items: impl IntoIterator<Item = (String, Selection)>) -> Self {
        self.push(BuilderOp::Select(Projection {
            items: items.into_iter().collect(),
        }))
    }

    #[must_use]
    pub fn group_by(&self, alias: impl Into<String>, field: impl Into<String>) -> Self {
        self.push(BuilderOp::GroupBy(GroupKey::Field {
            alias: alias.into(),
            field: field.into(),
        }))
    }

    #[must_use]
    pub fn group_by_node(&self, alias: impl Into<String>) -> Self {
        self.push(BuilderOp::GroupBy(GroupKey::Node {
            alias: alias.into(),
        }))
    }

    /// Filter over aggregates; applied after grouping.
    #[must_use]
    pub fn having(&self, predicate: Predicate) -> Self {
        self.push(BuilderOp::Having(predicate))
    }

    #[must_use]
    pub fn order_by(
        &self,
        alias: impl Into<String>,
        field: impl Into<String>,
        direction: SortDirection,
    ) -> Self {
        self.push(BuilderOp::OrderBy(OrderBySpec {
            alias: alias.into(),
            field: Some(field.into()),
            column: None,
            direction,
        }))
    }

    #[must_use]
    pub fn order_by_meta(
        &self,
        alias: impl Into<String>,
        column: SystemColumn,
        direction: SortDirection,
    ) -> Self {
        self.push(BuilderOp::OrderBy(OrderBySpec {
            alias: alias.into(),
            field: None,
            column: Some(column),
            direction,
        }))
    }

    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        self.push(BuilderOp::Limit(n))
    }

    #[must_use]
    pub fn offset(&self, n: u64) -> Self {
        self.push(BuilderOp::Offset(n))
    }

    /// Cursor pagination; combine with `order_by` for a stable key.
    #[must_use]
    pub fn paginate(&self, page: PageSpec) -> Self {
        self.push(BuilderOp::Paginate(page))
    }

    #[must_use]
    pub fn union(&self, other: GraphQuery) -> Self {
        self.push(BuilderOp::SetOp(SetOpKind::Union, other))
    }

    #[must_use]
    pub fn union_all(&self, other: GraphQuery) -> Self {
        self.push(BuilderOp::SetOp(SetOpKind::UnionAll, other))
    }

    #[must_use]
    pub fn intersect(&self, other: GraphQuery) -> Self {
        self.push(BuilderOp::SetOp(SetOpKind::Intersect, other))
    }

    #[must_use]
    pub fn except(&self, other: GraphQuery) -> Self {
        self.push(BuilderOp::SetOp(SetOpKind::Except, other))
    }

    /// Select the temporal filter applied to every table reference.
    #[must_use]
    pub fn temporal(&self, mode: TemporalMode) -> Self {
        self.push(BuilderOp::Temporal(mode))
    }

    /// Shorthand for `temporal(TemporalMode::AsOf(t))`.
    #[must_use]
    pub fn as_of(&self, t: DateTime<Utc>) -> Self {
        self.temporal(TemporalMode::AsOf(t))
    }

    /// Fold the chain into a validated AST.
    pub fn fold(&self) -> Result<QueryAst> {
        let mut ops: Vec<&Arc<ChainNode>> = Vec::new();
        let mut cursor = Some(&self.head);
        while let Some(node) = cursor {
            ops.push(node);
            cursor = node.prev.as_ref();
        }
        ops.reverse();

        let mut ast: Option<QueryAst> = None;
        let mut pending: Option<TraversalStep> = None;

        for node in ops {
            match &node.op {
                BuilderOp::From(from) => {
                    if ast.is_some() {
                        return Err(GraphError::compilation("duplicate from-clause"));
                    }
                    validate_alias(&from.alias)?;
                    ast = Some(QueryAst::new(from.clone()));
                }
                other => {
                    let ast = ast
                        .as_mut()
                        .ok_or_else(|| GraphError::compilation("query must start with from"))?;
                    apply_op(ast, &mut pending, other)?;
                }
            }
        }

        let mut ast =
            ast.ok_or_else(|| GraphError::compilation("query must start with from"))?;
        if let Some(step) = pending {
            return Err(GraphError::compilation(format!(
                "traversal '{}' has no to-clause",
                step.edge_alias
            )));
        }
        validate_ast(&mut ast)?;
        Ok(ast)
    }
}

fn apply_op(
    ast: &mut QueryAst,
    pending: &mut Option<TraversalStep>,
    op: &BuilderOp,
) -> Result<()> {
    match op {
        BuilderOp::From(_) => unreachable!("handled by caller"),
        BuilderOp::Traverse {
            edge_kind,
            edge_alias,
            options,
        } => {
            if pending.is_some() {
                return Err(GraphError::compilation(
                    "previous traversal is missing its to-clause",
                ));
            }
            validate_alias(edge_alias)?;
            *pending = Some(TraversalStep {
                edge_kind: edge_kind.clone(),
                edge_alias: edge_alias.clone(),
                direction: options.direction.unwrap_or(Direction::Out),
                optional: options.optional,
                anchor: options.anchor.clone(),
                expand: options.expand,
                recursive: options.recursive.clone(),
                to: ToClause {
                    kind: String::new(),
                    alias: String::new(),
                    include_sub_classes: false,
                },
            });
        }
        BuilderOp::To(to) => {
            let mut step = pending
                .take()
                .ok_or_else(|| GraphError::compilation("to-clause without a traversal"))?;
            validate_alias(&to.alias)?;
            step.to = to.clone();
            ast.steps.push(step);
        }
        BuilderOp::Recursive(spec) => {
            let step = pending.as_mut().ok_or_else(|| {
                GraphError::compilation("recursive() must follow a traversal")
            })?;
            step.recursive = Some(spec.clone());
        }
        BuilderOp::WhereNode(p) => ast.node_predicates.push(p.clone()),
        BuilderOp::WhereEdge(p) => ast.edge_predicates.push(p.clone()),
        BuilderOp::Select(p) => ast.projection = Some(p.clone()),
        BuilderOp::GroupBy(k) => ast.group_by.push(k.clone()),
        BuilderOp::Having(p) => ast.having = Some(p.clone()),
        BuilderOp::OrderBy(o) => ast.order_by.push(o.clone()),
        BuilderOp::Limit(n) => ast.limit = Some(*n),
        BuilderOp::Offset(n) => ast.offset = Some(*n),
        BuilderOp::Paginate(p) => ast.pagination = Some(p.clone()),
        BuilderOp::SetOp(kind, query) => {
            let other = query.fold()?;
            ast.set_ops.push((*kind, Arc::new(other)));
        }
        BuilderOp::Temporal(mode) => ast.temporal = *mode,
    }
    Ok(())
}

fn validate_alias(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !head_ok || !tail_ok || alias.contains("__") {
        return Err(GraphError::compilation(format!(
            "invalid alias '{alias}': aliases are identifiers without '__'"
        )));
    }
    Ok(())
}

fn validate_ast(ast: &mut QueryAst) -> Result<()> {
    // Alias uniqueness across nodes and edges
    let mut seen: Vec<&str> = Vec::new();
    for alias in ast
        .node_aliases()
        .into_iter()
        .chain(ast.edge_aliases())
    {
        if seen.contains(&alias) {
            return Err(GraphError::compilation(format!(
                "alias '{alias}' is bound more than once"
            )));
        }
        seen.push(alias);
    }

    // Anchors must reference a node alias bound before the step
    let mut bound: Vec<&str> = vec![ast.from.alias.as_str()];
    for step in &ast.steps {
        if let Some(anchor) = &step.anchor {
            if !bound.contains(&anchor.as_str()) {
                return Err(GraphError::compilation(format!(
                    "fan-out anchor '{anchor}' is not bound before traversal '{}'",
                    step.edge_alias
                )));
            }
        }
        bound.push(step.to.alias.as_str());
    }

    // Hop bounds
    for step in &ast.steps {
        if let Some(spec) = &step.recursive {
            if let Some(max) = spec.max_hops {
                if max == 0 || max > crate::query::ast::MAX_HOPS_LIMIT {
                    return Err(GraphError::compilation(format!(
                        "max_hops {max} out of range 1..={}",
                        crate::query::ast::MAX_HOPS_LIMIT
                    )));
                }
                if spec.min_hops > max {
                    return Err(GraphError::compilation(format!(
                        "min_hops {} exceeds max_hops {max}",
                        spec.min_hops
                    )));
                }
            }
        }
    }

    // Predicate aliases must be bound, and on the right side of the split
    for p in &ast.node_predicates {
        for alias in p.referenced_aliases() {
            if !ast.is_node_alias(&alias) {
                return Err(GraphError::compilation(format!(
                    "where_node references non-node alias '{alias}'"
                )));
            }
        }
    }
    for p in &ast.edge_predicates {
        for alias in p.referenced_aliases() {
            if !ast.is_edge_alias(&alias) {
                return Err(GraphError::compilation(format!(
                    "where_edge references non-edge alias '{alias}'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::prop;

    #[test]
    fn test_chain_shares_prefix() {
        let base = GraphQuery::from("Person", "p");
        let a = base.where_node(prop("p", "name").eq("Alice"));
        let b = base.where_node(prop("p", "name").eq("Bob"));
        // base is untouched by either branch
        assert_eq!(base.fold().unwrap().node_predicates.len(), 0);
        assert_eq!(a.fold().unwrap().node_predicates.len(), 1);
        assert_eq!(b.fold().unwrap().node_predicates.len(), 1);
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_fold_pairs_traverse_and_to() {
        let ast = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .to("Person", "f")
            .fold()
            .unwrap();
        assert_eq!(ast.steps.len(), 1);
        assert_eq!(ast.steps[0].edge_alias, "k");
        assert_eq!(ast.steps[0].to.alias, "f");
        assert_eq!(ast.primary_alias(), "f");
    }

    #[test]
    fn test_missing_to_clause_rejected() {
        let err = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .fold()
            .unwrap_err();
        assert!(err.to_string().contains("no to-clause"));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let err = GraphQuery::from("Person", "p")
            .traverse("knows", "p")
            .to("Person", "f")
            .fold()
            .unwrap_err();
        assert!(err.to_string().contains("bound more than once"));
    }

    #[test]
    fn test_unbound_anchor_rejected() {
        let err = GraphQuery::from("Person", "p")
            .traverse_with(
                "knows",
                "k",
                TraverseOptions {
                    anchor: Some("ghost".into()),
                    ..Default::default()
                },
            )
            .to("Person", "f")
            .fold()
            .unwrap_err();
        assert!(err.to_string().contains("anchor 'ghost'"));
    }

    #[test]
    fn test_max_hops_bounds() {
        let err = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .recursive_hops(1, 2000)
            .to("Person", "f")
            .fold()
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_where_edge_alias_check() {
        let err = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .to("Person", "f")
            .where_edge(prop("p", "x").eq(1))
            .fold()
            .unwrap_err();
        assert!(err.to_string().contains("non-edge alias"));
    }

    #[test]
    fn test_invalid_alias_rejected() {
        let err = GraphQuery::from("Person", "bad__alias").fold().unwrap_err();
        assert!(err.to_string().contains("invalid alias"));
    }
}
