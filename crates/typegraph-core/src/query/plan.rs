//! Logical planning: kind-set expansion, predicate hoisting, column pruning.
//!
//! Planning is pure: it reads the AST and the kind registry and produces a
//! [`LogicalPlan`] the emitter renders per dialect. Inverse edge kinds that
//! expansion folds in carry a per-row direction-swap obligation, modeled by
//! the split [`EdgeKindSet`].

use std::collections::HashMap;

use crate::definition::GraphDefinition;
use crate::error::{GraphError, Result};
use crate::model::{Direction, TemporalMode};
use crate::query::ast::{
    AggregateExpr, ExpandMode, GroupKey, OrderBySpec, PageSpec, Projection, QueryAst,
    RecursiveSpec, Selection, SetOpKind,
};
use crate::query::predicate::Predicate;

/// Concrete edge kinds a traversal matches, split by join orientation.
///
/// `forward` kinds join source→target along the declared direction;
/// `swapped` kinds are folded-in inverses stored in the opposite
/// orientation, so their join swaps the endpoint columns per row.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeKindSet {
    pub forward: Vec<String>,
    pub swapped: Vec<String>,
}

impl EdgeKindSet {
    pub fn all_kinds(&self) -> impl Iterator<Item = &str> {
        self.forward
            .iter()
            .chain(self.swapped.iter())
            .map(String::as_str)
    }
}

/// Which columns of an alias later stages actually read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AliasNeeds {
    pub props: bool,
    pub meta: bool,
}

/// The base scan feeding the pipeline.
#[derive(Debug, Clone)]
pub struct BaseScan {
    pub alias: String,
    pub kinds: Vec<String>,
    pub predicates: Vec<Predicate>,
}

/// One planned traversal.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub edge_alias: String,
    /// Resolved source alias (fan-out anchor or the previous target)
    pub source_alias: String,
    pub direction: Direction,
    pub edge_kinds: EdgeKindSet,
    pub to_alias: String,
    pub target_kinds: Vec<String>,
    pub optional: bool,
    pub recursive: Option<RecursiveSpec>,
    /// Predicates fully bound at this step
    pub predicates: Vec<Predicate>,
}

/// The lowered, dialect-neutral query.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub base: BaseScan,
    pub steps: Vec<PlannedStep>,
    pub projection: Projection,
    pub group_by: Vec<GroupKey>,
    pub having: Option<Predicate>,
    pub order_by: Vec<OrderBySpec>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub pagination: Option<PageSpec>,
    pub set_ops: Vec<(SetOpKind, LogicalPlan)>,
    pub temporal: TemporalMode,
    pub needs: HashMap<String, AliasNeeds>,
    /// Last bound node alias: cursor tiebreaker and default output
    pub primary_alias: String,
}

impl LogicalPlan {
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .projection
                .items
                .iter()
                .any(|(_, s)| matches!(s, Selection::Aggregate(_)))
    }

    pub fn needs_for(&self, alias: &str) -> AliasNeeds {
        self.needs.get(alias).copied().unwrap_or_default()
    }

    pub fn step_for_edge_alias(&self, edge_alias: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.edge_alias == edge_alias)
    }
}

/// Plan a folded AST against a graph definition.
pub fn plan(ast: &QueryAst, def: &GraphDefinition) -> Result<LogicalPlan> {
    let registry = def.registry();

    // Pass 1: kind-set expansion.
    def.require_node_kind(&ast.from.kind)?;
    let base_kinds: Vec<String> = if ast.from.expand_sub_classes {
        registry.expand_sub_classes(&ast.from.kind).into_iter().collect()
    } else {
        vec![ast.from.kind.clone()]
    };

    let mut steps: Vec<PlannedStep> = Vec::new();
    let mut prev_alias = ast.from.alias.clone();
    for step in &ast.steps {
        def.require_edge_kind(&step.edge_kind)?;
        def.require_node_kind(&step.to.kind)?;

        let mut forward = vec![step.edge_kind.clone()];
        if matches!(step.expand, ExpandMode::Implying | ExpandMode::All) {
            forward.extend(registry.get_implying_edges(&step.edge_kind));
        }
        let mut swapped: Vec<String> = Vec::new();
        if matches!(step.expand, ExpandMode::Inverse | ExpandMode::All) {
            for kind in &forward {
                if let Some(inv) = registry.get_inverse_edge(kind) {
                    if !forward.iter().any(|k| k == inv) {
                        swapped.push(inv.to_string());
                    }
                }
            }
        }
        forward.dedup();
        swapped.sort();
        swapped.dedup();

        let target_kinds: Vec<String> = if step.to.include_sub_classes {
            registry.expand_sub_classes(&step.to.kind).into_iter().collect()
        } else {
            vec![step.to.kind.clone()]
        };

        let source_alias = step.anchor.clone().unwrap_or_else(|| prev_alias.clone());

        if step.recursive.is_some() && step.optional {
            return Err(GraphError::compilation(
                "a traversal cannot be both optional and recursive",
            ));
        }

        steps.push(PlannedStep {
            edge_alias: step.edge_alias.clone(),
            source_alias,
            direction: step.direction,
            edge_kinds: EdgeKindSet { forward, swapped },
            to_alias: step.to.alias.clone(),
            target_kinds,
            optional: step.optional,
            recursive: flatten_single_hop(step.recursive.clone()),
            predicates: Vec::new(),
        });
        prev_alias = step.to.alias.clone();
    }

    // Default projection: every node alias as a full record, plus declared
    // depth/path outputs of recursive steps.
    let projection = match &ast.projection {
        Some(p) => p.clone(),
        None => {
            let mut items: Vec<(String, Selection)> = ast
                .node_aliases()
                .into_iter()
                .map(|a| {
                    (
                        a.to_string(),
                        Selection::Node {
                            alias: a.to_string(),
                        },
                    )
                })
                .collect();
            for step in &ast.steps {
                if let Some(spec) = &step.recursive {
                    if let Some(key) = &spec.depth_alias {
                        items.push((
                            key.clone(),
                            Selection::Depth {
                                edge_alias: step.edge_alias.clone(),
                            },
                        ));
                    }
                    if let Some(key) = &spec.path_alias {
                        items.push((
                            key.clone(),
                            Selection::Path {
                                edge_alias: step.edge_alias.clone(),
                            },
                        ));
                    }
                }
            }
            Projection { items }
        }
    };

    let mut plan = LogicalPlan {
        base: BaseScan {
            alias: ast.from.alias.clone(),
            kinds: base_kinds,
            predicates: Vec::new(),
        },
        steps,
        projection,
        group_by: ast.group_by.clone(),
        having: ast.having.clone(),
        order_by: ast.order_by.clone(),
        limit: ast.limit,
        offset: ast.offset,
        pagination: ast.pagination.clone(),
        set_ops: Vec::new(),
        temporal: ast.temporal,
        needs: HashMap::new(),
        primary_alias: ast.primary_alias().to_string(),
    };

    // Pass 2: predicate hoisting to the first point of full binding.
    for predicate in ast.node_predicates.iter().chain(&ast.edge_predicates) {
        hoist(&mut plan, ast, predicate)?;
    }

    validate_plan(&plan, ast)?;

    // Pass 3: column pruning.
    compute_needs(&mut plan);

    // Set-op branches are full plans of their own.
    for (kind, sub) in &ast.set_ops {
        let sub_plan = self::plan(sub, def)?;
        if sub_plan.projection.items.iter().map(|(k, _)| k).collect::<Vec<_>>()
            != plan.projection.items.iter().map(|(k, _)| k).collect::<Vec<_>>()
        {
            return Err(GraphError::compilation(
                "set-operation branches must project the same output keys",
            ));
        }
        plan.set_ops.push((*kind, sub_plan));
    }

    Ok(plan)
}

/// A recursive traversal bounded to exactly one hop is a plain join,
/// unless it projects a depth or path output.
fn flatten_single_hop(spec: Option<RecursiveSpec>) -> Option<RecursiveSpec> {
    match spec {
        Some(s)
            if s.min_hops == 1
                && s.max_hops == Some(1)
                && s.depth_alias.is_none()
                && s.path_alias.is_none() =>
        {
            None
        }
        other => other,
    }
}

/// Attach a predicate to the earliest stage where all its aliases are bound.
fn hoist(plan: &mut LogicalPlan, ast: &QueryAst, predicate: &Predicate) -> Result<()> {
    let aliases = predicate.referenced_aliases();

    // binding index: 0 = base, i+1 = step i
    let mut stage = 0usize;
    for alias in &aliases {
        let idx = binding_index(ast, alias).ok_or_else(|| {
            GraphError::compilation(format!("predicate references unbound alias '{alias}'"))
        })?;
        stage = stage.max(idx);
    }

    if stage == 0 {
        plan.base.predicates.push(predicate.clone());
    } else {
        plan.steps[stage - 1].predicates.push(predicate.clone());
    }
    Ok(())
}

fn binding_index(ast: &QueryAst, alias: &str) -> Option<usize> {
    if ast.from.alias == alias {
        return Some(0);
    }
    ast.steps
        .iter()
        .position(|s| s.to.alias == alias || s.edge_alias == alias)
        .map(|i| i + 1)
}

fn validate_plan(plan: &LogicalPlan, ast: &QueryAst) -> Result<()> {
    // v1 non-features: no edge projections or edge predicates inside a
    // recursive traversal, no aggregation over edge aliases.
    for step in &plan.steps {
        if step.recursive.is_some() {
            for p in &step.predicates {
                if p.referenced_aliases().iter().any(|a| a == &step.edge_alias) {
                    return Err(GraphError::compilation(format!(
                        "edge '{}' is not addressable inside a recursive traversal",
                        step.edge_alias
                    )));
                }
            }
            for (_, sel) in &plan.projection.items {
                if let Selection::Edge { alias } = sel {
                    if alias == &step.edge_alias {
                        return Err(GraphError::compilation(format!(
                            "edge '{}' cannot be projected from a recursive traversal",
                            step.edge_alias
                        )));
                    }
                }
            }
        }
    }

    for (_, sel) in &plan.projection.items {
        if let Selection::Aggregate(agg) = sel {
            if ast.is_edge_alias(agg.alias()) && !matches!(agg, AggregateExpr::Count { .. }) {
                return Err(GraphError::compilation(
                    "aggregation over edge aliases is not supported",
                ));
            }
        }
        let referenced = match sel {
            Selection::Node { alias } | Selection::Field { alias, .. } => Some(alias.as_str()),
            Selection::Edge { alias } | Selection::Meta { alias, .. } => Some(alias.as_str()),
            Selection::Aggregate(agg) => Some(agg.alias()),
            Selection::Depth { edge_alias } | Selection::Path { edge_alias } => {
                let step = plan.step_for_edge_alias(edge_alias).ok_or_else(|| {
                    GraphError::compilation(format!("unknown edge alias '{edge_alias}'"))
                })?;
                if step.recursive.is_none() {
                    return Err(GraphError::compilation(format!(
                        "depth/path of '{edge_alias}' requires a recursive traversal"
                    )));
                }
                None
            }
            Selection::Literal { .. } => None,
        };
        if let Some(alias) = referenced {
            if !ast.is_node_alias(alias) && !ast.is_edge_alias(alias) {
                return Err(GraphError::compilation(format!(
                    "projection references unbound alias '{alias}'"
                )));
            }
        }
    }

    // Similarity: top-level only, at most one, and not combined with
    // cursor pagination.
    for p in plan
        .base
        .predicates
        .iter()
        .chain(plan.steps.iter().flat_map(|s| s.predicates.iter()))
    {
        if p.has_similarity() && !matches!(p, Predicate::Similar { .. }) {
            return Err(GraphError::compilation(
                "similarity comparisons cannot appear inside boolean combinators",
            ));
        }
    }
    let similar_count = plan
        .base
        .predicates
        .iter()
        .chain(plan.steps.iter().flat_map(|s| s.predicates.iter()))
        .filter(|p| p.has_similarity())
        .count();
    if similar_count > 1 {
        return Err(GraphError::compilation(
            "at most one similarity comparison per query",
        ));
    }
    if similar_count == 1 && plan.pagination.is_some() {
        return Err(GraphError::compilation(
            "similarity ordering cannot be combined with cursor pagination",
        ));
    }

    // Pagination needs an explicit ordering for a deterministic cursor key.
    if let Some(page) = &plan.pagination {
        if page.first.is_some() && page.last.is_some() {
            return Err(GraphError::compilation(
                "pagination cannot combine first and last",
            ));
        }
        if plan.order_by.is_empty() {
            return Err(GraphError::compilation(
                "cursor pagination requires order_by",
            ));
        }
        if plan.is_aggregate() {
            return Err(GraphError::compilation(
                "cursor pagination cannot be combined with aggregation",
            ));
        }
    }

    Ok(())
}

/// Pass 3: record which aliases need their props/meta columns carried.
fn compute_needs(plan: &mut LogicalPlan) {
    let mut needs: HashMap<String, AliasNeeds> = HashMap::new();
    let need_props = |needs: &mut HashMap<String, AliasNeeds>, alias: &str| {
        needs.entry(alias.to_string()).or_default().props = true;
    };
    let need_meta = |needs: &mut HashMap<String, AliasNeeds>, alias: &str| {
        needs.entry(alias.to_string()).or_default().meta = true;
    };

    for (_, sel) in &plan.projection.items {
        match sel {
            Selection::Node { alias } | Selection::Edge { alias } => {
                need_props(&mut needs, alias);
                need_meta(&mut needs, alias);
            }
            Selection::Field { alias, .. } => need_props(&mut needs, alias),
            Selection::Meta { alias, .. } => need_meta(&mut needs, alias),
            Selection::Aggregate(agg) => {
                if !matches!(agg, AggregateExpr::Count { .. }) {
                    need_props(&mut needs, agg.alias());
                }
            }
            Selection::Depth { .. } | Selection::Path { .. } | Selection::Literal { .. } => {}
        }
    }

    let predicate_needs = |needs: &mut HashMap<String, AliasNeeds>, p: &Predicate| {
        for alias in p.referenced_aliases() {
            // A predicate may read either side; carrying both prop and meta
            // for referenced aliases keeps the join emitters simple.
            needs.entry(alias.clone()).or_default().props = true;
        }
    };
    for p in &plan.base.predicates {
        predicate_needs(&mut needs, p);
    }
    for step in &plan.steps {
        for p in &step.predicates {
            predicate_needs(&mut needs, p);
        }
    }
    if let Some(h) = &plan.having {
        predicate_needs(&mut needs, h);
    }

    for o in &plan.order_by {
        if o.field.is_some() {
            need_props(&mut needs, &o.alias);
        } else {
            need_meta(&mut needs, &o.alias);
        }
    }
    for g in &plan.group_by {
        if let GroupKey::Field { alias, .. } = g {
            need_props(&mut needs, alias);
        }
    }

    // A recursive traversal seeds its target columns from the source
    // alias, so the source must carry whatever the target carries.
    // Reverse order propagates through chained recursions.
    for i in (0..plan.steps.len()).rev() {
        if plan.steps[i].recursive.is_some() {
            let target = needs
                .get(&plan.steps[i].to_alias)
                .copied()
                .unwrap_or_default();
            let source = needs
                .entry(plan.steps[i].source_alias.clone())
                .or_default();
            source.props |= target.props;
            source.meta |= target.meta;
        }
    }

    plan.needs = needs;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeKindDef, GraphDefinition, NodeKindDef};
    use crate::ontology::OntologyRelation;
    use crate::query::builder::{GraphQuery, TraverseOptions};
    use crate::query::predicate::prop;
    use crate::schema::{FieldSpec, PropertySchema};
    use crate::value::ValueType;

    fn definition() -> GraphDefinition {
        let person = NodeKindDef::new(
            "Person",
            PropertySchema::new().field(FieldSpec::new("name", ValueType::String)),
        );
        let movie = NodeKindDef::new(
            "Movie",
            PropertySchema::new().field(FieldSpec::new("title", ValueType::String)),
        );
        let documentary = NodeKindDef::new(
            "Documentary",
            PropertySchema::new().field(FieldSpec::new("title", ValueType::String)),
        );
        GraphDefinition::builder()
            .node(person)
            .node(movie)
            .node(documentary)
            .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
            .edge(EdgeKindDef::new("marriedTo", ["Person"], ["Person"]))
            .edge(EdgeKindDef::new("watched", ["Person"], ["Movie"]))
            .edge(EdgeKindDef::new("watchedBy", ["Movie"], ["Person"]))
            .relation(OntologyRelation::SubClassOf {
                child: "Documentary".into(),
                parent: "Movie".into(),
            })
            .relation(OntologyRelation::InverseOf {
                edge_a: "watched".into(),
                edge_b: "watchedBy".into(),
            })
            .relation(OntologyRelation::Implies {
                edge_a: "marriedTo".into(),
                edge_b: "knows".into(),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_inverse_expansion_populates_swapped() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("watched", "w")
            .to("Movie", "m")
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        assert_eq!(plan.steps[0].edge_kinds.forward, vec!["watched".to_string()]);
        assert_eq!(plan.steps[0].edge_kinds.swapped, vec!["watchedBy".to_string()]);
    }

    #[test]
    fn test_implying_expansion() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse_with(
                "knows",
                "k",
                TraverseOptions {
                    expand: ExpandMode::Implying,
                    ..Default::default()
                },
            )
            .to("Person", "f")
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        assert!(plan.steps[0].edge_kinds.forward.contains(&"marriedTo".to_string()));
        assert!(plan.steps[0].edge_kinds.swapped.is_empty());
    }

    #[test]
    fn test_subclass_expansion_of_target() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("watched", "w")
            .to_sub_classes("Movie", "m")
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        let mut kinds = plan.steps[0].target_kinds.clone();
        kinds.sort();
        assert_eq!(kinds, vec!["Documentary".to_string(), "Movie".to_string()]);
    }

    #[test]
    fn test_predicate_hoisting() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .where_node(prop("p", "name").eq("Alice"))
            .traverse("knows", "k")
            .to("Person", "f")
            .where_node(prop("f", "name").eq("Bob"))
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        assert_eq!(plan.base.predicates.len(), 1);
        assert_eq!(plan.steps[0].predicates.len(), 1);
    }

    #[test]
    fn test_single_hop_recursion_flattened() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .recursive_hops(1, 1)
            .to("Person", "f")
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        assert!(plan.steps[0].recursive.is_none());
    }

    #[test]
    fn test_column_pruning_tracks_usage() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .to("Person", "f")
            .select([(
                "friend".to_string(),
                Selection::Field {
                    alias: "f".into(),
                    field: "name".into(),
                },
            )])
            .fold()
            .unwrap();
        let plan = plan(&ast, &def).unwrap();
        assert!(plan.needs_for("f").props);
        assert!(!plan.needs_for("p").props);
        assert!(!plan.needs_for("k").props);
    }

    #[test]
    fn test_pagination_requires_order() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .paginate(PageSpec {
                first: Some(3),
                ..Default::default()
            })
            .fold()
            .unwrap();
        let err = plan(&ast, &def).unwrap_err();
        assert!(err.to_string().contains("requires order_by"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let def = definition();
        let ast = GraphQuery::from("Ghost", "g").fold().unwrap();
        assert!(plan(&ast, &def).is_err());
    }
}
