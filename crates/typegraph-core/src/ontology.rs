//! Ontology relations and the kind registry.
//!
//! The [`KindRegistry`] is built once from the declared kinds and ontology
//! relations, precomputes every closure the constraint engine and query
//! compiler consult (subclass ancestors/descendants, inherited disjoint
//! pairs, edge inverses, edge implication), and is immutable afterwards.
//! Cyclic subclass or implication declarations, double inverses, and
//! references to undeclared kinds are rejected at construction.

use std::collections::{BTreeSet, HashMap, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// A declarative relationship over node or edge kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "relation", rename_all = "camelCase")]
pub enum OntologyRelation {
    /// `child` is a subclass of `parent`
    SubClassOf { child: String, parent: String },
    /// No logical id may carry both kinds (inherited by subclasses)
    DisjointWith { a: String, b: String },
    /// Bidirectional subclass relation
    EquivalentTo { a: String, b: String },
    /// Identity over external IRIs; informational
    SameAs { a: String, b: String },
    /// Mereological part relation; informational
    PartOf { part: String, whole: String },
    /// Inverse mereological relation; informational
    HasPart { whole: String, part: String },
    /// Loose association; informational
    RelatedTo { a: String, b: String },
    /// `edge_a` and `edge_b` are inverse edge kinds
    InverseOf { edge_a: String, edge_b: String },
    /// Every `edge_a` edge implies an `edge_b` edge
    Implies { edge_a: String, edge_b: String },
    /// User-defined meta-relation over kinds
    Custom {
        name: String,
        a: String,
        b: String,
        #[serde(default)]
        transitive: bool,
    },
}

/// Precomputed ontology closures over the declared kinds.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    node_kinds: BTreeSet<String>,
    edge_kinds: BTreeSet<String>,
    /// kind -> strict ancestors under subclass/equivalence
    ancestors: HashMap<String, BTreeSet<String>>,
    /// kind -> strict descendants under subclass/equivalence
    descendants: HashMap<String, BTreeSet<String>>,
    /// base disjoint pairs, stored sorted
    disjoint_base: BTreeSet<(String, String)>,
    /// edge kind -> its declared inverse
    inverse: HashMap<String, String>,
    /// edge kind -> transitive closure of implied edge kinds (downstream)
    implied: HashMap<String, BTreeSet<String>>,
    /// edge kind -> transitive closure of implying edge kinds (upstream)
    implying: HashMap<String, BTreeSet<String>>,
    relations: Vec<OntologyRelation>,
}

impl KindRegistry {
    /// Build the registry, computing all closures.
    pub fn new(
        node_kinds: impl IntoIterator<Item = String>,
        edge_kinds: impl IntoIterator<Item = String>,
        relations: Vec<OntologyRelation>,
    ) -> Result<Self> {
        let node_kinds: BTreeSet<String> = node_kinds.into_iter().collect();
        let edge_kinds: BTreeSet<String> = edge_kinds.into_iter().collect();

        let mut names: Vec<&str> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for k in node_kinds.iter().chain(edge_kinds.iter()) {
            index.entry(k.as_str()).or_insert_with(|| {
                names.push(k.as_str());
                names.len() - 1
            });
        }

        let require_node = |k: &str| -> Result<()> {
            if node_kinds.contains(k) {
                Ok(())
            } else {
                Err(GraphError::compilation(format!(
                    "ontology relation references unknown node kind '{k}'"
                )))
            }
        };
        let require_edge = |k: &str| -> Result<()> {
            if edge_kinds.contains(k) {
                Ok(())
            } else {
                Err(GraphError::compilation(format!(
                    "ontology relation references unknown edge kind '{k}'"
                )))
            }
        };

        // Subclass DAG (strict subclass only) and the widened assignability
        // graph where equivalence runs both ways.
        let mut subclass_dag: DiGraphMap<usize, ()> = DiGraphMap::new();
        let mut assignable: DiGraphMap<usize, ()> = DiGraphMap::new();
        let mut implication: DiGraphMap<usize, ()> = DiGraphMap::new();
        let mut disjoint_base: BTreeSet<(String, String)> = BTreeSet::new();
        let mut inverse: HashMap<String, String> = HashMap::new();

        for rel in &relations {
            match rel {
                OntologyRelation::SubClassOf { child, parent } => {
                    require_node(child)?;
                    require_node(parent)?;
                    subclass_dag.add_edge(index[child.as_str()], index[parent.as_str()], ());
                    assignable.add_edge(index[child.as_str()], index[parent.as_str()], ());
                }
                OntologyRelation::EquivalentTo { a, b } => {
                    require_node(a)?;
                    require_node(b)?;
                    assignable.add_edge(index[a.as_str()], index[b.as_str()], ());
                    assignable.add_edge(index[b.as_str()], index[a.as_str()], ());
                }
                OntologyRelation::DisjointWith { a, b } => {
                    require_node(a)?;
                    require_node(b)?;
                    if a == b {
                        return Err(GraphError::compilation(format!(
                            "kind '{a}' cannot be disjoint with itself"
                        )));
                    }
                    disjoint_base.insert(sorted_pair(a, b));
                }
                OntologyRelation::InverseOf { edge_a, edge_b } => {
                    require_edge(edge_a)?;
                    require_edge(edge_b)?;
                    for (k, v) in [(edge_a, edge_b), (edge_b, edge_a)] {
                        if let Some(existing) = inverse.get(k.as_str()) {
                            if existing != v.as_str() {
                                return Err(GraphError::compilation(format!(
                                    "edge kind '{k}' already has inverse '{existing}'"
                                )));
                            }
                        }
                        inverse.insert(k.clone(), v.clone());
                    }
                }
                OntologyRelation::Implies { edge_a, edge_b } => {
                    require_edge(edge_a)?;
                    require_edge(edge_b)?;
                    implication.add_edge(index[edge_a.as_str()], index[edge_b.as_str()], ());
                }
                OntologyRelation::SameAs { a, b }
                | OntologyRelation::RelatedTo { a, b }
                | OntologyRelation::Custom { a, b, .. } => {
                    require_node(a)?;
                    require_node(b)?;
                }
                OntologyRelation::PartOf { part, whole }
                | OntologyRelation::HasPart { whole, part } => {
                    require_node(part)?;
                    require_node(whole)?;
                }
            }
        }

        if is_cyclic_directed(&subclass_dag) {
            return Err(GraphError::compilation("cyclic subClassOf relation"));
        }
        if is_cyclic_directed(&implication) {
            return Err(GraphError::compilation("cyclic edge implication"));
        }

        let mut ancestors: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut descendants: HashMap<String, BTreeSet<String>> = HashMap::new();
        for kind in &node_kinds {
            let idx = index[kind.as_str()];
            let up = reach(&assignable, idx, petgraph::Direction::Outgoing, &names);
            let down = reach(&assignable, idx, petgraph::Direction::Incoming, &names);
            ancestors.insert(kind.clone(), up);
            descendants.insert(kind.clone(), down);
        }

        let mut implied: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut implying: HashMap<String, BTreeSet<String>> = HashMap::new();
        for kind in &edge_kinds {
            let idx = index[kind.as_str()];
            implied.insert(
                kind.clone(),
                reach(&implication, idx, petgraph::Direction::Outgoing, &names),
            );
            implying.insert(
                kind.clone(),
                reach(&implication, idx, petgraph::Direction::Incoming, &names),
            );
        }

        Ok(Self {
            node_kinds,
            edge_kinds,
            ancestors,
            descendants,
            disjoint_base,
            inverse,
            implied,
            implying,
            relations,
        })
    }

    pub fn is_node_kind(&self, kind: &str) -> bool {
        self.node_kinds.contains(kind)
    }

    pub fn is_edge_kind(&self, kind: &str) -> bool {
        self.edge_kinds.contains(kind)
    }

    pub fn node_kinds(&self) -> impl Iterator<Item = &str> {
        self.node_kinds.iter().map(String::as_str)
    }

    pub fn edge_kinds(&self) -> impl Iterator<Item = &str> {
        self.edge_kinds.iter().map(String::as_str)
    }

    pub fn relations(&self) -> &[OntologyRelation] {
        &self.relations
    }

    /// Strict ancestors of `kind` (exclusive) under subclass/equivalence.
    pub fn ancestors(&self, kind: &str) -> BTreeSet<String> {
        self.ancestors.get(kind).cloned().unwrap_or_default()
    }

    /// Strict descendants of `kind` (exclusive).
    pub fn descendants(&self, kind: &str) -> BTreeSet<String> {
        self.descendants.get(kind).cloned().unwrap_or_default()
    }

    /// `a == b`, or `b` is an ancestor of `a`.
    pub fn is_assignable_to(&self, a: &str, b: &str) -> bool {
        a == b || self.ancestors.get(a).is_some_and(|s| s.contains(b))
    }

    /// The inclusive descendant closure of `kind`, for subclass-aware
    /// queries and uniqueness scopes.
    pub fn expand_sub_classes(&self, kind: &str) -> BTreeSet<String> {
        let mut set = self.descendants(kind);
        set.insert(kind.to_string());
        set
    }

    /// The uniqueness scope for `kindWithSubClasses`: the descendant
    /// closures of the root ancestors of `kind` (its connected subclass
    /// component).
    pub fn unique_scope(&self, kind: &str) -> BTreeSet<String> {
        let mut roots: Vec<String> = self
            .expand_ancestors_inclusive(kind)
            .into_iter()
            .filter(|a| {
                // a root has no ancestor outside its own equivalence class
                self.ancestors(a)
                    .iter()
                    .all(|up| self.is_assignable_to(up, a))
            })
            .collect();
        if roots.is_empty() {
            roots.push(kind.to_string());
        }
        let mut scope = BTreeSet::new();
        for root in roots {
            scope.extend(self.expand_sub_classes(&root));
        }
        scope
    }

    fn expand_ancestors_inclusive(&self, kind: &str) -> BTreeSet<String> {
        let mut set = self.ancestors(kind);
        set.insert(kind.to_string());
        set
    }

    /// Whether `x` and `y` may not share a logical id. Disjointness is
    /// inherited: any ancestor pair being disjoint makes the pair disjoint.
    pub fn are_disjoint(&self, x: &str, y: &str) -> bool {
        if x == y {
            return false;
        }
        let xs = self.expand_ancestors_inclusive(x);
        let ys = self.expand_ancestors_inclusive(y);
        for a in &xs {
            for b in &ys {
                if a != b && self.disjoint_base.contains(&sorted_pair(a, b)) {
                    return true;
                }
            }
        }
        false
    }

    /// The declared inverse of `edge_kind`, if any.
    pub fn get_inverse_edge(&self, edge_kind: &str) -> Option<&str> {
        self.inverse.get(edge_kind).map(String::as_str)
    }

    /// Transitive closure of edge kinds implied by `edge_kind` (exclusive).
    pub fn get_implied_edges(&self, edge_kind: &str) -> BTreeSet<String> {
        self.implied.get(edge_kind).cloned().unwrap_or_default()
    }

    /// Transitive closure of edge kinds that imply `edge_kind` (exclusive).
    pub fn get_implying_edges(&self, edge_kind: &str) -> BTreeSet<String> {
        self.implying.get(edge_kind).cloned().unwrap_or_default()
    }
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// All kinds reachable from `start` in the given direction, exclusive.
fn reach(
    graph: &DiGraphMap<usize, ()>,
    start: usize,
    dir: petgraph::Direction,
    names: &[&str],
) -> BTreeSet<String> {
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(start);
    while let Some(n) = queue.pop_front() {
        if !graph.contains_node(n) {
            continue;
        }
        for next in graph.neighbors_directed(n, dir) {
            if next != start && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.into_iter().map(|i| names[i].to_string()).collect()
}
