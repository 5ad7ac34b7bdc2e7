//! Graph definition: kind registration and definition-time validation.
//!
//! A [`GraphDefinition`] aggregates node-kind and edge-kind declarations
//! with their uniqueness constraints, cardinality, delete behavior, and the
//! ontology relations between kinds. `build()` validates the whole
//! definition, constructs the [`KindRegistry`], and computes the canonical
//! schema document and its hash used for schema versioning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GraphError, Result};
use crate::model::{Cardinality, DeleteBehavior};
use crate::ontology::{KindRegistry, OntologyRelation};
use crate::schema::PropertySchema;
use crate::value::Collation;

/// Scope of a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UniqueScope {
    /// The constraint applies within the declaring kind only
    #[default]
    Kind,
    /// The constraint spans the rooted subclass component of the kind
    KindWithSubClasses,
}

/// A null/not-null condition restricting which rows participate in a
/// partial uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "camelCase")]
pub enum WhereCondition {
    IsNull { field: String },
    IsNotNull { field: String },
}

impl WhereCondition {
    pub fn field(&self) -> &str {
        match self {
            WhereCondition::IsNull { field } | WhereCondition::IsNotNull { field } => field,
        }
    }
}

/// A uniqueness constraint over a node kind's property fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub scope: UniqueScope,
    #[serde(default)]
    pub collation: Collation,
    /// Partial-index predicate; all conditions must hold for a row to
    /// participate in the constraint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub where_conditions: Vec<WhereCondition>,
}

impl UniqueConstraint {
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            scope: UniqueScope::Kind,
            collation: Collation::Binary,
            where_conditions: Vec::new(),
        }
    }

    pub fn scoped(mut self, scope: UniqueScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn collated(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub fn when(mut self, condition: WhereCondition) -> Self {
        self.where_conditions.push(condition);
        self
    }
}

/// A declared node kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeKindDef {
    pub name: String,
    pub schema: PropertySchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[serde(default)]
    pub on_delete: DeleteBehavior,
}

impl NodeKindDef {
    pub fn new(name: impl Into<String>, schema: PropertySchema) -> Self {
        Self {
            name: name.into(),
            schema,
            unique_constraints: Vec::new(),
            on_delete: DeleteBehavior::Restrict,
        }
    }

    pub fn unique(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.on_delete = behavior;
        self
    }

    pub fn constraint(&self, name: &str) -> Option<&UniqueConstraint> {
        self.unique_constraints.iter().find(|c| c.name == name)
    }
}

/// A declared edge kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeKindDef {
    pub name: String,
    pub schema: PropertySchema,
    pub from_kinds: Vec<String>,
    pub to_kinds: Vec<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl EdgeKindDef {
    pub fn new(
        name: impl Into<String>,
        from_kinds: impl IntoIterator<Item = impl Into<String>>,
        to_kinds: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            schema: PropertySchema::new(),
            from_kinds: from_kinds.into_iter().map(Into::into).collect(),
            to_kinds: to_kinds.into_iter().map(Into::into).collect(),
            cardinality: Cardinality::Many,
        }
    }

    pub fn with_schema(mut self, schema: PropertySchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }
}

/// Accumulates declarations; `build()` validates and freezes them.
#[derive(Debug, Default)]
pub struct GraphDefinitionBuilder {
    nodes: Vec<NodeKindDef>,
    edges: Vec<EdgeKindDef>,
    relations: Vec<OntologyRelation>,
}

impl GraphDefinitionBuilder {
    pub fn node(mut self, def: NodeKindDef) -> Self {
        self.nodes.push(def);
        self
    }

    pub fn edge(mut self, def: EdgeKindDef) -> Self {
        self.edges.push(def);
        self
    }

    pub fn relation(mut self, rel: OntologyRelation) -> Self {
        self.relations.push(rel);
        self
    }

    pub fn build(self) -> Result<GraphDefinition> {
        let mut nodes: BTreeMap<String, NodeKindDef> = BTreeMap::new();
        for def in self.nodes {
            for constraint in &def.unique_constraints {
                if constraint.fields.is_empty() {
                    return Err(GraphError::compilation(format!(
                        "constraint '{}' on '{}' has no fields",
                        constraint.name, def.name
                    )));
                }
                for field in constraint
                    .fields
                    .iter()
                    .map(String::as_str)
                    .chain(constraint.where_conditions.iter().map(WhereCondition::field))
                {
                    if !def.schema.has_field(field) {
                        return Err(GraphError::compilation(format!(
                            "constraint '{}' on '{}' references unknown field '{}'",
                            constraint.name, def.name, field
                        )));
                    }
                }
                if def
                    .unique_constraints
                    .iter()
                    .filter(|c| c.name == constraint.name)
                    .count()
                    > 1
                {
                    return Err(GraphError::compilation(format!(
                        "duplicate constraint name '{}' on '{}'",
                        constraint.name, def.name
                    )));
                }
            }
            if nodes.insert(def.name.clone(), def).is_some() {
                return Err(GraphError::compilation("duplicate node kind"));
            }
        }

        let mut edges: BTreeMap<String, EdgeKindDef> = BTreeMap::new();
        for def in self.edges {
            if def.from_kinds.is_empty() || def.to_kinds.is_empty() {
                return Err(GraphError::compilation(format!(
                    "edge kind '{}' must declare at least one from-kind and to-kind",
                    def.name
                )));
            }
            for endpoint in def.from_kinds.iter().chain(def.to_kinds.iter()) {
                if !nodes.contains_key(endpoint) {
                    return Err(GraphError::compilation(format!(
                        "edge kind '{}' references undeclared node kind '{}'",
                        def.name, endpoint
                    )));
                }
            }
            if nodes.contains_key(&def.name) {
                return Err(GraphError::compilation(format!(
                    "kind name '{}' is used for both a node and an edge kind",
                    def.name
                )));
            }
            if edges.insert(def.name.clone(), def).is_some() {
                return Err(GraphError::compilation("duplicate edge kind"));
            }
        }

        let registry = KindRegistry::new(
            nodes.keys().cloned(),
            edges.keys().cloned(),
            self.relations,
        )?;

        let doc = SchemaDocument {
            nodes: &nodes,
            edges: &edges,
            relations: registry.relations(),
        };
        let schema_doc = serde_json::to_string(&doc)
            .map_err(|e| GraphError::compilation(format!("schema document: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(schema_doc.as_bytes());
        let schema_hash = format!("{:x}", hasher.finalize());

        Ok(GraphDefinition {
            nodes,
            edges,
            registry,
            schema_doc,
            schema_hash,
        })
    }
}

#[derive(Serialize)]
struct SchemaDocument<'a> {
    nodes: &'a BTreeMap<String, NodeKindDef>,
    edges: &'a BTreeMap<String, EdgeKindDef>,
    relations: &'a [OntologyRelation],
}

/// A validated, immutable graph definition.
#[derive(Debug, Clone)]
pub struct GraphDefinition {
    nodes: BTreeMap<String, NodeKindDef>,
    edges: BTreeMap<String, EdgeKindDef>,
    registry: KindRegistry,
    schema_doc: String,
    schema_hash: String,
}

impl GraphDefinition {
    pub fn builder() -> GraphDefinitionBuilder {
        GraphDefinitionBuilder::default()
    }

    pub fn node_kind(&self, name: &str) -> Option<&NodeKindDef> {
        self.nodes.get(name)
    }

    pub fn edge_kind(&self, name: &str) -> Option<&EdgeKindDef> {
        self.edges.get(name)
    }

    pub fn node_kinds(&self) -> impl Iterator<Item = &NodeKindDef> {
        self.nodes.values()
    }

    pub fn edge_kinds(&self) -> impl Iterator<Item = &EdgeKindDef> {
        self.edges.values()
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Canonical JSON document describing the definition.
    pub fn schema_doc(&self) -> &str {
        &self.schema_doc
    }

    /// sha256 of the canonical schema document.
    pub fn schema_hash(&self) -> &str {
        &self.schema_hash
    }

    /// Require a node kind by name.
    pub fn require_node_kind(&self, name: &str) -> Result<&NodeKindDef> {
        self.node_kind(name)
            .ok_or_else(|| GraphError::compilation(format!("unknown node kind '{name}'")))
    }

    /// Require an edge kind by name.
    pub fn require_edge_kind(&self, name: &str) -> Result<&EdgeKindDef> {
        self.edge_kind(name)
            .ok_or_else(|| GraphError::compilation(format!("unknown edge kind '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use crate::value::ValueType;

    fn person() -> NodeKindDef {
        NodeKindDef::new(
            "Person",
            PropertySchema::new()
                .field(FieldSpec::new("name", ValueType::String).required())
                .field(FieldSpec::new("email", ValueType::String)),
        )
        .unique(UniqueConstraint::new("by_email", ["email"]))
    }

    #[test]
    fn test_build_minimal_definition() {
        let def = GraphDefinition::builder()
            .node(person())
            .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
            .build()
            .unwrap();
        assert!(def.node_kind("Person").is_some());
        assert!(def.edge_kind("knows").is_some());
        assert_eq!(def.schema_hash().len(), 64);
    }

    #[test]
    fn test_schema_hash_is_stable() {
        let build = || {
            GraphDefinition::builder()
                .node(person())
                .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
                .build()
                .unwrap()
        };
        assert_eq!(build().schema_hash(), build().schema_hash());
    }

    #[test]
    fn test_constraint_unknown_field_rejected() {
        let err = GraphDefinition::builder()
            .node(
                NodeKindDef::new(
                    "Person",
                    PropertySchema::new().field(FieldSpec::new("name", ValueType::String)),
                )
                .unique(UniqueConstraint::new("bad", ["ghost"])),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown field 'ghost'"));
    }

    #[test]
    fn test_edge_with_undeclared_endpoint_rejected() {
        let err = GraphDefinition::builder()
            .node(person())
            .edge(EdgeKindDef::new("wrote", ["Person"], ["Book"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared node kind 'Book'"));
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let err = GraphDefinition::builder()
            .node(person())
            .edge(EdgeKindDef::new("knows", Vec::<String>::new(), ["Person"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }
}
