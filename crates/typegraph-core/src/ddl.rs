//! Index DDL generation.
//!
//! Declarative property-path index specs are lowered to dialect
//! `CREATE [UNIQUE] INDEX` text for external migrations. The core only
//! generates DDL text; executing it is the operator's concern. Literal
//! values are inlined (no binds), identifiers quoted.

use serde_json::Value as JsonValue;

use crate::adapter::Dialect;
use crate::definition::GraphDefinition;
use crate::error::{GraphError, Result};
use crate::query::ast::SortDirection;
use crate::query::dialect::{json_text, quote_ident, quote_str, quoted_list};
use crate::query::predicate::{CompareOp, Operand, Predicate};

/// Which table an index targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTarget {
    NodeKind(String),
    EdgeKind(String),
}

/// A declarative index over a node or edge kind's property paths.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub target: IndexTarget,
    /// Property paths; dots descend into JSON objects (`address.city`)
    pub fields: Vec<String>,
    /// Extra paths appended to the key list (`INCLUDE` has no SQLite
    /// equivalent, so both dialects widen the key)
    pub covering_fields: Vec<String>,
    pub unique: bool,
    /// Include the kind's subclass closure in the partial filter
    pub with_sub_classes: bool,
    pub direction: Option<SortDirection>,
    /// Partial-index predicate over system columns and property fields
    pub where_predicate: Option<Predicate>,
    pub if_not_exists: bool,
}

impl IndexSpec {
    pub fn new(
        name: impl Into<String>,
        target: IndexTarget,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            fields: fields.into_iter().map(Into::into).collect(),
            covering_fields: Vec::new(),
            unique: false,
            with_sub_classes: false,
            direction: None,
            where_predicate: None,
            if_not_exists: true,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn covering(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.covering_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sub_classes(mut self) -> Self {
        self.with_sub_classes = true;
        self
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.where_predicate = Some(predicate);
        self
    }
}

/// Emit one `CREATE [UNIQUE] INDEX` statement for the spec.
pub fn generate_index(spec: &IndexSpec, def: &GraphDefinition, dialect: Dialect) -> Result<String> {
    let (table, kind) = match &spec.target {
        IndexTarget::NodeKind(kind) => {
            def.require_node_kind(kind)?;
            ("nodes", kind.clone())
        }
        IndexTarget::EdgeKind(kind) => {
            def.require_edge_kind(kind)?;
            ("edges", kind.clone())
        }
    };
    if spec.fields.is_empty() {
        return Err(GraphError::compilation(format!(
            "index '{}' has no key fields",
            spec.name
        )));
    }

    let mut keys: Vec<String> = Vec::new();
    for (i, field) in spec
        .fields
        .iter()
        .chain(spec.covering_fields.iter())
        .enumerate()
    {
        let path: Vec<String> = field.split('.').map(str::to_string).collect();
        let mut expr = json_text(dialect, "props", &path);
        // Direction applies to key fields only.
        if i < spec.fields.len() {
            if let Some(direction) = spec.direction {
                expr.push_str(match direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            }
        }
        keys.push(expr);
    }

    let kinds: Vec<String> = if spec.with_sub_classes {
        match &spec.target {
            IndexTarget::NodeKind(k) => {
                def.registry().expand_sub_classes(k).into_iter().collect()
            }
            IndexTarget::EdgeKind(k) => vec![k.clone()],
        }
    } else {
        vec![kind]
    };

    let mut where_sql = format!("kind IN ({}) AND deleted_at IS NULL", quoted_list(&kinds));
    if let Some(predicate) = &spec.where_predicate {
        where_sql.push_str(" AND ");
        where_sql.push_str(&render_inline_predicate(predicate, dialect)?);
    }

    Ok(format!(
        "CREATE {unique}INDEX {ine}{name} ON {table} ({keys}) WHERE {where_sql}",
        unique = if spec.unique { "UNIQUE " } else { "" },
        ine = if spec.if_not_exists {
            "IF NOT EXISTS "
        } else {
            ""
        },
        name = quote_ident(&spec.name),
        keys = keys.join(", "),
    ))
}

/// Render a predicate with literals inlined, for DDL text. The operand
/// alias is ignored: an index sees a single table.
fn render_inline_predicate(predicate: &Predicate, dialect: Dialect) -> Result<String> {
    match predicate {
        Predicate::And(children) => join_children(children, " AND ", dialect),
        Predicate::Or(children) => join_children(children, " OR ", dialect),
        Predicate::Not(child) => Ok(format!(
            "NOT ({})",
            render_inline_predicate(child, dialect)?
        )),
        Predicate::Similar { .. } | Predicate::AggregateCompare { .. } => Err(
            GraphError::compilation("index predicates support plain comparisons only"),
        ),
        Predicate::Compare { left, op, args } => {
            let left_sql = match left {
                Operand::System { column, .. } => column.column_name().to_string(),
                Operand::Prop { path, .. } => json_text(dialect, "props", path),
                _ => {
                    return Err(GraphError::compilation(
                        "index predicate left side must be a column or property",
                    ))
                }
            };
            let literal = |operand: &Operand| -> Result<String> {
                match operand {
                    Operand::Literal { value } => Ok(inline_literal(value, dialect)),
                    _ => Err(GraphError::compilation(
                        "index predicates inline literal values only",
                    )),
                }
            };
            match op {
                CompareOp::IsNull => Ok(format!("{left_sql} IS NULL")),
                CompareOp::IsNotNull => Ok(format!("{left_sql} IS NOT NULL")),
                CompareOp::Eq => Ok(format!("{left_sql} = {}", literal(&args[0])?)),
                CompareOp::Neq => Ok(format!("{left_sql} <> {}", literal(&args[0])?)),
                CompareOp::Gt => Ok(format!("{left_sql} > {}", literal(&args[0])?)),
                CompareOp::Gte => Ok(format!("{left_sql} >= {}", literal(&args[0])?)),
                CompareOp::Lt => Ok(format!("{left_sql} < {}", literal(&args[0])?)),
                CompareOp::Lte => Ok(format!("{left_sql} <= {}", literal(&args[0])?)),
                CompareOp::In => {
                    let values: Result<Vec<String>> = args.iter().map(literal).collect();
                    Ok(format!("{left_sql} IN ({})", values?.join(", ")))
                }
                _ => Err(GraphError::compilation(
                    "unsupported operator in an index predicate",
                )),
            }
        }
    }
}

fn join_children(children: &[Predicate], sep: &str, dialect: Dialect) -> Result<String> {
    let parts: Result<Vec<String>> = children
        .iter()
        .map(|c| render_inline_predicate(c, dialect))
        .collect();
    Ok(format!("({})", parts?.join(sep)))
}

fn inline_literal(value: &JsonValue, dialect: Dialect) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => crate::query::dialect::bool_literal(dialect, *b).to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => quote_str(s),
        other => quote_str(&crate::value::canonical_json(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeKindDef, GraphDefinition, NodeKindDef};
    use crate::ontology::OntologyRelation;
    use crate::query::predicate::prop;
    use crate::schema::{FieldSpec, PropertySchema};
    use crate::value::ValueType;

    fn definition() -> GraphDefinition {
        GraphDefinition::builder()
            .node(NodeKindDef::new(
                "Person",
                PropertySchema::new()
                    .field(FieldSpec::new("email", ValueType::String))
                    .field(FieldSpec::new("active", ValueType::Boolean)),
            ))
            .node(NodeKindDef::new(
                "Employee",
                PropertySchema::new().field(FieldSpec::new("email", ValueType::String)),
            ))
            .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
            .relation(OntologyRelation::SubClassOf {
                child: "Employee".into(),
                parent: "Person".into(),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_index_sqlite() {
        let def = definition();
        let spec = IndexSpec::new(
            "idx_person_email",
            IndexTarget::NodeKind("Person".into()),
            ["email"],
        );
        let sql = generate_index(&spec, &def, Dialect::Sqlite).unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS \"idx_person_email\" ON nodes \
             (json_extract(props, '$.\"email\"')) \
             WHERE kind IN ('Person') AND deleted_at IS NULL"
        );
    }

    #[test]
    fn test_unique_partial_index_with_subclasses() {
        let def = definition();
        let spec = IndexSpec::new(
            "uq_person_email",
            IndexTarget::NodeKind("Person".into()),
            ["email"],
        )
        .unique()
        .with_sub_classes()
        .when(prop("n", "active").eq(true));
        let sql = generate_index(&spec, &def, Dialect::Sqlite).unwrap();
        assert!(sql.starts_with("CREATE UNIQUE INDEX"));
        assert!(sql.contains("kind IN ('Employee', 'Person')"));
        assert!(sql.contains("= 1"));
    }

    #[test]
    fn test_postgres_path_access() {
        let def = definition();
        let spec = IndexSpec::new(
            "idx_email",
            IndexTarget::NodeKind("Person".into()),
            ["email"],
        );
        let sql = generate_index(&spec, &def, Dialect::Postgres).unwrap();
        assert!(sql.contains("#>>"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let def = definition();
        let spec = IndexSpec::new("bad", IndexTarget::NodeKind("Ghost".into()), ["x"]);
        assert!(generate_index(&spec, &def, Dialect::Sqlite).is_err());
    }

    #[test]
    fn test_direction_and_covering() {
        let def = definition();
        let spec = IndexSpec::new(
            "idx_email_desc",
            IndexTarget::NodeKind("Person".into()),
            ["email"],
        )
        .direction(SortDirection::Desc)
        .covering(["active"]);
        let sql = generate_index(&spec, &def, Dialect::Sqlite).unwrap();
        assert!(sql.contains("DESC"));
        assert!(sql.contains("$.\"active\""));
    }
}
