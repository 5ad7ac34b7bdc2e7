//! Typed predicate DSL.
//!
//! Predicates are boolean trees of comparisons over tagged operands:
//! system columns, property paths, literals, prepared-query params, and
//! (in `having` position only) aggregates. The chainable [`FieldRef::get`]
//! accessor is a pure constructor producing a deeper property path.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::query::ast::AggregateExpr;

/// Metadata columns addressable in predicates, projections, and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemColumn {
    Id,
    Kind,
    Version,
    ValidFrom,
    ValidTo,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    FromId,
    FromKind,
    ToId,
    ToKind,
}

impl SystemColumn {
    pub fn column_name(&self) -> &'static str {
        match self {
            SystemColumn::Id => "id",
            SystemColumn::Kind => "kind",
            SystemColumn::Version => "version",
            SystemColumn::ValidFrom => "valid_from",
            SystemColumn::ValidTo => "valid_to",
            SystemColumn::CreatedAt => "created_at",
            SystemColumn::UpdatedAt => "updated_at",
            SystemColumn::DeletedAt => "deleted_at",
            SystemColumn::FromId => "from_id",
            SystemColumn::FromKind => "from_kind",
            SystemColumn::ToId => "to_id",
            SystemColumn::ToKind => "to_kind",
        }
    }

    /// Columns that only exist on edge rows.
    pub fn is_edge_only(&self) -> bool {
        matches!(
            self,
            SystemColumn::FromId
                | SystemColumn::FromKind
                | SystemColumn::ToId
                | SystemColumn::ToKind
        )
    }
}

/// A comparison operand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operand", rename_all = "camelCase")]
pub enum Operand {
    /// Metadata column of a bound alias
    System { alias: String, column: SystemColumn },
    /// Property path of a bound alias (`props.a.b` for path `["a","b"]`)
    Prop { alias: String, path: Vec<String> },
    /// Inline constant
    Literal { value: JsonValue },
    /// Prepared-query parameter, bound at execute time
    Param { name: String },
}

impl Operand {
    /// The alias this operand reads from, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Operand::System { alias, .. } | Operand::Prop { alias, .. } => Some(alias),
            _ => None,
        }
    }
}

/// Comparison operators. Arity and typing are enforced by the [`FieldRef`]
/// constructors; the compiler maps each to dialect SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    NotIn,
    Like,
    ILike,
    StartsWith,
    EndsWith,
    Contains,
    IsNull,
    IsNotNull,
    // Array operators over JSON arrays
    ArrayContains,
    ArrayContainsAll,
    ArrayContainsAny,
    ArrayIsEmpty,
    ArrayIsNotEmpty,
    ArrayLengthGte,
    // Object operators
    HasKey,
}

/// Vector-similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SimilarityMetric {
    Cosine,
    L2,
    InnerProduct,
}

/// Options for [`FieldRef::similar_to`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityOptions {
    pub metric: SimilarityMetric,
    pub min_score: Option<f64>,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Cosine,
            min_score: None,
        }
    }
}

/// A boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "pred", rename_all = "camelCase")]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        args: Vec<Operand>,
    },
    /// Order by similarity to `vector` and keep the `k` closest
    Similar {
        operand: Operand,
        vector: Vec<f64>,
        k: u64,
        options: SimilarityOptions,
    },
    /// Comparison whose left side is an aggregate; only valid in `having`
    AggregateCompare {
        aggregate: AggregateExpr,
        op: CompareOp,
        args: Vec<Operand>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// All aliases referenced anywhere in the tree.
    pub fn referenced_aliases(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_aliases(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_aliases(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Compare { left, args, .. } => {
                if let Some(a) = left.alias() {
                    out.push(a.to_string());
                }
                for arg in args {
                    if let Some(a) = arg.alias() {
                        out.push(a.to_string());
                    }
                }
            }
            Predicate::Similar { operand, .. } => {
                if let Some(a) = operand.alias() {
                    out.push(a.to_string());
                }
            }
            Predicate::AggregateCompare { aggregate, args, .. } => {
                out.push(aggregate.alias().to_string());
                for arg in args {
                    if let Some(a) = arg.alias() {
                        out.push(a.to_string());
                    }
                }
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_aliases(out);
                }
            }
            Predicate::Not(child) => child.collect_aliases(out),
        }
    }

    /// Whether the tree contains a similarity comparison.
    pub fn has_similarity(&self) -> bool {
        match self {
            Predicate::Similar { .. } => true,
            Predicate::Compare { .. } | Predicate::AggregateCompare { .. } => false,
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(Predicate::has_similarity)
            }
            Predicate::Not(child) => child.has_similarity(),
        }
    }
}

/// Conjunction of predicates.
pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

/// Disjunction of predicates.
pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

/// Negation.
pub fn not(predicate: Predicate) -> Predicate {
    Predicate::Not(Box::new(predicate))
}

/// Entry point for property comparisons: `prop("p", "name").eq("Alice")`.
pub fn prop(alias: impl Into<String>, field: impl Into<String>) -> FieldRef {
    FieldRef {
        operand: Operand::Prop {
            alias: alias.into(),
            path: vec![field.into()],
        },
    }
}

/// Entry point for metadata comparisons: `meta("p", SystemColumn::CreatedAt)`.
pub fn meta(alias: impl Into<String>, column: SystemColumn) -> FieldRef {
    FieldRef {
        operand: Operand::System {
            alias: alias.into(),
            column,
        },
    }
}

fn lit(value: impl Into<JsonValue>) -> Operand {
    Operand::Literal {
        value: value.into(),
    }
}

/// A field reference being built into a comparison.
#[derive(Debug, Clone)]
pub struct FieldRef {
    operand: Operand,
}

impl FieldRef {
    /// Descend into a JSON object field, producing a deeper property path.
    pub fn get(self, key: impl Into<String>) -> FieldRef {
        match self.operand {
            Operand::Prop { alias, mut path } => {
                path.push(key.into());
                FieldRef {
                    operand: Operand::Prop { alias, path },
                }
            }
            other => FieldRef { operand: other },
        }
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    fn cmp(self, op: CompareOp, args: Vec<Operand>) -> Predicate {
        Predicate::Compare {
            left: self.operand,
            op,
            args,
        }
    }

    pub fn eq(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Eq, vec![lit(value)])
    }

    pub fn neq(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Neq, vec![lit(value)])
    }

    pub fn gt(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Gt, vec![lit(value)])
    }

    pub fn gte(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Gte, vec![lit(value)])
    }

    pub fn lt(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Lt, vec![lit(value)])
    }

    pub fn lte(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Lte, vec![lit(value)])
    }

    pub fn between(self, low: impl Into<JsonValue>, high: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::Between, vec![lit(low), lit(high)])
    }

    pub fn is_in(self, values: impl IntoIterator<Item = impl Into<JsonValue>>) -> Predicate {
        self.cmp(CompareOp::In, values.into_iter().map(lit).collect())
    }

    pub fn not_in(self, values: impl IntoIterator<Item = impl Into<JsonValue>>) -> Predicate {
        self.cmp(CompareOp::NotIn, values.into_iter().map(lit).collect())
    }

    pub fn like(self, pattern: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::Like, vec![lit(pattern.into())])
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::ILike, vec![lit(pattern.into())])
    }

    pub fn starts_with(self, prefix: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::StartsWith, vec![lit(prefix.into())])
    }

    pub fn ends_with(self, suffix: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::EndsWith, vec![lit(suffix.into())])
    }

    pub fn contains(self, needle: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::Contains, vec![lit(needle.into())])
    }

    pub fn is_null(self) -> Predicate {
        self.cmp(CompareOp::IsNull, vec![])
    }

    pub fn is_not_null(self) -> Predicate {
        self.cmp(CompareOp::IsNotNull, vec![])
    }

    // Array operators

    pub fn array_contains(self, value: impl Into<JsonValue>) -> Predicate {
        self.cmp(CompareOp::ArrayContains, vec![lit(value)])
    }

    pub fn array_contains_all(
        self,
        values: impl IntoIterator<Item = impl Into<JsonValue>>,
    ) -> Predicate {
        self.cmp(
            CompareOp::ArrayContainsAll,
            values.into_iter().map(lit).collect(),
        )
    }

    pub fn array_contains_any(
        self,
        values: impl IntoIterator<Item = impl Into<JsonValue>>,
    ) -> Predicate {
        self.cmp(
            CompareOp::ArrayContainsAny,
            values.into_iter().map(lit).collect(),
        )
    }

    pub fn array_is_empty(self) -> Predicate {
        self.cmp(CompareOp::ArrayIsEmpty, vec![])
    }

    pub fn array_is_not_empty(self) -> Predicate {
        self.cmp(CompareOp::ArrayIsNotEmpty, vec![])
    }

    pub fn array_length_gte(self, n: u64) -> Predicate {
        self.cmp(CompareOp::ArrayLengthGte, vec![lit(n)])
    }

    // Object operators

    pub fn has_key(self, key: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::HasKey, vec![lit(key.into())])
    }

    /// Equality at a nested path without chaining `get`.
    pub fn path_equals(
        self,
        path: impl IntoIterator<Item = impl Into<String>>,
        value: impl Into<JsonValue>,
    ) -> Predicate {
        path.into_iter().fold(self, FieldRef::get).eq(value)
    }

    pub fn path_is_null(self, path: impl IntoIterator<Item = impl Into<String>>) -> Predicate {
        path.into_iter().fold(self, FieldRef::get).is_null()
    }

    // Params

    /// Compare against a prepared-query parameter.
    pub fn eq_param(self, name: impl Into<String>) -> Predicate {
        self.cmp(CompareOp::Eq, vec![Operand::Param { name: name.into() }])
    }

    pub fn compare_param(self, op: CompareOp, name: impl Into<String>) -> Predicate {
        self.cmp(op, vec![Operand::Param { name: name.into() }])
    }

    // Embedding

    /// Order by similarity to `vector`, keeping the `k` closest rows.
    pub fn similar_to(self, vector: Vec<f64>, k: u64, options: SimilarityOptions) -> Predicate {
        Predicate::Similar {
            operand: self.operand,
            vector,
            k,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_deepens_prop_path() {
        let p = prop("p", "address").get("city").eq("Berlin");
        match p {
            Predicate::Compare { left, .. } => match left {
                Operand::Prop { alias, path } => {
                    assert_eq!(alias, "p");
                    assert_eq!(path, vec!["address".to_string(), "city".to_string()]);
                }
                other => panic!("unexpected operand: {other:?}"),
            },
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_referenced_aliases() {
        let p = and([
            prop("p", "name").eq("Alice"),
            or([
                meta("e", SystemColumn::CreatedAt).is_not_null(),
                not(prop("p", "age").gt(30)),
            ]),
        ]);
        assert_eq!(p.referenced_aliases(), vec!["e".to_string(), "p".to_string()]);
    }

    #[test]
    fn test_between_arity() {
        let p = prop("p", "age").between(18, 65);
        match p {
            Predicate::Compare { op, args, .. } => {
                assert_eq!(op, CompareOp::Between);
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_similarity_detection() {
        let p = prop("p", "vec").similar_to(vec![0.1, 0.2], 5, SimilarityOptions::default());
        assert!(p.has_similarity());
        assert!(!prop("p", "x").eq(json!(1)).has_similarity());
    }
}
