//! Dialect-specific SQL rendering.
//!
//! Everything that differs between SQLite and PostgreSQL text lives here:
//! JSON property access, boolean literals, placeholder style, string
//! search, JSON array primitives, and vector distance operators.

use serde_json::Value as JsonValue;

use crate::adapter::{Dialect, SqlValue};
use crate::query::predicate::SimilarityMetric;

/// A bind slot of a compiled statement. `GraphId` and `Now` are resolved
/// by the store at execute time; `Param` from the caller's parameter map.
#[derive(Debug, Clone, PartialEq)]
pub enum BindSlot {
    Value(SqlValue),
    Param(String),
    GraphId,
    Now,
}

/// Accumulates SQL text and bind slots, rendering dialect placeholders.
#[derive(Debug)]
pub struct SqlWriter {
    pub dialect: Dialect,
    sql: String,
    binds: Vec<BindSlot>,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            binds: Vec::new(),
        }
    }

    /// Continue writing with an already-accumulated bind list, keeping
    /// placeholder numbering global across statement fragments.
    pub fn resume(dialect: Dialect, binds: Vec<BindSlot>) -> Self {
        Self {
            dialect,
            sql: String::new(),
            binds,
        }
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Append a numbered placeholder and record its slot. Numbered forms
    /// (`?N` / `$N`) keep bindings position-independent, which matters when
    /// statement fragments are assembled out of emission order.
    pub fn bind(&mut self, slot: BindSlot) {
        self.binds.push(slot);
        match self.dialect {
            Dialect::Sqlite => {
                self.sql.push('?');
                self.sql.push_str(&self.binds.len().to_string());
            }
            Dialect::Postgres => {
                self.sql.push('$');
                self.sql.push_str(&self.binds.len().to_string());
            }
        }
    }

    pub fn bind_count(&self) -> usize {
        self.binds.len()
    }

    pub fn finish(self) -> (String, Vec<BindSlot>) {
        (self.sql, self.binds)
    }
}

/// Convert a JSON literal to a bindable SQL value.
pub fn literal_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(crate::value::canonical_json(other)),
    }
}

/// Quote an identifier (doubles embedded quotes).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for inlining (doubles embedded quotes).
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A comma-separated list of inlined string literals.
pub fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote_str(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a boolean literal.
pub fn bool_literal(dialect: Dialect, value: bool) -> &'static str {
    match (dialect, value) {
        (Dialect::Sqlite, true) => "1",
        (Dialect::Sqlite, false) => "0",
        (Dialect::Postgres, true) => "TRUE",
        (Dialect::Postgres, false) => "FALSE",
    }
}

/// SQLite JSON path literal: `$."a"."b"`.
fn sqlite_json_path(path: &[String]) -> String {
    let mut out = String::from("$");
    for key in path {
        out.push_str(&format!(".\"{}\"", key.replace('"', "\\\"")));
    }
    out
}

/// PostgreSQL text-array path literal: `{a,b}`.
fn pg_json_path(path: &[String]) -> String {
    let inner: Vec<String> = path
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", inner.join(","))
}

/// Extract a property path as text.
pub fn json_text(dialect: Dialect, column: &str, path: &[String]) -> String {
    match dialect {
        Dialect::Sqlite => format!(
            "json_extract({column}, {})",
            quote_str(&sqlite_json_path(path))
        ),
        Dialect::Postgres => format!("({column} #>> {})", quote_str(&pg_json_path(path))),
    }
}

/// Extract a property path with numeric typing.
pub fn json_number(dialect: Dialect, column: &str, path: &[String]) -> String {
    match dialect {
        Dialect::Sqlite => json_text(dialect, column, path),
        Dialect::Postgres => format!("({})::numeric", json_text(dialect, column, path)),
    }
}

/// Extract a property path with boolean typing.
pub fn json_bool(dialect: Dialect, column: &str, path: &[String]) -> String {
    match dialect {
        Dialect::Sqlite => json_text(dialect, column, path),
        Dialect::Postgres => format!("({})::boolean", json_text(dialect, column, path)),
    }
}

/// Extract a property path as JSON (for array/object operators).
pub fn json_raw(dialect: Dialect, column: &str, path: &[String]) -> String {
    match dialect {
        Dialect::Sqlite => format!(
            "json_extract({column}, {})",
            quote_str(&sqlite_json_path(path))
        ),
        Dialect::Postgres => format!("({column} #> {})", quote_str(&pg_json_path(path))),
    }
}

/// Length of a JSON array expression.
pub fn json_array_length(dialect: Dialect, raw_expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("json_array_length({raw_expr})"),
        Dialect::Postgres => format!("jsonb_array_length({raw_expr})"),
    }
}

/// Position of `needle` in `haystack` (1-based, 0 when absent).
pub fn strpos(dialect: Dialect, haystack: &str, needle: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("instr({haystack}, {needle})"),
        Dialect::Postgres => format!("strpos({haystack}, {needle})"),
    }
}

/// Escape LIKE wildcards in a literal fragment; pair with `ESCAPE '\'`.
pub fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Vector distance between an extracted embedding and a bound probe.
/// The caller binds the probe vector (JSON text) immediately after.
pub fn vector_distance_open(dialect: Dialect, metric: SimilarityMetric, expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => {
            let func = match metric {
                SimilarityMetric::Cosine => "vec_distance_cosine",
                SimilarityMetric::L2 => "vec_distance_l2",
                SimilarityMetric::InnerProduct => "vec_distance_ip",
            };
            format!("{func}({expr}, ")
        }
        Dialect::Postgres => {
            let op = match metric {
                SimilarityMetric::Cosine => "<=>",
                SimilarityMetric::L2 => "<->",
                SimilarityMetric::InnerProduct => "<#>",
            };
            format!("(({expr})::vector {op} (")
        }
    }
}

/// Closing text matching [`vector_distance_open`].
pub fn vector_distance_close(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => ")",
        Dialect::Postgres => ")::vector)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_per_dialect() {
        let mut w = SqlWriter::new(Dialect::Sqlite);
        w.push("SELECT ");
        w.bind(BindSlot::GraphId);
        w.push(", ");
        w.bind(BindSlot::Now);
        let (sql, binds) = w.finish();
        assert_eq!(sql, "SELECT ?1, ?2");
        assert_eq!(binds.len(), 2);

        let mut w = SqlWriter::new(Dialect::Postgres);
        w.push("SELECT ");
        w.bind(BindSlot::GraphId);
        w.push(", ");
        w.bind(BindSlot::Now);
        let (sql, _) = w.finish();
        assert_eq!(sql, "SELECT $1, $2");
    }

    #[test]
    fn test_json_access() {
        assert_eq!(
            json_text(Dialect::Sqlite, "p__props", &["a".into(), "b".into()]),
            r#"json_extract(p__props, '$."a"."b"')"#
        );
        assert_eq!(
            json_text(Dialect::Postgres, "p__props", &["a".into(), "b".into()]),
            r#"(p__props #>> '{"a","b"}')"#
        );
    }

    #[test]
    fn test_quote_escaping() {
        assert_eq!(quote_str("O'Neil"), "'O''Neil'");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_done"), "50\\%\\_done");
    }

    #[test]
    fn test_bool_literals() {
        assert_eq!(bool_literal(Dialect::Sqlite, true), "1");
        assert_eq!(bool_literal(Dialect::Postgres, false), "FALSE");
    }
}
