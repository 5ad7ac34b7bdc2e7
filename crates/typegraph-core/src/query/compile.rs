//! SQL emission: lowers a [`LogicalPlan`] to one dialect-specific
//! statement with bind slots.
//!
//! The statement is a chain of CTEs: one base scan, one CTE per traversal
//! (recursive traversals become a `WITH RECURSIVE` member plus a hop/kind
//! filter), then a final select carrying projection, grouping, ordering,
//! cursor pagination, and set-operation composition. Placeholders are
//! numbered, so fragments can be assembled without disturbing bind order.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::adapter::{Dialect, SqlValue};
use crate::definition::GraphDefinition;
use crate::error::{GraphError, Result};
use crate::model::{Direction, TemporalMode};
use crate::query::ast::{
    AggregateExpr, CyclePolicy, GroupKey, OrderBySpec, QueryAst, Selection, SetOpKind,
    SortDirection, DEFAULT_MAX_HOPS,
};
use crate::query::cursor::{self, Cursor};
use crate::query::dialect::{
    bool_literal, escape_like, json_array_length, json_bool, json_number, json_raw, json_text,
    literal_to_sql, quote_str, quoted_list, strpos, vector_distance_close, vector_distance_open,
    BindSlot, SqlWriter,
};
use crate::query::plan::{plan as build_plan, EdgeKindSet, LogicalPlan, PlannedStep};
use crate::query::predicate::{CompareOp, Operand, Predicate, SimilarityMetric, SimilarityOptions};
use crate::value::{format_timestamp, ValueType};

/// How a projected output key decodes back into a result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Node,
    Edge,
    Scalar,
}

/// Pagination bookkeeping the store needs at execute time.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// Requested page size; the statement fetches one extra row
    pub size: u64,
    /// `last`/`before` page: reverse the rows after fetching
    pub backward: bool,
    /// Number of `__cur_N` columns preceding the pk tiebreaker
    pub cursor_len: usize,
    /// Whether this page starts from a cursor (there is a page behind it)
    pub from_cursor: bool,
}

/// A fully emitted statement.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub dialect: Dialect,
    pub sql: String,
    pub binds: Vec<BindSlot>,
    /// Structural key for the statement cache (includes pagination shape)
    pub cache_key: String,
    /// Pagination-agnostic fingerprint; cursors are checked against it
    pub fingerprint: String,
    pub outputs: Vec<(String, OutputKind)>,
    pub page: Option<PagePlan>,
}

const NODE_META_COLS: [&str; 6] = [
    "version",
    "valid_from",
    "valid_to",
    "created_at",
    "updated_at",
    "deleted_at",
];
const EDGE_META_COLS: [&str; 5] = [
    "valid_from",
    "valid_to",
    "created_at",
    "updated_at",
    "deleted_at",
];
const EDGE_IDENTITY_COLS: [&str; 6] = ["id", "kind", "from_kind", "from_id", "to_kind", "to_id"];

/// Compile a folded AST for a dialect.
pub fn compile(ast: &QueryAst, def: &GraphDefinition, dialect: Dialect) -> Result<CompiledQuery> {
    let plan = build_plan(ast, def)?;
    let (cache_key, fingerprint) = fingerprints(ast, dialect);

    if plan.pagination.is_some() && !plan.set_ops.is_empty() {
        return Err(GraphError::compilation(
            "cursor pagination cannot be combined with set operations",
        ));
    }

    let mut emitter = Emitter {
        def,
        dialect,
        w: SqlWriter::new(dialect),
        temporal: plan.temporal,
        any_recursive: false,
    };

    // Rendering follows final text order so numbered binds read naturally:
    // main CTEs, branch CTEs, main select, branch selects, outer tail.
    let main_pipe = emitter.render_pipeline(&plan, "")?;
    let mut branch_pipes: Vec<(SetOpKind, Pipeline, &LogicalPlan)> = Vec::new();
    for (i, (kind, sub)) in plan.set_ops.iter().enumerate() {
        emitter.temporal = sub.temporal;
        let pipe = emitter.render_pipeline(sub, &format!("s{i}_"))?;
        branch_pipes.push((*kind, pipe, sub));
    }

    emitter.temporal = plan.temporal;
    let (main_select, outputs, page) =
        emitter.render_select(&plan, &main_pipe, &fingerprint, true)?;
    let mut branch_selects: Vec<(SetOpKind, String)> = Vec::new();
    for (kind, pipe, sub) in &branch_pipes {
        emitter.temporal = sub.temporal;
        let (select, sub_outputs, _) = emitter.render_select(sub, pipe, &fingerprint, false)?;
        if sub_outputs != outputs {
            return Err(GraphError::compilation(
                "set-operation branches must project the same output shape",
            ));
        }
        branch_selects.push((*kind, select));
    }

    emitter.temporal = plan.temporal;
    let tail = emitter.render_tail(&plan, &main_pipe, &page)?;

    let mut sql = String::new();
    sql.push_str(if emitter.any_recursive {
        "WITH RECURSIVE "
    } else {
        "WITH "
    });
    let mut cte_texts: Vec<String> = main_pipe.ctes;
    for (_, pipe, _) in branch_pipes {
        cte_texts.extend(pipe.ctes);
    }
    sql.push_str(&cte_texts.join(", "));
    sql.push(' ');
    sql.push_str(&main_select);
    for (kind, select) in &branch_selects {
        sql.push(' ');
        sql.push_str(kind.sql_keyword());
        sql.push(' ');
        sql.push_str(select);
    }
    if !tail.is_empty() {
        sql.push(' ');
        sql.push_str(&tail);
    }

    let binds = emitter.w.finish().1;
    if binds.len() > dialect.bind_limit() {
        return Err(GraphError::compilation(format!(
            "statement requires {} binds, over the {} limit of {}",
            binds.len(),
            dialect.as_str(),
            dialect.bind_limit()
        )));
    }

    Ok(CompiledQuery {
        dialect,
        sql,
        binds,
        cache_key,
        fingerprint,
        outputs,
        page,
    })
}

/// Cache key (pagination-aware) and cursor fingerprint (pagination-free).
pub(crate) fn fingerprints(ast: &QueryAst, dialect: Dialect) -> (String, String) {
    let base = serde_json::to_string(ast).unwrap_or_default();
    let temporal_tag = match ast.temporal {
        TemporalMode::Current => "current".to_string(),
        TemporalMode::IncludeTombstones => "tombstones".to_string(),
        TemporalMode::IncludeEnded => "ended".to_string(),
        TemporalMode::AsOf(t) => format!("asOf:{}", format_timestamp(t)),
    };
    let mut sub = String::new();
    for (kind, branch) in &ast.set_ops {
        sub.push_str(kind.sql_keyword());
        sub.push(':');
        sub.push_str(&fingerprints(branch, dialect).1);
        sub.push(';');
    }
    let fingerprint = sha_hex(&format!(
        "{}|{}|{}|{}",
        dialect.as_str(),
        base,
        temporal_tag,
        sub
    ));
    let page_tag = match &ast.pagination {
        None => "none".to_string(),
        Some(p) => format!(
            "{:?}:{:?}:{}:{}",
            p.first,
            p.last,
            p.after.is_some(),
            p.before.is_some()
        ),
    };
    let cache_key = sha_hex(&format!("{fingerprint}|{page_tag}"));
    (cache_key, fingerprint)
}

fn sha_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rendered CTE chain for one query (main or set-op branch).
struct Pipeline {
    ctes: Vec<String>,
    last: String,
    alias_kinds: HashMap<String, Vec<String>>,
}

/// Where an alias's columns live at the current rendering site.
#[derive(Debug, Clone)]
enum Binding {
    /// `{alias}__{col}`, optionally qualified by a table name
    Out { qualifier: Option<String> },
    /// A directly joined `nodes` table
    NodeTable { table: String },
    /// A directly joined `edges` table
    EdgeTable { table: String },
}

#[derive(Debug, Clone)]
struct RenderCtx {
    bindings: HashMap<String, Binding>,
    default: Binding,
}

impl RenderCtx {
    fn outputs() -> Self {
        Self {
            bindings: HashMap::new(),
            default: Binding::Out { qualifier: None },
        }
    }

    fn qualified(qualifier: &str) -> Self {
        Self {
            bindings: HashMap::new(),
            default: Binding::Out {
                qualifier: Some(qualifier.to_string()),
            },
        }
    }

    fn with(mut self, alias: &str, binding: Binding) -> Self {
        self.bindings.insert(alias.to_string(), binding);
        self
    }

    fn col(&self, alias: &str, column: &str) -> String {
        match self.bindings.get(alias).unwrap_or(&self.default) {
            Binding::Out { qualifier: None } => format!("{alias}__{column}"),
            Binding::Out {
                qualifier: Some(q),
            } => format!("{q}.{alias}__{column}"),
            Binding::NodeTable { table } | Binding::EdgeTable { table } => {
                format!("{table}.{column}")
            }
        }
    }

    fn props_col(&self, alias: &str) -> String {
        self.col(alias, "props")
    }
}

struct Emitter<'a> {
    def: &'a GraphDefinition,
    dialect: Dialect,
    w: SqlWriter,
    temporal: TemporalMode,
    any_recursive: bool,
}

impl<'a> Emitter<'a> {
    // ------------------------------------------------------------------
    // Pipeline (CTE chain)
    // ------------------------------------------------------------------

    fn render_pipeline(&mut self, plan: &LogicalPlan, prefix: &str) -> Result<Pipeline> {
        let mut ctes: Vec<String> = Vec::new();
        let mut carried: Vec<String> = Vec::new();

        let base_name = format!("{prefix}q0");
        ctes.push(self.render_base(plan, &base_name, &mut carried)?);
        let mut last = base_name;

        for (i, step) in plan.steps.iter().enumerate() {
            let name = format!("{prefix}q{}", i + 1);
            if step.recursive.is_some() {
                self.any_recursive = true;
                ctes.extend(self.render_recursive_step(plan, step, &last, &name, &mut carried)?);
            } else {
                ctes.push(self.render_step(plan, step, &last, &name, &mut carried)?);
            }
            last = name;
        }

        Ok(Pipeline {
            ctes,
            last,
            alias_kinds: collect_alias_kinds(plan),
        })
    }

    fn render_base(
        &mut self,
        plan: &LogicalPlan,
        name: &str,
        carried: &mut Vec<String>,
    ) -> Result<String> {
        let alias = &plan.base.alias;
        let needs = plan.needs_for(alias);

        let mut cols: Vec<String> = vec![
            format!("n.kind AS {alias}__kind"),
            format!("n.id AS {alias}__id"),
        ];
        carried.push(format!("{alias}__kind"));
        carried.push(format!("{alias}__id"));
        if needs.props {
            cols.push(format!("n.props AS {alias}__props"));
            carried.push(format!("{alias}__props"));
        }
        if needs.meta {
            for c in NODE_META_COLS {
                cols.push(format!("n.{c} AS {alias}__{c}"));
                carried.push(format!("{alias}__{c}"));
            }
        }

        self.w.push(&format!(
            "{name} AS (SELECT {} FROM nodes n WHERE n.graph_id = ",
            cols.join(", ")
        ));
        self.w.bind(BindSlot::GraphId);
        self.w
            .push(&format!(" AND n.kind IN ({})", quoted_list(&plan.base.kinds)));
        self.w.push(" AND ");
        self.temporal_where("n");

        let ctx = RenderCtx::outputs().with(
            alias,
            Binding::NodeTable {
                table: "n".to_string(),
            },
        );
        for p in &plan.base.predicates {
            if p.has_similarity() {
                continue;
            }
            self.w.push(" AND ");
            self.render_predicate(p, &ctx)?;
        }
        self.w.push(")");

        Ok(self.take_sql())
    }

    fn render_step(
        &mut self,
        plan: &LogicalPlan,
        step: &PlannedStep,
        prev: &str,
        name: &str,
        carried: &mut Vec<String>,
    ) -> Result<String> {
        let edge_needs = plan.needs_for(&step.edge_alias);
        let to_needs = plan.needs_for(&step.to_alias);
        let k = &step.edge_alias;
        let t = &step.to_alias;

        let mut new_cols: Vec<(String, String)> = Vec::new();
        for c in EDGE_IDENTITY_COLS {
            new_cols.push((format!("e.{c}"), format!("{k}__{c}")));
        }
        if edge_needs.props {
            new_cols.push(("e.props".to_string(), format!("{k}__props")));
        }
        if edge_needs.meta {
            for c in EDGE_META_COLS {
                new_cols.push((format!("e.{c}"), format!("{k}__{c}")));
            }
        }
        new_cols.push(("t.kind".to_string(), format!("{t}__kind")));
        new_cols.push(("t.id".to_string(), format!("{t}__id")));
        if to_needs.props {
            new_cols.push(("t.props".to_string(), format!("{t}__props")));
        }
        if to_needs.meta {
            for c in NODE_META_COLS {
                new_cols.push((format!("t.{c}"), format!("{t}__{c}")));
            }
        }

        let join = if step.optional { "LEFT JOIN" } else { "JOIN" };
        let preds_in_where = !step.optional && !step.predicates.is_empty();

        self.w.push(&format!("{name} AS (SELECT "));
        if preds_in_where {
            // Wrap so hoisted predicates see this step's output columns.
            self.w.push("* FROM (SELECT ");
        }
        let select_list: Vec<String> = std::iter::once(format!("{prev}.*"))
            .chain(
                new_cols
                    .iter()
                    .map(|(expr, name)| format!("{expr} AS {name}")),
            )
            .collect();
        self.w.push(&select_list.join(", "));
        self.w
            .push(&format!(" FROM {prev} {join} edges e ON e.graph_id = "));
        self.w.bind(BindSlot::GraphId);
        self.w.push(" AND ");
        self.temporal_where("e");
        self.w.push(" AND ");
        self.render_orientation(step, prev);
        self.w.push(&format!(" {join} nodes t ON t.graph_id = "));
        self.w.bind(BindSlot::GraphId);
        self.w.push(" AND ");
        self.temporal_where("t");
        self.w.push(&format!(
            " AND t.kind IN ({})",
            quoted_list(&step.target_kinds)
        ));
        self.w.push(" AND ");
        self.render_endpoint_match(step);

        if step.optional && !step.predicates.is_empty() {
            // Fold predicates into the ON clause to preserve optionality.
            let ctx = RenderCtx::qualified(prev)
                .with(
                    k,
                    Binding::EdgeTable {
                        table: "e".to_string(),
                    },
                )
                .with(
                    t,
                    Binding::NodeTable {
                        table: "t".to_string(),
                    },
                );
            for p in &step.predicates {
                if p.has_similarity() {
                    continue;
                }
                self.w.push(" AND ");
                self.render_predicate(p, &ctx)?;
            }
        }

        if preds_in_where {
            self.w.push(") AS s WHERE 1=1");
            let ctx = RenderCtx::outputs();
            for p in &step.predicates {
                if p.has_similarity() {
                    continue;
                }
                self.w.push(" AND ");
                self.render_predicate(p, &ctx)?;
            }
        }
        self.w.push(")");

        for (_, col) in &new_cols {
            carried.push(col.clone());
        }
        Ok(self.take_sql())
    }

    fn render_recursive_step(
        &mut self,
        plan: &LogicalPlan,
        step: &PlannedStep,
        prev: &str,
        name: &str,
        carried: &mut Vec<String>,
    ) -> Result<Vec<String>> {
        let spec = step.recursive.as_ref().expect("recursive step");
        let k = &step.edge_alias;
        let t = &step.to_alias;
        let src = &step.source_alias;
        let to_needs = plan.needs_for(t);
        let max_hops = spec.max_hops.unwrap_or(DEFAULT_MAX_HOPS);
        let track_path = spec.cycle_policy == CyclePolicy::Prevent || spec.path_alias.is_some();

        let walk = format!("{name}w");
        let prior: Vec<String> = carried.clone();

        // Anchor member: the source node at depth zero.
        self.w.push(&format!("{walk} AS (SELECT "));
        let mut anchor_cols: Vec<String> =
            prior.iter().map(|c| format!("{prev}.{c}")).collect();
        anchor_cols.push(format!("{prev}.{src}__kind AS {t}__kind"));
        anchor_cols.push(format!("{prev}.{src}__id AS {t}__id"));
        if to_needs.props {
            anchor_cols.push(format!("{prev}.{src}__props AS {t}__props"));
        }
        if to_needs.meta {
            for c in NODE_META_COLS {
                anchor_cols.push(format!("{prev}.{src}__{c} AS {t}__{c}"));
            }
        }
        anchor_cols.push(format!("0 AS {k}__depth"));
        if track_path {
            anchor_cols.push(format!(
                "'/' || {prev}.{src}__kind || ':' || {prev}.{src}__id || '/' AS {k}__path"
            ));
        }
        self.w.push(&anchor_cols.join(", "));
        self.w.push(&format!(" FROM {prev} UNION ALL SELECT "));

        // Recursive member: one hop from the frontier.
        let mut hop_cols: Vec<String> = prior.iter().map(|c| format!("r.{c}")).collect();
        hop_cols.push("t.kind".to_string());
        hop_cols.push("t.id".to_string());
        if to_needs.props {
            hop_cols.push("t.props".to_string());
        }
        if to_needs.meta {
            for c in NODE_META_COLS {
                hop_cols.push(format!("t.{c}"));
            }
        }
        hop_cols.push(format!("r.{k}__depth + 1"));
        if track_path {
            hop_cols.push(format!("r.{k}__path || t.kind || ':' || t.id || '/'"));
        }
        self.w.push(&hop_cols.join(", "));
        self.w
            .push(&format!(" FROM {walk} r JOIN edges e ON e.graph_id = "));
        self.w.bind(BindSlot::GraphId);
        self.w.push(" AND ");
        self.temporal_where("e");
        self.w.push(" AND ");
        self.render_orientation_from(step, &format!("r.{t}__kind"), &format!("r.{t}__id"));
        self.w.push(" JOIN nodes t ON t.graph_id = ");
        self.w.bind(BindSlot::GraphId);
        self.w.push(" AND ");
        self.temporal_where("t");
        self.w.push(" AND ");
        self.render_endpoint_match(step);
        self.w.push(&format!(" WHERE r.{k}__depth < {max_hops}"));
        if spec.cycle_policy == CyclePolicy::Prevent {
            let probe = "'/' || t.kind || ':' || t.id || '/'";
            self.w.push(&format!(
                " AND {} = 0",
                strpos(self.dialect, &format!("r.{k}__path"), probe)
            ));
        }
        self.w.push(")");
        let walk_cte = self.take_sql();

        // Hop/kind filter over the walk.
        self.w.push(&format!(
            "{name} AS (SELECT * FROM {walk} WHERE {k}__depth >= {}",
            spec.min_hops
        ));
        self.w.push(&format!(
            " AND {t}__kind IN ({})",
            quoted_list(&step.target_kinds)
        ));
        let ctx = RenderCtx::outputs();
        for p in &step.predicates {
            if p.has_similarity() {
                continue;
            }
            self.w.push(" AND ");
            self.render_predicate(p, &ctx)?;
        }
        self.w.push(")");
        let filter_cte = self.take_sql();

        carried.push(format!("{t}__kind"));
        carried.push(format!("{t}__id"));
        if to_needs.props {
            carried.push(format!("{t}__props"));
        }
        if to_needs.meta {
            for c in NODE_META_COLS {
                carried.push(format!("{t}__{c}"));
            }
        }
        carried.push(format!("{k}__depth"));
        if track_path {
            carried.push(format!("{k}__path"));
        }
        Ok(vec![walk_cte, filter_cte])
    }

    /// Row filter for the active temporal mode, over a raw table alias.
    fn temporal_where(&mut self, table: &str) {
        match self.temporal {
            TemporalMode::Current => {
                self.w.push(&format!(
                    "{table}.deleted_at IS NULL AND ({table}.valid_to IS NULL OR {table}.valid_to > "
                ));
                self.w.bind(BindSlot::Now);
                self.w.push(")");
            }
            TemporalMode::IncludeTombstones => {
                self.w
                    .push(&format!("({table}.valid_to IS NULL OR {table}.valid_to > "));
                self.w.bind(BindSlot::Now);
                self.w.push(")");
            }
            TemporalMode::IncludeEnded => {
                self.w.push("1=1");
            }
            TemporalMode::AsOf(t) => {
                let ts = format_timestamp(t);
                self.w.push(&format!(
                    "({table}.valid_from IS NULL OR {table}.valid_from <= "
                ));
                self.w.bind(BindSlot::Value(SqlValue::Text(ts.clone())));
                self.w.push(&format!(
                    ") AND ({table}.valid_to IS NULL OR {table}.valid_to > "
                ));
                self.w.bind(BindSlot::Value(SqlValue::Text(ts)));
                self.w.push(")");
            }
        }
    }

    /// Edge orientation match against the step's source alias columns.
    fn render_orientation(&mut self, step: &PlannedStep, prev: &str) {
        let src = &step.source_alias;
        let src_kind = format!("{prev}.{src}__kind");
        let src_id = format!("{prev}.{src}__id");
        self.render_orientation_from(step, &src_kind, &src_id);
    }

    fn render_orientation_from(&mut self, step: &PlannedStep, src_kind: &str, src_id: &str) {
        let near = match step.direction {
            Direction::Out => "from",
            Direction::In => "to",
        };
        let sw_near = match step.direction {
            Direction::Out => "to",
            Direction::In => "from",
        };
        let EdgeKindSet { forward, swapped } = &step.edge_kinds;
        let fwd = format!(
            "(e.kind IN ({}) AND e.{near}_kind = {src_kind} AND e.{near}_id = {src_id})",
            quoted_list(forward)
        );
        if swapped.is_empty() {
            self.w.push(&fwd);
        } else {
            let sw = format!(
                "(e.kind IN ({}) AND e.{sw_near}_kind = {src_kind} AND e.{sw_near}_id = {src_id})",
                quoted_list(swapped)
            );
            self.w.push(&format!("({fwd} OR {sw})"));
        }
    }

    /// Target node match on the far endpoint, per orientation.
    fn render_endpoint_match(&mut self, step: &PlannedStep) {
        let far = match step.direction {
            Direction::Out => "to",
            Direction::In => "from",
        };
        let sw_far = match step.direction {
            Direction::Out => "from",
            Direction::In => "to",
        };
        let EdgeKindSet { forward, swapped } = &step.edge_kinds;
        let fwd = format!(
            "(e.kind IN ({}) AND t.kind = e.{far}_kind AND t.id = e.{far}_id)",
            quoted_list(forward)
        );
        if swapped.is_empty() {
            self.w.push(&fwd);
        } else {
            let sw = format!(
                "(e.kind IN ({}) AND t.kind = e.{sw_far}_kind AND t.id = e.{sw_far}_id)",
                quoted_list(swapped)
            );
            self.w.push(&format!("({fwd} OR {sw})"));
        }
    }

    // ------------------------------------------------------------------
    // Final select
    // ------------------------------------------------------------------

    fn render_select(
        &mut self,
        plan: &LogicalPlan,
        pipe: &Pipeline,
        fingerprint: &str,
        is_main: bool,
    ) -> Result<(String, Vec<(String, OutputKind)>, Option<PagePlan>)> {
        let ctx = RenderCtx::outputs();
        let similarity = find_similarity(plan);
        let page = if is_main { self.page_plan(plan)? } else { None };

        let mut outputs: Vec<(String, OutputKind)> = Vec::new();
        let mut select_cols: Vec<String> = Vec::new();
        for (key, sel) in &plan.projection.items {
            validate_output_key(key)?;
            match sel {
                Selection::Node { alias } => {
                    select_cols.push(format!("{alias}__kind AS {key}__kind"));
                    select_cols.push(format!("{alias}__id AS {key}__id"));
                    select_cols.push(format!("{alias}__props AS {key}__props"));
                    for c in NODE_META_COLS {
                        select_cols.push(format!("{alias}__{c} AS {key}__{c}"));
                    }
                    outputs.push((key.clone(), OutputKind::Node));
                }
                Selection::Edge { alias } => {
                    for c in EDGE_IDENTITY_COLS {
                        select_cols.push(format!("{alias}__{c} AS {key}__{c}"));
                    }
                    select_cols.push(format!("{alias}__props AS {key}__props"));
                    for c in EDGE_META_COLS {
                        select_cols.push(format!("{alias}__{c} AS {key}__{c}"));
                    }
                    outputs.push((key.clone(), OutputKind::Edge));
                }
                Selection::Field { alias, field } => {
                    let expr = self.typed_extract(alias, field, &pipe.alias_kinds, &ctx);
                    select_cols.push(format!("{expr} AS {key}"));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
                Selection::Meta { alias, column } => {
                    select_cols.push(format!(
                        "{} AS {key}",
                        ctx.col(alias, column.column_name())
                    ));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
                Selection::Aggregate(agg) => {
                    select_cols.push(format!("{} AS {key}", self.aggregate_sql(agg, &ctx)));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
                Selection::Depth { edge_alias } => {
                    select_cols.push(format!("{edge_alias}__depth AS {key}"));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
                Selection::Path { edge_alias } => {
                    select_cols.push(format!("{edge_alias}__path AS {key}"));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
                Selection::Literal { value } => {
                    let rendered = self.literal_inline(value);
                    select_cols.push(format!("{rendered} AS {key}"));
                    outputs.push((key.clone(), OutputKind::Scalar));
                }
            }
        }

        if page.is_some() {
            for (i, spec) in plan.order_by.iter().enumerate() {
                let expr = self.order_expr(spec, &pipe.alias_kinds, &ctx);
                select_cols.push(format!("{expr} AS __cur_{i}"));
            }
            let pk = &plan.primary_alias;
            select_cols.push(format!("{pk}__kind AS __cur_pk_kind"));
            select_cols.push(format!("{pk}__id AS __cur_pk_id"));
        }

        self.w.push(&format!(
            "SELECT {} FROM {}",
            select_cols.join(", "),
            pipe.last
        ));

        let mut where_started = false;
        if let Some(page_plan) = &page {
            if let Some(token) = cursor_token(plan) {
                let cursor = cursor::decode(fingerprint, token)?;
                self.w.push(" WHERE ");
                where_started = true;
                self.render_cursor_where(
                    plan,
                    &cursor,
                    page_plan.backward,
                    &pipe.alias_kinds,
                    &ctx,
                )?;
            }
        }
        if let Some(sim) = &similarity {
            if let Some(min_score) = sim.options.min_score {
                self.w
                    .push(if where_started { " AND " } else { " WHERE " });
                self.render_similarity_expr(sim, &ctx)?;
                let threshold = match sim.options.metric {
                    SimilarityMetric::Cosine => 1.0 - min_score,
                    SimilarityMetric::L2 => min_score,
                    SimilarityMetric::InnerProduct => -min_score,
                };
                self.w.push(&format!(" <= {threshold}"));
            }
        }

        if plan.is_aggregate() && !plan.group_by.is_empty() {
            let keys: Vec<String> = plan
                .group_by
                .iter()
                .flat_map(|g| match g {
                    GroupKey::Field { alias, field } => {
                        vec![self.typed_extract(alias, field, &pipe.alias_kinds, &ctx)]
                    }
                    GroupKey::Node { alias } => {
                        vec![ctx.col(alias, "kind"), ctx.col(alias, "id")]
                    }
                })
                .collect();
            self.w.push(&format!(" GROUP BY {}", keys.join(", ")));
        }
        if let Some(having) = &plan.having {
            self.w.push(" HAVING ");
            self.render_predicate(having, &ctx)?;
        }

        Ok((self.take_sql(), outputs, page))
    }

    /// Outer ORDER BY / LIMIT / OFFSET, applied after any set operations.
    fn render_tail(
        &mut self,
        plan: &LogicalPlan,
        pipe: &Pipeline,
        page: &Option<PagePlan>,
    ) -> Result<String> {
        let ctx = RenderCtx::outputs();
        let similarity = find_similarity(plan);
        let has_set_ops = !plan.set_ops.is_empty();

        if let Some(sim) = &similarity {
            self.w.push("ORDER BY ");
            self.render_similarity_expr(sim, &ctx)?;
            self.w.push(" ASC");
            for spec in &plan.order_by {
                let expr = self.order_expr(spec, &pipe.alias_kinds, &ctx);
                self.w
                    .push(&format!(", {}", order_term(&expr, spec.direction)));
            }
            self.w.push(&format!(" LIMIT {}", sim.k));
            return Ok(self.take_sql());
        }

        let backward = page.as_ref().is_some_and(|p| p.backward);
        let mut terms: Vec<String> = Vec::new();
        for spec in &plan.order_by {
            let direction = if backward {
                spec.direction.reversed()
            } else {
                spec.direction
            };
            let expr = if has_set_ops {
                self.setop_order_key(plan, spec)?
            } else {
                self.order_expr(spec, &pipe.alias_kinds, &ctx)
            };
            terms.push(order_term(&expr, direction));
        }
        if let Some(page_plan) = page {
            let dir = if page_plan.backward {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            terms.push(order_term("__cur_pk_kind", dir));
            terms.push(order_term("__cur_pk_id", dir));
        }
        if !terms.is_empty() {
            self.w.push(&format!("ORDER BY {}", terms.join(", ")));
        }
        if let Some(page_plan) = page {
            self.w.push(&format!(" LIMIT {}", page_plan.size + 1));
        } else {
            if let Some(limit) = plan.limit {
                self.w.push(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = plan.offset {
                self.w.push(&format!(" OFFSET {offset}"));
            }
        }
        Ok(self.take_sql())
    }

    fn page_plan(&self, plan: &LogicalPlan) -> Result<Option<PagePlan>> {
        let Some(page) = &plan.pagination else {
            return Ok(None);
        };
        let (size, backward) = match (page.first, page.last) {
            (Some(n), None) => (n, false),
            (None, Some(n)) => (n, true),
            (None, None) => {
                return Err(GraphError::compilation("pagination requires first or last"))
            }
            (Some(_), Some(_)) => unreachable!("validated during planning"),
        };
        Ok(Some(PagePlan {
            size,
            backward,
            cursor_len: plan.order_by.len(),
            from_cursor: page.after.is_some() || page.before.is_some(),
        }))
    }

    /// Lexicographic position comparison over the cursor tuple.
    fn render_cursor_where(
        &mut self,
        plan: &LogicalPlan,
        cursor: &Cursor,
        backward: bool,
        alias_kinds: &HashMap<String, Vec<String>>,
        ctx: &RenderCtx,
    ) -> Result<()> {
        if cursor.values.len() != plan.order_by.len() {
            return Err(GraphError::Validation {
                kind: "Cursor".to_string(),
                fields: Vec::new(),
                message: "cursor does not match the order-by shape".to_string(),
            });
        }

        struct Entry {
            expr: String,
            value: serde_json::Value,
            direction: SortDirection,
        }
        let mut entries: Vec<Entry> = Vec::new();
        for (spec, value) in plan.order_by.iter().zip(&cursor.values) {
            let direction = if backward {
                spec.direction.reversed()
            } else {
                spec.direction
            };
            entries.push(Entry {
                expr: self.order_expr(spec, alias_kinds, ctx),
                value: value.clone(),
                direction,
            });
        }
        let pk_dir = if backward {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        let pk = &plan.primary_alias;
        entries.push(Entry {
            expr: ctx.col(pk, "kind"),
            value: serde_json::Value::String(cursor.pk_kind.clone()),
            direction: pk_dir,
        });
        entries.push(Entry {
            expr: ctx.col(pk, "id"),
            value: serde_json::Value::String(cursor.pk_id.clone()),
            direction: pk_dir,
        });

        self.w.push("(");
        for i in 0..entries.len() {
            if i > 0 {
                self.w.push(" OR ");
            }
            self.w.push("(");
            for (j, entry) in entries.iter().take(i).enumerate() {
                if j > 0 {
                    self.w.push(" AND ");
                }
                if entry.value.is_null() {
                    self.w.push(&format!("{} IS NULL", entry.expr));
                } else {
                    self.w.push(&format!("{} = ", entry.expr));
                    self.w.bind(BindSlot::Value(literal_to_sql(&entry.value)));
                }
            }
            if i > 0 {
                self.w.push(" AND ");
            }
            let entry = &entries[i];
            match (&entry.direction, entry.value.is_null()) {
                // Nulls trail ascending: only tiebreak columns follow a null.
                (SortDirection::Asc, true) => self.w.push("1=0"),
                // Nulls lead descending: every non-null value follows.
                (SortDirection::Desc, true) => {
                    self.w.push(&format!("{} IS NOT NULL", entry.expr))
                }
                (SortDirection::Asc, false) => {
                    self.w.push(&format!("({} > ", entry.expr));
                    self.w.bind(BindSlot::Value(literal_to_sql(&entry.value)));
                    self.w.push(&format!(" OR {} IS NULL)", entry.expr));
                }
                (SortDirection::Desc, false) => {
                    self.w.push(&format!("{} < ", entry.expr));
                    self.w.bind(BindSlot::Value(literal_to_sql(&entry.value)));
                }
            }
            self.w.push(")");
        }
        self.w.push(")");
        Ok(())
    }

    fn setop_order_key(&self, plan: &LogicalPlan, spec: &OrderBySpec) -> Result<String> {
        for (key, sel) in &plan.projection.items {
            let matches = match sel {
                Selection::Field { alias, field } => {
                    spec.field.as_deref() == Some(field.as_str()) && &spec.alias == alias
                }
                Selection::Meta { alias, column } => {
                    spec.column == Some(*column) && &spec.alias == alias
                }
                _ => false,
            };
            if matches {
                return Ok(key.clone());
            }
        }
        Err(GraphError::compilation(
            "ordering a set operation requires the order key to be projected",
        ))
    }

    fn order_expr(
        &self,
        spec: &OrderBySpec,
        alias_kinds: &HashMap<String, Vec<String>>,
        ctx: &RenderCtx,
    ) -> String {
        match (&spec.field, &spec.column) {
            (Some(field), _) => self.typed_extract(&spec.alias, field, alias_kinds, ctx),
            (None, Some(column)) => ctx.col(&spec.alias, column.column_name()),
            (None, None) => ctx.col(&spec.alias, "id"),
        }
    }

    /// Property extraction typed from the declared schema of the alias's
    /// kind set, so numeric fields order and compare numerically.
    fn typed_extract(
        &self,
        alias: &str,
        field: &str,
        alias_kinds: &HashMap<String, Vec<String>>,
        ctx: &RenderCtx,
    ) -> String {
        let column = ctx.props_col(alias);
        let path = vec![field.to_string()];
        let value_type = alias_kinds
            .get(alias)
            .and_then(|kinds| {
                kinds.iter().find_map(|k| {
                    self.def
                        .node_kind(k)
                        .map(|d| &d.schema)
                        .or_else(|| self.def.edge_kind(k).map(|d| &d.schema))
                        .and_then(|s| s.field_spec(field))
                        .map(|f| f.value_type)
                })
            })
            .unwrap_or(ValueType::String);
        match value_type {
            ValueType::Number => json_number(self.dialect, &column, &path),
            ValueType::Boolean => json_bool(self.dialect, &column, &path),
            _ => json_text(self.dialect, &column, &path),
        }
    }

    fn aggregate_sql(&self, agg: &AggregateExpr, ctx: &RenderCtx) -> String {
        match agg {
            AggregateExpr::Count { alias } => format!("COUNT({})", ctx.col(alias, "id")),
            AggregateExpr::Sum { alias, field } => format!(
                "SUM({})",
                json_number(self.dialect, &ctx.props_col(alias), &[field.clone()])
            ),
            AggregateExpr::Avg { alias, field } => format!(
                "AVG({})",
                json_number(self.dialect, &ctx.props_col(alias), &[field.clone()])
            ),
            AggregateExpr::Min { alias, field } => format!(
                "MIN({})",
                json_number(self.dialect, &ctx.props_col(alias), &[field.clone()])
            ),
            AggregateExpr::Max { alias, field } => format!(
                "MAX({})",
                json_number(self.dialect, &ctx.props_col(alias), &[field.clone()])
            ),
        }
    }

    fn render_similarity_expr(&mut self, sim: &SimilarityRef, ctx: &RenderCtx) -> Result<()> {
        let (alias, path) = match &sim.operand {
            Operand::Prop { alias, path } => (alias, path),
            _ => {
                return Err(GraphError::compilation(
                    "similarity requires an embedding property operand",
                ))
            }
        };
        let expr = json_raw(self.dialect, &ctx.props_col(alias), path);
        self.w
            .push(&vector_distance_open(self.dialect, sim.options.metric, &expr));
        let probe = serde_json::to_string(&sim.vector).unwrap_or_default();
        self.w.bind(BindSlot::Value(SqlValue::Text(probe)));
        self.w.push(vector_distance_close(self.dialect));
        Ok(())
    }

    fn literal_inline(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::Bool(b) => bool_literal(self.dialect, *b).to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => quote_str(s),
            other => quote_str(&crate::value::canonical_json(other)),
        }
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    fn render_predicate(&mut self, predicate: &Predicate, ctx: &RenderCtx) -> Result<()> {
        match predicate {
            Predicate::And(children) | Predicate::Or(children) => {
                if children.is_empty() {
                    self.w.push("1=1");
                    return Ok(());
                }
                let sep = if matches!(predicate, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                self.w.push("(");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.w.push(sep);
                    }
                    self.render_predicate(child, ctx)?;
                }
                self.w.push(")");
                Ok(())
            }
            Predicate::Not(child) => {
                self.w.push("NOT (");
                self.render_predicate(child, ctx)?;
                self.w.push(")");
                Ok(())
            }
            Predicate::Similar { .. } => Err(GraphError::compilation(
                "similarity comparisons cannot appear inside boolean combinators",
            )),
            Predicate::AggregateCompare {
                aggregate,
                op,
                args,
            } => {
                let left = self.aggregate_sql(aggregate, ctx);
                self.render_compare(&left, *op, args)
            }
            Predicate::Compare { left, op, args } => {
                let left_expr = self.operand_expr(left, op, args, ctx)?;
                self.render_compare(&left_expr, *op, args)
            }
        }
    }

    /// Render the left operand, choosing JSON extraction typing from the
    /// operator family and the first argument.
    fn operand_expr(
        &mut self,
        operand: &Operand,
        op: &CompareOp,
        args: &[Operand],
        ctx: &RenderCtx,
    ) -> Result<String> {
        match operand {
            Operand::System { alias, column } => Ok(ctx.col(alias, column.column_name())),
            Operand::Param { .. } | Operand::Literal { .. } => Err(GraphError::compilation(
                "comparison left side must be a property or metadata reference",
            )),
            Operand::Prop { alias, path } => {
                let column = ctx.props_col(alias);
                let expr = match op {
                    CompareOp::ArrayContains
                    | CompareOp::ArrayContainsAll
                    | CompareOp::ArrayContainsAny
                    | CompareOp::ArrayIsEmpty
                    | CompareOp::ArrayIsNotEmpty
                    | CompareOp::ArrayLengthGte
                    | CompareOp::HasKey => json_raw(self.dialect, &column, path),
                    CompareOp::IsNull | CompareOp::IsNotNull => {
                        json_text(self.dialect, &column, path)
                    }
                    _ => match first_literal_type(args) {
                        Some(LiteralType::Number) => json_number(self.dialect, &column, path),
                        Some(LiteralType::Boolean) => json_bool(self.dialect, &column, path),
                        _ => json_text(self.dialect, &column, path),
                    },
                };
                Ok(expr)
            }
        }
    }

    fn render_compare(&mut self, left: &str, op: CompareOp, args: &[Operand]) -> Result<()> {
        let simple = match op {
            CompareOp::Eq => Some("="),
            CompareOp::Neq => Some("<>"),
            CompareOp::Gt => Some(">"),
            CompareOp::Gte => Some(">="),
            CompareOp::Lt => Some("<"),
            CompareOp::Lte => Some("<="),
            _ => None,
        };

        match op {
            CompareOp::Eq | CompareOp::Neq
                if matches!(
                    args.first(),
                    Some(Operand::Literal {
                        value: serde_json::Value::Null
                    })
                ) =>
            {
                let suffix = if op == CompareOp::Eq {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                self.w.push(&format!("{left} {suffix}"));
            }
            _ if simple.is_some() => {
                let arg = args.first().ok_or_else(|| {
                    GraphError::compilation("comparison is missing its argument")
                })?;
                self.w.push(&format!("{left} {} ", simple.unwrap()));
                self.render_arg(arg)?;
            }
            CompareOp::Between => {
                if args.len() != 2 {
                    return Err(GraphError::compilation("between requires two arguments"));
                }
                self.w.push(&format!("{left} BETWEEN "));
                self.render_arg(&args[0])?;
                self.w.push(" AND ");
                self.render_arg(&args[1])?;
            }
            CompareOp::In | CompareOp::NotIn => {
                if args.is_empty() {
                    self.w
                        .push(if op == CompareOp::In { "1=0" } else { "1=1" });
                } else {
                    let keyword = if op == CompareOp::In { "IN" } else { "NOT IN" };
                    self.w.push(&format!("{left} {keyword} ("));
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            self.w.push(", ");
                        }
                        self.render_arg(arg)?;
                    }
                    self.w.push(")");
                }
            }
            CompareOp::Like => {
                self.w.push(&format!("{left} LIKE "));
                self.render_arg(&args[0])?;
            }
            CompareOp::ILike => match self.dialect {
                Dialect::Sqlite => {
                    self.w.push(&format!("LOWER({left}) LIKE LOWER("));
                    self.render_arg(&args[0])?;
                    self.w.push(")");
                }
                Dialect::Postgres => {
                    self.w.push(&format!("{left} ILIKE "));
                    self.render_arg(&args[0])?;
                }
            },
            CompareOp::StartsWith | CompareOp::EndsWith | CompareOp::Contains => {
                let fragment = literal_string(&args[0]).ok_or_else(|| {
                    GraphError::compilation("string-search operators require a literal argument")
                })?;
                let escaped = escape_like(&fragment);
                let pattern = match op {
                    CompareOp::StartsWith => format!("{escaped}%"),
                    CompareOp::EndsWith => format!("%{escaped}"),
                    _ => format!("%{escaped}%"),
                };
                self.w.push(&format!("{left} LIKE "));
                self.w.bind(BindSlot::Value(SqlValue::Text(pattern)));
                self.w.push(" ESCAPE '\\'");
            }
            CompareOp::IsNull => self.w.push(&format!("{left} IS NULL")),
            CompareOp::IsNotNull => self.w.push(&format!("{left} IS NOT NULL")),
            CompareOp::ArrayContains => self.render_array_contains(left, &args[0])?,
            CompareOp::ArrayContainsAll | CompareOp::ArrayContainsAny => {
                let sep = if op == CompareOp::ArrayContainsAll {
                    " AND "
                } else {
                    " OR "
                };
                self.w.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.w.push(sep);
                    }
                    self.render_array_contains(left, arg)?;
                }
                self.w.push(")");
            }
            CompareOp::ArrayIsEmpty => self
                .w
                .push(&format!("{} = 0", json_array_length(self.dialect, left))),
            CompareOp::ArrayIsNotEmpty => self
                .w
                .push(&format!("{} > 0", json_array_length(self.dialect, left))),
            CompareOp::ArrayLengthGte => {
                self.w
                    .push(&format!("{} >= ", json_array_length(self.dialect, left)));
                self.render_arg(&args[0])?;
            }
            CompareOp::HasKey => {
                let key = literal_string(&args[0])
                    .ok_or_else(|| GraphError::compilation("has_key requires a literal key"))?;
                self.w
                    .push(&json_has_key_on_extracted(self.dialect, left, &key));
            }
            CompareOp::Eq | CompareOp::Neq | CompareOp::Gt | CompareOp::Gte | CompareOp::Lt
            | CompareOp::Lte => unreachable!("covered by the `simple.is_some()` arm above"),
        }
        Ok(())
    }

    fn render_array_contains(&mut self, left: &str, arg: &Operand) -> Result<()> {
        match self.dialect {
            Dialect::Sqlite => {
                self.w.push(&format!(
                    "EXISTS (SELECT 1 FROM json_each({left}) je WHERE je.value = "
                ));
                self.render_arg(arg)?;
                self.w.push(")");
            }
            Dialect::Postgres => {
                let value = match arg {
                    Operand::Literal { value } => value.clone(),
                    _ => {
                        return Err(GraphError::compilation(
                            "array_contains requires a literal on postgres",
                        ))
                    }
                };
                let probe = serde_json::to_string(&vec![value]).unwrap_or_default();
                self.w.push(&format!("{left} @> "));
                self.w.bind(BindSlot::Value(SqlValue::Text(probe)));
                self.w.push("::jsonb");
            }
        }
        Ok(())
    }

    fn render_arg(&mut self, arg: &Operand) -> Result<()> {
        match arg {
            Operand::Literal { value } => {
                self.w.bind(BindSlot::Value(literal_to_sql(value)));
                Ok(())
            }
            Operand::Param { name } => {
                self.w.bind(BindSlot::Param(name.clone()));
                Ok(())
            }
            Operand::System { .. } | Operand::Prop { .. } => Err(GraphError::compilation(
                "column-to-column comparisons are not supported",
            )),
        }
    }

    /// Take the SQL accumulated since the last call, leaving binds in place.
    fn take_sql(&mut self) -> String {
        let dialect = self.dialect;
        let fresh = SqlWriter::new(dialect);
        let prior = std::mem::replace(&mut self.w, fresh);
        let (sql, binds) = prior.finish();
        self.w = SqlWriter::resume(dialect, binds);
        sql
    }
}

/// Key probe over an already-extracted JSON object expression.
fn json_has_key_on_extracted(dialect: Dialect, extracted: &str, key: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!(
            "json_type({extracted}, {}) IS NOT NULL",
            quote_str(&format!("$.\"{}\"", key.replace('"', "\\\"")))
        ),
        Dialect::Postgres => format!("{extracted} ? {}", quote_str(key)),
    }
}

struct SimilarityRef {
    operand: Operand,
    vector: Vec<f64>,
    k: u64,
    options: SimilarityOptions,
}

fn find_similarity(plan: &LogicalPlan) -> Option<SimilarityRef> {
    plan.base
        .predicates
        .iter()
        .chain(plan.steps.iter().flat_map(|s| s.predicates.iter()))
        .find_map(|p| match p {
            Predicate::Similar {
                operand,
                vector,
                k,
                options,
            } => Some(SimilarityRef {
                operand: operand.clone(),
                vector: vector.clone(),
                k: *k,
                options: options.clone(),
            }),
            _ => None,
        })
}

fn cursor_token(plan: &LogicalPlan) -> Option<&str> {
    let page = plan.pagination.as_ref()?;
    page.after.as_deref().or(page.before.as_deref())
}

enum LiteralType {
    Number,
    Boolean,
    Other,
}

fn first_literal_type(args: &[Operand]) -> Option<LiteralType> {
    args.iter().find_map(|a| match a {
        Operand::Literal { value } => Some(match value {
            serde_json::Value::Number(_) => LiteralType::Number,
            serde_json::Value::Bool(_) => LiteralType::Boolean,
            _ => LiteralType::Other,
        }),
        _ => None,
    })
}

fn literal_string(arg: &Operand) -> Option<String> {
    match arg {
        Operand::Literal {
            value: serde_json::Value::String(s),
        } => Some(s.clone()),
        _ => None,
    }
}

fn order_term(expr: &str, direction: SortDirection) -> String {
    // Nulls trail ascending and lead descending on both dialects.
    match direction {
        SortDirection::Asc => format!("{expr} ASC NULLS LAST"),
        SortDirection::Desc => format!("{expr} DESC NULLS FIRST"),
    }
}

fn validate_output_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !head_ok || !tail_ok || key.contains("__") {
        return Err(GraphError::compilation(format!(
            "invalid output key '{key}'"
        )));
    }
    Ok(())
}

/// Alias → concrete kind set, for schema-driven extraction typing.
fn collect_alias_kinds(plan: &LogicalPlan) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    out.insert(plan.base.alias.clone(), plan.base.kinds.clone());
    for step in &plan.steps {
        out.insert(step.to_alias.clone(), step.target_kinds.clone());
        out.insert(
            step.edge_alias.clone(),
            step.edge_kinds.all_kinds().map(str::to_string).collect(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeKindDef, GraphDefinition, NodeKindDef};
    use crate::model::TemporalMode;
    use pretty_assertions::assert_eq;
    use crate::ontology::OntologyRelation;
    use crate::query::ast::PageSpec;
    use crate::query::builder::GraphQuery;
    use crate::query::predicate::prop;
    use crate::schema::{FieldSpec, PropertySchema};
    use crate::value::ValueType;

    fn definition() -> GraphDefinition {
        GraphDefinition::builder()
            .node(NodeKindDef::new(
                "Person",
                PropertySchema::new()
                    .field(FieldSpec::new("name", ValueType::String))
                    .field(FieldSpec::new("age", ValueType::Number)),
            ))
            .node(NodeKindDef::new(
                "Product",
                PropertySchema::new()
                    .field(FieldSpec::new("title", ValueType::String))
                    .field(FieldSpec::new("price", ValueType::Number)),
            ))
            .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
            .edge(EdgeKindDef::new("bought", ["Person"], ["Product"]))
            .edge(EdgeKindDef::new("soldTo", ["Product"], ["Person"]))
            .relation(OntologyRelation::InverseOf {
                edge_a: "bought".into(),
                edge_b: "soldTo".into(),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_simple_query_shape() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .where_node(prop("p", "name").eq("Alice"))
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(q.sql.starts_with("WITH q0 AS (SELECT"));
        assert!(q.sql.contains("n.kind IN ('Person')"));
        assert!(q.sql.contains("deleted_at IS NULL"));
        assert!(q.sql.contains("json_extract"));
        assert!(q.binds.iter().any(|b| matches!(b, BindSlot::GraphId)));
        assert_eq!(q.outputs, vec![("p".to_string(), OutputKind::Node)]);
    }

    #[test]
    fn test_traversal_includes_inverse_swap() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("bought", "b")
            .to("Product", "m")
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(q.sql.contains("e.kind IN ('bought')"));
        assert!(q.sql.contains("e.kind IN ('soldTo')"));
        // Forward kinds join from→to, swapped kinds to→from
        assert!(q.sql.contains("e.from_kind = q0.p__kind"));
        assert!(q.sql.contains("e.to_kind = q0.p__kind"));
    }

    #[test]
    fn test_recursive_emits_with_recursive() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .traverse("knows", "k")
            .recursive_hops(1, 3)
            .to("Person", "f")
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(q.sql.starts_with("WITH RECURSIVE"));
        assert!(q.sql.contains("UNION ALL"));
        assert!(q.sql.contains("k__depth < 3"));
        assert!(q.sql.contains("k__depth >= 1"));
        assert!(q.sql.contains("instr("));
    }

    #[test]
    fn test_postgres_dialect_differences() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p")
            .where_node(prop("p", "age").gt(30))
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Postgres).unwrap();
        assert!(q.sql.contains("#>>"));
        assert!(q.sql.contains("::numeric"));
        assert!(q.sql.contains("$1"));
    }

    #[test]
    fn test_pagination_adds_cursor_columns() {
        let def = definition();
        let ast = GraphQuery::from("Product", "p")
            .order_by("p", "price", SortDirection::Asc)
            .paginate(PageSpec {
                first: Some(3),
                ..Default::default()
            })
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(q.sql.contains("AS __cur_0"));
        assert!(q.sql.contains("AS __cur_pk_id"));
        assert!(q.sql.contains("LIMIT 4"));
        let page = q.page.unwrap();
        assert_eq!(page.size, 3);
        assert!(!page.backward);
        assert_eq!(page.cursor_len, 1);
    }

    #[test]
    fn test_cursor_round_trip_through_compile() {
        let def = definition();
        let base = GraphQuery::from("Product", "p").order_by("p", "price", SortDirection::Asc);
        let first_page = base
            .paginate(PageSpec {
                first: Some(3),
                ..Default::default()
            })
            .fold()
            .unwrap();
        let q1 = compile(&first_page, &def, Dialect::Sqlite).unwrap();

        let token = crate::query::cursor::encode(
            &q1.fingerprint,
            &crate::query::cursor::Cursor {
                direction: crate::query::cursor::CursorDirection::Forward,
                values: vec![serde_json::json!(300)],
                pk_kind: "Product".into(),
                pk_id: "p3".into(),
            },
        );
        let second_page = base
            .paginate(PageSpec {
                first: Some(3),
                after: Some(token),
                ..Default::default()
            })
            .fold()
            .unwrap();
        let q2 = compile(&second_page, &def, Dialect::Sqlite).unwrap();
        // Same shape, different cache entry, same cursor fingerprint
        assert_eq!(q1.fingerprint, q2.fingerprint);
        assert_ne!(q1.cache_key, q2.cache_key);
        assert!(q2.sql.contains("__cur"));
        assert!(q2
            .binds
            .iter()
            .any(|b| matches!(b, BindSlot::Value(SqlValue::Integer(300)))));
    }

    #[test]
    fn test_temporal_modes_change_filters() {
        let def = definition();
        let ast = GraphQuery::from("Person", "p").fold().unwrap();
        let current = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(current.sql.contains("deleted_at IS NULL"));

        let ast = GraphQuery::from("Person", "p")
            .temporal(TemporalMode::IncludeEnded)
            .fold()
            .unwrap();
        let ended = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(!ended.sql.contains("deleted_at IS NULL"));
    }

    #[test]
    fn test_set_op_composition() {
        let def = definition();
        let other = GraphQuery::from("Person", "p").where_node(prop("p", "age").gt(60));
        let ast = GraphQuery::from("Person", "p")
            .where_node(prop("p", "age").lt(18))
            .union(other)
            .fold()
            .unwrap();
        let q = compile(&ast, &def, Dialect::Sqlite).unwrap();
        assert!(q.sql.contains(" UNION "));
        assert!(q.sql.contains("s0_q0 AS"));
    }

    #[test]
    fn test_statement_cache_key_stability() {
        let def = definition();
        let build = || {
            GraphQuery::from("Person", "p")
                .where_node(prop("p", "name").eq("Alice"))
                .fold()
                .unwrap()
        };
        let a = compile(&build(), &def, Dialect::Sqlite).unwrap();
        let b = compile(&build(), &def, Dialect::Sqlite).unwrap();
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.sql, b.sql);
        // Dialect participates in the key
        let c = compile(&build(), &def, Dialect::Postgres).unwrap();
        assert_ne!(a.cache_key, c.cache_key);
    }
}
