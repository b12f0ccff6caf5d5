//! Rule-based planner: binds a surface query document to the schema.
//!
//! Planning resolves the `from` target and its query path, expands star
//! selects, binds every variable to a row level with a scalar or vector
//! reader, materialises domains, and validates the combination of clauses.
//! The result carries an explain tree and a deterministic plan hash.

use std::hash::Hasher;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{JxError, Result};
use crate::expr::{parse, Binding, Expr, ExprType, Reader, Var};
use crate::query::aggregate::AggregateKind;
use crate::query::ast::{
    Dimension, Expansion, Format, Grouping, Level, Query, SelectColumn, SortKey, Source,
};
use crate::query::domain::Domain;
use crate::query::spec::{DimensionSpec, QuerySpec, SelectColumnSpec, SelectSpec, SortSpec};
use crate::schema::{SchemaSnapshot, TableSchema, ROOT};
use crate::value::path::{concat_field, relative_field, split_field, starts_with_field};
use crate::value::Value;

/// Name of the virtual table listing every column.
pub const META_COLUMNS: &str = "meta.columns";

const INLINE: &str = "inline";

/// Planner inputs that influence validation and defaults.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Rows returned by set and groupby queries without a `limit`.
    pub default_limit: usize,
    /// Upper bound applied to any `limit`.
    pub max_limit: usize,
    /// Partitions learned by edge `default` domains without a `limit`.
    pub default_domain_limit: usize,
    /// Reject `groupby` over a declared domain.
    pub strict_groupby: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 10_000,
            default_domain_limit: 10,
            strict_groupby: true,
        }
    }
}

/// Planner output containing the planned query and explain tree.
#[derive(Clone, Debug)]
pub struct PlannerOutput {
    /// The planned query.
    pub plan: Query,
    /// Human-readable explain tree.
    pub explain: PlanExplain,
    /// Deterministic plan hash for explain/caching.
    pub plan_hash: u64,
}

/// Human-readable explain tree.
#[derive(Clone, Debug)]
pub struct PlanExplain {
    /// Root node of the explain tree.
    pub root: ExplainNode,
    /// Deterministic hash for the plan.
    pub plan_hash: u64,
}

impl PlanExplain {
    /// JSON rendering; literal-bearing properties are masked when `redact` is set.
    pub fn to_json(&self, redact: bool) -> Json {
        let mut root = Map::new();
        root.insert("plan".into(), self.root.to_json(redact));
        root.insert(
            "plan_hash".into(),
            Json::String(format!("0x{:016x}", self.plan_hash)),
        );
        Json::Object(root)
    }
}

/// Explain node representing an operator with optional metadata.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Additional properties describing the operator.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given operator name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    fn with(mut self, prop: ExplainProp) -> Self {
        self.props.push(prop);
        self
    }

    fn over(mut self, input: ExplainNode) -> Self {
        self.inputs.push(input);
        self
    }

    fn to_json(&self, redact: bool) -> Json {
        let mut map = Map::new();
        map.insert("op".into(), Json::String(self.op.clone()));
        if !self.props.is_empty() {
            let mut props = Map::new();
            for prop in &self.props {
                let value = if redact && prop.redactable {
                    "<redacted>".to_string()
                } else {
                    prop.value.clone()
                };
                props.insert(prop.key.clone(), Json::String(value));
            }
            map.insert("props".into(), Json::Object(props));
        }
        let inputs = self.inputs.iter().map(|i| i.to_json(redact)).collect();
        map.insert("inputs".into(), Json::Array(inputs));
        Json::Object(map)
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

/// Query planner over one schema snapshot.
pub struct Planner {
    config: PlannerConfig,
    schema: Arc<SchemaSnapshot>,
}

impl Planner {
    /// Creates a planner bound to `schema`.
    pub fn new(config: PlannerConfig, schema: Arc<SchemaSnapshot>) -> Self {
        Self { config, schema }
    }

    /// Plans a raw query document.
    pub fn plan(&self, json: &Json) -> Result<PlannerOutput> {
        let spec = QuerySpec::from_json(json)?;
        let plan = self.lower(spec)?;
        let root = build_explain_tree(&plan);
        let plan_hash = compute_plan_hash(&plan, &root, self.schema.epoch());
        debug!(
            table = plan.source.name(),
            grouping = plan.grouping.as_str(),
            format = plan.format.as_str(),
            plan_hash,
            "query.plan"
        );
        Ok(PlannerOutput {
            plan,
            explain: PlanExplain { root, plan_hash },
            plan_hash,
        })
    }

    fn lower(&self, spec: QuerySpec) -> Result<Query> {
        let format = match spec.format.as_deref() {
            Some(name) => Format::parse(name)?,
            None => Format::List,
        };
        let limit = spec.limit()?.map(|l| l.min(self.config.max_limit));
        let filter_json = spec.filter();

        let (source, suffix, local) = self.resolve_source(&spec.from)?;
        let table = match &local {
            Some(snapshot) => snapshot.table(source.name()),
            None => self.schema.table(source.name()),
        };
        let levels = query_levels(table, suffix.as_deref());
        let binder = Binder {
            table,
            levels: &levels,
        };

        let (grouping, dim_specs) = match (spec.edges, spec.groupby) {
            (Some(edges), Some(groupby))
                if !edges_empty(&edges) && !edges_empty(&groupby) =>
            {
                return Err(JxError::invalid_query(
                    "Expecting either edges or groupby, not both",
                ))
            }
            (Some(edges), _) if !edges_empty(&edges) => (Grouping::Edges, edges.into_vec()),
            (_, Some(groupby)) if !edges_empty(&groupby) => {
                (Grouping::GroupBy, groupby.into_vec())
            }
            _ => (Grouping::Rows, Vec::new()),
        };

        let mut dimensions = Vec::with_capacity(dim_specs.len());
        for dim in dim_specs {
            dimensions.push(self.plan_dimension(dim, grouping, limit, &binder)?);
        }

        let column_specs = match spec.select {
            Some(select) if !select_empty(&select) => select
                .into_vec()
                .into_iter()
                .map(SelectSpec::into_column)
                .collect(),
            _ if grouping != Grouping::Rows => vec![SelectColumnSpec {
                name: Some("count".into()),
                aggregate: Some("count".into()),
                ..SelectColumnSpec::default()
            }],
            _ => vec![SelectColumnSpec {
                value: Some(Json::String(".".into())),
                ..SelectColumnSpec::default()
            }],
        };
        let column_specs = binder.expand_stars(column_specs);
        let mut select = column_specs
            .into_iter()
            .map(|c| plan_select(c, &binder))
            .collect::<Result<Vec<_>>>()?;

        let grouping = match grouping {
            Grouping::Rows if select.iter().any(|s| s.aggregate.is_some()) => Grouping::Total,
            other => other,
        };
        if grouping.is_aggregated() {
            for column in &mut select {
                column.aggregate.get_or_insert(AggregateKind::None);
            }
            for column in &select {
                validate_aggregate(column, table)?;
            }
        }
        check_unique_names(&dimensions, &select)?;

        let bare_values = grouping == Grouping::Rows
            && select.len() == 1
            && select[0].name == ".";

        let mut sort = Vec::new();
        if let Some(sort_spec) = spec.sort {
            for entry in sort_spec.into_vec() {
                for (value, descending) in SortSpec::into_keys(entry)? {
                    let mut value = parse(&value)?;
                    if !grouping.is_aggregated() {
                        binder.bind(&mut value);
                    }
                    sort.push(SortKey {
                        value: value.simplify(),
                        descending,
                    });
                }
            }
        }

        validate_format(format, grouping, &dimensions, &sort)?;

        let mut filter = parse(&filter_json)?;
        binder.bind(&mut filter);
        let depth = levels.len() - 1;
        let (document_terms, row_terms): (Vec<Expr>, Vec<Expr>) = filter
            .simplify()
            .conjuncts()
            .into_iter()
            .partition(|term| depth == 0 || term.vars().iter().all(|v| v.binding.level == 0));

        let limit = match grouping {
            Grouping::Rows | Grouping::GroupBy => Some(limit.unwrap_or(self.config.default_limit)),
            Grouping::Total | Grouping::Edges => None,
        };
        let synthesize_missing = depth > 0
            && matches!(grouping, Grouping::Edges | Grouping::GroupBy)
            && dimensions.iter().any(|d| d.allow_nulls);

        Ok(Query {
            source,
            levels,
            select,
            bare_values,
            document_filter: Expr::conjoin(document_terms),
            row_filter: Expr::conjoin(row_terms),
            dimensions,
            grouping,
            sort,
            limit,
            format,
            synthesize_missing,
        })
    }

    fn resolve_source(&self, from: &Json) -> Result<(Source, Option<String>, Option<SchemaSnapshot>)> {
        match from {
            Json::String(name) if name == META_COLUMNS => {
                let docs = self.schema.meta_rows();
                let local = SchemaSnapshot::from_documents(META_COLUMNS, &docs);
                let source = Source::Documents {
                    name: META_COLUMNS.to_string(),
                    docs,
                };
                Ok((source, None, Some(local)))
            }
            Json::String(name) if !name.is_empty() => {
                let (table, suffix) = self.schema.split_from(name);
                Ok((
                    Source::Table(table.to_string()),
                    suffix.map(str::to_string),
                    None,
                ))
            }
            Json::Array(items) => {
                let docs: Vec<Value> = items.iter().cloned().map(Value::from_json).collect();
                let local = SchemaSnapshot::from_documents(INLINE, &docs);
                let source = Source::Documents {
                    name: INLINE.to_string(),
                    docs,
                };
                Ok((source, None, Some(local)))
            }
            other => Err(JxError::invalid_query("Do not know how to handle {from}")
                .with_param("from", other)),
        }
    }

    fn plan_dimension(
        &self,
        spec: DimensionSpec,
        grouping: Grouping,
        limit: Option<usize>,
        binder: &Binder<'_>,
    ) -> Result<Dimension> {
        let spec = spec.into_object();
        let name = match (&spec.name, &spec.value) {
            (Some(name), _) => name.clone(),
            (None, Some(Json::String(value))) => value.clone(),
            _ => {
                return Err(JxError::invalid_query("Expecting {kind} to have a name")
                    .with_param("kind", grouping.as_str()))
            }
        };
        let value_json = spec.value.clone().unwrap_or_else(|| Json::String(name.clone()));
        let mut value = parse(&value_json)?;
        binder.bind(&mut value);
        let value = value.simplify();

        let domain = match (grouping, &spec.domain) {
            (Grouping::GroupBy, None) => Domain::default_with_limit(None),
            (Grouping::GroupBy, Some(json)) => {
                let domain = Domain::from_json(json, self.config.default_limit)?;
                if !domain.is_default() && self.config.strict_groupby {
                    return Err(JxError::invalid_query(
                        "groupby does not accept a {type} domain; use edges instead",
                    )
                    .with_param("type", domain.kind_name()));
                }
                domain
            }
            (_, json) => Domain::from_json(
                json.as_ref().unwrap_or(&Json::Null),
                limit.unwrap_or(self.config.default_domain_limit),
            )?,
        };
        if domain.rejects_strings() && value.type_of() == ExprType::String {
            return Err(JxError::domain(
                "Can not partition string values of {name} into a {type} domain",
            )
            .with_param("name", &name)
            .with_param("type", domain.kind_name()));
        }

        let mut dimension = Dimension {
            name,
            value,
            domain,
            allow_nulls: spec.allow_nulls.unwrap_or(true),
            reader: Reader::Scalar,
            expansion: None,
        };
        if dimension
            .value
            .vars()
            .iter()
            .any(|v| v.binding.reader == Reader::Vector)
        {
            dimension.reader = Reader::Vector;
            dimension.expansion = binder.expand(&mut dimension.value);
        }
        Ok(dimension)
    }
}

fn edges_empty(dims: &crate::query::spec::OneOrMany<DimensionSpec>) -> bool {
    matches!(dims, crate::query::spec::OneOrMany::Many(items) if items.is_empty())
}

fn select_empty(select: &crate::query::spec::OneOrMany<SelectSpec>) -> bool {
    matches!(select, crate::query::spec::OneOrMany::Many(items) if items.is_empty())
}

/// Query path levels for `suffix`, root first.
fn query_levels(table: Option<&TableSchema>, suffix: Option<&str>) -> Vec<Level> {
    let mut paths = vec![ROOT.to_string()];
    if let Some(suffix) = suffix {
        if let Some(table) = table {
            let mut chain = table.nested_path_of(suffix);
            chain.pop();
            chain.reverse();
            paths.extend(chain);
        }
        if paths.last().map(String::as_str) != Some(suffix) {
            paths.push(suffix.to_string());
        }
    }
    let mut levels = Vec::with_capacity(paths.len());
    let mut previous = ROOT.to_string();
    for path in paths {
        let parts = relative_field(&path, &previous)
            .map(|rel| split_field(&rel))
            .unwrap_or_else(|| split_field(&path));
        previous = path.clone();
        levels.push(Level { path, parts });
    }
    levels
}

/// Resolves variable names against the query path.
struct Binder<'a> {
    table: Option<&'a TableSchema>,
    levels: &'a [Level],
}

impl Binder<'_> {
    fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    fn bind(&self, expr: &mut Expr) {
        expr.visit_vars_mut(&mut |var| self.bind_var(var));
    }

    fn bind_var(&self, var: &mut Var) {
        let depth = self.depth();
        if var.is_self() {
            var.binding = Binding::scalar(depth, Vec::new());
            var.field = self.levels[depth].path.clone();
            var.known = true;
            return;
        }
        if let Some(table) = self.table {
            for level in (0..=depth).rev() {
                let full = concat_field(&self.levels[level].path, &var.name);
                if !table.has_field(&full) {
                    continue;
                }
                let at = self.deepest_level(&full);
                let base = &self.levels[at].path;
                let parts = split_field(&relative_field(&full, base).unwrap_or_else(|| full.clone()));
                let reader = if crosses_array(table, base, &full) {
                    Reader::Vector
                } else {
                    Reader::Scalar
                };
                var.binding = Binding {
                    level: at,
                    parts,
                    reader,
                };
                var.ty = field_type(table, &full);
                var.known = true;
                var.field = full;
                return;
            }
        }
        var.binding = Binding::scalar(depth, split_field(&var.name));
        var.field = concat_field(&self.levels[depth].path, &var.name);
        var.known = false;
    }

    fn deepest_level(&self, field: &str) -> usize {
        (0..self.levels.len())
            .rev()
            .find(|&level| starts_with_field(field, &self.levels[level].path))
            .unwrap_or(0)
    }

    /// Rebinds the vector variables of a dimension to the elements of the
    /// shallowest array they cross, read at a level one past the query path.
    fn expand(&self, value: &mut Expr) -> Option<Expansion> {
        let table = self.table?;
        let anchor = value
            .vars()
            .into_iter()
            .find(|v| v.binding.reader == Reader::Vector)
            .map(|v| (v.binding.level, v.field.clone()))?;
        let (level, field) = anchor;
        let base = self.levels[level].path.clone();
        let path = table
            .nested_columns()
            .filter(|nested| {
                *nested != base.as_str()
                    && starts_with_field(nested, &base)
                    && starts_with_field(&field, nested)
                    && field != *nested
            })
            .min_by_key(|nested| nested.len())?
            .to_string();
        let element_level = self.depth() + 1;
        value.visit_vars_mut(&mut |var| {
            if var.binding.reader != Reader::Vector
                || var.binding.level != level
                || !starts_with_field(&var.field, &path)
                || var.field == path
            {
                return;
            }
            let rel = relative_field(&var.field, &path).unwrap_or_else(|| var.field.clone());
            var.binding = Binding {
                level: element_level,
                parts: split_field(&rel),
                reader: if crosses_array(table, &path, &var.field) {
                    Reader::Vector
                } else {
                    Reader::Scalar
                },
            };
        });
        let parts = split_field(&relative_field(&path, &base).unwrap_or_else(|| path.clone()));
        Some(Expansion { level, parts, path })
    }

    /// Replaces `*` and `foo.*` selects with one select per leaf column.
    fn expand_stars(&self, columns: Vec<SelectColumnSpec>) -> Vec<SelectColumnSpec> {
        let mut out = Vec::with_capacity(columns.len());
        for column in columns {
            let star = match column.value_name() {
                Some("*") if column.aggregate.is_none() => Some(ROOT.to_string()),
                Some(value) if column.aggregate.is_none() && value.ends_with(".*") => {
                    Some(value[..value.len() - 2].to_string())
                }
                _ => None,
            };
            let Some(prefix) = star else {
                out.push(column);
                continue;
            };
            let leaves = self.leaves_under(&prefix);
            if leaves.is_empty() {
                let value = if prefix == ROOT { ".".to_string() } else { prefix };
                out.push(SelectColumnSpec {
                    name: column.name.clone().or_else(|| Some(value.clone())),
                    value: Some(Json::String(value)),
                    ..SelectColumnSpec::default()
                });
                continue;
            }
            for leaf in leaves {
                let name = match &column.name {
                    Some(name) => match relative_field(&leaf, &prefix) {
                        Some(rel) => concat_field(name, &rel),
                        None => name.clone(),
                    },
                    None => leaf.clone(),
                };
                out.push(SelectColumnSpec {
                    name: Some(name),
                    value: Some(Json::String(leaf)),
                    ..SelectColumnSpec::default()
                });
            }
        }
        out
    }

    /// Scalar leaves living at the query path, named relative to it and
    /// restricted to `prefix` (relative, `.` for all).
    fn leaves_under(&self, prefix: &str) -> Vec<String> {
        let Some(table) = self.table else {
            return Vec::new();
        };
        let path = &self.levels[self.depth()].path;
        let scope = concat_field(path, prefix);
        let mut leaves: Vec<String> = table
            .columns()
            .filter(|c| c.column_type.is_scalar() && c.nested() == path.as_str())
            .filter(|c| starts_with_field(&c.name, &scope) && c.name != "_id")
            .filter_map(|c| relative_field(&c.name, path))
            .collect();
        leaves.sort();
        leaves.dedup();
        leaves
    }
}

/// True when a nested column strictly between `base` and `field` exists.
fn crosses_array(table: &TableSchema, base: &str, field: &str) -> bool {
    table.nested_columns().any(|nested| {
        nested != base
            && starts_with_field(nested, base)
            && starts_with_field(field, nested)
            && field != nested
    })
}

fn field_type(table: &TableSchema, field: &str) -> ExprType {
    table
        .columns()
        .filter(|c| c.name == field)
        .map(|c| ExprType::of_column(c.column_type))
        .reduce(ExprType::union)
        .unwrap_or(ExprType::Object)
}

fn plan_select(spec: SelectColumnSpec, binder: &Binder<'_>) -> Result<SelectColumn> {
    let aggregate = match &spec.aggregate {
        Some(name) => Some(AggregateKind::parse(name, spec.percentile.as_ref())?),
        None => None,
    };
    let name = match (&spec.name, spec.value_name(), aggregate) {
        (Some(name), _, _) => name.clone(),
        (None, Some(value), _) => value.to_string(),
        (None, None, Some(aggregate)) => aggregate.name().to_string(),
        (None, None, None) => {
            return Err(JxError::invalid_query("Expecting select to have a name"));
        }
    };
    let mut value = match (&spec.value, aggregate) {
        (Some(json), _) if !json.is_null() => parse(json)?,
        (_, Some(AggregateKind::Count)) => Expr::literal(true),
        (_, Some(aggregate)) => {
            return Err(JxError::invalid_query("Expecting {aggregate} to have a value")
                .with_param("aggregate", aggregate))
        }
        (_, None) => {
            return Err(JxError::invalid_query("Expecting select {name} to have a value")
                .with_param("name", &name))
        }
    };
    binder.bind(&mut value);
    Ok(SelectColumn {
        name,
        value: value.simplify(),
        aggregate,
        default: spec.default.map(Value::from_json),
    })
}

fn validate_aggregate(column: &SelectColumn, table: Option<&TableSchema>) -> Result<()> {
    let Some(aggregate) = column.aggregate else {
        return Ok(());
    };
    if aggregate == AggregateKind::None {
        return Ok(());
    }
    let table_known = table.is_some_and(|t| !t.is_empty());
    for var in column.value.vars() {
        if var.binding.reader == Reader::Vector {
            return Err(JxError::invalid_query(
                "Can not aggregate {name}: it is nested deeper than the query path",
            )
            .with_param("name", &var.name));
        }
        if !var.known
            && table_known
            && aggregate != AggregateKind::Count
            && column.default.is_none()
        {
            return Err(JxError::unresolved(var.name.clone()));
        }
    }
    Ok(())
}

fn check_unique_names(dimensions: &[Dimension], select: &[SelectColumn]) -> Result<()> {
    unique(dimensions.iter().map(|d| d.name.as_str()))?;
    unique(select.iter().map(|s| s.name.as_str()))
}

/// Selects may share a name with a dimension; two selects (or two
/// dimensions) may not.
fn unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(JxError::invalid_query(
                "Column {name} is selected more than once; give each an explicit name",
            )
            .with_param("name", name));
        }
    }
    Ok(())
}

fn validate_format(
    format: Format,
    grouping: Grouping,
    dimensions: &[Dimension],
    sort: &[SortKey],
) -> Result<()> {
    match format {
        Format::Value if grouping == Grouping::Rows => Err(JxError::invalid_query(
            "format value requires an aggregate",
        )),
        Format::Value if !dimensions.is_empty() => Err(JxError::invalid_query(
            "format value does not accept edges or groupby",
        )),
        Format::Cube if !dimensions.is_empty() => {
            for key in sort {
                let keeps_order = !key.descending
                    && matches!(&key.value, Expr::Var(var)
                        if dimensions.iter().any(|d| d.name == var.name && d.domain.is_ordered()));
                if !keeps_order {
                    return Err(JxError::invalid_query(
                        "Can not sort a cube by {sort}: it would reorder the edge partitions",
                    )
                    .with_param("sort", &key.value));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn build_explain_tree(query: &Query) -> ExplainNode {
    let mut node = ExplainNode::new("Scan").with(ExplainProp::plain("source", query.source.name()));
    if let Source::Documents { docs, .. } = &query.source {
        node = node.with(ExplainProp::plain("documents", docs.len().to_string()));
    }
    if !query.document_filter.is_true() {
        node = ExplainNode::new("Filter")
            .with(ExplainProp::plain("stage", "document"))
            .with(ExplainProp::literal("predicate", query.document_filter.to_string()))
            .over(node);
    }
    for level in query.levels.iter().skip(1) {
        node = ExplainNode::new("Expand")
            .with(ExplainProp::plain("path", level.path.clone()))
            .with(ExplainProp::plain(
                "synthesize_missing",
                query.synthesize_missing.to_string(),
            ))
            .over(node);
    }
    if !query.row_filter.is_true() {
        node = ExplainNode::new("Filter")
            .with(ExplainProp::plain("stage", "row"))
            .with(ExplainProp::literal("predicate", query.row_filter.to_string()))
            .over(node);
    }
    let columns = query
        .select
        .iter()
        .map(describe_select)
        .collect::<Vec<_>>()
        .join(", ");
    node = if query.grouping.is_aggregated() {
        let mut agg = ExplainNode::new("Aggregate")
            .with(ExplainProp::plain("grouping", query.grouping.as_str()))
            .with(ExplainProp::literal("select", columns));
        for dim in &query.dimensions {
            let mut desc = format!("{}={} in {}", dim.name, dim.value, dim.domain.kind_name());
            if let Some(expansion) = &dim.expansion {
                desc.push_str(&format!(" over {}", expansion.path));
            }
            if !dim.allow_nulls {
                desc.push_str(" not null");
            }
            agg = agg.with(ExplainProp::literal("dimension", desc));
        }
        agg.over(node)
    } else {
        ExplainNode::new("Project")
            .with(ExplainProp::literal("select", columns))
            .over(node)
    };
    if !query.sort.is_empty() {
        let keys = query
            .sort
            .iter()
            .map(|k| format!("{}{}", k.value, if k.descending { " desc" } else { "" }))
            .collect::<Vec<_>>()
            .join(", ");
        node = ExplainNode::new("Sort")
            .with(ExplainProp::literal("keys", keys))
            .over(node);
    }
    if let Some(limit) = query.limit {
        node = ExplainNode::new("Limit")
            .with(ExplainProp::plain("limit", limit.to_string()))
            .over(node);
    }
    ExplainNode::new("Shape")
        .with(ExplainProp::plain("format", query.format.as_str()))
        .over(node)
}

fn describe_select(column: &SelectColumn) -> String {
    match column.aggregate {
        Some(aggregate) => format!("{}={}({})", column.name, aggregate, column.value),
        None => format!("{}={}", column.name, column.value),
    }
}

fn compute_plan_hash(query: &Query, root: &ExplainNode, schema_epoch: u64) -> u64 {
    let logical = hash_query(query, schema_epoch);
    let mut physical = Xxh64::new(0);
    hash_explain_node(root, &mut physical);
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(logical);
    hasher.write_u64(physical.finish());
    hasher.finish()
}

fn hash_query(query: &Query, schema_epoch: u64) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(schema_epoch);
    hasher.write(query.source.name().as_bytes());
    hasher.write_u64(query.levels.len() as u64);
    for level in &query.levels {
        hasher.write(level.path.as_bytes());
    }
    hasher.write(query.grouping.as_str().as_bytes());
    hasher.write(query.format.as_str().as_bytes());
    hasher.write_u8(query.bare_values as u8);
    hasher.write_u64(query.limit.map_or(u64::MAX, |l| l as u64));
    for column in &query.select {
        hasher.write(column.name.as_bytes());
        if let Some(default) = &column.default {
            hasher.write(default.to_string().as_bytes());
        }
    }
    for dim in &query.dimensions {
        hasher.write(dim.name.as_bytes());
        hasher.write(dim.domain.describe().to_string().as_bytes());
        hasher.write_u8(dim.allow_nulls as u8);
    }
    hasher.finish()
}

fn hash_explain_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_explain_node(child, hasher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn planner(docs: Json) -> Planner {
        let registry = SchemaRegistry::new();
        let docs: Vec<Value> = docs
            .as_array()
            .map(|items| items.iter().cloned().map(Value::from_json).collect())
            .unwrap_or_default();
        registry.observe("t", &docs);
        Planner::new(PlannerConfig::default(), registry.snapshot())
    }

    fn nested_planner() -> Planner {
        planner(json!([{
            "k": 1,
            "a": {"x": "top", "_b": [{"r": "a", "s": "aa", "_c": [{"z": 1}]}, {"s": "bb"}]}
        }]))
    }

    #[test]
    fn deep_from_builds_levels() {
        let out = nested_planner().plan(&json!({"from": "t.a._b._c"})).expect("plan");
        let paths: Vec<_> = out.plan.levels.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec![".", "a._b", "a._b._c"]);
        assert_eq!(out.plan.levels[1].parts, vec!["a", "_b"]);
        assert_eq!(out.plan.levels[2].parts, vec!["_c"]);
    }

    #[test]
    fn binds_relative_then_shallower() {
        let out = nested_planner()
            .plan(&json!({"from": "t.a._b", "select": ["r", "k", "a.x"]}))
            .expect("plan");
        let bindings: Vec<_> = out
            .plan
            .select
            .iter()
            .map(|s| match &s.value {
                Expr::Var(var) => (var.binding.level, var.binding.parts.clone(), var.known),
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(bindings[0], (1, vec!["r".to_string()], true));
        assert_eq!(bindings[1], (0, vec!["k".to_string()], true));
        assert_eq!(bindings[2], (0, vec!["a".to_string(), "x".to_string()], true));
    }

    #[test]
    fn vector_dimension_expands_over_shallowest_array() {
        let out = nested_planner()
            .plan(&json!({"from": "t", "edges": ["a._b.r"]}))
            .expect("plan");
        let dim = &out.plan.dimensions[0];
        assert_eq!(dim.reader, Reader::Vector);
        let expansion = dim.expansion.as_ref().expect("expansion");
        assert_eq!(expansion.path, "a._b");
        assert_eq!(expansion.level, 0);
        match &dim.value {
            Expr::Var(var) => {
                assert_eq!(var.binding.level, 1);
                assert_eq!(var.binding.parts, vec!["r"]);
                assert_eq!(var.binding.reader, Reader::Scalar);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn rejects_deep_aggregate_and_unknown_columns() {
        let p = nested_planner();
        let err = p
            .plan(&json!({"from": "t", "select": {"value": "a._b.r", "aggregate": "max"}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let err = p
            .plan(&json!({"from": "t", "select": {"value": "nope", "aggregate": "sum"}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedName);
        assert_eq!(err.to_string(), "Can not resolve nope to a column");

        p.plan(&json!({"from": "t", "select": {"value": "nope", "aggregate": "sum", "default": 0}}))
            .expect("default rescues");
    }

    #[test]
    fn star_expands_to_leaves_at_query_path() {
        let out = nested_planner()
            .plan(&json!({"from": "t.a._b", "select": "*"}))
            .expect("plan");
        let names: Vec<_> = out.plan.select.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["r", "s"]);

        let out = nested_planner()
            .plan(&json!({"from": "t", "select": "*"}))
            .expect("plan");
        let names: Vec<_> = out.plan.select.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.x", "k"]);
    }

    #[test]
    fn surface_errors() {
        let p = nested_planner();
        let err = p.plan(&json!({"from": 3})).unwrap_err();
        assert_eq!(err.to_string(), "Do not know how to handle 3");

        let err = p
            .plan(&json!({"from": "t", "select": {"value": "k", "aggregate": "percentile", "percentile": "0.90"}}))
            .unwrap_err();
        assert!(err.to_string().contains("Expecting percentile to be a float"));

        let err = p.plan(&json!({"from": "t", "select": ["k", "k"]})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let err = p
            .plan(&json!({"from": "t", "edges": ["k"], "groupby": ["k"]}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let err = p.plan(&json!({"from": "t", "format": "value"})).unwrap_err();
        assert!(err.to_string().contains("requires an aggregate"));
    }

    #[test]
    fn groupby_domain_policy() {
        let query = json!({"from": "t", "groupby": [{"value": "k", "domain": {"type": "range", "min": 0, "max": 3, "interval": 1}}]});
        let err = nested_planner().plan(&query).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let registry = SchemaRegistry::new();
        let permissive = Planner::new(
            PlannerConfig {
                strict_groupby: false,
                ..PlannerConfig::default()
            },
            registry.snapshot(),
        );
        permissive.plan(&query).expect("permissive groupby");
    }

    #[test]
    fn range_domain_on_string_is_domain_error() {
        let err = nested_planner()
            .plan(&json!({"from": "t", "edges": [{"value": "a.x", "domain": {"type": "range", "min": 0, "max": 1, "interval": 1}}]}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainError);
    }

    #[test]
    fn cube_sort_must_keep_partition_order() {
        let p = nested_planner();
        let err = p
            .plan(&json!({"from": "t", "edges": ["k"], "format": "cube", "sort": "k"}))
            .unwrap_err();
        assert!(err.to_string().contains("Can not sort a cube"));
        p.plan(&json!({
            "from": "t",
            "edges": [{"value": "k", "domain": {"min": 0, "max": 3, "interval": 1}}],
            "format": "cube",
            "sort": "k"
        }))
        .expect("ordered domain ascending");
    }

    #[test]
    fn splits_document_and_row_filters() {
        let out = nested_planner()
            .plan(&json!({"from": "t.a._b", "where": {"and": [{"eq": {"k": 1}}, {"eq": {"r": "a"}}]}}))
            .expect("plan");
        assert_eq!(out.plan.document_filter.to_string(), "eq(k, 1)");
        assert_eq!(out.plan.row_filter.to_string(), "eq(r, \"a\")");
    }

    #[test]
    fn plan_hash_is_deterministic() {
        let p = nested_planner();
        let q = json!({"from": "t", "edges": ["k"], "select": {"value": "k", "aggregate": "sum"}});
        let a = p.plan(&q).expect("plan");
        let b = p.plan(&q).expect("plan");
        assert_eq!(a.plan_hash, b.plan_hash);
        let c = p.plan(&json!({"from": "t", "edges": ["k"]})).expect("plan");
        assert_ne!(a.plan_hash, c.plan_hash);
        let rendered = a.explain.to_json(true);
        assert_eq!(rendered["plan"]["op"], json!("Shape"));
    }

    #[test]
    fn select_may_share_a_name_with_an_edge() {
        let p = nested_planner();
        let out = p
            .plan(&json!({"from": "t", "edges": ["k"], "select": {"value": "k", "aggregate": "sum"}}))
            .expect("plan");
        assert_eq!(out.plan.dimensions[0].name, "k");
        assert_eq!(out.plan.select[0].name, "k");

        let err = p
            .plan(&json!({"from": "t", "edges": ["k", "k"]}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn regex_reads_its_column() {
        let out = nested_planner()
            .plan(&json!({"from": "t.a._b", "where": {"regex": {"s": "a.*"}}}))
            .expect("plan");
        assert!(!out.plan.row_filter.is_constant());
        let vars = out.plan.row_filter.vars();
        assert_eq!(vars.len(), 1);
        assert!(vars[0].known);
        assert_eq!(vars[0].binding.level, 1);
    }

    #[test]
    fn grouped_defaults() {
        let out = nested_planner().plan(&json!({"from": "t", "edges": ["k"]})).expect("plan");
        assert_eq!(out.plan.select[0].name, "count");
        assert_eq!(out.plan.select[0].aggregate, Some(AggregateKind::Count));
        assert_eq!(out.plan.limit, None);

        let out = nested_planner().plan(&json!({"from": "t"})).expect("plan");
        assert!(out.plan.bare_values);
        assert_eq!(out.plan.limit, Some(10));
    }
}
