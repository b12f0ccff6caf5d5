//! Fluent query builder producing query documents.

use serde_json::{json, Map, Value as Json};

use crate::error::{JxError, Result};
use crate::query::{
    executor::{CancelToken, Executor, QueryResult},
    planner::{PlanExplain, Planner, PlannerOutput},
};

/// Fluent builder for query documents.
///
/// Errors are deferred: the first failing call is remembered, later calls
/// are ignored, and [`QueryBuilder::build`] reports it.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    doc: Map<String, Json>,
    selects: Vec<Json>,
    dimensions: Vec<Json>,
    grouping: Option<&'static str>,
    sorts: Vec<Json>,
    filters: Vec<Json>,
    error: Option<JxError>,
}

impl QueryBuilder {
    /// Starts a query over a table or `table.path` target.
    pub fn from(target: impl Into<String>) -> Self {
        let mut builder = Self::default();
        builder.doc.insert("from".into(), Json::String(target.into()));
        builder
    }

    /// Starts a query over inline documents.
    pub fn from_documents(docs: Vec<Json>) -> Self {
        let mut builder = Self::default();
        builder.doc.insert("from".into(), Json::Array(docs));
        builder
    }

    /// Selects a field by name.
    pub fn select(mut self, field: impl Into<String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.selects.push(Json::String(field.into()));
        self
    }

    /// Selects an aggregate of `value` under `name`.
    pub fn aggregate(mut self, name: impl Into<String>, value: Json, aggregate: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.selects.push(json!({
            "name": name.into(),
            "value": value,
            "aggregate": aggregate,
        }));
        self
    }

    /// Selects the row count under `name`.
    pub fn count(mut self, name: impl Into<String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.selects
            .push(json!({"name": name.into(), "aggregate": "count"}));
        self
    }

    /// Adds an edge over `value`.
    pub fn edge(self, value: impl Into<String>) -> Self {
        self.dimension("edges", json!(value.into()))
    }

    /// Adds an edge with an explicit domain.
    pub fn edge_with_domain(self, value: impl Into<String>, domain: Json) -> Self {
        self.dimension("edges", json!({"value": value.into(), "domain": domain}))
    }

    /// Adds a groupby column.
    pub fn group_by(self, value: impl Into<String>) -> Self {
        self.dimension("groupby", json!(value.into()))
    }

    fn dimension(mut self, clause: &'static str, spec: Json) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.grouping {
            Some(existing) if existing != clause => {
                self.error = Some(JxError::invalid_query(
                    "Expecting only one of edges or groupby",
                ));
                return self;
            }
            _ => self.grouping = Some(clause),
        }
        self.dimensions.push(spec);
        self
    }

    /// Adds filter conjuncts built against `field`.
    pub fn where_field<F>(mut self, field: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        if self.error.is_some() {
            return self;
        }
        let mut predicates = PredicateBuilder::new(field.into());
        build(&mut predicates);
        if predicates.exprs.is_empty() {
            self.error = Some(JxError::invalid_query(
                "where_field requires at least one predicate",
            ));
            return self;
        }
        self.filters.extend(predicates.exprs);
        self
    }

    /// Adds a raw filter expression.
    pub fn filter(mut self, expr: Json) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.filters.push(expr);
        self
    }

    /// Sorts ascending by `value`.
    pub fn sort(mut self, value: impl Into<String>) -> Self {
        self.sorts.push(json!(value.into()));
        self
    }

    /// Sorts descending by `value`.
    pub fn sort_desc(mut self, value: impl Into<String>) -> Self {
        self.sorts.push(json!({"value": value.into(), "sort": -1}));
        self
    }

    /// Caps the number of rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.doc.insert("limit".into(), json!(limit));
        self
    }

    /// Chooses the result format (`list`, `table`, `cube` or `value`).
    pub fn format(mut self, format: &str) -> Self {
        self.doc.insert("format".into(), json!(format));
        self
    }

    /// Builds the query document without planning.
    pub fn build(self) -> Result<Json> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut doc = self.doc;
        if !self.selects.is_empty() {
            doc.insert("select".into(), Json::Array(self.selects));
        }
        if let Some(clause) = self.grouping {
            doc.insert(clause.into(), Json::Array(self.dimensions));
        }
        match self.filters.len() {
            0 => {}
            1 => {
                let only = self.filters.into_iter().next().unwrap_or(Json::Bool(true));
                doc.insert("where".into(), only);
            }
            _ => {
                doc.insert("where".into(), json!({"and": self.filters}));
            }
        }
        if !self.sorts.is_empty() {
            doc.insert("sort".into(), Json::Array(self.sorts));
        }
        Ok(Json::Object(doc))
    }

    /// Requests a plan from the supplied planner.
    pub fn plan(self, planner: &Planner) -> Result<PlannerOutput> {
        let doc = self.build()?;
        planner.plan(&doc)
    }

    /// Explains the plan using the supplied planner.
    pub fn explain(self, planner: &Planner) -> Result<PlanExplain> {
        Ok(self.plan(planner)?.explain)
    }

    /// Executes the query using the supplied planner and executor.
    pub fn execute(
        self,
        planner: &Planner,
        executor: &Executor,
        cancel: Option<&CancelToken>,
    ) -> Result<QueryResult> {
        let output = self.plan(planner)?;
        executor.execute(&output, cancel)
    }
}

/// Builder used to construct predicates over a single field.
pub struct PredicateBuilder {
    field: String,
    exprs: Vec<Json>,
}

impl PredicateBuilder {
    fn new(field: String) -> Self {
        Self {
            field,
            exprs: Vec::new(),
        }
    }

    fn push_cmp(&mut self, op: &str, value: Json) -> &mut Self {
        let mut pair = Map::new();
        pair.insert(self.field.clone(), value);
        let mut expr = Map::new();
        expr.insert(op.into(), Json::Object(pair));
        self.exprs.push(Json::Object(expr));
        self
    }

    /// Field equals `value`.
    pub fn eq(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("eq", value.into())
    }

    /// Field differs from `value`.
    pub fn ne(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("ne", value.into())
    }

    /// Field is less than `value`.
    pub fn lt(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("lt", value.into())
    }

    /// Field is at most `value`.
    pub fn lte(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("lte", value.into())
    }

    /// Field is greater than `value`.
    pub fn gt(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("gt", value.into())
    }

    /// Field is at least `value`.
    pub fn gte(&mut self, value: impl Into<Json>) -> &mut Self {
        self.push_cmp("gte", value.into())
    }

    /// Field is one of `values`.
    pub fn in_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Json>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_cmp("in", Json::Array(values))
    }

    /// Field starts with `prefix`.
    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        self.push_cmp("prefix", json!(prefix))
    }

    /// Field is present.
    pub fn exists(&mut self) -> &mut Self {
        self.exprs.push(json!({"exists": self.field}));
        self
    }

    /// Field is null or empty.
    pub fn missing(&mut self) -> &mut Self {
        self.exprs.push(json!({"missing": self.field}));
        self
    }
}
