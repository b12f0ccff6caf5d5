//! Query executor.
//!
//! Runs a planned [`Query`] as scan → expand → filter → bucket/aggregate →
//! sort → limit → shape. A source document becomes one row per element of
//! the query path; a row exposes the document at level `0` and the element
//! it is positioned on at each deeper level.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::error::{JxError, Result};
use crate::expr::{RecordContext, RowContext};
use crate::query::aggregate::Accumulator;
use crate::query::ast::{Dimension, Expansion, Format, Grouping, Query, SelectColumn, Source};
use crate::query::domain::Domain;
use crate::query::planner::PlannerOutput;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::shape::{self, record_of, Axis, Output};
use crate::storage::{DocumentIter, ScanRequest, StorageAdapter, StoredDocument};
use crate::value::{compare, Value};

static NULL: Value = Value::Null;

/// Cooperative cancellation flag shared between a caller and a running query.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the query stops at its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn check_cancel(token: Option<&CancelToken>) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(JxError::cancelled()),
        _ => Ok(()),
    }
}

/// Shaped result of one query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    /// Shape of `data`.
    pub format: Format,
    /// The result document.
    pub data: Value,
    /// Hash of the plan that produced it.
    pub plan_hash: u64,
}

impl QueryResult {
    /// Result as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.data.to_json()
    }
}

/// Documents pulled from storage, checking for cancellation between items.
struct DocumentStream {
    docs: DocumentIter,
    cancel: Option<CancelToken>,
}

impl Iterator for DocumentStream {
    type Item = Result<Arc<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = check_cancel(self.cancel.as_ref()) {
            return Some(Err(err));
        }
        self.docs.next().map(|doc| doc.map(|d| d.doc))
    }
}

/// One row: the document plus the element at each deeper level.
struct Row<'a> {
    doc: &'a Value,
    elements: SmallVec<[&'a Value; 2]>,
}

impl<'a> Row<'a> {
    fn at(&self, level: usize) -> Option<&'a Value> {
        match level {
            0 => Some(self.doc),
            n => self.elements.get(n - 1).copied(),
        }
    }
}

impl RowContext for Row<'_> {
    fn level(&self, level: usize) -> Option<&Value> {
        self.at(level)
    }
}

/// A row extended with one element of a dimension's expansion array.
struct ElementRow<'r, 'a> {
    row: &'r Row<'a>,
    level: usize,
    element: &'r Value,
}

impl RowContext for ElementRow<'_, '_> {
    fn level(&self, level: usize) -> Option<&Value> {
        if level == self.level {
            Some(self.element)
        } else {
            self.row.at(level)
        }
    }
}

/// Descends mapping keys by reference.
fn lookup<'v>(value: &'v Value, parts: &[String]) -> Option<&'v Value> {
    parts.iter().try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        _ => None,
    })
}

/// Elements of an array, flattening nested arrays and skipping nulls.
fn elements_of<'v>(value: Option<&'v Value>, out: &mut Vec<&'v Value>) {
    match value {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::Array(_) => elements_of(Some(item), out),
                    Value::Null => {}
                    other => out.push(other),
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => out.push(other),
    }
}

/// Expands a document into rows along the query path.
fn expand_rows<'a>(doc: &'a Value, query: &Query) -> Vec<Row<'a>> {
    let mut rows = vec![Row {
        doc,
        elements: SmallVec::new(),
    }];
    for (depth, level) in query.levels.iter().enumerate().skip(1) {
        let mut next = Vec::with_capacity(rows.len());
        for row in &rows {
            let parent = row.at(depth - 1).unwrap_or(&NULL);
            let mut found = Vec::new();
            elements_of(lookup(parent, &level.parts), &mut found);
            if found.is_empty() && query.synthesize_missing {
                found.push(&NULL);
            }
            for element in found {
                let mut elements = row.elements.clone();
                elements.push(element);
                next.push(Row {
                    doc: row.doc,
                    elements,
                });
            }
        }
        rows = next;
    }
    rows
}

fn passes(filter: &crate::expr::Expr, ctx: &dyn RowContext) -> Result<bool> {
    if filter.is_true() {
        return Ok(true);
    }
    Ok(filter.eval(ctx)?.truthy())
}

fn with_default(value: Value, column: &SelectColumn) -> Value {
    match &column.default {
        Some(default) if value.is_missing() => default.clone(),
        _ => value,
    }
}

#[derive(Debug, Default)]
struct ExecStats {
    docs: usize,
    rows: usize,
    cells: usize,
}

/// Query executor responsible for running planned queries.
pub struct Executor {
    storage: Arc<dyn StorageAdapter>,
}

impl Executor {
    /// Creates an executor reading from `storage`.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Executes a plan and shapes the result.
    pub fn execute(
        &self,
        planned: &PlannerOutput,
        cancel: Option<&CancelToken>,
    ) -> Result<QueryResult> {
        let query = &planned.plan;
        let started = Instant::now();
        check_cancel(cancel)?;

        let scan_timer = profile_timer();
        let docs = self.scan(query)?;
        record_profile_timer(QueryProfileKind::Scan, scan_timer);
        let stream = DocumentStream {
            docs,
            cancel: cancel.cloned(),
        };

        let mut stats = ExecStats::default();
        let output = if query.grouping.is_aggregated() {
            aggregate(query, stream, cancel, &mut stats)?
        } else {
            collect_rows(query, stream, cancel, &mut stats)?
        };

        check_cancel(cancel)?;
        let shape_timer = profile_timer();
        let data = shape::shape(query, output)?;
        record_profile_timer(QueryProfileKind::Shape, shape_timer);
        debug!(
            table = query.source.name(),
            docs = stats.docs,
            rows = stats.rows,
            cells = stats.cells,
            plan_hash = planned.plan_hash,
            elapsed_us = started.elapsed().as_micros() as u64,
            "query.execute"
        );
        Ok(QueryResult {
            format: query.format,
            data,
            plan_hash: planned.plan_hash,
        })
    }

    fn scan(&self, query: &Query) -> Result<DocumentIter> {
        match &query.source {
            Source::Table(table) => {
                let mut request = ScanRequest::table(table);
                if !query.document_filter.is_true() {
                    request = request.with_predicate(&query.document_filter);
                }
                self.storage.scan(&request)
            }
            Source::Documents { docs, .. } => {
                let docs: Vec<Result<StoredDocument>> = docs
                    .iter()
                    .map(|doc| {
                        Ok(StoredDocument {
                            id: String::new(),
                            doc: Arc::new(doc.clone()),
                        })
                    })
                    .collect();
                Ok(Box::new(docs.into_iter()))
            }
        }
    }
}

/// Source rows surviving the filters, in scan order.
fn for_each_row(
    query: &Query,
    stream: DocumentStream,
    stats: &mut ExecStats,
    mut visit: impl FnMut(&Row<'_>) -> Result<bool>,
) -> Result<()> {
    for doc in stream {
        let doc = doc?;
        stats.docs += 1;
        if !passes(&query.document_filter, &RecordContext(doc.as_ref()))? {
            continue;
        }
        for row in expand_rows(doc.as_ref(), query) {
            if !passes(&query.row_filter, &row)? {
                continue;
            }
            stats.rows += 1;
            if !visit(&row)? {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn collect_rows(
    query: &Query,
    stream: DocumentStream,
    cancel: Option<&CancelToken>,
    stats: &mut ExecStats,
) -> Result<Output> {
    let limit = query.limit.unwrap_or(usize::MAX);
    let early_stop = query.sort.is_empty();
    let mut rows: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();

    let filter_timer = profile_timer();
    for_each_row(query, stream, stats, |row| {
        if early_stop && rows.len() >= limit {
            return Ok(false);
        }
        let values = query
            .select
            .iter()
            .map(|column| Ok(with_default(column.value.eval(row)?, column)))
            .collect::<Result<Vec<_>>>()?;
        let keys = query
            .sort
            .iter()
            .map(|key| key.value.eval(row))
            .collect::<Result<Vec<_>>>()?;
        rows.push((values, keys));
        Ok(!(early_stop && rows.len() >= limit))
    })?;
    record_profile_timer(QueryProfileKind::Filter, filter_timer);

    check_cancel(cancel)?;
    if !query.sort.is_empty() {
        let sort_timer = profile_timer();
        rows.sort_by(|a, b| compare_keys(query, &a.1, &b.1));
        record_profile_timer(QueryProfileKind::Sort, sort_timer);
    }
    rows.truncate(limit);
    Ok(Output {
        rows: rows.into_iter().map(|(values, _)| values).collect(),
        ..Output::default()
    })
}

fn compare_keys(query: &Query, a: &[Value], b: &[Value]) -> CmpOrdering {
    for ((key, x), y) in query.sort.iter().zip(a).zip(b) {
        let ord = compare(x, y);
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

/// Partition of one dimension a row landed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Slot {
    Part(usize),
    Null,
}

type CellKey = SmallVec<[Slot; 4]>;
type Assignment = SmallVec<[(usize, Slot); 4]>;

struct Cell {
    rows: usize,
    accs: Vec<Box<dyn Accumulator>>,
}

/// Dimensions evaluated together: alone, or jointly per element of a
/// shared expansion array.
enum DimGroup {
    Single(usize),
    Expanded {
        expansion: Expansion,
        dims: Vec<usize>,
    },
}

fn dim_groups(dimensions: &[Dimension]) -> Vec<DimGroup> {
    let mut groups: Vec<DimGroup> = Vec::new();
    for (idx, dim) in dimensions.iter().enumerate() {
        let Some(expansion) = &dim.expansion else {
            groups.push(DimGroup::Single(idx));
            continue;
        };
        let shared = groups.iter_mut().find_map(|group| match group {
            DimGroup::Expanded { expansion: e, dims } if e == expansion => Some(dims),
            _ => None,
        });
        match shared {
            Some(dims) => dims.push(idx),
            None => groups.push(DimGroup::Expanded {
                expansion: expansion.clone(),
                dims: vec![idx],
            }),
        }
    }
    groups
}

/// Distinct slots a value lands in. Non-tuple sequences contribute each
/// member; missing or unlocated values go to the null slot when allowed.
fn locate_value(dim: &Dimension, domain: &mut Domain, value: &Value) -> SmallVec<[Slot; 4]> {
    let mut out = SmallVec::new();
    let members: Vec<&Value> = match value {
        Value::Array(items) if !dim.is_tuple() && !items.is_empty() => items.iter().collect(),
        other => vec![other],
    };
    for member in members {
        let located = if member.is_missing() {
            None
        } else {
            domain.locate_or_learn(member)
        };
        let slot = match located {
            Some(idx) => Slot::Part(idx),
            None if dim.allow_nulls => Slot::Null,
            None => continue,
        };
        if !out.contains(&slot) {
            out.push(slot);
        }
    }
    out
}

struct Grid<'q> {
    query: &'q Query,
    groups: Vec<DimGroup>,
    domains: Vec<Domain>,
    index: FxHashMap<CellKey, usize>,
    cells: Vec<Cell>,
}

impl<'q> Grid<'q> {
    fn new(query: &'q Query) -> Self {
        let mut grid = Self {
            query,
            groups: dim_groups(&query.dimensions),
            domains: query.dimensions.iter().map(|d| d.domain.clone()).collect(),
            index: FxHashMap::default(),
            cells: Vec::new(),
        };
        if query.grouping == Grouping::Total {
            grid.cell(CellKey::new());
        }
        grid
    }

    fn fresh_accumulators(&self) -> Vec<Box<dyn Accumulator>> {
        self.query
            .select
            .iter()
            .map(|s| s.aggregate.unwrap_or(crate::query::aggregate::AggregateKind::None).accumulator())
            .collect()
    }

    fn cell(&mut self, key: CellKey) -> &mut Cell {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.cells.len();
                let accs = self.fresh_accumulators();
                self.cells.push(Cell { rows: 0, accs });
                self.index.insert(key, idx);
                idx
            }
        };
        &mut self.cells[idx]
    }

    fn add(&mut self, row: &Row<'_>) -> Result<()> {
        let values = self
            .query
            .select
            .iter()
            .map(|s| s.value.eval(row))
            .collect::<Result<Vec<_>>>()?;
        let width = self.query.dimensions.len();
        let mut keys: Vec<CellKey> = vec![smallvec![Slot::Null; width]];
        for group in 0..self.groups.len() {
            let assignments = self.locate_group(group, row)?;
            if assignments.is_empty() {
                return Ok(());
            }
            let mut next = Vec::with_capacity(keys.len() * assignments.len());
            for key in &keys {
                for assignment in &assignments {
                    let mut key = key.clone();
                    for &(dim, slot) in assignment {
                        key[dim] = slot;
                    }
                    next.push(key);
                }
            }
            keys = next;
        }
        for key in keys {
            let cell = self.cell(key);
            cell.rows += 1;
            for (acc, value) in cell.accs.iter_mut().zip(&values) {
                acc.add(value);
            }
        }
        Ok(())
    }

    fn locate_group(&mut self, group: usize, row: &Row<'_>) -> Result<Vec<Assignment>> {
        let dimensions = &self.query.dimensions;
        match &self.groups[group] {
            DimGroup::Single(idx) => {
                let value = dimensions[*idx].value.eval(row)?;
                let slots = locate_value(&dimensions[*idx], &mut self.domains[*idx], &value);
                Ok(slots.into_iter().map(|slot| smallvec![(*idx, slot)]).collect())
            }
            DimGroup::Expanded { expansion, dims } => {
                let base = row.at(expansion.level).unwrap_or(&NULL);
                let mut elements = Vec::new();
                elements_of(lookup(base, &expansion.parts), &mut elements);
                if elements.is_empty() {
                    if dims.iter().all(|&i| dimensions[i].allow_nulls) {
                        return Ok(vec![dims.iter().map(|&i| (i, Slot::Null)).collect()]);
                    }
                    return Ok(Vec::new());
                }
                let level = self.query.depth() + 1;
                let mut out: Vec<Assignment> = Vec::new();
                for element in elements {
                    let ctx = ElementRow {
                        row,
                        level,
                        element,
                    };
                    let mut partial: Vec<Assignment> = vec![Assignment::new()];
                    for &i in dims {
                        let value = dimensions[i].value.eval(&ctx)?;
                        let slots = locate_value(&dimensions[i], &mut self.domains[i], &value);
                        let mut next = Vec::with_capacity(partial.len() * slots.len());
                        for assignment in &partial {
                            for &slot in &slots {
                                let mut extended = assignment.clone();
                                extended.push((i, slot));
                                next.push(extended);
                            }
                        }
                        partial = next;
                    }
                    for assignment in partial {
                        if !out.contains(&assignment) {
                            out.push(assignment);
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn axes(&self) -> Vec<Axis> {
        self.query
            .dimensions
            .iter()
            .zip(&self.domains)
            .map(|(dim, domain)| Axis {
                name: dim.name.clone(),
                allow_nulls: dim.allow_nulls,
                domain: domain.clone(),
            })
            .collect()
    }

    /// Every cell key in canonical order: first axis slowest, null partition last.
    fn canonical_keys(axes: &[Axis]) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = vec![CellKey::new()];
        for axis in axes {
            let mut slots: Vec<Slot> = (0..axis.domain.len()).map(Slot::Part).collect();
            if axis.allow_nulls {
                slots.push(Slot::Null);
            }
            let mut next = Vec::with_capacity(keys.len() * slots.len());
            for key in &keys {
                for &slot in &slots {
                    let mut key = key.clone();
                    key.push(slot);
                    next.push(key);
                }
            }
            keys = next;
        }
        keys
    }

    fn finish_cell(&mut self, key: &CellKey) -> (usize, Vec<Value>) {
        let (rows, raw) = match self.index.get(key) {
            Some(&idx) => {
                let cell = &mut self.cells[idx];
                (cell.rows, cell.accs.iter_mut().map(|acc| acc.finish()).collect::<Vec<_>>())
            }
            None => (
                0,
                self.fresh_accumulators()
                    .iter_mut()
                    .map(|acc| acc.finish())
                    .collect(),
            ),
        };
        let values = raw
            .into_iter()
            .zip(&self.query.select)
            .map(|(value, column)| with_default(value, column))
            .collect();
        (rows, values)
    }

    fn coordinates(axes: &[Axis], key: &CellKey) -> Vec<Value> {
        axes.iter()
            .zip(key.iter())
            .map(|(axis, slot)| match slot {
                Slot::Part(idx) => axis.domain.partition_value(*idx),
                Slot::Null => Value::Null,
            })
            .collect()
    }
}

fn aggregate(
    query: &Query,
    stream: DocumentStream,
    cancel: Option<&CancelToken>,
    stats: &mut ExecStats,
) -> Result<Output> {
    let mut grid = Grid::new(query);
    let aggregate_timer = profile_timer();
    for_each_row(query, stream, stats, |row| {
        grid.add(row)?;
        Ok(true)
    })?;
    record_profile_timer(QueryProfileKind::Aggregate, aggregate_timer);
    check_cancel(cancel)?;
    stats.cells = grid.cells.len();

    let axes = grid.axes();
    if query.grouping == Grouping::Total {
        let (_, values) = grid.finish_cell(&CellKey::new());
        return Ok(Output {
            rows: vec![values],
            ..Output::default()
        });
    }

    if query.format == Format::Cube {
        let cells = Grid::canonical_keys(&axes)
            .iter()
            .map(|key| grid.finish_cell(key).1)
            .collect();
        return Ok(Output {
            axes,
            cells,
            ..Output::default()
        });
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    match query.grouping {
        Grouping::GroupBy => {
            let mut keys: Vec<CellKey> = grid
                .index
                .iter()
                .filter(|(_, &idx)| grid.cells[idx].rows > 0)
                .map(|(key, _)| key.clone())
                .collect();
            keys.sort_by(|a, b| {
                let (ca, cb) = (Grid::coordinates(&axes, a), Grid::coordinates(&axes, b));
                ca.iter()
                    .zip(&cb)
                    .map(|(x, y)| compare(x, y))
                    .find(|ord| *ord != CmpOrdering::Equal)
                    .unwrap_or(CmpOrdering::Equal)
            });
            for key in keys {
                let (_, values) = grid.finish_cell(&key);
                let mut row = Grid::coordinates(&axes, &key);
                row.extend(values);
                rows.push(row);
            }
        }
        _ => {
            for key in Grid::canonical_keys(&axes) {
                let (count, values) = grid.finish_cell(&key);
                if count == 0 && key.contains(&Slot::Null) {
                    continue;
                }
                let mut row = Grid::coordinates(&axes, &key);
                row.extend(values);
                rows.push(row);
            }
        }
    }

    check_cancel(cancel)?;
    if !query.sort.is_empty() {
        let sort_timer = profile_timer();
        let header = query.header();
        let mut keyed = rows
            .into_iter()
            .map(|row| {
                let record = record_of(&header, &row);
                let keys = query
                    .sort
                    .iter()
                    .map(|key| key.value.eval(&RecordContext(&record)))
                    .collect::<Result<Vec<_>>>()?;
                Ok((row, keys))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| compare_keys(query, &a.1, &b.1));
        rows = keyed.into_iter().map(|(row, _)| row).collect();
        record_profile_timer(QueryProfileKind::Sort, sort_timer);
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Ok(Output {
        axes,
        rows,
        ..Output::default()
    })
}
