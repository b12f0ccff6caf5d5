//! Result shaper: renders executor output as `list`, `table`, `cube` or `value`.
//!
//! Rows arrive aligned with [`Query::header`] (dimension coordinates first,
//! then select values). Cube output of grouped queries arrives as a dense
//! grid of cells in row-major canonical order instead.

use crate::error::{JxError, Result};
use crate::query::ast::{Format, Grouping, Query};
use crate::query::domain::Domain;
use crate::value::path::{merge_path, set_path, split_field};
use crate::value::{Object, Value};

/// One cube axis after execution, with its learned partitions.
#[derive(Clone, Debug)]
pub(crate) struct Axis {
    pub name: String,
    pub allow_nulls: bool,
    pub domain: Domain,
}

impl Axis {
    /// Cells along the axis, including the null partition.
    pub fn len(&self) -> usize {
        self.domain.len() + usize::from(self.allow_nulls)
    }
}

/// Flat executor output.
#[derive(Debug, Default)]
pub(crate) struct Output {
    /// Axes of grouped queries.
    pub axes: Vec<Axis>,
    /// Header-aligned rows.
    pub rows: Vec<Vec<Value>>,
    /// Dense cube cells (select values only) for grouped cube output.
    pub cells: Vec<Vec<Value>>,
}

/// Renders `output` in the query's format.
pub(crate) fn shape(query: &Query, output: Output) -> Result<Value> {
    match query.format {
        Format::List => Ok(shape_list(query, output)),
        Format::Table => Ok(shape_table(query, output)),
        Format::Value => shape_value(query, output),
        Format::Cube => Ok(shape_cube(query, output)),
    }
}

/// Builds a record from header names and aligned values; nulls are omitted.
pub(crate) fn record_of(header: &[String], row: &[Value]) -> Value {
    let mut record = Value::Object(Object::new());
    for (name, value) in header.iter().zip(row) {
        if matches!(value, Value::Null) {
            continue;
        }
        let parts = split_field(name);
        if parts.is_empty() {
            merge_path(&mut record, &parts, value.clone());
        } else {
            set_path(&mut record, &parts, value.clone());
        }
    }
    record
}

fn shape_list(query: &Query, output: Output) -> Value {
    if query.bare_values {
        return Value::Array(
            output
                .rows
                .into_iter()
                .map(|row| row.into_iter().next().unwrap_or_default())
                .collect(),
        );
    }
    let header = query.header();
    Value::Array(output.rows.iter().map(|row| record_of(&header, row)).collect())
}

fn shape_table(query: &Query, output: Output) -> Value {
    let mut out = Object::new();
    out.insert(
        "header".into(),
        Value::Array(query.header().into_iter().map(Value::String).collect()),
    );
    out.insert(
        "data".into(),
        Value::Array(output.rows.into_iter().map(Value::Array).collect()),
    );
    Value::Object(out)
}

fn shape_value(query: &Query, output: Output) -> Result<Value> {
    if query.grouping != Grouping::Total {
        return Err(JxError::invalid_query("format value requires an aggregate"));
    }
    let row = output.rows.into_iter().next().unwrap_or_default();
    if query.select.len() == 1 {
        return Ok(row.into_iter().next().unwrap_or_default());
    }
    let names: Vec<String> = query.select.iter().map(|s| s.name.clone()).collect();
    Ok(record_of(&names, &row))
}

fn shape_cube(query: &Query, output: Output) -> Value {
    let mut out = Object::new();
    let mut data = Object::new();
    match query.grouping {
        Grouping::Rows => {
            let count = output.rows.len();
            let mut edge = Object::new();
            edge.insert("name".into(), Value::from("rownum"));
            edge.insert("domain".into(), Domain::Rownum { count }.describe());
            out.insert("edges".into(), Value::Array(vec![Value::Object(edge)]));
            for (idx, column) in query.select.iter().enumerate() {
                let values = output
                    .rows
                    .iter()
                    .map(|row| row.get(idx).cloned().unwrap_or_default())
                    .collect();
                data.insert(column.name.clone(), Value::Array(values));
            }
        }
        Grouping::Total => {
            out.insert("edges".into(), Value::Array(Vec::new()));
            let row = output.rows.into_iter().next().unwrap_or_default();
            for (column, value) in query.select.iter().zip(row) {
                data.insert(column.name.clone(), value);
            }
        }
        Grouping::Edges | Grouping::GroupBy => {
            let edges = output
                .axes
                .iter()
                .map(|axis| {
                    let mut edge = Object::new();
                    edge.insert("name".into(), Value::from(axis.name.as_str()));
                    edge.insert("allowNulls".into(), Value::Bool(axis.allow_nulls));
                    edge.insert("domain".into(), axis.domain.describe());
                    Value::Object(edge)
                })
                .collect();
            out.insert("edges".into(), Value::Array(edges));
            let lens: Vec<usize> = output.axes.iter().map(Axis::len).collect();
            for (idx, column) in query.select.iter().enumerate() {
                let mut offset = 0;
                let grid = nest(&lens, &output.cells, idx, &mut offset);
                data.insert(column.name.clone(), grid);
            }
        }
    }
    out.insert("data".into(), Value::Object(data));
    Value::Object(out)
}

/// Folds row-major `cells` into nested arrays with the given axis lengths.
fn nest(lens: &[usize], cells: &[Vec<Value>], select: usize, offset: &mut usize) -> Value {
    match lens.split_first() {
        None => {
            let value = cells
                .get(*offset)
                .and_then(|cell| cell.get(select))
                .cloned()
                .unwrap_or_default();
            *offset += 1;
            value
        }
        Some((&len, rest)) => Value::Array(
            (0..len)
                .map(|_| nest(rest, cells, select, offset))
                .collect(),
        ),
    }
}
