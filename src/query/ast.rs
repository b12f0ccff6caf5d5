//! Planned form of a query.
//!
//! Produced by the planner from a surface document: every variable is bound
//! to a row level, every domain is materialised, and defaults are folded in.
//! The executor and shaper consume nothing else.

use std::fmt;

use crate::error::{JxError, Result};
use crate::expr::{Expr, Reader};
use crate::query::aggregate::AggregateKind;
use crate::query::domain::Domain;
use crate::value::Value;

/// Requested result shape.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Format {
    /// Array of records.
    #[default]
    List,
    /// Header plus positional rows.
    Table,
    /// Edge domains plus N-dimensional data arrays.
    Cube,
    /// A single scalar or record.
    Value,
}

impl Format {
    /// Parses a format name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "list" => Ok(Format::List),
            "table" => Ok(Format::Table),
            "cube" => Ok(Format::Cube),
            "value" => Ok(Format::Value),
            other => Err(JxError::invalid_query("Unknown format {format}").with_param("format", other)),
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Format::List => "list",
            Format::Table => "table",
            Format::Cube => "cube",
            Format::Value => "value",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How rows are combined before shaping.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Grouping {
    /// Set operation: one output row per source row.
    Rows,
    /// Aggregates over every row, no dimensions.
    Total,
    /// Aggregates per cell of the edge domains.
    Edges,
    /// Aggregates per non-empty group.
    GroupBy,
}

impl Grouping {
    /// True when selects are accumulated.
    pub fn is_aggregated(self) -> bool {
        !matches!(self, Grouping::Rows)
    }

    /// Name used in explain output.
    pub fn as_str(self) -> &'static str {
        match self {
            Grouping::Rows => "rows",
            Grouping::Total => "total",
            Grouping::Edges => "edges",
            Grouping::GroupBy => "groupby",
        }
    }
}

/// Where documents come from.
#[derive(Clone, Debug)]
pub enum Source {
    /// A stored table.
    Table(String),
    /// Documents supplied with the query or synthesised (`meta.columns`).
    Documents {
        /// Name used in logs and explain output.
        name: String,
        /// The documents.
        docs: Vec<Value>,
    },
}

impl Source {
    /// Table or pseudo-table name.
    pub fn name(&self) -> &str {
        match self {
            Source::Table(name) => name,
            Source::Documents { name, .. } => name,
        }
    }
}

/// One step of the query path.
#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    /// Full dotted path of the array this level iterates; `.` for the document.
    pub path: String,
    /// Path from the previous level down to the array.
    pub parts: Vec<String>,
}

/// Reads the elements a vector dimension expands over.
#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
    /// Level the array is read from.
    pub level: usize,
    /// Path from that level to the array.
    pub parts: Vec<String>,
    /// Full dotted path of the array.
    pub path: String,
}

/// One output column.
#[derive(Clone, Debug)]
pub struct SelectColumn {
    /// Output name, possibly dotted.
    pub name: String,
    /// Expression evaluated per row.
    pub value: Expr,
    /// Aggregate applied in grouped queries.
    pub aggregate: Option<AggregateKind>,
    /// Reported instead of a missing result.
    pub default: Option<Value>,
}

/// One `edges` or `groupby` entry.
#[derive(Clone, Debug)]
pub struct Dimension {
    /// Output name.
    pub name: String,
    /// Expression partitioned by `domain`.
    pub value: Expr,
    /// Partitioning.
    pub domain: Domain,
    /// Keep a partition for values the domain does not cover.
    pub allow_nulls: bool,
    /// Scalar unless a variable crosses an array below the query path.
    pub reader: Reader,
    /// Array the dimension is evaluated over, element by element.
    pub expansion: Option<Expansion>,
}

impl Dimension {
    /// Tuple-valued dimensions are located whole, never member by member.
    pub fn is_tuple(&self) -> bool {
        matches!(self.value, Expr::Tuple(_))
    }
}

/// One sort key.
#[derive(Clone, Debug)]
pub struct SortKey {
    /// Sort expression.
    pub value: Expr,
    /// Reverse the order.
    pub descending: bool,
}

/// Fully planned query.
#[derive(Clone, Debug)]
pub struct Query {
    /// Document source.
    pub source: Source,
    /// Query path, root first; `levels[0]` is the document.
    pub levels: Vec<Level>,
    /// Output columns in order.
    pub select: Vec<SelectColumn>,
    /// Emit bare values instead of records in list output.
    pub bare_values: bool,
    /// Conjuncts that only read the document, applied before expansion.
    pub document_filter: Expr,
    /// Conjuncts applied to each expanded row.
    pub row_filter: Expr,
    /// Dimensions in declaration order.
    pub dimensions: Vec<Dimension>,
    /// Aggregation mode.
    pub grouping: Grouping,
    /// Sort keys, most significant first.
    pub sort: Vec<SortKey>,
    /// Row limit after sorting, when one applies.
    pub limit: Option<usize>,
    /// Result shape.
    pub format: Format,
    /// Emit one null-element row for documents lacking the query array.
    pub synthesize_missing: bool,
}

impl Query {
    /// Depth of the query path; `0` queries whole documents.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Names of the output columns, dimensions first.
    pub fn header(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .map(|d| d.name.clone())
            .chain(self.select.iter().map(|s| s.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!(Format::parse("cube").expect("cube"), Format::Cube);
        assert_eq!(Format::default(), Format::List);
        let err = Format::parse("pivot").unwrap_err();
        assert!(err.to_string().contains("pivot"));
    }

    #[test]
    fn grouping_aggregation() {
        assert!(!Grouping::Rows.is_aggregated());
        assert!(Grouping::Total.is_aggregated());
        assert_eq!(Grouping::GroupBy.as_str(), "groupby");
    }
}
