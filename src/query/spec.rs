//! Surface query document as accepted on the wire.
//!
//! Every clause admits several spellings (a bare string, an object, or an
//! array of either). The types here capture those spellings with serde and
//! hand the planner one canonical form per clause.

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{JxError, Result};

/// A clause that may be written as a single item or as an array.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Array form.
    Many(Vec<T>),
    /// Single item.
    One(T),
}

impl<T> OneOrMany<T> {
    /// True for the single-item spelling.
    pub fn is_one(&self) -> bool {
        matches!(self, OneOrMany::One(_))
    }

    /// Items in declaration order.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Raw query document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Table name, nested path, `meta.columns`, or inline documents.
    #[serde(default)]
    pub from: Json,
    /// Output columns.
    #[serde(default)]
    pub select: Option<OneOrMany<SelectSpec>>,
    /// Row filter; `true` when absent.
    #[serde(default, rename = "where")]
    pub filter: Option<Json>,
    /// Dimensions whose every partition is reported.
    #[serde(default)]
    pub edges: Option<OneOrMany<DimensionSpec>>,
    /// Dimensions whose empty groups are omitted.
    #[serde(default)]
    pub groupby: Option<OneOrMany<DimensionSpec>>,
    /// Sort keys.
    #[serde(default)]
    pub sort: Option<OneOrMany<SortSpec>>,
    /// Maximum number of rows or learned partitions.
    #[serde(default)]
    pub limit: Option<Json>,
    /// Requested result shape.
    #[serde(default)]
    pub format: Option<String>,
}

impl QuerySpec {
    /// Reads a query document.
    pub fn from_json(json: &Json) -> Result<Self> {
        if !json.is_object() {
            return Err(JxError::invalid_query("Expecting a query object, not {query}")
                .with_param("query", json));
        }
        Ok(QuerySpec::deserialize(json)?)
    }

    /// Validated `limit`, uncapped.
    pub fn limit(&self) -> Result<Option<usize>> {
        match &self.limit {
            None | Some(Json::Null) => Ok(None),
            Some(limit) => limit
                .as_u64()
                .map(|l| Some(l as usize))
                .ok_or_else(|| {
                    JxError::invalid_query("Expecting limit to be a non-negative integer, not {limit}")
                        .with_param("limit", limit)
                }),
        }
    }

    /// Row filter, defaulting to `true`.
    pub fn filter(&self) -> Json {
        self.filter.clone().unwrap_or(Json::Bool(true))
    }
}

/// One `select` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SelectSpec {
    /// Field name, `"."`, `"*"` or `"foo.*"`.
    Name(String),
    /// Full form.
    Column(SelectColumnSpec),
}

impl SelectSpec {
    /// Object form of the entry.
    pub fn into_column(self) -> SelectColumnSpec {
        match self {
            SelectSpec::Name(name) => SelectColumnSpec {
                value: Some(Json::String(name)),
                ..SelectColumnSpec::default()
            },
            SelectSpec::Column(column) => column,
        }
    }
}

/// Object form of a `select` entry.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectColumnSpec {
    /// Output name.
    #[serde(default)]
    pub name: Option<String>,
    /// Expression to read.
    #[serde(default)]
    pub value: Option<Json>,
    /// Aggregate name.
    #[serde(default)]
    pub aggregate: Option<String>,
    /// Reported when the result is missing.
    #[serde(default)]
    pub default: Option<Json>,
    /// Fraction for the `percentile` aggregate.
    #[serde(default)]
    pub percentile: Option<Json>,
}

impl SelectColumnSpec {
    /// The value when it is a plain field name.
    pub fn value_name(&self) -> Option<&str> {
        self.value.as_ref().and_then(Json::as_str)
    }
}

/// One `edges` or `groupby` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DimensionSpec {
    /// Field name shorthand.
    Name(String),
    /// Full form.
    Dimension(DimensionObjectSpec),
}

impl DimensionSpec {
    /// Object form of the entry.
    pub fn into_object(self) -> DimensionObjectSpec {
        match self {
            DimensionSpec::Name(name) => DimensionObjectSpec {
                value: Some(Json::String(name)),
                ..DimensionObjectSpec::default()
            },
            DimensionSpec::Dimension(dim) => dim,
        }
    }
}

/// Object form of a dimension.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionObjectSpec {
    /// Output name.
    #[serde(default)]
    pub name: Option<String>,
    /// Expression partitioned by the domain.
    #[serde(default)]
    pub value: Option<Json>,
    /// Domain declaration; learned partitions when absent.
    #[serde(default)]
    pub domain: Option<Json>,
    /// Keep a partition for values the domain does not cover.
    #[serde(default)]
    pub allow_nulls: Option<bool>,
}

/// One `sort` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    /// Ascending by field.
    Name(String),
    /// `{value, sort}` form.
    Keyed {
        /// Sort expression.
        value: Json,
        /// Direction; ascending when absent.
        #[serde(default)]
        sort: Option<Json>,
    },
    /// `{"field": "desc"}` shorthand, possibly with several fields.
    Fields(serde_json::Map<String, Json>),
}

impl SortSpec {
    /// Expression and descending flag for every key in the entry.
    pub fn into_keys(self) -> Result<Vec<(Json, bool)>> {
        match self {
            SortSpec::Name(name) => Ok(vec![(Json::String(name), false)]),
            SortSpec::Keyed { value, sort } => {
                let descending = match sort {
                    Some(direction) => parse_direction(&direction)?,
                    None => false,
                };
                Ok(vec![(value, descending)])
            }
            SortSpec::Fields(fields) => fields
                .into_iter()
                .map(|(field, direction)| Ok((Json::String(field), parse_direction(&direction)?)))
                .collect(),
        }
    }
}

/// Parses `1`, `-1`, `"asc"` or `"desc"`; true means descending.
fn parse_direction(direction: &Json) -> Result<bool> {
    match direction {
        Json::Number(n) if n.as_i64() == Some(1) => Ok(false),
        Json::Number(n) if n.as_i64() == Some(-1) => Ok(true),
        Json::String(s) => match s.as_str() {
            "asc" | "ascending" => Ok(false),
            "desc" | "descending" => Ok(true),
            _ => Err(bad_direction(direction)),
        },
        _ => Err(bad_direction(direction)),
    }
}

fn bad_direction(direction: &Json) -> JxError {
    JxError::invalid_query("Expecting sort direction to be asc or desc, not {sort}")
        .with_param("sort", direction)
}
