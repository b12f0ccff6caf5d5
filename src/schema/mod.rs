//! Column metadata accreted from inserted documents.
//!
//! Every table owns a set of [`Column`]s keyed by `(name, class)`, so a field
//! observed both as a scalar and as a container keeps one column per role.
//! Snapshots are immutable and shared through [`Arc`]; writers build a new
//! snapshot under a single writer lock and swap it in, so readers never block
//! on ingestion.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::value::path::{join_field, starts_with_field};
use crate::value::{Object, Value};

/// Name of the document root in nested paths.
pub const ROOT: &str = ".";

/// Type recorded for a column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// `true`/`false`.
    Boolean,
    /// Whole numbers.
    Integer,
    /// Floating numbers and timestamps.
    Double,
    /// Text.
    String,
    /// Array of mappings; children carry this column in their nested path.
    Nested,
    /// Mapping-valued field.
    Object,
    /// Implicit existence marker for a nested path.
    Exists,
}

impl ColumnType {
    /// Lower-case name used in `meta.columns`.
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Nested => "nested",
            ColumnType::Object => "object",
            ColumnType::Exists => "exists",
        }
    }

    /// True for boolean, integer, double and string columns.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            ColumnType::Boolean | ColumnType::Integer | ColumnType::Double | ColumnType::String
        )
    }

    fn class(self) -> ColumnClass {
        match self {
            ColumnType::Nested => ColumnClass::Nested,
            ColumnType::Object => ColumnClass::Object,
            ColumnType::Exists => ColumnClass::Exists,
            _ => ColumnClass::Scalar,
        }
    }

    fn scalar_rank(self) -> u8 {
        match self {
            ColumnType::Boolean => 0,
            ColumnType::Integer => 1,
            ColumnType::Double => 2,
            _ => 3,
        }
    }

    /// Widens two scalar types: boolean < integer < double < string.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        if other.scalar_rank() > self.scalar_rank() {
            other
        } else {
            self
        }
    }

    fn of_scalar(value: &Value) -> Option<ColumnType> {
        match value {
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(f) if !f.is_nan() => Some(ColumnType::Double),
            Value::Timestamp(_) => Some(ColumnType::Double),
            Value::String(_) => Some(ColumnType::String),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
enum ColumnClass {
    Scalar,
    Object,
    Nested,
    Exists,
}

/// Descriptor for one column of a table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Column {
    /// Full dotted name from the document root.
    pub name: String,
    /// Observed type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Ancestor array fields, deepest first, ending at `.`.
    pub nested_path: Vec<String>,
    /// Owning table.
    pub table: String,
}

impl Column {
    /// A column is deep when it lives under at least one array.
    pub fn is_deep(&self) -> bool {
        self.nested_path.len() > 1
    }

    /// Innermost nested path of the column.
    pub fn nested(&self) -> &str {
        self.nested_path.first().map(String::as_str).unwrap_or(ROOT)
    }

    /// The row shape exposed by `meta.columns`.
    pub fn to_meta_row(&self) -> Value {
        let mut row = Object::new();
        row.insert("table".into(), Value::from(self.table.as_str()));
        row.insert("name".into(), Value::from(self.name.as_str()));
        row.insert("type".into(), Value::from(self.column_type.as_str()));
        row.insert(
            "nested_path".into(),
            Value::Array(self.nested_path.iter().map(|p| Value::from(p.as_str())).collect()),
        );
        Value::Object(row)
    }
}

/// Columns of a single table.
#[derive(Clone, Debug, Default)]
pub struct TableSchema {
    name: String,
    columns: BTreeMap<(String, ColumnClass), Column>,
}

impl TableSchema {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: BTreeMap::new(),
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All columns ordered by name.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// True when no document has contributed a column yet.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when any column is named `field` or lies beneath it.
    pub fn has_field(&self, field: &str) -> bool {
        self.columns
            .values()
            .any(|c| starts_with_field(&c.name, field))
    }

    /// Names of every nested (array-of-mapping) column.
    pub fn nested_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .values()
            .filter(|c| c.column_type == ColumnType::Nested)
            .map(|c| c.name.as_str())
    }

    /// Nested path of `field`: nested columns that contain it, deepest first,
    /// ending at the root.
    pub fn nested_path_of(&self, field: &str) -> Vec<String> {
        let mut chain: Vec<String> = self
            .nested_columns()
            .filter(|nested| starts_with_field(field, nested))
            .map(str::to_string)
            .collect();
        chain.sort_by_key(|p| std::cmp::Reverse(p.len()));
        chain.push(ROOT.to_string());
        chain
    }

    /// Columns readable from a row positioned at `path`: their innermost
    /// nested path is `path` or one of its ancestors.
    pub fn columns_along_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Column> + 'a {
        self.columns
            .values()
            .filter(move |c| starts_with_field(path, c.nested()))
    }

    /// Star expansion: columns named `name` or beneath it.
    pub fn widen(&self, name: &str) -> Vec<&Column> {
        self.columns
            .values()
            .filter(|c| starts_with_field(&c.name, name))
            .collect()
    }

    fn register(&mut self, name: &str, column_type: ColumnType, nested_path: &[String]) -> bool {
        let key = (name.to_string(), column_type.class());
        match self.columns.get_mut(&key) {
            Some(existing) => {
                let mut changed = false;
                if column_type.is_scalar() {
                    let widened = existing.column_type.widen(column_type);
                    if widened != existing.column_type {
                        existing.column_type = widened;
                        changed = true;
                    }
                }
                if nested_path.len() > existing.nested_path.len() {
                    existing.nested_path = nested_path.to_vec();
                    changed = true;
                }
                changed
            }
            None => {
                self.columns.insert(
                    key,
                    Column {
                        name: name.to_string(),
                        column_type,
                        nested_path: nested_path.to_vec(),
                        table: self.name.clone(),
                    },
                );
                true
            }
        }
    }

    /// Walks one document, registering every leaf and container.
    /// Returns true when any column was added or widened.
    fn observe(&mut self, doc: &Value) -> bool {
        let root = vec![ROOT.to_string()];
        match doc {
            Value::Object(map) => self.observe_object(map, ROOT, &root),
            _ => false,
        }
    }

    fn observe_object(&mut self, map: &Object, prefix: &str, nested: &[String]) -> bool {
        let mut changed = false;
        for (key, value) in map {
            let name = if prefix == ROOT {
                join_field(&[key])
            } else {
                format!("{prefix}.{}", join_field(&[key]))
            };
            changed |= self.observe_value(&name, value, nested);
        }
        changed
    }

    fn observe_value(&mut self, name: &str, value: &Value, nested: &[String]) -> bool {
        match value {
            Value::Null => false,
            Value::Object(map) => {
                let mut changed = self.register(name, ColumnType::Object, nested);
                changed |= self.observe_object(map, name, nested);
                changed
            }
            Value::Array(items) => {
                let mut flat = Vec::new();
                flatten(items, &mut flat);
                let mut changed = false;
                if flat.iter().any(|v| matches!(v, Value::Object(_))) {
                    let mut deeper = Vec::with_capacity(nested.len() + 1);
                    deeper.push(name.to_string());
                    deeper.extend_from_slice(nested);
                    changed |= self.register(name, ColumnType::Nested, &deeper);
                    changed |= self.register(name, ColumnType::Exists, &deeper);
                    for item in &flat {
                        if let Value::Object(map) = item {
                            changed |= self.observe_object(map, name, &deeper);
                        }
                    }
                }
                for item in &flat {
                    if let Some(column_type) = ColumnType::of_scalar(item) {
                        changed |= self.register(name, column_type, nested);
                    }
                }
                changed
            }
            scalar => match ColumnType::of_scalar(scalar) {
                Some(column_type) => self.register(name, column_type, nested),
                None => false,
            },
        }
    }
}

fn flatten<'a>(items: &'a [Value], out: &mut Vec<&'a Value>) {
    for item in items {
        match item {
            Value::Array(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}

/// Immutable view of every table's columns.
#[derive(Clone, Debug, Default)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSchema>,
    epoch: u64,
}

impl SchemaSnapshot {
    /// Builds a standalone snapshot for an ephemeral table.
    pub fn from_documents<'a>(table: &str, docs: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut schema = TableSchema::new(table);
        for doc in docs {
            schema.observe(doc);
        }
        let mut tables = BTreeMap::new();
        tables.insert(table.to_string(), schema);
        Self { tables, epoch: 0 }
    }

    /// Monotonic version, bumped on every published change.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Known table names.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// All columns of `table`, empty when unknown.
    pub fn columns(&self, table: &str) -> Vec<Column> {
        self.tables
            .get(table)
            .map(|t| t.columns().cloned().collect())
            .unwrap_or_default()
    }

    /// Columns of `table` readable from `path`.
    pub fn columns_along_path(&self, table: &str, path: &str) -> Vec<Column> {
        self.tables
            .get(table)
            .map(|t| t.columns_along_path(path).cloned().collect())
            .unwrap_or_default()
    }

    /// Columns of `table` named `name` or beneath it.
    pub fn widen(&self, table: &str, name: &str) -> Vec<Column> {
        self.tables
            .get(table)
            .map(|t| t.widen(name).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Splits a `from` target into a known table and the nested suffix.
    pub fn split_from<'a>(&self, from: &'a str) -> (&'a str, Option<&'a str>) {
        let mut best: Option<(&str, Option<&str>)> = None;
        for (idx, _) in from.match_indices('.') {
            let (head, rest) = (&from[..idx], &from[idx + 1..]);
            if self.tables.contains_key(head) {
                best = Some((head, Some(rest)));
            }
        }
        if self.tables.contains_key(from) {
            return (from, None);
        }
        best.unwrap_or_else(|| match from.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (from, None),
        })
    }

    /// Rows of the `meta.columns` virtual table.
    pub fn meta_rows(&self) -> Vec<Value> {
        self.tables
            .values()
            .flat_map(|t| t.columns())
            .map(Column::to_meta_row)
            .collect()
    }
}

/// Copy-on-write registry of table schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    current: RwLock<Arc<SchemaSnapshot>>,
    writer: Mutex<()>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; never blocks on writers for longer than a pointer swap.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Registers an empty table when missing.
    pub fn create_table(&self, table: &str) {
        self.mutate(|snapshot| {
            if snapshot.tables.contains_key(table) {
                false
            } else {
                snapshot.tables.insert(table.to_string(), TableSchema::new(table));
                true
            }
        });
    }

    /// Forgets every column of `table`.
    pub fn drop_table(&self, table: &str) {
        self.mutate(|snapshot| snapshot.tables.remove(table).is_some());
    }

    /// Accretes columns from `docs`. Returns true when the schema changed.
    pub fn observe<'a>(&self, table: &str, docs: impl IntoIterator<Item = &'a Value>) -> bool {
        self.mutate(|snapshot| {
            let schema = snapshot
                .tables
                .entry(table.to_string())
                .or_insert_with(|| TableSchema::new(table));
            let mut changed = false;
            for doc in docs {
                changed |= schema.observe(doc);
            }
            changed
        })
    }

    fn mutate(&self, apply: impl FnOnce(&mut SchemaSnapshot) -> bool) -> bool {
        let _writer = self.writer.lock();
        let mut next = SchemaSnapshot::clone(&self.current.read());
        if !apply(&mut next) {
            return false;
        }
        next.epoch += 1;
        debug!(epoch = next.epoch, tables = next.tables.len(), "schema.publish");
        *self.current.write() = Arc::new(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Value {
        Value::from_json(json)
    }

    fn find<'a>(columns: &'a [Column], name: &str, ty: ColumnType) -> Option<&'a Column> {
        columns
            .iter()
            .find(|c| c.name == name && c.column_type == ty)
    }

    #[test]
    fn nested_arrays_register_paths() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"a": {"_b": [{"r": "x", "s": 1}]}, "c": 2}))]);
        let columns = registry.snapshot().columns("t");
        let nested = find(&columns, "a._b", ColumnType::Nested).expect("nested column");
        assert_eq!(nested.nested_path, vec!["a._b", "."]);
        let leaf = find(&columns, "a._b.r", ColumnType::String).expect("leaf column");
        assert_eq!(leaf.nested_path, vec!["a._b", "."]);
        assert!(leaf.is_deep());
        assert!(find(&columns, "a._b", ColumnType::Exists).is_some());
        let shallow = find(&columns, "c", ColumnType::Integer).expect("shallow");
        assert!(!shallow.is_deep());
    }

    #[test]
    fn scalar_types_widen() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"v": 1})), &doc(json!({"v": 2.5}))]);
        let columns = registry.snapshot().columns("t");
        assert_eq!(
            find(&columns, "v", ColumnType::Double).map(|c| c.column_type),
            Some(ColumnType::Double)
        );
        assert!(find(&columns, "v", ColumnType::Integer).is_none());
    }

    #[test]
    fn scalar_and_object_coexist() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"a": 1})), &doc(json!({"a": {"b": "x"}}))]);
        let snapshot = registry.snapshot();
        let widened = snapshot.widen("t", "a");
        assert_eq!(widened.len(), 3);
    }

    #[test]
    fn arrays_of_scalars_stay_shallow() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"tags": ["x", "y"]}))]);
        let columns = registry.snapshot().columns("t");
        let tags = find(&columns, "tags", ColumnType::String).expect("tags");
        assert_eq!(tags.nested_path, vec!["."]);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"a": 1}))]);
        let before = registry.snapshot();
        registry.observe("t", [&doc(json!({"b": 1}))]);
        assert_eq!(before.columns("t").len(), 1);
        assert_eq!(registry.snapshot().columns("t").len(), 2);
        assert!(registry.snapshot().epoch() > before.epoch());
    }

    #[test]
    fn splits_from_on_known_tables() {
        let registry = SchemaRegistry::new();
        registry.create_table("t");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.split_from("t.a._b"), ("t", Some("a._b")));
        assert_eq!(snapshot.split_from("t"), ("t", None));
        assert_eq!(snapshot.split_from("other.x"), ("other", Some("x")));
    }

    #[test]
    fn nested_path_of_field() {
        let registry = SchemaRegistry::new();
        registry.observe("t", [&doc(json!({"a": [{"b": [{"c": 1}]}]}))]);
        let snapshot = registry.snapshot();
        let table = snapshot.table("t").expect("table");
        assert_eq!(table.nested_path_of("a.b.c"), vec!["a.b", "a", "."]);
    }
}
