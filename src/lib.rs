//! jx: a JSON document query engine.
//!
//! Documents are stored per table, their fields accrete into a schema, and
//! a JSON query language selects, filters, groups and aggregates them. A
//! query names a table or a nested path inside it; each element at that path
//! becomes a row. Results come back as `list`, `table`, `cube` or `value`.
//!
//! ```
//! use jx::Database;
//! use serde_json::json;
//!
//! let db = Database::in_memory();
//! db.insert("t", vec![json!({"a": "x"}), json!({"a": "x"}), json!({"a": "y"})])?;
//! let out = db.query(&json!({"from": "t", "edges": ["a"]}))?;
//! assert_eq!(out.to_json(), json!([{"a": "x", "count": 2}, {"a": "y", "count": 1}]));
//! # Ok::<(), jx::JxError>(())
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod db;
pub mod error;
pub mod expr;
pub mod query;
pub mod schema;
pub mod storage;
pub mod value;

pub use db::{Config, Database, InsertReceipt, UpdateReceipt};
pub use error::{ErrorKind, JxError, Result};
pub use query::{CancelToken, Format, QueryBuilder, QueryResult};
pub use value::Value;
