//! Storage adapter seam and the bundled in-memory backend.
//!
//! The engine consumes storage through [`StorageAdapter`] only: a document
//! scan with an optional predicate, an upserting write, and table lifecycle
//! calls. Adapters may apply the scan predicate or ignore it; the executor
//! filters again either way.

use std::sync::Arc;

use crate::error::Result;
use crate::expr::Expr;
use crate::value::Value;

/// In-memory tables.
///
/// Reference adapter used by `Database::in_memory` and the test suite.
pub mod memory;

mod metrics;

pub use memory::MemoryStore;

/// Metrics collected by adapters.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};

/// Field every stored document is keyed by.
pub const ID_FIELD: &str = "_id";

/// A document handed out by a scan.
#[derive(Clone, Debug)]
pub struct StoredDocument {
    /// Document identifier.
    pub id: String,
    /// The document, shared with the store.
    pub doc: Arc<Value>,
}

/// Parameters of a table scan.
#[derive(Clone, Copy, Debug)]
pub struct ScanRequest<'a> {
    /// Table to read.
    pub table: &'a str,
    /// Document-level predicate the adapter may apply.
    pub predicate: Option<&'a Expr>,
    /// Fields the query reads, when known.
    pub columns: Option<&'a [String]>,
}

impl<'a> ScanRequest<'a> {
    /// Full scan of `table`.
    pub fn table(table: &'a str) -> Self {
        Self {
            table,
            predicate: None,
            columns: None,
        }
    }

    /// Adds a pushdown predicate.
    pub fn with_predicate(mut self, predicate: &'a Expr) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Iterator of scanned documents.
pub type DocumentIter = Box<dyn Iterator<Item = Result<StoredDocument>> + Send>;

/// Backend contract required by the engine.
pub trait StorageAdapter: Send + Sync {
    /// Creates `table` when it does not exist.
    fn create(&self, table: &str) -> Result<()>;

    /// Removes `table` and its documents.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Upserts documents by `_id` and returns their ids in order. Every
    /// document must already carry a string `_id`.
    fn write(&self, table: &str, docs: Vec<Value>) -> Result<Vec<String>>;

    /// Streams the documents of a table in insertion order. Unknown tables
    /// scan as empty.
    fn scan(&self, request: &ScanRequest<'_>) -> Result<DocumentIter>;

    /// Names of existing tables.
    fn tables(&self) -> Vec<String>;
}
