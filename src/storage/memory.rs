use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{
    default_metrics, DocumentIter, ScanRequest, StorageAdapter, StorageMetrics, StoredDocument,
    ID_FIELD,
};
use crate::error::{JxError, Result};
use crate::expr::RecordContext;
use crate::value::Value;

#[derive(Default)]
struct TableData {
    docs: Vec<Arc<Value>>,
    index: FxHashMap<String, usize>,
}

/// Tables held in process memory, in insertion order.
pub struct MemoryStore {
    tables: RwLock<FxHashMap<String, TableData>>,
    metrics: Arc<dyn StorageMetrics>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::with_metrics(default_metrics())
    }

    /// Empty store reporting to `metrics`.
    pub fn with_metrics(metrics: Arc<dyn StorageMetrics>) -> Self {
        Self {
            tables: RwLock::new(FxHashMap::default()),
            metrics,
        }
    }

    /// Number of documents in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.docs.len())
    }
}

impl StorageAdapter for MemoryStore {
    fn create(&self, table: &str) -> Result<()> {
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        if self.tables.write().remove(table).is_some() {
            self.metrics.table_dropped();
        }
        Ok(())
    }

    fn write(&self, table: &str, docs: Vec<Value>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut tables = self.tables.write();
        let data = tables.entry(table.to_string()).or_default();
        for doc in docs {
            let id = match doc.as_object().and_then(|o| o.get(ID_FIELD)) {
                Some(Value::String(id)) => id.clone(),
                _ => {
                    return Err(JxError::backend("document written to {table} has no string _id")
                        .with_param("table", table))
                }
            };
            let doc = Arc::new(doc);
            match data.index.get(&id) {
                Some(&pos) => data.docs[pos] = doc,
                None => {
                    data.index.insert(id.clone(), data.docs.len());
                    data.docs.push(doc);
                }
            }
            ids.push(id);
        }
        self.metrics.documents_written(ids.len() as u64);
        trace!(table, written = ids.len(), "memory.write");
        Ok(ids)
    }

    fn scan(&self, request: &ScanRequest<'_>) -> Result<DocumentIter> {
        let docs: Vec<Arc<Value>> = self
            .tables
            .read()
            .get(request.table)
            .map(|t| t.docs.clone())
            .unwrap_or_default();
        self.metrics.scan_started(request.predicate.is_some());
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            if let Some(predicate) = request.predicate {
                if !predicate.eval(&RecordContext(doc.as_ref()))?.truthy() {
                    continue;
                }
            }
            let id = match doc.as_object().and_then(|o| o.get(ID_FIELD)) {
                Some(Value::String(id)) => id.clone(),
                _ => String::new(),
            };
            out.push(Ok(StoredDocument { id, doc }));
        }
        self.metrics.documents_scanned(out.len() as u64);
        trace!(table = request.table, rows = out.len(), "memory.scan");
        Ok(Box::new(out.into_iter()))
    }

    fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::storage::CounterMetrics;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn doc(json: serde_json::Value) -> Value {
        Value::from_json(json)
    }

    #[test]
    fn write_upserts_by_id() {
        let store = MemoryStore::new();
        store
            .write("t", vec![doc(json!({"_id": "a", "v": 1})), doc(json!({"_id": "b", "v": 2}))])
            .expect("write");
        store
            .write("t", vec![doc(json!({"_id": "a", "v": 3}))])
            .expect("write");
        assert_eq!(store.len("t"), 2);
        let first = store
            .scan(&ScanRequest::table("t"))
            .expect("scan")
            .next()
            .expect("row")
            .expect("ok");
        assert_eq!(first.id, "a");
        assert_eq!(first.doc.to_json(), json!({"_id": "a", "v": 3}));
    }

    #[test]
    fn rejects_documents_without_id() {
        let store = MemoryStore::new();
        let err = store.write("t", vec![doc(json!({"v": 1}))]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BackendError);
    }

    #[test]
    fn applies_pushdown_predicate() {
        let metrics = Arc::new(CounterMetrics::default());
        let store = MemoryStore::with_metrics(metrics.clone());
        store
            .write(
                "t",
                (0..5).map(|i| doc(json!({"_id": format!("d{i}"), "v": i}))).collect(),
            )
            .expect("write");
        let predicate = parse(&json!({"gte": {"v": 3}})).expect("parse");
        let rows: Vec<_> = store
            .scan(&ScanRequest::table("t").with_predicate(&predicate))
            .expect("scan")
            .collect::<Result<_>>()
            .expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(metrics.filtered_scans.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.documents_scanned.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unknown_table_scans_empty_and_drop_is_idempotent() {
        let store = MemoryStore::new();
        assert_eq!(store.scan(&ScanRequest::table("nope")).expect("scan").count(), 0);
        store.create("t").expect("create");
        assert_eq!(store.tables(), vec!["t".to_string()]);
        store.drop_table("t").expect("drop");
        store.drop_table("t").expect("drop again");
        assert!(store.tables().is_empty());
    }
}
