//! Database façade: storage, schema registry and query engine in one handle.

mod config;
mod update;


use std::sync::Arc;
use std::time::Instant;

use rand::RngCore;
use serde_json::Value as Json;
use tracing::{debug, info};

pub use config::Config;
pub use update::UpdateSpec;

use crate::error::{JxError, Result};
use crate::expr::RecordContext;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::{CancelToken, Executor, PlanExplain, Planner, PlannerOutput, QueryResult};
use crate::schema::{Column, SchemaRegistry};
use crate::storage::{MemoryStore, ScanRequest, StorageAdapter, ID_FIELD};
use crate::value::path::set_path;
use crate::value::Value;

/// Outcome of [`Database::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReceipt {
    /// Ids of the written documents, in input order.
    pub ids: Vec<String>,
}

/// Outcome of [`Database::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReceipt {
    /// Documents rewritten.
    pub updated: usize,
}

/// A queryable document store.
pub struct Database {
    storage: Arc<dyn StorageAdapter>,
    schema: SchemaRegistry,
    executor: Executor,
    config: Config,
}

impl Database {
    /// Empty database backed by [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::with_storage(Arc::new(MemoryStore::new()), Config::default())
    }

    /// Database over an existing adapter. The schema starts empty and grows
    /// as documents are inserted through this handle.
    pub fn with_storage(storage: Arc<dyn StorageAdapter>, config: Config) -> Self {
        Self {
            executor: Executor::new(Arc::clone(&storage)),
            storage,
            schema: SchemaRegistry::new(),
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plans a query document against the current schema.
    pub fn plan(&self, query: &Json) -> Result<PlannerOutput> {
        let timer = profile_timer();
        let planned = Planner::new(self.config.planner(), self.schema.snapshot()).plan(query);
        record_profile_timer(QueryProfileKind::Plan, timer);
        planned
    }

    /// Evaluates one query.
    pub fn query(&self, query: &Json) -> Result<QueryResult> {
        let planned = self.plan(query)?;
        self.executor.execute(&planned, None)
    }

    /// Evaluates one query, aborting once `cancel` is triggered.
    pub fn query_with_cancel(&self, query: &Json, cancel: &CancelToken) -> Result<QueryResult> {
        let planned = self.plan(query)?;
        self.executor.execute(&planned, Some(cancel))
    }

    /// Plan tree and hash for a query without running it.
    pub fn explain(&self, query: &Json) -> Result<PlanExplain> {
        Ok(self.plan(query)?.explain)
    }

    /// Ingests documents, generating `_id`s where absent, and widens the
    /// schema with their fields.
    pub fn insert<I>(&self, table: &str, docs: I) -> Result<InsertReceipt>
    where
        I: IntoIterator<Item = Json>,
    {
        let started = Instant::now();
        let docs = docs
            .into_iter()
            .map(|doc| self.prepare(doc))
            .collect::<Result<Vec<_>>>()?;
        self.schema.observe(table, &docs);
        let ids = self.storage.write(table, docs)?;
        info!(
            table,
            docs = ids.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "db.insert"
        );
        Ok(InsertReceipt { ids })
    }

    fn prepare(&self, doc: Json) -> Result<Value> {
        let mut doc = match Value::from_json(doc) {
            doc @ Value::Object(_) => doc,
            other => {
                return Err(JxError::invalid_query(
                    "Expecting documents to be objects, not {doc}",
                )
                .with_param("doc", other))
            }
        };
        let id = match doc.as_object().and_then(|o| o.get(ID_FIELD)) {
            Some(Value::String(_)) => return Ok(doc),
            Some(other) if !other.is_missing() => other.to_string(),
            _ => self.generate_id(),
        };
        set_path(&mut doc, &[ID_FIELD.to_string()], Value::String(id));
        Ok(doc)
    }

    fn generate_id(&self) -> String {
        let mut bytes = vec![0u8; self.config.id_bytes.max(1)];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Rewrites matching documents with `set` expressions evaluated against
    /// each original document, then removes `clear` fields.
    pub fn update(&self, table: &str, spec: &Json) -> Result<UpdateReceipt> {
        let update = UpdateSpec::from_json(spec)?.bind()?;
        let mut request = ScanRequest::table(table);
        if !update.filter.is_true() {
            request = request.with_predicate(&update.filter);
        }
        let mut rewritten = Vec::new();
        for doc in self.storage.scan(&request)? {
            let doc = doc?.doc;
            let ctx = RecordContext(doc.as_ref());
            if !update.filter.is_true() && !update.filter.eval(&ctx)?.truthy() {
                continue;
            }
            let values = update
                .set
                .iter()
                .map(|(parts, expr)| Ok((parts, expr.eval(&ctx)?)))
                .collect::<Result<Vec<_>>>()?;
            let mut next = doc.as_ref().clone();
            for (parts, value) in values {
                set_path(&mut next, parts, value);
            }
            for parts in &update.clear {
                set_path(&mut next, parts, Value::Null);
            }
            rewritten.push(next);
        }
        let updated = rewritten.len();
        if updated > 0 {
            self.schema.observe(table, &rewritten);
            self.storage.write(table, rewritten)?;
        }
        debug!(table, updated, "db.update");
        Ok(UpdateReceipt { updated })
    }

    /// Columns of `table`, as `meta.columns` reports them.
    pub fn schema(&self, table: &str) -> Vec<Column> {
        self.schema.snapshot().columns(table)
    }

    /// Creates an empty table.
    pub fn create_table(&self, table: &str) -> Result<()> {
        self.storage.create(table)?;
        self.schema.create_table(table);
        Ok(())
    }

    /// Drops a table with its documents and columns.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.storage.drop_table(table)?;
        self.schema.drop_table(table);
        info!(table, "db.drop_table");
        Ok(())
    }

    /// Names of stored tables.
    pub fn tables(&self) -> Vec<String> {
        self.storage.tables()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::in_memory()
    }
}
