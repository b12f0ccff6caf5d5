#![allow(missing_docs)]

use std::sync::Arc;

use jx::storage::{CounterMetrics, MemoryStore};
use jx::{CancelToken, Config, Database, ErrorKind, QueryBuilder};
use serde_json::json;

fn people() -> Database {
    let db = Database::in_memory();
    db.insert(
        "people",
        vec![
            json!({"_id": "p1", "name": "ann", "age": 31, "city": "oslo"}),
            json!({"_id": "p2", "name": "bob", "age": 17, "city": "rome"}),
            json!({"_id": "p3", "name": "cyd", "age": 45}),
        ],
    )
    .expect("insert");
    db
}

fn column_query() -> serde_json::Value {
    json!({
        "from": "meta.columns",
        "select": ["name", "type"],
        "where": {"eq": {"table": "people"}},
        "sort": "name",
    })
}

#[test]
fn meta_columns_lists_the_schema() {
    let db = people();
    let out = db.query(&column_query()).expect("query").to_json();
    assert_eq!(
        out,
        json!([
            {"name": "_id", "type": "string"},
            {"name": "age", "type": "integer"},
            {"name": "city", "type": "string"},
            {"name": "name", "type": "string"},
        ])
    );
}

#[test]
fn meta_columns_is_idempotent() {
    let db = people();
    let first = db.query(&column_query()).expect("query");
    let second = db.query(&column_query()).expect("query");
    assert_eq!(first, second);
}

#[test]
fn schema_widens_with_new_fields() {
    let db = people();
    db.insert("people", vec![json!({"name": "dee", "tags": ["x", "y"]})])
        .expect("insert");
    let names: Vec<String> = db.schema("people").into_iter().map(|c| c.name).collect();
    assert!(names.contains(&"tags".to_string()));
    assert!(names.contains(&"city".to_string()));
}

#[test]
fn update_computes_new_fields_per_document() {
    let db = people();
    let receipt = db
        .update(
            "people",
            &json!({"set": {"next_age": {"add": ["age", 1]}}, "where": {"gt": {"age": 20}}}),
        )
        .expect("update");
    assert_eq!(receipt.updated, 2);
    let out = db
        .query(&json!({"from": "people", "select": ["name", "next_age"], "where": {"exists": "next_age"}}))
        .expect("query")
        .to_json();
    assert_eq!(
        out,
        json!([{"name": "ann", "next_age": 32}, {"name": "cyd", "next_age": 46}])
    );
}

#[test]
fn update_with_no_matches_writes_nothing() {
    let metrics = Arc::new(CounterMetrics::default());
    let db = Database::with_storage(
        Arc::new(MemoryStore::with_metrics(metrics.clone())),
        Config::default(),
    );
    db.insert("t", vec![json!({"v": 1})]).expect("insert");
    let receipt = db
        .update("t", &json!({"set": {"w": 2}, "where": {"eq": {"v": 5}}}))
        .expect("update");
    assert_eq!(receipt.updated, 0);
    assert_eq!(
        metrics
            .documents_written
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn update_rejects_empty_commands() {
    let db = people();
    let err = db.update("people", &json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}

#[test]
fn cancellation_discards_partial_results() {
    let db = people();
    let token = CancelToken::new();
    assert!(db.query_with_cancel(&json!({"from": "people"}), &token).is_ok());
    token.cancel();
    let err = db
        .query_with_cancel(&json!({"from": "people", "edges": ["city"]}), &token)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(token.is_cancelled());
}

#[test]
fn builder_documents_run_through_the_database() {
    let db = people();
    let query = QueryBuilder::from("people")
        .select("name")
        .where_field("age", |p| {
            p.gte(18);
        })
        .sort_desc("age")
        .build()
        .expect("build");
    let out = db.query(&query).expect("query").to_json();
    assert_eq!(out, json!([{"name": "cyd"}, {"name": "ann"}]));
}

#[test]
fn explain_redacts_literals_on_request() {
    let db = people();
    let explain = db
        .explain(&json!({"from": "people", "where": {"eq": {"city": "oslo"}}}))
        .expect("explain");
    let plain = explain.to_json(false).to_string();
    let redacted = explain.to_json(true).to_string();
    assert!(plain.contains("oslo"));
    assert!(!redacted.contains("oslo"));
}
