#![allow(missing_docs)]

use jx::{Database, ErrorKind, Format};
use serde_json::{json, Value};

fn fixture() -> Database {
    let db = Database::in_memory();
    db.insert(
        "t",
        vec![
            json!({"_id": "1", "a": "b", "v": 2}),
            json!({"_id": "2", "v": 3}),
            json!({"_id": "3", "a": "c", "v": 7}),
            json!({"_id": "4", "a": "b"}),
            json!({"_id": "5", "a": "c", "v": 11}),
            json!({"_id": "6", "a": "c", "v": 13}),
        ],
    )
    .expect("insert");
    db
}

fn run(db: &Database, query: Value) -> Value {
    db.query(&query).expect("query").to_json()
}

#[test]
fn dot_select_returns_whole_documents() {
    let db = fixture();
    let out = run(&db, json!({"from": "t", "limit": 2}));
    assert_eq!(
        out,
        json!([{"_id": "1", "a": "b", "v": 2}, {"_id": "2", "v": 3}])
    );
}

#[test]
fn table_keeps_nulls_in_place() {
    let db = fixture();
    let out = run(
        &db,
        json!({"from": "t", "select": ["a", "v"], "format": "table", "limit": 2}),
    );
    assert_eq!(
        out,
        json!({"header": ["a", "v"], "data": [["b", 2], [null, 3]]})
    );
}

#[test]
fn set_query_cube_has_rownum_edge() {
    let db = fixture();
    let result = db
        .query(&json!({"from": "t", "select": ["a", "v"], "format": "cube", "limit": 3}))
        .expect("query");
    assert_eq!(result.format, Format::Cube);
    let out = result.to_json();
    assert_eq!(out["edges"][0]["name"], json!("rownum"));
    assert_eq!(out["data"]["a"], json!(["b", null, "c"]));
    assert_eq!(out["data"]["v"], json!([2, 3, 7]));
}

#[test]
fn total_shapes() {
    let db = fixture();
    let out = run(
        &db,
        json!({"from": "t", "select": {"value": "v", "aggregate": "sum"}, "format": "value"}),
    );
    assert_eq!(out, json!(36));

    let out = run(
        &db,
        json!({"from": "t", "select": [{"aggregate": "count"}, {"value": "v", "aggregate": "max"}], "format": "value"}),
    );
    assert_eq!(out, json!({"count": 6, "v": 13}));

    let out = run(&db, json!({"from": "t", "select": {"aggregate": "count"}, "format": "cube"}));
    assert_eq!(out, json!({"edges": [], "data": {"count": 6}}));

    let out = run(&db, json!({"from": "t", "select": {"aggregate": "count"}}));
    assert_eq!(out, json!([{"count": 6}]));
}

#[test]
fn value_format_needs_an_aggregate() {
    let db = fixture();
    let err = db
        .query(&json!({"from": "t", "select": "v", "format": "value"}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}

#[test]
fn edges_sorted_by_aggregate() {
    let db = fixture();
    let out = run(&db, json!({"from": "t", "edges": ["a"], "sort": {"count": "desc"}}));
    assert_eq!(
        out,
        json!([{"a": "c", "count": 3}, {"a": "b", "count": 2}, {"count": 1}])
    );
}

#[test]
fn groupby_orders_by_partition_and_applies_limit() {
    let db = fixture();
    let out = run(&db, json!({"from": "t", "groupby": ["a"]}));
    assert_eq!(
        out,
        json!([{"a": "b", "count": 2}, {"a": "c", "count": 3}, {"count": 1}])
    );
    let out = run(&db, json!({"from": "t", "groupby": ["a"], "limit": 1}));
    assert_eq!(out, json!([{"a": "b", "count": 2}]));
}

#[test]
fn groupby_cube_is_dense() {
    let db = fixture();
    let out = run(&db, json!({"from": "t", "groupby": ["a"], "format": "cube"}));
    assert_eq!(out["edges"][0]["domain"]["partitions"], json!(["b", "c"]));
    assert_eq!(out["data"]["count"], json!([2, 3, 1]));
}

#[test]
fn empty_partitions_take_the_select_default() {
    let db = fixture();
    let out = run(
        &db,
        json!({
            "from": "t",
            "edges": [{"value": "a", "domain": {"type": "set", "partitions": ["b", "c", "d"]}}],
            "select": {"value": "v", "aggregate": "max", "default": 0},
        }),
    );
    assert_eq!(
        out,
        json!([{"a": "b", "v": 2}, {"a": "c", "v": 13}, {"a": "d", "v": 0}, {"v": 3}])
    );
}

#[test]
fn disallowing_nulls_drops_unmatched_rows() {
    let db = fixture();
    let out = run(
        &db,
        json!({"from": "t", "edges": [{"value": "a", "allowNulls": false}], "format": "cube"}),
    );
    assert_eq!(out["edges"][0]["allowNulls"], json!(false));
    assert_eq!(out["data"]["count"], json!([2, 3]));
}

#[test]
fn cube_sort_may_not_reorder_partitions() {
    let db = fixture();
    let err = db
        .query(&json!({"from": "t", "edges": ["a"], "sort": {"count": "desc"}, "format": "cube"}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert!(err.to_string().contains("Can not sort a cube"));
}

#[test]
fn inline_documents_query_like_a_table() {
    let db = Database::in_memory();
    let out = run(
        &db,
        json!({
            "from": [{"k": "x", "n": 1}, {"k": "y", "n": 2}, {"k": "x", "n": 3}],
            "edges": ["k"],
            "select": {"value": "n", "aggregate": "sum"},
        }),
    );
    assert_eq!(out, json!([{"k": "x", "n": 4}, {"k": "y", "n": 2}]));
}

#[test]
fn oversized_range_domain_is_rejected() {
    let db = fixture();
    let err = db
        .query(&json!({
            "from": "t",
            "edges": [{"value": "v", "domain": {"type": "range", "min": 0, "max": 1e30, "interval": 1}}],
        }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}

#[test]
fn select_and_edge_may_share_a_name() {
    let db = fixture();
    let out = run(
        &db,
        json!({
            "from": "t",
            "edges": [{"value": "v", "domain": {"type": "range", "min": 0, "max": 10, "interval": 5}}],
            "select": {"value": "v", "aggregate": "sum"},
            "format": "cube",
        }),
    );
    assert_eq!(out["edges"][0]["name"], json!("v"));
    assert_eq!(out["data"]["v"], json!([5, 7, 24]));
}
