#![allow(missing_docs)]

use jx::Database;
use serde_json::{json, Value};

fn orders() -> Database {
    let db = Database::in_memory();
    db.insert(
        "orders",
        vec![
            json!({"_id": "o1", "name": "o1", "items": [{"sku": "a", "qty": 2}, {"sku": "b", "qty": 1}]}),
            json!({"_id": "o2", "name": "o2", "items": [{"sku": "a", "qty": 5}]}),
            json!({"_id": "o3", "name": "o3", "items": []}),
        ],
    )
    .expect("insert");
    db
}

fn run(db: &Database, query: Value) -> Value {
    db.query(&query).expect("query").to_json()
}

#[test]
fn nested_path_yields_one_row_per_element() {
    let db = orders();
    let out = run(&db, json!({"from": "orders.items", "select": ["sku", "qty"]}));
    assert_eq!(
        out,
        json!([
            {"sku": "a", "qty": 2},
            {"sku": "b", "qty": 1},
            {"sku": "a", "qty": 5},
        ])
    );
}

#[test]
fn shallower_fields_resolve_against_the_document() {
    let db = orders();
    let out = run(&db, json!({"from": "orders.items", "select": ["name", "sku"]}));
    assert_eq!(
        out,
        json!([
            {"name": "o1", "sku": "a"},
            {"name": "o1", "sku": "b"},
            {"name": "o2", "sku": "a"},
        ])
    );
}

#[test]
fn star_expands_to_leaves_at_the_query_path() {
    let db = orders();
    let out = run(&db, json!({"from": "orders.items", "select": "*", "limit": 1}));
    assert_eq!(out, json!([{"qty": 2, "sku": "a"}]));
}

#[test]
fn document_without_elements_lands_in_null_cell() {
    let db = orders();
    let out = run(
        &db,
        json!({"from": "orders.items", "edges": ["sku"], "select": {"aggregate": "count"}}),
    );
    assert_eq!(
        out,
        json!([{"sku": "a", "count": 2}, {"sku": "b", "count": 1}, {"count": 1}])
    );
}

#[test]
fn row_filter_applies_to_synthetic_rows() {
    let db = orders();
    let out = run(
        &db,
        json!({
            "from": "orders.items",
            "groupby": ["sku"],
            "select": {"value": "qty", "aggregate": "sum"},
            "where": {"exists": "sku"},
        }),
    );
    assert_eq!(out, json!([{"sku": "a", "qty": 7}, {"sku": "b", "qty": 1}]));
}

#[test]
fn vector_edge_expands_each_element() {
    let db = orders();
    let out = run(&db, json!({"from": "orders", "edges": ["items.sku"]}));
    assert_eq!(
        out,
        json!([
            {"items": {"sku": "a"}, "count": 2},
            {"items": {"sku": "b"}, "count": 1},
            {"count": 1},
        ])
    );
}

#[test]
fn edges_on_the_same_path_form_joint_cells() {
    let db = Database::in_memory();
    db.insert("t", vec![json!({"a": [{"x": 1, "z": 2}, {"x": 3}]})])
        .expect("insert");
    let out = run(&db, json!({"from": "t", "edges": ["a.x", "a.z"]}));
    assert_eq!(
        out,
        json!([
            {"a": {"x": 1, "z": 2}, "count": 1},
            {"a": {"x": 3, "z": 2}, "count": 0},
            {"a": {"x": 3}, "count": 1},
        ])
    );
}

#[test]
fn edges_on_different_paths_keep_independent_nulls() {
    let db = Database::in_memory();
    db.insert(
        "t",
        vec![
            json!({"a": [{"x": 1}], "b": [{"y": "q"}]}),
            json!({"a": [{"x": 1}], "b": []}),
        ],
    )
    .expect("insert");
    let out = run(&db, json!({"from": "t", "edges": ["a.x", "b.y"]}));
    assert_eq!(
        out,
        json!([
            {"a": {"x": 1}, "b": {"y": "q"}, "count": 1},
            {"a": {"x": 1}, "count": 1},
        ])
    );
}

#[test]
fn aggregating_deeper_than_the_query_path_is_rejected() {
    let db = orders();
    let err = db
        .query(&json!({"from": "orders", "select": {"value": "items.qty", "aggregate": "sum"}}))
        .unwrap_err();
    assert!(err.to_string().contains("Can not aggregate"));
}
