#![allow(missing_docs)]

use std::collections::BTreeSet;

use jx::{Database, ErrorKind};
use serde_json::{json, Value};

fn db_with(table: &str, docs: Value) -> Database {
    let db = Database::in_memory();
    let docs = docs.as_array().cloned().expect("array of documents");
    db.insert(table, docs).expect("insert");
    db
}

fn counts_fixture() -> Database {
    db_with(
        "t",
        json!([
            {"a": "b", "v": 2},
            {"v": 3},
            {"a": "c", "v": 7},
            {"a": "b"},
            {"a": "c", "v": 11},
            {"a": "c", "v": 13},
        ]),
    )
}

#[test]
fn count_over_two_keys_with_nulls() {
    let db = counts_fixture();
    let out = db
        .query(&json!({"from": "t", "edges": ["a"], "select": {"aggregate": "count"}}))
        .expect("query");
    assert_eq!(
        out.to_json(),
        json!([{"a": "b", "count": 2}, {"a": "c", "count": 3}, {"count": 1}])
    );
}

#[test]
fn percentile_given_as_string_is_rejected() {
    let docs: Vec<Value> = (0..30).map(|i| json!({"a": i})).collect();
    let db = db_with("t", Value::Array(docs));
    let err = db
        .query(&json!({
            "from": "t",
            "select": {"value": "a", "aggregate": "percentile", "percentile": "0.90"},
        }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert!(err.to_string().contains("Expecting percentile to be a float"));
}

#[test]
fn deep_edge_expansion_over_tuples() {
    let db = db_with(
        "t",
        json!([{"a": {"_b": [
            {"r": "a", "s": "aa"},
            {"s": "bb"},
            {"r": "bb", "s": "bb"},
            {"r": "c", "s": "cc"},
            {"s": "dd"},
            {"r": "e", "s": "ee"},
            {"r": "e", "s": "ee"},
            {"r": "f"},
            {"r": "f"},
            {"k": 1},
        ]}}]),
    );
    let out = db
        .query(&json!({
            "from": "t.a._b",
            "edges": [{"name": "v", "value": ["r", "s"]}],
            "format": "table",
        }))
        .expect("query");
    let out = out.to_json();
    assert_eq!(out["header"], json!(["v", "count"]));
    assert_eq!(
        out["data"],
        json!([
            [["a", "aa"], 1],
            [[null, "bb"], 1],
            [["bb", "bb"], 1],
            [["c", "cc"], 1],
            [[null, "dd"], 1],
            [["e", "ee"], 2],
            [["f", null], 2],
            [[null, null], 1],
        ])
    );
}

#[test]
fn range_domain_routes_out_of_range_to_null() {
    let docs: Vec<Value> = [0.5, 0.2, 0.4, 0.5, 0.7, 0.5, 0.8]
        .iter()
        .map(|r| json!({"r": r}))
        .collect();
    let db = db_with("t", Value::Array(docs));
    let out = db
        .query(&json!({
            "from": "t",
            "edges": [{"value": "r", "domain": {"type": "range", "min": 0, "max": 0.6, "interval": 0.1}}],
            "format": "cube",
        }))
        .expect("query");
    assert_eq!(out.to_json()["data"]["count"], json!([0, 0, 1, 0, 1, 3, 2]));
}

#[test]
fn between_extracts_text() {
    let db = db_with("t", json!([{"v": "/this/is/a/directory"}]));
    let out = db
        .query(&json!({
            "from": "t",
            "select": [
                {"name": "inner", "value": {"between": {"v": ["/this/", "/"]}}},
                {"name": "head", "value": {"between": {"v": [null, "/is"]}}},
            ],
        }))
        .expect("query");
    assert_eq!(out.to_json(), json!([{"inner": "is", "head": "/this"}]));
}

type Triple = (String, String, String);

fn from_list(rows: &Value) -> BTreeSet<Triple> {
    let mut out = BTreeSet::new();
    for row in rows.as_array().expect("list") {
        let key = row.get("a").cloned().unwrap_or(Value::Null).to_string();
        for name in ["count", "total"] {
            if let Some(value) = row.get(name) {
                out.insert((key.clone(), name.to_string(), value.to_string()));
            }
        }
    }
    out
}

fn from_table(table: &Value) -> BTreeSet<Triple> {
    let header: Vec<String> = table["header"]
        .as_array()
        .expect("header")
        .iter()
        .map(|h| h.as_str().expect("name").to_string())
        .collect();
    let mut out = BTreeSet::new();
    for row in table["data"].as_array().expect("data") {
        let row = row.as_array().expect("row");
        let key = row[0].to_string();
        for (name, value) in header.iter().zip(row).skip(1) {
            if !value.is_null() {
                out.insert((key.clone(), name.clone(), value.to_string()));
            }
        }
    }
    out
}

fn from_cube(cube: &Value) -> BTreeSet<Triple> {
    let edge = &cube["edges"][0];
    let mut keys: Vec<String> = edge["domain"]["partitions"]
        .as_array()
        .expect("partitions")
        .iter()
        .map(Value::to_string)
        .collect();
    if edge["allowNulls"] == json!(true) {
        keys.push(Value::Null.to_string());
    }
    let mut out = BTreeSet::new();
    for (name, cells) in cube["data"].as_object().expect("data") {
        for (key, value) in keys.iter().zip(cells.as_array().expect("cells")) {
            if !value.is_null() {
                out.insert((key.clone(), name.clone(), value.to_string()));
            }
        }
    }
    out
}

#[test]
fn list_table_and_cube_agree() {
    let db = counts_fixture();
    let query = |format: &str| {
        json!({
            "from": "t",
            "edges": ["a"],
            "select": [
                {"aggregate": "count"},
                {"name": "total", "value": "v", "aggregate": "sum"},
            ],
            "format": format,
        })
    };
    let list = db.query(&query("list")).expect("list").to_json();
    let table = db.query(&query("table")).expect("table").to_json();
    let cube = db.query(&query("cube")).expect("cube").to_json();

    let expected = from_list(&list);
    assert_eq!(expected.len(), 6);
    assert_eq!(from_table(&table), expected);
    assert_eq!(from_cube(&cube), expected);
    assert_eq!(cube["data"]["count"], json!([2, 3, 1]));
    assert_eq!(cube["data"]["total"], json!([2, 31, 3]));
}
