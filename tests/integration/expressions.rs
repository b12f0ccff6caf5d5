#![allow(missing_docs)]

use jx::{Database, ErrorKind};
use serde_json::{json, Value};

fn people() -> Database {
    let db = Database::in_memory();
    db.insert(
        "people",
        vec![
            json!({"_id": "1", "name": "alice", "age": 31, "joined": "2021-03-04"}),
            json!({"_id": "2", "name": "albert", "age": 17}),
            json!({"_id": "3", "name": "bea", "joined": "2019-12-31"}),
            json!({"_id": "4", "name": "carl", "age": 45, "joined": "2022-06-01"}),
        ],
    )
    .expect("insert");
    db
}

fn names(db: &Database, filter: Value) -> Value {
    db.query(&json!({"from": "people", "select": "name", "where": filter}))
        .expect("query")
        .to_json()
}

#[test]
fn null_predicates_reject_rows() {
    let db = people();
    assert_eq!(
        names(&db, json!({"gt": {"age": 18}})),
        json!([{"name": "alice"}, {"name": "carl"}])
    );
    assert_eq!(
        names(&db, json!({"not": {"gt": {"age": 18}}})),
        json!([{"name": "albert"}])
    );
    assert_eq!(
        names(&db, json!({"or": [{"lt": {"age": 20}}, {"eq": {"name": "bea"}}]})),
        json!([{"name": "albert"}, {"name": "bea"}])
    );
    assert_eq!(
        names(&db, json!({"missing": "age"})),
        json!([{"name": "bea"}])
    );
}

#[test]
fn object_form_eq_is_a_conjunction() {
    let db = people();
    assert_eq!(
        names(&db, json!({"eq": {"name": "carl", "age": 45}})),
        json!([{"name": "carl"}])
    );
    assert_eq!(names(&db, json!({"eq": {"name": "carl", "age": 44}})), json!([]));
}

#[test]
fn string_predicates() {
    let db = people();
    assert_eq!(
        names(&db, json!({"prefix": {"name": "al"}})),
        json!([{"name": "alice"}, {"name": "albert"}])
    );
    assert_eq!(
        names(&db, json!({"regex": {"name": ".*r.*"}})),
        json!([{"name": "albert"}, {"name": "carl"}])
    );
    assert_eq!(
        names(&db, json!({"in": {"name": ["bea", "zed"]}})),
        json!([{"name": "bea"}])
    );
}

#[test]
fn dates_compare_as_timestamps() {
    let db = people();
    assert_eq!(
        names(&db, json!({"gte": [{"date": "joined"}, {"date": "2021-01-01"}]})),
        json!([{"name": "alice"}, {"name": "carl"}])
    );
}

#[test]
fn computed_edges() {
    let db = people();
    let out = db
        .query(&json!({
            "from": "people",
            "edges": [{"name": "initial", "value": {"left": {"name": 1}}}],
            "select": {"value": "age", "aggregate": "average"},
        }))
        .expect("query")
        .to_json();
    assert_eq!(
        out,
        json!([
            {"initial": "a", "age": 24.0},
            {"initial": "b"},
            {"initial": "c", "age": 45.0},
        ])
    );
}

#[test]
fn overflow_fails_the_query_unless_defaulted() {
    let db = Database::in_memory();
    db.insert("t", vec![json!({"_id": "1", "n": i64::MAX})])
        .expect("insert");
    let err = db
        .query(&json!({"from": "t", "select": {"name": "m", "value": {"add": ["n", 1]}}}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionError);

    let out = db
        .query(&json!({"from": "t", "select": {"name": "m", "value": {"add": ["n", 1], "default": -1}}}))
        .expect("query")
        .to_json();
    assert_eq!(out, json!([{"m": -1}]));
}

#[test]
fn select_default_fills_missing_values() {
    let db = people();
    let out = db
        .query(&json!({
            "from": "people",
            "select": ["name", {"name": "age", "value": "age", "default": 0}],
            "sort": "name",
            "limit": 2,
        }))
        .expect("query")
        .to_json();
    assert_eq!(
        out,
        json!([{"name": "albert", "age": 17}, {"name": "alice", "age": 31}])
    );
    let out = db
        .query(&json!({
            "from": "people",
            "select": {"name": "age", "value": "age", "default": 0},
            "where": {"eq": {"name": "bea"}},
        }))
        .expect("query")
        .to_json();
    assert_eq!(out, json!([{"age": 0}]));
}

#[test]
fn sort_is_stable_for_equal_keys() {
    let db = Database::in_memory();
    let docs: Vec<Value> = (0..6)
        .map(|i| json!({"_id": format!("{i}"), "k": i % 2, "i": i}))
        .collect();
    db.insert("t", docs).expect("insert");
    let out = db
        .query(&json!({"from": "t", "select": "i", "sort": "k"}))
        .expect("query")
        .to_json();
    assert_eq!(
        out,
        json!([{"i": 0}, {"i": 2}, {"i": 4}, {"i": 1}, {"i": 3}, {"i": 5}])
    );
}

#[test]
fn floor_overflow_fails_the_query_unless_defaulted() {
    let db = Database::in_memory();
    db.insert("t", vec![json!({"_id": "1", "n": i64::MAX})])
        .expect("insert");
    let err = db
        .query(&json!({"from": "t", "select": {"name": "m", "value": {"floor": ["n", -2]}}}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionError);

    let out = db
        .query(&json!({"from": "t", "select": {"name": "m", "value": {"floor": ["n", -2], "default": 0}}}))
        .expect("query")
        .to_json();
    assert_eq!(out, json!([{"m": 0}]));
}

#[test]
fn fields_named_like_operators_filter_normally() {
    let db = Database::in_memory();
    db.insert(
        "t",
        vec![
            json!({"_id": "1", "count": 2, "date": "x"}),
            json!({"_id": "2", "count": 3, "date": "y"}),
        ],
    )
    .expect("insert");
    let ids = |filter: Value| {
        db.query(&json!({"from": "t", "select": "_id", "where": filter}))
            .expect("query")
            .to_json()
    };
    assert_eq!(ids(json!({"eq": {"count": 2}})), json!([{"_id": "1"}]));
    assert_eq!(ids(json!({"eq": {"date": "y"}})), json!([{"_id": "2"}]));
    assert_eq!(ids(json!({"gt": {"count": 2}})), json!([{"_id": "2"}]));
}
