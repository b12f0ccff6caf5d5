#![allow(missing_docs)]

use jx::query::profile::profile_snapshot;
use jx::Database;
use serde_json::json;

#[test]
fn stage_timings_accumulate_when_enabled() {
    std::env::set_var("JX_PROFILE", "1");
    let db = Database::in_memory();
    db.insert(
        "t",
        vec![json!({"a": "x", "v": 1}), json!({"a": "y", "v": 2}), json!({"a": "x", "v": 3})],
    )
    .expect("insert");
    db.query(&json!({"from": "t", "edges": ["a"], "select": {"value": "v", "aggregate": "sum"}}))
        .expect("query");

    let snapshot = profile_snapshot(true).expect("profiling enabled");
    assert_eq!(snapshot.plan_count, 1);
    assert_eq!(snapshot.scan_count, 1);
    assert_eq!(snapshot.shape_count, 1);
    assert!(snapshot.aggregate_count >= 1);

    let after_reset = profile_snapshot(false).expect("profiling enabled");
    assert_eq!(after_reset.plan_count, 0);
    assert_eq!(after_reset.scan_ns, 0);
}
