#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    config: PathBuf,
    array_file: PathBuf,
    lines_file: PathBuf,
}

fn setup() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        "[engine]\ndefault_limit = 2\n\n[logging]\nlevel = \"error\"\n",
    )
    .expect("write config");
    let array_file = dir.path().join("people.json");
    fs::write(
        &array_file,
        json!([
            {"_id": "1", "name": "ann", "city": "oslo"},
            {"_id": "2", "name": "bob", "city": "rome"},
            {"_id": "3", "name": "cyd", "city": "oslo"},
        ])
        .to_string(),
    )
    .expect("write data");
    let lines_file = dir.path().join("events.jsonl");
    fs::write(&lines_file, "{\"kind\": \"a\"}\n{\"kind\": \"b\"}\n{\"kind\": \"a\"}\n")
        .expect("write lines");
    Fixture {
        _dir: dir,
        config,
        array_file,
        lines_file,
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn query_over_loaded_array_file() {
    let fx = setup();
    let output = cargo_bin_cmd!("jx")
        .arg("--config")
        .arg(&fx.config)
        .arg("query")
        .arg("--load")
        .arg(format!("people={}", fx.array_file.display()))
        .arg(r#"{"from": "people", "edges": ["city"]}"#)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(
        stdout_json(&output),
        json!([{"city": "oslo", "count": 2}, {"city": "rome", "count": 1}])
    );
}

#[test]
fn config_default_limit_applies() {
    let fx = setup();
    let output = cargo_bin_cmd!("jx")
        .args(["--config"])
        .arg(&fx.config)
        .args(["--output", "compact", "query", "--load"])
        .arg(format!("people={}", fx.array_file.display()))
        .arg(r#"{"from": "people", "select": "name"}"#)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&output), json!([{"name": "ann"}, {"name": "bob"}]));
}

#[test]
fn query_from_file_with_format_override() {
    let fx = setup();
    let query_file = fx.config.with_file_name("query.json");
    fs::write(&query_file, r#"{"from": "events", "edges": ["kind"]}"#).expect("write query");
    let output = cargo_bin_cmd!("jx")
        .arg("--config")
        .arg(&fx.config)
        .args(["query", "--format", "table", "--load"])
        .arg(format!("events={}", fx.lines_file.display()))
        .arg(format!("@{}", query_file.display()))
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(
        stdout_json(&output),
        json!({"header": ["kind", "count"], "data": [["a", 2], ["b", 1]]})
    );
}

#[test]
fn schema_lists_columns() {
    let fx = setup();
    let output = cargo_bin_cmd!("jx")
        .arg("--config")
        .arg(&fx.config)
        .args(["schema", "--load"])
        .arg(format!("people={}", fx.array_file.display()))
        .arg("people")
        .assert()
        .success()
        .get_output()
        .clone();
    let rows = stdout_json(&output);
    let names: Vec<&str> = rows
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|row| row["name"].as_str())
        .collect();
    assert!(names.contains(&"city"));
    assert!(names.contains(&"name"));
}

#[test]
fn explain_prints_plan_hash() {
    let fx = setup();
    let output = cargo_bin_cmd!("jx")
        .arg("--config")
        .arg(&fx.config)
        .args(["explain", r#"{"from": "people"}"#])
        .assert()
        .success()
        .get_output()
        .clone();
    let explain = stdout_json(&output);
    assert!(explain["plan_hash"]
        .as_str()
        .is_some_and(|hash| hash.starts_with("0x")));
}

#[test]
fn invalid_query_fails_with_message() {
    let fx = setup();
    let output = cargo_bin_cmd!("jx")
        .arg("--config")
        .arg(&fx.config)
        .args(["query", r#"{"from": 5}"#])
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Do not know how to handle"), "{stderr}");
}
