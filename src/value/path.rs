//! Dotted-path helpers.
//!
//! Field names are dot-separated paths; a literal dot inside a key is written
//! `\.`. The root (self) is written `.` and splits to an empty path.

use super::{Object, Value};

/// Splits a dotted field into its unescaped key parts.
pub fn split_field(field: &str) -> Vec<String> {
    if field == "." || field.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                current.push('.');
            }
            '.' => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts.retain(|p| !p.is_empty());
    parts
}

/// Joins key parts back into a dotted field, escaping literal dots.
pub fn join_field<S: AsRef<str>>(parts: &[S]) -> String {
    if parts.is_empty() {
        return ".".to_string();
    }
    parts
        .iter()
        .map(|p| p.as_ref().replace('.', "\\."))
        .collect::<Vec<_>>()
        .join(".")
}

/// Appends `child` to `parent`, treating `.` as the root.
pub fn concat_field(parent: &str, child: &str) -> String {
    match (parent, child) {
        (".", c) => c.to_string(),
        (p, ".") => p.to_string(),
        (p, c) => format!("{p}.{c}"),
    }
}

/// Returns `field` relative to `parent`, or `None` when it is not beneath it.
pub fn relative_field(field: &str, parent: &str) -> Option<String> {
    if parent == "." {
        return Some(field.to_string());
    }
    if field == parent {
        return Some(".".to_string());
    }
    field
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(str::to_string)
}

/// True when `field` is `prefix` or lies beneath it.
pub fn starts_with_field(field: &str, prefix: &str) -> bool {
    relative_field(field, prefix).is_some()
}

/// Vector read: descends mapping keys and maps the read over sequences,
/// flattening nested sequences and dropping missing elements. An
/// all-missing result is null.
pub fn get_path(value: &Value, parts: &[String]) -> Value {
    let mut out = Vec::new();
    let scalar = collect_path(value, parts, &mut out);
    match scalar {
        Some(v) => v,
        None if out.is_empty() => Value::Null,
        None => Value::Array(out),
    }
}

fn collect_path(value: &Value, parts: &[String], out: &mut Vec<Value>) -> Option<Value> {
    match (value, parts.split_first()) {
        (Value::Array(items), _) => {
            for item in items {
                match collect_path(item, parts, out) {
                    Some(Value::Array(inner)) => {
                        out.extend(inner.into_iter().filter(|v| !v.is_missing()))
                    }
                    Some(v) if !v.is_missing() => out.push(v),
                    _ => {}
                }
            }
            None
        }
        (v, None) => Some(v.clone()),
        (Value::Object(map), Some((head, rest))) => match map.get(head) {
            Some(child) => collect_path(child, rest, out),
            None => Some(Value::Null),
        },
        _ => Some(Value::Null),
    }
}

/// Scalar read: descends mapping keys only. Crossing a sequence before the
/// leaf yields null; a sequence at the leaf is returned as stored.
pub fn get_path_strict(value: &Value, parts: &[String]) -> Value {
    let mut current = value;
    for part in parts {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(child) => current = child,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Writes `value` at `parts`, creating intermediate mappings. Writing null
/// removes the key.
pub fn set_path(target: &mut Value, parts: &[String], value: Value) {
    let Some((head, rest)) = parts.split_first() else {
        *target = value;
        return;
    };
    if !matches!(target, Value::Object(_)) {
        if matches!(value, Value::Null) {
            return;
        }
        *target = Value::Object(Object::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    if rest.is_empty() {
        if matches!(value, Value::Null) {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }
    let clearing = matches!(value, Value::Null);
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_path(child, rest, value);
    let emptied = match child {
        Value::Null => true,
        Value::Object(inner) => clearing && inner.is_empty(),
        _ => false,
    };
    if emptied {
        map.remove(head);
    }
}

/// Like [`set_path`] but merges mappings already present at the leaf.
pub(crate) fn merge_path(target: &mut Value, parts: &[String], value: Value) {
    let existing = get_path_strict(target, parts);
    match (existing, value) {
        (Value::Object(mut current), Value::Object(incoming)) => {
            for (key, v) in incoming {
                current.insert(key, v);
            }
            set_path(target, parts, Value::Object(current));
        }
        (_, value) => set_path(target, parts, value),
    }
}
