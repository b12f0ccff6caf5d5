//! Row evaluator.
//!
//! Missing operands propagate as null unless an operator says otherwise;
//! `default` replaces a missing result. The only row-level error is integer
//! overflow without a `default`.

use std::cmp::Ordering;

use super::{ArithOp, CompareOp, Expr, NullPolicy, Reader, SliceOp, UnaryOp, Var};
use crate::error::{JxError, Result};
use crate::value::path::{get_path, get_path_strict};
use crate::value::{compare, Value};

/// Source of row levels for variable reads.
pub trait RowContext {
    /// Value at `level`: `0` is the document, deeper levels are the nested
    /// elements the row is positioned on.
    fn level(&self, level: usize) -> Option<&Value>;
}

/// A single value exposed as level 0.
pub struct RecordContext<'a>(pub &'a Value);

impl RowContext for RecordContext<'_> {
    fn level(&self, level: usize) -> Option<&Value> {
        (level == 0).then_some(self.0)
    }
}

impl Expr {
    /// Evaluates against one row.
    pub fn eval(&self, ctx: &dyn RowContext) -> Result<Value> {
        let value = match self {
            Expr::Literal(value) => value.clone(),
            Expr::Var(var) => read_var(var, ctx),
            Expr::Tuple(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.eval(ctx))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Not(term) => {
                let value = term.eval(ctx)?;
                if value.is_missing() {
                    Value::Null
                } else {
                    Value::Bool(!value.truthy())
                }
            }
            Expr::And(terms) => {
                let mut saw_null = false;
                for term in terms {
                    let value = term.eval(ctx)?;
                    if value.is_missing() {
                        saw_null = true;
                    } else if !value.truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                if saw_null {
                    Value::Null
                } else {
                    Value::Bool(true)
                }
            }
            Expr::Or(terms) => {
                let mut saw_null = false;
                for term in terms {
                    let value = term.eval(ctx)?;
                    if value.is_missing() {
                        saw_null = true;
                    } else if value.truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                if saw_null {
                    Value::Null
                } else {
                    Value::Bool(false)
                }
            }
            Expr::Compare { op, lhs, rhs } => compare_values(*op, &lhs.eval(ctx)?, &rhs.eval(ctx)?),
            Expr::In { value, set } => {
                let value = value.eval(ctx)?;
                let set = set.eval(ctx)?;
                let found = value
                    .members()
                    .any(|probe| set.members().any(|member| values_equal(probe, member)));
                Value::Bool(found)
            }
            Expr::Missing(term) => Value::Bool(term.eval(ctx)?.is_missing()),
            Expr::Exists(term) => Value::Bool(!term.eval(ctx)?.is_missing()),
            Expr::Arith { op, terms, policy } => return arith(*op, terms, policy, ctx),
            Expr::Count(terms) => {
                let mut count = 0usize;
                for term in terms {
                    count += term.eval(ctx)?.members().count();
                }
                Value::from(count)
            }
            Expr::Unary { op, term, default } => {
                let value = unary(*op, term.eval(ctx)?);
                return or_default(value, default.as_deref(), ctx);
            }
            Expr::Floor {
                term,
                modulus,
                default,
            } => {
                let modulus = match modulus {
                    Some(m) => Some(m.eval(ctx)?),
                    None => None,
                };
                return match floor(term.eval(ctx)?, modulus) {
                    Ok(value) => or_default(value, default.as_deref(), ctx),
                    Err(_) if default.is_some() => or_default(Value::Null, default.as_deref(), ctx),
                    Err(err) => Err(err),
                };
            }
            Expr::Slice { op, term, length } => slice(*op, &term.eval(ctx)?, &length.eval(ctx)?),
            Expr::Find {
                term,
                find,
                start,
                default,
            } => {
                let start = start_offset(start.as_deref(), ctx)?;
                let value = match (to_text(&term.eval(ctx)?), to_text(&find.eval(ctx)?)) {
                    (Some(text), Some(needle)) => match find_from(&text, &needle, start) {
                        Some((chars, _)) => Value::from(chars),
                        None => Value::Null,
                    },
                    _ => Value::Null,
                };
                return or_default(value, default.as_deref(), ctx);
            }
            Expr::Between {
                term,
                prefix,
                suffix,
                start,
                default,
            } => {
                let start = start_offset(start.as_deref(), ctx)?;
                let value = match to_text(&term.eval(ctx)?) {
                    Some(text) => between(
                        &text,
                        to_text(&prefix.eval(ctx)?).as_deref(),
                        to_text(&suffix.eval(ctx)?).as_deref(),
                        start,
                    )
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                    None => Value::Null,
                };
                return or_default(value, default.as_deref(), ctx);
            }
            Expr::Prefix { term, prefix } => {
                let term = term.eval(ctx)?;
                match to_text(&prefix.eval(ctx)?) {
                    None => Value::Bool(!term.is_missing()),
                    Some(prefix) => Value::Bool(
                        term.members()
                            .filter_map(to_text)
                            .any(|text| text.starts_with(&prefix)),
                    ),
                }
            }
            Expr::Suffix { term, suffix } => {
                let term = term.eval(ctx)?;
                match to_text(&suffix.eval(ctx)?) {
                    None => Value::Bool(!term.is_missing()),
                    Some(suffix) => Value::Bool(
                        term.members()
                            .filter_map(to_text)
                            .any(|text| text.ends_with(&suffix)),
                    ),
                }
            }
            Expr::Regex { term, pattern } => Value::Bool(
                term.eval(ctx)?
                    .members()
                    .filter_map(to_text)
                    .any(|text| pattern.is_match(&text)),
            ),
            Expr::Concat {
                terms,
                separator,
                policy,
            } => {
                let mut parts = Vec::with_capacity(terms.len());
                for term in terms {
                    match to_text(&term.eval(ctx)?) {
                        Some(text) => parts.push(text),
                        None if policy.nulls => {}
                        None => return or_default(Value::Null, policy.default.as_deref(), ctx),
                    }
                }
                let value = if parts.is_empty() {
                    Value::Null
                } else {
                    Value::String(parts.join(separator))
                };
                return or_default(value, policy.default.as_deref(), ctx);
            }
            Expr::When {
                cond,
                then,
                otherwise,
            } => {
                if cond.eval(ctx)?.truthy() {
                    then.eval(ctx)?
                } else {
                    match otherwise {
                        Some(otherwise) => otherwise.eval(ctx)?,
                        None => Value::Null,
                    }
                }
            }
            Expr::Coalesce(terms) => {
                for term in terms {
                    let value = term.eval(ctx)?;
                    if !value.is_missing() {
                        return Ok(value);
                    }
                }
                Value::Null
            }
        };
        Ok(value)
    }
}

fn read_var(var: &Var, ctx: &dyn RowContext) -> Value {
    let Some(base) = ctx.level(var.binding.level) else {
        return Value::Null;
    };
    match var.binding.reader {
        Reader::Scalar => get_path_strict(base, &var.binding.parts),
        Reader::Vector => get_path(base, &var.binding.parts),
    }
}

fn or_default(value: Value, default: Option<&Expr>, ctx: &dyn RowContext) -> Result<Value> {
    match default {
        Some(default) if value.is_missing() => default.eval(ctx),
        _ => Ok(value),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Bool(_), Value::Bool(_)) | (Value::String(_), Value::String(_))
    ) || (a.is_number() && b.is_number())
}

/// Comparisons are null when either side is missing. A sequence operand
/// matches when any of its elements does.
fn compare_values(op: CompareOp, a: &Value, b: &Value) -> Value {
    if a.is_missing() || b.is_missing() {
        return Value::Null;
    }
    let eq = || values_equal(a, b) || a.members().any(|x| b.members().any(|y| values_equal(x, y)));
    let result = match op {
        CompareOp::Eq => eq(),
        CompareOp::Ne => !eq(),
        ordering => a.members().any(|x| {
            b.members().any(|y| {
                if !same_kind(x, y) {
                    return false;
                }
                let ord = compare(x, y);
                match ordering {
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            })
        }),
    };
    Value::Bool(result)
}

#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) | Value::Timestamp(f) if f.is_finite() => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::from_f64(f),
        }
    }
}

fn overflow(op: ArithOp) -> JxError {
    JxError::execution("integer overflow in {op}").with_param("op", format!("{op:?}").to_lowercase())
}

fn arith(op: ArithOp, terms: &[Expr], policy: &NullPolicy, ctx: &dyn RowContext) -> Result<Value> {
    let fallback = |ctx: &dyn RowContext| match policy.default.as_deref() {
        Some(default) => default.eval(ctx),
        None => Ok(Value::Null),
    };
    let mut nums = Vec::with_capacity(terms.len());
    for term in terms {
        match Num::of(&term.eval(ctx)?) {
            Some(num) => nums.push(num),
            None if policy.nulls && op == ArithOp::Sub => nums.push(Num::Int(0)),
            None if policy.nulls && matches!(op, ArithOp::Add | ArithOp::Mult) => {}
            None => return fallback(ctx),
        }
    }
    let Some((&first, rest)) = nums.split_first() else {
        return fallback(ctx);
    };
    let result = match op {
        ArithOp::Add | ArithOp::Mult | ArithOp::Sub => {
            let mut acc = first;
            for &next in rest {
                acc = match (acc, next) {
                    (Num::Int(a), Num::Int(b)) => {
                        let checked = match op {
                            ArithOp::Add => a.checked_add(b),
                            ArithOp::Sub => a.checked_sub(b),
                            _ => a.checked_mul(b),
                        };
                        match checked {
                            Some(v) => Num::Int(v),
                            None if policy.default.is_some() => return fallback(ctx),
                            None => return Err(overflow(op)),
                        }
                    }
                    (a, b) => {
                        let (a, b) = (a.as_f64(), b.as_f64());
                        Num::Float(match op {
                            ArithOp::Add => a + b,
                            ArithOp::Sub => a - b,
                            _ => a * b,
                        })
                    }
                };
            }
            Some(acc)
        }
        ArithOp::Div => match rest.first() {
            Some(&divisor) if divisor.as_f64() != 0.0 => Some(match (first, divisor) {
                (Num::Int(a), Num::Int(b)) if a.checked_rem(b) == Some(0) => {
                    a.checked_div(b).map(Num::Int).unwrap_or(Num::Float(a as f64 / b as f64))
                }
                (a, b) => Num::Float(a.as_f64() / b.as_f64()),
            }),
            _ => None,
        },
        ArithOp::Mod => match rest.first() {
            Some(&divisor) if divisor.as_f64() != 0.0 => Some(match (first, divisor) {
                (Num::Int(a), Num::Int(b)) => match a.checked_rem(b) {
                    Some(r) if r != 0 && (r < 0) != (b < 0) => Num::Int(r + b),
                    Some(r) => Num::Int(r),
                    None => Num::Int(0),
                },
                (a, b) => {
                    let (a, b) = (a.as_f64(), b.as_f64());
                    let r = a % b;
                    Num::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r })
                }
            }),
            _ => None,
        },
    };
    match result.map(Num::into_value) {
        Some(value) if !value.is_missing() => Ok(value),
        _ => fallback(ctx),
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// Text form of a scalar; null for missing values.
pub(crate) fn to_text(value: &Value) -> Option<String> {
    match value {
        v if v.is_missing() => None,
        Value::String(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) | Value::Timestamp(f) => Some(format_number(*f)),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_json().to_string()),
    }
}

fn unary(op: UnaryOp, value: Value) -> Value {
    if value.is_missing() && op != UnaryOp::Boolean {
        return Value::Null;
    }
    match op {
        UnaryOp::Length => match &value {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            _ => Value::Null,
        },
        UnaryOp::Number => match value {
            Value::Int(i) => Value::Int(i),
            Value::Float(f) | Value::Timestamp(f) => Value::from_f64(f),
            Value::Bool(b) => Value::Int(i64::from(b)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Value::Int)
                    .or_else(|_| s.parse::<f64>().map(Value::from_f64))
                    .unwrap_or(Value::Null)
            }
            _ => Value::Null,
        },
        UnaryOp::String => to_text(&value).map(Value::String).unwrap_or(Value::Null),
        UnaryOp::Boolean => Value::Bool(value.truthy()),
        UnaryOp::Abs => match value {
            Value::Int(i) => i
                .checked_abs()
                .map(Value::Int)
                .unwrap_or(Value::Float((i as f64).abs())),
            Value::Float(f) => Value::from_f64(f.abs()),
            _ => Value::Null,
        },
        UnaryOp::Date => match value {
            Value::Int(i) => Value::Timestamp(i as f64),
            Value::Float(f) => Value::Timestamp(f),
            Value::Timestamp(f) => Value::Timestamp(f),
            Value::String(s) => super::parse_date(&s)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        UnaryOp::First => match value {
            Value::Array(mut items) => {
                if items.is_empty() {
                    Value::Null
                } else {
                    items.swap_remove(0)
                }
            }
            other => other,
        },
        UnaryOp::Last => match value {
            Value::Array(mut items) => items.pop().unwrap_or(Value::Null),
            other => other,
        },
    }
}

fn floor(value: Value, modulus: Option<Value>) -> Result<Value> {
    let Some(num) = Num::of(&value) else {
        return Ok(Value::Null);
    };
    let modulus = match modulus {
        None => None,
        Some(m) => match Num::of(&m) {
            Some(m) if m.as_f64() != 0.0 => Some(m),
            _ => return Ok(Value::Null),
        },
    };
    let floored = match (num, modulus) {
        (Num::Int(a), None) => Num::Int(a),
        (Num::Int(a), Some(Num::Int(m))) => {
            let floored = match a.checked_rem(m) {
                Some(r) if r != 0 && (r < 0) != (m < 0) => {
                    a.checked_sub(r).and_then(|v| v.checked_sub(m))
                }
                Some(r) => a.checked_sub(r),
                None => Some(a),
            };
            match floored {
                Some(v) => Num::Int(v),
                None => {
                    return Err(
                        JxError::execution("integer overflow in {op}").with_param("op", "floor")
                    )
                }
            }
        }
        (a, m) => {
            let m = m.map(Num::as_f64).unwrap_or(1.0);
            let f = (a.as_f64() / m).floor() * m;
            if f.fract() == 0.0 && f.abs() < 9.0e15 && !matches!(value, Value::Timestamp(_)) {
                Num::Int(f as i64)
            } else {
                Num::Float(f)
            }
        }
    };
    Ok(match (value, floored) {
        (Value::Timestamp(_), num) => Value::Timestamp(num.as_f64()),
        (_, num) => num.into_value(),
    })
}

fn slice(op: SliceOp, term: &Value, length: &Value) -> Value {
    let (Some(text), Some(n)) = (to_text(term), length.as_f64()) else {
        return Value::Null;
    };
    let total = text.chars().count();
    let n = if n <= 0.0 { 0 } else { (n as usize).min(total) };
    let (skip, take) = match op {
        SliceOp::Left => (0, n),
        SliceOp::Right => (total - n, n),
        SliceOp::NotLeft => (n, total - n),
        SliceOp::NotRight => (0, total - n),
    };
    Value::String(text.chars().skip(skip).take(take).collect())
}

fn start_offset(start: Option<&Expr>, ctx: &dyn RowContext) -> Result<usize> {
    let Some(start) = start else {
        return Ok(0);
    };
    Ok(start
        .eval(ctx)?
        .as_f64()
        .filter(|f| *f > 0.0)
        .map(|f| f as usize)
        .unwrap_or(0))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Finds `needle` at or after character `start`; returns (char index, byte index).
fn find_from(text: &str, needle: &str, start: usize) -> Option<(usize, usize)> {
    let from = byte_offset(text, start);
    let byte = text[from..].find(needle)? + from;
    Some((text[..byte].chars().count(), byte))
}

fn between(text: &str, prefix: Option<&str>, suffix: Option<&str>, start: usize) -> Option<String> {
    let begin = match prefix {
        None => byte_offset(text, start),
        Some(prefix) => {
            let (_, byte) = find_from(text, prefix, start)?;
            byte + prefix.len()
        }
    };
    let end = match suffix {
        None => text.len(),
        Some(suffix) => text[begin..].find(suffix)? + begin,
    };
    Some(text[begin..end].to_string())
}
