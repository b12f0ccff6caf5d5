//! Aggregate functions and their per-cell accumulators.
//!
//! Sequences are flattened and missing values are skipped before any
//! accumulator sees them, except for `none`, which keeps the first
//! non-missing value whole.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use rustc_hash::FxHashSet;
use serde_json::Value as Json;

use crate::error::{JxError, Result};
use crate::value::{compare, Object, Value, ValueKey};

/// Aggregate applied to a select column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AggregateKind {
    /// Non-missing values (rows when the select has no value).
    Count,
    /// Numeric sum.
    Sum,
    /// Least value.
    Min,
    /// Greatest value.
    Max,
    /// Arithmetic mean.
    Average,
    /// 50th percentile.
    Median,
    /// Linear-interpolated percentile, `0..=1`.
    Percentile(f64),
    /// Compound summary statistics.
    Stats,
    /// Number of distinct values.
    Cardinality,
    /// Distinct values in first-seen order.
    Union,
    /// First value.
    First,
    /// Last value.
    Last,
    /// Every value in order.
    Array,
    /// First non-missing value, unflattened.
    None,
}

impl AggregateKind {
    /// Parses an aggregate name; `percentile` is the select's `percentile`
    /// property, which must be a numeric literal.
    pub fn parse(name: &str, percentile: Option<&Json>) -> Result<Self> {
        let kind = match name {
            "count" => AggregateKind::Count,
            "sum" | "add" => AggregateKind::Sum,
            "min" | "minimum" => AggregateKind::Min,
            "max" | "maximum" => AggregateKind::Max,
            "average" | "avg" | "mean" => AggregateKind::Average,
            "median" => AggregateKind::Median,
            "percentile" => {
                let p = match percentile {
                    None | Some(Json::Null) => 0.5,
                    Some(Json::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
                    Some(_) => f64::NAN,
                };
                if !(0.0..=1.0).contains(&p) {
                    return Err(JxError::invalid_query("Expecting percentile to be a float")
                        .with_param("percentile", percentile.map(Json::to_string).unwrap_or_default()));
                }
                AggregateKind::Percentile(p)
            }
            "stats" => AggregateKind::Stats,
            "cardinality" | "count_distinct" => AggregateKind::Cardinality,
            "union" => AggregateKind::Union,
            "first" => AggregateKind::First,
            "last" => AggregateKind::Last,
            "array" | "list" => AggregateKind::Array,
            "none" => AggregateKind::None,
            other => {
                return Err(JxError::invalid_query("Unknown aggregate {aggregate}")
                    .with_param("aggregate", other))
            }
        };
        Ok(kind)
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Average => "average",
            AggregateKind::Median => "median",
            AggregateKind::Percentile(_) => "percentile",
            AggregateKind::Stats => "stats",
            AggregateKind::Cardinality => "cardinality",
            AggregateKind::Union => "union",
            AggregateKind::First => "first",
            AggregateKind::Last => "last",
            AggregateKind::Array => "array",
            AggregateKind::None => "none",
        }
    }

    /// Creates a fresh accumulator.
    pub fn accumulator(self) -> Box<dyn Accumulator> {
        match self {
            AggregateKind::Count => Box::new(CountAcc(0)),
            AggregateKind::Sum => Box::new(SumAcc::default()),
            AggregateKind::Min => Box::new(ExtremeAcc::new(Ordering::Less)),
            AggregateKind::Max => Box::new(ExtremeAcc::new(Ordering::Greater)),
            AggregateKind::Average => Box::new(AverageAcc::default()),
            AggregateKind::Median => Box::new(PercentileAcc::new(0.5)),
            AggregateKind::Percentile(p) => Box::new(PercentileAcc::new(p)),
            AggregateKind::Stats => Box::new(StatsAcc::default()),
            AggregateKind::Cardinality => Box::new(DistinctAcc::new(true)),
            AggregateKind::Union => Box::new(DistinctAcc::new(false)),
            AggregateKind::First => Box::new(FirstAcc(None)),
            AggregateKind::Last => Box::new(LastAcc(None)),
            AggregateKind::Array => Box::new(ArrayAcc(Vec::new())),
            AggregateKind::None => Box::new(NoneAcc(None)),
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Percentile(p) => write!(f, "percentile({p})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Folds the values of one select within one cell.
pub trait Accumulator: Send {
    /// Adds the value evaluated for one row.
    fn add(&mut self, value: &Value);
    /// Produces the aggregate; null when nothing was added.
    fn finish(&mut self) -> Value;
}

struct CountAcc(usize);

impl Accumulator for CountAcc {
    fn add(&mut self, value: &Value) {
        self.0 += value.members().count();
    }

    fn finish(&mut self) -> Value {
        Value::from(self.0)
    }
}

/// Integer sum until overflow or the first float, then floating.
#[derive(Default)]
struct SumAcc {
    int: i64,
    float: f64,
    is_float: bool,
    seen: bool,
}

impl SumAcc {
    fn push(&mut self, value: &Value) {
        match value {
            Value::Int(i) if !self.is_float => match self.int.checked_add(*i) {
                Some(sum) => self.int = sum,
                None => {
                    self.is_float = true;
                    self.float = self.int as f64 + *i as f64;
                }
            },
            other => match other.as_f64() {
                Some(f) => {
                    if !self.is_float {
                        self.is_float = true;
                        self.float = self.int as f64;
                    }
                    self.float += f;
                }
                None => return,
            },
        }
        self.seen = true;
    }

    fn value(&self) -> Value {
        match (self.seen, self.is_float) {
            (false, _) => Value::Null,
            (true, false) => Value::Int(self.int),
            (true, true) => Value::from_f64(self.float),
        }
    }
}

impl Accumulator for SumAcc {
    fn add(&mut self, value: &Value) {
        for member in value.members() {
            self.push(member);
        }
    }

    fn finish(&mut self) -> Value {
        self.value()
    }
}

struct ExtremeAcc {
    keep: Ordering,
    best: Option<Value>,
}

impl ExtremeAcc {
    fn new(keep: Ordering) -> Self {
        Self { keep, best: None }
    }
}

impl Accumulator for ExtremeAcc {
    fn add(&mut self, value: &Value) {
        for member in value.members() {
            let replace = match &self.best {
                None => true,
                Some(best) => compare(member, best) == self.keep,
            };
            if replace {
                self.best = Some(member.clone());
            }
        }
    }

    fn finish(&mut self) -> Value {
        self.best.clone().unwrap_or_default()
    }
}

#[derive(Default)]
struct AverageAcc {
    sum: f64,
    count: usize,
}

impl Accumulator for AverageAcc {
    fn add(&mut self, value: &Value) {
        for f in value.members().filter_map(Value::as_f64) {
            self.sum += f;
            self.count += 1;
        }
    }

    fn finish(&mut self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::from_f64(self.sum / self.count as f64)
        }
    }
}

fn numbers(value: &Value, out: &mut Vec<f64>) {
    out.extend(value.members().filter_map(Value::as_f64));
}

/// Linear interpolation between closest ranks.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = p * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
        }
    }
}

fn sort_floats(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::Int(f as i64)
    } else {
        Value::from_f64(f)
    }
}

struct PercentileAcc {
    p: f64,
    values: Vec<f64>,
}

impl PercentileAcc {
    fn new(p: f64) -> Self {
        Self {
            p,
            values: Vec::new(),
        }
    }
}

impl Accumulator for PercentileAcc {
    fn add(&mut self, value: &Value) {
        numbers(value, &mut self.values);
    }

    fn finish(&mut self) -> Value {
        sort_floats(&mut self.values);
        percentile(&self.values, self.p)
            .map(number_value)
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct StatsAcc {
    values: Vec<f64>,
}

impl Accumulator for StatsAcc {
    fn add(&mut self, value: &Value) {
        numbers(value, &mut self.values);
    }

    fn finish(&mut self) -> Value {
        let mut out = Object::new();
        let n = self.values.len();
        out.insert("count".into(), Value::from(n));
        if n > 0 {
            sort_floats(&mut self.values);
            let sum: f64 = self.values.iter().sum();
            let sos: f64 = self.values.iter().map(|v| v * v).sum();
            let avg = sum / n as f64;
            let var = (sos / n as f64 - avg * avg).max(0.0);
            out.insert("sum".into(), number_value(sum));
            out.insert("min".into(), number_value(self.values[0]));
            out.insert("max".into(), number_value(self.values[n - 1]));
            out.insert("avg".into(), Value::from_f64(avg));
            out.insert("var".into(), Value::from_f64(var));
            out.insert("std".into(), Value::from_f64(var.sqrt()));
            out.insert("sos".into(), number_value(sos));
            out.insert(
                "median".into(),
                percentile(&self.values, 0.5).map(number_value).unwrap_or_default(),
            );
        }
        Value::Object(out)
    }
}

struct DistinctAcc {
    count_only: bool,
    seen: FxHashSet<ValueKey>,
    ordered: Vec<Value>,
}

impl DistinctAcc {
    fn new(count_only: bool) -> Self {
        Self {
            count_only,
            seen: FxHashSet::default(),
            ordered: Vec::new(),
        }
    }
}

impl Accumulator for DistinctAcc {
    fn add(&mut self, value: &Value) {
        for member in value.members() {
            if self.seen.insert(ValueKey(member.clone())) && !self.count_only {
                self.ordered.push(member.clone());
            }
        }
    }

    fn finish(&mut self) -> Value {
        if self.count_only {
            Value::from(self.seen.len())
        } else if self.ordered.is_empty() {
            Value::Null
        } else {
            Value::Array(self.ordered.clone())
        }
    }
}

struct FirstAcc(Option<Value>);

impl Accumulator for FirstAcc {
    fn add(&mut self, value: &Value) {
        if self.0.is_none() {
            self.0 = value.members().next().cloned();
        }
    }

    fn finish(&mut self) -> Value {
        self.0.clone().unwrap_or_default()
    }
}

struct LastAcc(Option<Value>);

impl Accumulator for LastAcc {
    fn add(&mut self, value: &Value) {
        if let Some(last) = value.members().last() {
            self.0 = Some(last.clone());
        }
    }

    fn finish(&mut self) -> Value {
        self.0.clone().unwrap_or_default()
    }
}

struct ArrayAcc(Vec<Value>);

impl Accumulator for ArrayAcc {
    fn add(&mut self, value: &Value) {
        self.0.extend(value.members().cloned());
    }

    fn finish(&mut self) -> Value {
        if self.0.is_empty() {
            Value::Null
        } else {
            Value::Array(self.0.clone())
        }
    }
}

struct NoneAcc(Option<Value>);

impl Accumulator for NoneAcc {
    fn add(&mut self, value: &Value) {
        if self.0.is_none() && !value.is_missing() {
            self.0 = Some(value.clone());
        }
    }

    fn finish(&mut self) -> Value {
        self.0.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(kind: AggregateKind, values: &[serde_json::Value]) -> Value {
        let mut acc = kind.accumulator();
        for v in values {
            acc.add(&Value::from_json(v.clone()));
        }
        acc.finish()
    }

    #[test]
    fn empty_aggregates() {
        assert_eq!(run(AggregateKind::Count, &[]), Value::Int(0));
        for kind in [
            AggregateKind::Sum,
            AggregateKind::Min,
            AggregateKind::Max,
            AggregateKind::Average,
            AggregateKind::Median,
        ] {
            assert!(matches!(run(kind, &[]), Value::Null), "{kind} on empty");
        }
    }

    #[test]
    fn skips_missing_and_flattens() {
        let values = [json!(1), json!(null), json!([2, 3]), json!([])];
        assert_eq!(run(AggregateKind::Count, &values), Value::Int(3));
        assert_eq!(run(AggregateKind::Sum, &values), Value::Int(6));
        assert_eq!(run(AggregateKind::Average, &values), Value::Float(2.0));
        assert_eq!(run(AggregateKind::Max, &values), Value::Int(3));
    }

    #[test]
    fn percentile_interpolates() {
        let values: Vec<_> = (1..=4).map(|i| json!(i)).collect();
        assert_eq!(run(AggregateKind::Median, &values), Value::Float(2.5));
        assert_eq!(run(AggregateKind::Percentile(0.0), &values), Value::Int(1));
        assert_eq!(run(AggregateKind::Percentile(1.0), &values), Value::Int(4));
    }

    #[test]
    fn percentile_must_be_numeric() {
        let err = AggregateKind::parse("percentile", Some(&json!("0.90"))).expect_err("string");
        assert!(err.to_string().contains("Expecting percentile to be a float"));
        assert!(AggregateKind::parse("percentile", Some(&json!(0.9))).is_ok());
    }

    #[test]
    fn stats_reports_population_variance() {
        let values = [json!(2), json!(4), json!(4), json!(4), json!(5), json!(5), json!(7), json!(9)];
        let stats = run(AggregateKind::Stats, &values);
        let map = stats.as_object().expect("object");
        assert_eq!(map["count"], Value::Int(8));
        assert_eq!(map["avg"], Value::Float(5.0));
        assert_eq!(map["var"], Value::Float(4.0));
        assert_eq!(map["std"], Value::Float(2.0));
    }

    #[test]
    fn distinct_aggregates() {
        let values = [json!("a"), json!("b"), json!("a"), json!(null)];
        assert_eq!(run(AggregateKind::Cardinality, &values), Value::Int(2));
        assert_eq!(
            run(AggregateKind::Union, &values),
            Value::from_json(json!(["a", "b"]))
        );
        assert_eq!(run(AggregateKind::First, &values), Value::from("a"));
        assert_eq!(run(AggregateKind::Last, &values), Value::from("a"));
    }

    #[test]
    fn none_keeps_first_whole_value() {
        let values = [json!(null), json!([1, 2]), json!(3)];
        assert_eq!(run(AggregateKind::None, &values), Value::from_json(json!([1, 2])));
    }
}
