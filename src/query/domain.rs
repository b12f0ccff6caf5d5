//! Edge domains: how dimension values map onto partitions.
//!
//! `locate` is total: any value either lands in a partition or returns
//! `None`, which the executor routes to the null partition when the
//! dimension allows nulls.

#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::error::{JxError, Result};
use crate::expr::parse_date;
use crate::value::path::{get_path_strict, split_field};
use crate::value::{Object, Value, ValueKey};

/// Tolerance applied to bucket arithmetic on floats.
const EPSILON: f64 = 1e-9;

/// Most partitions a declared range may span.
pub const MAX_RANGE_PARTITIONS: usize = 100_000;

/// Which flavour of numeric bucketing a [`RangeDomain`] performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RangeKind {
    /// Plain numbers.
    Range,
    /// Timestamps, seconds since the epoch.
    Time,
    /// Elapsed seconds.
    Duration,
}

/// Declared list of partitions.
#[derive(Clone, Debug)]
pub struct SetDomain {
    key: Option<Vec<String>>,
    partitions: Vec<Value>,
    index: FxHashMap<ValueKey, usize>,
}

impl SetDomain {
    fn new(partitions: Vec<Value>, key: Option<&str>) -> Self {
        let key = key.map(split_field);
        let mut index = FxHashMap::default();
        for (idx, part) in partitions.iter().enumerate() {
            let lookup = match &key {
                Some(key) => get_path_strict(part, key),
                None => part.clone(),
            };
            index.entry(ValueKey(lookup)).or_insert(idx);
        }
        Self {
            key,
            partitions,
            index,
        }
    }

    fn value_of(&self, idx: usize) -> Value {
        match (&self.key, self.partitions.get(idx)) {
            (Some(key), Some(part)) => get_path_strict(part, key),
            (None, Some(part)) => part.clone(),
            _ => Value::Null,
        }
    }
}

/// Half-open numeric buckets `[min + i*interval, min + (i+1)*interval)`.
#[derive(Clone, Debug)]
pub struct RangeDomain {
    kind: RangeKind,
    min: f64,
    max: f64,
    interval: f64,
    count: usize,
}

impl RangeDomain {
    /// Builds a range domain; `interval` must be positive and `max > min`.
    pub fn new(kind: RangeKind, min: f64, max: f64, interval: f64) -> Result<Self> {
        if !(interval > 0.0) || !interval.is_finite() {
            return Err(JxError::invalid_query("Expecting interval to be positive, not {interval}")
                .with_param("interval", interval));
        }
        if !(max > min) {
            return Err(JxError::invalid_query("Expecting max ({max}) to exceed min ({min})")
                .with_param("max", max)
                .with_param("min", min));
        }
        let count = ((max - min) / interval - EPSILON).ceil().max(0.0);
        if !count.is_finite() || count > MAX_RANGE_PARTITIONS as f64 {
            return Err(JxError::invalid_query(
                "Expecting at most {limit} partitions from min {min} to max {max} by {interval}",
            )
            .with_param("limit", MAX_RANGE_PARTITIONS)
            .with_param("min", min)
            .with_param("max", max)
            .with_param("interval", interval));
        }
        let count = count as usize;
        Ok(Self {
            kind,
            min,
            max,
            interval,
            count,
        })
    }

    fn locate(&self, value: &Value) -> Option<usize> {
        let v = value.as_f64()?;
        if v < self.min || v >= self.max {
            return None;
        }
        let idx = ((v - self.min) / self.interval + EPSILON).floor() as usize;
        (idx < self.count).then_some(idx)
    }

    fn bound(&self, idx: usize) -> f64 {
        let raw = self.min + idx as f64 * self.interval;
        match self.kind {
            RangeKind::Range => (raw * 1e12).round() / 1e12,
            _ => raw,
        }
    }

    fn wrap(&self, v: f64) -> Value {
        match self.kind {
            RangeKind::Time => Value::Timestamp(v),
            _ => {
                if v.fract() == 0.0 && v.abs() < 9.0e15 {
                    Value::Int(v as i64)
                } else {
                    Value::from_f64(v)
                }
            }
        }
    }
}

/// Partitions discovered from the data in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct DefaultDomain {
    limit: Option<usize>,
    parts: Vec<Value>,
    index: FxHashMap<ValueKey, usize>,
}

impl DefaultDomain {
    fn locate(&self, value: &Value) -> Option<usize> {
        self.index.get(&ValueKey(value.clone())).copied()
    }

    fn learn(&mut self, value: &Value) -> Option<usize> {
        if let Some(idx) = self.locate(value) {
            return Some(idx);
        }
        if self.limit.is_some_and(|limit| self.parts.len() >= limit) {
            return None;
        }
        let idx = self.parts.len();
        self.parts.push(value.clone());
        self.index.insert(ValueKey(value.clone()), idx);
        Some(idx)
    }
}

/// A dimension's domain.
#[derive(Clone, Debug)]
pub enum Domain {
    /// Declared partitions.
    Set(SetDomain),
    /// Numeric, time or duration buckets.
    Range(RangeDomain),
    /// Identity over output row numbers.
    Rownum {
        /// Number of rows.
        count: usize,
    },
    /// Partitions learned while scanning.
    Default(DefaultDomain),
}

impl Domain {
    /// Declared set of partitions, matched on `key` when given.
    pub fn set(partitions: Vec<Value>, key: Option<&str>) -> Self {
        Domain::Set(SetDomain::new(partitions, key))
    }

    /// Numeric buckets.
    pub fn range(min: f64, max: f64, interval: f64) -> Result<Self> {
        RangeDomain::new(RangeKind::Range, min, max, interval).map(Domain::Range)
    }

    /// Learned partitions capped at `limit` (unbounded when `None`).
    pub fn default_with_limit(limit: Option<usize>) -> Self {
        Domain::Default(DefaultDomain {
            limit,
            ..DefaultDomain::default()
        })
    }

    /// Parses a domain declaration.
    pub fn from_json(json: &Json, default_limit: usize) -> Result<Self> {
        let map = match json {
            Json::Null => return Ok(Self::default_with_limit(Some(default_limit))),
            Json::String(kind) => {
                let mut map = serde_json::Map::new();
                map.insert("type".into(), Json::String(kind.clone()));
                map
            }
            Json::Object(map) => map.clone(),
            other => {
                return Err(JxError::invalid_query("Expecting domain to be an object, not {domain}")
                    .with_param("domain", other))
            }
        };
        let kind = match map.get("type").and_then(Json::as_str) {
            Some(kind) => kind.to_string(),
            None if map.contains_key("partitions") => "set".to_string(),
            None if map.contains_key("interval") => {
                let is_time = map.get("min").is_some_and(Json::is_string)
                    || map.get("max").is_some_and(Json::is_string);
                (if is_time { "time" } else { "range" }).to_string()
            }
            None => "default".to_string(),
        };
        match kind.as_str() {
            "set" => {
                let partitions = match map.get("partitions") {
                    Some(Json::Array(items)) => items.iter().cloned().map(Value::from_json).collect(),
                    _ => {
                        return Err(JxError::invalid_query(
                            "Expecting set domain to list its partitions",
                        ))
                    }
                };
                let key = map.get("key").and_then(Json::as_str);
                Ok(Self::set(partitions, key))
            }
            "range" => {
                let min = number_field(&map, "min")?;
                let max = number_field(&map, "max")?;
                let interval = number_field(&map, "interval")?;
                Self::range(min, max, interval)
            }
            "time" => {
                let min = time_field(&map, "min")?;
                let max = time_field(&map, "max")?;
                let interval = duration_field(&map, "interval")?;
                RangeDomain::new(RangeKind::Time, min, max, interval).map(Domain::Range)
            }
            "duration" => {
                let min = duration_field(&map, "min")?;
                let max = duration_field(&map, "max")?;
                let interval = duration_field(&map, "interval")?;
                RangeDomain::new(RangeKind::Duration, min, max, interval).map(Domain::Range)
            }
            "default" => {
                let limit = match map.get("limit") {
                    None | Some(Json::Null) => default_limit,
                    Some(limit) => limit.as_u64().map(|l| l as usize).ok_or_else(|| {
                        JxError::invalid_query("Expecting domain limit to be a non-negative integer")
                    })?,
                };
                Ok(Self::default_with_limit(Some(limit)))
            }
            "rownum" => Err(JxError::invalid_query(
                "rownum domains are only produced for set-operation cubes",
            )),
            other => Err(JxError::invalid_query("Unknown domain type {type}").with_param("type", other)),
        }
    }

    /// Domain type name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Domain::Set(_) => "set",
            Domain::Range(r) => match r.kind {
                RangeKind::Range => "range",
                RangeKind::Time => "time",
                RangeKind::Duration => "duration",
            },
            Domain::Rownum { .. } => "rownum",
            Domain::Default(_) => "default",
        }
    }

    /// True when partitions follow a numeric order (range, time, duration, rownum).
    pub fn is_ordered(&self) -> bool {
        matches!(self, Domain::Range(_) | Domain::Rownum { .. })
    }

    /// True when partitions are learned while scanning.
    pub fn is_default(&self) -> bool {
        matches!(self, Domain::Default(_))
    }

    /// True when string values can never land in a partition.
    pub fn rejects_strings(&self) -> bool {
        matches!(self, Domain::Range(_))
    }

    /// Partition index for `value`, or `None` for the null partition.
    pub fn locate(&self, value: &Value) -> Option<usize> {
        if value.is_missing() {
            return None;
        }
        match self {
            Domain::Set(set) => set.index.get(&ValueKey(value.clone())).copied(),
            Domain::Range(range) => range.locate(value),
            Domain::Rownum { count } => value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as usize)
                .filter(|idx| idx < count),
            Domain::Default(default) => default.locate(value),
        }
    }

    /// Like [`Domain::locate`], but default domains learn unseen values
    /// until their limit is reached.
    pub fn locate_or_learn(&mut self, value: &Value) -> Option<usize> {
        match self {
            Domain::Default(default) if !value.is_missing() => default.learn(value),
            other => other.locate(value),
        }
    }

    /// Number of partitions, excluding the null partition.
    pub fn len(&self) -> usize {
        match self {
            Domain::Set(set) => set.partitions.len(),
            Domain::Range(range) => range.count,
            Domain::Rownum { count } => *count,
            Domain::Default(default) => default.parts.len(),
        }
    }

    /// True when the domain has no partitions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value reported for partition `idx` in list and table output.
    pub fn partition_value(&self, idx: usize) -> Value {
        match self {
            Domain::Set(set) => set.value_of(idx),
            Domain::Range(range) => range.wrap(range.bound(idx)),
            Domain::Rownum { .. } => Value::from(idx),
            Domain::Default(default) => default.parts.get(idx).cloned().unwrap_or_default(),
        }
    }

    /// Materialised description used for cube edges.
    pub fn describe(&self) -> Value {
        let mut out = Object::new();
        let kind = match self {
            Domain::Default(_) => "set",
            other => other.kind_name(),
        };
        out.insert("type".into(), Value::from(kind));
        match self {
            Domain::Set(set) => {
                if let Some(key) = &set.key {
                    out.insert("key".into(), Value::from(key.join(".")));
                }
                out.insert("partitions".into(), Value::Array(set.partitions.clone()));
            }
            Domain::Default(default) => {
                out.insert("partitions".into(), Value::Array(default.parts.clone()));
            }
            Domain::Range(range) => {
                out.insert("min".into(), range.wrap(range.min));
                out.insert("max".into(), range.wrap(range.max));
                out.insert("interval".into(), Value::from_f64(range.interval));
                let parts = (0..range.count)
                    .map(|idx| {
                        let mut part = Object::new();
                        part.insert("min".into(), range.wrap(range.bound(idx)));
                        let upper = range.bound(idx + 1).min(range.max);
                        part.insert("max".into(), range.wrap(upper));
                        Value::Object(part)
                    })
                    .collect();
                out.insert("partitions".into(), Value::Array(parts));
            }
            Domain::Rownum { count } => {
                out.insert("min".into(), Value::Int(0));
                out.insert("max".into(), Value::from(*count));
                out.insert("interval".into(), Value::Int(1));
            }
        }
        Value::Object(out)
    }
}

fn number_field(map: &serde_json::Map<String, Json>, key: &'static str) -> Result<f64> {
    map.get(key).and_then(Json::as_f64).ok_or_else(|| {
        JxError::invalid_query("Expecting {key} to be a number").with_param("key", key)
    })
}

fn time_field(map: &serde_json::Map<String, Json>, key: &'static str) -> Result<f64> {
    match map.get(key) {
        Some(Json::Number(n)) => n.as_f64().ok_or_else(|| time_error(key, n)),
        Some(Json::String(s)) => parse_date(s).ok_or_else(|| time_error(key, s)),
        other => Err(time_error(key, other.unwrap_or(&Json::Null))),
    }
}

fn time_error(key: &'static str, found: impl std::fmt::Display) -> JxError {
    JxError::invalid_query("Can not parse {key} ({value}) as a time")
        .with_param("key", key)
        .with_param("value", found)
}

fn duration_field(map: &serde_json::Map<String, Json>, key: &'static str) -> Result<f64> {
    match map.get(key) {
        Some(Json::Number(n)) => n.as_f64().ok_or_else(|| time_error(key, n)),
        Some(Json::String(s)) => parse_duration(s),
        other => Err(time_error(key, other.unwrap_or(&Json::Null))),
    }
}

/// Parses fixed-length durations such as `"day"`, `"3hour"` or `"2weeks"`.
pub fn parse_duration(text: &str) -> Result<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount = if amount.is_empty() {
        1.0
    } else {
        amount.parse::<f64>().map_err(|_| duration_error(text))?
    };
    let unit = unit.trim().trim_end_matches('s');
    let seconds = match unit {
        "second" | "" => 1.0,
        "minute" => 60.0,
        "hour" => 3_600.0,
        "day" => 86_400.0,
        "week" => 604_800.0,
        _ => return Err(duration_error(text)),
    };
    Ok(amount * seconds)
}

fn duration_error(text: &str) -> JxError {
    JxError::invalid_query("Interval {interval} is not a fixed duration").with_param("interval", text)
}
