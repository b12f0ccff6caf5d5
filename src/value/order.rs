//! Total order, equality and hashing over [`Value`].

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::Value;

/// Rank of each type; null sorts last.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Int(_) | Value::Timestamp(_) => 1,
        Value::Float(f) if !f.is_nan() => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Float(_) | Value::Null => 5,
    }
}

/// Integral floats within i64 range compare and hash as integers.
fn integral(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(x), other) | (other, Value::Int(x)) => {
            let flipped = !matches!(a, Value::Int(_));
            let f = other.as_f64().unwrap_or(f64::NAN);
            let ord = match integral(f) {
                Some(i) => x.cmp(&i),
                None => (*x as f64).partial_cmp(&f).unwrap_or(Ordering::Equal),
            };
            if flipped {
                ord.reverse()
            } else {
                ord
            }
        }
        _ => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
    }
}

/// Total order: booleans, then numbers, strings, sequences, mappings, and
/// finally null. Mapping entries whose value is null are ignored.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                let ord = compare(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xs), Value::Object(ys)) => {
            let mut left = xs.iter().filter(|(_, v)| !matches!(v, Value::Null));
            let mut right = ys.iter().filter(|(_, v)| !matches!(v, Value::Null));
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some((ka, va)), Some((kb, vb))) => {
                        let ord = ka.cmp(kb).then_with(|| compare(va, vb));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                }
            }
        }
        _ if ra == 1 => compare_numbers(a, b),
        _ => Ordering::Equal,
    }
}

/// Hashable wrapper whose equality agrees with [`compare`].
#[derive(Clone, Debug)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        compare(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    let rank = type_rank(value);
    state.write_u8(rank);
    match value {
        Value::Bool(b) => b.hash(state),
        Value::Int(i) => i.hash(state),
        Value::Float(f) | Value::Timestamp(f) if rank == 1 => match integral(*f) {
            Some(i) => i.hash(state),
            None => f.to_bits().hash(state),
        },
        Value::String(s) => s.hash(state),
        Value::Array(items) => {
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            for (key, value) in map.iter().filter(|(_, v)| !matches!(v, Value::Null)) {
                key.hash(state);
                hash_value(value, state);
            }
        }
        _ => {}
    }
}
