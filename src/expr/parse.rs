//! JSON → [`Expr`] parser.
//!
//! Strings are variable names, numbers/booleans/null are literals, arrays are
//! tuples, and objects carry exactly one operator key beside optional option
//! keys. Operands come either as an array (`{"add": ["a", 1]}`) or as a
//! single-variable mapping whose value is a literal (`{"gt": {"a": 1}}`).

use serde_json::Value as Json;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use super::{ArithOp, CompareOp, Expr, NullPolicy, Pattern, SliceOp, UnaryOp};
use crate::error::{JxError, Result};
use crate::value::Value;

const OPTION_KEYS: &[&str] = &["default", "nulls", "separator", "start", "then", "else"];

/// Parses one expression.
pub fn parse(json: &Json) -> Result<Expr> {
    match json {
        Json::Null | Json::Bool(_) | Json::Number(_) => {
            Ok(Expr::Literal(Value::from_json(json.clone())))
        }
        Json::String(name) if name.is_empty() => Err(JxError::invalid_query("expression is empty")),
        Json::String(name) => Ok(Expr::var(name.as_str())),
        Json::Array(items) => Ok(Expr::Tuple(
            items.iter().map(parse).collect::<Result<Vec<_>>>()?,
        )),
        Json::Object(map) => {
            if let Some(literal) = map.get("literal") {
                return Ok(Expr::Literal(Value::from_json(literal.clone())));
            }
            let op_keys: Vec<&str> = map
                .keys()
                .map(String::as_str)
                .filter(|key| !OPTION_KEYS.contains(key))
                .collect();
            let op = if op_keys.contains(&"between") {
                "between"
            } else {
                match op_keys.as_slice() {
                    [op] => *op,
                    [] => {
                        return Err(JxError::invalid_query("Expecting an operator in {expr}")
                            .with_param("expr", json))
                    }
                    _ => {
                        return Err(JxError::invalid_query(
                            "Expecting one operator, found {ops}",
                        )
                        .with_param("ops", op_keys.join(", ")))
                    }
                }
            };
            let args = &map[op];
            let opts = Options { map };
            parse_op(op, args, &opts)
        }
    }
}

struct Options<'a> {
    map: &'a serde_json::Map<String, Json>,
}

impl Options<'_> {
    fn expr(&self, key: &str) -> Result<Option<Box<Expr>>> {
        self.map
            .get(key)
            .map(|json| parse(json).map(Box::new))
            .transpose()
    }

    /// Options whose string values are literal text rather than variables.
    fn text(&self, key: &str) -> Result<Option<Box<Expr>>> {
        match self.map.get(key) {
            Some(Json::String(s)) => Ok(Some(Box::new(Expr::literal(s.as_str())))),
            _ => self.expr(key),
        }
    }

    fn policy(&self) -> Result<NullPolicy> {
        let nulls = match self.map.get("nulls") {
            None | Some(Json::Null) => false,
            Some(Json::Bool(b)) => *b,
            Some(other) => {
                return Err(JxError::invalid_query("Expecting nulls to be a boolean, not {value}")
                    .with_param("value", other))
            }
        };
        Ok(NullPolicy {
            nulls,
            default: self.expr("default")?,
        })
    }

    fn separator(&self) -> Result<String> {
        match self.map.get("separator") {
            None | Some(Json::Null) => Ok(String::new()),
            Some(Json::String(s)) => Ok(s.clone()),
            Some(other) => Err(JxError::invalid_query(
                "Expecting separator to be a string, not {value}",
            )
            .with_param("value", other)),
        }
    }
}

fn parse_op(op: &str, args: &Json, opts: &Options<'_>) -> Result<Expr> {
    let expr = match op {
        "and" | "or" => {
            let terms = match args {
                Json::Array(items) => items.iter().map(parse).collect::<Result<Vec<_>>>()?,
                Json::Null => Vec::new(),
                single => vec![parse(single)?],
            };
            if op == "and" {
                Expr::And(terms)
            } else {
                Expr::Or(terms)
            }
        }
        "not" => Expr::Not(Box::new(single(op, args)?)),
        "eq" | "ne" | "gt" | "gte" | "lt" | "lte" => compare(op, args)?,
        "in" => {
            let [value, set] = pair(op, args)?;
            Expr::In {
                value: Box::new(value),
                set: Box::new(set),
            }
        }
        "missing" => Expr::Missing(Box::new(single(op, args)?)),
        "exists" => Expr::Exists(Box::new(single(op, args)?)),
        "add" | "sum" | "mult" | "mul" | "multiply" => {
            let arith = if matches!(op, "add" | "sum") {
                ArithOp::Add
            } else {
                ArithOp::Mult
            };
            Expr::Arith {
                op: arith,
                terms: terms(op, args)?,
                policy: opts.policy()?,
            }
        }
        "sub" | "subtract" | "div" | "divide" | "mod" => {
            let arith = match op {
                "sub" | "subtract" => ArithOp::Sub,
                "div" | "divide" => ArithOp::Div,
                _ => ArithOp::Mod,
            };
            Expr::Arith {
                op: arith,
                terms: pair(op, args)?.into(),
                policy: opts.policy()?,
            }
        }
        "count" => Expr::Count(terms(op, args)?),
        "length" | "number" | "string" | "boolean" | "abs" | "first" | "last" => {
            let unary = match op {
                "length" => UnaryOp::Length,
                "number" => UnaryOp::Number,
                "string" => UnaryOp::String,
                "boolean" => UnaryOp::Boolean,
                "abs" => UnaryOp::Abs,
                "first" => UnaryOp::First,
                _ => UnaryOp::Last,
            };
            Expr::Unary {
                op: unary,
                term: Box::new(single(op, args)?),
                default: opts.expr("default")?,
            }
        }
        "date" => {
            let term = match args {
                Json::String(text) => match parse_date(text) {
                    Some(ts) => Expr::Literal(Value::Timestamp(ts)),
                    None => parse(args)?,
                },
                other => single(op, other)?,
            };
            Expr::Unary {
                op: UnaryOp::Date,
                term: Box::new(term),
                default: opts.expr("default")?,
            }
        }
        "floor" => {
            let mut items = terms(op, args)?;
            if items.is_empty() || items.len() > 2 {
                return Err(arity(op, "one or two"));
            }
            let modulus = (items.len() == 2).then(|| Box::new(items.remove(1)));
            Expr::Floor {
                term: Box::new(items.remove(0)),
                modulus,
                default: opts.expr("default")?,
            }
        }
        "left" | "right" | "not_left" | "not_right" => {
            let slice = match op {
                "left" => SliceOp::Left,
                "right" => SliceOp::Right,
                "not_left" => SliceOp::NotLeft,
                _ => SliceOp::NotRight,
            };
            let [term, length] = pair(op, args)?;
            Expr::Slice {
                op: slice,
                term: Box::new(term),
                length: Box::new(length),
            }
        }
        "find" => {
            let [term, find] = pair(op, args)?;
            Expr::Find {
                term: Box::new(term),
                find: Box::new(find),
                start: opts.expr("start")?,
                default: opts.expr("default")?,
            }
        }
        "between" => between(args, opts)?,
        "prefix" | "suffix" => {
            let [term, affix] = pair(op, args)?;
            if op == "prefix" {
                Expr::Prefix {
                    term: Box::new(term),
                    prefix: Box::new(affix),
                }
            } else {
                Expr::Suffix {
                    term: Box::new(term),
                    suffix: Box::new(affix),
                }
            }
        }
        "regex" => {
            let (term, source) = match args {
                Json::Object(map) if map.len() == 1 => {
                    let (name, pattern) = map.iter().next().ok_or_else(|| arity(op, "one"))?;
                    (Expr::var(name.as_str()), pattern)
                }
                Json::Array(items) if items.len() == 2 => (parse(&items[0])?, &items[1]),
                _ => return Err(arity(op, "two")),
            };
            let source = match source {
                Json::String(s) => s.as_str(),
                Json::Object(map) => match map.get("literal") {
                    Some(Json::String(s)) => s.as_str(),
                    _ => return Err(pattern_error(source)),
                },
                other => return Err(pattern_error(other)),
            };
            Expr::Regex {
                term: Box::new(term),
                pattern: Pattern::new(source)?,
            }
        }
        "concat" => Expr::Concat {
            terms: terms(op, args)?,
            separator: opts.separator()?,
            policy: opts.policy()?,
        },
        "when" => Expr::When {
            cond: Box::new(parse(args)?),
            then: opts.expr("then")?.unwrap_or_else(|| Box::new(Expr::Literal(Value::Null))),
            otherwise: opts.expr("else")?,
        },
        "coalesce" => Expr::Coalesce(terms(op, args)?),
        unknown => {
            return Err(JxError::invalid_query("{op} is not a known operator").with_param("op", unknown))
        }
    };
    Ok(expr)
}

fn arity(op: &str, expected: &str) -> JxError {
    JxError::invalid_query("Expecting {expected} operands for {op}")
        .with_param("expected", expected)
        .with_param("op", op)
}

fn pattern_error(found: &Json) -> JxError {
    JxError::invalid_query("Expecting regex pattern to be a string, not {value}").with_param("value", found)
}

fn single(op: &str, args: &Json) -> Result<Expr> {
    match args {
        Json::Array(items) if items.len() == 1 => parse(&items[0]),
        Json::Array(_) => Err(arity(op, "one")),
        other => parse(other),
    }
}

/// Operand list: arrays parse element-wise, a one-key mapping is a
/// variable/literal pair, anything else is a single operand.
fn terms(op: &str, args: &Json) -> Result<Vec<Expr>> {
    match args {
        Json::Array(items) => items.iter().map(parse).collect(),
        Json::Object(map) if map.len() == 1 && !map.contains_key("literal") && !is_operator(map) => {
            let (name, literal) = map.iter().next().ok_or_else(|| arity(op, "two"))?;
            Ok(vec![Expr::var(name.as_str()), Expr::Literal(Value::from_json(literal.clone()))])
        }
        other => Ok(vec![parse(other)?]),
    }
}

/// Two operands. A one-key mapping is always a variable/literal pair, even
/// when the field shares its name with an operator.
fn pair(op: &str, args: &Json) -> Result<[Expr; 2]> {
    let items = match args {
        Json::Object(map) if map.len() == 1 && !map.contains_key("literal") => {
            let (name, literal) = map.iter().next().ok_or_else(|| arity(op, "two"))?;
            vec![Expr::var(name.as_str()), Expr::Literal(Value::from_json(literal.clone()))]
        }
        other => terms(op, other)?,
    };
    <[Expr; 2]>::try_from(items).map_err(|_| arity(op, "two"))
}

fn is_operator(map: &serde_json::Map<String, Json>) -> bool {
    map.keys().any(|key| KNOWN_OPS.contains(&key.as_str()))
}

const KNOWN_OPS: &[&str] = &[
    "and", "or", "not", "eq", "ne", "gt", "gte", "lt", "lte", "in", "missing", "exists", "add",
    "sum", "mult", "mul", "multiply", "sub", "subtract", "div", "divide", "mod", "count",
    "length", "number", "string", "boolean", "abs", "first", "last", "date", "floor", "left",
    "right", "not_left", "not_right", "find", "between", "prefix", "suffix", "regex", "concat",
    "when", "coalesce",
];

fn compare(op: &str, args: &Json) -> Result<Expr> {
    let cmp = match op {
        "eq" => CompareOp::Eq,
        "ne" => CompareOp::Ne,
        "gt" => CompareOp::Gt,
        "gte" => CompareOp::Gte,
        "lt" => CompareOp::Lt,
        _ => CompareOp::Lte,
    };
    let build = |lhs: Expr, rhs: Expr| Expr::Compare {
        op: cmp,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    };
    match args {
        Json::Object(map) if map.len() > 1 && !map.contains_key("literal") => Ok(Expr::And(
            map.iter()
                .map(|(name, literal)| {
                    build(
                        Expr::var(name.as_str()),
                        Expr::Literal(Value::from_json(literal.clone())),
                    )
                })
                .collect(),
        )),
        other => {
            let [lhs, rhs] = pair(op, other)?;
            Ok(build(lhs, rhs))
        }
    }
}

fn between(args: &Json, opts: &Options<'_>) -> Result<Expr> {
    let (term, prefix, suffix) = match args {
        Json::Object(map) if map.len() == 1 && !map.contains_key("literal") => {
            let (name, bounds) = map.iter().next().ok_or_else(|| arity("between", "three"))?;
            let [prefix, suffix] = match bounds {
                Json::Array(items) if items.len() == 2 => [
                    Expr::Literal(Value::from_json(items[0].clone())),
                    Expr::Literal(Value::from_json(items[1].clone())),
                ],
                _ => return Err(arity("between", "two bound")),
            };
            (Expr::var(name.as_str()), prefix, suffix)
        }
        Json::Array(items) if items.len() == 3 => (parse(&items[0])?, parse(&items[1])?, parse(&items[2])?),
        other => {
            let term = parse(other)?;
            let prefix = opts.text("prefix")?.map(|e| *e).unwrap_or(Expr::Literal(Value::Null));
            let suffix = opts.text("suffix")?.map(|e| *e).unwrap_or(Expr::Literal(Value::Null));
            (term, prefix, suffix)
        }
    };
    Ok(Expr::Between {
        term: Box::new(term),
        prefix: Box::new(prefix),
        suffix: Box::new(suffix),
        start: opts.expr("start")?,
        default: opts.expr("default")?,
    })
}

/// Parses an RFC 3339 timestamp or a `YYYY-MM-DD` date into epoch seconds.
pub fn parse_date(text: &str) -> Option<f64> {
    if let Ok(moment) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(moment.unix_timestamp_nanos() as f64 / 1e9);
    }
    let date = Date::parse(text, format_description!("[year]-[month]-[day]")).ok()?;
    Some(date.midnight().assume_utc().unix_timestamp() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn empty_variable_is_rejected() {
        let err = parse(&json!("")).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
        assert_eq!(err.to_string(), "expression is empty");
    }

    #[test]
    fn fields_named_like_operators_stay_variables() {
        let expr = parse(&json!({"eq": {"count": 2}})).expect("parse");
        assert_eq!(expr.to_string(), "eq(count, 2)");
        let expr = parse(&json!({"eq": {"date": "y", "first": 1}})).expect("parse");
        assert!(matches!(expr, Expr::And(ref terms) if terms.len() == 2));
        let expr = parse(&json!({"prefix": {"string": "ab"}})).expect("parse");
        assert_eq!(expr.vars().len(), 1);
        let expr = parse(&json!({"in": {"last": [1, 2]}})).expect("parse");
        assert_eq!(expr.vars()[0].name, "last");
    }

    #[test]
    fn object_form_eq_is_a_conjunction() {
        let expr = parse(&json!({"eq": {"a": 1, "b": "x"}})).expect("parse");
        assert!(matches!(expr, Expr::And(ref terms) if terms.len() == 2));
    }

    #[test]
    fn options_sit_beside_the_operator() {
        let expr = parse(&json!({"add": ["a", "b"], "default": 0, "nulls": true})).expect("parse");
        match expr {
            Expr::Arith { policy, .. } => {
                assert!(policy.nulls);
                assert_eq!(policy.default.as_deref(), Some(&Expr::literal(0i64)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn between_accepts_literal_bounds() {
        let expr = parse(&json!({"between": {"v": [null, "/is"]}})).expect("parse");
        match expr {
            Expr::Between { prefix, suffix, .. } => {
                assert_eq!(*prefix, Expr::Literal(Value::Null));
                assert_eq!(*suffix, Expr::literal("/is"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_operator_is_reported() {
        let err = parse(&json!({"frobnicate": "a"})).expect_err("unknown");
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn bad_regex_is_invalid_query() {
        let err = parse(&json!({"regex": {"a": "("}})).expect_err("bad regex");
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn parses_dates() {
        assert_eq!(parse_date("1970-01-02"), Some(86_400.0));
        assert_eq!(parse_date("1970-01-01T00:01:00Z"), Some(60.0));
        assert_eq!(parse_date("yesterday"), None);
    }
}
