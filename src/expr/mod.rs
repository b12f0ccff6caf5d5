//! Expression language: a closed tree of operators over [`Value`]s.
//!
//! Expressions are parsed from JSON by [`parse`], bound to row levels by the
//! planner, folded by [`Expr::simplify`], and evaluated per row through a
//! [`RowContext`].

#![forbid(unsafe_code)]

mod eval;
mod parse;
mod simplify;
mod types;

use std::fmt;

use regex::Regex;

pub use eval::{RecordContext, RowContext};
pub use parse::{parse, parse_date};
pub use types::ExprType;

use crate::value::path::split_field;
use crate::value::Value;

/// How a variable is read from its level.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Reader {
    /// Descends mapping keys only; one value per row.
    Scalar,
    /// Broadcasts over sequences crossed on the way down.
    Vector,
}

/// Where a variable is read from.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    /// Row level: `0` is the document, deeper levels are nested elements.
    pub level: usize,
    /// Path relative to that level.
    pub parts: Vec<String>,
    /// Reader chosen at planning time.
    pub reader: Reader,
}

impl Binding {
    /// Scalar binding at `level`.
    pub fn scalar(level: usize, parts: Vec<String>) -> Self {
        Self {
            level,
            parts,
            reader: Reader::Scalar,
        }
    }
}

/// A named variable and its binding.
#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    /// Name as written in the query.
    pub name: String,
    /// Full dotted field from the document root once bound.
    pub field: String,
    /// Resolved read location.
    pub binding: Binding,
    /// Static type from the schema, when known.
    pub ty: ExprType,
    /// False when no column backs the name.
    pub known: bool,
}

impl Var {
    /// Unbound variable read from the document root.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let parts = split_field(&name);
        Self {
            field: name.clone(),
            name,
            binding: Binding::scalar(0, parts),
            ty: ExprType::Any,
            known: false,
        }
    }

    /// True for `.`.
    pub fn is_self(&self) -> bool {
        self.name == "."
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `gt`
    Gt,
    /// `gte`
    Gte,
    /// `lt`
    Lt,
    /// `lte`
    Lte,
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArithOp {
    /// Variadic sum.
    Add,
    /// Binary difference.
    Sub,
    /// Variadic product.
    Mult,
    /// Binary quotient.
    Div,
    /// Binary modulo, sign of the divisor.
    Mod,
}

/// Single-operand conversions and accessors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    /// Characters in a string or elements in a sequence.
    Length,
    /// Coerce to number.
    Number,
    /// Coerce to string.
    String,
    /// Coerce to boolean.
    Boolean,
    /// Absolute value.
    Abs,
    /// Coerce to timestamp.
    Date,
    /// First element of a sequence.
    First,
    /// Last element of a sequence.
    Last,
}

/// Character slicing operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SliceOp {
    /// Leading `n` characters.
    Left,
    /// Trailing `n` characters.
    Right,
    /// All but the leading `n` characters.
    NotLeft,
    /// All but the trailing `n` characters.
    NotRight,
}

/// Options shared by null-tolerant operators.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NullPolicy {
    /// Skip missing operands instead of propagating null.
    pub nulls: bool,
    /// Substituted when the result is missing or the operator traps.
    pub default: Option<Box<Expr>>,
}

/// Compiled regular expression, anchored to match the whole string.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles `source` for full-string matching.
    pub fn new(source: &str) -> crate::error::Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the whole of `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// Field read; `.` reads the whole row level.
    Var(Var),
    /// Ordered tuple.
    Tuple(Vec<Expr>),
    /// Three-valued negation.
    Not(Box<Expr>),
    /// Three-valued conjunction.
    And(Vec<Expr>),
    /// Three-valued disjunction.
    Or(Vec<Expr>),
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Membership test.
    In {
        /// Probe.
        value: Box<Expr>,
        /// Candidate set.
        set: Box<Expr>,
    },
    /// True when the operand is missing.
    Missing(Box<Expr>),
    /// True when the operand is present.
    Exists(Box<Expr>),
    /// Arithmetic.
    Arith {
        /// Operator.
        op: ArithOp,
        /// Operands.
        terms: Vec<Expr>,
        /// Null handling.
        policy: NullPolicy,
    },
    /// Number of non-missing operands.
    Count(Vec<Expr>),
    /// Single-operand conversions.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        term: Box<Expr>,
        /// Substituted when the result is missing.
        default: Option<Box<Expr>>,
    },
    /// Floor, optionally to a multiple of `modulus`.
    Floor {
        /// Operand.
        term: Box<Expr>,
        /// Bucket width.
        modulus: Option<Box<Expr>>,
        /// Substituted when the result is missing.
        default: Option<Box<Expr>>,
    },
    /// Character slicing.
    Slice {
        /// Operator.
        op: SliceOp,
        /// String operand.
        term: Box<Expr>,
        /// Character count.
        length: Box<Expr>,
    },
    /// Character index of `find` in `term`.
    Find {
        /// Searched string.
        term: Box<Expr>,
        /// Needle.
        find: Box<Expr>,
        /// Character offset to start from.
        start: Option<Box<Expr>>,
        /// Returned when not found.
        default: Option<Box<Expr>>,
    },
    /// Substring between `prefix` and the next `suffix`.
    Between {
        /// Searched string.
        term: Box<Expr>,
        /// Opening delimiter; null means the start of the string.
        prefix: Box<Expr>,
        /// Closing delimiter; null means the end of the string.
        suffix: Box<Expr>,
        /// Character offset to start from.
        start: Option<Box<Expr>>,
        /// Returned when a delimiter is not found.
        default: Option<Box<Expr>>,
    },
    /// String starts with.
    Prefix {
        /// Tested string.
        term: Box<Expr>,
        /// Expected prefix.
        prefix: Box<Expr>,
    },
    /// String ends with.
    Suffix {
        /// Tested string.
        term: Box<Expr>,
        /// Expected suffix.
        suffix: Box<Expr>,
    },
    /// Whole-string regular expression match.
    Regex {
        /// Tested string.
        term: Box<Expr>,
        /// Compiled pattern.
        pattern: Pattern,
    },
    /// String concatenation.
    Concat {
        /// Operands.
        terms: Vec<Expr>,
        /// Joiner placed between operands.
        separator: String,
        /// Null handling.
        policy: NullPolicy,
    },
    /// Conditional.
    When {
        /// Condition, tested for truthiness.
        cond: Box<Expr>,
        /// Result when true.
        then: Box<Expr>,
        /// Result otherwise; null when absent.
        otherwise: Option<Box<Expr>>,
    },
    /// First non-missing operand.
    Coalesce(Vec<Expr>),
}

impl Expr {
    /// Literal constructor.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Variable constructor.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(Var::new(name))
    }

    /// True when the expression reads no variables.
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.visit(&mut |expr| {
            if matches!(expr, Expr::Var(_)) {
                constant = false;
            }
        });
        constant
    }

    /// Literal true.
    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(true)))
    }

    /// Calls `f` on every node, parents first.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Calls `f` on every variable, mutably.
    pub fn visit_vars_mut(&mut self, f: &mut dyn FnMut(&mut Var)) {
        if let Expr::Var(var) = self {
            f(var);
            return;
        }
        for child in self.children_mut() {
            child.visit_vars_mut(f);
        }
    }

    /// Every variable read by the expression.
    pub fn vars(&self) -> Vec<&Var> {
        let mut out = Vec::new();
        self.visit(&mut |expr| {
            if let Expr::Var(var) = expr {
                out.push(var);
            }
        });
        out
    }

    fn children(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = Vec::new();
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Tuple(items)
            | Expr::And(items)
            | Expr::Or(items)
            | Expr::Count(items)
            | Expr::Coalesce(items) => out.extend(items),
            Expr::Not(e) | Expr::Missing(e) | Expr::Exists(e) => out.push(e),
            Expr::Regex { term, .. } => out.push(term),
            Expr::Compare { lhs, rhs, .. } => out.extend([&**lhs, &**rhs]),
            Expr::In { value, set } => out.extend([&**value, &**set]),
            Expr::Arith { terms, policy, .. } | Expr::Concat { terms, policy, .. } => {
                out.extend(terms);
                out.extend(policy.default.as_deref());
            }
            Expr::Unary { term, default, .. } => {
                out.push(term);
                out.extend(default.as_deref());
            }
            Expr::Floor {
                term,
                modulus,
                default,
            } => {
                out.push(term);
                out.extend(modulus.as_deref());
                out.extend(default.as_deref());
            }
            Expr::Slice { term, length, .. } => out.extend([&**term, &**length]),
            Expr::Find {
                term,
                find,
                start,
                default,
            } => {
                out.extend([&**term, &**find]);
                out.extend(start.as_deref());
                out.extend(default.as_deref());
            }
            Expr::Between {
                term,
                prefix,
                suffix,
                start,
                default,
            } => {
                out.extend([&**term, &**prefix, &**suffix]);
                out.extend(start.as_deref());
                out.extend(default.as_deref());
            }
            Expr::Prefix { term, prefix } => out.extend([&**term, &**prefix]),
            Expr::Suffix { term, suffix } => out.extend([&**term, &**suffix]),
            Expr::When {
                cond,
                then,
                otherwise,
            } => {
                out.extend([&**cond, &**then]);
                out.extend(otherwise.as_deref());
            }
        }
        out
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        let mut out: Vec<&mut Expr> = Vec::new();
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Tuple(items)
            | Expr::And(items)
            | Expr::Or(items)
            | Expr::Count(items)
            | Expr::Coalesce(items) => out.extend(items.iter_mut()),
            Expr::Not(e) | Expr::Missing(e) | Expr::Exists(e) => out.push(e),
            Expr::Regex { term, .. } => out.push(term),
            Expr::Compare { lhs, rhs, .. } => out.extend([&mut **lhs, &mut **rhs]),
            Expr::In { value, set } => out.extend([&mut **value, &mut **set]),
            Expr::Arith { terms, policy, .. } | Expr::Concat { terms, policy, .. } => {
                out.extend(terms.iter_mut());
                out.extend(policy.default.as_deref_mut());
            }
            Expr::Unary { term, default, .. } => {
                out.push(term);
                out.extend(default.as_deref_mut());
            }
            Expr::Floor {
                term,
                modulus,
                default,
            } => {
                out.push(term);
                out.extend(modulus.as_deref_mut());
                out.extend(default.as_deref_mut());
            }
            Expr::Slice { term, length, .. } => out.extend([&mut **term, &mut **length]),
            Expr::Find {
                term,
                find,
                start,
                default,
            } => {
                out.extend([&mut **term, &mut **find]);
                out.extend(start.as_deref_mut());
                out.extend(default.as_deref_mut());
            }
            Expr::Between {
                term,
                prefix,
                suffix,
                start,
                default,
            } => {
                out.extend([&mut **term, &mut **prefix, &mut **suffix]);
                out.extend(start.as_deref_mut());
                out.extend(default.as_deref_mut());
            }
            Expr::Prefix { term, prefix } => out.extend([&mut **term, &mut **prefix]),
            Expr::Suffix { term, suffix } => out.extend([&mut **term, &mut **suffix]),
            Expr::When {
                cond,
                then,
                otherwise,
            } => {
                out.extend([&mut **cond, &mut **then]);
                out.extend(otherwise.as_deref_mut());
            }
        }
        out
    }

    /// Splits a conjunction into its terms.
    pub fn conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::And(terms) => terms.into_iter().flat_map(Expr::conjuncts).collect(),
            other if other.is_true() => Vec::new(),
            other => vec![other],
        }
    }

    /// Rebuilds a conjunction from terms.
    pub fn conjoin(mut terms: Vec<Expr>) -> Expr {
        match terms.len() {
            0 => Expr::literal(true),
            1 => terms.remove(0),
            _ => Expr::And(terms),
        }
    }

    fn op_name(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Var(_) => "var",
            Expr::Tuple(_) => "tuple",
            Expr::Not(_) => "not",
            Expr::And(_) => "and",
            Expr::Or(_) => "or",
            Expr::Compare { op, .. } => match op {
                CompareOp::Eq => "eq",
                CompareOp::Ne => "ne",
                CompareOp::Gt => "gt",
                CompareOp::Gte => "gte",
                CompareOp::Lt => "lt",
                CompareOp::Lte => "lte",
            },
            Expr::In { .. } => "in",
            Expr::Missing(_) => "missing",
            Expr::Exists(_) => "exists",
            Expr::Arith { op, .. } => match op {
                ArithOp::Add => "add",
                ArithOp::Sub => "sub",
                ArithOp::Mult => "mult",
                ArithOp::Div => "div",
                ArithOp::Mod => "mod",
            },
            Expr::Count(_) => "count",
            Expr::Unary { op, .. } => match op {
                UnaryOp::Length => "length",
                UnaryOp::Number => "number",
                UnaryOp::String => "string",
                UnaryOp::Boolean => "boolean",
                UnaryOp::Abs => "abs",
                UnaryOp::Date => "date",
                UnaryOp::First => "first",
                UnaryOp::Last => "last",
            },
            Expr::Floor { .. } => "floor",
            Expr::Slice { op, .. } => match op {
                SliceOp::Left => "left",
                SliceOp::Right => "right",
                SliceOp::NotLeft => "not_left",
                SliceOp::NotRight => "not_right",
            },
            Expr::Find { .. } => "find",
            Expr::Between { .. } => "between",
            Expr::Prefix { .. } => "prefix",
            Expr::Suffix { .. } => "suffix",
            Expr::Regex { .. } => "regex",
            Expr::Concat { .. } => "concat",
            Expr::When { .. } => "when",
            Expr::Coalesce(_) => "coalesce",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value.to_json()),
            Expr::Var(var) => f.write_str(&var.name),
            Expr::Regex { term, pattern } => write!(f, "regex({term}, {:?})", pattern.source()),
            other => {
                write!(f, "{}(", other.op_name())?;
                for (idx, child) in other.children().into_iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}
