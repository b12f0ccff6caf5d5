//! Static type inference.

use std::fmt;

use super::{ArithOp, Expr, UnaryOp};
use crate::schema::ColumnType;
use crate::value::Value;

/// Type inferred for an expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExprType {
    /// Three-valued boolean.
    Boolean,
    /// Whole number.
    Integer,
    /// Any number.
    Number,
    /// Text.
    String,
    /// Timestamp.
    Time,
    /// Mapping.
    Object,
    /// Sequence or tuple.
    Array,
    /// Unknown or mixed.
    Any,
}

impl ExprType {
    /// Type of a literal.
    pub fn of_value(value: &Value) -> ExprType {
        match value {
            Value::Bool(_) => ExprType::Boolean,
            Value::Int(_) => ExprType::Integer,
            Value::Float(_) => ExprType::Number,
            Value::String(_) => ExprType::String,
            Value::Timestamp(_) => ExprType::Time,
            Value::Array(_) => ExprType::Array,
            Value::Object(_) => ExprType::Object,
            Value::Null => ExprType::Any,
        }
    }

    /// Type of a column.
    pub fn of_column(column_type: ColumnType) -> ExprType {
        match column_type {
            ColumnType::Boolean | ColumnType::Exists => ExprType::Boolean,
            ColumnType::Integer => ExprType::Integer,
            ColumnType::Double => ExprType::Number,
            ColumnType::String => ExprType::String,
            ColumnType::Nested => ExprType::Array,
            ColumnType::Object => ExprType::Object,
        }
    }

    /// Least upper bound of two types.
    pub fn union(self, other: ExprType) -> ExprType {
        match (self, other) {
            (a, b) if a == b => a,
            (ExprType::Integer, ExprType::Number) | (ExprType::Number, ExprType::Integer) => {
                ExprType::Number
            }
            _ => ExprType::Any,
        }
    }

    /// True for integer, number and time.
    pub fn is_numeric(self) -> bool {
        matches!(self, ExprType::Integer | ExprType::Number | ExprType::Time)
    }

    /// Lower-case name for explain output.
    pub fn as_str(self) -> &'static str {
        match self {
            ExprType::Boolean => "boolean",
            ExprType::Integer => "integer",
            ExprType::Number => "number",
            ExprType::String => "string",
            ExprType::Time => "time",
            ExprType::Object => "object",
            ExprType::Array => "array",
            ExprType::Any => "any",
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Expr {
    /// Infers the static type from operands and bound columns.
    pub fn type_of(&self) -> ExprType {
        match self {
            Expr::Literal(value) => ExprType::of_value(value),
            Expr::Var(var) => var.ty,
            Expr::Tuple(_) => ExprType::Array,
            Expr::Not(_)
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Compare { .. }
            | Expr::In { .. }
            | Expr::Missing(_)
            | Expr::Exists(_)
            | Expr::Prefix { .. }
            | Expr::Suffix { .. }
            | Expr::Regex { .. } => ExprType::Boolean,
            Expr::Arith { op, terms, .. } => {
                let all_int = terms.iter().all(|t| t.type_of() == ExprType::Integer);
                match op {
                    ArithOp::Div => ExprType::Number,
                    _ if all_int => ExprType::Integer,
                    _ => ExprType::Number,
                }
            }
            Expr::Count(_) => ExprType::Integer,
            Expr::Unary { op, term, .. } => match op {
                UnaryOp::Length => ExprType::Integer,
                UnaryOp::Number => ExprType::Number,
                UnaryOp::String => ExprType::String,
                UnaryOp::Boolean => ExprType::Boolean,
                UnaryOp::Abs => term.type_of(),
                UnaryOp::Date => ExprType::Time,
                UnaryOp::First | UnaryOp::Last => ExprType::Any,
            },
            Expr::Floor { term, .. } => match term.type_of() {
                ExprType::Time => ExprType::Time,
                _ => ExprType::Number,
            },
            Expr::Find { .. } => ExprType::Integer,
            Expr::Slice { .. } | Expr::Between { .. } | Expr::Concat { .. } => ExprType::String,
            Expr::When {
                then, otherwise, ..
            } => match otherwise {
                Some(otherwise) => then.type_of().union(otherwise.type_of()),
                None => then.type_of(),
            },
            Expr::Coalesce(terms) => terms
                .iter()
                .map(Expr::type_of)
                .reduce(ExprType::union)
                .unwrap_or(ExprType::Any),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use serde_json::json;

    #[test]
    fn infers_operator_types() {
        let ty = |json| parse(&json).expect("parse").type_of();
        assert_eq!(ty(json!({"add": [1, 2]})), ExprType::Integer);
        assert_eq!(ty(json!({"add": [1, 2.5]})), ExprType::Number);
        assert_eq!(ty(json!({"div": [4, 2]})), ExprType::Number);
        assert_eq!(ty(json!({"eq": {"a": 1}})), ExprType::Boolean);
        assert_eq!(ty(json!({"concat": ["a", "b"]})), ExprType::String);
        assert_eq!(ty(json!({"coalesce": [1, 2.0]})), ExprType::Number);
    }
}
