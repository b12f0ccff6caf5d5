//! Constant folding.

use super::{Expr, ExprType, RecordContext};
use crate::value::Value;

impl Expr {
    /// Flattens nested `and`/`or`, drops identities, and folds constant
    /// subtrees. Subtrees that fail to evaluate are left as written so the
    /// error surfaces at execution time.
    pub fn simplify(self) -> Expr {
        match self {
            Expr::And(terms) => simplify_junction(terms, true),
            Expr::Or(terms) => simplify_junction(terms, false),
            Expr::Not(term) => fold(Expr::Not(Box::new(term.simplify()))),
            other => fold(other),
        }
    }
}

fn fold(expr: Expr) -> Expr {
    if matches!(expr, Expr::Literal(_)) || !expr.is_constant() {
        return expr;
    }
    let empty = Value::Null;
    match expr.eval(&RecordContext(&empty)) {
        Ok(value) => Expr::Literal(value),
        Err(_) => expr,
    }
}

fn simplify_junction(terms: Vec<Expr>, is_and: bool) -> Expr {
    let mut out = Vec::with_capacity(terms.len());
    for term in terms {
        match term.simplify() {
            Expr::And(inner) if is_and => out.extend(inner),
            Expr::Or(inner) if !is_and => out.extend(inner),
            Expr::Literal(Value::Bool(b)) if b == is_and => {}
            Expr::Literal(Value::Bool(b)) => return Expr::literal(b),
            other => out.push(other),
        }
    }
    if out.len() == 1 && out[0].type_of() == ExprType::Boolean {
        return out.remove(0);
    }
    if out.is_empty() {
        return Expr::literal(is_and);
    }
    if is_and {
        Expr::And(out)
    } else {
        Expr::Or(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use serde_json::json;

    #[test]
    fn folds_constant_subtrees() {
        let expr = parse(&json!({"add": [1, {"mult": [2, 3]}]})).expect("parse").simplify();
        assert_eq!(expr, Expr::literal(7i64));
    }

    #[test]
    fn drops_identities_and_flattens() {
        let expr = parse(&json!({"and": [true, {"and": [{"exists": "a"}, {"exists": "b"}]}]}))
            .expect("parse")
            .simplify();
        assert!(matches!(expr, Expr::And(ref terms) if terms.len() == 2));
        let single = parse(&json!({"and": [true, {"exists": "a"}]})).expect("parse").simplify();
        assert!(matches!(single, Expr::Exists(_)));
    }

    #[test]
    fn regex_over_a_field_is_not_folded() {
        let expr = parse(&json!({"regex": {"name": ".*r.*"}})).expect("parse");
        assert!(!expr.is_constant());
        assert_eq!(expr.vars().len(), 1);
        assert!(matches!(expr.simplify(), Expr::Regex { .. }));
    }

    #[test]
    fn short_circuits_on_absorbing_literal() {
        let expr = parse(&json!({"or": [{"exists": "a"}, true]})).expect("parse").simplify();
        assert!(expr.is_true());
    }
}
