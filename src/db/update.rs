use serde::Deserialize;
use serde_json::{Map, Value as Json};

use crate::error::{JxError, Result};
use crate::expr::{parse, Expr, Reader};
use crate::query::spec::OneOrMany;
use crate::value::path::split_field;

/// Update command: `{"set": {field: expr}, "clear": fields, "where": expr}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateSpec {
    /// Fields to assign, each from an expression over the document.
    #[serde(default)]
    pub set: Map<String, Json>,
    /// Fields to remove.
    #[serde(default)]
    pub clear: Option<OneOrMany<String>>,
    /// Documents to touch; all when absent.
    #[serde(default, rename = "where")]
    pub filter: Option<Json>,
}

/// An update with its expressions parsed and bound at the document root.
pub(crate) struct BoundUpdate {
    pub filter: Expr,
    pub set: Vec<(Vec<String>, Expr)>,
    pub clear: Vec<Vec<String>>,
}

impl UpdateSpec {
    /// Reads an update command.
    pub fn from_json(json: &Json) -> Result<Self> {
        if !json.is_object() {
            return Err(
                JxError::invalid_query("Expecting an update object, not {update}")
                    .with_param("update", json),
            );
        }
        Ok(serde_json::from_value(json.clone())?)
    }

    pub(crate) fn bind(self) -> Result<BoundUpdate> {
        if self.set.is_empty() && self.clear.is_none() {
            return Err(JxError::invalid_query(
                "Expecting update to have a set or clear clause",
            ));
        }
        let filter = match &self.filter {
            Some(json) => root_bound(parse(json)?),
            None => Expr::Literal(true.into()),
        };
        let set = self
            .set
            .iter()
            .map(|(field, json)| Ok((split_field(field), root_bound(parse(json)?))))
            .collect::<Result<Vec<_>>>()?;
        let clear = self
            .clear
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .iter()
            .map(|field| split_field(field))
            .collect();
        Ok(BoundUpdate { filter, set, clear })
    }
}

/// Reads through sequences so nested fields resolve from the root.
fn root_bound(mut expr: Expr) -> Expr {
    expr.visit_vars_mut(&mut |var| var.binding.reader = Reader::Vector);
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_a_clause() {
        let err = UpdateSpec::from_json(&json!({"where": {"eq": {"a": 1}}}))
            .and_then(UpdateSpec::bind)
            .err()
            .expect("error");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidQuery);
    }

    #[test]
    fn binds_set_and_clear_paths() {
        let bound = UpdateSpec::from_json(&json!({
            "set": {"a.b": {"add": ["x", 1]}},
            "clear": "c.d",
        }))
        .and_then(UpdateSpec::bind)
        .expect("bind");
        assert_eq!(bound.set[0].0, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(bound.clear, vec![vec!["c".to_string(), "d".to_string()]]);
        assert!(bound.filter.is_true());
    }
}
