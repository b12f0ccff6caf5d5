//! Error type shared by every layer of the engine.
//!
//! Errors carry a kind, a human template with `{name}` placeholders, the named
//! parameters substituted into it, and an optional cause. The rendered message
//! is kept alongside the template so callers can match on either.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, JxError>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Surface syntax or typing problem in the query document.
    InvalidQuery,
    /// A variable required by an aggregate cannot be resolved.
    UnresolvedName,
    /// Data does not fit the shape the schema promised.
    SchemaMismatch,
    /// A value's type is incompatible with a domain.
    DomainError,
    /// Arithmetic trap not recovered by a `default`.
    ExecutionError,
    /// Failure reported by the storage adapter.
    BackendError,
    /// The query was cancelled cooperatively.
    Cancelled,
}

impl ErrorKind {
    /// Returns a stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "InvalidQuery",
            ErrorKind::UnresolvedName => "UnresolvedName",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::DomainError => "DomainError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::BackendError => "BackendError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Engine error with templated message and optional cause chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JxError {
    kind: ErrorKind,
    template: Cow<'static, str>,
    params: Vec<(&'static str, String)>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl JxError {
    /// Creates an error of `kind` from a message template.
    pub fn new(kind: ErrorKind, template: impl Into<Cow<'static, str>>) -> Self {
        let template = template.into();
        let message = template.to_string();
        Self {
            kind,
            template,
            params: Vec::new(),
            message,
            cause: None,
        }
    }

    /// Shorthand for [`ErrorKind::InvalidQuery`].
    pub fn invalid_query(template: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidQuery, template)
    }

    /// Shorthand for [`ErrorKind::UnresolvedName`] naming the variable.
    pub fn unresolved(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new(ErrorKind::UnresolvedName, "Can not resolve {name} to a column")
            .with_param("name", name)
    }

    /// Shorthand for [`ErrorKind::DomainError`].
    pub fn domain(template: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::DomainError, template)
    }

    /// Shorthand for [`ErrorKind::ExecutionError`].
    pub fn execution(template: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ExecutionError, template)
    }

    /// Shorthand for [`ErrorKind::BackendError`].
    pub fn backend(template: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BackendError, template)
    }

    /// The error raised when a cancel token fires.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "query was cancelled")
    }

    /// Adds a named parameter and re-renders the message.
    pub fn with_param(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.params.push((name, value.to_string()));
        self.message = render(&self.template, &self.params);
        self
    }

    /// Attaches the underlying cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The unrendered template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Named parameters in insertion order.
    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }

    /// Looks up a single parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Rendered message with the kind code prefixed.
    pub fn with_code(&self) -> String {
        format!("[{}] {}", self.kind.code(), self.message)
    }
}

fn render(template: &str, params: &[(&'static str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

impl From<serde_json::Error> for JxError {
    fn from(err: serde_json::Error) -> Self {
        JxError::invalid_query("malformed JSON: {detail}")
            .with_param("detail", &err)
            .with_cause(err)
    }
}

impl From<std::io::Error> for JxError {
    fn from(err: std::io::Error) -> Self {
        JxError::backend("I/O error: {detail}")
            .with_param("detail", &err)
            .with_cause(err)
    }
}

impl From<regex::Error> for JxError {
    fn from(err: regex::Error) -> Self {
        JxError::invalid_query("invalid regular expression: {detail}")
            .with_param("detail", &err)
            .with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn renders_named_params() {
        let err = JxError::invalid_query("Expecting {name} to be a float")
            .with_param("name", "percentile");
        assert_eq!(err.to_string(), "Expecting percentile to be a float");
        assert_eq!(err.template(), "Expecting {name} to be a float");
        assert_eq!(err.param("name"), Some("percentile"));
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn exposes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = JxError::from(io);
        assert_eq!(err.kind(), ErrorKind::BackendError);
        assert!(err.source().is_some());
        assert!(err.with_code().starts_with("[BackendError]"));
    }
}
