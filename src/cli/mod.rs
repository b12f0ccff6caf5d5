#![forbid(unsafe_code)]

//! Command-line support: config file loading and document import.
//!
//! The `jx` binary reads an optional TOML file with an `[engine]` table
//! (see [`Config`]) and a `[logging]` table, loads documents from JSON
//! array or JSON-lines files, and runs one query against them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::db::{Config, Database, InsertReceipt};
use crate::error::JxError;

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Malformed JSON in an input file.
    #[error("failed to parse {path} line {line}: {source}")]
    Json {
        /// File being read.
        path: PathBuf,
        /// One-based line of the failing document.
        line: usize,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Config file problem.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Engine error.
    #[error("{}", .0.with_code())]
    Engine(#[from] JxError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Errors reading the CLI config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive used when neither `JX_LOG` nor `RUST_LOG` is set.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Parsed CLI configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CliConfig {
    /// Engine settings.
    pub engine: Config,
    /// Logging settings.
    pub logging: LoggingSection,
}

impl CliConfig {
    /// Loads `explicit`, or the default config path when it exists.
    ///
    /// A missing explicit file is an error; a missing default file yields
    /// the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => read_config(&path),
            None => match default_config_path() {
                Some(path) if path.exists() => read_config(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}

fn read_config(path: &Path) -> Result<CliConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `<config dir>/jx/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("jx").join("config.toml"))
}

/// Splits a `table=path` load argument.
pub fn parse_load_arg(arg: &str) -> Result<(String, PathBuf), CliError> {
    match arg.split_once('=') {
        Some((table, path)) if !table.is_empty() && !path.is_empty() => {
            Ok((table.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected TABLE=FILE, got '{arg}'").into()),
    }
}

/// Reads documents from a JSON array file or a JSON-lines file.
pub fn read_documents(path: &Path) -> Result<Vec<Json>, CliError> {
    let contents = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim_start().starts_with('[') {
        return match serde_json::from_str(&contents) {
            Ok(Json::Array(docs)) => Ok(docs),
            Ok(_) => Err(format!("{} does not hold a JSON array", path.display()).into()),
            Err(source) => Err(CliError::Json {
                path: path.to_path_buf(),
                line: source.line(),
                source,
            }),
        };
    }
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| CliError::Json {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// Inserts the documents of `path` into `table`.
pub fn load_table(db: &Database, table: &str, path: &Path) -> Result<InsertReceipt, CliError> {
    let docs = read_documents(path)?;
    Ok(db.insert(table, docs)?)
}

/// Reads a query given inline or as `@file`.
pub fn read_query(arg: &str) -> Result<Json, CliError> {
    let (text, source) = match arg.strip_prefix('@') {
        Some(file) => {
            let path = PathBuf::from(file);
            let text = fs::read_to_string(&path).map_err(|source| CliError::Read {
                path: path.clone(),
                source,
            })?;
            (text, path)
        }
        None => (arg.to_string(), PathBuf::from("<query>")),
    };
    serde_json::from_str(&text).map_err(|err| CliError::Json {
        path: source,
        line: err.line(),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_engine_and_logging_tables() {
        let config: CliConfig = toml::from_str(
            "[engine]\ndefault_limit = 3\nstrict_groupby = false\n\n[logging]\nlevel = \"debug\"\n",
        )
        .expect("parse");
        assert_eq!(config.engine.default_limit, 3);
        assert!(!config.engine.strict_groupby);
        assert_eq!(config.engine.max_limit, 10_000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn reads_json_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "{{\"a\": 1}}\n\n{{\"a\": 2}}").expect("write");
        let docs = read_documents(file.path()).expect("read");
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn reports_bad_json_line() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "{{\"a\": 1}}\n{{oops").expect("write");
        match read_documents(file.path()) {
            Err(CliError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn load_arg_requires_table_and_file() {
        assert!(parse_load_arg("t=data.json").is_ok());
        assert!(parse_load_arg("data.json").is_err());
        assert!(parse_load_arg("=x").is_err());
    }
}
