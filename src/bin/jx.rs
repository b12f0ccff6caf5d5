//! Binary entry point for the jx query CLI.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value as Json;
use tracing_subscriber::EnvFilter;

use jx::cli::{load_table, parse_load_arg, read_query, CliConfig, CliError};
use jx::Database;

#[derive(Parser, Debug)]
#[command(
    name = "jx",
    version,
    about = "Query JSON documents with the jx query language",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, env = "JX_CONFIG", help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = Output::Pretty,
        help = "How JSON output is printed"
    )]
    output: Output,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Pretty,
    Compact,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[arg(
        long = "load",
        value_name = "TABLE=FILE",
        help = "Load a JSON array or JSON-lines file into a table (repeatable)"
    )]
    load: Vec<String>,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[command(flatten)]
    load: LoadArgs,

    #[arg(long, help = "Override the query's result format (list, table, cube, value)")]
    format: Option<String>,

    #[arg(value_name = "QUERY", help = "Query document, or @file to read it from a file")]
    query: String,
}

#[derive(Args, Debug)]
struct SchemaCmd {
    #[command(flatten)]
    load: LoadArgs,

    #[arg(value_name = "TABLE")]
    table: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a query and print its result.
    Query(QueryCmd),
    /// Print the plan tree and plan hash of a query.
    Explain(QueryCmd),
    /// List the columns of a table.
    Schema(SchemaCmd),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    init_tracing(&config.logging.level)?;
    let db = Database::with_storage(
        std::sync::Arc::new(jx::storage::MemoryStore::new()),
        config.engine.clone(),
    );

    match cli.command {
        Command::Query(cmd) => {
            load_all(&db, &cmd.load)?;
            let query = with_format(read_query(&cmd.query)?, cmd.format.as_deref());
            let result = db.query(&query)?;
            emit(cli.output, &result.to_json())?;
        }
        Command::Explain(cmd) => {
            load_all(&db, &cmd.load)?;
            let query = with_format(read_query(&cmd.query)?, cmd.format.as_deref());
            let explain = db.explain(&query)?;
            emit(cli.output, &explain.to_json(false))?;
        }
        Command::Schema(cmd) => {
            load_all(&db, &cmd.load)?;
            let rows: Vec<Json> = db
                .schema(&cmd.table)
                .iter()
                .map(|column| column.to_meta_row().to_json())
                .collect();
            emit(cli.output, &Json::Array(rows))?;
        }
    }
    Ok(())
}

fn init_tracing(level: &str) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_env("JX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| CliError::Message(format!("failed to initialise logging: {err}")))
}

fn load_all(db: &Database, args: &LoadArgs) -> Result<(), CliError> {
    for arg in &args.load {
        let (table, path) = parse_load_arg(arg)?;
        let receipt = load_table(db, &table, &path)?;
        tracing::info!(table, docs = receipt.ids.len(), "cli.load");
    }
    Ok(())
}

fn with_format(mut query: Json, format: Option<&str>) -> Json {
    if let (Some(format), Json::Object(map)) = (format, &mut query) {
        map.insert("format".into(), Json::String(format.to_string()));
    }
    query
}

fn emit(output: Output, value: &Json) -> Result<(), CliError> {
    let text = match output {
        Output::Pretty => serde_json::to_string_pretty(value),
        Output::Compact => serde_json::to_string(value),
    }
    .map_err(|err| CliError::Message(err.to_string()))?;
    println!("{text}");
    Ok(())
}
