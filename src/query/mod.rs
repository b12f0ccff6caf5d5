//! Query planning and execution engine.
//!
//! A query document is parsed into surface specs, bound against a schema
//! snapshot by the planner, then run by the executor and shaped into one of
//! the result formats.

/// Aggregate kinds and their accumulators.
pub mod aggregate;

/// Planned query representation.
///
/// Bound selects, dimensions, filters and sort keys ready for execution.
pub mod ast;

/// Query builder for programmatic query construction.
///
/// Provides a fluent API for building query documents without writing JSON.
pub mod builder;

/// Partition domains for edges and groupby columns.
pub mod domain;

/// Query execution engine.
///
/// Scans, expands, buckets and aggregates rows, then shapes the result.
pub mod executor;

/// Query plan generation.
///
/// Converts query documents to bound plans with explain trees.
pub mod planner;

/// Performance profiling for query operations.
///
/// Collects timing and count statistics to identify performance bottlenecks.
pub mod profile;

mod shape;

/// Surface forms of query documents.
pub mod spec;

pub use ast::Format;
pub use builder::QueryBuilder;
pub use executor::{CancelToken, Executor, QueryResult};

/// Execution plan output with explanation capabilities.
pub use planner::{PlanExplain, Planner, PlannerConfig, PlannerOutput};
