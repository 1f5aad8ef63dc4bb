//! # datajudge - Data assertions for Rust
//!
//! datajudge expresses expectations about tabular data as constraints and
//! tests them by generating SQL against a query engine. Expectations either
//! relate one data source to literal values ("within") or two data sources
//! to each other ("between"), such as two versions of the same table.
//! DataFusion is the bundled engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datajudge::engines::DataFusionEngine;
//! use datajudge::prelude::*;
//! use datajudge::requirement::{ConstraintSettings, GainTolerance};
//! use datafusion::prelude::SessionContext;
//!
//! # async fn example() -> datajudge::prelude::Result<()> {
//! let session = SessionContext::new();
//! // ... register `orders` and `orders_previous` ...
//! let ctx = ExecutionContext::new(DataFusionEngine::new(session));
//!
//! let mut within = WithinRequirement::from_table("datafusion", Some("public"), "orders");
//! within
//!     .add_primary_key_definition_constraint(&["order_id"], ConstraintSettings::new())?
//!     .add_null_absence_constraint("customer_id", ConstraintSettings::new())?
//!     .add_varchar_regex_constraint("status", r"(open|closed)", Default::default(), ConstraintSettings::new())?;
//!
//! let mut between = BetweenRequirement::from_tables(
//!     ("datafusion", Some("public"), "orders_previous"),
//!     ("datafusion", Some("public"), "orders"),
//! );
//! between.add_n_rows_max_gain_constraint(GainTolerance::constant(0.1), ConstraintSettings::new())?;
//!
//! for result in within.test(&ctx).await?.into_iter().chain(between.test(&ctx).await?) {
//!     if !result.outcome {
//!         eprintln!("{}", result.logging_message());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`core`**: data sources, conditions, references, values, the
//!   execution context and the constraint pipeline
//! - **`db_access`**: query generation and retrieval of factual values
//! - **`engines`**: the [`QueryEngine`](core::QueryEngine) backed by DataFusion
//! - **`constraints`**: every built-in constraint
//! - **`requirement`**: builders collecting constraints per data source
//! - **`formatters`**: failure message markup and report rendering
//! - **`testing`**: one test case per constraint for use in test harnesses
//! - **`logging`**: `tracing` configuration for query and constraint logging

pub mod constraints;
pub mod core;
pub mod db_access;
pub mod engines;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod prelude;
pub mod requirement;
pub mod security;
pub mod testing;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;
