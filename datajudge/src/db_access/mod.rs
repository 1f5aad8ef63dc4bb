//! Query construction and retrieval for constraints.
//!
//! Every function takes an [`ExecutionContext`] and one or two
//! [`DataReference`]s, builds the SQL for the active [`Dialect`], executes it
//! and returns the value together with the executed queries as a
//! [`Retrieval`]. Backend differences are delegated to the dialect; nothing
//! here branches on backend names.
//!
//! ## Modules
//!
//! - [`counts`]: row counts, distinct counts, set differences and fractions
//! - [`aggregates`]: min/max/mean/percentile, lengths and date spans
//! - [`uniques`]: value multisets, array aggregation and functional dependencies
//! - [`rows`]: row matching between two references
//! - [`intervals`]: overlap and gap detection over ranges
//! - [`stats`]: the two-sample Kolmogorov–Smirnov statistic
//! - [`metadata`]: column names, column types and primary keys
//!
//! [`Dialect`]: crate::core::Dialect

pub mod aggregates;
pub mod counts;
pub mod intervals;
pub mod metadata;
pub mod rows;
pub mod stats;
pub mod uniques;

pub use aggregates::{
    date_growth_rate, date_span, max, max_length, mean, min, min_length, percentile,
};
pub use counts::{
    duplicate_sample, fraction_between, missing_fraction, regex_violations, row_count,
    row_difference_count, row_difference_sample, unique_count, unique_count_union,
    RegexViolations,
};
pub use intervals::{interval_gaps, interval_overlaps, GapKind, IntervalViolations};
pub use metadata::{column_names, column_type, primary_keys};
pub use rows::{row_mismatch, MatchAndCompare, RowMismatch};
pub use stats::ks_2sample;
pub use uniques::{column_array_agg, functional_dependency_violations, uniques, UniqueCounts};

use crate::core::{DataReference, ExecutionContext};
use crate::prelude::*;

/// The reference's selection as a derived table named `alias`.
pub(crate) fn derived(ctx: &ExecutionContext, reference: &DataReference, alias: &str) -> Result<String> {
    let dialect = ctx.dialect();
    Ok(reference.selection(dialect)?.aliased(dialect, alias))
}

/// The quoted single column of `reference`.
pub(crate) fn quoted_column(ctx: &ExecutionContext, reference: &DataReference) -> Result<String> {
    ctx.dialect().quote(reference.single_column()?)
}

/// Quotes each column qualified by `alias`.
pub(crate) fn qualified_all(ctx: &ExecutionContext, alias: &str, columns: &[String]) -> Result<Vec<String>> {
    let dialect = ctx.dialect();
    columns.iter().map(|c| dialect.qualified(alias, c)).collect()
}
