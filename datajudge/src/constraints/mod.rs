//! Built-in constraints.
//!
//! Every constraint runs the same pipeline: retrieve a factual value from
//! the primary [`DataReference`](crate::core::DataReference), obtain a target
//! either literally ("within") or from a second reference ("between"),
//! then compare both without further I/O. Retrievals are memoized per
//! [`ExecutionContext`](crate::core::ExecutionContext).
//!
//! Constraint families share one struct per family, parameterized by a
//! check enum selecting the concrete comparison:
//!
//! | Module | Constraints |
//! |--------|-------------|
//! | [`nrows`] | row-count equality, bounds, gain and loss |
//! | [`uniques`] | unique value sets, distinct counts, categorical shares |
//! | [`numeric`] | min, max, mean, percentiles and value ranges |
//! | [`date`] | date bounds and ranges |
//! | [`interval`] | overlaps and gaps between ranges |
//! | [`varchar`] | regex conformity and string lengths |
//! | [`column`] | column existence, subsets and types |
//! | [`miscs`] | primary keys, uniqueness, functional dependencies, nulls |
//! | [`row`] | row set differences and matched-row comparisons |
//! | [`stats`] | two-sample Kolmogorov-Smirnov test |
//! | [`groupby`] | continuity of aggregated values per group |
//!
//! ## Example
//!
//! ```rust,no_run
//! use datajudge::constraints::{NRows, NRowsCheck};
//! use datajudge::core::{Constraint, ConstraintCore, DataReference, DataSource, ExecutionContext};
//!
//! # async fn example(ctx: &ExecutionContext) -> datajudge::prelude::Result<()> {
//! let reference = DataReference::new(DataSource::table("db", Some("public"), "orders"), None, None);
//! let constraint = NRows::new(NRowsCheck::Min, ConstraintCore::within(reference, 100, None, None))?;
//! let result = constraint.test(ctx).await?;
//! assert!(result.outcome, "{}", result.failure_message.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod column;
pub mod date;
pub mod groupby;
pub mod interval;
pub mod miscs;
pub mod nrows;
pub mod numeric;
pub mod row;
pub mod stats;
pub mod uniques;
pub mod varchar;

pub use column::{ColumnCheck, ColumnNames, ColumnType};
pub use date::{DateBetween, DateExtremum};
pub use groupby::{GroupByAggregation, Groups};
pub use interval::{IntervalConstraint, IntervalFactual, IntervalOptions};
pub use miscs::{
    DuplicateTolerance, FunctionalDependency, MaxNullFraction, PrimaryKeyDefinition, Uniqueness,
    UniquenessFactual,
};
pub use nrows::{NRows, NRowsCheck};
pub use numeric::{ExtremumCheck, NumericBetween, NumericExtremum, NumericMean, NumericPercentile};
pub use row::{RowCheck, RowComparison, RowDifference, RowMatchingEquality};
pub use stats::{KolmogorovSmirnov2Sample, KsFactual};
pub use uniques::{
    CategoricalBound, MapFunc, NUniques, NUniquesCheck, NullFilter, ReduceFunc, ShareBounds,
    UniqueValues, Uniques, UniquesCheck, UniquesOptions,
};
pub use varchar::{RegexOptions, VarCharLength, VarCharRegex, VarCharRegexDb};
