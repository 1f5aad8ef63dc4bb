//! Row-level comparisons between two references.
//!
//! Rows are compared as distinct tuples of the selected columns. All
//! variants evaluate their tolerance getter once per test.

use crate::core::constraint::debug_with_tolerance;
use crate::core::{
    run_test, Constraint, ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve,
    Row, TestResult, ToleranceGetter, Verdict,
};
use crate::db_access::{self, MatchAndCompare, RowMismatch};
use crate::prelude::*;
use crate::utils::format_sample;
use async_trait::async_trait;

/// Which set relation between the row sets is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCheck {
    /// Symmetric difference relative to the union.
    Equality,
    /// Rows of the first reference missing in the second.
    Subset,
    /// Rows of the second reference missing in the first.
    Superset,
}

/// Set differences in both directions, with an example row for each.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowDifference {
    /// Rows of the first reference absent from the second
    pub n_missing_left: i64,
    /// Rows of the second reference absent from the first
    pub n_missing_right: i64,
    pub sample_left: Option<Row>,
    pub sample_right: Option<Row>,
}

fn render_sample(sample: Option<&Row>, reference: &DataReference) -> String {
    sample.map_or_else(|| "None".to_string(), |row| format_sample(row, reference))
}

/// Bounds the fraction of rows one reference lacks compared to the other.
pub struct RowComparison {
    core: ConstraintCore<RowDifference, i64>,
    check: RowCheck,
    max_missing_fraction: ToleranceGetter,
}

debug_with_tolerance!(RowComparison);

impl RowComparison {
    pub fn new(
        check: RowCheck,
        core: ConstraintCore<RowDifference, i64>,
        max_missing_fraction: ToleranceGetter,
    ) -> Result<Self> {
        if core.ref2().is_none() {
            return Err(JudgeError::configuration("Row constraints compare two references and need ref2."));
        }
        Ok(Self {
            core,
            check,
            max_missing_fraction,
        })
    }

    fn ref2(&self) -> Result<&DataReference> {
        self.core
            .ref2()
            .ok_or_else(|| JudgeError::Internal("Row constraint without ref2".to_string()))
    }

    fn compare_difference(&self, factual: &RowDifference, total: i64, max: f64) -> Result<Verdict> {
        let reference = &self.core.reference;
        let ref2 = self.ref2()?;
        if total == 0 {
            return Ok(Verdict::pass());
        }
        let condition = self.core.condition_string();
        Ok(match self.check {
            RowCheck::Equality => {
                let fraction = (factual.n_missing_left + factual.n_missing_right) as f64 / total as f64;
                Verdict::check(fraction <= max, || {
                    let sample = if factual.n_missing_left > 0 {
                        render_sample(factual.sample_left.as_ref(), ref2)
                    } else {
                        render_sample(factual.sample_right.as_ref(), reference)
                    };
                    format!("{fraction} > {max} of rows differ between {reference} and {ref2}. E.g. for {sample}.")
                })
            }
            RowCheck::Subset => {
                let fraction = factual.n_missing_left as f64 / total as f64;
                Verdict::check(fraction <= max, || {
                    format!(
                        "{fraction} > {max} of rows of {reference} are not in {ref2}. E.g. for {}. {condition} ",
                        render_sample(factual.sample_left.as_ref(), reference)
                    )
                })
            }
            RowCheck::Superset => {
                let fraction = factual.n_missing_right as f64 / total as f64;
                Verdict::check(fraction <= max, || {
                    format!(
                        "{fraction} > {max} of rows of {ref2} are not in {reference}. E.g. for {}. {condition} ",
                        render_sample(factual.sample_right.as_ref(), ref2)
                    )
                })
            }
        })
    }
}

#[async_trait]
impl Retrieve for RowComparison {
    type Factual = RowDifference;
    type Target = i64;

    fn kind(&self) -> &'static str {
        match self.check {
            RowCheck::Equality => "RowEquality",
            RowCheck::Subset => "RowSubset",
            RowCheck::Superset => "RowSuperset",
        }
    }

    fn core(&self) -> &ConstraintCore<RowDifference, i64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<RowDifference>> {
        let ref2 = self.ref2()?;
        let mut difference = RowDifference::default();
        let mut queries = Vec::new();
        if self.check != RowCheck::Superset {
            let count = db_access::row_difference_count(ctx, reference, ref2).await?;
            let sample = db_access::row_difference_sample(ctx, reference, ref2).await?;
            difference.n_missing_left = count.value;
            difference.sample_left = sample.value;
            queries.extend(count.queries);
        }
        if self.check != RowCheck::Subset {
            let count = db_access::row_difference_count(ctx, ref2, reference).await?;
            let sample = db_access::row_difference_sample(ctx, ref2, reference).await?;
            difference.n_missing_right = count.value;
            difference.sample_right = sample.value;
            queries.extend(count.queries);
        }
        Ok(Retrieval::new(difference, queries))
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
        match self.check {
            RowCheck::Equality => db_access::unique_count_union(ctx, &self.core.reference, reference).await,
            RowCheck::Subset => db_access::unique_count(ctx, &self.core.reference).await,
            RowCheck::Superset => db_access::unique_count(ctx, reference).await,
        }
    }
}

#[async_trait]
impl Constraint for RowComparison {
    fn kind(&self) -> &'static str {
        Retrieve::kind(self)
    }

    fn description(&self) -> String {
        self.core.description(Retrieve::kind(self))
    }

    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult> {
        let dialect = ctx.dialect();
        if !dialect.supports_row_difference() {
            return Err(JudgeError::unsupported("row comparison", dialect));
        }
        let max = (self.max_missing_fraction)(ctx).await?;
        run_test(self, ctx, |factual, total| self.compare_difference(factual, *total, max)).await
    }
}

/// Pairs rows of two references on matching columns and bounds the
/// fraction of pairs differing on the comparison columns.
pub struct RowMatchingEquality {
    core: ConstraintCore<RowMismatch, ()>,
    match_and_compare: MatchAndCompare,
    max_missing_fraction: ToleranceGetter,
}

debug_with_tolerance!(RowMatchingEquality);

impl RowMatchingEquality {
    pub fn new(
        core: ConstraintCore<RowMismatch, ()>,
        match_and_compare: MatchAndCompare,
        max_missing_fraction: ToleranceGetter,
    ) -> Result<Self> {
        if core.ref2().is_none() {
            return Err(JudgeError::configuration("RowMatchingEquality compares two references and needs ref2."));
        }
        Ok(Self {
            core,
            match_and_compare,
            max_missing_fraction,
        })
    }
}

#[async_trait]
impl Retrieve for RowMatchingEquality {
    type Factual = RowMismatch;
    type Target = ();

    fn kind(&self) -> &'static str {
        "RowMatchingEquality"
    }

    fn core(&self) -> &ConstraintCore<RowMismatch, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<RowMismatch>> {
        let ref2 = self
            .core
            .ref2()
            .ok_or_else(|| JudgeError::Internal("RowMatchingEquality without ref2".to_string()))?;
        db_access::row_mismatch(ctx, reference, ref2, &self.match_and_compare).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        // Both references are consumed by the factual retrieval.
        Ok(Retrieval::literal(()))
    }
}

#[async_trait]
impl Constraint for RowMatchingEquality {
    fn kind(&self) -> &'static str {
        Retrieve::kind(self)
    }

    fn description(&self) -> String {
        self.core.description(Retrieve::kind(self))
    }

    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult> {
        let dialect = ctx.dialect();
        if !dialect.supports_row_difference() {
            return Err(JudgeError::unsupported("row comparison", dialect));
        }
        let max = (self.max_missing_fraction)(ctx).await?;
        run_test(self, ctx, |mismatch, _| {
            let fraction = mismatch.mismatch_fraction;
            Ok(Verdict::check(fraction <= max, || {
                format!(
                    "{fraction} > {max} of the rows differ on a match of {} rows between {} and {}. {}{} ",
                    mismatch.n_matched,
                    self.core.reference,
                    self.core.ref2().map(ToString::to_string).unwrap_or_default(),
                    self.core.condition_string(),
                    self.match_and_compare
                )
            }))
        })
        .await
    }
}
