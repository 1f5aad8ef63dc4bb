//! Row-count constraints.

use crate::core::{
    run_test, Constraint, ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve,
    Target, TestResult, ToleranceGetter, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::utils::{format_difference, percent};
use async_trait::async_trait;
use std::fmt;

/// How the factual row count is compared to the target row count.
#[derive(Clone)]
pub enum NRowsCheck {
    Equality,
    Min,
    Max,
    /// Relative loss must not exceed the tolerance.
    MaxLoss(ToleranceGetter),
    /// Relative gain must not exceed the tolerance.
    MaxGain(ToleranceGetter),
    /// Relative gain must reach the tolerance.
    MinGain(ToleranceGetter),
}

impl fmt::Debug for NRowsCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl NRowsCheck {
    fn kind(&self) -> &'static str {
        match self {
            Self::Equality => "NRowsEquality",
            Self::Min => "NRowsMin",
            Self::Max => "NRowsMax",
            Self::MaxLoss(_) => "NRowsMaxLoss",
            Self::MaxGain(_) => "NRowsMaxGain",
            Self::MinGain(_) => "NRowsMinGain",
        }
    }

    fn tolerance_getter(&self) -> Option<&ToleranceGetter> {
        match self {
            Self::MaxLoss(getter) | Self::MaxGain(getter) | Self::MinGain(getter) => Some(getter),
            _ => None,
        }
    }
}

/// Compares the number of rows of a reference against a literal count or
/// the row count of a second reference.
#[derive(Debug)]
pub struct NRows {
    core: ConstraintCore<i64, i64>,
    check: NRowsCheck,
}

impl NRows {
    /// Gain and loss checks need a second reference to relate to.
    pub fn new(check: NRowsCheck, core: ConstraintCore<i64, i64>) -> Result<Self> {
        if check.tolerance_getter().is_some() && core.ref2().is_none() {
            return Err(JudgeError::configuration(format!(
                "{} compares two references and needs ref2.",
                check.kind()
            )));
        }
        Ok(Self { core, check })
    }

    fn compare_counts(&self, factual: i64, target: i64, tolerance: Option<f64>) -> Verdict {
        let reference = &self.core.reference;
        let prefix = self.core.target_prefix();
        let condition = self.core.condition_string();
        let tolerance = tolerance.unwrap_or(0.0);
        let ref2 = self
            .core
            .ref2()
            .map(ToString::to_string)
            .unwrap_or_default();
        match &self.check {
            NRowsCheck::Min => Verdict::check(factual >= target, || {
                format!("{reference} has {factual} < {prefix} {target} rows. {condition}")
            }),
            NRowsCheck::Max => Verdict::check(factual <= target, || {
                let (factual, target) = format_difference(factual, target, false);
                format!("{reference} has {factual} > {prefix} {target} rows. {condition}")
            }),
            NRowsCheck::Equality => Verdict::check(factual == target, || {
                let (factual, target) = format_difference(factual, target, false);
                format!("{reference} has {factual} row(s) instead of {prefix} {target}. {condition}")
            }),
            NRowsCheck::MaxLoss(_) => {
                if target == 0 {
                    return Verdict::pass_with("Empty target table.");
                }
                if factual > target {
                    return Verdict::pass_with("Row gain.");
                }
                let relative_loss = (target - factual) as f64 / target as f64;
                Verdict::check(relative_loss <= tolerance, || {
                    format!(
                        "The #rows from {reference} have decreased by {} compared to table {ref2}. \
                         They were expected to decrease by at most {}. {condition}",
                        percent(relative_loss),
                        percent(tolerance)
                    )
                })
            }
            NRowsCheck::MaxGain(_) => {
                if target == 0 {
                    return Verdict::pass_with("Empty target table.");
                }
                if factual < target {
                    return Verdict::pass_with("Row loss.");
                }
                let relative_gain = (factual - target) as f64 / target as f64;
                Verdict::check(relative_gain <= tolerance, || {
                    format!(
                        "{reference} has {} gain in #rows compared to {ref2}. \
                         It was only allowed to increase by {}. {condition}",
                        percent(relative_gain),
                        percent(tolerance)
                    )
                })
            }
            NRowsCheck::MinGain(_) => {
                if target == 0 {
                    return Verdict::pass_with("Empty target table.");
                }
                if factual < target {
                    return Verdict::fail("Row loss.");
                }
                let relative_gain = (factual - target) as f64 / target as f64;
                Verdict::check(relative_gain >= tolerance, || {
                    format!(
                        "{reference} has {} gain in #rows compared to {ref2}. \
                         It was supposed to increase at least by {}. {condition}",
                        percent(relative_gain),
                        percent(tolerance)
                    )
                })
            }
        }
    }
}

#[async_trait]
impl Retrieve for NRows {
    type Factual = i64;
    type Target = i64;

    fn kind(&self) -> &'static str {
        self.check.kind()
    }

    fn core(&self) -> &ConstraintCore<i64, i64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
        // A minimum against a literal only needs to know whether enough rows
        // exist, so counting stops at the target.
        let limit = match (&self.check, &self.core.target) {
            (NRowsCheck::Min, Target::Value(n_rows)) => u64::try_from(*n_rows).ok(),
            _ => None,
        };
        db_access::row_count(ctx, reference, limit).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
        db_access::row_count(ctx, reference, None).await
    }
}

#[async_trait]
impl Constraint for NRows {
    fn kind(&self) -> &'static str {
        self.check.kind()
    }

    fn description(&self) -> String {
        self.core.description(self.check.kind())
    }

    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult> {
        let tolerance = match self.check.tolerance_getter() {
            Some(getter) => Some(getter(ctx).await?),
            None => None,
        };
        run_test(self, ctx, |factual, target| {
            Ok(self.compare_counts(*factual, *target, tolerance))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constant_tolerance;
    use crate::test_helpers::{datafusion_context, int_table, table};

    fn numbers(name: &str) -> DataReference {
        DataReference::new(table(name), None, None)
    }

    fn context() -> ExecutionContext {
        let nineteen: Vec<i64> = (1..20).collect();
        let twenty_five: Vec<i64> = (1..=25).collect();
        datafusion_context(vec![
            ("nineteen", int_table("col", &nineteen)),
            ("twenty_five", int_table("col", &twenty_five)),
            ("empty", int_table("col", &[])),
        ])
    }

    async fn outcome(check: NRowsCheck, core: ConstraintCore<i64, i64>) -> TestResult {
        NRows::new(check, core).unwrap().test(&context()).await.unwrap()
    }

    #[tokio::test]
    async fn test_min_rows() {
        let passing = outcome(
            NRowsCheck::Min,
            ConstraintCore::within(numbers("nineteen"), 19, None, None),
        )
        .await;
        assert!(passing.outcome);

        let failing = outcome(
            NRowsCheck::Min,
            ConstraintCore::within(numbers("nineteen"), 20, None, None),
        )
        .await;
        assert!(!failing.outcome);
        assert_eq!(failing.description.as_deref(), Some("NRowsMin::datafusion.public.nineteen"));
        assert!(failing
            .failure_message
            .unwrap()
            .starts_with("datafusion.public.nineteen has 19 <  20 rows."));
    }

    #[tokio::test]
    async fn test_equality_and_max_between_tables() {
        let equality = outcome(
            NRowsCheck::Equality,
            ConstraintCore::between(numbers("nineteen"), numbers("twenty_five"), None, None),
        )
        .await;
        assert!(!equality.outcome);
        assert_eq!(equality.description.as_deref(), Some("NRowsEquality::nineteen | twenty_five"));
        assert_eq!(equality.target_queries.as_ref().map(Vec::len), Some(1));

        let max = outcome(
            NRowsCheck::Max,
            ConstraintCore::between(numbers("nineteen"), numbers("twenty_five"), None, None),
        )
        .await;
        assert!(max.outcome);
    }

    #[tokio::test]
    async fn test_gain_against_empty_target_passes() {
        let result = outcome(
            NRowsCheck::MaxGain(constant_tolerance(0.0)),
            ConstraintCore::between(numbers("twenty_five"), numbers("empty"), None, None),
        )
        .await;
        assert!(result.outcome);
    }

    #[tokio::test]
    async fn test_gain_and_loss_tolerances() {
        let gain = ConstraintCore::between(numbers("twenty_five"), numbers("nineteen"), None, None);
        let result = outcome(NRowsCheck::MaxGain(constant_tolerance(0.1)), gain).await;
        assert!(!result.outcome);
        assert!(result.failure_message.unwrap().contains("31.58% gain"));

        let gain = ConstraintCore::between(numbers("twenty_five"), numbers("nineteen"), None, None);
        assert!(outcome(NRowsCheck::MinGain(constant_tolerance(0.3)), gain).await.outcome);

        let loss = ConstraintCore::between(numbers("nineteen"), numbers("twenty_five"), None, None);
        assert!(outcome(NRowsCheck::MaxLoss(constant_tolerance(0.25)), loss).await.outcome);

        let loss = ConstraintCore::between(numbers("nineteen"), numbers("twenty_five"), None, None);
        assert!(!outcome(NRowsCheck::MaxLoss(constant_tolerance(0.2)), loss).await.outcome);
    }

    #[test]
    fn test_gain_requires_second_reference() {
        let err = NRows::new(
            NRowsCheck::MaxGain(constant_tolerance(0.1)),
            ConstraintCore::within(numbers("nineteen"), 10, None, None),
        )
        .unwrap_err();
        assert!(matches!(err, JudgeError::Configuration(_)));
    }
}
