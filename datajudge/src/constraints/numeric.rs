//! Constraints on numeric columns.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Value, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::security::InputValidator;
use async_trait::async_trait;

/// Which extremum of a column is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumCheck {
    /// The column minimum must be at least the target.
    Min,
    /// The column maximum must be at most the target.
    Max,
}

/// Bounds the minimum or maximum of a numeric column.
#[derive(Debug)]
pub struct NumericExtremum {
    core: ConstraintCore<Value, Value>,
    check: ExtremumCheck,
}

impl NumericExtremum {
    pub fn new(check: ExtremumCheck, core: ConstraintCore<Value, Value>) -> Self {
        Self { core, check }
    }

    async fn extremum(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Value>> {
        match self.check {
            ExtremumCheck::Min => db_access::min(ctx, reference).await,
            ExtremumCheck::Max => db_access::max(ctx, reference).await,
        }
    }
}

#[async_trait]
impl Retrieve for NumericExtremum {
    type Factual = Value;
    type Target = Value;

    fn kind(&self) -> &'static str {
        match self.check {
            ExtremumCheck::Min => "NumericMin",
            ExtremumCheck::Max => "NumericMax",
        }
    }

    fn core(&self) -> &ConstraintCore<Value, Value> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Value>> {
        self.extremum(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Value>> {
        self.extremum(ctx, reference).await
    }
}

impl crate::core::Compare for NumericExtremum {
    fn compare(&self, factual: &Value, target: &Value) -> Result<Verdict> {
        let reference = &self.core.reference;
        let prefix = self.core.target_prefix();
        let condition = self.core.condition_string();
        Ok(match self.check {
            ExtremumCheck::Min => {
                if target.is_null() {
                    return Ok(Verdict::pass());
                }
                if factual.is_null() {
                    return Ok(Verdict::check(target.as_f64() == Some(0.0), || "Empty set.".into()));
                }
                Verdict::check(factual >= target, || {
                    format!("{reference} has min {factual} instead of {prefix}{target} . {condition}")
                })
            }
            ExtremumCheck::Max => {
                if factual.is_null() {
                    return Ok(Verdict::pass());
                }
                if target.is_null() {
                    return Ok(Verdict::fail("Empty reference set."));
                }
                Verdict::check(factual <= target, || {
                    format!("{reference} has max {factual} instead of {prefix}{target} . {condition}")
                })
            }
        })
    }
}

/// Requires a minimum fraction of the values to lie within `[lower, upper]`.
#[derive(Debug)]
pub struct NumericBetween {
    core: ConstraintCore<Option<f64>, f64>,
    lower: Value,
    upper: Value,
}

impl NumericBetween {
    /// `core` carries the minimum fraction as its literal target.
    pub fn new(core: ConstraintCore<Option<f64>, f64>, lower: Value, upper: Value) -> Result<Self> {
        if let Some(min_fraction) = core.target.value() {
            InputValidator::validate_fraction(*min_fraction, "min_fraction")?;
        }
        if lower > upper {
            return Err(JudgeError::configuration(format!(
                "Lower bound {lower} exceeds upper bound {upper}."
            )));
        }
        Ok(Self { core, lower, upper })
    }
}

#[async_trait]
impl Retrieve for NumericBetween {
    type Factual = Option<f64>;
    type Target = f64;

    fn kind(&self) -> &'static str {
        "NumericBetween"
    }

    fn core(&self) -> &ConstraintCore<Option<f64>, f64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<f64>>> {
        db_access::fraction_between(ctx, reference, &self.lower, &self.upper).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<f64>> {
        Err(JudgeError::configuration("NumericBetween only supports a literal minimum fraction."))
    }
}

impl crate::core::Compare for NumericBetween {
    fn compare(&self, factual: &Option<f64>, target: &f64) -> Result<Verdict> {
        let Some(fraction) = factual else {
            return Ok(Verdict::pass_with("Empty selection."));
        };
        Ok(Verdict::check(fraction >= target, || {
            format!(
                "{} has {fraction} < {target} of rows between {} and {}. {}",
                self.core.reference,
                self.lower,
                self.upper,
                self.core.condition_string()
            )
        }))
    }
}

/// Bounds the absolute deviation of a column's mean from a target mean.
#[derive(Debug)]
pub struct NumericMean {
    core: ConstraintCore<Option<f64>, Option<f64>>,
    max_absolute_deviation: f64,
}

impl NumericMean {
    pub fn new(core: ConstraintCore<Option<f64>, Option<f64>>, max_absolute_deviation: f64) -> Result<Self> {
        InputValidator::validate_non_negative(max_absolute_deviation, "max_absolute_deviation")?;
        Ok(Self {
            core,
            max_absolute_deviation,
        })
    }
}

#[async_trait]
impl Retrieve for NumericMean {
    type Factual = Option<f64>;
    type Target = Option<f64>;

    fn kind(&self) -> &'static str {
        "NumericMean"
    }

    fn core(&self) -> &ConstraintCore<Option<f64>, Option<f64>> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<f64>>> {
        db_access::mean(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<f64>>> {
        db_access::mean(ctx, reference).await
    }
}

impl crate::core::Compare for NumericMean {
    fn compare(&self, factual: &Option<f64>, target: &Option<f64>) -> Result<Verdict> {
        let (Some(factual), Some(target)) = (factual, target) else {
            return Ok(Verdict::check(factual.is_none() && target.is_none(), || {
                "Mean over empty set.".into()
            }));
        };
        let deviation = (factual - target).abs();
        Ok(Verdict::check(deviation <= self.max_absolute_deviation, || {
            format!(
                "{} has mean {factual}, deviating more than {} from {} {target}. {}",
                self.core.reference,
                self.max_absolute_deviation,
                self.core.target_prefix(),
                self.core.condition_string()
            )
        }))
    }
}

/// Bounds the deviation of a percentile from a target percentile, in
/// absolute and/or relative terms.
#[derive(Debug)]
pub struct NumericPercentile {
    core: ConstraintCore<f64, f64>,
    percentage: f64,
    max_absolute_deviation: Option<f64>,
    max_relative_deviation: Option<f64>,
}

impl NumericPercentile {
    pub fn new(
        core: ConstraintCore<f64, f64>,
        percentage: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
    ) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(JudgeError::configuration(format!(
                "Expected percentage to be a value between 0 and 100, got {percentage}."
            )));
        }
        if max_absolute_deviation.is_none() && max_relative_deviation.is_none() {
            return Err(JudgeError::configuration(
                "At least one of max_absolute_deviation and max_relative_deviation must be set.",
            ));
        }
        if let Some(deviation) = max_absolute_deviation {
            InputValidator::validate_non_negative(deviation, "max_absolute_deviation")?;
        }
        if let Some(deviation) = max_relative_deviation {
            InputValidator::validate_non_negative(deviation, "max_relative_deviation")?;
        }
        Ok(Self {
            core,
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        })
    }
}

#[async_trait]
impl Retrieve for NumericPercentile {
    type Factual = f64;
    type Target = f64;

    fn kind(&self) -> &'static str {
        "NumericPercentile"
    }

    fn core(&self) -> &ConstraintCore<f64, f64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<f64>> {
        db_access::percentile(ctx, reference, self.percentage).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<f64>> {
        db_access::percentile(ctx, reference, self.percentage).await
    }
}

impl crate::core::Compare for NumericPercentile {
    fn compare(&self, factual: &f64, target: &f64) -> Result<Verdict> {
        let difference = (factual - target).abs();
        let expectation = format!(
            "The {}-th percentile of {} was expected to be {}{target} but was {factual}",
            self.percentage,
            self.core.reference,
            self.core.target_prefix()
        );
        if let Some(max) = self.max_absolute_deviation {
            if difference > max {
                return Ok(Verdict::fail(format!(
                    "{expectation}, resulting in an absolute difference of {difference}. \
                     The maximally allowed absolute deviation would've been {max}."
                )));
            }
        }
        if let Some(max) = self.max_relative_deviation {
            if *target == 0.0 {
                return Err(JudgeError::configuration("Cannot compute relative deviation wrt 0."));
            }
            let relative = difference / target.abs();
            if relative > max {
                return Ok(Verdict::fail(format!(
                    "{expectation}, resulting in a relative difference of {relative}. \
                     The maximally allowed relative deviation would've been {max}."
                )));
            }
        }
        Ok(Verdict::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Constraint;
    use crate::test_helpers::{datafusion_context, int_table, nullable_int_table, table};

    fn column(name: &str) -> DataReference {
        DataReference::new(table(name), Some(vec!["col".into()]), None)
    }

    fn context() -> ExecutionContext {
        let ten: Vec<i64> = (1..=10).collect();
        let shifted: Vec<i64> = (3..=12).collect();
        datafusion_context(vec![
            ("ten", int_table("col", &ten)),
            ("shifted", int_table("col", &shifted)),
            ("nulls", nullable_int_table("col", &[None, None])),
        ])
    }

    #[tokio::test]
    async fn test_min_and_max() {
        let ctx = context();
        let min = NumericExtremum::new(
            ExtremumCheck::Min,
            ConstraintCore::within(column("ten"), Value::Int(1), None, None),
        );
        assert!(min.test(&ctx).await.unwrap().outcome);

        let min = NumericExtremum::new(
            ExtremumCheck::Min,
            ConstraintCore::between(column("ten"), column("shifted"), None, None),
        );
        let result = min.test(&ctx).await.unwrap();
        assert!(!result.outcome);
        assert!(result
            .failure_message
            .unwrap()
            .starts_with("datafusion.public.ten's column 'col' has min 1 instead of"));

        let max = NumericExtremum::new(
            ExtremumCheck::Max,
            ConstraintCore::between(column("ten"), column("shifted"), None, None),
        );
        assert!(max.test(&ctx).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_extremum_of_empty_column() {
        let ctx = context();
        let min = NumericExtremum::new(
            ExtremumCheck::Min,
            ConstraintCore::within(column("nulls"), Value::Int(2), None, None),
        );
        let result = min.test(&ctx).await.unwrap();
        assert!(!result.outcome);
        assert_eq!(result.failure_message.as_deref(), Some("Empty set."));

        let max = NumericExtremum::new(
            ExtremumCheck::Max,
            ConstraintCore::within(column("nulls"), Value::Int(2), None, None),
        );
        assert!(max.test(&ctx).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_between() {
        let ctx = context();
        let between = NumericBetween::new(
            ConstraintCore::within(column("ten"), 0.5, None, None),
            Value::Int(3),
            Value::Int(7),
        )
        .unwrap();
        assert!(between.test(&ctx).await.unwrap().outcome);

        let between = NumericBetween::new(
            ConstraintCore::within(column("ten"), 0.6, None, None),
            Value::Int(3),
            Value::Int(7),
        )
        .unwrap();
        let result = between.test(&ctx).await.unwrap();
        assert!(!result.outcome);
        assert!(result.failure_message.unwrap().contains("has 0.5 < 0.6 of rows between 3 and 7"));
    }

    #[tokio::test]
    async fn test_mean() {
        let ctx = context();
        let mean = NumericMean::new(
            ConstraintCore::between(column("ten"), column("shifted"), None, None),
            2.0,
        )
        .unwrap();
        assert!(mean.test(&ctx).await.unwrap().outcome);

        let mean = NumericMean::new(
            ConstraintCore::between(column("ten"), column("shifted"), None, None),
            1.5,
        )
        .unwrap();
        assert!(!mean.test(&ctx).await.unwrap().outcome);

        let empty = NumericMean::new(ConstraintCore::within(column("nulls"), None, None, None), 0.0).unwrap();
        assert!(empty.test(&ctx).await.unwrap().outcome);
    }

    #[tokio::test]
    async fn test_percentile() {
        let ctx = context();
        let median = NumericPercentile::new(
            ConstraintCore::within(column("ten"), 5.0, None, None),
            50.0,
            Some(0.0),
            None,
        )
        .unwrap();
        assert!(median.test(&ctx).await.unwrap().outcome);

        let relative = NumericPercentile::new(
            ConstraintCore::between(column("ten"), column("shifted"), None, None),
            50.0,
            None,
            Some(0.2),
        )
        .unwrap();
        let result = relative.test(&ctx).await.unwrap();
        assert!(!result.outcome);
        assert!(result.failure_message.unwrap().contains("relative difference of 0.2857"));
    }

    #[test]
    fn test_percentile_validation() {
        let core = || ConstraintCore::within(column("ten"), 1.0, None, None);
        assert!(NumericPercentile::new(core(), 101.0, Some(1.0), None).is_err());
        assert!(NumericPercentile::new(core(), 50.0, None, None).is_err());
        assert!(NumericPercentile::new(core(), 50.0, Some(-1.0), None).is_err());
    }

    #[test]
    fn test_relative_deviation_from_zero_is_rejected() {
        let percentile = NumericPercentile::new(
            ConstraintCore::within(column("ten"), 0.0, None, None),
            50.0,
            None,
            Some(0.1),
        )
        .unwrap();
        let err = crate::core::Compare::compare(&percentile, &1.0, &0.0).unwrap_err();
        assert!(matches!(err, JudgeError::Configuration(_)));
    }
}
