//! Constraints on date columns.
//!
//! Retrieved dates may arrive as dates, timestamps or strings depending on
//! the backend; all are narrowed to a calendar date before comparing.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Value, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::security::InputValidator;
use async_trait::async_trait;
use chrono::NaiveDate;

use super::numeric::ExtremumCheck;

fn narrow_to_date(value: Value) -> Result<Option<NaiveDate>> {
    if value.is_null() {
        return Ok(None);
    }
    value.as_date().map(Some).ok_or_else(|| JudgeError::TypeMismatch {
        expected: "date".to_string(),
        found: value.to_string(),
    })
}

/// Bounds the earliest or latest date of a column.
///
/// With `use_bound_reference` the target is a bound (a lower bound for
/// [`ExtremumCheck::Min`], an upper bound for [`ExtremumCheck::Max`]).
/// Without it, the comparison flips: the earliest date must not be later
/// than the target, the latest not earlier.
#[derive(Debug)]
pub struct DateExtremum {
    core: ConstraintCore<Option<NaiveDate>, Option<NaiveDate>>,
    check: ExtremumCheck,
    use_bound_reference: bool,
}

impl DateExtremum {
    pub fn new(
        check: ExtremumCheck,
        core: ConstraintCore<Option<NaiveDate>, Option<NaiveDate>>,
        use_bound_reference: bool,
    ) -> Self {
        Self {
            core,
            check,
            use_bound_reference,
        }
    }

    async fn extremum(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<NaiveDate>>> {
        let retrieval = match self.check {
            ExtremumCheck::Min => db_access::min(ctx, reference).await?,
            ExtremumCheck::Max => db_access::max(ctx, reference).await?,
        };
        Ok(Retrieval::new(narrow_to_date(retrieval.value)?, retrieval.queries))
    }
}

#[async_trait]
impl Retrieve for DateExtremum {
    type Factual = Option<NaiveDate>;
    type Target = Option<NaiveDate>;

    fn kind(&self) -> &'static str {
        match self.check {
            ExtremumCheck::Min => "DateMin",
            ExtremumCheck::Max => "DateMax",
        }
    }

    fn core(&self) -> &ConstraintCore<Self::Factual, Self::Target> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<NaiveDate>>> {
        self.extremum(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<NaiveDate>>> {
        self.extremum(ctx, reference).await
    }
}

impl crate::core::Compare for DateExtremum {
    fn compare(&self, factual: &Option<NaiveDate>, target: &Option<NaiveDate>) -> Result<Verdict> {
        let (factual, target) = match (self.check, factual, target) {
            (ExtremumCheck::Min, _, None) => return Ok(Verdict::pass()),
            (ExtremumCheck::Min, None, Some(_)) => return Ok(Verdict::fail("Empty set.")),
            (ExtremumCheck::Max, None, _) => return Ok(Verdict::pass()),
            (ExtremumCheck::Max, Some(_), None) => return Ok(Verdict::fail("Empty reference set.")),
            (_, Some(factual), Some(target)) => (*factual, *target),
        };

        let (name, holds, relation) = match (self.check, self.use_bound_reference) {
            (ExtremumCheck::Min, true) => ("min", factual >= target, "<"),
            (ExtremumCheck::Min, false) => ("min", factual <= target, ">"),
            (ExtremumCheck::Max, true) => ("max", factual <= target, ">"),
            (ExtremumCheck::Max, false) => ("max", factual >= target, "<"),
        };
        Ok(Verdict::check(holds, || {
            format!(
                "{} has {name} {factual} {relation} {} {target}. {}",
                self.core.reference,
                self.core.target_prefix(),
                self.core.condition_string()
            )
        }))
    }
}

/// Requires a minimum fraction of the dates to lie within `[lower, upper]`.
#[derive(Debug)]
pub struct DateBetween {
    core: ConstraintCore<Option<f64>, f64>,
    lower: NaiveDate,
    upper: NaiveDate,
}

impl DateBetween {
    /// `core` carries the minimum fraction as its literal target.
    pub fn new(core: ConstraintCore<Option<f64>, f64>, lower: NaiveDate, upper: NaiveDate) -> Result<Self> {
        if let Some(min_fraction) = core.target.value() {
            InputValidator::validate_fraction(*min_fraction, "min_fraction")?;
        }
        if lower > upper {
            return Err(JudgeError::configuration(format!(
                "Lower bound {lower} is later than upper bound {upper}."
            )));
        }
        Ok(Self { core, lower, upper })
    }
}

#[async_trait]
impl Retrieve for DateBetween {
    type Factual = Option<f64>;
    type Target = f64;

    fn kind(&self) -> &'static str {
        "DateBetween"
    }

    fn core(&self) -> &ConstraintCore<Option<f64>, f64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<f64>>> {
        db_access::fraction_between(ctx, reference, &Value::Date(self.lower), &Value::Date(self.upper)).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<f64>> {
        Err(JudgeError::configuration("DateBetween only supports a literal minimum fraction."))
    }
}

impl crate::core::Compare for DateBetween {
    fn compare(&self, factual: &Option<f64>, target: &f64) -> Result<Verdict> {
        let Some(fraction) = factual else {
            return Ok(Verdict::pass_with("Empty selection."));
        };
        Ok(Verdict::check(fraction >= target, || {
            format!(
                "{} has {fraction} < {target} of values between {} and {}. {} ",
                self.core.reference,
                self.lower,
                self.upper,
                self.core.condition_string()
            )
        }))
    }
}
