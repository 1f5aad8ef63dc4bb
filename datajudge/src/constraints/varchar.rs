//! Constraints on string columns.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Value, Verdict,
};
use crate::db_access::{self, RegexViolations, UniqueCounts};
use crate::prelude::*;
use crate::security::{InputValidator, SqlSecurity};
use crate::utils::format_values;
use async_trait::async_trait;
use regex::Regex;

use super::numeric::ExtremumCheck;

/// Configuration of the regex constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexOptions {
    /// Tolerate NULLs instead of failing on the first one
    pub allow_none: bool,
    /// Fraction of violating values that is still acceptable
    pub relative_tolerance: f64,
    /// Count each distinct value once instead of weighting by occurrence
    pub aggregated: bool,
    /// Number of violating values listed in the failure message; `None`
    /// lists all of them
    pub n_counterexamples: Option<u64>,
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            allow_none: false,
            relative_tolerance: 0.0,
            aggregated: true,
            n_counterexamples: Some(5),
        }
    }
}

impl RegexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_none(mut self, allow_none: bool) -> Self {
        self.allow_none = allow_none;
        self
    }

    pub fn with_relative_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_tolerance = tolerance;
        self
    }

    pub fn with_aggregated(mut self, aggregated: bool) -> Self {
        self.aggregated = aggregated;
        self
    }

    pub fn with_n_counterexamples(mut self, n: Option<u64>) -> Self {
        self.n_counterexamples = n;
        self
    }
}

fn regex_failure(
    reference: &DataReference,
    pattern: &str,
    n_violations: i64,
    n_total: i64,
    tolerance: f64,
    counterexamples: &[Value],
    condition: &str,
) -> Verdict {
    if n_total == 0 {
        return Verdict::pass();
    }
    let relative_violations = n_violations as f64 / n_total as f64;
    Verdict::check(relative_violations <= tolerance, || {
        format!(
            "{reference} breaks regex '{pattern}' in {relative_violations} > {tolerance} of the cases. \
             In absolute terms, {n_violations} of the {n_total} samples violated the regex. \
             Some counterexamples consist of the following: {}. {condition}",
            format_values(counterexamples)
        )
    })
}

/// Matches every distinct value against a regex after retrieving them.
///
/// Values must match as a whole; a match of a prefix is not enough.
#[derive(Debug)]
pub struct VarCharRegex {
    core: ConstraintCore<UniqueCounts, ()>,
    pattern: String,
    regex: Regex,
    options: RegexOptions,
}

impl VarCharRegex {
    pub fn new(core: ConstraintCore<UniqueCounts, ()>, pattern: impl Into<String>, options: RegexOptions) -> Result<Self> {
        let pattern = pattern.into();
        InputValidator::validate_fraction(options.relative_tolerance, "relative_tolerance")?;
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| JudgeError::configuration(format!("Invalid regex '{pattern}': {e}")))?;
        Ok(Self {
            core,
            pattern,
            regex,
            options,
        })
    }

    fn matches(&self, value: &Value) -> bool {
        match value {
            Value::Str(text) => self.regex.is_match(text),
            other => self.regex.is_match(&other.to_string()),
        }
    }
}

#[async_trait]
impl Retrieve for VarCharRegex {
    type Factual = UniqueCounts;
    type Target = ();

    fn kind(&self) -> &'static str {
        "VarCharRegex"
    }

    fn core(&self) -> &ConstraintCore<UniqueCounts, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueCounts>> {
        db_access::uniques(ctx, reference).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("VarCharRegex has no target reference."))
    }
}

impl crate::core::Compare for VarCharRegex {
    fn compare(&self, factual: &UniqueCounts, _target: &()) -> Result<Verdict> {
        if !self.options.allow_none && factual.iter().any(|(value, count)| value.is_null() && *count > 0) {
            return Ok(Verdict::fail(
                "The column contains a None value when it's not allowed. \
                 To ignore None values, please use `allow_none=True` option.",
            ));
        }
        let present: Vec<&(Value, i64)> = factual.iter().filter(|(value, _)| !value.is_null()).collect();
        let mut mismatching: Vec<&(Value, i64)> =
            present.iter().copied().filter(|(value, _)| !self.matches(value)).collect();
        mismatching.sort();

        let (n_violations, n_total) = if self.options.aggregated {
            (mismatching.len() as i64, present.len() as i64)
        } else {
            (
                mismatching.iter().map(|(_, count)| count).sum(),
                present.iter().map(|(_, count)| count).sum(),
            )
        };
        let limit = self.options.n_counterexamples.map_or(usize::MAX, |n| n as usize);
        let counterexamples: Vec<Value> = mismatching
            .iter()
            .take(limit)
            .map(|(value, _)| value.clone())
            .collect();
        Ok(regex_failure(
            &self.core.reference,
            &self.pattern,
            n_violations,
            n_total,
            self.options.relative_tolerance,
            &counterexamples,
            &self.core.condition_string(),
        ))
    }
}

/// Counts regex violations inside the database.
///
/// NULLs are neither violations nor matches but do count towards the
/// total in the weighted mode.
#[derive(Debug)]
pub struct VarCharRegexDb {
    core: ConstraintCore<(RegexViolations, i64), ()>,
    pattern: String,
    options: RegexOptions,
}

impl VarCharRegexDb {
    pub fn new(
        core: ConstraintCore<(RegexViolations, i64), ()>,
        pattern: impl Into<String>,
        options: RegexOptions,
    ) -> Result<Self> {
        let pattern = pattern.into();
        SqlSecurity::validate_regex_pattern(&pattern)?;
        InputValidator::validate_fraction(options.relative_tolerance, "relative_tolerance")?;
        Ok(Self { core, pattern, options })
    }
}

#[async_trait]
impl Retrieve for VarCharRegexDb {
    type Factual = (RegexViolations, i64);
    type Target = ();

    fn kind(&self) -> &'static str {
        "VarCharRegexDb"
    }

    fn core(&self) -> &ConstraintCore<Self::Factual, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Self::Factual>> {
        let violations = db_access::regex_violations(
            ctx,
            reference,
            &self.pattern,
            self.options.aggregated,
            self.options.n_counterexamples,
        )
        .await?;
        let total = if self.options.aggregated {
            db_access::unique_count(ctx, reference).await?
        } else {
            db_access::row_count(ctx, reference, None).await?
        };
        let mut queries = violations.queries;
        queries.extend(total.queries);
        Ok(Retrieval::new((violations.value, total.value), queries))
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("VarCharRegexDb has no target reference."))
    }
}

impl crate::core::Compare for VarCharRegexDb {
    fn compare(&self, factual: &(RegexViolations, i64), _target: &()) -> Result<Verdict> {
        let (violations, n_total) = factual;
        Ok(regex_failure(
            &self.core.reference,
            &self.pattern,
            violations.n_violations,
            *n_total,
            self.options.relative_tolerance,
            &violations.counterexamples,
            &self.core.condition_string(),
        ))
    }
}

/// Bounds the shortest or longest string length of a column.
#[derive(Debug)]
pub struct VarCharLength {
    core: ConstraintCore<Option<i64>, Option<i64>>,
    check: ExtremumCheck,
}

impl VarCharLength {
    pub fn new(check: ExtremumCheck, core: ConstraintCore<Option<i64>, Option<i64>>) -> Self {
        Self { core, check }
    }

    async fn length(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<i64>>> {
        match self.check {
            ExtremumCheck::Min => db_access::min_length(ctx, reference).await,
            ExtremumCheck::Max => db_access::max_length(ctx, reference).await,
        }
    }
}

#[async_trait]
impl Retrieve for VarCharLength {
    type Factual = Option<i64>;
    type Target = Option<i64>;

    fn kind(&self) -> &'static str {
        match self.check {
            ExtremumCheck::Min => "VarCharMinLength",
            ExtremumCheck::Max => "VarCharMaxLength",
        }
    }

    fn core(&self) -> &ConstraintCore<Option<i64>, Option<i64>> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<i64>>> {
        self.length(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<i64>>> {
        self.length(ctx, reference).await
    }
}

impl crate::core::Compare for VarCharLength {
    fn compare(&self, factual: &Option<i64>, target: &Option<i64>) -> Result<Verdict> {
        let (factual, target) = match (self.check, factual, target) {
            (ExtremumCheck::Min, _, None) => return Ok(Verdict::pass()),
            (ExtremumCheck::Min, None, Some(target)) => {
                return Ok(Verdict::check(*target == 0, || "Empty set.".into()));
            }
            (ExtremumCheck::Max, None, _) => return Ok(Verdict::pass()),
            (ExtremumCheck::Max, Some(_), None) => return Ok(Verdict::fail("Reference value is None.")),
            (_, Some(factual), Some(target)) => (*factual, *target),
        };
        let (name, holds) = match self.check {
            ExtremumCheck::Min => ("min", factual >= target),
            ExtremumCheck::Max => ("max", factual <= target),
        };
        Ok(Verdict::check(holds, || {
            format!(
                "{} has {name} length {factual} instead of {} {target}. {}",
                self.core.reference,
                self.core.target_prefix(),
                self.core.condition_string()
            )
        }))
    }
}
