//! Keys, uniqueness, functional dependencies and NULL fractions.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Row, Value, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::security::InputValidator;
use crate::utils::{apply_output_processors, format_sample, OutputProcessor};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Requires the declared primary key to be exactly the given columns.
#[derive(Debug)]
pub struct PrimaryKeyDefinition {
    core: ConstraintCore<Vec<String>, Vec<String>>,
}

impl PrimaryKeyDefinition {
    pub fn new(core: ConstraintCore<Vec<String>, Vec<String>>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Retrieve for PrimaryKeyDefinition {
    type Factual = Vec<String>;
    type Target = Vec<String>;

    fn kind(&self) -> &'static str {
        "PrimaryKeyDefinition"
    }

    fn core(&self) -> &ConstraintCore<Vec<String>, Vec<String>> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
        db_access::primary_keys(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
        db_access::primary_keys(ctx, reference).await
    }
}

impl crate::core::Compare for PrimaryKeyDefinition {
    fn compare(&self, factual: &Vec<String>, target: &Vec<String>) -> Result<Verdict> {
        let factual: BTreeSet<&String> = factual.iter().collect();
        let target: BTreeSet<&String> = target.iter().collect();
        let reference = &self.core.reference;
        // A missing key is reported in favor of a surplus one.
        if let Some(key) = target.difference(&factual).next() {
            return Ok(Verdict::fail(format!("{reference} doesn't include {key} as primary key.")));
        }
        if let Some(key) = factual.difference(&target).next() {
            return Ok(Verdict::fail(format!(
                "{reference} incorrectly includes {key} as primary key."
            )));
        }
        Ok(Verdict::pass())
    }
}

/// Number of duplicates a [`Uniqueness`] constraint tolerates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DuplicateTolerance {
    /// Fraction of rows that may be duplicates.
    Relative(f64),
    /// Number of rows that may be duplicates.
    Absolute(u64),
}

impl Default for DuplicateTolerance {
    fn default() -> Self {
        Self::Relative(0.0)
    }
}

impl DuplicateTolerance {
    /// Builds the tolerance from the mutually exclusive relative and
    /// absolute budgets; zero counts as unset.
    pub fn from_parts(max_duplicate_fraction: f64, max_absolute_n_duplicates: u64) -> Result<Self> {
        InputValidator::validate_fraction(max_duplicate_fraction, "max_duplicate_fraction")?;
        match (max_duplicate_fraction != 0.0, max_absolute_n_duplicates != 0) {
            (true, true) => Err(JudgeError::configuration(
                "Uniqueness constraint was attempted to be constructed with both a relative \
                 and an absolute tolerance. Only use one of both at a time.",
            )),
            (true, false) => Ok(Self::Relative(max_duplicate_fraction)),
            (false, true) => Ok(Self::Absolute(max_absolute_n_duplicates)),
            (false, false) => Ok(Self::default()),
        }
    }

    fn admits(&self, n_rows: i64, n_uniques: i64) -> bool {
        match *self {
            Self::Relative(fraction) => n_uniques as f64 >= n_rows as f64 * (1.0 - fraction),
            Self::Absolute(n) => n_uniques >= n_rows - n as i64,
        }
    }
}

impl fmt::Display for DuplicateTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative(fraction) => write!(f, "{fraction}"),
            Self::Absolute(n) => write!(f, "{n} rows"),
        }
    }
}

/// Row and distinct counts of the tested columns, plus a duplicate if the
/// tolerance is exceeded.
#[derive(Debug, Clone, PartialEq)]
pub struct UniquenessFactual {
    pub n_rows: i64,
    pub n_uniques: i64,
    /// Reference the counts were taken on, after primary key inference
    pub tested: DataReference,
    pub sample: Option<Row>,
}

/// Requires the selected column tuples to be unique up to a tolerance.
///
/// With `infer_pk_columns` the declared primary key replaces the selected
/// columns when one exists.
#[derive(Debug)]
pub struct Uniqueness {
    core: ConstraintCore<UniquenessFactual, ()>,
    tolerance: DuplicateTolerance,
    infer_pk_columns: bool,
}

impl Uniqueness {
    pub fn new(core: ConstraintCore<UniquenessFactual, ()>, tolerance: DuplicateTolerance, infer_pk_columns: bool) -> Self {
        Self {
            core,
            tolerance,
            infer_pk_columns,
        }
    }

    async fn tested_reference(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<DataReference> {
        if !self.infer_pk_columns {
            return Ok(reference.clone());
        }
        let keys = ctx.primary_keys(&reference.source).await?;
        if keys.is_empty() {
            warn!(source = %reference.source, "No primary keys found, testing uniqueness over the selected columns");
            return Ok(reference.clone());
        }
        debug!(keys = ?keys, "Testing uniqueness over primary key columns");
        Ok(reference.with_columns(Some(keys)))
    }
}

#[async_trait]
impl Retrieve for Uniqueness {
    type Factual = UniquenessFactual;
    type Target = ();

    fn kind(&self) -> &'static str {
        "Uniqueness"
    }

    fn core(&self) -> &ConstraintCore<UniquenessFactual, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniquenessFactual>> {
        let tested = self.tested_reference(ctx, reference).await?;
        let rows = db_access::row_count(ctx, &tested, None).await?;
        let uniques = db_access::unique_count(ctx, &tested).await?;
        let mut queries = rows.queries;
        queries.extend(uniques.queries);

        let sample = if rows.value > 0 && !self.tolerance.admits(rows.value, uniques.value) {
            let sample = db_access::duplicate_sample(ctx, &tested).await?;
            queries.extend(sample.queries);
            sample.value
        } else {
            None
        };
        Ok(Retrieval::new(
            UniquenessFactual {
                n_rows: rows.value,
                n_uniques: uniques.value,
                tested,
                sample,
            },
            queries,
        ))
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("Uniqueness has no target reference."))
    }
}

impl crate::core::Compare for Uniqueness {
    fn compare(&self, factual: &UniquenessFactual, _target: &()) -> Result<Verdict> {
        if factual.n_rows == 0 {
            return Ok(Verdict::pass_with("No occurrences."));
        }
        Ok(Verdict::check(self.tolerance.admits(factual.n_rows, factual.n_uniques), || {
            let sample = factual
                .sample
                .as_ref()
                .map_or_else(|| "None".to_string(), |row| format_sample(row, &factual.tested));
            format!(
                "{} has {} rows > {} uniques. This surpasses the max_duplicate_fraction of {}. \
                 An example tuple breaking the uniqueness condition is: {sample}.",
                factual.tested, factual.n_rows, factual.n_uniques, self.tolerance
            )
        }))
    }
}

/// Requires the key columns to determine the remaining selected columns.
#[derive(Debug)]
pub struct FunctionalDependency {
    core: ConstraintCore<Vec<Row>, ()>,
    key_columns: Vec<String>,
    output_processors: Vec<OutputProcessor>,
}

impl FunctionalDependency {
    pub fn new(
        core: ConstraintCore<Vec<Row>, ()>,
        key_columns: Vec<String>,
        output_processors: Vec<OutputProcessor>,
    ) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(JudgeError::configuration(
                "FunctionalDependency needs at least one key column.",
            ));
        }
        Ok(Self {
            core,
            key_columns,
            output_processors,
        })
    }
}

#[async_trait]
impl Retrieve for FunctionalDependency {
    type Factual = Vec<Row>;
    type Target = ();

    fn kind(&self) -> &'static str {
        "FunctionalDependency"
    }

    fn core(&self) -> &ConstraintCore<Vec<Row>, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<Row>>> {
        db_access::functional_dependency_violations(ctx, reference, &self.key_columns).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("FunctionalDependency has no target reference."))
    }
}

impl crate::core::Compare for FunctionalDependency {
    fn compare(&self, factual: &Vec<Row>, _target: &()) -> Result<Verdict> {
        if factual.is_empty() {
            return Ok(Verdict::pass());
        }
        let tuples = factual.iter().cloned().map(Value::Tuple).collect();
        let (tuples, _) = apply_output_processors(&self.output_processors, tuples, None)?;
        let listed: Vec<String> = tuples.iter().map(ToString::to_string).collect();
        Ok(Verdict::fail(format!(
            "{} has violations of functional dependence (in total {} rows):\n{}",
            self.core.reference,
            factual.len(),
            listed.join("\n")
        )))
    }
}

/// Bounds the fraction of NULLs in a column.
///
/// The target fraction, literal or measured on a second reference, may be
/// exceeded by `max_relative_deviation` times itself.
#[derive(Debug)]
pub struct MaxNullFraction {
    core: ConstraintCore<f64, f64>,
    max_relative_deviation: f64,
}

impl MaxNullFraction {
    pub fn new(core: ConstraintCore<f64, f64>, max_relative_deviation: f64) -> Result<Self> {
        if let Some(max_null_fraction) = core.target.value() {
            InputValidator::validate_fraction(*max_null_fraction, "max_null_fraction")?;
        }
        InputValidator::validate_non_negative(max_relative_deviation, "max_relative_deviation")?;
        Ok(Self {
            core,
            max_relative_deviation,
        })
    }

    /// A column free of NULLs.
    pub fn null_absence(reference: DataReference, name: Option<String>, cache_size: Option<usize>) -> Self {
        Self {
            core: ConstraintCore::within(reference, 0.0, name, cache_size),
            max_relative_deviation: 0.0,
        }
    }
}

#[async_trait]
impl Retrieve for MaxNullFraction {
    type Factual = f64;
    type Target = f64;

    fn kind(&self) -> &'static str {
        "MaxNullFraction"
    }

    fn core(&self) -> &ConstraintCore<f64, f64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<f64>> {
        db_access::missing_fraction(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<f64>> {
        db_access::missing_fraction(ctx, reference).await
    }
}

impl crate::core::Compare for MaxNullFraction {
    fn compare(&self, factual: &f64, target: &f64) -> Result<Verdict> {
        let threshold = target * (1.0 + self.max_relative_deviation);
        Ok(Verdict::check(*factual <= threshold, || {
            format!(
                "{factual} of {} values are NULL while only {}{threshold} were allowed to be NULL.",
                self.core.reference,
                self.core.target_prefix()
            )
        }))
    }
}
