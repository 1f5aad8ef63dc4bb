//! Constraints on the distinct values of one or more columns.
//!
//! The value-set constraints ([`Uniques`]) run retrieved values through a
//! small pipeline before comparing:
//!
//! 1. a [`NullFilter`] decides which values are dropped,
//! 2. an optional map function transforms each value,
//! 3. an optional reduce function transforms the whole collection.
//!
//! Output processors then shape the values listed in failure messages.

use crate::core::{
    run_test, Constraint, ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve,
    TestResult, ToleranceGetter, Value, Verdict,
};
use crate::db_access::{self, UniqueCounts};
use crate::prelude::*;
use crate::utils::{apply_output_processors, format_values, OutputProcessor};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decides whether a retrieved value takes part in a comparison.
#[derive(Clone, Default)]
pub enum NullFilter {
    /// Keeps every value.
    Keep,
    /// Drops single NULL values. Tuples are never NULL themselves and
    /// therefore always kept.
    #[default]
    DropNullElements,
    /// Drops NULL values and tuples made of NULLs only.
    DropTuplesAllNull,
    /// Drops NULL values and tuples containing any NULL.
    DropTuplesAnyNull,
    /// Keeps the values for which the predicate holds.
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl fmt::Debug for NullFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("Keep"),
            Self::DropNullElements => f.write_str("DropNullElements"),
            Self::DropTuplesAllNull => f.write_str("DropTuplesAllNull"),
            Self::DropTuplesAnyNull => f.write_str("DropTuplesAnyNull"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl NullFilter {
    /// The historic default: NULLs are dropped for a single column and kept
    /// as soon as several columns are compared.
    pub fn legacy_default(n_columns: usize) -> Self {
        if n_columns <= 1 {
            Self::DropNullElements
        } else {
            Self::Keep
        }
    }

    pub fn keeps(&self, value: &Value) -> bool {
        match self {
            Self::Keep => true,
            Self::DropNullElements => !value.is_null(),
            Self::DropTuplesAllNull => !value.components().iter().all(Value::is_null),
            Self::DropTuplesAnyNull => !value.components().iter().any(Value::is_null),
            Self::Custom(predicate) => predicate(value),
        }
    }
}

/// Transforms each retrieved value.
pub type MapFunc = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Transforms the whole collection of retrieved values.
pub type ReduceFunc = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// Configuration of the value-set constraints.
#[derive(Clone, Default)]
pub struct UniquesOptions {
    /// `None` applies [`NullFilter::legacy_default`]
    pub null_filter: Option<NullFilter>,
    pub map_func: Option<MapFunc>,
    pub reduce_func: Option<ReduceFunc>,
    pub max_relative_violations: f64,
    /// Weight subset violations by distinct value instead of by row
    pub compare_distinct: bool,
    pub output_processors: Vec<OutputProcessor>,
}

impl fmt::Debug for UniquesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniquesOptions")
            .field("null_filter", &self.null_filter)
            .field("map_func", &self.map_func.is_some())
            .field("reduce_func", &self.reduce_func.is_some())
            .field("max_relative_violations", &self.max_relative_violations)
            .field("compare_distinct", &self.compare_distinct)
            .field("output_processors", &self.output_processors)
            .finish()
    }
}

impl UniquesOptions {
    pub fn new() -> Self {
        Self {
            output_processors: vec![OutputProcessor::default()],
            ..Self::default()
        }
    }

    pub fn with_null_filter(mut self, filter: NullFilter) -> Self {
        self.null_filter = Some(filter);
        self
    }

    pub fn with_map(mut self, map: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.map_func = Some(Arc::new(map));
        self
    }

    pub fn with_reduce(mut self, reduce: impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.reduce_func = Some(Arc::new(reduce));
        self
    }

    pub fn with_max_relative_violations(mut self, fraction: f64) -> Self {
        self.max_relative_violations = fraction;
        self
    }

    pub fn with_compare_distinct(mut self, compare_distinct: bool) -> Self {
        self.compare_distinct = compare_distinct;
        self
    }

    pub fn with_output_processors(mut self, processors: Vec<OutputProcessor>) -> Self {
        self.output_processors = processors;
        self
    }
}

/// Distinct values with their row counts.
///
/// Literal targets carry no counts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniqueValues {
    pub values: Vec<Value>,
    pub counts: Vec<i64>,
}

impl UniqueValues {
    /// A literal collection of expected values.
    pub fn literal(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            counts: Vec::new(),
        }
    }

    fn distinct(&self) -> BTreeSet<&Value> {
        self.values.iter().collect()
    }
}

/// Which relation between factual and target value sets must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniquesCheck {
    Equality,
    Subset,
    Superset,
}

/// Compares the set of distinct values of a reference against expected
/// values or the distinct values of a second reference.
#[derive(Debug)]
pub struct Uniques {
    core: ConstraintCore<UniqueValues, UniqueValues>,
    check: UniquesCheck,
    options: UniquesOptions,
}

impl Uniques {
    pub fn new(
        check: UniquesCheck,
        core: ConstraintCore<UniqueValues, UniqueValues>,
        options: UniquesOptions,
    ) -> Result<Self> {
        if check == UniquesCheck::Equality && options.max_relative_violations != 0.0 {
            return Err(JudgeError::configuration(
                "UniquesEquality does not tolerate violations; max_relative_violations must be 0.",
            ));
        }
        crate::security::InputValidator::validate_fraction(
            options.max_relative_violations,
            "max_relative_violations",
        )?;
        Ok(Self { core, check, options })
    }

    async fn pipeline(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueValues>> {
        let retrieval = db_access::uniques(ctx, reference).await?;
        let n_columns = reference.columns.as_ref().map_or(0, Vec::len);
        let filter = self
            .options
            .null_filter
            .clone()
            .unwrap_or_else(|| NullFilter::legacy_default(n_columns));

        Ok(retrieval.map(|counts| {
            let (mut values, mut counts): (Vec<Value>, Vec<i64>) =
                counts.into_iter().filter(|(value, _)| filter.keeps(value)).unzip();
            if let Some(map) = &self.options.map_func {
                values = values.into_iter().map(|v| map(v)).collect();
            }
            if let Some(reduce) = &self.options.reduce_func {
                values = reduce(values);
                // A reduction may merge or split values; counts no longer
                // line up, so every remaining value weighs once.
                if values.len() != counts.len() {
                    counts = vec![1; values.len()];
                }
            }
            UniqueValues { values, counts }
        }))
    }

    fn processed(&self, values: Vec<Value>) -> Result<String> {
        let (values, _) = apply_output_processors(&self.options.output_processors, values, None)?;
        Ok(format_values(&values))
    }

    fn compare_equality(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Verdict> {
        let (factual_set, target_set) = (factual.distinct(), target.distinct());
        let excess: Vec<Value> = factual_set.difference(&target_set).map(|v| (*v).clone()).collect();
        let lacking: Vec<Value> = target_set.difference(&factual_set).map(|v| (*v).clone()).collect();
        let reference = &self.core.reference;
        let condition = self.core.condition_string();
        let message = match (excess.is_empty(), lacking.is_empty()) {
            (true, true) => return Ok(Verdict::pass()),
            (false, false) => format!(
                "{reference} doesn't have the element(s) '{}' and has the excess element(s) '{}' \
                 when compared with the reference values. {condition}",
                self.processed(lacking)?,
                self.processed(excess)?
            ),
            (false, true) => format!(
                "{reference} has the excess element(s) '{}' when compared with the reference values. {condition}",
                self.processed(excess)?
            ),
            (true, false) => format!(
                "{reference} doesn't have the element(s) '{}' when compared with the reference values. {condition}",
                self.processed(lacking)?
            ),
        };
        Ok(Verdict::fail(message))
    }

    fn compare_subset(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Verdict> {
        let target_set = target.distinct();
        let counted = factual.values.len() == factual.counts.len();
        let weight = |index: usize| -> i64 {
            if self.options.compare_distinct || !counted {
                1
            } else {
                factual.counts[index]
            }
        };

        let mut excess = Vec::new();
        let mut excess_counts = Vec::new();
        let (mut n_rows, mut n_violations) = (0i64, 0i64);
        for (index, value) in factual.values.iter().enumerate() {
            n_rows += weight(index);
            if !target_set.contains(value) {
                n_violations += weight(index);
                excess.push(value.clone());
                excess_counts.push(Value::Int(if counted { factual.counts[index] } else { 1 }));
            }
        }
        if n_rows == 0 {
            return Ok(Verdict::pass());
        }
        let relative_violations = n_violations as f64 / n_rows as f64;
        let max = self.options.max_relative_violations;
        if relative_violations <= max {
            return Ok(Verdict::pass());
        }

        let (excess, excess_counts) =
            apply_output_processors(&self.options.output_processors, excess, Some(excess_counts))?;
        let distinct = if self.options.compare_distinct { "DISTINCT " } else { "" };
        Ok(Verdict::fail(format!(
            "{} has a fraction of {relative_violations} > {max} {distinct}values ({n_violations} / {n_rows}) \
             not being an element of '{}'. It has excess elements '{}' with counts {}.{}",
            self.core.reference,
            self.processed(target_set.into_iter().cloned().collect())?,
            format_values(&excess),
            format_values(&excess_counts.unwrap_or_default()),
            self.core.condition_string()
        )))
    }

    fn compare_superset(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Verdict> {
        let (factual_set, target_set) = (factual.distinct(), target.distinct());
        if factual_set.is_empty() || target_set.is_empty() {
            return Ok(Verdict::pass());
        }
        let lacking: Vec<Value> = target_set.difference(&factual_set).map(|v| (*v).clone()).collect();
        let relative_violations = lacking.len() as f64 / target_set.len() as f64;
        let max = self.options.max_relative_violations;
        if relative_violations <= max {
            return Ok(Verdict::pass());
        }
        Ok(Verdict::fail(format!(
            "{} has a fraction of {relative_violations} > {max} lacking unique values of '{}'. \
             E.g. it doesn't have the unique value(s) '{}'.{}",
            self.core.reference,
            self.processed(target_set.into_iter().cloned().collect())?,
            self.processed(lacking)?,
            self.core.condition_string()
        )))
    }
}

#[async_trait]
impl Retrieve for Uniques {
    type Factual = UniqueValues;
    type Target = UniqueValues;

    fn kind(&self) -> &'static str {
        match self.check {
            UniquesCheck::Equality => "UniquesEquality",
            UniquesCheck::Subset => "UniquesSubset",
            UniquesCheck::Superset => "UniquesSuperset",
        }
    }

    fn core(&self) -> &ConstraintCore<UniqueValues, UniqueValues> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueValues>> {
        self.pipeline(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueValues>> {
        self.pipeline(ctx, reference).await
    }
}

impl crate::core::Compare for Uniques {
    fn compare(&self, factual: &UniqueValues, target: &UniqueValues) -> Result<Verdict> {
        debug!(
            n_factual = factual.values.len(),
            n_target = target.values.len(),
            "Comparing value sets"
        );
        match self.check {
            UniquesCheck::Equality => self.compare_equality(factual, target),
            UniquesCheck::Subset => self.compare_subset(factual, target),
            UniquesCheck::Superset => self.compare_superset(factual, target),
        }
    }
}

/// How the number of distinct values is compared.
#[derive(Clone)]
pub enum NUniquesCheck {
    Equality,
    MaxLoss(ToleranceGetter),
    MaxGain(ToleranceGetter),
}

impl fmt::Debug for NUniquesCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl NUniquesCheck {
    fn kind(&self) -> &'static str {
        match self {
            Self::Equality => "NUniquesEquality",
            Self::MaxLoss(_) => "NUniquesMaxLoss",
            Self::MaxGain(_) => "NUniquesMaxGain",
        }
    }
}

/// Compares the number of distinct column tuples.
#[derive(Debug)]
pub struct NUniques {
    core: ConstraintCore<i64, i64>,
    check: NUniquesCheck,
}

impl NUniques {
    pub fn new(check: NUniquesCheck, core: ConstraintCore<i64, i64>) -> Result<Self> {
        if !matches!(check, NUniquesCheck::Equality) && core.ref2().is_none() {
            return Err(JudgeError::configuration(format!(
                "{} compares two references and needs ref2.",
                check.kind()
            )));
        }
        Ok(Self { core, check })
    }

    fn compare_counts(&self, factual: i64, target: i64, tolerance: f64) -> Verdict {
        let reference = &self.core.reference;
        let condition = self.core.condition_string();
        let ref2 = self.core.ref2().map(ToString::to_string).unwrap_or_default();
        match self.check {
            NUniquesCheck::Equality => Verdict::check(factual == target, || {
                format!(
                    "{reference} has {factual} unique(s) instead of {}{target}. {condition}",
                    self.core.target_prefix()
                )
            }),
            NUniquesCheck::MaxLoss(_) => {
                if target == 0 || factual > target {
                    return Verdict::pass();
                }
                let relative_loss = (target - factual) as f64 / target as f64;
                Verdict::check(relative_loss <= tolerance, || {
                    format!(
                        "{reference} has lost {relative_loss} of #uniques of table {ref2}. \
                         It was only allowed to decrease {tolerance}. {condition}"
                    )
                })
            }
            NUniquesCheck::MaxGain(_) => {
                if target == 0 {
                    return Verdict::fail("Target table empty.");
                }
                if factual < target {
                    return Verdict::pass();
                }
                let relative_gain = (factual - target) as f64 / target as f64;
                Verdict::check(relative_gain <= tolerance, || {
                    format!(
                        "{reference} has {relative_gain} of #uniques of {ref2}. \
                         It was only allowed to increase {tolerance} . {condition}"
                    )
                })
            }
        }
    }
}

#[async_trait]
impl Retrieve for NUniques {
    type Factual = i64;
    type Target = i64;

    fn kind(&self) -> &'static str {
        self.check.kind()
    }

    fn core(&self) -> &ConstraintCore<i64, i64> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
        db_access::unique_count(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
        db_access::unique_count(ctx, reference).await
    }
}

#[async_trait]
impl Constraint for NUniques {
    fn kind(&self) -> &'static str {
        self.check.kind()
    }

    fn description(&self) -> String {
        self.core.description(self.check.kind())
    }

    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult> {
        let tolerance = match &self.check {
            NUniquesCheck::MaxLoss(getter) | NUniquesCheck::MaxGain(getter) => getter(ctx).await?,
            NUniquesCheck::Equality => 0.0,
        };
        run_test(self, ctx, |factual, target| {
            Ok(self.compare_counts(*factual, *target, tolerance))
        })
        .await
    }
}

/// Allowed share `(min, max)` of the rows per category.
pub type ShareBounds = (f64, f64);

/// Checks that every category's share of rows lies within its bounds.
///
/// Categories missing from the distribution fall back to `default_bounds`.
/// The summed excess above and deficit below the bounds, relative to the
/// number of rows, must not exceed `max_relative_violations`.
#[derive(Debug)]
pub struct CategoricalBound {
    core: ConstraintCore<UniqueCounts, Vec<(Value, ShareBounds)>>,
    default_bounds: ShareBounds,
    max_relative_violations: f64,
}

impl CategoricalBound {
    pub fn new(
        core: ConstraintCore<UniqueCounts, Vec<(Value, ShareBounds)>>,
        default_bounds: ShareBounds,
        max_relative_violations: f64,
    ) -> Result<Self> {
        for (_, (min, max)) in core.target.value().into_iter().flatten() {
            if min > max {
                return Err(JudgeError::configuration(format!(
                    "Share bounds ({min}, {max}) have a lower bound above the upper bound."
                )));
            }
        }
        Ok(Self {
            core,
            default_bounds,
            max_relative_violations,
        })
    }
}

#[async_trait]
impl Retrieve for CategoricalBound {
    type Factual = UniqueCounts;
    type Target = Vec<(Value, ShareBounds)>;

    fn kind(&self) -> &'static str {
        "CategoricalBoundConstraint"
    }

    fn core(&self) -> &ConstraintCore<Self::Factual, Self::Target> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueCounts>> {
        db_access::uniques(ctx, reference).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<Self::Target>> {
        Err(JudgeError::configuration(
            "CategoricalBoundConstraint only supports a literal distribution.",
        ))
    }
}

impl crate::core::Compare for CategoricalBound {
    fn compare(&self, factual: &UniqueCounts, target: &Vec<(Value, ShareBounds)>) -> Result<Verdict> {
        let total: i64 = factual.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return Ok(Verdict::pass_with("No rows."));
        }
        let observed: BTreeMap<&Value, i64> = factual.iter().map(|(v, c)| (v, *c)).collect();
        let bounds: BTreeMap<&Value, ShareBounds> = target.iter().map(|(v, b)| (v, *b)).collect();
        let variants: BTreeSet<&Value> = observed.keys().chain(bounds.keys()).copied().collect();

        let total_f = total as f64;
        let mut violating = Vec::new();
        let mut n_violations = 0.0;
        for variant in variants {
            let count = observed.get(variant).copied().unwrap_or(0) as f64;
            let (min_share, max_share) = bounds.get(variant).copied().unwrap_or(self.default_bounds);
            let (min_count, max_count) = (min_share * total_f, max_share * total_f);
            let violation = (count - max_count).max(0.0) + (min_count - count).max(0.0);
            if violation > 0.0 {
                n_violations += violation;
                violating.push((variant, count, min_share, max_share, min_count, max_count));
            }
        }

        let relative_violations = n_violations / total_f;
        if relative_violations <= self.max_relative_violations {
            return Ok(Verdict::pass());
        }
        let mut message = format!(
            "{} has {}% > {}% of element(s) violating the bound constraints:\n",
            self.core.reference,
            relative_violations * 100.0,
            self.max_relative_violations * 100.0
        );
        for (variant, count, min_share, max_share, min_count, max_count) in violating {
            message.push_str(&format!(
                "'{variant}' with a share of {}% ({count} out of {total}) while a share between \
                 {}% ({}) and {}% ({}) is required\n",
                count / total_f * 100.0,
                min_share * 100.0,
                min_count.ceil(),
                max_share * 100.0,
                max_count.floor()
            ));
        }
        message.push_str(&self.core.condition_string());
        Ok(Verdict::fail(message))
    }
}
