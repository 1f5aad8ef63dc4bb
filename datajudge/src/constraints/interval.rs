//! Gap and overlap constraints over date or numeric ranges.
//!
//! Rows are grouped into keys by `key_columns`. The fraction of keys with at
//! least one violation, relative to all distinct keys, must not exceed
//! `max_relative_n_violations`. Without key columns, every row is its own
//! key.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Row, Value, Verdict,
};
use crate::db_access::{self, GapKind};
use crate::prelude::*;
use crate::security::InputValidator;
use async_trait::async_trait;
use tracing::debug;

/// Shared configuration of the interval constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalOptions {
    /// Columns identifying the entity owning a range
    pub key_columns: Option<Vec<String>>,
    /// Whether the end of a range belongs to the range
    pub end_included: bool,
    pub max_relative_n_violations: f64,
    /// Largest distance between consecutive ranges that is not a gap
    pub legitimate_gap_size: f64,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            key_columns: None,
            end_included: true,
            max_relative_n_violations: 0.0,
            legitimate_gap_size: 0.0,
        }
    }
}

impl IntervalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = Some(key_columns);
        self
    }

    pub fn with_end_included(mut self, end_included: bool) -> Self {
        self.end_included = end_included;
        self
    }

    pub fn with_max_relative_n_violations(mut self, fraction: f64) -> Self {
        self.max_relative_n_violations = fraction;
        self
    }

    pub fn with_legitimate_gap_size(mut self, size: f64) -> Self {
        self.legitimate_gap_size = size;
        self
    }
}

/// Violating keys, all distinct keys and an example violation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalFactual {
    pub n_violation_keys: i64,
    pub n_distinct_keys: i64,
    pub sample: Option<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IntervalCheck {
    NoOverlap,
    NoGap { legitimate_gap_size: f64 },
}

/// Detects overlapping ranges or gaps between consecutive ranges per key.
#[derive(Debug)]
pub struct IntervalConstraint {
    core: ConstraintCore<IntervalFactual, ()>,
    domain: GapKind,
    check: IntervalCheck,
    key_columns: Option<Vec<String>>,
    start_columns: Vec<String>,
    end_columns: Vec<String>,
    end_included: bool,
    max_relative_n_violations: f64,
}

impl IntervalConstraint {
    /// Overlaps in one dimension, or in two for dates.
    pub fn no_overlap(
        core: ConstraintCore<IntervalFactual, ()>,
        domain: GapKind,
        start_columns: Vec<String>,
        end_columns: Vec<String>,
        options: IntervalOptions,
    ) -> Result<Self> {
        let max_dimensions = match domain {
            GapKind::Date => 2,
            GapKind::Numeric => 1,
        };
        for (name, columns) in [("start_column", &start_columns), ("end_column", &end_columns)] {
            if columns.is_empty() || columns.len() > max_dimensions {
                return Err(JudgeError::configuration(format!(
                    "Expected between 1 and {max_dimensions} {name}(s), got {}.",
                    columns.len()
                )));
            }
        }
        if start_columns.len() != end_columns.len() {
            return Err(JudgeError::configuration(format!(
                "Expected as many start_columns as end_columns, got {} and {}.",
                start_columns.len(),
                end_columns.len()
            )));
        }
        Self::build(core, domain, IntervalCheck::NoOverlap, start_columns, end_columns, options)
    }

    /// Gaps between consecutive ranges.
    ///
    /// For dates an included end shifts the legitimate gap by one day, since
    /// a range ending on the day before the next range starts leaves no gap.
    pub fn no_gap(
        core: ConstraintCore<IntervalFactual, ()>,
        domain: GapKind,
        start_column: String,
        end_column: String,
        options: IntervalOptions,
    ) -> Result<Self> {
        InputValidator::validate_non_negative(options.legitimate_gap_size, "legitimate_gap_size")?;
        let legitimate_gap_size = match domain {
            GapKind::Date if options.end_included => options.legitimate_gap_size + 1.0,
            _ => options.legitimate_gap_size,
        };
        Self::build(
            core,
            domain,
            IntervalCheck::NoGap { legitimate_gap_size },
            vec![start_column],
            vec![end_column],
            options,
        )
    }

    fn build(
        core: ConstraintCore<IntervalFactual, ()>,
        domain: GapKind,
        check: IntervalCheck,
        start_columns: Vec<String>,
        end_columns: Vec<String>,
        options: IntervalOptions,
    ) -> Result<Self> {
        InputValidator::validate_fraction(options.max_relative_n_violations, "max_relative_n_violations")?;
        Ok(Self {
            core,
            domain,
            check,
            key_columns: options.key_columns,
            start_columns,
            end_columns,
            end_included: options.end_included,
            max_relative_n_violations: options.max_relative_n_violations,
        })
    }

    fn ranges_description(&self) -> String {
        self.start_columns
            .iter()
            .zip(&self.end_columns)
            .map(|(start, end)| format!("{start} and {end}"))
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

#[async_trait]
impl Retrieve for IntervalConstraint {
    type Factual = IntervalFactual;
    type Target = ();

    fn kind(&self) -> &'static str {
        match (self.check, self.domain, self.start_columns.len()) {
            (IntervalCheck::NoOverlap, GapKind::Numeric, _) => "NumericNoOverlap",
            (IntervalCheck::NoOverlap, GapKind::Date, 1) => "DateNoOverlap",
            (IntervalCheck::NoOverlap, GapKind::Date, _) => "DateNoOverlap2d",
            (IntervalCheck::NoGap { .. }, GapKind::Numeric, _) => "NumericNoGap",
            (IntervalCheck::NoGap { .. }, GapKind::Date, _) => "DateNoGap",
        }
    }

    fn core(&self) -> &ConstraintCore<IntervalFactual, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<IntervalFactual>> {
        let keys = DataReference::new(
            reference.source.clone(),
            self.key_columns.clone(),
            reference.condition.clone(),
        );
        let distinct = db_access::unique_count(ctx, &keys).await?;

        let key_columns = self.key_columns.clone().unwrap_or_default();
        let violations = match self.check {
            IntervalCheck::NoOverlap => {
                db_access::interval_overlaps(
                    ctx,
                    reference,
                    &key_columns,
                    &self.start_columns,
                    &self.end_columns,
                    self.end_included,
                )
                .await?
            }
            IntervalCheck::NoGap { legitimate_gap_size } => {
                db_access::interval_gaps(
                    ctx,
                    reference,
                    &key_columns,
                    &self.start_columns[0],
                    &self.end_columns[0],
                    legitimate_gap_size,
                    self.domain,
                )
                .await?
            }
        };

        debug!(
            n_violation_keys = violations.value.n_violation_keys,
            n_distinct_keys = distinct.value,
            "Retrieved interval violations"
        );
        let mut queries = distinct.queries;
        queries.extend(violations.queries);
        Ok(Retrieval::new(
            IntervalFactual {
                n_violation_keys: violations.value.n_violation_keys,
                n_distinct_keys: distinct.value,
                sample: violations.value.sample,
            },
            queries,
        ))
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("Interval constraints have no target reference."))
    }
}

impl crate::core::Compare for IntervalConstraint {
    fn compare(&self, factual: &IntervalFactual, _target: &()) -> Result<Verdict> {
        if factual.n_distinct_keys == 0 {
            return Ok(Verdict::pass());
        }
        let violation_fraction = factual.n_violation_keys as f64 / factual.n_distinct_keys as f64;
        Ok(Verdict::check(violation_fraction <= self.max_relative_n_violations, || {
            let issue = match (self.check, self.domain) {
                (IntervalCheck::NoOverlap, GapKind::Date) => "with overlapping date ranges in",
                (IntervalCheck::NoOverlap, GapKind::Numeric) => "with overlapping ranges in",
                (IntervalCheck::NoGap { .. }, GapKind::Date) => "with a gap in the date range in",
                (IntervalCheck::NoGap { .. }, GapKind::Numeric) => "with a gap in the range in",
            };
            let sample = factual
                .sample
                .clone()
                .map_or_else(|| "None".to_string(), |row| Value::Tuple(row).to_string());
            format!(
                "{} has a ratio of {violation_fraction} > {} keys in columns {:?} {issue} {}. E.g. for: {sample}.",
                self.core.reference,
                self.max_relative_n_violations,
                self.key_columns.as_deref().unwrap_or_default(),
                self.ranges_description()
            )
        }))
    }
}
