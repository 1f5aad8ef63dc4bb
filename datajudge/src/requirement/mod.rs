//! Requirements: ordered collections of constraints over one or two sources.
//!
//! A [`WithinRequirement`] asserts properties of a single data source against
//! literal expectations. A [`BetweenRequirement`] compares two sources, for
//! instance two versions of the same table.
//!
//! Every `add_*_constraint` method validates its parameters immediately, so
//! configuration mistakes surface when the requirement is built rather than
//! when it is tested.
//!
//! ```rust,no_run
//! use datajudge::requirement::{ConstraintSettings, Requirement, WithinRequirement};
//! # async fn example(ctx: &datajudge::core::ExecutionContext) -> datajudge::prelude::Result<()> {
//! let mut requirement = WithinRequirement::from_table("db", Some("public"), "orders");
//! requirement
//!     .add_n_rows_min_constraint(1_000, ConstraintSettings::new())?
//!     .add_null_absence_constraint("order_id", ConstraintSettings::new())?;
//! for result in requirement.test(ctx).await? {
//!     assert!(result.outcome, "{}", result.failure_message.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

mod between;
mod within;

pub use between::BetweenRequirement;
pub use within::WithinRequirement;

use crate::core::{BoxedConstraint, Condition, DataReference, DataSource, ExecutionContext, TestResult};
use crate::prelude::*;
use crate::security::InputValidator;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

/// Settings shared by every constraint a requirement builds.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSettings {
    /// Filter on the first (or only) source
    pub condition: Option<Condition>,
    /// Filter on the second source of a between requirement
    pub condition2: Option<Condition>,
    /// Overrides the generated description
    pub name: Option<String>,
    /// Number of execution contexts whose retrievals are remembered
    pub cache_size: Option<usize>,
}

impl ConstraintSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the conditions of both sources of a between requirement.
    pub fn with_conditions(mut self, condition: Option<Condition>, condition2: Option<Condition>) -> Self {
        self.condition = condition;
        self.condition2 = condition2;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = Some(cache_size);
        self
    }

    fn reference(&self, source: &DataSource, columns: Option<Vec<String>>) -> DataReference {
        DataReference::new(source.clone(), columns, self.condition.clone())
    }

    fn reference2(&self, source: &DataSource, columns: Option<Vec<String>>) -> DataReference {
        DataReference::new(source.clone(), columns, self.condition2.clone())
    }
}

/// A relative tolerance given as a constant, as a deviation from the date
/// growth between both sources, or as the larger of both.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GainTolerance {
    pub constant: Option<f64>,
    pub date_range_deviation: Option<f64>,
}

impl GainTolerance {
    pub fn constant(value: f64) -> Self {
        Self {
            constant: Some(value),
            date_range_deviation: None,
        }
    }

    /// Growth of the date span of the first source over the second, plus
    /// `deviation`.
    pub fn date_range(deviation: f64) -> Self {
        Self {
            constant: None,
            date_range_deviation: Some(deviation),
        }
    }

    /// The maximum of `constant` and the date-range based tolerance.
    pub fn either(constant: f64, deviation: f64) -> Self {
        Self {
            constant: Some(constant),
            date_range_deviation: Some(deviation),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(constant) = self.constant {
            InputValidator::validate_finite(constant, "constant tolerance")?;
        }
        if let Some(deviation) = self.date_range_deviation {
            InputValidator::validate_finite(deviation, "date range deviation")?;
        }
        Ok(())
    }
}

/// An ordered collection of constraints.
#[async_trait]
pub trait Requirement: Send + Sync {
    fn constraints(&self) -> &[BoxedConstraint];

    fn len(&self) -> usize {
        self.constraints().len()
    }

    fn is_empty(&self) -> bool {
        self.constraints().is_empty()
    }

    /// Tests every constraint in order.
    ///
    /// Comparison failures are part of the returned results. Retrieval
    /// errors and unsupported capabilities abort the run.
    #[instrument(skip_all, fields(requirement.constraints = self.len(), context.dialect = %ctx.dialect()))]
    async fn test(&self, ctx: &ExecutionContext) -> Result<Vec<TestResult>> {
        let mut results = Vec::with_capacity(self.len());
        for constraint in self.constraints() {
            debug!(constraint.description = %constraint.description(), "Testing constraint");
            results.push(constraint.test(ctx).await?);
        }
        let n_failures = results.iter().filter(|r| !r.outcome).count();
        info!(
            requirement.constraints = results.len(),
            requirement.failures = n_failures,
            "Tested requirement"
        );
        Ok(results)
    }
}

fn columns(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| (*c).to_string()).collect()
}
