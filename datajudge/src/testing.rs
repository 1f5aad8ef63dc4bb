//! Running constraints as individual test cases.
//!
//! [`collect_test_cases`] flattens requirements into one [`TestCase`] per
//! constraint, identified by the constraint's description. A test harness
//! can then evaluate each case separately and report failures with the
//! formatted failure message.
//!
//! ```rust,no_run
//! use datajudge::formatters::DefaultFormatter;
//! use datajudge::requirement::{ConstraintSettings, Requirement, WithinRequirement};
//! use datajudge::testing::{assert_constraint, collect_test_cases};
//!
//! # async fn example(ctx: &datajudge::core::ExecutionContext) -> datajudge::prelude::Result<()> {
//! let mut requirement = WithinRequirement::from_table("db", Some("public"), "orders");
//! requirement.add_n_rows_min_constraint(1, ConstraintSettings::new())?;
//! let requirements: Vec<&dyn Requirement> = vec![&requirement];
//! let cases = collect_test_cases(requirements);
//! for case in &cases {
//!     assert_constraint(&case, ctx, &DefaultFormatter).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::core::{Constraint, ExecutionContext, TestResult};
use crate::formatters::Formatter;
use crate::prelude::*;
use crate::requirement::Requirement;
use tracing::{info, instrument, warn};

/// A single constraint taken out of its requirement.
#[derive(Debug, Clone, Copy)]
pub struct TestCase<'a> {
    /// `"<kind>::<source>"` unless the constraint was renamed
    pub id: &'a str,
    pub constraint: &'a dyn Constraint,
}

/// Owned identifiers paired with the constraints they name.
#[derive(Debug)]
pub struct TestCases<'a> {
    cases: Vec<(String, &'a dyn Constraint)>,
}

impl<'a> TestCases<'a> {
    pub fn iter(&self) -> impl Iterator<Item = TestCase<'_>> {
        self.cases.iter().map(|(id, constraint)| TestCase {
            id: id.as_str(),
            constraint: *constraint,
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.cases.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl<'s, 'a> IntoIterator for &'s TestCases<'a> {
    type Item = TestCase<'s>;
    type IntoIter = Box<dyn Iterator<Item = TestCase<'s>> + 's>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Collects every constraint of `requirements`, in order.
pub fn collect_test_cases<'a, I>(requirements: I) -> TestCases<'a>
where
    I: IntoIterator<Item = &'a dyn Requirement>,
{
    let cases = requirements
        .into_iter()
        .flat_map(|requirement| requirement.constraints().iter())
        .map(|constraint| (constraint.description(), &**constraint as &dyn Constraint))
        .collect();
    TestCases { cases }
}

/// Tests one case and logs its outcome.
#[instrument(skip_all, fields(test_case.id = %case.id))]
pub async fn run_test_case(case: &TestCase<'_>, ctx: &ExecutionContext) -> Result<TestResult> {
    let result = case.constraint.test(ctx).await?;
    if result.outcome {
        info!("Constraint holds");
    } else {
        warn!(query_log = %result.logging_message(), "Constraint does not hold");
    }
    Ok(result)
}

/// Tests one case, turning a failing outcome into
/// [`JudgeError::ConstraintFailed`] carrying the message rendered by
/// `formatter`.
pub async fn assert_constraint(
    case: &TestCase<'_>,
    ctx: &ExecutionContext,
    formatter: &dyn Formatter,
) -> Result<TestResult> {
    let result = run_test_case(case, ctx).await?;
    if result.outcome {
        return Ok(result);
    }
    Err(JudgeError::ConstraintFailed {
        id: case.id.to_string(),
        message: result.formatted_failure_message(formatter).unwrap_or_default(),
    })
}
