//! Composable boolean filters applied to a data reference.

use crate::prelude::*;
use crate::security::SqlSecurity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the children of a composite [`Condition`] are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl std::str::FromStr for LogicalOperator {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            other => Err(JudgeError::configuration(format!(
                "Reduction operator must be 'and' or 'or', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// An immutable filter: either a raw SQL predicate or an AND/OR composition of
/// other conditions, to arbitrary depth.
///
/// # Examples
///
/// ```rust
/// use datajudge::core::Condition;
///
/// let recent = Condition::raw("created_at >= DATE '2024-01-01'").unwrap();
/// let active = Condition::raw("status = 'active'").unwrap();
/// let both = Condition::and(vec![recent, active]).unwrap();
///
/// assert_eq!(
///     both.render(),
///     "(created_at >= DATE '2024-01-01') AND (status = 'active')"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// A predicate used verbatim.
    Raw(String),
    /// Children joined by a logical operator.
    Composite {
        operator: LogicalOperator,
        conditions: Vec<Condition>,
    },
}

impl Condition {
    /// Builds a condition from its loose parts.
    ///
    /// Exactly one of `raw` or `conditions` must be given; composite
    /// conditions additionally need an operator (`"and"` or `"or"`).
    pub fn new(
        raw: Option<String>,
        conditions: Option<Vec<Condition>>,
        operator: Option<&str>,
    ) -> Result<Self> {
        match (raw, conditions) {
            (Some(_), Some(_)) => Err(JudgeError::configuration(
                "Condition can either have raw string or conditions, not both",
            )),
            (None, None) => Err(JudgeError::configuration(
                "Condition needs either raw string or conditions",
            )),
            (Some(raw), None) => Self::raw(raw),
            (None, Some(conditions)) => {
                let operator = operator.ok_or_else(|| {
                    JudgeError::configuration("Composite condition requires a reduction operator")
                })?;
                Self::composite(operator.parse()?, conditions)
            }
        }
    }

    /// Creates an atomic condition from a raw SQL predicate.
    pub fn raw(predicate: impl Into<String>) -> Result<Self> {
        let predicate = predicate.into();
        SqlSecurity::validate_predicate(&predicate)?;
        Ok(Self::Raw(predicate))
    }

    /// Creates a composite condition.
    pub fn composite(operator: LogicalOperator, conditions: Vec<Condition>) -> Result<Self> {
        if conditions.is_empty() {
            return Err(JudgeError::configuration(
                "If conditions are given, at least one must be provided",
            ));
        }
        Ok(Self::Composite {
            operator,
            conditions,
        })
    }

    /// Conjunction of `conditions`.
    pub fn and(conditions: Vec<Condition>) -> Result<Self> {
        Self::composite(LogicalOperator::And, conditions)
    }

    /// Disjunction of `conditions`.
    pub fn or(conditions: Vec<Condition>) -> Result<Self> {
        Self::composite(LogicalOperator::Or, conditions)
    }

    /// Renders the predicate text.
    pub fn render(&self) -> String {
        match self {
            Self::Raw(predicate) => predicate.clone(),
            Self::Composite {
                operator,
                conditions,
            } => conditions
                .iter()
                .map(|c| format!("({})", c.render()))
                .collect::<Vec<_>>()
                .join(&format!(" {operator} ")),
        }
    }

    /// Combines two optional conditions with AND.
    pub fn merge(first: Option<&Condition>, second: Option<&Condition>) -> Option<Condition> {
        match (first, second) {
            (None, None) => None,
            (Some(c), None) | (None, Some(c)) => Some(c.clone()),
            (Some(a), Some(b)) => Some(Self::Composite {
                operator: LogicalOperator::And,
                conditions: vec![a.clone(), b.clone()],
            }),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
