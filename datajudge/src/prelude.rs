//! Prelude for commonly used types and traits in datajudge.

pub use crate::core::{
    Condition, Constraint, DataReference, DataSource, Dialect, ExecutionContext, TestResult,
    Value,
};
pub use crate::error::{ErrorContext, JudgeError, Result};
pub use crate::formatters::{Formatter, FormatterConfig, ReportFormatter};
pub use crate::logging::LogConfig;
pub use crate::requirement::{BetweenRequirement, Requirement, WithinRequirement};
