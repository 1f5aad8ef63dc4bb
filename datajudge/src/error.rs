//! Error types for datajudge.
//!
//! Every fallible operation in the crate returns [`JudgeError`]. The variants
//! fall into three groups that callers usually treat differently:
//!
//! - configuration errors raised while a requirement is being built,
//! - capability errors raised when the active dialect lacks an operation,
//! - retrieval errors raised when the query engine fails.
//!
//! A constraint that simply does not hold is *not* an error; it is reported
//! through [`TestResult`](crate::core::TestResult).

use thiserror::Error;

/// The main error type for datajudge.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// Invalid or contradictory parameters given while building a constraint.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The active dialect has no implementation of the requested operation.
    #[error("Operation not supported: {operation} is not available for {dialect}")]
    CapabilityUnsupported {
        /// The operation that was requested
        operation: String,
        /// Name of the dialect lacking it
        dialect: String,
    },

    /// Query execution failed or returned an unusable result.
    #[error("Retrieval failed: {message}")]
    Retrieval {
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error when a required column is not found in the data source.
    #[error("Column '{column}' not found in data source")]
    ColumnNotFound { column: String },

    /// Error when a retrieved value does not have the expected type.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A constraint asserted through [`crate::testing`] does not hold.
    #[error("Constraint {id} failed: {message}")]
    ConstraintFailed {
        /// Identifier of the test case
        id: String,
        /// Formatted failure message
        message: String,
    },

    /// Rejected identifier, pattern or SQL fragment.
    #[error("Security error: {0}")]
    SecurityError(String),
}

/// A type alias for `Result<T, JudgeError>`.
pub type Result<T> = std::result::Result<T, JudgeError>;

impl JudgeError {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new capability error for the given operation and dialect.
    pub fn unsupported(operation: impl Into<String>, dialect: impl std::fmt::Display) -> Self {
        Self::CapabilityUnsupported {
            operation: operation.into(),
            dialect: dialect.to_string(),
        }
    }

    /// Creates a new retrieval error.
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new retrieval error with a source error.
    pub fn retrieval_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Retrieval {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns true for errors raised while executing queries.
    pub fn is_retrieval_failure(&self) -> bool {
        matches!(
            self,
            Self::Retrieval { .. } | Self::DataFusion(_) | Self::Arrow(_)
        )
    }

    /// Returns true if the active dialect lacks the requested operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::CapabilityUnsupported { .. })
    }
}

impl From<serde_json::Error> for JudgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<JudgeError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.with_context(|| msg.to_string())
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e.into() {
            JudgeError::Retrieval { message, source } => JudgeError::Retrieval {
                message: format!("{}: {}", f(), message),
                source,
            },
            JudgeError::Internal(inner) => JudgeError::Internal(format!("{}: {}", f(), inner)),
            other if other.is_retrieval_failure() => {
                JudgeError::retrieval_with_source(f(), Box::new(other))
            }
            other => JudgeError::Internal(format!("{}: {}", f(), other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_configuration_error() {
        let err = JudgeError::configuration("Both ref2 and ref_value are set");
        assert_eq!(
            err.to_string(),
            "Configuration error: Both ref2 and ref_value are set"
        );
        assert!(!err.is_retrieval_failure());
    }

    #[test]
    fn test_unsupported_error() {
        let err = JudgeError::unsupported("primary key retrieval", "bigquery");
        assert_eq!(
            err.to_string(),
            "Operation not supported: primary key retrieval is not available for bigquery"
        );
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_retrieval_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = JudgeError::retrieval_with_source("Could not count rows", Box::new(source));
        assert!(err.source().is_some());
        assert!(err.is_retrieval_failure());
    }

    #[test]
    fn test_datafusion_error_is_retrieval_failure() {
        let err: JudgeError =
            datafusion::error::DataFusionError::Plan("no table".to_string()).into();
        assert!(err.is_retrieval_failure());
    }

    #[test]
    fn test_column_not_found() {
        let err = JudgeError::ColumnNotFound {
            column: "user_id".to_string(),
        };
        assert_eq!(err.to_string(), "Column 'user_id' not found in data source");
    }

    #[test]
    fn test_type_mismatch() {
        let err = JudgeError::TypeMismatch {
            expected: "integer".to_string(),
            found: "varchar".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch: expected integer, found varchar"
        );
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), JudgeError> =
            Err(JudgeError::Internal("boom".to_string()));
        let err = result.context("Counting rows").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: Counting rows: boom");
    }

    #[test]
    fn test_error_context_keeps_retrieval_kind() {
        let result: std::result::Result<(), JudgeError> =
            Err(datafusion::error::DataFusionError::Plan("bad".to_string()).into());
        let err = result
            .with_context(|| "Fetching uniques".to_string())
            .unwrap_err();
        assert!(err.is_retrieval_failure());
        assert!(err.to_string().contains("Fetching uniques"));
    }
}
