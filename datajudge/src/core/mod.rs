//! Core types for data assertions.
//!
//! ## Overview
//!
//! - **[`DataSource`]**: a table, backend expression or raw query
//! - **[`Condition`]**: a raw predicate or a conjunction/disjunction of conditions
//! - **[`DataReference`]**: a source narrowed to columns and filtered by a condition
//! - **[`ExecutionContext`]**: the query engine a constraint is tested against
//! - **[`Constraint`]**: an assertion producing a [`TestResult`]
//!
//! ## Architecture
//!
//! ```text
//! Requirement
//!     ├── Constraint 1 ── DataReference ── DataSource + Condition
//!     └── Constraint 2 ── DataReference, DataReference (between)
//!                 │
//!                 ▼
//!         ExecutionContext ── QueryEngine (Dialect)
//! ```

pub mod condition;
pub mod constraint;
pub mod data_source;
pub mod dialect;
pub mod execution;
pub mod query;
pub mod reference;
pub mod value;

pub use condition::{Condition, LogicalOperator};
pub use constraint::{
    constant_tolerance, run_test, tolerance_getter, uncommon_substrings, BoxedConstraint,
    Compare, Constraint, ConstraintCore, Retrieval, RetrievalCache, Retrieve, Target, TestResult,
    ToleranceGetter, Verdict,
};
pub use data_source::DataSource;
pub use dialect::Dialect;
pub use execution::{ColumnInfo, ContextId, ExecutionContext, MetadataCache, QueryEngine};
pub use query::{Query, Selection};
pub use reference::DataReference;
pub use value::{parse_date, Row, Value};
