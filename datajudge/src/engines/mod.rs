//! Query engine implementations.
//!
//! [`DataFusionEngine`] runs generated SQL in-process on Apache DataFusion.
//! Other backends plug in by implementing
//! [`QueryEngine`](crate::core::QueryEngine).

mod datafusion_engine;

pub use datafusion_engine::{scalar_to_value, sql_type_name, DataFusionEngine};
