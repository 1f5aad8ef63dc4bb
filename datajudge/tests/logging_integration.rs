//! Requirements evaluated under an installed `tracing` subscriber.

mod common;

use common::{batch, context, int_column, DB, SCHEMA};
use datajudge::logging::setup::{init_logging, LoggingConfig};
use datajudge::prelude::*;
use datajudge::requirement::ConstraintSettings;
use tracing::Level;

#[tokio::test]
async fn test_requirement_runs_with_json_logging() {
    init_logging(
        LoggingConfig::development()
            .with_judge_level(Level::TRACE)
            .with_json_format(true),
    )
    .unwrap();
    assert!(init_logging(LoggingConfig::default()).is_err());

    let ctx = context(vec![("numbers", batch(vec![("x", int_column(0..10))]))]).with_log_config(
        LogConfig::default()
            .with_constraint_details(true)
            .with_max_field_length(32),
    );
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "numbers");
    requirement
        .add_n_rows_min_constraint(5, ConstraintSettings::new())
        .unwrap()
        .add_numeric_max_constraint("x", 5, ConstraintSettings::new())
        .unwrap();

    let outcomes: Vec<bool> = requirement.test(&ctx).await.unwrap().iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![true, false]);
    assert_eq!(ctx.log_config().max_field_length, 32);
}
