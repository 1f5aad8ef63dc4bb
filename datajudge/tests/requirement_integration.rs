//! End-to-end behavior of requirements tested against DataFusion tables.

mod common;

use common::{
    batch, context, date_ranges, float_column, int_column, session, shuffled, string_column, table, CountingEngine, DB,
    SCHEMA,
};
use datajudge::constraints::{DuplicateTolerance, IntervalOptions, KolmogorovSmirnov2Sample, UniquesOptions};
use datajudge::core::{Condition, DataReference, ExecutionContext};
use datajudge::db_access::{self, GapKind};
use datajudge::formatters::{HumanFormatter, FormatterConfig, ReportFormatter, RequirementReport};
use datajudge::prelude::*;
use datajudge::requirement::{ConstraintSettings, GainTolerance};
use datajudge::testing::{assert_constraint, collect_test_cases};
use std::sync::atomic::Ordering;

fn settings() -> ConstraintSettings {
    ConstraintSettings::new()
}

fn by_id() -> IntervalOptions {
    IntervalOptions::new().with_key_columns(vec!["id".to_string()])
}

#[tokio::test]
async fn test_n_rows_min_on_nineteen_rows() {
    let ctx = context(vec![("nineteen", batch(vec![("value", int_column(1..20))]))]);
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "nineteen");
    requirement
        .add_n_rows_min_constraint(19, settings())
        .unwrap()
        .add_n_rows_min_constraint(20, settings())
        .unwrap();

    let results = requirement.test(&ctx).await.unwrap();
    assert!(results[0].outcome);
    assert!(!results[1].outcome);
    assert_eq!(results[1].description.as_deref(), Some("NRowsMin::datafusion.public.nineteen"));
}

#[tokio::test]
async fn test_uniqueness_with_one_duplicate() {
    let mut values: Vec<i64> = (0..19).collect();
    values.push(0);
    let ctx = context(vec![(
        "duplicated",
        batch(vec![("a", int_column(values.clone())), ("b", int_column(values))]),
    )]);
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "duplicated");
    requirement
        .add_uniqueness_constraint(
            Some(&["a", "b"]),
            DuplicateTolerance::from_parts(0.0, 0).unwrap(),
            false,
            settings(),
        )
        .unwrap()
        .add_uniqueness_constraint(
            Some(&["a", "b"]),
            DuplicateTolerance::from_parts(0.05, 0).unwrap(),
            false,
            settings(),
        )
        .unwrap()
        .add_uniqueness_constraint(None, DuplicateTolerance::Absolute(1), false, settings())
        .unwrap();

    let outcomes: Vec<bool> = requirement.test(&ctx).await.unwrap().iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![false, true, true]);
}

#[test]
fn test_uniqueness_tolerances_are_exclusive() {
    assert!(DuplicateTolerance::from_parts(0.1, 2).is_err());
}

#[tokio::test]
async fn test_uniques_subset_flags_value_missing_from_target() {
    let ctx = context(vec![("thirty", batch(vec![("col", int_column(0..30))]))]);
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "thirty");
    requirement
        .add_uniques_subset_constraint(&["col"], 0..30i64, UniquesOptions::new(), settings())
        .unwrap()
        .add_uniques_subset_constraint(&["col"], 0..29i64, UniquesOptions::new(), settings())
        .unwrap();

    let results = requirement.test(&ctx).await.unwrap();
    assert!(results[0].outcome);
    assert!(!results[1].outcome);
    let message = results[1].failure_message.as_deref().unwrap();
    assert!(message.contains("'[29]'"), "{message}");
}

#[tokio::test]
async fn test_interval_overlap_at_boundary() {
    let ranges = date_ranges(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-10", "2024-01-15")]);
    let ctx = context(vec![("ranges", ranges)]);
    let reference = DataReference::new(
        table("ranges"),
        Some(vec!["id".into(), "start_date".into(), "end_date".into()]),
        None,
    );
    let keys = vec!["id".to_string()];
    let starts = vec!["start_date".to_string()];
    let ends = vec!["end_date".to_string()];

    let included = db_access::interval_overlaps(&ctx, &reference, &keys, &starts, &ends, true)
        .await
        .unwrap();
    assert_eq!(included.value.n_violation_keys, 1);
    let excluded = db_access::interval_overlaps(&ctx, &reference, &keys, &starts, &ends, false)
        .await
        .unwrap();
    assert_eq!(excluded.value.n_violation_keys, 0);

    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "ranges");
    requirement
        .add_date_no_overlap_constraint("start_date", "end_date", by_id(), settings())
        .unwrap()
        .add_date_no_overlap_constraint("start_date", "end_date", by_id().with_end_included(false), settings())
        .unwrap();
    let outcomes: Vec<bool> = requirement.test(&ctx).await.unwrap().iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![false, true]);
}

#[tokio::test]
async fn test_interval_gap_and_adjacency() {
    let ctx = context(vec![
        ("gapped", date_ranges(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-12", "2024-01-15")])),
        ("adjacent", date_ranges(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-11", "2024-01-15")])),
    ]);
    for (name, expected) in [("gapped", false), ("adjacent", true)] {
        let mut requirement = WithinRequirement::from_table(DB, SCHEMA, name);
        requirement
            .add_date_no_gap_constraint("start_date", "end_date", by_id(), settings())
            .unwrap();
        let results = requirement.test(&ctx).await.unwrap();
        assert_eq!(results[0].outcome, expected, "{name}: {:?}", results[0].failure_message);
    }

    let reference = DataReference::new(
        table("gapped"),
        Some(vec!["id".into(), "start_date".into(), "end_date".into()]),
        None,
    );
    let gaps = db_access::interval_gaps(&ctx, &reference, &["id".to_string()], "start_date", "end_date", 1.0, GapKind::Date)
        .await
        .unwrap();
    assert_eq!(gaps.value.n_violation_keys, 1);
}

#[tokio::test]
async fn test_ks_statistic_of_identical_and_disjoint_samples() {
    let ctx = context(vec![
        ("low", batch(vec![("x", float_column(shuffled((0..50).map(f64::from).collect(), 7)))])),
        ("high", batch(vec![("x", float_column(shuffled((100..150).map(f64::from).collect(), 11)))])),
    ]);
    let low = DataReference::new(table("low"), Some(vec!["x".into()]), None);
    let high = DataReference::new(table("high"), Some(vec!["x".into()]), None);

    let same = db_access::ks_2sample(&ctx, &low, &low).await.unwrap().value;
    assert!(same.abs() < 1e-12);
    let p_value = KolmogorovSmirnov2Sample::approximate_p_value(same, 50, 50).unwrap();
    assert!((p_value - 1.0).abs() < 1e-12);

    let disjoint = db_access::ks_2sample(&ctx, &low, &high).await.unwrap().value;
    assert!((disjoint - 1.0).abs() < 1e-12);

    let mut requirement = BetweenRequirement::from_tables((DB, SCHEMA, "low"), (DB, SCHEMA, "low"));
    requirement.add_ks_2sample_constraint("x", "x", 0.05, settings()).unwrap();
    let mut disjoint_requirement = BetweenRequirement::from_tables((DB, SCHEMA, "low"), (DB, SCHEMA, "high"));
    disjoint_requirement.add_ks_2sample_constraint("x", "x", 0.05, settings()).unwrap();

    assert!(requirement.test(&ctx).await.unwrap()[0].outcome);
    let failing = &disjoint_requirement.test(&ctx).await.unwrap()[0];
    assert!(!failing.outcome);
    assert!(failing.failure_message.as_deref().unwrap().contains("d=1"));
}

#[tokio::test]
async fn test_repeated_tests_reuse_retrievals() {
    let (engine, fetches) = CountingEngine::new(session(vec![(
        "numbers",
        batch(vec![("x", int_column([1, 2, 3, 3]))]),
    )]));
    let ctx = ExecutionContext::new(engine);
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "numbers");
    requirement
        .add_n_rows_max_constraint(3, settings())
        .unwrap()
        .add_uniques_equality_constraint(&["x"], [1i64, 2], UniquesOptions::new(), settings())
        .unwrap();

    let first = requirement.test(&ctx).await.unwrap();
    let after_first = fetches.load(Ordering::SeqCst);
    assert!(after_first > 0);
    let second = requirement.test(&ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fetches.load(Ordering::SeqCst), after_first);

    // A fresh context does not share the memoized values.
    requirement.test(&ctx.fresh()).await.unwrap();
    assert!(fetches.load(Ordering::SeqCst) > after_first);
}

#[tokio::test]
async fn test_max_gain_against_empty_target() {
    let ctx = context(vec![
        ("empty", batch(vec![("x", int_column(Vec::<i64>::new()))])),
        ("full", batch(vec![("x", int_column(0..100))])),
    ]);
    let mut requirement = BetweenRequirement::from_tables((DB, SCHEMA, "full"), (DB, SCHEMA, "empty"));
    requirement
        .add_n_rows_max_gain_constraint(GainTolerance::constant(0.0), settings())
        .unwrap();
    assert!(requirement.test(&ctx).await.unwrap()[0].outcome);
}

#[tokio::test]
async fn test_conditions_narrow_both_sources() {
    let ctx = context(vec![(
        "orders",
        batch(vec![
            ("status", string_column(&["open", "open", "closed", "closed", "closed"])),
            ("amount", int_column([10, 20, 30, 40, 50])),
        ]),
    )]);
    let open = Condition::raw("status = 'open'").unwrap();
    let closed = Condition::raw("status = 'closed'").unwrap();

    let mut within = WithinRequirement::from_table(DB, SCHEMA, "orders");
    within
        .add_n_rows_equality_constraint(2, settings().with_condition(open.clone()))
        .unwrap()
        .add_numeric_max_constraint("amount", 20, settings().with_condition(open.clone()))
        .unwrap();
    assert!(within.test(&ctx).await.unwrap().iter().all(|r| r.outcome));

    let mut between = BetweenRequirement::from_tables((DB, SCHEMA, "orders"), (DB, SCHEMA, "orders"));
    between
        .add_n_rows_max_gain_constraint(
            GainTolerance::constant(0.5),
            settings().with_conditions(Some(closed), Some(open)),
        )
        .unwrap();
    let result = &between.test(&ctx).await.unwrap()[0];
    assert!(result.outcome, "{:?}", result.failure_message);
}

#[tokio::test]
async fn test_quoted_column_names_and_literal_keywords() {
    let ctx = context(vec![(
        "audit",
        batch(vec![
            ("order id", int_column([1, 2, 3, 4])),
            ("action", string_column(&["insert", "update", "delete", "delete"])),
        ]),
    )]);
    let deleted = Condition::raw("action = 'delete'").unwrap();

    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "audit");
    requirement
        .add_numeric_min_constraint("order id", 3, settings().with_condition(deleted))
        .unwrap()
        .add_uniques_equality_constraint(&["order id"], 1..=4i64, UniquesOptions::new(), settings())
        .unwrap();
    let results = requirement.test(&ctx).await.unwrap();
    assert!(results.iter().all(|r| r.outcome), "{results:?}");
}

#[tokio::test]
async fn test_primary_key_definition_on_raw_query_is_unsupported() {
    let ctx = context(vec![("t", batch(vec![("id", int_column([1, 2]))]))]);
    let mut requirement = WithinRequirement::from_raw_query("SELECT id FROM t", "raw_t", None);
    requirement
        .add_primary_key_definition_constraint(&["id"], settings())
        .unwrap();
    let err = requirement.test(&ctx).await.unwrap_err();
    assert!(err.is_unsupported(), "{err}");
}

#[tokio::test]
async fn test_test_cases_and_reports() {
    let ctx = context(vec![("numbers", batch(vec![("x", int_column([1, 2, 3]))]))]);
    let mut requirement = WithinRequirement::from_table(DB, SCHEMA, "numbers");
    requirement
        .add_n_rows_equality_constraint(3, settings())
        .unwrap()
        .add_n_rows_equality_constraint(4, settings())
        .unwrap();

    let cases = collect_test_cases([&requirement as &dyn Requirement]);
    assert_eq!(cases.len(), 2);
    let mut outcomes = Vec::new();
    for case in &cases {
        outcomes.push(assert_constraint(&case, &ctx, &datajudge::formatters::DefaultFormatter).await.is_ok());
    }
    assert_eq!(outcomes, vec![true, false]);

    let report = RequirementReport::new("numbers", requirement.test(&ctx).await.unwrap());
    let text = HumanFormatter::with_config(FormatterConfig::ci())
        .format(&report)
        .unwrap();
    assert!(text.contains("failed: 1"));
    assert!(text.contains("NRowsEquality::datafusion.public.numbers"));
}
