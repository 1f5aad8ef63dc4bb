//! Overlap and gap detection over ranges.
//!
//! Rows are partitioned by their key columns. Within a partition, two rows
//! overlap if their ranges intersect in every dimension; consecutive ranges
//! leave a gap if the distance from one end to the next start exceeds the
//! legitimate gap size. Both detectors count the number of keys with at least
//! one violation and return one violating row as a sample.

use super::{derived, qualified_all};
use crate::core::{DataReference, ExecutionContext, Query, Retrieval, Row, Selection};
use crate::prelude::*;
use tracing::{debug, instrument};

/// How the distance between an end and the following start is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Whole days between dates.
    Date,
    /// Numeric difference.
    Numeric,
}

/// Keys with violations plus one example.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalViolations {
    /// Number of distinct keys with at least one violation
    pub n_violation_keys: i64,
    /// A violating row
    pub sample: Option<Row>,
}

async fn count_and_sample(
    ctx: &ExecutionContext,
    violations: String,
    group_columns: &[String],
) -> Result<Retrieval<IntervalViolations>> {
    let dialect = ctx.dialect();
    let sample_query = Selection::over(format!("({violations}) AS dj_violations"))
        .limit(1)
        .to_query(dialect);
    let grouped = group_columns.join(", ");
    let count_query = Query::new(format!(
        "SELECT COUNT(*) FROM (SELECT {grouped} FROM ({violations}) AS dj_violations GROUP BY {grouped}) AS dj_violation_keys"
    ));

    let sample = ctx.fetch(&sample_query).await?.into_iter().next();
    let n_violation_keys = ctx.fetch_count(&count_query).await?;
    debug!(n_violation_keys, "Counted keys with interval violations");
    Ok(Retrieval::new(
        IntervalViolations {
            n_violation_keys,
            sample,
        },
        vec![sample_query, count_query],
    ))
}

/// Detects overlapping ranges in one or more dimensions.
///
/// Rows that are exact duplicates in key and range columns always count as
/// overlapping. With `end_included`, ranges touching at their boundary
/// overlap; otherwise they do not.
#[instrument(skip_all, fields(source = %reference.source, dimensions = start_columns.len()))]
pub async fn interval_overlaps(
    ctx: &ExecutionContext,
    reference: &DataReference,
    key_columns: &[String],
    start_columns: &[String],
    end_columns: &[String],
    end_included: bool,
) -> Result<Retrieval<IntervalViolations>> {
    if start_columns.len() != end_columns.len() || start_columns.is_empty() {
        return Err(JudgeError::configuration(format!(
            "Expected same dimensionality for start_columns and end_columns. \
             Instead, start_columns has dimensionality {} and end_columns has dimensionality {}.",
            start_columns.len(),
            end_columns.len()
        )));
    }
    let dialect = ctx.dialect();
    let end_operator = if end_included { ">=" } else { ">" };

    let keys1 = qualified_all(ctx, "t1", key_columns)?;
    let keys2 = qualified_all(ctx, "t2", key_columns)?;
    let starts1 = qualified_all(ctx, "t1", start_columns)?;
    let starts2 = qualified_all(ctx, "t2", start_columns)?;
    let ends1 = qualified_all(ctx, "t1", end_columns)?;
    let ends2 = qualified_all(ctx, "t2", end_columns)?;

    let mut join_conditions: Vec<String> = keys1
        .iter()
        .zip(&keys2)
        .map(|(k1, k2)| format!("{k1} = {k2}"))
        .collect();
    for d in 0..start_columns.len() {
        join_conditions.push(format!(
            "{} <= {} AND {} {end_operator} {}",
            starts1[d], starts2[d], ends1[d], starts2[d]
        ));
    }
    let distinct_ranges = (0..start_columns.len())
        .map(|d| format!("{} <> {} OR {} <> {}", starts1[d], starts2[d], ends1[d], ends2[d]))
        .collect::<Vec<_>>()
        .join(" OR ");
    join_conditions.push(format!("({distinct_ranges})"));

    // Columns: keys, then per dimension the first row's range, then the
    // second row's range.
    let mut output_names: Vec<String> = (0..key_columns.len()).map(|i| format!("dj_key{i}")).collect();
    let mut pair_projection: Vec<String> = keys1
        .iter()
        .zip(&output_names)
        .map(|(k, name)| format!("{k} AS {name}"))
        .collect();
    for d in 0..start_columns.len() {
        pair_projection.push(format!("{} AS dj_start{d}", starts1[d]));
        pair_projection.push(format!("{} AS dj_end{d}", ends1[d]));
        pair_projection.push(format!("{} AS dj_other_start{d}", starts2[d]));
        pair_projection.push(format!("{} AS dj_other_end{d}", ends2[d]));
    }
    let pairs = format!(
        "SELECT {} FROM {} JOIN {} ON {}",
        pair_projection.join(", "),
        derived(ctx, reference, "t1")?,
        derived(ctx, reference, "t2")?,
        join_conditions.join(" AND ")
    );

    let mut identity: Vec<String> = dialect.quote_all(key_columns)?;
    let mut duplicate_projection: Vec<String> = identity
        .iter()
        .zip(&output_names)
        .map(|(k, name)| format!("{k} AS {name}"))
        .collect();
    for d in 0..start_columns.len() {
        let start = dialect.quote(&start_columns[d])?;
        let end = dialect.quote(&end_columns[d])?;
        duplicate_projection.push(format!("{start} AS dj_start{d}"));
        duplicate_projection.push(format!("{end} AS dj_end{d}"));
        duplicate_projection.push(format!("{start} AS dj_other_start{d}"));
        duplicate_projection.push(format!("{end} AS dj_other_end{d}"));
        identity.push(start);
        identity.push(end);
    }
    let duplicates = format!(
        "SELECT {} FROM {} GROUP BY {} HAVING COUNT(*) > 1",
        duplicate_projection.join(", "),
        derived(ctx, reference, "dj_rows")?,
        identity.join(", ")
    );

    let violations = format!("{pairs} UNION ALL {duplicates}");
    if output_names.is_empty() {
        for d in 0..start_columns.len() {
            output_names.push(format!("dj_start{d}"));
            output_names.push(format!("dj_end{d}"));
        }
    }
    count_and_sample(ctx, violations, &output_names).await
}

/// Boundary values lying strictly inside another range of the same key are
/// not boundaries of the merged coverage.
fn not_inside_other_range(
    ctx: &ExecutionContext,
    reference: &DataReference,
    boundary: &str,
    keys: &[String],
    start: &str,
    end: &str,
) -> Result<String> {
    let mut conditions: Vec<String> = keys
        .iter()
        .map(|k| format!("dj_helper.{k} = dj_raw.{k}"))
        .collect();
    conditions.push(format!("dj_raw.{boundary} > dj_helper.{start}"));
    conditions.push(format!("dj_raw.{boundary} < dj_helper.{end}"));
    Ok(format!(
        "NOT EXISTS (SELECT 1 FROM {} WHERE {})",
        derived(ctx, reference, "dj_helper")?,
        conditions.join(" AND ")
    ))
}

/// Detects gaps between consecutive ranges of the same key.
///
/// Without key columns, every column other than `start_column` and
/// `end_column` forms the key.
#[instrument(skip_all, fields(source = %reference.source, legitimate_gap_size))]
pub async fn interval_gaps(
    ctx: &ExecutionContext,
    reference: &DataReference,
    key_columns: &[String],
    start_column: &str,
    end_column: &str,
    legitimate_gap_size: f64,
    kind: GapKind,
) -> Result<Retrieval<IntervalViolations>> {
    let dialect = ctx.dialect();
    let key_columns: Vec<String> = if key_columns.is_empty() {
        let all = match &reference.columns {
            Some(columns) => columns.clone(),
            None => super::metadata::column_names(ctx, reference).await?.value,
        };
        all.into_iter()
            .filter(|c| c != start_column && c != end_column)
            .collect()
    } else {
        key_columns.to_vec()
    };
    let keys = dialect.quote_all(&key_columns)?;
    let start = dialect.quote(start_column)?;
    let end = dialect.quote(end_column)?;
    let partition = if keys.is_empty() {
        String::new()
    } else {
        format!("PARTITION BY {} ", keys.join(", "))
    };

    let starts = format!(
        "SELECT dj_raw.*, ROW_NUMBER() OVER ({partition}ORDER BY dj_raw.{start}) AS dj_start_rank FROM {} WHERE {}",
        derived(ctx, reference, "dj_raw")?,
        not_inside_other_range(ctx, reference, &start, &keys, &start, &end)?
    );
    let ends = format!(
        "SELECT dj_raw.*, ROW_NUMBER() OVER ({partition}ORDER BY dj_raw.{end}) AS dj_end_rank FROM {} WHERE {}",
        derived(ctx, reference, "dj_raw")?,
        not_inside_other_range(ctx, reference, &end, &keys, &start, &end)?
    );

    let gap = match kind {
        GapKind::Date => dialect.date_diff_days(&format!("dj_ends.{end}"), &format!("dj_starts.{start}")),
        GapKind::Numeric => format!("dj_starts.{start} - dj_ends.{end}"),
    };
    let mut join_conditions: Vec<String> = keys
        .iter()
        .map(|k| format!("dj_starts.{k} = dj_ends.{k}"))
        .collect();
    join_conditions.push("dj_starts.dj_start_rank = dj_ends.dj_end_rank + 1".to_string());
    join_conditions.push(format!("{gap} > {legitimate_gap_size:?}"));

    let output_names: Vec<String> = (0..keys.len()).map(|i| format!("dj_key{i}")).collect();
    let mut projection: Vec<String> = keys
        .iter()
        .zip(&output_names)
        .map(|(k, name)| format!("dj_starts.{k} AS {name}"))
        .collect();
    projection.push(format!("dj_ends.{end} AS dj_end"));
    projection.push(format!("dj_starts.{start} AS dj_start"));

    let violations = format!(
        "SELECT {} FROM ({starts}) AS dj_starts JOIN ({ends}) AS dj_ends ON {}",
        projection.join(", "),
        join_conditions.join(" AND ")
    );
    let group_columns = if output_names.is_empty() {
        vec!["dj_end".to_string(), "dj_start".to_string()]
    } else {
        output_names
    };
    count_and_sample(ctx, violations, &group_columns).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::test_helpers::{batch, datafusion_context, date_interval_table, table};
    use arrow::array::{ArrayRef, Int64Array};
    use std::sync::Arc;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn intervals() -> DataReference {
        DataReference::new(
            table("intervals"),
            Some(strings(&["id", "start_date", "end_date"])),
            None,
        )
    }

    #[tokio::test]
    async fn test_boundary_overlap_depends_on_end_inclusion() {
        let ctx = datafusion_context(vec![(
            "intervals",
            date_interval_table(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-10", "2024-01-15")]),
        )]);
        let keys = strings(&["id"]);
        let starts = strings(&["start_date"]);
        let ends = strings(&["end_date"]);

        let included = interval_overlaps(&ctx, &intervals(), &keys, &starts, &ends, true)
            .await
            .unwrap();
        assert_eq!(included.value.n_violation_keys, 1);
        assert_eq!(included.value.sample.as_ref().map(|row| row[0].clone()), Some(Value::Int(1)));

        let excluded = interval_overlaps(&ctx, &intervals(), &keys, &starts, &ends, false)
            .await
            .unwrap();
        assert_eq!(excluded.value.n_violation_keys, 0);
        assert_eq!(excluded.value.sample, None);
    }

    #[tokio::test]
    async fn test_exact_duplicates_overlap() {
        let ctx = datafusion_context(vec![(
            "intervals",
            date_interval_table(&[
                (1, "2024-01-01", "2024-01-10"),
                (1, "2024-01-01", "2024-01-10"),
                (2, "2024-01-01", "2024-01-10"),
            ]),
        )]);
        let overlaps = interval_overlaps(
            &ctx,
            &intervals(),
            &strings(&["id"]),
            &strings(&["start_date"]),
            &strings(&["end_date"]),
            false,
        )
        .await
        .unwrap();
        assert_eq!(overlaps.value.n_violation_keys, 1);
    }

    #[tokio::test]
    async fn test_date_gaps() {
        let ctx = datafusion_context(vec![
            (
                "gappy",
                date_interval_table(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-12", "2024-01-15")]),
            ),
            (
                "adjacent",
                date_interval_table(&[(1, "2024-01-01", "2024-01-10"), (1, "2024-01-11", "2024-01-15")]),
            ),
        ]);
        let columns = Some(strings(&["id", "start_date", "end_date"]));
        let gappy = DataReference::new(table("gappy"), columns.clone(), None);
        let adjacent = DataReference::new(table("adjacent"), columns, None);

        let gaps = interval_gaps(&ctx, &gappy, &[], "start_date", "end_date", 1.0, GapKind::Date)
            .await
            .unwrap();
        assert_eq!(gaps.value.n_violation_keys, 1);

        let gaps = interval_gaps(&ctx, &adjacent, &[], "start_date", "end_date", 1.0, GapKind::Date)
            .await
            .unwrap();
        assert_eq!(gaps.value.n_violation_keys, 0);
    }

    #[tokio::test]
    async fn test_numeric_gaps_are_ranked_per_key() {
        let ctx = datafusion_context(vec![(
            "ranges",
            batch(vec![
                ("id", Arc::new(Int64Array::from(vec![1, 2, 1, 2])) as ArrayRef),
                ("lo", Arc::new(Int64Array::from(vec![0, 1, 5, 2])) as ArrayRef),
                ("hi", Arc::new(Int64Array::from(vec![3, 2, 8, 4])) as ArrayRef),
            ]),
        )]);
        let reference = DataReference::new(table("ranges"), Some(strings(&["id", "lo", "hi"])), None);
        let gaps = interval_gaps(&ctx, &reference, &strings(&["id"]), "lo", "hi", 0.0, GapKind::Numeric)
            .await
            .unwrap();
        assert_eq!(gaps.value.n_violation_keys, 1);
        let sample = gaps.value.sample.unwrap();
        assert_eq!(sample, vec![Value::Int(1), Value::Int(3), Value::Int(5)]);
    }
}
