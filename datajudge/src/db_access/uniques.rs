//! Value multisets and grouping queries.

use super::derived;
use crate::core::{DataReference, ExecutionContext, Query, Retrieval, Row, Value};
use crate::prelude::*;

/// Distinct values with their number of occurrences.
///
/// Single-column references yield plain values; multi-column references
/// yield [`Value::Tuple`]s.
pub type UniqueCounts = Vec<(Value, i64)>;

fn unique_from_row(mut row: Row, n_columns: usize) -> Result<(Value, i64)> {
    let count = row
        .pop()
        .and_then(|count| count.as_i64())
        .ok_or_else(|| JudgeError::Internal("Grouped row lacks its count".to_string()))?;
    row.truncate(n_columns);
    let value = if n_columns == 1 {
        row.pop().unwrap_or(Value::Null)
    } else {
        Value::Tuple(row)
    };
    Ok((value, count))
}

/// Occurrence counts of the distinct column tuples of `reference`.
///
/// A reference without explicit columns has nothing to group on and yields
/// no values.
pub async fn uniques(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<UniqueCounts>> {
    let columns = match reference.columns.as_deref() {
        Some(columns) if !columns.is_empty() => columns,
        _ => return Ok(Retrieval::literal(Vec::new())),
    };
    let dialect = ctx.dialect();
    let quoted = dialect.quote_all(columns)?.join(", ");
    let query = Query::new(format!(
        "SELECT {quoted}, COUNT(*) AS dj_count FROM {} GROUP BY {quoted}",
        derived(ctx, reference, "dj_values")?
    ));
    let counts = ctx
        .fetch(&query)
        .await?
        .into_iter()
        .map(|row| unique_from_row(row, columns.len()))
        .collect::<Result<UniqueCounts>>()?;
    Ok(Retrieval::new(counts, vec![query]))
}

/// For every distinct tuple of the reference's columns, the aggregated
/// values of `aggregation_column`.
///
/// Aggregation runs over the whole filtered source, not only the projected
/// columns.
pub async fn column_array_agg(
    ctx: &ExecutionContext,
    reference: &DataReference,
    aggregation_column: &str,
) -> Result<Retrieval<Vec<(Value, Vec<Value>)>>> {
    let dialect = ctx.dialect();
    let group_columns = reference
        .columns
        .as_deref()
        .filter(|columns| !columns.is_empty())
        .ok_or_else(|| JudgeError::configuration("There must be a column to group by"))?;
    let quoted = dialect.quote_all(group_columns)?.join(", ");
    let aggregated = dialect.array_agg(&dialect.quote(aggregation_column)?)?;
    let query = Query::new(format!(
        "SELECT {quoted}, {aggregated} FROM {} GROUP BY {quoted}",
        derived(ctx, &reference.with_columns(None), "dj_source")?
    ));

    let mut groups = Vec::new();
    for mut row in ctx.fetch(&query).await? {
        let values = row.pop().map(|v| v.components().to_vec()).unwrap_or_default();
        let key = if row.len() == 1 {
            row.pop().unwrap_or(Value::Null)
        } else {
            Value::Tuple(row)
        };
        groups.push((key, values));
    }
    Ok(Retrieval::new(groups, vec![query]))
}

/// Distinct rows whose `key_columns` values are shared with another,
/// different row, sorted.
pub async fn functional_dependency_violations(
    ctx: &ExecutionContext,
    reference: &DataReference,
    key_columns: &[String],
) -> Result<Retrieval<Vec<Row>>> {
    let dialect = ctx.dialect();
    if key_columns.is_empty() {
        return Err(JudgeError::configuration(
            "Functional dependency needs at least one key column.",
        ));
    }
    let keys = dialect.quote_all(key_columns)?;
    let join_condition = keys
        .iter()
        .map(|k| format!("dj_uniques.{k} = dj_violations.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let query = Query::new(format!(
        "WITH dj_uniques AS ({}), \
         dj_violations AS (SELECT {keys} FROM dj_uniques GROUP BY {keys} HAVING COUNT(*) > 1) \
         SELECT dj_uniques.* FROM dj_uniques JOIN dj_violations ON {join_condition}",
        reference.selection(dialect)?.distinct().render(dialect),
        keys = keys.join(", "),
    ));
    let mut rows = ctx.fetch(&query).await?;
    rows.sort();
    Ok(Retrieval::new(rows, vec![query]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{batch, datafusion_context, table};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use std::sync::Arc;

    fn pairs() -> arrow::record_batch::RecordBatch {
        batch(vec![
            (
                "a",
                Arc::new(Int64Array::from(vec![Some(1), Some(1), Some(2), None])) as ArrayRef,
            ),
            (
                "b",
                Arc::new(StringArray::from(vec!["x", "x", "y", "z"])) as ArrayRef,
            ),
        ])
    }

    #[tokio::test]
    async fn test_uniques_single_and_composite() {
        let ctx = datafusion_context(vec![("pairs", pairs())]);

        let single = DataReference::new(table("pairs"), Some(vec!["a".into()]), None);
        let mut counts = uniques(&ctx, &single).await.unwrap().value;
        counts.sort();
        assert_eq!(
            counts,
            vec![(Value::Null, 1), (Value::Int(1), 2), (Value::Int(2), 1)]
        );

        let composite = DataReference::new(table("pairs"), Some(vec!["a".into(), "b".into()]), None);
        let counts = uniques(&ctx, &composite).await.unwrap().value;
        assert!(counts.contains(&(Value::Tuple(vec![Value::Int(1), Value::from("x")]), 2)));

        let no_columns = DataReference::new(table("pairs"), None, None);
        let retrieval = uniques(&ctx, &no_columns).await.unwrap();
        assert!(retrieval.value.is_empty());
        assert!(retrieval.queries.is_empty());
    }

    #[tokio::test]
    async fn test_column_array_agg() {
        let ctx = datafusion_context(vec![("pairs", pairs())]);
        let reference = DataReference::new(table("pairs"), Some(vec!["b".into()]), None);
        let mut groups = column_array_agg(&ctx, &reference, "a").await.unwrap().value;
        groups.sort();
        assert_eq!(groups[0].0, Value::from("x"));
        assert_eq!(groups[0].1, vec![Value::Int(1), Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_functional_dependency_violations() {
        let ctx = datafusion_context(vec![(
            "fd",
            batch(vec![
                ("k", Arc::new(Int64Array::from(vec![1, 1, 1, 2])) as ArrayRef),
                ("v", Arc::new(StringArray::from(vec!["a", "a", "b", "c"])) as ArrayRef),
            ]),
        )]);
        let reference = DataReference::new(table("fd"), Some(vec!["k".into(), "v".into()]), None);
        let violations = functional_dependency_violations(&ctx, &reference, &["k".to_string()])
            .await
            .unwrap()
            .value;
        assert_eq!(
            violations,
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(1), Value::from("b")],
            ]
        );
    }
}
