//! Single-column aggregates.

use super::{derived, quoted_column};
use crate::core::{DataReference, ExecutionContext, Query, Retrieval, Value};
use crate::prelude::*;
use tracing::instrument;

async fn aggregate(
    ctx: &ExecutionContext,
    reference: &DataReference,
    expression: impl FnOnce(&str) -> String,
) -> Result<Retrieval<Value>> {
    let relation = derived(ctx, reference, "dj_values")?;
    let column = quoted_column(ctx, reference)?;
    let query = Query::new(format!("SELECT {} FROM {relation}", expression(&column)));
    let value = ctx.fetch_scalar(&query).await?;
    Ok(Retrieval::new(value, vec![query]))
}

fn optional_f64(value: Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        value => value.as_f64().map(Some).ok_or_else(|| JudgeError::TypeMismatch {
            expected: "numeric aggregate".to_string(),
            found: value.to_string(),
        }),
    }
}

fn optional_i64(value: Value) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        value => value.as_i64().map(Some).ok_or_else(|| JudgeError::TypeMismatch {
            expected: "integer aggregate".to_string(),
            found: value.to_string(),
        }),
    }
}

/// Minimum of the single column; `Value::Null` for an empty relation.
pub async fn min(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Value>> {
    aggregate(ctx, reference, |c| format!("MIN({c})")).await
}

/// Maximum of the single column; `Value::Null` for an empty relation.
pub async fn max(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Value>> {
    aggregate(ctx, reference, |c| format!("MAX({c})")).await
}

/// Arithmetic mean of the single column.
pub async fn mean(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<f64>>> {
    let float_type = ctx.dialect().float_type();
    let retrieval = aggregate(ctx, reference, |c| format!("AVG(CAST({c} AS {float_type}))")).await?;
    let mean = optional_f64(retrieval.value)?;
    Ok(Retrieval::new(mean, retrieval.queries))
}

/// Smallest value such that at least `percentage` percent of the non-null
/// values are less than or equal to it.
#[instrument(skip(ctx, reference), fields(source = %reference.source))]
pub async fn percentile(
    ctx: &ExecutionContext,
    reference: &DataReference,
    percentage: f64,
) -> Result<Retrieval<f64>> {
    let relation = derived(ctx, reference, "dj_values")?;
    let column = quoted_column(ctx, reference)?;
    let query = Query::new(format!(
        "WITH dj_ranked AS (\
         SELECT {column} AS dj_value, \
         ROW_NUMBER() OVER (ORDER BY {column}) AS dj_row_num, \
         COUNT(*) OVER () AS dj_row_count \
         FROM {relation} WHERE {column} IS NOT NULL) \
         SELECT dj_value FROM dj_ranked WHERE dj_row_num = (\
         SELECT CASE WHEN COUNT(dj_row_num) > 0 THEN MAX(dj_row_num) + 1 ELSE 1 END \
         FROM dj_ranked WHERE dj_row_num * 100.0 / dj_row_count < {percentage:?})"
    ));
    let value = ctx.fetch_scalar(&query).await?;
    let percentile = optional_f64(value)?
        .ok_or_else(|| JudgeError::retrieval("Percentile selection could not be fetched."))?;
    Ok(Retrieval::new(percentile, vec![query]))
}

/// Shortest string length in the single column.
pub async fn min_length(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<i64>>> {
    let dialect = ctx.dialect();
    let retrieval = aggregate(ctx, reference, |c| format!("MIN({})", dialect.length(c))).await?;
    Ok(Retrieval::new(optional_i64(retrieval.value)?, retrieval.queries))
}

/// Longest string length in the single column.
pub async fn max_length(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<i64>>> {
    let dialect = ctx.dialect();
    let retrieval = aggregate(ctx, reference, |c| format!("MAX({})", dialect.length(c))).await?;
    Ok(Retrieval::new(optional_i64(retrieval.value)?, retrieval.queries))
}

/// Days between the earliest and the latest value of `date_column`.
pub async fn date_span(
    ctx: &ExecutionContext,
    reference: &DataReference,
    date_column: &str,
) -> Result<Retrieval<f64>> {
    let dialect = ctx.dialect();
    let dates = reference.with_columns(Some(vec![date_column.to_string()]));
    let retrieval = aggregate(ctx, &dates, |c| {
        dialect.date_diff_days(&format!("MIN({c})"), &format!("MAX({c})"))
    })
    .await?;
    let span = optional_f64(retrieval.value)?
        .ok_or_else(|| JudgeError::retrieval("Date span could not be fetched."))?;
    if span < 0.0 {
        return Err(JudgeError::retrieval(format!(
            "Date span has negative value: {span}. It must be positive."
        )));
    }
    Ok(Retrieval::new(span, retrieval.queries))
}

/// Relative growth of the date span of `reference` over that of
/// `reference2`: `span / span2 - 1`.
pub async fn date_growth_rate(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
    date_column: &str,
    date_column2: &str,
) -> Result<Retrieval<f64>> {
    let span = date_span(ctx, reference, date_column).await?;
    let span2 = date_span(ctx, reference2, date_column2).await?;
    if span2.value == 0.0 {
        return Err(JudgeError::retrieval(
            "Reference date span is not allowed to be zero.",
        ));
    }
    let mut queries = span.queries;
    queries.extend(span2.queries);
    Ok(Retrieval::new(span.value / span2.value - 1.0, queries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        datafusion_context, date_interval_table, int_table, nullable_int_table, string_table,
        table,
    };

    fn col_ref(name: &str) -> DataReference {
        DataReference::new(table(name), Some(vec!["col".into()]), None)
    }

    #[tokio::test]
    async fn test_min_max_mean() {
        let ctx = datafusion_context(vec![
            ("a", nullable_int_table("col", &[Some(3), None, Some(1), Some(8)])),
            ("empty", int_table("col", &[])),
        ]);
        assert_eq!(min(&ctx, &col_ref("a")).await.unwrap().value, Value::Int(1));
        assert_eq!(max(&ctx, &col_ref("a")).await.unwrap().value, Value::Int(8));
        assert_eq!(mean(&ctx, &col_ref("a")).await.unwrap().value, Some(4.0));

        assert!(min(&ctx, &col_ref("empty")).await.unwrap().value.is_null());
        assert_eq!(mean(&ctx, &col_ref("empty")).await.unwrap().value, None);
    }

    #[tokio::test]
    async fn test_percentile() {
        let values: Vec<i64> = (1..=10).collect();
        let ctx = datafusion_context(vec![
            ("a", int_table("col", &values)),
            ("nulls", nullable_int_table("col", &[None, None])),
        ]);
        let reference = col_ref("a");
        assert_eq!(percentile(&ctx, &reference, 0.0).await.unwrap().value, 1.0);
        assert_eq!(percentile(&ctx, &reference, 50.0).await.unwrap().value, 5.0);
        assert_eq!(percentile(&ctx, &reference, 55.0).await.unwrap().value, 6.0);
        assert_eq!(percentile(&ctx, &reference, 100.0).await.unwrap().value, 10.0);

        let err = percentile(&ctx, &col_ref("nulls"), 50.0).await.unwrap_err();
        assert!(err.is_retrieval_failure());
    }

    #[tokio::test]
    async fn test_lengths() {
        let ctx = datafusion_context(vec![(
            "words",
            string_table("col", &[Some("a"), Some("abcd"), None]),
        )]);
        assert_eq!(min_length(&ctx, &col_ref("words")).await.unwrap().value, Some(1));
        assert_eq!(max_length(&ctx, &col_ref("words")).await.unwrap().value, Some(4));
    }

    #[tokio::test]
    async fn test_date_span_and_growth() {
        let ctx = datafusion_context(vec![
            (
                "old",
                date_interval_table(&[(1, "2024-01-01", "2024-01-05"), (2, "2024-01-11", "2024-01-12")]),
            ),
            (
                "new",
                date_interval_table(&[(1, "2024-01-01", "2024-01-05"), (2, "2024-01-21", "2024-01-22")]),
            ),
        ]);
        let old = DataReference::new(table("old"), None, None);
        let new = DataReference::new(table("new"), None, None);
        assert_eq!(date_span(&ctx, &old, "start_date").await.unwrap().value, 10.0);

        let growth = date_growth_rate(&ctx, &new, &old, "start_date", "start_date")
            .await
            .unwrap();
        assert_eq!(growth.value, 1.0);
        assert_eq!(growth.queries.len(), 2);
    }
}
