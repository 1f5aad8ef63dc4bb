//! Distribution statistics computed inside the database.

use super::{derived, quoted_column};
use crate::core::{DataReference, ExecutionContext, Query, Retrieval};
use crate::prelude::*;
use tracing::{debug, instrument};

/// Empirical CDF of the single column, one row per distinct non-null value.
fn cdf_relation(ctx: &ExecutionContext, reference: &DataReference) -> Result<String> {
    let column = quoted_column(ctx, reference)?;
    Ok(format!(
        "SELECT dj_value, MAX(dj_cdf) AS dj_cdf FROM (\
         SELECT {column} AS dj_value, CUME_DIST() OVER (ORDER BY {column}) AS dj_cdf \
         FROM {} WHERE {column} IS NOT NULL) AS dj_cume GROUP BY dj_value",
        derived(ctx, reference, "dj_sample")?
    ))
}

/// The two-sample Kolmogorov-Smirnov statistic: the largest vertical
/// distance between the empirical CDFs of both single columns.
///
/// Both CDFs are joined on their values; a value present in only one sample
/// takes the most recent CDF value of the other, or 0 before its first value.
#[instrument(skip_all, fields(source = %reference.source, source2 = %reference2.source))]
pub async fn ks_2sample(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
) -> Result<Retrieval<f64>> {
    let query = Query::new(format!(
        "WITH dj_cdf1 AS ({cdf1}), \
         dj_cdf2 AS ({cdf2}), \
         dj_cross AS (\
         SELECT COALESCE(dj_cdf1.dj_value, dj_cdf2.dj_value) AS dj_value, \
         dj_cdf1.dj_cdf AS dj_cdf1, dj_cdf2.dj_cdf AS dj_cdf2 \
         FROM dj_cdf1 FULL OUTER JOIN dj_cdf2 ON dj_cdf1.dj_value = dj_cdf2.dj_value), \
         dj_indexed AS (\
         SELECT dj_value, \
         COUNT(dj_cdf1) OVER (ORDER BY dj_value) AS dj_group1, dj_cdf1, \
         COUNT(dj_cdf2) OVER (ORDER BY dj_value) AS dj_group2, dj_cdf2 \
         FROM dj_cross), \
         dj_filled AS (\
         SELECT dj_value, \
         COALESCE(FIRST_VALUE(dj_cdf1) OVER (PARTITION BY dj_group1 ORDER BY dj_value), 0) AS dj_cdf1, \
         COALESCE(FIRST_VALUE(dj_cdf2) OVER (PARTITION BY dj_group2 ORDER BY dj_value), 0) AS dj_cdf2 \
         FROM dj_indexed) \
         SELECT MAX(ABS(dj_cdf1 - dj_cdf2)) FROM dj_filled",
        cdf1 = cdf_relation(ctx, reference)?,
        cdf2 = cdf_relation(ctx, reference2)?,
    ));
    let statistic = ctx
        .fetch_scalar(&query)
        .await?
        .as_f64()
        .ok_or_else(|| JudgeError::retrieval("Could not compute d statistic."))?;
    debug!(statistic, "Computed Kolmogorov-Smirnov statistic");
    Ok(Retrieval::new(statistic, vec![query]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{datafusion_context, int_table, nullable_int_table, table};

    fn col_ref(name: &str) -> DataReference {
        DataReference::new(table(name), Some(vec!["col".into()]), None)
    }

    #[tokio::test]
    async fn test_ks_statistic_of_interleaved_samples() {
        let ctx = datafusion_context(vec![
            ("a", int_table("col", &[1, 1, 3, 2])),
            ("b", int_table("col", &[2, 5, 4])),
        ]);
        let d = ks_2sample(&ctx, &col_ref("a"), &col_ref("b")).await.unwrap();
        assert!((d.value - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(d.queries.len(), 1);
    }

    #[tokio::test]
    async fn test_ks_statistic_of_identical_samples_is_zero() {
        let ctx = datafusion_context(vec![("a", int_table("col", &[4, 8, 15, 16, 23, 42]))]);
        let d = ks_2sample(&ctx, &col_ref("a"), &col_ref("a")).await.unwrap();
        assert_eq!(d.value, 0.0);
    }

    #[tokio::test]
    async fn test_ks_statistic_without_values_fails() {
        let ctx = datafusion_context(vec![("nulls", nullable_int_table("col", &[None]))]);
        let err = ks_2sample(&ctx, &col_ref("nulls"), &col_ref("nulls"))
            .await
            .unwrap_err();
        assert!(err.is_retrieval_failure());
    }
}
