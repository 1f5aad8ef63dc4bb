//! Counting queries: rows, distinct rows, set differences and fractions.

use super::{derived, metadata, quoted_column};
use crate::core::{DataReference, ExecutionContext, Query, Retrieval, Row, Selection, Value};
use crate::prelude::*;
use crate::security::SqlSecurity;
use tracing::{debug, instrument};

/// Number of rows of `reference`, capped at `limit` if given.
///
/// The cap lets callers that only need a lower bound stop scanning early.
#[instrument(skip(ctx, reference), fields(source = %reference.source, limit = ?limit))]
pub async fn row_count(
    ctx: &ExecutionContext,
    reference: &DataReference,
    limit: Option<u64>,
) -> Result<Retrieval<i64>> {
    let dialect = ctx.dialect();
    let mut selection = reference.selection(dialect)?;
    if let Some(limit) = limit {
        selection = selection.limit(limit);
    }
    let query = Query::new(format!(
        "SELECT COUNT(*) FROM {}",
        selection.aliased(dialect, "dj_rows")
    ));
    let n_rows = ctx.fetch_count(&query).await?;
    debug!(n_rows, "Counted rows");
    Ok(Retrieval::new(n_rows, vec![query]))
}

/// Number of distinct column tuples of `reference`.
pub async fn unique_count(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<i64>> {
    let dialect = ctx.dialect();
    let selection = reference.selection(dialect)?.distinct();
    let query = Query::new(format!(
        "SELECT COUNT(*) FROM {}",
        selection.aliased(dialect, "dj_distinct")
    ));
    let n_uniques = ctx.fetch_count(&query).await?;
    Ok(Retrieval::new(n_uniques, vec![query]))
}

/// Number of distinct column tuples across both references.
pub async fn unique_count_union(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
) -> Result<Retrieval<i64>> {
    let dialect = ctx.dialect();
    let query = Query::new(format!(
        "SELECT COUNT(*) FROM ({} UNION {}) AS dj_union",
        reference.selection(dialect)?.render(dialect),
        reference2.selection(dialect)?.render(dialect)
    ));
    let n_uniques = ctx.fetch_count(&query).await?;
    Ok(Retrieval::new(n_uniques, vec![query]))
}

fn difference_relation(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
) -> Result<String> {
    let dialect = ctx.dialect();
    if !dialect.supports_row_difference() {
        return Err(JudgeError::unsupported("row difference", dialect));
    }
    Ok(format!(
        "({} {} {}) AS dj_difference",
        reference.selection(dialect)?.render(dialect),
        dialect.except(),
        reference2.selection(dialect)?.render(dialect)
    ))
}

/// Number of distinct rows of `reference` absent from `reference2`.
pub async fn row_difference_count(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
) -> Result<Retrieval<i64>> {
    let relation = difference_relation(ctx, reference, reference2)?;
    let query = Query::new(format!("SELECT COUNT(*) FROM {relation}"));
    let n_rows = ctx.fetch_count(&query).await?;
    Ok(Retrieval::new(n_rows, vec![query]))
}

/// One row of `reference` absent from `reference2`, if any.
pub async fn row_difference_sample(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
) -> Result<Retrieval<Option<Row>>> {
    let relation = difference_relation(ctx, reference, reference2)?;
    let query = Selection::over(relation).limit(1).to_query(ctx.dialect());
    let sample = ctx.fetch(&query).await?.into_iter().next();
    Ok(Retrieval::new(sample, vec![query]))
}

/// Fraction of NULL values in the single column of `reference`; 0 for an
/// empty relation.
pub async fn missing_fraction(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<f64>> {
    let relation = derived(ctx, reference, "dj_values")?;
    let column = quoted_column(ctx, reference)?;
    let total = Query::new(format!("SELECT COUNT(*) FROM {relation}"));
    let missing = Query::new(format!(
        "SELECT COUNT(*) FROM {relation} WHERE {column} IS NULL"
    ));
    let n_total = ctx.fetch_count(&total).await?;
    let n_missing = ctx.fetch_count(&missing).await?;
    let fraction = if n_total == 0 {
        0.0
    } else {
        n_missing as f64 / n_total as f64
    };
    Ok(Retrieval::new(fraction, vec![total, missing]))
}

/// Fraction of rows whose single column lies within `[lower, upper]`;
/// `None` for an empty relation.
pub async fn fraction_between(
    ctx: &ExecutionContext,
    reference: &DataReference,
    lower: &Value,
    upper: &Value,
) -> Result<Retrieval<Option<f64>>> {
    let dialect = ctx.dialect();
    let relation = derived(ctx, reference, "dj_values")?;
    let column = quoted_column(ctx, reference)?;
    let all = Query::new(format!("SELECT COUNT(*) FROM {relation}"));
    let within = Query::new(format!(
        "SELECT COUNT(*) FROM {relation} WHERE {column} >= {} AND {column} <= {}",
        lower.to_sql_literal(dialect),
        upper.to_sql_literal(dialect)
    ));
    let n_all = ctx.fetch_count(&all).await?;
    let n_within = ctx.fetch_count(&within).await?;
    let fraction = (n_all > 0).then(|| n_within as f64 / n_all as f64);
    Ok(Retrieval::new(fraction, vec![all, within]))
}

/// Values of a single column failing a regular expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexViolations {
    pub n_violations: i64,
    pub counterexamples: Vec<Value>,
}

/// Counts values of the single column of `reference` not fully matching
/// `pattern`, evaluated inside the database.
///
/// With `aggregated`, distinct values are counted instead of rows.
/// `n_counterexamples` bounds the returned examples; `None` returns all.
pub async fn regex_violations(
    ctx: &ExecutionContext,
    reference: &DataReference,
    pattern: &str,
    aggregated: bool,
    n_counterexamples: Option<u64>,
) -> Result<Retrieval<RegexViolations>> {
    let dialect = ctx.dialect();
    let escaped = SqlSecurity::validate_regex_pattern(pattern)?;
    let column = quoted_column(ctx, reference)?;
    let mut selection = reference.selection(dialect)?;
    if aggregated {
        selection = selection.distinct();
    }

    let matches = dialect.regex_match(&column, &format!("^(?:{escaped})$"))?;
    let violations = Selection::over(selection.aliased(dialect, "dj_values"))
        .project(vec![column.clone()])
        .filter(format!("NOT ({matches})"));
    let count_query = Query::new(format!(
        "SELECT COUNT(*) FROM {}",
        violations.aliased(dialect, "dj_violations")
    ));
    let n_violations = ctx.fetch_count(&count_query).await?;

    let mut queries = vec![count_query];
    let counterexamples = match n_counterexamples {
        Some(0) => Vec::new(),
        limit => {
            let query = match limit {
                Some(n) => violations.limit(n).to_query(dialect),
                None => violations.to_query(dialect),
            };
            let rows = ctx.fetch(&query).await?;
            queries.push(query);
            rows.into_iter()
                .filter_map(|row| row.into_iter().next())
                .collect()
        }
    };

    Ok(Retrieval::new(
        RegexViolations {
            n_violations,
            counterexamples,
        },
        queries,
    ))
}

/// One row occurring more than once in `reference`, if any.
pub async fn duplicate_sample(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Option<Row>>> {
    let dialect = ctx.dialect();
    let columns = match &reference.columns {
        Some(columns) if !columns.is_empty() => columns.clone(),
        _ => metadata::column_names(ctx, reference).await?.value,
    };
    let quoted = dialect.quote_all(&columns)?;
    let query = Selection::over(derived(ctx, reference, "dj_rows")?)
        .project(quoted.clone())
        .group_by(quoted)
        .having("COUNT(*) > 1")
        .limit(1)
        .to_query(dialect);
    let sample = ctx.fetch(&query).await?.into_iter().next();
    Ok(Retrieval::new(sample, vec![query]))
}
