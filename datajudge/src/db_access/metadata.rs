//! Catalog lookups. These resolve schemas without scanning rows.

use crate::core::{DataReference, ExecutionContext, Retrieval, Selection};
use crate::prelude::*;

/// All column names of the reference's data source, in source order.
pub async fn column_names(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
    let dialect = ctx.dialect();
    let query = Selection::over(reference.source.clause(dialect)?).to_query(dialect);
    let columns = ctx.schema(&query).await?;
    Ok(Retrieval::literal(
        columns.into_iter().map(|column| column.name).collect(),
    ))
}

/// Normalized SQL type of the reference's column, lowercase.
///
/// Uses the single projected column, or the first column of the source when
/// the reference selects everything.
pub async fn column_type(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<String>> {
    let dialect = ctx.dialect();
    let query = reference.selection(dialect)?.to_query(dialect);
    let columns = ctx.schema(&query).await?;
    let column = match reference.columns.as_deref() {
        Some([name]) => columns.into_iter().find(|c| &c.name == name),
        _ => columns.into_iter().next(),
    };
    let column = column.ok_or_else(|| JudgeError::ColumnNotFound {
        column: reference.to_string(),
    })?;
    Ok(Retrieval::literal(column.data_type.to_lowercase()))
}

/// Declared primary key columns of the reference's data source.
pub async fn primary_keys(ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
    let keys = ctx.primary_keys(&reference.source).await?;
    Ok(Retrieval::literal(keys))
}
