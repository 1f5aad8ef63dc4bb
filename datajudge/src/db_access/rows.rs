//! Row matching between two references.

use super::derived;
use crate::core::{DataReference, ExecutionContext, Query, Retrieval};
use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which columns pair rows of two references and which columns are then
/// compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAndCompare {
    pub matching_columns1: Vec<String>,
    pub matching_columns2: Vec<String>,
    pub comparison_columns1: Vec<String>,
    pub comparison_columns2: Vec<String>,
}

impl MatchAndCompare {
    pub fn new(
        matching_columns1: Vec<String>,
        matching_columns2: Vec<String>,
        comparison_columns1: Vec<String>,
        comparison_columns2: Vec<String>,
    ) -> Result<Self> {
        if matching_columns1.is_empty() || matching_columns1.len() != matching_columns2.len() {
            return Err(JudgeError::configuration(format!(
                "Expected the same non-zero number of matching columns on both sides, got {} and {}.",
                matching_columns1.len(),
                matching_columns2.len()
            )));
        }
        if comparison_columns1.is_empty() || comparison_columns1.len() != comparison_columns2.len() {
            return Err(JudgeError::configuration(format!(
                "Expected the same non-zero number of comparison columns on both sides, got {} and {}.",
                comparison_columns1.len(),
                comparison_columns2.len()
            )));
        }
        Ok(Self {
            matching_columns1,
            matching_columns2,
            comparison_columns1,
            comparison_columns2,
        })
    }

    fn matching_clause(&self, ctx: &ExecutionContext) -> Result<String> {
        let dialect = ctx.dialect();
        let parts = self
            .matching_columns1
            .iter()
            .zip(&self.matching_columns2)
            .map(|(c1, c2)| {
                Ok(format!(
                    "{} = {}",
                    dialect.qualified("t1", c1)?,
                    dialect.qualified("t2", c2)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }

    fn comparison_clause(&self, ctx: &ExecutionContext) -> Result<String> {
        let dialect = ctx.dialect();
        let parts = self
            .comparison_columns1
            .iter()
            .zip(&self.comparison_columns2)
            .map(|(c1, c2)| {
                let c1 = dialect.qualified("t1", c1)?;
                let c2 = dialect.qualified("t2", c2)?;
                Ok(format!("({c1} = {c2} OR ({c1} IS NULL AND {c2} IS NULL))"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }
}

impl fmt::Display for MatchAndCompare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Matched on {:?} and {:?}. Compared on {:?} and {:?}.",
            self.matching_columns1,
            self.matching_columns2,
            self.comparison_columns1,
            self.comparison_columns2
        )
    }
}

/// Outcome of matching two references.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowMismatch {
    /// Fraction of matched rows differing on the comparison columns
    pub mismatch_fraction: f64,
    /// Number of matched row pairs
    pub n_matched: i64,
}

/// Inner-joins both references on the matching columns and measures how
/// many joined rows differ on the comparison columns. NULL equals NULL.
///
/// Without any matched rows the mismatch fraction is 0.
pub async fn row_mismatch(
    ctx: &ExecutionContext,
    reference: &DataReference,
    reference2: &DataReference,
    match_and_compare: &MatchAndCompare,
) -> Result<Retrieval<RowMismatch>> {
    let join = format!(
        "{} JOIN {} ON {}",
        derived(ctx, reference, "t1")?,
        derived(ctx, reference2, "t2")?,
        match_and_compare.matching_clause(ctx)?
    );
    let difference = Query::new(format!(
        "SELECT AVG(CASE WHEN {} THEN 0.0 ELSE 1.0 END) FROM {join}",
        match_and_compare.comparison_clause(ctx)?
    ));
    let n_rows = Query::new(format!("SELECT COUNT(*) FROM {join}"));

    let mismatch_fraction = ctx.fetch_scalar(&difference).await?.as_f64().unwrap_or(0.0);
    let n_matched = ctx.fetch_count(&n_rows).await?;
    Ok(Retrieval::new(
        RowMismatch {
            mismatch_fraction,
            n_matched,
        },
        vec![difference, n_rows],
    ))
}
