//! Schema constraints. These only consult catalog metadata.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use async_trait::async_trait;

/// Relation between the factual and the target column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCheck {
    /// Every target column exists in the factual source.
    Existence,
    /// Every factual column exists in the target source.
    Subset,
    /// Every target column exists in the factual source.
    Superset,
}

/// Compares column names of a source against a list or another source.
#[derive(Debug)]
pub struct ColumnNames {
    core: ConstraintCore<Vec<String>, Vec<String>>,
    check: ColumnCheck,
}

impl ColumnNames {
    pub fn new(check: ColumnCheck, core: ConstraintCore<Vec<String>, Vec<String>>) -> Result<Self> {
        let between = core.ref2().is_some();
        match check {
            ColumnCheck::Existence if between => Err(JudgeError::configuration(
                "ColumnExistence compares against a literal list of columns.",
            )),
            ColumnCheck::Subset | ColumnCheck::Superset if !between => Err(JudgeError::configuration(
                "Column subset and superset compare two sources and need ref2.",
            )),
            _ => Ok(Self { core, check }),
        }
    }
}

fn missing<'a>(columns: &'a [String], available: &[String]) -> Vec<&'a str> {
    columns
        .iter()
        .filter(|c| !available.contains(c))
        .map(String::as_str)
        .collect()
}

#[async_trait]
impl Retrieve for ColumnNames {
    type Factual = Vec<String>;
    type Target = Vec<String>;

    fn kind(&self) -> &'static str {
        match self.check {
            ColumnCheck::Existence => "ColumnExistence",
            ColumnCheck::Subset => "ColumnSubset",
            ColumnCheck::Superset => "ColumnSuperset",
        }
    }

    fn core(&self) -> &ConstraintCore<Vec<String>, Vec<String>> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
        db_access::column_names(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Vec<String>>> {
        db_access::column_names(ctx, reference).await
    }
}

impl crate::core::Compare for ColumnNames {
    fn compare(&self, factual: &Vec<String>, target: &Vec<String>) -> Result<Verdict> {
        Ok(match self.check {
            ColumnCheck::Existence | ColumnCheck::Superset => {
                let absent = missing(target, factual);
                Verdict::check(absent.is_empty(), || {
                    format!("{} doesn't have column(s) {}.", self.core.reference, absent.join(", "))
                })
            }
            ColumnCheck::Subset => {
                let absent = missing(factual, target);
                Verdict::check(absent.is_empty(), || {
                    let ref2 = self.core.ref2().map(ToString::to_string).unwrap_or_default();
                    format!("{ref2} doesn't have column(s) {}. ", absent.join(", "))
                })
            }
        })
    }
}

/// Checks the SQL type of a single column.
///
/// Types are compared case-insensitively by prefix, so `varchar` accepts
/// `varchar(20)`. A zero-scale decimal counts as an integer.
#[derive(Debug)]
pub struct ColumnType {
    core: ConstraintCore<String, String>,
}

impl ColumnType {
    pub fn new(core: ConstraintCore<String, String>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Retrieve for ColumnType {
    type Factual = String;
    type Target = String;

    fn kind(&self) -> &'static str {
        "ColumnType"
    }

    fn core(&self) -> &ConstraintCore<String, String> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<String>> {
        db_access::column_type(ctx, reference).await
    }

    async fn retrieve_target(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<String>> {
        db_access::column_type(ctx, reference).await
    }
}

impl crate::core::Compare for ColumnType {
    fn compare(&self, factual: &String, target: &String) -> Result<Verdict> {
        let mut column_type = factual.to_lowercase();
        if column_type == "decimal(38, 0)" {
            column_type = "integer".to_string();
        }
        Ok(Verdict::check(column_type.starts_with(&target.to_lowercase()), || {
            format!("{} is {factual} instead of {target}.", self.core.reference)
        }))
    }
}
