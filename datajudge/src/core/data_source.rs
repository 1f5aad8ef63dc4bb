//! Where the data comes from: a table, a backend expression or a raw query.

use super::dialect::Dialect;
use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A queryable relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    /// A catalog table.
    Table {
        db: String,
        schema: Option<String>,
        table: String,
    },
    /// A backend relation expression used verbatim in a FROM clause, such as
    /// a table-valued function call.
    Expression { expression: String, name: String },
    /// An arbitrary SELECT statement, wrapped as a derived table.
    RawQuery {
        query: String,
        name: String,
        columns: Option<Vec<String>>,
    },
}

impl DataSource {
    /// A catalog table.
    pub fn table(
        db: impl Into<String>,
        schema: Option<&str>,
        table: impl Into<String>,
    ) -> Self {
        Self::Table {
            db: db.into(),
            schema: schema.map(str::to_string),
            table: table.into(),
        }
    }

    /// A backend relation expression.
    pub fn expression(expression: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            name: name.into(),
        }
    }

    /// A raw query, optionally declaring the columns it returns.
    pub fn raw_query(
        query: impl Into<String>,
        name: impl Into<String>,
        columns: Option<Vec<String>>,
    ) -> Self {
        Self::RawQuery {
            query: query.into(),
            name: name.into(),
            columns,
        }
    }

    /// Renders the relation for a FROM clause.
    pub fn clause(&self, dialect: Dialect) -> Result<String> {
        match self {
            Self::Table { db, schema, table } => {
                let name = dialect.table_name(db, schema.as_deref(), table)?;
                Ok(match dialect.table_hint() {
                    Some(hint) => format!("{name} {hint}"),
                    None => name,
                })
            }
            Self::Expression { expression, .. } => Ok(expression.clone()),
            Self::RawQuery { query, columns, .. } => {
                let query = query.trim().trim_end_matches(';');
                match columns {
                    Some(columns) => Ok(format!(
                        "({query}) AS dj_raw ({})",
                        dialect.quote_all(columns)?.join(", ")
                    )),
                    None => Ok(format!("({query}) AS dj_raw")),
                }
            }
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table {
                db,
                schema: Some(schema),
                table,
            } => write!(f, "{db}.{schema}.{table}"),
            Self::Table { table, .. } => f.write_str(table),
            Self::Expression { name, .. } | Self::RawQuery { name, .. } => f.write_str(name),
        }
    }
}
