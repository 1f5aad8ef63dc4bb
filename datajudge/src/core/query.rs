//! Query descriptors.
//!
//! [`Selection`] is the composable, not-yet-rendered form that data access
//! functions nest into larger statements; [`Query`] is what an engine
//! executes and what failure reports show.

use super::dialect::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An executable SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    sql: String,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A single SELECT statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Whether to select distinct rows
    pub distinct: bool,
    /// Rendered projection expressions; empty means `*`
    pub projection: Vec<String>,
    /// Rendered FROM relation
    pub from: String,
    /// Rendered WHERE predicate
    pub filter: Option<String>,
    /// Rendered GROUP BY expressions
    pub group_by: Vec<String>,
    /// Rendered HAVING predicate
    pub having: Option<String>,
    /// Row cap
    pub limit: Option<u64>,
}

impl Selection {
    /// Selects everything from `from`.
    pub fn over(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    pub fn project(mut self, projection: Vec<String>) -> Self {
        self.projection = projection;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds a predicate, AND-ed with any existing one.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        self.filter = Some(match self.filter.take() {
            Some(existing) => format!("({existing}) AND ({predicate})"),
            None => predicate,
        });
        self
    }

    pub fn group_by(mut self, columns: Vec<String>) -> Self {
        self.group_by = columns;
        self
    }

    pub fn having(mut self, predicate: impl Into<String>) -> Self {
        self.having = Some(predicate.into());
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Renders the statement.
    pub fn render(&self, dialect: Dialect) -> String {
        let projection = if self.projection.is_empty() {
            "*".to_string()
        } else {
            self.projection.join(", ")
        };

        let mut body = format!("FROM {}", self.from);
        if let Some(filter) = &self.filter {
            body.push_str(&format!(" WHERE {filter}"));
        }
        if !self.group_by.is_empty() {
            body.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        if let Some(having) = &self.having {
            body.push_str(&format!(" HAVING {having}"));
        }

        match self.limit {
            Some(n) => dialect.limited_select(self.distinct, &projection, &body, n),
            None if self.distinct => format!("SELECT DISTINCT {projection} {body}"),
            None => format!("SELECT {projection} {body}"),
        }
    }

    /// Renders the statement as a derived table named `alias`.
    pub fn aliased(&self, dialect: Dialect, alias: &str) -> String {
        format!("({}) AS {alias}", self.render(dialect))
    }

    pub fn to_query(&self, dialect: Dialect) -> Query {
        Query::new(self.render(dialect))
    }
}
