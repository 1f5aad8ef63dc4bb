//! What data a constraint looks at.

use super::condition::Condition;
use super::data_source::DataSource;
use super::dialect::Dialect;
use super::query::Selection;
use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A data source narrowed to some columns and filtered by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReference {
    /// Where the rows come from
    pub source: DataSource,
    /// Projected columns; `None` means all columns
    pub columns: Option<Vec<String>>,
    /// Row filter
    pub condition: Option<Condition>,
}

impl DataReference {
    pub fn new(
        source: DataSource,
        columns: Option<Vec<String>>,
        condition: Option<Condition>,
    ) -> Self {
        Self {
            source,
            columns,
            condition,
        }
    }

    /// Same source and condition, projected onto `columns`.
    pub fn with_columns(&self, columns: Option<Vec<String>>) -> Self {
        Self {
            source: self.source.clone(),
            columns,
            condition: self.condition.clone(),
        }
    }

    /// Same source and columns, with `condition` AND-ed onto the existing one.
    pub fn with_extra_condition(&self, condition: &Condition) -> Self {
        Self {
            source: self.source.clone(),
            columns: self.columns.clone(),
            condition: Condition::merge(self.condition.as_ref(), Some(condition)),
        }
    }

    /// The filtered, projected selection over the source.
    pub fn selection(&self, dialect: Dialect) -> Result<Selection> {
        let mut selection = Selection::over(self.source.clause(dialect)?);
        if let Some(columns) = &self.columns {
            selection = selection.project(dialect.quote_all(columns)?);
        }
        if let Some(condition) = &self.condition {
            selection = selection.filter(condition.render());
        }
        Ok(selection)
    }

    /// The single column this reference projects onto.
    pub fn single_column(&self) -> Result<&str> {
        match self.columns.as_deref() {
            None => Err(JudgeError::configuration(format!(
                "Trying to access column of DataReference {self} yet none is given."
            ))),
            Some([column]) => Ok(column),
            Some(columns) => Err(JudgeError::configuration(format!(
                "DataReference {self} was expected to have exactly one column, found {}.",
                columns.len()
            ))),
        }
    }

    /// The projected columns, or an error when all columns are selected.
    pub fn explicit_columns(&self) -> Result<&[String]> {
        match self.columns.as_deref() {
            Some(columns) if !columns.is_empty() => Ok(columns),
            _ => Err(JudgeError::configuration(format!(
                "DataReference {self} needs explicit columns."
            ))),
        }
    }

    /// Rendered filter as shown in failure messages.
    pub fn condition_clause(&self) -> Option<String> {
        self.condition.as_ref().map(|c| format!("WHERE {}", c.render()))
    }
}

impl fmt::Display for DataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.columns {
            Some(columns) if !columns.is_empty() => {
                let plural = if columns.len() > 1 { "s" } else { "" };
                let listed = columns
                    .iter()
                    .map(|c| format!("'{c}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}'s column{plural} {listed}", self.source)
            }
            _ => write!(f, "{}", self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> DataSource {
        DataSource::table("datafusion", Some("public"), "orders")
    }

    #[test]
    fn test_selection_projects_and_filters() {
        let reference = DataReference::new(
            orders(),
            Some(vec!["id".into(), "amount".into()]),
            Some(Condition::raw("amount > 0").unwrap()),
        );
        assert_eq!(
            reference.selection(Dialect::DataFusion).unwrap().render(Dialect::DataFusion),
            "SELECT \"id\", \"amount\" FROM \"datafusion\".\"public\".\"orders\" WHERE amount > 0"
        );
    }

    #[test]
    fn test_selection_with_unusual_column_names() {
        let reference = DataReference::new(
            orders(),
            Some(vec!["order id".into(), "unit-price".into()]),
            Some(Condition::raw("action = 'delete'").unwrap()),
        );
        assert_eq!(
            reference.selection(Dialect::DataFusion).unwrap().render(Dialect::DataFusion),
            "SELECT \"order id\", \"unit-price\" FROM \"datafusion\".\"public\".\"orders\" WHERE action = 'delete'"
        );
    }

    #[test]
    fn test_selection_all_columns() {
        let reference = DataReference::new(orders(), None, None);
        assert_eq!(
            reference.selection(Dialect::DataFusion).unwrap().render(Dialect::DataFusion),
            "SELECT * FROM \"datafusion\".\"public\".\"orders\""
        );
    }

    #[test]
    fn test_single_column() {
        let one = DataReference::new(orders(), Some(vec!["id".into()]), None);
        assert_eq!(one.single_column().unwrap(), "id");

        let none = DataReference::new(orders(), None, None);
        assert!(matches!(none.single_column(), Err(JudgeError::Configuration(_))));

        let empty = DataReference::new(orders(), Some(vec![]), None);
        assert!(empty.single_column().is_err());

        let two = DataReference::new(orders(), Some(vec!["a".into(), "b".into()]), None);
        assert!(two.single_column().is_err());
    }

    #[test]
    fn test_display() {
        let reference = DataReference::new(orders(), Some(vec!["a".into(), "b".into()]), None);
        assert_eq!(
            reference.to_string(),
            "datafusion.public.orders's columns 'a', 'b'"
        );
        let reference = DataReference::new(orders(), Some(vec!["a".into()]), None);
        assert_eq!(reference.to_string(), "datafusion.public.orders's column 'a'");
        assert_eq!(
            DataReference::new(orders(), None, None).to_string(),
            "datafusion.public.orders"
        );
    }

    #[test]
    fn test_condition_clause() {
        let reference = DataReference::new(
            orders(),
            None,
            Some(Condition::raw("amount > 0").unwrap()),
        );
        assert_eq!(
            reference.condition_clause().as_deref(),
            Some("WHERE amount > 0")
        );
        assert_eq!(DataReference::new(orders(), None, None).condition_clause(), None);
    }
}
