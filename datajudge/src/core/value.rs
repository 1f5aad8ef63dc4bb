//! Scalar values retrieved from a query engine.

use super::dialect::Dialect;
use crate::security::SqlSecurity;
use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A row of retrieved values.
pub type Row = Vec<Value>;

/// A single retrieved value.
///
/// Values are totally ordered and hashable so they can key the count maps
/// built by the uniques constraints. Integers and floats compare
/// numerically, so `Int(1) == Float(1.0)`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// A composite value spanning several columns.
    Tuple(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integral view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Calendar date view of the value; strings are parsed as `%Y-%m-%d`.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Timestamp(ts) => Some(ts.date()),
            Self::Str(s) => parse_date(s),
            _ => None,
        }
    }

    /// The members of a tuple, or the value itself as a one-element slice.
    pub fn components(&self) -> &[Value] {
        match self {
            Self::Tuple(values) => values,
            other => std::slice::from_ref(other),
        }
    }

    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self, dialect: Dialect) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format!("{v:?}"),
            Self::Str(s) => SqlSecurity::string_literal(s),
            Self::Date(d) => dialect.date_literal(*d),
            Self::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Tuple(values) => format!(
                "({})",
                values
                    .iter()
                    .map(|v| v.to_sql_literal(dialect))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
            Self::Date(_) => 4,
            Self::Timestamp(_) => 5,
            Self::Tuple(_) => 6,
        }
    }
}

/// Parses `2024-01-31`, tolerating surrounding quotes and a time suffix.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim().trim_matches('\'');
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ts| ts.date())
        })
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => cmp_f64(*a as f64, *b),
            (Self::Float(a), Self::Int(b)) => cmp_f64(*a, *b as f64),
            (Self::Float(a), Self::Float(b)) => cmp_f64(*a, *b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Tuple(a), Self::Tuple(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    (*v as i64).hash(state)
                } else {
                    v.to_bits().hash(state)
                }
            }
            Self::Str(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Timestamp(v) => v.hash(state),
            Self::Tuple(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Self::Tuple(values) => write!(
                f,
                "({})",
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Tuple(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_numeric_equality_across_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        let set: HashSet<Value> = [Value::Int(1), Value::Float(1.0)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_null_sorts_first() {
        let mut values = vec![Value::Int(3), Value::Null, Value::Int(-2)];
        values.sort();
        assert_eq!(values, vec![Value::Null, Value::Int(-2), Value::Int(3)]);
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        assert_eq!(parse_date("'2021-03-04'"), Some(expected));
        assert_eq!(parse_date("20210304"), Some(expected));
        assert_eq!(parse_date("2021-03-04 10:00:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_sql_literals() {
        assert_eq!(Value::from("it's").to_sql_literal(Dialect::DataFusion), "'it''s'");
        assert_eq!(Value::Float(1.5).to_sql_literal(Dialect::DataFusion), "1.5");
        assert_eq!(Value::Float(2.0).to_sql_literal(Dialect::DataFusion), "2.0");
        assert_eq!(Value::Null.to_sql_literal(Dialect::DataFusion), "NULL");
    }

    #[test]
    fn test_tuple_display() {
        let value = Value::Tuple(vec![Value::Int(1), Value::from("a"), Value::Null]);
        assert_eq!(value.to_string(), "(1, a, NULL)");
        assert_eq!(value.components().len(), 3);
    }
}
