//! Helpers for rendering values into failure messages.
//!
//! Failure messages carry lightweight inline markup, `[numMatch]…[/numMatch]`
//! and `[numDiff]…[/numDiff]`, which a [`Formatter`](crate::formatters::Formatter)
//! later strips or translates into colors.

use crate::core::{DataReference, Row, Value};
use crate::prelude::*;
use std::cmp::Reverse;
use std::fmt::Display;

/// Number of elements kept by [`OutputProcessor::default`].
pub const DEFAULT_OUTPUT_LIMIT: usize = 100;

/// Inserts `,` between groups of three digits of the integer part.
fn with_thousands_separator(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (integer, fraction) = match unsigned.find('.') {
        Some(index) => unsigned.split_at(index),
        None => (unsigned, ""),
    };
    if integer.is_empty() || !integer.chars().all(|c| c.is_ascii_digit()) {
        return text.to_string();
    }
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{sign}{grouped}{fraction}")
}

fn tag_difference(text: &str, common: usize) -> String {
    let (same, different) = text.split_at(common);
    if different.is_empty() {
        same.to_string()
    } else {
        format!("{same}[numDiff]{different}[/numDiff]")
    }
}

/// Renders two values, tagging the part where they start to differ.
///
/// The common prefix is kept plain. With `decimal_separator`, numbers are
/// grouped in thousands before comparing.
pub fn format_difference(
    first: impl Display,
    second: impl Display,
    decimal_separator: bool,
) -> (String, String) {
    let (mut first, mut second) = (first.to_string(), second.to_string());
    if decimal_separator {
        first = with_thousands_separator(&first);
        second = with_thousands_separator(&second);
    }
    if first == second {
        return (first, second);
    }
    let common = first
        .char_indices()
        .zip(second.chars())
        .find(|((_, a), b)| a != b)
        .map(|((index, _), _)| index)
        .unwrap_or_else(|| first.len().min(second.len()));
    (tag_difference(&first, common), tag_difference(&second, common))
}

/// `"col = value , col2 = value2"` for a sample row, or the row as a tuple
/// when the reference selects all columns.
pub fn format_sample(sample: &Row, reference: &DataReference) -> String {
    match &reference.columns {
        Some(columns) => columns
            .iter()
            .zip(sample)
            .map(|(column, value)| format!("{column} = {value}"))
            .collect::<Vec<_>>()
            .join(" , "),
        None => Value::Tuple(sample.clone()).to_string(),
    }
}

/// Renders a list of values as `[a, b, c]`.
pub fn format_values(values: &[Value]) -> String {
    let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("[{}]", rendered.join(", "))
}

/// A post-processing step applied to the values listed in failure messages,
/// together with their occurrence counts if present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputProcessor {
    /// Keeps the first `n` elements and appends a note about the cut.
    Limit(usize),
    /// Sorts by descending count, then by value; by value alone without
    /// counts.
    Sort,
}

impl Default for OutputProcessor {
    fn default() -> Self {
        Self::Limit(DEFAULT_OUTPUT_LIMIT)
    }
}

impl OutputProcessor {
    pub fn apply(
        &self,
        values: Vec<Value>,
        counts: Option<Vec<Value>>,
    ) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
        match self {
            Self::Limit(limit) => Ok(output_processor_limit(values, counts, *limit)),
            Self::Sort => output_processor_sort(values, counts),
        }
    }
}

/// Applies `processors` in order.
pub fn apply_output_processors(
    processors: &[OutputProcessor],
    mut values: Vec<Value>,
    mut counts: Option<Vec<Value>>,
) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
    for processor in processors {
        (values, counts) = processor.apply(values, counts)?;
    }
    Ok((values, counts))
}

/// Truncates values (and counts) to `limit` elements, appending a note when
/// elements were dropped.
pub fn output_processor_limit(
    mut values: Vec<Value>,
    counts: Option<Vec<Value>>,
    limit: usize,
) -> (Vec<Value>, Option<Vec<Value>>) {
    let total = values.len();
    if total <= limit {
        return (values, counts);
    }
    values.truncate(limit);
    values.push(Value::from(format!(
        "<SHORTENED OUTPUT, displaying the first {limit} / {total} elements above>"
    )));
    let counts = counts.map(|mut counts| {
        let total_counts = counts.len();
        counts.truncate(limit);
        counts.push(Value::from(format!(
            "<SHORTENED OUTPUT, displaying the first {limit} / {total_counts} counts above>"
        )));
        counts
    });
    (values, counts)
}

/// Sorts values ascending, or by descending count when counts are given.
/// Ties keep value order. Values and counts must have equal length.
pub fn output_processor_sort(
    values: Vec<Value>,
    counts: Option<Vec<Value>>,
) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
    let Some(counts) = counts else {
        let mut values = values;
        values.sort();
        return Ok((values, None));
    };
    if counts.len() != values.len() {
        return Err(JudgeError::configuration(format!(
            "Got {} values but {} counts; both must have the same length.",
            values.len(),
            counts.len()
        )));
    }
    let mut pairs: Vec<(Value, Value)> = values.into_iter().zip(counts).collect();
    pairs.sort_by(|(v1, c1), (v2, c2)| (Reverse(c1), v1).cmp(&(Reverse(c2), v2)));
    let (values, counts) = pairs.into_iter().unzip();
    Ok((values, Some(counts)))
}

/// Renders a fraction as a percentage with two decimals.
pub fn percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}
