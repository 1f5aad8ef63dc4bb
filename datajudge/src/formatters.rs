//! Rendering of failure messages and requirement reports.
//!
//! Failure messages carry inline markup (`[numMatch]…[/numMatch]` and
//! `[numDiff]…[/numDiff]`) marking the shared and differing parts of
//! compared values. A [`Formatter`] turns this markup into output for a
//! particular medium: plain text, ANSI terminals or HTML.
//!
//! A [`ReportFormatter`] renders a whole [`RequirementReport`], the results
//! of testing one requirement, as JSON or as human-readable text.
//!
//! # Examples
//!
//! ```rust
//! use datajudge::formatters::{AnsiColorFormatter, DefaultFormatter, Formatter};
//!
//! let message = "1[numDiff]23[/numDiff]";
//! assert_eq!(DefaultFormatter.fmt_str(message), "123");
//! assert_eq!(AnsiColorFormatter.fmt_str(message), "1\x1b[46m23\x1b[49m");
//! ```

use crate::core::TestResult;
use crate::prelude::*;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt::Write;

/// Inline markup codes understood by every [`Formatter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Part of a value that agrees with its counterpart
    NumMatch,
    /// Part of a value that differs from its counterpart
    NumDiff,
}

impl Markup {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "numMatch" => Some(Self::NumMatch),
            "numDiff" => Some(Self::NumDiff),
            _ => None,
        }
    }
}

#[allow(clippy::expect_used)]
static MARKUP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(numMatch|numDiff)\](.*?)\[/(numMatch|numDiff)\]").expect("Hardcoded markup regex")
});

/// Replaces inline markup with medium specific styling.
///
/// Implementors decide how a marked span looks through
/// [`apply_formatting`](Formatter::apply_formatting); the provided
/// [`fmt_str`](Formatter::fmt_str) finds the spans.
pub trait Formatter: Send + Sync {
    /// Styles `inner`, the content of a span marked with `markup`.
    fn apply_formatting(&self, markup: Markup, inner: &str) -> String {
        let _ = markup;
        inner.to_string()
    }

    /// Renders every markup span of `s`. Mismatched or unknown tags are left
    /// untouched.
    fn fmt_str(&self, s: &str) -> String {
        MARKUP_PATTERN
            .replace_all(s, |caps: &Captures<'_>| {
                let (open, inner, close) = (&caps[1], &caps[2], &caps[3]);
                match Markup::from_code(open) {
                    Some(markup) if open == close => self.apply_formatting(markup, inner),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Drops all markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {}

/// Highlights differing parts with a cyan background.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiColorFormatter;

impl Formatter for AnsiColorFormatter {
    fn apply_formatting(&self, markup: Markup, inner: &str) -> String {
        match markup {
            Markup::NumDiff => format!("\x1b[46m{inner}\x1b[49m"),
            Markup::NumMatch => inner.to_string(),
        }
    }
}

/// Wraps marked parts in colored `<span>` elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlFormatter;

impl Formatter for HtmlFormatter {
    fn apply_formatting(&self, markup: Markup, inner: &str) -> String {
        let color = match markup {
            Markup::NumDiff => "#FF0000",
            Markup::NumMatch => "#00FF00",
        };
        format!("<span style='background-color: {color}; color: #FFFFFF'>{inner}</span>")
    }
}

/// Configuration options for rendering requirement reports.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Include the pass/fail summary
    pub include_summary: bool,
    /// Include passing constraints, not only failures
    pub include_passed: bool,
    /// Include the queries that produced factual and target values
    pub include_queries: bool,
    /// Maximum number of failures to display (`None` for all)
    pub max_failures: Option<usize>,
    /// Whether to use colorized output (human formatter only)
    pub use_colors: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_summary: true,
            include_passed: true,
            include_queries: false,
            max_failures: None,
            use_colors: true,
        }
    }
}

impl FormatterConfig {
    /// Creates a minimal configuration showing only the summary.
    pub fn minimal() -> Self {
        Self {
            include_summary: true,
            include_passed: false,
            include_queries: false,
            max_failures: Some(0),
            use_colors: false,
        }
    }

    /// Creates a detailed configuration showing everything, queries included.
    pub fn detailed() -> Self {
        Self {
            include_summary: true,
            include_passed: true,
            include_queries: true,
            max_failures: None,
            use_colors: true,
        }
    }

    /// Creates a configuration suitable for CI logs.
    pub fn ci() -> Self {
        Self {
            include_summary: true,
            include_passed: false,
            include_queries: true,
            max_failures: Some(50),
            use_colors: false,
        }
    }

    pub fn with_summary(mut self, include: bool) -> Self {
        self.include_summary = include;
        self
    }

    pub fn with_passed(mut self, include: bool) -> Self {
        self.include_passed = include;
        self
    }

    pub fn with_queries(mut self, include: bool) -> Self {
        self.include_queries = include;
        self
    }

    pub fn with_max_failures(mut self, max: Option<usize>) -> Self {
        self.max_failures = max;
        self
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }
}

/// The results of testing one requirement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementReport {
    pub name: String,
    pub results: Vec<TestResult>,
}

impl RequirementReport {
    pub fn new(name: impl Into<String>, results: Vec<TestResult>) -> Self {
        Self {
            name: name.into(),
            results,
        }
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Renders a [`RequirementReport`] into a string.
///
/// ```rust
/// use datajudge::formatters::{FormatterConfig, ReportFormatter, RequirementReport};
///
/// struct OneLine;
///
/// impl ReportFormatter for OneLine {
///     fn format_with_config(
///         &self,
///         report: &RequirementReport,
///         _config: &FormatterConfig,
///     ) -> datajudge::prelude::Result<String> {
///         Ok(format!("{}: {}/{}", report.name, report.passed(), report.results.len()))
///     }
/// }
/// ```
pub trait ReportFormatter {
    /// Formats `report` with the formatter's default configuration.
    fn format(&self, report: &RequirementReport) -> Result<String> {
        self.format_with_config(report, &FormatterConfig::default())
    }

    fn format_with_config(&self, report: &RequirementReport, config: &FormatterConfig) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct JsonSummary {
    total: usize,
    passed: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct JsonResult {
    outcome: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    factual_queries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_queries: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct JsonReport {
    requirement: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<JsonSummary>,
    results: Vec<JsonResult>,
}

/// Keeps failures up to `max_failures` and, if requested, every passing
/// result, in their original order.
fn selected_results<'a>(report: &'a RequirementReport, config: &FormatterConfig) -> Vec<&'a TestResult> {
    let mut failures_left = config.max_failures.unwrap_or(usize::MAX);
    report
        .results
        .iter()
        .filter(|result| {
            if result.outcome {
                return config.include_passed;
            }
            if failures_left == 0 {
                return false;
            }
            failures_left -= 1;
            true
        })
        .collect()
}

/// Formats reports as JSON, with markup stripped from every message.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    config: FormatterConfig,
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config, pretty: false }
    }

    /// Enables indented output.
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &RequirementReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(&self, report: &RequirementReport, config: &FormatterConfig) -> Result<String> {
        let formatter = DefaultFormatter;
        let results = selected_results(report, config)
            .into_iter()
            .map(|result| JsonResult {
                outcome: result.outcome,
                description: result.formatted_description(&formatter),
                failure_message: result.formatted_failure_message(&formatter),
                factual_queries: result.factual_queries.clone().filter(|_| config.include_queries),
                target_queries: result.target_queries.clone().filter(|_| config.include_queries),
            })
            .collect();
        let json = JsonReport {
            requirement: report.name.clone(),
            success: report.is_success(),
            summary: config.include_summary.then(|| JsonSummary {
                total: report.results.len(),
                passed: report.passed(),
                failed: report.failed(),
            }),
            results,
        };

        let serialized = if self.pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        };
        serialized.map_err(|e| JudgeError::Serialization(format!("Failed to serialize report to JSON: {e}")))
    }
}

/// Formats reports for console output.
///
/// With colors enabled, differing parts of compared values are highlighted
/// through [`AnsiColorFormatter`].
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    config: FormatterConfig,
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn write_report(
        output: &mut String,
        report: &RequirementReport,
        config: &FormatterConfig,
    ) -> std::fmt::Result {
        let markup: &dyn Formatter = if config.use_colors {
            &AnsiColorFormatter
        } else {
            &DefaultFormatter
        };
        let (pass, fail) = if config.use_colors {
            ("\x1b[32mPASSED\x1b[0m", "\x1b[31mFAILED\x1b[0m")
        } else {
            ("PASSED", "FAILED")
        };

        writeln!(
            output,
            "Requirement {}: {}",
            report.name,
            if report.is_success() { pass } else { fail }
        )?;
        if config.include_summary {
            writeln!(
                output,
                "   Constraints: {}, passed: {}, failed: {}",
                report.results.len(),
                report.passed(),
                report.failed()
            )?;
        }

        let selected = selected_results(report, config);
        if !selected.is_empty() {
            writeln!(output)?;
        }
        for result in &selected {
            let status = if result.outcome { pass } else { fail };
            let description = result
                .formatted_description(markup)
                .unwrap_or_else(|| "unnamed constraint".to_string());
            writeln!(output, "  {status} {description}")?;
            if let Some(message) = result.formatted_failure_message(markup) {
                for line in message.lines() {
                    writeln!(output, "      {line}")?;
                }
            }
            if config.include_queries {
                for query in result.factual_queries.iter().flatten() {
                    writeln!(output, "      factual query: {query}")?;
                }
                for query in result.target_queries.iter().flatten() {
                    writeln!(output, "      target query: {query}")?;
                }
            }
        }

        let hidden = report.failed() - selected.iter().filter(|r| !r.outcome).count();
        if hidden > 0 {
            writeln!(output, "  ... and {hidden} more failures")?;
        }
        Ok(())
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &RequirementReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(&self, report: &RequirementReport, config: &FormatterConfig) -> Result<String> {
        let mut output = String::new();
        Self::write_report(&mut output, report, config)
            .map_err(|e| JudgeError::Internal(format!("Failed to format report: {e}")))?;
        Ok(output)
    }
}
