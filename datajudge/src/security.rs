//! SQL hygiene for generated queries.
//!
//! Column and table names are spliced into SQL text as quoted identifiers,
//! so they only need their closing quote escaped. Conditions are raw
//! predicates by nature; outside of quoted literals they must not end the
//! statement or open a comment.

use crate::prelude::*;
use regex::Regex;

const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_PREDICATE_LENGTH: usize = 5000;

/// SQL validation helpers used while building queries.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates a single (unqualified) SQL identifier.
    ///
    /// Any name a backend can hold is accepted, since identifiers are always
    /// quoted; see [`SqlSecurity::quote_identifier`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use datajudge::security::SqlSecurity;
    ///
    /// assert!(SqlSecurity::validate_identifier("created_at").is_ok());
    /// assert!(SqlSecurity::validate_identifier("order id").is_ok());
    /// assert!(SqlSecurity::validate_identifier("").is_err());
    /// ```
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(JudgeError::SecurityError(
                "Identifier cannot be empty".to_string(),
            ));
        }

        if identifier.chars().count() > MAX_IDENTIFIER_LENGTH {
            return Err(JudgeError::SecurityError(format!(
                "Identifier too long (max {MAX_IDENTIFIER_LENGTH} characters)"
            )));
        }

        if identifier.contains('\0') {
            return Err(JudgeError::SecurityError(
                "Identifier cannot contain null bytes".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates `identifier` and wraps it in `open`/`close`, doubling every
    /// `close` inside the name.
    ///
    /// ```rust
    /// use datajudge::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::quote_identifier("a\"b", '"', '"').unwrap(), "\"a\"\"b\"");
    /// assert_eq!(SqlSecurity::quote_identifier("x]y", '[', ']').unwrap(), "[x]]y]");
    /// ```
    pub fn quote_identifier(identifier: &str, open: char, close: char) -> Result<String> {
        Self::validate_identifier(identifier)?;
        let mut quoted = String::with_capacity(identifier.len() + 2);
        quoted.push(open);
        for c in identifier.chars() {
            if c == close {
                quoted.push(close);
            }
            quoted.push(c);
        }
        quoted.push(close);
        Ok(quoted)
    }

    /// Validates a raw filter predicate before it is placed in a WHERE clause.
    ///
    /// Statement separators and comment markers are rejected unless they sit
    /// inside a quoted string or identifier.
    pub fn validate_predicate(predicate: &str) -> Result<()> {
        if predicate.trim().is_empty() {
            return Err(JudgeError::SecurityError(
                "Predicate cannot be empty".to_string(),
            ));
        }

        if predicate.len() > MAX_PREDICATE_LENGTH {
            return Err(JudgeError::SecurityError(format!(
                "Predicate too long (max {MAX_PREDICATE_LENGTH} characters)"
            )));
        }

        if predicate.contains('\0') {
            return Err(JudgeError::SecurityError(
                "Predicate cannot contain null bytes".to_string(),
            ));
        }

        if let Some(marker) = Self::unquoted_marker(predicate) {
            return Err(JudgeError::SecurityError(format!(
                "Predicate contains forbidden sequence '{marker}'"
            )));
        }

        Ok(())
    }

    /// First `;`, `--`, `/*` or `*/` found outside quotes.
    ///
    /// Doubled quote characters inside a quoted section are escapes and do
    /// not end it.
    fn unquoted_marker(predicate: &str) -> Option<&'static str> {
        let mut chars = predicate.chars().peekable();
        let mut closing: Option<char> = None;
        while let Some(c) = chars.next() {
            if let Some(quote) = closing {
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        chars.next();
                    } else {
                        closing = None;
                    }
                }
                continue;
            }
            match (c, chars.peek()) {
                ('\'' | '"' | '`', _) => closing = Some(c),
                (';', _) => return Some(";"),
                ('-', Some('-')) => return Some("--"),
                ('/', Some('*')) => return Some("/*"),
                ('*', Some('/')) => return Some("*/"),
                _ => {}
            }
        }
        None
    }

    /// Validates a regex pattern and returns it escaped for use in a SQL
    /// string literal.
    pub fn validate_regex_pattern(pattern: &str) -> Result<String> {
        if pattern.len() > 1000 {
            return Err(JudgeError::SecurityError(
                "Regex pattern too long (max 1000 characters)".to_string(),
            ));
        }

        if pattern.contains('\0') {
            return Err(JudgeError::SecurityError(
                "Regex pattern cannot contain null bytes".to_string(),
            ));
        }

        if let Err(e) = Regex::new(pattern) {
            return Err(JudgeError::SecurityError(format!(
                "Invalid regex pattern: {e}"
            )));
        }

        Self::check_redos_patterns(pattern)?;

        Ok(pattern.replace('\'', "''"))
    }

    /// Renders `value` as a single-quoted SQL string literal.
    pub fn string_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Rejects the classic catastrophic backtracking shapes.
    fn check_redos_patterns(pattern: &str) -> Result<()> {
        let dangerous_patterns = &["(.*)*", "(.*)+", "(.+)+", "(a+)+", "(a*)*"];

        for dangerous in dangerous_patterns {
            if pattern.contains(dangerous) {
                return Err(JudgeError::SecurityError(
                    "Regex pattern might cause catastrophic backtracking".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Validation of numeric constraint parameters.
pub struct InputValidator;

impl InputValidator {
    /// Validates that a value is finite.
    pub fn validate_finite(value: f64, name: &str) -> Result<()> {
        if !value.is_finite() {
            return Err(JudgeError::configuration(format!(
                "{name} must be a finite number, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that a value lies in the closed unit interval.
    pub fn validate_fraction(value: f64, name: &str) -> Result<()> {
        Self::validate_finite(value, name)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(JudgeError::configuration(format!(
                "{name} must be between 0 and 1, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that a value is finite and not negative.
    pub fn validate_non_negative(value: f64, name: &str) -> Result<()> {
        Self::validate_finite(value, name)?;
        if value < 0.0 {
            return Err(JudgeError::configuration(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_sql_identifiers() {
        assert!(SqlSecurity::validate_identifier("customer_id").is_ok());
        assert!(SqlSecurity::validate_identifier("_private_col").is_ok());
        assert!(SqlSecurity::validate_identifier("order id").is_ok());
        assert!(SqlSecurity::validate_identifier("unit-price").is_ok());
        assert!(SqlSecurity::validate_identifier("prénom").is_ok());
        assert!(SqlSecurity::validate_identifier(&"é".repeat(128)).is_ok());
    }

    #[test]
    fn test_invalid_sql_identifiers() {
        assert!(SqlSecurity::validate_identifier("").is_err());
        assert!(SqlSecurity::validate_identifier(&"a".repeat(200)).is_err());
        assert!(SqlSecurity::validate_identifier("col\0name").is_err());
    }

    #[test]
    fn test_quote_identifier_escapes_closing_quote() {
        assert_eq!(SqlSecurity::quote_identifier("order id", '"', '"').unwrap(), "\"order id\"");
        assert_eq!(
            SqlSecurity::quote_identifier("x\"; DROP TABLE t; --", '"', '"').unwrap(),
            "\"x\"\"; DROP TABLE t; --\""
        );
        assert_eq!(SqlSecurity::quote_identifier("a]b", '[', ']').unwrap(), "[a]]b]");
        assert_eq!(SqlSecurity::quote_identifier("a`b", '`', '`').unwrap(), "`a``b`");
        assert!(SqlSecurity::quote_identifier("", '"', '"').is_err());
    }

    #[test]
    fn test_predicate_validation() {
        assert!(SqlSecurity::validate_predicate("price > 100").is_ok());
        assert!(SqlSecurity::validate_predicate("name = 'O''Brien'").is_ok());
        assert!(SqlSecurity::validate_predicate("updated_at >= DATE '2021-01-01'").is_ok());
        assert!(SqlSecurity::validate_predicate("col_int IN (1, 2, 3)").is_ok());

        assert!(SqlSecurity::validate_predicate("price > 0; DROP TABLE users").is_err());
        assert!(SqlSecurity::validate_predicate("1 = 1 -- trailing").is_err());
        assert!(SqlSecurity::validate_predicate("1 = 1 /* open").is_err());
        assert!(SqlSecurity::validate_predicate("name = 'it''s'; SELECT 1").is_err());
        assert!(SqlSecurity::validate_predicate("   ").is_err());
    }

    #[test]
    fn test_predicate_literals_may_hold_anything() {
        assert!(SqlSecurity::validate_predicate("action = 'delete'").is_ok());
        assert!(SqlSecurity::validate_predicate("status IN ('update', 'insert')").is_ok());
        assert!(SqlSecurity::validate_predicate("kind = 'merge'").is_ok());
        assert!(SqlSecurity::validate_predicate("note = 'a--b'").is_ok());
        assert!(SqlSecurity::validate_predicate("note = 'x; y /* z */'").is_ok());
        assert!(SqlSecurity::validate_predicate("\"odd;name\" > 0").is_ok());
        assert!(SqlSecurity::validate_predicate("updated_by <> 'drop'").is_ok());
    }

    #[test]
    fn test_regex_pattern_validation() {
        assert!(SqlSecurity::validate_regex_pattern(r"^[A-Z]\d+$").is_ok());
        assert!(SqlSecurity::validate_regex_pattern(r"[unclosed").is_err());
        assert!(SqlSecurity::validate_regex_pattern(&"a".repeat(2000)).is_err());
        assert!(SqlSecurity::validate_regex_pattern("(.*)*x").is_err());

        let result = SqlSecurity::validate_regex_pattern("it's").unwrap();
        assert_eq!(result, "it''s");
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(SqlSecurity::string_literal("abc"), "'abc'");
        assert_eq!(SqlSecurity::string_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_input_validation() {
        assert!(InputValidator::validate_fraction(0.95, "tolerance").is_ok());
        assert!(InputValidator::validate_fraction(1.5, "tolerance").is_err());
        assert!(InputValidator::validate_fraction(f64::NAN, "tolerance").is_err());
        assert!(InputValidator::validate_non_negative(3.0, "deviation").is_ok());
        assert!(InputValidator::validate_non_negative(-0.1, "deviation").is_err());
    }
}
