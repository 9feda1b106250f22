//! Cell values and best-effort parsers.
//!
//! Every parser in this module returns an `Option`: a `None` means "this text
//! is not a value of that kind" and the caller decides whether to keep the
//! original text or record a missing marker.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%Y.%m.%d",
    "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const TWELVE_HOUR_FORMATS: &[&str] = &["%I:%M:%S %p", "%I:%M %p"];
const TWENTY_FOUR_HOUR_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S"];

/// Tokens read as a missing marker, mirroring the usual spreadsheet/CSV
/// conventions for "no value".
const MISSING_TOKENS: &[&str] = &[
    "", "na", "n/a", "#n/a", "#na", "nan", "-nan", "null", "none", "<na>", "nat",
];

const CURRENCY_SYMBOLS: &[char] = &['$', '₩', '€', '£', '¥'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

pub type Cell = Option<Value>;

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::DateTime(_))
    }

    /// Builds the most specific numeric variant for `value`.
    pub fn number(value: f64) -> Value {
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Value::Integer(value as i64)
        } else {
            Value::Float(value)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Renders a cell for tables and CSV output; missing cells become empty text.
pub fn cell_display(cell: &Cell) -> String {
    cell.as_ref().map(Value::as_display).unwrap_or_default()
}

pub fn is_missing_token(value: &str) -> bool {
    let trimmed = value.trim();
    MISSING_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Parses plain numeric text (`12`, `-3.5`, `1e3`). Non-finite values are rejected.
pub fn parse_number(value: &str) -> Option<Value> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Some(Value::Integer(parsed));
    }
    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(Value::Float(parsed)),
        _ => None,
    }
}

/// Parses numeric text after stripping thousands separators and currency symbols.
pub fn coerce_number(value: &str) -> Option<Value> {
    let stripped = value
        .trim()
        .chars()
        .filter(|c| *c != ',' && !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace())
        .collect::<String>();
    parse_number(&stripped)
}

/// Reads a numeric cell, coercing text when it carries formatted numbers.
pub fn cell_to_number(cell: &Value) -> Option<Value> {
    match cell {
        Value::Integer(_) | Value::Float(_) => Some(cell.clone()),
        Value::Text(text) => coerce_number(text),
        Value::Date(_) | Value::DateTime(_) => None,
    }
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if let Some(parsed) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
    {
        return Some(parsed);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Parses a date or timestamp. Plain dates win over timestamps.
pub fn parse_temporal(value: &str) -> Option<Value> {
    if let Some(date) = parse_naive_date(value) {
        return Some(Value::Date(date));
    }
    parse_naive_datetime(value).map(Value::DateTime)
}

/// Reads a temporal cell; text is parsed, numbers are never dates.
pub fn cell_to_temporal(cell: &Value) -> Option<Value> {
    match cell {
        Value::Date(_) | Value::DateTime(_) => Some(cell.clone()),
        Value::Text(text) => parse_temporal(text),
        Value::Integer(_) | Value::Float(_) => None,
    }
}

/// Extracts the hour from free-text clock values: 12-hour with an AM/PM marker
/// first, then 24-hour `HH:MM`.
pub fn parse_clock_hour(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    TWELVE_HOUR_FORMATS
        .iter()
        .chain(TWENTY_FOUR_HOUR_FORMATS)
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .map(|time| time.hour())
}

/// Extracts the hour from a clock cell; timestamps carry their own hour.
pub fn cell_to_hour(cell: &Value) -> Option<u32> {
    match cell {
        Value::Text(text) => parse_clock_hour(text),
        Value::DateTime(dt) => Some(dt.hour()),
        _ => None,
    }
}

/// Column-name normalization used by the cleaning pipeline: trim and replace
/// internal spaces with `_`.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Comparison key for column aliases: lowercase alphanumerics only, so
/// `Invoice ID`, `invoice_id` and `InvoiceID` collapse to the same key.
pub fn alias_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Formats `value` with `,` thousands separators and a fixed number of decimals.
pub fn format_thousands(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return String::from("-");
    }
    let rendered = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match rendered.split_once('.') {
        Some((int, frac)) => (int.to_string(), Some(frac.to_string())),
        None => (rendered.clone(), None),
    };
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (idx, ch) in integer.chars().enumerate() {
        if idx > 0 && (integer.len() - idx).is_multiple_of(3) {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && rendered.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_key_ignores_case_and_separators() {
        assert_eq!(alias_key("Invoice ID"), "invoiceid");
        assert_eq!(alias_key("invoice_id"), "invoiceid");
        assert_eq!(alias_key("RETAIL SALES"), "retailsales");
    }

    #[test]
    fn normalize_column_name_replaces_internal_spaces() {
        assert_eq!(normalize_column_name("  Unit price "), "Unit_price");
        assert_eq!(normalize_column_name("gross margin percentage"), "gross_margin_percentage");
    }

    #[test]
    fn coerce_number_strips_currency_and_separators() {
        assert_eq!(coerce_number("$1,234"), Some(Value::Integer(1234)));
        assert_eq!(coerce_number("₩ 12,000.5"), Some(Value::Float(12000.5)));
        assert_eq!(coerce_number("twelve"), None);
    }

    #[test]
    fn parse_number_rejects_non_finite_values() {
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("-3.25"), Some(Value::Float(-3.25)));
    }

    #[test]
    fn parse_naive_date_prefers_month_first_for_slashes() {
        let expected = NaiveDate::from_ymd_opt(2019, 1, 5).unwrap();
        assert_eq!(parse_naive_date("1/5/2019"), Some(expected));
        assert_eq!(parse_naive_date("2019-01-05"), Some(expected));
        assert_eq!(parse_naive_date("not a date"), None);
    }

    #[test]
    fn parse_temporal_falls_back_to_timestamps() {
        let parsed = parse_temporal("2024-05-06T14:30:00").unwrap();
        assert!(matches!(parsed, Value::DateTime(_)));
        assert!(matches!(parse_temporal("2024-05-06"), Some(Value::Date(_))));
    }

    #[test]
    fn parse_clock_hour_tries_twelve_hour_first() {
        assert_eq!(parse_clock_hour("1:08:00 PM"), Some(13));
        assert_eq!(parse_clock_hour("10:29 AM"), Some(10));
        assert_eq!(parse_clock_hour("19:45"), Some(19));
        assert_eq!(parse_clock_hour("half past"), None);
    }

    #[test]
    fn format_thousands_groups_digits() {
        assert_eq!(format_thousands(1234567.0, 0), "1,234,567");
        assert_eq!(format_thousands(-9876.5, 1), "-9,876.5");
        assert_eq!(format_thousands(12.0, 2), "12.00");
    }

    #[test]
    fn missing_tokens_are_case_insensitive() {
        assert!(is_missing_token("N/A"));
        assert!(is_missing_token("  "));
        assert!(!is_missing_token("0"));
    }
}
