//! Value coercion shared by the row operations.
//!
//! Numbers follow the conventions of the spreadsheets the pipeline reads:
//! `parse_float` takes the leading numeric prefix (`"12abc"` → 12),
//! `parse_number` requires the whole (trimmed) value to be numeric and treats
//! an empty value as 0. `format_number` prints integers without a fraction.
//!
//! Dates use the `YYYY YY MM M DD D` token vocabulary.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fallback formats tried after any declared ones.
pub const COMMON_DATES: &[&str] = &[
    "M/D/YYYY",
    "M/D/YY",
    "MM.DD.YYYY",
    "M.D.YYYY",
    "MM/DD/YYYY",
    "YYYY-MM-DD",
    "YY/MM/DD",
];

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)").expect("static pattern")
});

static FULL_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)$").expect("static pattern")
});

// =============================================================================
// Numbers
// =============================================================================

fn parse_numeric_literal(text: &str) -> Option<f64> {
    let unsigned = text.trim_start_matches(['+', '-']);
    let negative = text.starts_with('-');
    let magnitude = if unsigned == "Infinity" {
        f64::INFINITY
    } else {
        unsigned.parse::<f64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse the leading numeric prefix of a value. `None` means not a number.
pub fn parse_float(value: &str) -> Option<f64> {
    let trimmed = value.trim_start();
    let m = FLOAT_PREFIX.find(trimmed)?;
    parse_numeric_literal(m.as_str())
}

/// Parse a whole value as a number. Blank values are 0.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    if !FULL_NUMBER.is_match(trimmed) {
        return None;
    }
    parse_numeric_literal(trimmed)
}

/// Print a number the way a spreadsheet export would: no trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        let formatted = format!("{:e}", value);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }

    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Rounding applied before cents are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    Up,
    Down,
    #[default]
    Default,
}

/// Format a value as dollars and cents.
pub fn coerce_usd(value: &str, round: Rounding) -> String {
    let Some(mut amount) = parse_number(value) else {
        return "NaN".to_string();
    };

    match round {
        Rounding::Down => amount = (amount * 100.0).floor() / 100.0,
        Rounding::Up => amount = (amount * 100.0).ceil() / 100.0,
        Rounding::Default => {}
    }

    if amount.is_infinite() {
        return format_number(amount);
    }
    let formatted = format!("{:.2}", amount);
    if formatted == "-0.00" {
        "0.00".to_string()
    } else {
        formatted
    }
}

/// Format the leading number of a value, or fall back.
pub fn coerce_number(value: &str, otherwise: Option<&str>) -> String {
    match (parse_float(value), otherwise) {
        (Some(n), _) => format_number(n),
        (None, Some(fallback)) => fallback.to_string(),
        (None, None) => "NaN".to_string(),
    }
}

// =============================================================================
// Dates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Year4,
    Year2,
    Month2,
    Month,
    Day2,
    Day,
    Literal(char),
}

fn tokenize(format: &str) -> Vec<Token> {
    const TABLE: &[(&str, Token)] = &[
        ("YYYY", Token::Year4),
        ("YY", Token::Year2),
        ("MM", Token::Month2),
        ("M", Token::Month),
        ("DD", Token::Day2),
        ("D", Token::Day),
    ];

    let mut tokens = Vec::new();
    let mut rest = format;
    'outer: while let Some(c) = rest.chars().next() {
        for (pattern, token) in TABLE {
            if let Some(tail) = rest.strip_prefix(pattern) {
                tokens.push(*token);
                rest = tail;
                continue 'outer;
            }
        }
        tokens.push(Token::Literal(c));
        rest = &rest[c.len_utf8()..];
    }
    tokens
}

fn two_digit_year(n: i32) -> i32 {
    n + if n > 68 { 1900 } else { 2000 }
}

fn take_digits(input: &str, max: usize) -> Option<(u32, usize)> {
    let len = input.chars().take(max).take_while(|c| c.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    input[..len].parse().ok().map(|n| (n, len))
}

/// Parse a date with one format. Trailing text after whitespace is ignored.
pub fn parse_date_with(value: &str, format: &str) -> Option<NaiveDate> {
    let mut rest = value.trim();
    let (mut year, mut month, mut day) = (None, None, None);

    for token in tokenize(format) {
        match token {
            Token::Literal(c) => rest = rest.strip_prefix(c)?,
            Token::Year4 => {
                let (n, len) = take_digits(rest, 4)?;
                year = Some(if len == 2 { two_digit_year(n as i32) } else { n as i32 });
                rest = &rest[len..];
            }
            Token::Year2 => {
                let (n, len) = take_digits(rest, 2)?;
                year = Some(two_digit_year(n as i32));
                rest = &rest[len..];
            }
            Token::Month | Token::Month2 => {
                let (n, len) = take_digits(rest, 2)?;
                month = Some(n);
                rest = &rest[len..];
            }
            Token::Day | Token::Day2 => {
                let (n, len) = take_digits(rest, 2)?;
                day = Some(n);
                rest = &rest[len..];
            }
        }
    }

    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    NaiveDate::from_ymd_opt(year?, month.unwrap_or(1), day.unwrap_or(1))
}

/// Try each format in order.
pub fn parse_date<S: AsRef<str>>(value: &str, formats: &[S]) -> Option<NaiveDate> {
    formats.iter().find_map(|f| parse_date_with(value, f.as_ref()))
}

/// Render a date with a token format.
pub fn format_date(date: NaiveDate, format: &str) -> String {
    let mut out = String::new();
    for token in tokenize(format) {
        match token {
            Token::Year4 => out.push_str(&format!("{:04}", date.year())),
            Token::Year2 => out.push_str(&format!("{:02}", date.year().rem_euclid(100))),
            Token::Month2 => out.push_str(&format!("{:02}", date.month())),
            Token::Month => out.push_str(&date.month().to_string()),
            Token::Day2 => out.push_str(&format!("{:02}", date.day())),
            Token::Day => out.push_str(&date.day().to_string()),
            Token::Literal(c) => out.push(c),
        }
    }
    out
}

/// Convert a spreadsheet serial day number into a date.
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    // Day 0 of the spreadsheet serial calendar.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::try_days(serial.floor() as i64)?)
}

/// Whether a date operation keeps the parsed year or substitutes the run's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearPolicy {
    Assume,
    #[default]
    Keep,
}

/// Parse a cell into a date following the `coerce date` rules.
///
/// With declared formats, 5 and 7 character values are left-padded with `0`
/// (`"10124"` → `"010124"`) before the declared formats and the fallback list
/// are tried. Without declared formats a numeric value is a serial day.
pub fn coerce_date(
    value: &str,
    parse: &[String],
    year: YearPolicy,
    format: &str,
    context_year: i32,
) -> Option<String> {
    let date = if !parse.is_empty() {
        let padded = match value.len() {
            5 | 7 => format!("0{}", value),
            _ => value.to_string(),
        };
        parse_date(&padded, parse).or_else(|| parse_date(&padded, COMMON_DATES))
    } else if let Some(serial) = parse_number(value) {
        from_serial(serial)
    } else {
        parse_date(value, COMMON_DATES)
    }?;

    let date = match year {
        YearPolicy::Assume => date.with_year(context_year)?,
        YearPolicy::Keep => date,
    };

    Some(format_date(date, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float("12abc"), Some(12.0));
        assert_eq!(parse_float("  -3.5e2x"), Some(-350.0));
        assert_eq!(parse_float(".5"), Some(0.5));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn test_parse_number_whole_value() {
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number("0x10"), Some(16.0));
        assert_eq!(parse_number("12abc"), None);
        assert_eq!(parse_number("1,000"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_usd_rounding() {
        assert_eq!(coerce_usd("12.345", Rounding::Down), "12.34");
        assert_eq!(coerce_usd("12.341", Rounding::Up), "12.35");
        assert_eq!(coerce_usd("7", Rounding::Default), "7.00");
        assert_eq!(coerce_usd("", Rounding::Default), "0.00");
        assert_eq!(coerce_usd("n/a", Rounding::Default), "NaN");
    }

    #[test]
    fn test_usd_default_is_idempotent() {
        for raw in ["0", "1.005", "19.999", "-4.2", "1234567.891", "0.015", "3"] {
            let once = coerce_usd(raw, Rounding::Default);
            let twice = coerce_usd(&once, Rounding::Default);
            assert_eq!(once, twice, "{}", raw);
        }
    }

    #[test]
    fn test_coerce_number_fallback() {
        assert_eq!(coerce_number("00123", None), "123");
        assert_eq!(coerce_number("", Some("99999")), "99999");
        assert_eq!(coerce_number("x", None), "NaN");
    }

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(parse_date_with("3/7/2024", "M/D/YYYY"), Some(d));
        assert_eq!(parse_date_with("03.07.2024", "MM.DD.YYYY"), Some(d));
        assert_eq!(parse_date_with("2024-03-07", "YYYY-MM-DD"), Some(d));
        assert_eq!(parse_date_with("3/7/24", "M/D/YY"), Some(d));
        assert_eq!(parse_date_with("3/7/24", "M/D/YYYY"), Some(d));
        assert_eq!(parse_date_with("3/7/2024 00:00:00", "M/D/YYYY"), Some(d));
        assert_eq!(parse_date_with("13/40/2024", "M/D/YYYY"), None);
    }

    #[test]
    fn test_two_digit_year_pivot() {
        assert_eq!(parse_date_with("1/1/68", "M/D/YY").map(|d| d.year()), Some(2068));
        assert_eq!(parse_date_with("1/1/69", "M/D/YY").map(|d| d.year()), Some(1969));
    }

    #[test]
    fn test_format_date_tokens() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_date(d, "M/D/YYYY"), "3/7/2024");
        assert_eq!(format_date(d, "MM/DD/YY"), "03/07/24");
    }

    #[test]
    fn test_serial_dates() {
        assert_eq!(from_serial(45000.0), NaiveDate::from_ymd_opt(2023, 3, 15));
        assert_eq!(
            coerce_date("45000", &[], YearPolicy::Keep, "M/D/YYYY", 2024).as_deref(),
            Some("3/15/2023")
        );
    }

    #[test]
    fn test_coerce_date_padding_and_assume() {
        let parse = vec!["MMDDYY".to_string()];
        assert_eq!(
            coerce_date("30724", &parse, YearPolicy::Keep, "M/D/YYYY", 2020).as_deref(),
            Some("3/7/2024")
        );
        assert_eq!(
            coerce_date("3/7/2019", &[], YearPolicy::Assume, "MM/DD/YYYY", 2024).as_deref(),
            Some("03/07/2024")
        );
        assert_eq!(coerce_date("soon", &[], YearPolicy::Keep, "M/D/YYYY", 2024), None);
    }
}
