//! Lenient parsing of raw cell text into typed values
//!
//! Each function returns `None` on failure; callers treat that as a missing
//! value.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Integer cells, accepting integral floats such as `"2020.0"`.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let text = raw.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value = text.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Monetary amounts; only finite values are accepted.
pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Calendar date of a payment timestamp.
///
/// Accepts ISO dates, ISO date-times with or without offset, and
/// `DD/MM/YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(timestamp.date());
        }
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.date_naive());
    }
    NaiveDate::parse_from_str(text, "%d/%m/%Y").ok()
}

/// Year cell as `i32`
pub fn parse_year(raw: &str) -> Option<i32> {
    parse_integer(raw).and_then(|value| i32::try_from(value).ok())
}
