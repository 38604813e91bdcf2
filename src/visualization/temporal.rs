//! Value-driven column typing: temporal, numeric and categorical columns are
//! recognised from sampled values, never from column names.

use crate::models::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Non-null values sampled per column.
pub const SAMPLE_SIZE: usize = 10;
/// Share of sampled values that must parse for a column to count as temporal.
pub const TEMPORAL_THRESHOLD: f64 = 0.8;

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

lazy_static! {
    // 2024-01, 2024/1
    static ref YEAR_MONTH: Regex = Regex::new(r"^(\d{4})[-/](\d{1,2})$").unwrap();
    // 2024-Q1, 2024Q1, Q1 2024, Q1-2024
    static ref QUARTER: Regex =
        Regex::new(r"(?i)^(\d{4})\s*-?\s*q([1-4])$|^q([1-4])\s*[-/ ]?\s*(\d{4})$").unwrap();
    // 2024-W05
    static ref ISO_WEEK: Regex = Regex::new(r"(?i)^(\d{4})-?w(\d{2})$").unwrap();
    // 2024 (calendar year as text)
    static ref YEAR: Regex = Regex::new(r"^(\d{4})$").unwrap();
    // Jan 2024, January 2024, Jan-2024
    static ref MONTH_YEAR: Regex = Regex::new(r"(?i)^([a-z]{3,9})[\s\-/,]+(\d{4})$").unwrap();
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

fn month_index(name: &str) -> Option<usize> {
    let name = name.to_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| *m == name || (name.len() == 3 && m.starts_with(&name)) || (name == "sept" && *m == "september"))
}

/// Whether `text` reads as a calendar date, timestamp, or period.
pub fn is_temporal_value(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    if let Some(caps) = YEAR_MONTH.captures(text) {
        return plausible_year(&caps[1]) && caps[2].parse::<u32>().map(|m| (1..=12).contains(&m)).unwrap_or(false);
    }
    if let Some(caps) = QUARTER.captures(text) {
        let year = caps.get(1).or_else(|| caps.get(4));
        return year.map(|y| plausible_year(y.as_str())).unwrap_or(false);
    }
    if let Some(caps) = ISO_WEEK.captures(text) {
        return plausible_year(&caps[1]) && caps[2].parse::<u32>().map(|w| (1..=53).contains(&w)).unwrap_or(false);
    }
    if let Some(caps) = YEAR.captures(text) {
        return plausible_year(&caps[1]);
    }
    if let Some(caps) = MONTH_YEAR.captures(text) {
        return month_index(&caps[1]).is_some() && plausible_year(&caps[2]);
    }
    if month_index(text).is_some() {
        return true;
    }

    if DateTime::parse_from_rfc3339(text).is_ok() || DateTime::parse_from_rfc2822(text).is_ok() {
        return true;
    }
    if DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(text, f).is_ok()) {
        return true;
    }
    DATETIME_FORMATS
        .iter()
        .any(|f| NaiveDateTime::parse_from_str(text, f).is_ok())
}

fn plausible_year(text: &str) -> bool {
    text.parse::<u32>()
        .map(|y| (1900..=2100).contains(&y))
        .unwrap_or(false)
}

/// Up to [`SAMPLE_SIZE`] non-null values of `column`, in row order.
pub fn sample_values<'a>(rows: &'a [Row], column: &str) -> Vec<&'a Value> {
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|v| !v.is_null())
        .take(SAMPLE_SIZE)
        .collect()
}

/// A column is temporal when it is not numeric and at least
/// [`TEMPORAL_THRESHOLD`] of its sampled values parse as dates or periods.
pub fn is_temporal_column(rows: &[Row], column: &str) -> bool {
    let sample = sample_values(rows, column);
    if sample.is_empty() || sample.iter().any(|v| v.is_number()) {
        return false;
    }
    let parsed = sample
        .iter()
        .filter(|v| v.as_str().map(is_temporal_value).unwrap_or(false))
        .count();
    parsed as f64 / sample.len() as f64 >= TEMPORAL_THRESHOLD
}

/// All sampled values are numbers.
pub fn is_numeric_column(rows: &[Row], column: &str) -> bool {
    let sample = sample_values(rows, column);
    !sample.is_empty() && sample.iter().all(|v| v.is_number())
}

/// The first non-null value is a string.
pub fn is_string_column(rows: &[Row], column: &str) -> bool {
    sample_values(rows, column)
        .first()
        .map(|v| v.is_string())
        .unwrap_or(false)
}

/// First temporal column, if any.
pub fn find_temporal_column<'a>(rows: &[Row], columns: &'a [String]) -> Option<&'a String> {
    columns.iter().find(|c| is_temporal_column(rows, c))
}

pub fn numeric_columns<'a>(rows: &[Row], columns: &'a [String]) -> Vec<&'a String> {
    columns.iter().filter(|c| is_numeric_column(rows, c)).collect()
}

/// True when `name` looks like a pivoted category header: a calendar period
/// ("2024-01", "Q1", "jan_sales", "FY2024") or a common dimension member
/// ("product_a", "region_west").
pub fn is_category_like_name(name: &str) -> bool {
    if is_temporal_value(name) {
        return true;
    }
    lazy_static! {
        static ref PERIOD_TOKEN: Regex = Regex::new(r"^(q[1-4]|h[12]|fy\d{2,4}|\d{4})$").unwrap();
    }
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .any(|token| {
            PERIOD_TOKEN.is_match(token)
                || month_index(token).is_some()
                || token == "product"
                || token == "region"
        })
}
