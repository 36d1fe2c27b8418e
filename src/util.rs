use chrono::NaiveDate;
use rand::Rng;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{FloorsheetError, Result};

/// Form date format expected by the floorsheet date filter.
pub const FORM_DATE_FORMAT: &str = "%m/%d/%Y";

/// Every date in `[start, end)`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d < end)
}

pub fn format_form_date(date: NaiveDate) -> String {
    date.format(FORM_DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD` or the form's own `MM/DD/YYYY`.
pub fn parse_date(date_str: &str) -> Result<NaiveDate> {
    let trimmed = date_str.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, FORM_DATE_FORMAT))
        .map_err(FloorsheetError::from)
}

// 表格数字带千分位逗号
fn strip_grouping(cell: &str) -> String {
    cell.trim().chars().filter(|c| *c != ',').collect()
}

pub fn parse_integer_cell(cell: &str) -> Option<i64> {
    strip_grouping(cell).parse::<i64>().ok()
}

pub fn parse_decimal_cell(cell: &str) -> Option<Decimal> {
    Decimal::from_str(&strip_grouping(cell)).ok()
}

/// Collapse runs of whitespace (including non-breaking spaces) to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uniformly random duration in `[min, max]`, millisecond resolution.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
