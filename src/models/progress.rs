use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::errors::FloorsheetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateStatus {
    Complete,
    Skipped,
    Interrupted,
    Failed,
}

impl DateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateStatus::Complete => "complete",
            DateStatus::Skipped => "skipped",
            DateStatus::Interrupted => "interrupted",
            DateStatus::Failed => "failed",
        }
    }

    /// Complete and skipped dates are never fetched again by a resuming run.
    pub fn is_final(&self) -> bool {
        matches!(self, DateStatus::Complete | DateStatus::Skipped)
    }
}

impl fmt::Display for DateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DateStatus {
    type Err = FloorsheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(DateStatus::Complete),
            "skipped" => Ok(DateStatus::Skipped),
            "interrupted" => Ok(DateStatus::Interrupted),
            "failed" => Ok(DateStatus::Failed),
            other => Err(FloorsheetError::StoreWrite(format!("unknown progress status '{}'", other))),
        }
    }
}

/// One row of the append-only progress log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEntry {
    pub trade_date: NaiveDate,
    pub filter_key: String,
    pub pages_completed: u32,
    pub pages_total: u32,
    pub status: DateStatus,
    pub recorded_at: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(trade_date: NaiveDate, filter_key: &str, pages_completed: u32, pages_total: u32, status: DateStatus) -> Self {
        Self {
            trade_date,
            filter_key: filter_key.to_string(),
            pages_completed,
            pages_total,
            status,
            recorded_at: Utc::now(),
        }
    }
}

/// Counters for one controller run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub dates_completed: u32,
    pub dates_skipped: u32,
    pub dates_already_done: u32,
    pub pages_fetched: u32,
    pub records_persisted: usize,
    pub retries: u32,
    pub cancelled: bool,
}
