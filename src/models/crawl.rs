use chrono::NaiveDate;
use std::fmt;

use crate::errors::FloorsheetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Probing,
    Paging,
}

/// Position of the crawl within one date. Lives only while that date is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCursor {
    pub target_date: NaiveDate,
    pub page_index: u32,
    /// Only meaningful once page 1 of the date has been fetched.
    pub last_known_page_count: u32,
    pub mode: CursorMode,
}

impl CrawlCursor {
    pub fn probe(target_date: NaiveDate) -> Self {
        Self {
            target_date,
            page_index: 1,
            last_known_page_count: 0,
            mode: CursorMode::Probing,
        }
    }

    /// Switch to paging at `start_page`. Returns false when there is nothing left to page.
    pub fn begin_paging(&mut self, page_count: u32, start_page: u32) -> bool {
        self.last_known_page_count = page_count;
        self.page_index = start_page.max(1);
        self.mode = CursorMode::Paging;
        self.has_more()
    }

    pub fn advance(&mut self) {
        self.page_index += 1;
    }

    pub fn has_more(&self) -> bool {
        self.page_index <= self.last_known_page_count
    }
}

impl fmt::Display for CrawlCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            CursorMode::Probing => write!(f, "{} (probe)", self.target_date),
            CursorMode::Paging => write!(
                f,
                "{} page {}/{}",
                self.target_date, self.page_index, self.last_known_page_count
            ),
        }
    }
}

/// Result of one exchange after classification.
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        html: String,
        total_pages: Option<u32>,
    },
    NoDataForDate,
    TransientFailure(FloorsheetError),
    FatalFailure(FloorsheetError),
}

impl FetchOutcome {
    pub fn from_error(err: FloorsheetError) -> Self {
        if err.is_transient() {
            FetchOutcome::TransientFailure(err)
        } else {
            FetchOutcome::FatalFailure(err)
        }
    }
}

/// Controller states, used for transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    ProbingDate,
    PagingDate,
    DateComplete,
    DateSkipped,
}
