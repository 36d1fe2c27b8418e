use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use std::time::Duration;

use crate::errors::{FloorsheetError, Result};
use crate::models::trade::FilterSet;

pub const DEFAULT_SOURCE_URL: &str = "https://merolagani.com/Floorsheet.aspx";
pub const DEFAULT_SOLVER_URL: &str = "http://0.0.0.0:8191/v1";

/// CSS selectors used to classify a fetched page.
#[derive(Debug, Clone)]
pub struct PageMarkers {
    /// Element that only renders when the date has no trades.
    pub no_data_selector: String,
    /// Element whose text carries `Total pages: N`.
    pub pagination_selector: String,
}

impl Default for PageMarkers {
    fn default() -> Self {
        Self {
            no_data_selector: "#ctl00_ContentPlaceHolder1_divNoData, .floorsheet-no-data".to_string(),
            pagination_selector: "span#ctl00_ContentPlaceHolder1_PagerControl1_litRecords".to_string(),
        }
    }
}

/// Run parameters for one crawl.
pub struct Config {
    pub start_date: NaiveDate,
    /// Exclusive.
    pub end_date: NaiveDate,
    pub filters: FilterSet,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub retry_backoff: Duration,
    /// `None` retries transient failures forever.
    pub max_retries: Option<u32>,
    pub reuse_probe_page: bool,
    pub resume: bool,
    pub db_path: String,
    pub markers: PageMarkers,
}

impl Config {
    pub fn new() -> Self {
        let today = Local::now().date_naive();
        Self {
            start_date: today - ChronoDuration::days(1),
            end_date: today,
            filters: FilterSet::default(),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(300),
            max_retries: Some(30),
            reuse_probe_page: true,
            resume: true,
            db_path: "data/floorsheet.db".to_string(),
            markers: PageMarkers::default(),
        }
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_reuse_probe_page(mut self, reuse: bool) -> Self {
        self.reuse_probe_page = reuse;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = path.to_string();
        self
    }

    pub fn with_markers(mut self, markers: PageMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_delay > self.max_delay {
            return Err(FloorsheetError::Config(format!(
                "min delay {:?} exceeds max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        if self.end_date < self.start_date {
            return Err(FloorsheetError::Config(format!(
                "end date {} is before start date {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// How requests reach the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Direct,
    /// Route through a FlareSolverr-compatible solving proxy.
    Solver { endpoint: String, max_timeout_ms: u64 },
}

/// Parameters for the production HTTP source.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub transport: Transport,
    pub request_timeout: Duration,
    pub user_agents: Vec<String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_URL.to_string(),
            transport: Transport::Direct,
            request_timeout: Duration::from_secs(60),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:92.0) Gecko/20100101 Firefox/92.0".to_string(),
            ],
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn with_solver(mut self, endpoint: &str) -> Self {
        self.transport = Transport::Solver {
            endpoint: endpoint.to_string(),
            max_timeout_ms: 60_000,
        };
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
