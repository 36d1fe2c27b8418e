#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use floorsheet_datahub::config::Config;
use floorsheet_datahub::models::crawl::CrawlCursor;
use floorsheet_datahub::models::progress::ProgressEntry;
use floorsheet_datahub::models::trade::{FilterSet, TradeRecord};
use floorsheet_datahub::scrapers::base::FloorsheetSource;
use floorsheet_datahub::scrapers::token_store::FormFields;
use floorsheet_datahub::store::{SqliteStore, TradeSink};
use floorsheet_datahub::{FloorsheetError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ROWS_PER_PAGE: u32 = 3;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

/// Zero delays so tests never sleep.
pub fn config(start: NaiveDate, end: NaiveDate) -> Config {
    Config::new()
        .with_date_range(start, end)
        .with_delay_bounds(Duration::ZERO, Duration::ZERO)
        .with_retry_backoff(Duration::ZERO)
        .with_max_retries(Some(5))
}

#[derive(Debug, Clone)]
pub enum Day {
    NoData,
    Pages(u32),
    /// Pager text is rendered verbatim.
    BadPager(&'static str),
    /// One table and no pager at all.
    Unpaged,
    /// Pager reporting zero pages and no table.
    ZeroPages,
    /// Page 1 reports `first` pages, every later page reports `then`.
    Drifting { first: u32, then: u32 },
    /// Pager reports `reported` pages but pages past `available` render the no-data marker.
    Truncated { reported: u32, available: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    MalformedTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initial,
    Page(NaiveDate, u32),
}

/// In-process stand-in for the postback server.
///
/// Issues a new token pair with every response and refuses pairs it did not
/// issue or that were already submitted.
pub struct ScriptedSource {
    days: HashMap<NaiveDate, Day>,
    faults: Mutex<HashMap<(NaiveDate, u32), Vec<Fault>>>,
    cancel_after: Mutex<Option<(NaiveDate, u32, CancellationToken)>>,
    fail_initial: bool,
    calls: Mutex<Vec<Call>>,
    payloads: Mutex<Vec<FormFields>>,
    live_tokens: Mutex<HashSet<String>>,
    next_token: AtomicU32,
    stale_submissions: AtomicU32,
}

impl ScriptedSource {
    pub fn new(days: Vec<(NaiveDate, Day)>) -> Self {
        Self {
            days: days.into_iter().collect(),
            faults: Mutex::new(HashMap::new()),
            cancel_after: Mutex::new(None),
            fail_initial: false,
            calls: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            live_tokens: Mutex::new(HashSet::new()),
            next_token: AtomicU32::new(0),
            stale_submissions: AtomicU32::new(0),
        }
    }

    pub fn failing_initial(mut self) -> Self {
        self.fail_initial = true;
        self
    }

    /// Queue faults served, in order, for requests of `(date, page)`.
    pub fn with_faults(self, date: NaiveDate, page: u32, faults: Vec<Fault>) -> Self {
        self.faults.lock().unwrap().insert((date, page), faults);
        self
    }

    /// Cancel `token` while serving `(date, page)`; the page itself is still served.
    pub fn cancel_after(self, date: NaiveDate, page: u32, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((date, page, token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn page_calls(&self) -> Vec<(NaiveDate, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Page(d, p) => Some((d, p)),
                Call::Initial => None,
            })
            .collect()
    }

    pub fn initial_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Initial).count()
    }

    pub fn payloads(&self) -> Vec<FormFields> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn stale_submissions(&self) -> u32 {
        self.stale_submissions.load(Ordering::SeqCst)
    }

    fn issue_tokens(&self) -> String {
        let n = self.next_token.fetch_add(1, Ordering::SeqCst);
        let view_state = format!("vs-{}", n);
        self.live_tokens.lock().unwrap().insert(view_state.clone());
        format!(
            r#"<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="{}" />
               <input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="ev-{}" />"#,
            view_state, n
        )
    }

    fn render(&self, date: NaiveDate, page: u32, fault: Option<Fault>) -> String {
        let tokens = self.issue_tokens();
        let body = match (self.days.get(&date), fault) {
            (_, Some(Fault::MalformedTable)) => {
                r#"<span id="ctl00_ContentPlaceHolder1_PagerControl1_litRecords">Total pages: 9</span><p>layout changed</p>"#
                    .to_string()
            }
            (None, _) | (Some(Day::NoData), _) => no_data(),
            (Some(Day::BadPager(text)), _) => format!(
                r#"<span id="ctl00_ContentPlaceHolder1_PagerControl1_litRecords">{}</span>{}"#,
                text,
                table(date, page)
            ),
            (Some(Day::Truncated { available, .. }), _) if page > *available => no_data(),
            (Some(Day::Pages(total)), _) | (Some(Day::Truncated { reported: total, .. }), _) => paged(date, page, *total),
            (Some(Day::Drifting { first, then }), _) => paged(date, page, if page == 1 { *first } else { *then }),
            (Some(Day::Unpaged), _) => table(date, page),
            (Some(Day::ZeroPages), _) => {
                r#"<span id="ctl00_ContentPlaceHolder1_PagerControl1_litRecords">Showing 0 - 0 of 0 records [Total pages: 0]</span>"#
                    .to_string()
            }
        };
        format!("<html><body><form>{}{}</form></body></html>", tokens, body)
    }
}

fn no_data() -> String {
    r#"<div id="ctl00_ContentPlaceHolder1_divNoData">No Record Found.</div>
       <span id="ctl00_ContentPlaceHolder1_PagerControl1_litRecords"></span>"#
        .to_string()
}

fn paged(date: NaiveDate, page: u32, total: u32) -> String {
    format!(
        r#"<span id="ctl00_ContentPlaceHolder1_PagerControl1_litRecords">Showing page {} [Total pages: {}]</span>{}"#,
        page,
        total,
        table(date, page)
    )
}

/// Rows numbered continuously across pages, as the source does.
fn table(date: NaiveDate, page: u32) -> String {
    let mut rows = String::new();
    for i in 0..ROWS_PER_PAGE {
        let seq = (page - 1) * ROWS_PER_PAGE + i + 1;
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}{:04}</td><td>NABIL</td><td>58</td><td>34</td><td>1,000</td><td>512.5</td><td>512,500</td></tr>",
            seq,
            date.format("%Y%m%d"),
            seq
        ));
    }
    format!(
        "<table><tr><th>#</th><th>Transact. No.</th><th>Symbol</th><th>Buyer</th><th>Seller</th>\
         <th>Quantity</th><th>Rate</th><th>Amount</th></tr>{}</table>",
        rows
    )
}

#[async_trait]
impl FloorsheetSource for ScriptedSource {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    fn base_form_fields(&self) -> FormFields {
        [("__VIEWSTATE", ""), ("__EVENTVALIDATION", ""), ("page", "1"), ("date", ""), ("symbol", "")]
            .into_iter()
            .collect()
    }

    fn form_overrides(&self, cursor: &CrawlCursor, filters: &FilterSet) -> Vec<(&'static str, String)> {
        let mut overrides = vec![
            ("page", cursor.page_index.to_string()),
            ("date", cursor.target_date.format("%m/%d/%Y").to_string()),
        ];
        if !filters.symbol.is_empty() {
            overrides.push(("symbol", filters.symbol.clone()));
        }
        overrides
    }

    async fn fetch_initial(&self) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Initial);
        if self.fail_initial {
            return Err(FloorsheetError::SessionBootstrap("503 Service Unavailable".to_string()));
        }
        Ok(format!("<html><body><form>{}</form></body></html>", self.issue_tokens()))
    }

    async fn fetch_page(&self, cursor: &CrawlCursor, payload: &FormFields) -> Result<String> {
        let page: u32 = payload.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
        let date = cursor.target_date;
        self.calls.lock().unwrap().push(Call::Page(date, page));
        self.payloads.lock().unwrap().push(payload.clone());

        let view_state = payload.get("__VIEWSTATE").unwrap_or_default().to_string();
        if !self.live_tokens.lock().unwrap().remove(&view_state) {
            self.stale_submissions.fetch_add(1, Ordering::SeqCst);
            return Err(FloorsheetError::Transport(format!("stale view state '{}'", view_state)));
        }

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&(date, page))
            .and_then(|queue| if queue.is_empty() { None } else { Some(queue.remove(0)) });
        if fault == Some(Fault::Transport) {
            return Err(FloorsheetError::Transport("connection reset by peer".to_string()));
        }

        if let Some((d, p, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *d == date && *p == page {
                token.cancel();
            }
        }

        Ok(self.render(date, page, fault))
    }
}

/// SQLite store whose next `persist` calls fail.
pub struct FlakySink {
    pub inner: SqliteStore,
    failures_left: AtomicU32,
}

impl FlakySink {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

impl TradeSink for FlakySink {
    fn persist(&self, records: &[TradeRecord]) -> Result<usize> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(FloorsheetError::StoreWrite("database is locked".to_string()));
        }
        self.inner.persist(records)
    }

    fn append_progress(&self, entry: &ProgressEntry) -> Result<()> {
        self.inner.append_progress(entry)
    }

    fn latest_progress(&self, date: NaiveDate, filter_key: &str) -> Result<Option<ProgressEntry>> {
        self.inner.latest_progress(date, filter_key)
    }
}
