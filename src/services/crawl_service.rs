use crate::config::Config;
use crate::errors::{FloorsheetError, Result};
use crate::models::crawl::{CrawlCursor, CrawlState, FetchOutcome};
use crate::models::progress::{CrawlSummary, DateStatus, ProgressEntry};
use crate::scrapers::base::FloorsheetSource;
use crate::scrapers::classifier::{classify, PageClass};
use crate::scrapers::extractor;
use crate::scrapers::token_store::TokenStore;
use crate::store::TradeSink;
use crate::util::{date_range, random_delay};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one page-level step after fetch, classification and (optionally) persistence.
#[derive(Debug)]
enum StepResult {
    NoData,
    Page {
        total_pages: Option<u32>,
        persisted: usize,
    },
}

/// 爬取控制器：按日期、按页推进，处理重试、节奏与进度记录
pub struct CrawlService {
    config: Config,
    source: Arc<dyn FloorsheetSource + Send + Sync>,
    sink: Arc<dyn TradeSink + Send + Sync>,
    tokens: TokenStore,
    cancel: CancellationToken,
    state: CrawlState,
    summary: CrawlSummary,
    requests_sent: u64,
    session_established: bool,
}

impl CrawlService {
    pub fn new(
        config: Config,
        source: Arc<dyn FloorsheetSource + Send + Sync>,
        sink: Arc<dyn TradeSink + Send + Sync>,
    ) -> Self {
        let tokens = TokenStore::new(source.base_form_fields());
        Self {
            config,
            source,
            sink,
            tokens,
            cancel: CancellationToken::new(),
            state: CrawlState::Idle,
            summary: CrawlSummary::default(),
            requests_sent: 0,
            session_established: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle an operator can use to stop the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Crawl every date in `[start_date, end_date)`.
    ///
    /// Fatal errors are returned after the date in progress has been recorded
    /// as failed. A cancelled run returns its summary with `cancelled` set.
    pub async fn run(&mut self) -> Result<CrawlSummary> {
        self.config.validate()?;
        self.summary = CrawlSummary::default();
        let filter_key = self.config.filters.filter_key();

        let dates: Vec<NaiveDate> = date_range(self.config.start_date, self.config.end_date).collect();
        if dates.is_empty() {
            info!(
                "Empty date range [{}, {}), nothing to crawl",
                self.config.start_date, self.config.end_date
            );
            return Ok(self.summary.clone());
        }

        info!(
            "Crawling {} date(s) from {} via {}{}",
            dates.len(),
            self.config.start_date,
            self.source.source_name(),
            if filter_key.is_empty() { String::new() } else { format!(" with filters {}", filter_key) }
        );

        for date in dates {
            let Some(resume_from) = self.resume_point(date, &filter_key)? else {
                self.summary.dates_already_done += 1;
                continue;
            };

            match self.crawl_date(date, resume_from, &filter_key).await {
                Ok(()) => {}
                Err(FloorsheetError::Cancelled) => {
                    warn!("Crawl cancelled during {}", date);
                    self.summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!("Crawl aborted on {}: {}", date, e);
                    self.transition(CrawlState::Idle, date);
                    return Err(e);
                }
            }
        }

        self.state = CrawlState::Idle;
        info!(
            "Crawl finished: {} complete, {} skipped, {} already done, {} pages, {} rows, {} retries",
            self.summary.dates_completed,
            self.summary.dates_skipped,
            self.summary.dates_already_done,
            self.summary.pages_fetched,
            self.summary.records_persisted,
            self.summary.retries
        );
        Ok(self.summary.clone())
    }

    /// First page to persist for `date`, or `None` when the progress log says it is done.
    fn resume_point(&self, date: NaiveDate, filter_key: &str) -> Result<Option<u32>> {
        if !self.config.resume {
            return Ok(Some(1));
        }
        match self.sink.latest_progress(date, filter_key)? {
            Some(entry) if entry.status.is_final() => {
                info!("Skipping {}: already recorded {}", date, entry.status);
                Ok(None)
            }
            Some(entry) if entry.pages_completed > 0 => {
                info!(
                    "Resuming {} at page {} ({} was {})",
                    date,
                    entry.pages_completed + 1,
                    entry.pages_completed,
                    entry.status
                );
                Ok(Some(entry.pages_completed + 1))
            }
            _ => Ok(Some(1)),
        }
    }

    async fn crawl_date(&mut self, date: NaiveDate, resume_from: u32, filter_key: &str) -> Result<()> {
        self.transition(CrawlState::ProbingDate, date);
        let mut cursor = CrawlCursor::probe(date);
        let mut pages_completed = resume_from.saturating_sub(1);

        // 探测页即第 1 页，可直接入库
        let persist_probe = self.config.reuse_probe_page && resume_from <= 1;
        let probe = match self.run_step(&cursor, persist_probe).await {
            Ok(step) => step,
            Err(e) => return Err(self.abort_date(&cursor, filter_key, pages_completed, e)),
        };

        // 分页显示 0 页时分类器同样返回 NoData，不会走到表格解析
        let (total_pages, probe_rows) = match probe {
            StepResult::NoData => return self.skip_date(date, filter_key).await,
            StepResult::Page { total_pages, persisted } => (total_pages.unwrap_or(1), persisted),
        };

        let mut start_page = resume_from.max(1);
        if persist_probe {
            pages_completed = 1;
            start_page = 2;
            self.summary.records_persisted += probe_rows;
            info!("Saved page 1/{} of {} ({} rows)", total_pages, date, probe_rows);
        }

        if cursor.begin_paging(total_pages, start_page) {
            self.transition(CrawlState::PagingDate, date);
        }

        while cursor.has_more() {
            match self.run_step(&cursor, true).await {
                Ok(StepResult::Page { total_pages, persisted }) => {
                    pages_completed = cursor.page_index;
                    self.summary.records_persisted += persisted;
                    info!(
                        "Saved page {}/{} of {} ({} rows)",
                        cursor.page_index, cursor.last_known_page_count, date, persisted
                    );
                    if let Some(reported) = total_pages {
                        if reported != cursor.last_known_page_count {
                            warn!(
                                "{} now reports {} pages (was {})",
                                date, reported, cursor.last_known_page_count
                            );
                            cursor.last_known_page_count = reported;
                        }
                    }
                    cursor.advance();
                }
                Ok(StepResult::NoData) => {
                    warn!(
                        "{} page {} carries the no-data marker, ending the date after {} pages",
                        date, cursor.page_index, pages_completed
                    );
                    cursor.last_known_page_count = pages_completed;
                    break;
                }
                Err(e) => return Err(self.abort_date(&cursor, filter_key, pages_completed, e)),
            }
        }

        self.transition(CrawlState::DateComplete, date);
        self.record_progress(ProgressEntry::new(
            date,
            filter_key,
            pages_completed,
            cursor.last_known_page_count.max(pages_completed),
            DateStatus::Complete,
        ))
        .await?;
        self.summary.dates_completed += 1;
        Ok(())
    }

    async fn skip_date(&mut self, date: NaiveDate, filter_key: &str) -> Result<()> {
        info!("No floorsheet data for {}, skipping", date);
        self.transition(CrawlState::DateSkipped, date);
        self.record_progress(ProgressEntry::new(date, filter_key, 0, 0, DateStatus::Skipped))
            .await?;
        self.summary.dates_skipped += 1;
        Ok(())
    }

    /// Record how far the date got before `err`, then hand the error back.
    fn abort_date(
        &mut self,
        cursor: &CrawlCursor,
        filter_key: &str,
        pages_completed: u32,
        err: FloorsheetError,
    ) -> FloorsheetError {
        let status = if matches!(err, FloorsheetError::Cancelled) {
            DateStatus::Interrupted
        } else {
            DateStatus::Failed
        };
        let entry = ProgressEntry::new(
            cursor.target_date,
            filter_key,
            pages_completed,
            cursor.last_known_page_count,
            status,
        );
        if let Err(log_err) = self.sink.append_progress(&entry) {
            error!("Could not record {} progress for {}: {}", status, cursor.target_date, log_err);
        } else {
            info!(
                "Recorded {} for {} after {} page(s)",
                status, cursor.target_date, pages_completed
            );
        }
        err
    }

    /// Fetch, classify and optionally persist one page, retrying transient failures.
    async fn run_step(&mut self, cursor: &CrawlCursor, persist: bool) -> Result<StepResult> {
        let mut attempts: u32 = 0;
        loop {
            self.check_cancelled()?;
            match self.attempt(cursor, persist).await {
                Ok(step) => return Ok(step),
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    self.summary.retries += 1;
                    if self.retries_exhausted(attempts) {
                        return Err(FloorsheetError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    warn!(
                        "{} failed: {}; retry {} in {:?}",
                        cursor, e, attempts, self.config.retry_backoff
                    );
                    self.sleep_cancellable(self.config.retry_backoff).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&mut self, cursor: &CrawlCursor, persist: bool) -> Result<StepResult> {
        match self.fetch(cursor).await {
            FetchOutcome::NoDataForDate => Ok(StepResult::NoData),
            FetchOutcome::Success { html, total_pages } => {
                let persisted = if persist {
                    let records = extractor::extract(&html, cursor.target_date)?;
                    self.sink.persist(&records)?
                } else {
                    debug!("Discarding probe page for {}", cursor.target_date);
                    0
                };
                Ok(StepResult::Page { total_pages, persisted })
            }
            FetchOutcome::TransientFailure(e) | FetchOutcome::FatalFailure(e) => Err(e),
        }
    }

    async fn fetch(&mut self, cursor: &CrawlCursor) -> FetchOutcome {
        let html = match self.exchange(cursor).await {
            Ok(html) => html,
            Err(e) => return FetchOutcome::from_error(e),
        };
        match classify(&html, &self.config.markers) {
            Ok(PageClass::NoData) => FetchOutcome::NoDataForDate,
            Ok(PageClass::Data { total_pages }) => FetchOutcome::Success { html, total_pages },
            Err(e) => FetchOutcome::from_error(e),
        }
    }

    /// One postback. Spends the current token pair and installs the pair from the response.
    async fn exchange(&mut self, cursor: &CrawlCursor) -> Result<String> {
        if !self.tokens.is_fresh() {
            self.establish_session().await?;
        }

        self.pace().await?;
        self.check_cancelled()?;

        let overrides = self.source.form_overrides(cursor, &self.config.filters);
        let payload = self.tokens.current_form_payload(&overrides)?;
        self.tokens.mark_consumed();

        let html = self.source.fetch_page(cursor, &payload).await?;
        self.summary.pages_fetched += 1;
        self.tokens.refresh(&html)?;
        Ok(html)
    }

    async fn establish_session(&mut self) -> Result<()> {
        self.pace().await?;
        self.check_cancelled()?;

        if self.session_established {
            info!("Re-establishing session with {}", self.source.source_name());
        } else {
            info!("Establishing session with {}", self.source.source_name());
        }

        let html = match self.source.fetch_initial().await {
            Ok(html) => html,
            // 首次建立会话失败是致命的；之后的重建按可重试处理
            Err(FloorsheetError::SessionBootstrap(msg)) if self.session_established => {
                return Err(FloorsheetError::Transport(msg));
            }
            Err(e) => return Err(e),
        };
        self.tokens.initialize(&html)?;
        self.session_established = true;
        Ok(())
    }

    /// Randomized delay before every request except the first of the run.
    async fn pace(&mut self) -> Result<()> {
        if self.requests_sent > 0 {
            let delay = random_delay(self.config.min_delay, self.config.max_delay);
            debug!("Pacing for {:?}", delay);
            self.sleep_cancellable(delay).await?;
        }
        self.requests_sent += 1;
        Ok(())
    }

    async fn record_progress(&mut self, entry: ProgressEntry) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            match self.sink.append_progress(&entry) {
                Ok(()) => {
                    debug!(
                        "Progress: {} {} ({}/{})",
                        entry.trade_date, entry.status, entry.pages_completed, entry.pages_total
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    self.summary.retries += 1;
                    if self.retries_exhausted(attempts) {
                        return Err(FloorsheetError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    warn!(
                        "Progress write for {} failed: {}; retry {} in {:?}",
                        entry.trade_date, e, attempts, self.config.retry_backoff
                    );
                    self.sleep_cancellable(self.config.retry_backoff).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn retries_exhausted(&self, attempts: u32) -> bool {
        self.config.max_retries.map_or(false, |max| attempts >= max)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FloorsheetError::Cancelled);
        }
        Ok(())
    }

    async fn sleep_cancellable(&self, duration: Duration) -> Result<()> {
        self.check_cancelled()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FloorsheetError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn transition(&mut self, next: CrawlState, date: NaiveDate) {
        if self.state != next {
            debug!("{}: {:?} -> {:?}", date, self.state, next);
        }
        self.state = next;
    }
}
