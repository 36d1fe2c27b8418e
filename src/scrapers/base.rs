use crate::errors::Result;
use crate::models::crawl::CrawlCursor;
use crate::models::trade::FilterSet;
use crate::scrapers::token_store::FormFields;
use async_trait::async_trait;

/// A postback-driven floorsheet page source.
///
/// Implementations only exchange pages and label failures. Retry policy,
/// pacing and token bookkeeping belong to the crawl controller.
#[async_trait]
pub trait FloorsheetSource {
    /// Short name used in logs
    fn source_name(&self) -> &'static str;

    /// Field set echoed on every postback before tokens are known.
    fn base_form_fields(&self) -> FormFields;

    /// Fields that vary per request: page, date filter and any non-empty filters.
    fn form_overrides(&self, cursor: &CrawlCursor, filters: &FilterSet) -> Vec<(&'static str, String)>;

    /// Session-establishing exchange. Any failure is `SessionBootstrap`.
    async fn fetch_initial(&self) -> Result<String>;

    /// Paginated exchange. Network and status failures are `Transport`.
    async fn fetch_page(&self, cursor: &CrawlCursor, payload: &FormFields) -> Result<String>;
}
