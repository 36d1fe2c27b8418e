pub mod sqlite;

use chrono::NaiveDate;

use crate::errors::Result;
use crate::models::progress::ProgressEntry;
use crate::models::trade::TradeRecord;

pub use sqlite::SqliteStore;

/// Durable destination for extracted rows and the progress log.
///
/// `persist` is all-or-nothing per call and upserts on the
/// `(trade_date, contract_id, row_sequence_in_page)` key, so writing a batch
/// twice leaves the store as if it had been written once.
pub trait TradeSink {
    /// Returns the number of rows written.
    fn persist(&self, records: &[TradeRecord]) -> Result<usize>;

    fn append_progress(&self, entry: &ProgressEntry) -> Result<()>;

    /// Most recent progress entry for a date under the given filter key.
    fn latest_progress(&self, date: NaiveDate, filter_key: &str) -> Result<Option<ProgressEntry>>;
}
