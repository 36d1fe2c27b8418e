use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::errors::{FloorsheetError, Result};
use crate::models::progress::ProgressEntry;
use crate::models::trade::TradeRecord;
use crate::store::TradeSink;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS floorsheet (
    trade_date   TEXT    NOT NULL,
    contract_id  TEXT    NOT NULL,
    row_sequence INTEGER NOT NULL,
    symbol       TEXT    NOT NULL,
    buyer_id     TEXT    NOT NULL,
    seller_id    TEXT    NOT NULL,
    quantity     INTEGER NOT NULL,
    rate         TEXT    NOT NULL,
    amount       TEXT    NOT NULL,
    PRIMARY KEY (trade_date, contract_id, row_sequence)
);

CREATE TABLE IF NOT EXISTS crawl_progress (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_date      TEXT    NOT NULL,
    filter_key      TEXT    NOT NULL DEFAULT '',
    pages_completed INTEGER NOT NULL,
    pages_total     INTEGER NOT NULL,
    status          TEXT    NOT NULL,
    recorded_at     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_progress_date ON crawl_progress (trade_date, filter_key);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed floorsheet store. One writer per database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening floorsheet database {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FloorsheetError::StoreWrite("database mutex poisoned".to_string()))
    }

    pub fn count_trades(&self, date: NaiveDate) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM floorsheet WHERE trade_date = ?1",
            params![date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rows for a date in page order.
    pub fn trades_for_date(&self, date: NaiveDate) -> Result<Vec<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT trade_date, contract_id, row_sequence, symbol, buyer_id, seller_id, quantity, rate, amount
             FROM floorsheet WHERE trade_date = ?1 ORDER BY row_sequence, contract_id",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], raw_trade)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Whole progress log, oldest first.
    pub fn progress_log(&self) -> Result<Vec<ProgressEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT trade_date, filter_key, pages_completed, pages_total, status, recorded_at
             FROM crawl_progress ORDER BY id",
        )?;
        let rows = stmt.query_map([], raw_progress)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    /// Latest date recorded complete for the given filter key.
    pub fn latest_complete_date(&self, filter_key: &str) -> Result<Option<NaiveDate>> {
        let conn = self.lock()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(trade_date) FROM crawl_progress WHERE status = 'complete' AND filter_key = ?1",
            params![filter_key],
            |row| row.get(0),
        )?;
        latest.map(|d| parse_stored_date(&d)).transpose()
    }
}

impl TradeSink for SqliteStore {
    fn persist(&self, records: &[TradeRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO floorsheet
                 (trade_date, contract_id, row_sequence, symbol, buyer_id, seller_id, quantity, rate, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.trade_date.format(DATE_FORMAT).to_string(),
                    record.contract_id,
                    record.row_sequence_in_page,
                    record.symbol,
                    record.buyer_id,
                    record.seller_id,
                    record.quantity,
                    record.rate.to_string(),
                    record.amount.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Persisted {} rows", records.len());
        Ok(records.len())
    }

    fn append_progress(&self, entry: &ProgressEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO crawl_progress (trade_date, filter_key, pages_completed, pages_total, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.trade_date.format(DATE_FORMAT).to_string(),
                entry.filter_key,
                entry.pages_completed,
                entry.pages_total,
                entry.status.as_str(),
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn latest_progress(&self, date: NaiveDate, filter_key: &str) -> Result<Option<ProgressEntry>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT trade_date, filter_key, pages_completed, pages_total, status, recorded_at
                 FROM crawl_progress WHERE trade_date = ?1 AND filter_key = ?2
                 ORDER BY id DESC LIMIT 1",
                params![date.format(DATE_FORMAT).to_string(), filter_key],
                raw_progress,
            )
            .optional()?;
        raw.map(RawProgress::into_entry).transpose()
    }
}

// 先按文本读出，再统一转换
struct RawTrade {
    trade_date: String,
    contract_id: String,
    row_sequence: u32,
    symbol: String,
    buyer_id: String,
    seller_id: String,
    quantity: i64,
    rate: String,
    amount: String,
}

impl RawTrade {
    fn into_record(self) -> Result<TradeRecord> {
        Ok(TradeRecord {
            row_sequence_in_page: self.row_sequence,
            contract_id: self.contract_id,
            symbol: self.symbol,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            quantity: self.quantity,
            rate: parse_stored_decimal(&self.rate)?,
            amount: parse_stored_decimal(&self.amount)?,
            trade_date: parse_stored_date(&self.trade_date)?,
        })
    }
}

fn raw_trade(row: &Row<'_>) -> rusqlite::Result<RawTrade> {
    Ok(RawTrade {
        trade_date: row.get(0)?,
        contract_id: row.get(1)?,
        row_sequence: row.get(2)?,
        symbol: row.get(3)?,
        buyer_id: row.get(4)?,
        seller_id: row.get(5)?,
        quantity: row.get(6)?,
        rate: row.get(7)?,
        amount: row.get(8)?,
    })
}

struct RawProgress {
    trade_date: String,
    filter_key: String,
    pages_completed: u32,
    pages_total: u32,
    status: String,
    recorded_at: String,
}

impl RawProgress {
    fn into_entry(self) -> Result<ProgressEntry> {
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|e| FloorsheetError::StoreWrite(format!("bad recorded_at '{}': {}", self.recorded_at, e)))?
            .with_timezone(&Utc);
        Ok(ProgressEntry {
            trade_date: parse_stored_date(&self.trade_date)?,
            filter_key: self.filter_key,
            pages_completed: self.pages_completed,
            pages_total: self.pages_total,
            status: self.status.parse()?,
            recorded_at,
        })
    }
}

fn raw_progress(row: &Row<'_>) -> rusqlite::Result<RawProgress> {
    Ok(RawProgress {
        trade_date: row.get(0)?,
        filter_key: row.get(1)?,
        pages_completed: row.get(2)?,
        pages_total: row.get(3)?,
        status: row.get(4)?,
        recorded_at: row.get(5)?,
    })
}

fn parse_stored_date(text: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(text, DATE_FORMAT)?)
}

fn parse_stored_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| FloorsheetError::StoreWrite(format!("bad decimal '{}': {}", text, e)))
}
