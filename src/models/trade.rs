use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// One contract row of a floorsheet page.
///
/// The page itself carries no date, so `trade_date` comes from the cursor
/// that fetched it. `(trade_date, contract_id, row_sequence_in_page)` is the
/// dedupe key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRecord {
    pub row_sequence_in_page: u32,
    pub contract_id: String,
    pub symbol: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub quantity: i64,
    pub rate: Decimal,
    pub amount: Decimal,
    pub trade_date: NaiveDate,
}

impl TradeRecord {
    pub fn dedupe_key(&self) -> (NaiveDate, &str, u32) {
        (self.trade_date, &self.contract_id, self.row_sequence_in_page)
    }
}

/// Optional company/broker filters. An empty string means unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub symbol: String,
    pub buyer: String,
    pub seller: String,
}

impl FilterSet {
    pub fn new(symbol: &str, buyer: &str, seller: &str) -> Self {
        Self {
            symbol: symbol.trim().to_string(),
            buyer: buyer.trim().to_string(),
            seller: seller.trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty() && self.buyer.is_empty() && self.seller.is_empty()
    }

    /// Canonical text used to key progress entries, empty when unfiltered.
    pub fn filter_key(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("symbol={};buyer={};seller={}", self.symbol, self.buyer, self.seller)
    }
}
