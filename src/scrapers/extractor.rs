use chrono::NaiveDate;
use log::debug;
use scraper::{ElementRef, Html, Selector};

use crate::errors::{FloorsheetError, Result};
use crate::models::trade::TradeRecord;
use crate::util::{normalize_whitespace, parse_decimal_cell, parse_integer_cell};

/// Canonical fields, in the order the header map is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Sequence,
    ContractId,
    Symbol,
    Buyer,
    Seller,
    Quantity,
    Rate,
    Amount,
}

const COLUMN_HEADERS: [(&str, Column); 8] = [
    ("#", Column::Sequence),
    ("Transact. No.", Column::ContractId),
    ("Symbol", Column::Symbol),
    ("Buyer", Column::Buyer),
    ("Seller", Column::Seller),
    ("Quantity", Column::Quantity),
    ("Rate", Column::Rate),
    ("Amount", Column::Amount),
];

/// Cell positions of every canonical column within one table.
struct HeaderMap([usize; 8]);

impl HeaderMap {
    fn from_headers(headers: &[String]) -> Option<Self> {
        let mut positions = [0usize; 8];
        for (slot, (label, _)) in COLUMN_HEADERS.iter().enumerate() {
            positions[slot] = headers.iter().position(|h| h.eq_ignore_ascii_case(label))?;
        }
        Some(Self(positions))
    }

    fn cell<'a>(&self, cells: &'a [String], column: Column) -> &'a str {
        let slot = COLUMN_HEADERS
            .iter()
            .position(|(_, c)| *c == column)
            .unwrap_or_default();
        cells.get(self.0[slot]).map(String::as_str).unwrap_or_default()
    }

    fn width(&self) -> usize {
        self.0.iter().copied().max().unwrap_or_default() + 1
    }
}

/// Turn the floorsheet table on `html` into records dated `trade_date`.
///
/// A page without a table carrying all expected headers is a layout drift and
/// fails with `MalformedTable`. A matching table with no body rows yields an
/// empty batch.
pub fn extract(html: &str, trade_date: NaiveDate) -> Result<Vec<TradeRecord>> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("valid selector");
    let row_sel = Selector::parse("tr").expect("valid selector");
    let th_sel = Selector::parse("th").expect("valid selector");
    let td_sel = Selector::parse("td").expect("valid selector");

    let mut found = None;
    for table in document.select(&table_sel) {
        let headers: Vec<String> = table.select(&th_sel).map(cell_text).collect();
        if let Some(map) = HeaderMap::from_headers(&headers) {
            found = Some((table, map));
            break;
        }
    }
    let (table, map) = found.ok_or_else(|| {
        FloorsheetError::MalformedTable(format!("no floorsheet table on page for {}", trade_date))
    })?;

    let mut records = Vec::new();
    for (row_no, row) in table.select(&row_sel).enumerate() {
        let cells: Vec<String> = row.select(&td_sel).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        if cells.len() < map.width() {
            return Err(FloorsheetError::MalformedTable(format!(
                "row {} has {} cells, expected at least {}",
                row_no,
                cells.len(),
                map.width()
            )));
        }
        records.push(parse_row(&map, &cells, row_no, trade_date)?);
    }

    debug!("Extracted {} rows for {}", records.len(), trade_date);
    Ok(records)
}

fn parse_row(map: &HeaderMap, cells: &[String], row_no: usize, trade_date: NaiveDate) -> Result<TradeRecord> {
    let malformed = |column: &str, value: &str| {
        FloorsheetError::MalformedTable(format!("row {}: bad {} '{}'", row_no, column, value))
    };

    let seq_text = map.cell(cells, Column::Sequence);
    let row_sequence_in_page = parse_integer_cell(seq_text)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| malformed("#", seq_text))?;

    let contract_id = map.cell(cells, Column::ContractId).to_string();
    if contract_id.is_empty() {
        return Err(malformed("Transact. No.", ""));
    }

    let qty_text = map.cell(cells, Column::Quantity);
    let quantity = parse_integer_cell(qty_text).ok_or_else(|| malformed("Quantity", qty_text))?;
    let rate_text = map.cell(cells, Column::Rate);
    let rate = parse_decimal_cell(rate_text).ok_or_else(|| malformed("Rate", rate_text))?;
    let amount_text = map.cell(cells, Column::Amount);
    let amount = parse_decimal_cell(amount_text).ok_or_else(|| malformed("Amount", amount_text))?;

    Ok(TradeRecord {
        row_sequence_in_page,
        contract_id,
        symbol: map.cell(cells, Column::Symbol).to_string(),
        buyer_id: map.cell(cells, Column::Buyer).to_string(),
        seller_id: map.cell(cells, Column::Seller).to_string(),
        quantity,
        rate,
        amount,
        trade_date,
    })
}

fn cell_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}
