use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use crate::config::PageMarkers;
use crate::errors::{FloorsheetError, Result};
use crate::util::normalize_whitespace;

/// What a fetched page says about its date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    NoData,
    /// `total_pages` is `None` when the page renders no pagination marker.
    Data { total_pages: Option<u32> },
}

fn total_pages_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Total pages:\s*([^\s\]\)]*)").expect("valid regex"))
}

/// Labels a page. The no-data marker wins over the pagination marker, since an
/// empty result can still render a degenerate pager. A pager reporting zero
/// pages also means no data; such pages carry no table.
pub fn classify(html: &str, markers: &PageMarkers) -> Result<PageClass> {
    let document = Html::parse_document(html);

    let no_data = parse_selector(&markers.no_data_selector)?;
    if document.select(&no_data).next().is_some() {
        return Ok(PageClass::NoData);
    }

    let pagination = parse_selector(&markers.pagination_selector)?;
    let Some(marker) = document.select(&pagination).next() else {
        return Ok(PageClass::Data { total_pages: None });
    };

    let text = normalize_whitespace(&marker.text().collect::<String>());
    let captured = total_pages_re()
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| FloorsheetError::PageCountUnparsable(format!("no page count in '{}'", text)))?;

    let total_pages = captured
        .parse::<u32>()
        .map_err(|_| FloorsheetError::PageCountUnparsable(format!("'{}' is not a page count", captured)))?;

    if total_pages == 0 {
        return Ok(PageClass::NoData);
    }
    Ok(PageClass::Data {
        total_pages: Some(total_pages),
    })
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FloorsheetError::Config(format!("bad selector '{}': {}", css, e)))
}
