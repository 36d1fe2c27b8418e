pub mod trade;
pub mod crawl;
pub mod progress;
