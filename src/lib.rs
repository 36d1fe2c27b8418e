// 公开导出的模块，供外部使用
pub mod models;
pub mod errors;
pub mod store;
pub mod services;

// 主程序与脚本使用的内部模块
#[doc(hidden)]
pub mod scrapers;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use models::trade::{TradeRecord, FilterSet};
pub use models::progress::{CrawlSummary, DateStatus, ProgressEntry};
pub use services::crawl_service::CrawlService;
pub use store::{SqliteStore, TradeSink};
pub use errors::{Result, FloorsheetError};
