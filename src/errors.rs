use thiserror::Error;

#[derive(Error, Debug)]
pub enum FloorsheetError {
    #[error("Token extraction error: {0}")]
    TokenExtraction(String),

    #[error("Session bootstrap failed: {0}")]
    SessionBootstrap(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Page count unparsable: {0}")]
    PageCountUnparsable(String),

    #[error("Malformed table: {0}")]
    MalformedTable(String),

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<FloorsheetError>,
    },

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),
}

impl FloorsheetError {
    /// Transient errors are retried by the crawl controller after a backoff;
    /// everything else unwinds to the run boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, FloorsheetError::Transport(_) | FloorsheetError::StoreWrite(_))
    }
}

pub type Result<T> = std::result::Result<T, FloorsheetError>;

// 网络层错误一律视为可重试
impl From<reqwest::Error> for FloorsheetError {
    fn from(e: reqwest::Error) -> Self {
        FloorsheetError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for FloorsheetError {
    fn from(e: rusqlite::Error) -> Self {
        FloorsheetError::StoreWrite(e.to_string())
    }
}
