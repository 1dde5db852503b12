use thiserror::Error;

/// Everything that can go wrong inside the bot, collapsed into one enum so
/// handlers and the ledger share a single `?`-friendly error channel.
#[derive(Error, Debug)]
pub enum AppError {
    /// SQLite query or constraint failure
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Could not check a connection out of the pool
    #[error("database pool: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Bot API call failed
    #[error("telegram: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// OpenAI answered with a non-success status or an unusable payload
    #[error("ai service: {0}")]
    Ai(String),

    /// Plain HTTP transport failure (downloads, AI requests)
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("url: {0}")]
    Url(#[from] url::ParseError),

    /// Catch-all for errors bubbling up from the binary boundary
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    /// Input that failed a domain check (bad payload, missing field)
    #[error("validation: {0}")]
    Validation(String),
}

pub type AppResult<T> = Result<T, AppError>;

// String errors from helpers become validation failures so `?` keeps working.
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Validation(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Validation(err.to_string())
    }
}
