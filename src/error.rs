//! Custom error types for sokman.
//!
//! All library functions return `Result<T, SokError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for sokman operations.
#[derive(Debug, Error)]
pub enum SokError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Unexpected shape of an API response, dump entry or user value
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV listing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// DBLP XML error
    #[error("XML error: {0}")]
    Xml(String),

    /// SQLite error, including constraint violations
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record looked up by key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operator aborted an interactive command
    #[error("Aborted.")]
    Aborted,
}

impl SokError {
    /// True if the error is a SQLite constraint violation (unique, foreign key, check).
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SokError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<quick_xml::Error> for SokError {
    fn from(e: quick_xml::Error) -> Self {
        SokError::Xml(e.to_string())
    }
}

/// Result type alias using `SokError`
pub type Result<T> = std::result::Result<T, SokError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;

    /// Convert Option to Result with a not-found message
    fn ok_or_not_found(self, what: impl FnOnce() -> String) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SokError::Parse(msg.to_string()))
    }

    fn ok_or_not_found(self, what: impl FnOnce() -> String) -> Result<T> {
        self.ok_or_else(|| SokError::NotFound(what()))
    }
}
