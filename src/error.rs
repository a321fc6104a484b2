use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("API error: {message}")]
    Api { message: String },
}

impl ScraperError {
    /// True for an upstream denial (HTTP 403), the one status the listings
    /// crawl retries instead of abandoning the category.
    pub fn is_denied(&self) -> bool {
        matches!(self, ScraperError::Status(status) if *status == reqwest::StatusCode::FORBIDDEN)
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
