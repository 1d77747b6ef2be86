use thiserror::Error;

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Translation service unavailable: {0}")]
    Unavailable(String),

    #[error("LLM translation failed after NMT output {nmt_blob} was written: {reason}")]
    PartialTranslation { nmt_blob: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TandemError {
    /// Whether retrying the same upstream call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TandemError::RateLimited(_) | TandemError::Unavailable(_) => true,
            TandemError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;
