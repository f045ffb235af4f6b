use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Manual match rejected until the caller resubmits with `force`.
    #[error("Discrepancy: {0}")]
    Discrepancy(String),

    #[error("Duplicate document: {0}")]
    Duplicate(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
