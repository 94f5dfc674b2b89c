use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
