use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecksError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Failed to render message: {0}")]
    Render(String),

    #[error("Invalid alerting rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Query error: {0}")]
    Query(#[from] worldview_query::QueryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChecksError>;
