use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Invalid application id: {0}")]
    InvalidApplicationId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
