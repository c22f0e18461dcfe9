use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid row data: {0}")]
    InvalidRow(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for notify_common::NotifyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => notify_common::NotifyError::NotFound(msg),
            other => notify_common::NotifyError::Store(other.to_string()),
        }
    }
}
