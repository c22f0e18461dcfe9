use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("job not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl From<QueueError> for notify_common::NotifyError {
    fn from(e: QueueError) -> Self {
        notify_common::NotifyError::Queue(e.to_string())
    }
}
