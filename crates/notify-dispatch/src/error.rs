use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] notify_store::StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] notify_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

impl From<DispatchError> for notify_common::NotifyError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Validation(msg) => notify_common::NotifyError::Validation(msg),
            DispatchError::Store(e) => e.into(),
            DispatchError::Queue(e) => e.into(),
        }
    }
}
