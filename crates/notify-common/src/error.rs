//! Crate-spanning error type. Individual crates define their own narrower
//! `thiserror` enums (`StoreError`, `QueueError`, ...) and convert into this
//! one at the boundaries that need a single type (e.g. the Dispatcher).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
