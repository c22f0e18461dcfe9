//! Priority-tiered job queue. One SQL-backed embedded broker implementation
//! ships by default, reusing the Store's SQLite engine; the trait is the
//! seam a Redis- or SQS-backed implementation would plug into later.

pub mod error;
pub mod sql;

use std::time::Duration;

use async_trait::async_trait;
use notify_common::{Job, Priority, QueueName};

pub use error::{QueueError, Result};
pub use sql::SqlQueueBroker;

/// Per-enqueue knobs (§4.2): the caller picks the tier via `QueueName`, and
/// supplies the priority/attempts/backoff budget that governs retries.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// `= transactionId`; ensures at-most-one in-flight job per transaction.
    pub job_id: String,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A job handed back by `poll`, carrying the receipt handle needed to
/// ack/nack it and the delivery count (to detect redelivery after a crash).
#[derive(Debug, Clone)]
pub struct DeliveredJob {
    pub job: Job,
    pub receipt_handle: String,
    pub receive_count: u32,
}

#[async_trait]
pub trait QueueBroker: Send + Sync {
    async fn enqueue(&self, queue: QueueName, job: &Job, opts: EnqueueOptions) -> Result<()>;

    /// Claim up to `max_jobs` visible jobs from `queue`, making them
    /// invisible to other pollers for `visibility_timeout`.
    async fn poll(&self, queue: QueueName, max_jobs: u32, visibility_timeout: Duration) -> Result<Vec<DeliveredJob>>;

    async fn ack(&self, receipt_handle: &str) -> Result<()>;

    /// Release the job back to the queue after `delay`, incrementing its
    /// receive count; used for the retry/backoff policy.
    async fn nack(&self, receipt_handle: &str, delay: Duration) -> Result<()>;

    async fn extend_visibility(&self, receipt_handle: &str, extension: Duration) -> Result<()>;

    async fn stats(&self, queue: QueueName) -> Result<QueueStats>;

    async fn init_schema(&self) -> Result<()>;
}
