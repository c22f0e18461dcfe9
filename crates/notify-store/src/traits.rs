//! Store interfaces. Mirrors the shape of the outbox repository trait this
//! codebase already uses (dynamic-table-name SQL, atomic status-transition
//! methods, recoverable/stuck queries) but closed over the `Transaction`
//! entity instead of a generic outbox item.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_common::{ErrorLog, Preferences, PreferencesUpdate, Transaction, TransactionStatus};
use uuid::Uuid;

use crate::error::Result;

/// Durable record of `Transaction`/`ErrorLog`. Transactions are created once
/// by the Dispatcher and mutated exclusively by the Worker thereafter.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, tx: &Transaction) -> Result<()>;

    async fn get(&self, transaction_id: Uuid) -> Result<Transaction>;

    /// Atomically move to `status`, stamping `updated_at` and the status-
    /// specific timestamp (`sent_at`/`failed_at`) and `failure_reason` as
    /// applicable. Callers that also need to bump `retry_count` use
    /// `record_retry` instead.
    async fn update_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        failure_reason: Option<String>,
    ) -> Result<()>;

    /// Transition to `SENT`: stamps `sentAt`, clears `failureReason`, and
    /// merges `providerResponse` (when given) into `metadata` under that
    /// key, per the Worker's success path (§4.5 step 4).
    async fn record_success(&self, transaction_id: Uuid, provider_response: Option<String>) -> Result<()>;

    /// Atomically increments `retry_count`, sets `status = RETRY` and
    /// `failure_reason`, and stamps `updated_at`.
    async fn record_retry(&self, transaction_id: Uuid, failure_reason: &str) -> Result<()>;

    async fn append_error_log(&self, entry: &ErrorLog) -> Result<()>;

    /// Error logs for a transaction, newest first.
    async fn list_error_logs(&self, transaction_id: Uuid) -> Result<Vec<ErrorLog>>;

    /// Transactions whose `status` is a non-terminal value and whose
    /// `updated_at` is older than `cutoff` — stuck after a worker crash,
    /// used by the recovery reaper.
    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Transaction>>;

    /// Search/listing for the admin read endpoints (§6): filter by user and
    /// or status, newest first, bounded by `limit`.
    async fn search(
        &self,
        user_id: Option<&str>,
        status: Option<TransactionStatus>,
        limit: u32,
    ) -> Result<Vec<Transaction>>;

    async fn init_schema(&self) -> Result<()>;
}

/// `userId -> Preferences` with lazy default creation (§4.1).
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Preferences>;

    async fn update(&self, user_id: &str, partial: PreferencesUpdate) -> Result<Preferences>;

    async fn init_schema(&self) -> Result<()>;
}
