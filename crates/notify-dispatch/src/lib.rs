//! Submission path: resolves channel/priority from user preferences, creates
//! the durable `Transaction`, and enqueues the delivery job. Mirrors the
//! create-then-enqueue shape this codebase's outbox processor uses, with one
//! addition mandated for this service: if the row is created but the enqueue
//! fails, the transaction is rolled forward to `DeadLetter` with a synthetic
//! `ErrorLog` rather than left stranded in `Pending`.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use notify_common::{
    Channel, ErrorKind, ErrorLog, Job, Metadata, NotificationType, Priority, Transaction, TransactionStatus,
};
use notify_providers::Provider;
use notify_queue::{EnqueueOptions, QueueBroker};
use notify_store::{PreferenceStore, TransactionStore};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use error::{DispatchError, Result};

/// Inbound submission DTO (`POST /notifications`, §4.4 / §6).
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: String,
    pub notification_type: NotificationType,
    /// Explicit channel override; falls back to the user's preferred
    /// channels, then to `EMAIL`, when absent.
    pub channel: Option<Channel>,
    pub content: String,
    pub subject: Option<String>,
    pub recipient: String,
    /// Explicit priority override; falls back to the channel's configured
    /// priority, then to `MEDIUM`.
    pub priority: Option<Priority>,
    pub metadata: Metadata,
}

impl SubmitRequest {
    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(DispatchError::Validation("userId must not be empty".into()));
        }
        if self.content.trim().is_empty() {
            return Err(DispatchError::Validation("content must not be empty".into()));
        }
        if self.recipient.trim().is_empty() {
            return Err(DispatchError::Validation("recipient must not be empty".into()));
        }
        Ok(())
    }
}

pub type ProviderRegistry = HashMap<Channel, Arc<dyn Provider>>;

/// Resolves a submission against preferences and hands it to the queue.
/// Holds no retry/delivery logic — that lives in the worker, which owns the
/// job once it is enqueued.
pub struct Dispatcher {
    store: Arc<dyn TransactionStore>,
    preferences: Arc<dyn PreferenceStore>,
    queue: Arc<dyn QueueBroker>,
    providers: ProviderRegistry,
    max_retries: u32,
    bulk_batch_size: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        preferences: Arc<dyn PreferenceStore>,
        queue: Arc<dyn QueueBroker>,
        providers: ProviderRegistry,
        max_retries: u32,
        bulk_batch_size: usize,
    ) -> Self {
        Self { store, preferences, queue, providers, max_retries, bulk_batch_size }
    }

    /// Resolution algorithm (§4.4):
    /// 1. `effChannel` = `req.channel` else the first of `PreferredChannels`
    ///    else `EMAIL`.
    /// 2. `chanPri` = the resolved channel's configured priority.
    /// 3. `effPriority` = `req.priority` else `chanPri` else `MEDIUM`.
    /// 4. Create the `Transaction` as `PENDING`. If the resolved channel's
    ///    provider isn't ready, roll it straight to `DEAD_LETTER` with a
    ///    non-retryable `INVALID_DATA` error log. Otherwise enqueue on the
    ///    priority tier iff `effPriority >= HIGH`, else the regular tier.
    pub async fn submit_notification(&self, req: SubmitRequest) -> Result<Uuid> {
        req.validate()?;

        let prefs = self.preferences.get(&req.user_id).await?;

        let eff_channel = req
            .channel
            .or_else(|| prefs.preferred_channels().first().copied())
            .unwrap_or(Channel::Email);

        let chan_pri = prefs.priority_for(eff_channel);
        let eff_priority = req.priority.unwrap_or(chan_pri);

        let now = Utc::now();
        let transaction_id = Uuid::new_v4();
        let tx = Transaction {
            transaction_id,
            user_id: req.user_id.clone(),
            notification_type: req.notification_type,
            channel: eff_channel,
            status: TransactionStatus::Pending,
            content: req.content,
            subject: req.subject,
            recipient: req.recipient,
            metadata: req.metadata,
            priority: eff_priority,
            retry_count: 0,
            max_retries: self.max_retries,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            failed_at: None,
        };

        self.store.create(&tx).await?;

        if !self.provider_ready(eff_channel) {
            warn!(%transaction_id, %eff_channel, "provider not ready for resolved channel, routing to dead letter");
            self.reject_unready_provider(transaction_id, eff_channel).await;
            return Ok(transaction_id);
        }

        let queue_name = notify_common::QueueName::for_priority(eff_priority);
        let job = Job::from_transaction(&tx);
        let opts = EnqueueOptions { priority: eff_priority, job_id: transaction_id.to_string(), max_attempts: tx.max_retries };

        if let Err(e) = self.queue.enqueue(queue_name, &job, opts).await {
            warn!(%transaction_id, error = %e, "enqueue failed after transaction was created, routing to dead letter");
            self.rollforward_to_dead_letter(transaction_id, &e.to_string()).await;
            return Ok(transaction_id);
        }

        self.store.update_status(transaction_id, TransactionStatus::Queued, None).await?;
        info!(%transaction_id, channel = %eff_channel, priority = ?eff_priority, "notification queued");
        Ok(transaction_id)
    }

    /// Fans a batch of submissions out across bounded concurrency (the
    /// `bulk_batch_size` configured on the service), collecting one result
    /// per input in submission order. A single submission's failure does not
    /// abort the rest of the batch.
    pub async fn bulk_submit(&self, requests: Vec<SubmitRequest>) -> Vec<Result<Uuid>> {
        stream::iter(requests)
            .map(|req| self.submit_notification(req))
            .buffer_unordered(self.bulk_batch_size.max(1))
            .collect::<Vec<_>>()
            .await
    }

    fn provider_ready(&self, channel: Channel) -> bool {
        self.providers.get(&channel).is_some_and(|p| p.ready())
    }

    /// A channel with no configured (or unready) provider can never succeed,
    /// so it is refused straight to `DEAD_LETTER` as non-retryable rather than
    /// ever reaching the worker.
    async fn reject_unready_provider(&self, transaction_id: Uuid, channel: Channel) {
        let entry = ErrorLog {
            id: Uuid::new_v4(),
            transaction_id,
            error_type: ErrorKind::InvalidData,
            error_message: format!("channel {channel} is not ready (provider unconfigured)"),
            error_stack: None,
            error_code: Some("PROVIDER_UNCONFIGURED".to_string()),
            retryable: false,
            provider_response: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_error_log(&entry).await {
            error!(%transaction_id, error = %e, "failed to append synthetic error log for unready provider");
        }
        if let Err(e) = self
            .store
            .update_status(transaction_id, TransactionStatus::DeadLetter, Some(entry.error_message.clone()))
            .await
        {
            error!(%transaction_id, error = %e, "failed to roll transaction forward to dead letter after unready provider rejection");
        }
    }

    /// Mandated fallback for the create-succeeded/enqueue-failed race: the
    /// row must never be left stranded in `PENDING`, so it is moved straight
    /// to `DEAD_LETTER` with a synthetic error log recording the cause.
    async fn rollforward_to_dead_letter(&self, transaction_id: Uuid, reason: &str) {
        let entry = ErrorLog {
            id: Uuid::new_v4(),
            transaction_id,
            error_type: ErrorKind::ProviderError,
            error_message: format!("enqueue failed: {reason}"),
            error_stack: None,
            error_code: Some("ENQUEUE_FAILED".to_string()),
            retryable: false,
            provider_response: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_error_log(&entry).await {
            error!(%transaction_id, error = %e, "failed to append synthetic error log for enqueue failure");
        }
        if let Err(e) = self
            .store
            .update_status(transaction_id, TransactionStatus::DeadLetter, Some(format!("enqueue failed: {reason}")))
            .await
        {
            error!(%transaction_id, error = %e, "failed to roll transaction forward to dead letter after enqueue failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use notify_common::{PreferencesUpdate, ProviderError, ProviderResult};
    use notify_queue::{DeliveredJob, QueueStats};
    use notify_store::StoreError;

    use super::*;

    struct FakeStore {
        transactions: Mutex<HashMap<Uuid, Transaction>>,
        error_logs: Mutex<Vec<ErrorLog>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self { transactions: Mutex::new(HashMap::new()), error_logs: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl TransactionStore for FakeStore {
        async fn create(&self, tx: &Transaction) -> notify_store::Result<()> {
            self.transactions.lock().unwrap().insert(tx.transaction_id, tx.clone());
            Ok(())
        }

        async fn get(&self, transaction_id: Uuid) -> notify_store::Result<Transaction> {
            self.transactions
                .lock()
                .unwrap()
                .get(&transaction_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))
        }

        async fn update_status(
            &self,
            transaction_id: Uuid,
            status: TransactionStatus,
            failure_reason: Option<String>,
        ) -> notify_store::Result<()> {
            let mut txs = self.transactions.lock().unwrap();
            let tx = txs.get_mut(&transaction_id).ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;
            tx.status = status;
            tx.failure_reason = failure_reason;
            Ok(())
        }

        async fn record_success(&self, _transaction_id: Uuid, _provider_response: Option<String>) -> notify_store::Result<()> {
            Ok(())
        }

        async fn record_retry(&self, _transaction_id: Uuid, _failure_reason: &str) -> notify_store::Result<()> {
            Ok(())
        }

        async fn append_error_log(&self, entry: &ErrorLog) -> notify_store::Result<()> {
            self.error_logs.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn list_error_logs(&self, transaction_id: Uuid) -> notify_store::Result<Vec<ErrorLog>> {
            Ok(self.error_logs.lock().unwrap().iter().filter(|e| e.transaction_id == transaction_id).cloned().collect())
        }

        async fn find_stale(&self, _cutoff: DateTime<Utc>, _limit: u32) -> notify_store::Result<Vec<Transaction>> {
            Ok(Vec::new())
        }

        async fn search(
            &self,
            _user_id: Option<&str>,
            _status: Option<TransactionStatus>,
            _limit: u32,
        ) -> notify_store::Result<Vec<Transaction>> {
            Ok(Vec::new())
        }

        async fn init_schema(&self) -> notify_store::Result<()> {
            Ok(())
        }
    }

    struct FakePreferences;

    #[async_trait]
    impl PreferenceStore for FakePreferences {
        async fn get(&self, user_id: &str) -> notify_store::Result<notify_common::Preferences> {
            Ok(notify_common::Preferences::default_for(user_id))
        }

        async fn update(&self, user_id: &str, partial: PreferencesUpdate) -> notify_store::Result<notify_common::Preferences> {
            let mut prefs = notify_common::Preferences::default_for(user_id);
            prefs.apply_update(partial);
            Ok(prefs)
        }

        async fn init_schema(&self) -> notify_store::Result<()> {
            Ok(())
        }
    }

    struct FakeQueue {
        fail: bool,
    }

    #[async_trait]
    impl QueueBroker for FakeQueue {
        async fn enqueue(
            &self,
            _queue: notify_common::QueueName,
            _job: &Job,
            _opts: EnqueueOptions,
        ) -> notify_queue::Result<()> {
            if self.fail {
                Err(notify_queue::QueueError::Database("simulated broker outage".to_string()))
            } else {
                Ok(())
            }
        }

        async fn poll(
            &self,
            _queue: notify_common::QueueName,
            _max_jobs: u32,
            _visibility_timeout: std::time::Duration,
        ) -> notify_queue::Result<Vec<DeliveredJob>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _receipt_handle: &str) -> notify_queue::Result<()> {
            Ok(())
        }

        async fn nack(&self, _receipt_handle: &str, _delay: std::time::Duration) -> notify_queue::Result<()> {
            Ok(())
        }

        async fn extend_visibility(&self, _receipt_handle: &str, _extension: std::time::Duration) -> notify_queue::Result<()> {
            Ok(())
        }

        async fn stats(&self, _queue: notify_common::QueueName) -> notify_queue::Result<QueueStats> {
            Ok(QueueStats::default())
        }

        async fn init_schema(&self) -> notify_queue::Result<()> {
            Ok(())
        }
    }

    struct FakeProvider {
        channel: Channel,
        ready: bool,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            _recipient: &str,
            _subject: Option<&str>,
            _body: &str,
            _metadata: &Metadata,
        ) -> std::result::Result<ProviderResult, ProviderError> {
            unimplemented!("dispatcher never calls send directly")
        }

        fn ready(&self) -> bool {
            self.ready
        }
    }

    fn sample_request() -> SubmitRequest {
        SubmitRequest {
            user_id: "user-1".to_string(),
            notification_type: NotificationType::Transactional,
            channel: None,
            content: "hello".to_string(),
            subject: None,
            recipient: "user@example.com".to_string(),
            priority: None,
            metadata: Metadata::new(),
        }
    }

    fn providers(ready: bool) -> ProviderRegistry {
        let mut map: ProviderRegistry = HashMap::new();
        map.insert(Channel::Email, Arc::new(FakeProvider { channel: Channel::Email, ready }));
        map
    }

    #[tokio::test]
    async fn falls_back_to_email_and_its_configured_priority() {
        let store = Arc::new(FakeStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(FakePreferences),
            Arc::new(FakeQueue { fail: false }),
            providers(true),
            3,
            50,
        );

        let id = dispatcher.submit_notification(sample_request()).await.unwrap();
        let tx = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(tx.channel, Channel::Email);
        assert_eq!(tx.priority, Priority::Low);
        assert_eq!(tx.status, TransactionStatus::Queued);
    }

    #[tokio::test]
    async fn explicit_priority_overrides_channel_default() {
        let store = Arc::new(FakeStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(FakePreferences),
            Arc::new(FakeQueue { fail: false }),
            providers(true),
            3,
            50,
        );

        let mut req = sample_request();
        req.priority = Some(Priority::Urgent);
        let id = dispatcher.submit_notification(req).await.unwrap();
        let tx = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(tx.priority, Priority::Urgent);
    }

    #[tokio::test]
    async fn enqueue_failure_rolls_transaction_forward_to_dead_letter() {
        let store = Arc::new(FakeStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(FakePreferences),
            Arc::new(FakeQueue { fail: true }),
            providers(true),
            3,
            50,
        );

        let id = dispatcher.submit_notification(sample_request()).await.unwrap();
        let tx = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(tx.status, TransactionStatus::DeadLetter);
        assert!(tx.failure_reason.is_some());
        assert_eq!(store.error_logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unready_provider_is_rolled_forward_to_dead_letter() {
        let store = Arc::new(FakeStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(FakePreferences),
            Arc::new(FakeQueue { fail: false }),
            providers(false),
            3,
            50,
        );

        let id = dispatcher.submit_notification(sample_request()).await.unwrap();
        let tx = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(tx.status, TransactionStatus::DeadLetter);
        assert!(tx.failure_reason.is_some());

        let logs = store.error_logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_type, ErrorKind::InvalidData);
        assert!(!logs[0].retryable);
    }

    #[tokio::test]
    async fn bulk_submit_reports_one_result_per_request() {
        let store = Arc::new(FakeStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(FakePreferences),
            Arc::new(FakeQueue { fail: false }),
            providers(true),
            3,
            2,
        );

        let requests = vec![sample_request(), sample_request(), sample_request()];
        let results = dispatcher.bulk_submit(requests).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
