//! Execution path: per-queue worker pools that pull jobs, invoke the
//! channel's provider, and drive the `PROCESSING -> SENT | RETRY |
//! DEAD_LETTER` transition. Shaped after this codebase's outbox processor
//! (bounded concurrency via a semaphore rather than its buffer/distributor
//! middle layer, since the `QueueBroker` here already does the claiming that
//! layer existed to coordinate) plus its stale-job recovery pass.

pub mod backoff;
pub mod reaper;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify_common::config::RetryConfig;
use notify_common::{Channel, ErrorLog, Metadata, ProviderError, ProviderResult, QueueName, TransactionStatus};
use notify_providers::Provider;
use notify_queue::{DeliveredJob, QueueBroker};
use notify_store::TransactionStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use reaper::StaleJobReaper;

pub type ProviderRegistry = HashMap<Channel, Arc<dyn Provider>>;

#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    pub queue_name: QueueName,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub retry: RetryConfig,
    pub provider_timeout: Duration,
}

/// One polling task per named queue, feeding a bounded set of in-flight
/// jobs sized to `config.concurrency`. A job pulled from the pool runs to
/// completion (ack, retry-nack, or dead-letter) before the pool accepts
/// another from that slot.
pub struct QueueWorker {
    config: QueueWorkerConfig,
    store: Arc<dyn TransactionStore>,
    broker: Arc<dyn QueueBroker>,
    providers: ProviderRegistry,
    running: Arc<AtomicBool>,
}

impl QueueWorker {
    pub fn new(
        config: QueueWorkerConfig,
        store: Arc<dyn TransactionStore>,
        broker: Arc<dyn QueueBroker>,
        providers: ProviderRegistry,
    ) -> Self {
        Self { config, store, broker, providers, running: Arc::new(AtomicBool::new(true)) }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Spawns the polling loop. The returned handle should be `.abort()`ed
    /// on shutdown; `stop()` alone only stops new polls, it does not cancel
    /// jobs already in flight.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.concurrency));
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        info!(queue = self.config.queue_name.as_str(), concurrency = self.config.concurrency, "worker pool started");

        while self.running.load(Ordering::Relaxed) {
            ticker.tick().await;

            let available = semaphore.available_permits();
            if available == 0 {
                continue;
            }

            let jobs = match self.broker.poll(self.config.queue_name, available as u32, self.config.visibility_timeout).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(queue = self.config.queue_name.as_str(), error = %e, "queue poll failed");
                    continue;
                }
            };

            for delivered in jobs {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let worker = Arc::clone(&self);
                tokio::spawn(async move {
                    worker.process_job(delivered).await;
                    drop(permit);
                });
            }
        }

        info!(queue = self.config.queue_name.as_str(), "worker pool stopped");
    }

    /// Processes exactly one delivered job end-to-end (§4.5).
    async fn process_job(&self, delivered: DeliveredJob) {
        let transaction_id = delivered.job.transaction_id;

        let tx = match self.store.get(transaction_id).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(%transaction_id, error = %e, "could not load transaction for delivered job; acking to drop it");
                let _ = self.broker.ack(&delivered.receipt_handle).await;
                return;
            }
        };

        if tx.status.is_terminal() {
            debug!(%transaction_id, status = %tx.status, "transaction already terminal; acknowledging without work");
            let _ = self.broker.ack(&delivered.receipt_handle).await;
            return;
        }

        if let Err(e) = self.store.update_status(transaction_id, TransactionStatus::Processing, None).await {
            error!(%transaction_id, error = %e, "failed to mark transaction processing");
            return;
        }

        let outcome = match self.providers.get(&tx.channel) {
            Some(provider) => {
                let send = provider.send(&tx.recipient, tx.subject.as_deref(), &tx.content, &tx.metadata);
                match tokio::time::timeout(self.config.provider_timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::new(tx.channel.as_str(), &tx.recipient, "provider call timed out")
                        .with_code("ETIMEDOUT")),
                }
            }
            None => Err(ProviderError::new(tx.channel.as_str(), &tx.recipient, format!("{} provider is not configured", tx.channel))
                .with_code("PROVIDER_UNCONFIGURED")),
        };

        match outcome {
            Ok(result) => self.handle_success(transaction_id, &delivered.receipt_handle, result).await,
            Err(err) => self.handle_failure(&tx_snapshot(&tx), &delivered.receipt_handle, err).await,
        }
    }

    async fn handle_success(&self, transaction_id: Uuid, receipt_handle: &str, result: ProviderResult) {
        if let Err(e) = self.store.record_success(transaction_id, result.raw_response).await {
            error!(%transaction_id, error = %e, "failed to record successful send");
            return;
        }
        if let Err(e) = self.broker.ack(receipt_handle).await {
            warn!(%transaction_id, error = %e, "failed to ack successfully-sent job");
        }
        info!(%transaction_id, "notification sent");
    }

    async fn handle_failure(&self, tx: &TxSnapshot, receipt_handle: &str, provider_error: ProviderError) {
        let (kind, retryable) = notify_classifier::classify(&provider_error);

        let entry = ErrorLog {
            id: Uuid::new_v4(),
            transaction_id: tx.transaction_id,
            error_type: kind,
            error_message: provider_error.message.clone(),
            error_stack: provider_error.cause.clone(),
            error_code: provider_error.error_code.clone(),
            retryable,
            provider_response: None,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.append_error_log(&entry).await {
            error!(transaction_id = %tx.transaction_id, error = %e, "failed to append error log");
        }

        let next_attempt = tx.retry_count + 1;
        let exhausted = next_attempt > tx.max_retries;

        if exhausted || !retryable {
            let reason = provider_error.message.clone();
            if let Err(e) = self.store.update_status(tx.transaction_id, TransactionStatus::DeadLetter, Some(reason)).await {
                error!(transaction_id = %tx.transaction_id, error = %e, "failed to move transaction to dead letter");
            }
            if let Err(e) = self.broker.ack(receipt_handle).await {
                warn!(transaction_id = %tx.transaction_id, error = %e, "failed to ack dead-lettered job");
            }
            warn!(
                transaction_id = %tx.transaction_id,
                error_kind = %kind,
                retryable,
                retry_count = tx.retry_count,
                max_retries = tx.max_retries,
                "transaction moved to dead letter"
            );
            return;
        }

        let reason = provider_error.message.clone();
        if let Err(e) = self.store.record_retry(tx.transaction_id, &reason).await {
            error!(transaction_id = %tx.transaction_id, error = %e, "failed to record retry");
        }

        let delay = backoff::delay_for_attempt(&self.config.retry, next_attempt);
        if let Err(e) = self.broker.nack(receipt_handle, delay).await {
            error!(transaction_id = %tx.transaction_id, error = %e, "failed to nack retryable job");
        }
        debug!(transaction_id = %tx.transaction_id, delay_secs = delay.as_secs(), error_kind = %kind, "scheduled retry");
    }
}

/// Just the fields `handle_failure` needs, captured before the async
/// provider call so a slow call can't read a concurrently-mutated status.
struct TxSnapshot {
    transaction_id: Uuid,
    retry_count: u32,
    max_retries: u32,
}

fn tx_snapshot(tx: &notify_common::Transaction) -> TxSnapshot {
    TxSnapshot { transaction_id: tx.transaction_id, retry_count: tx.retry_count, max_retries: tx.max_retries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use notify_common::{Job, NotificationType, Priority, Transaction};
    use notify_queue::{EnqueueOptions, QueueStats};
    use notify_store::PreferenceStore;
    use std::sync::Mutex;

    struct FakeStore {
        transactions: Mutex<HashMap<Uuid, Transaction>>,
        error_logs: Mutex<Vec<ErrorLog>>,
    }

    impl FakeStore {
        fn with_tx(tx: Transaction) -> Self {
            let mut map = HashMap::new();
            map.insert(tx.transaction_id, tx);
            Self { transactions: Mutex::new(map), error_logs: Mutex::new(Vec::new()) }
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
                .ok_or_else(|| notify_store::StoreError::NotFound(transaction_id.to_string()))
        }

        async fn update_status(
            &self,
            transaction_id: Uuid,
            status: TransactionStatus,
            failure_reason: Option<String>,
        ) -> notify_store::Result<()> {
            let mut txs = self.transactions.lock().unwrap();
            let tx = txs.get_mut(&transaction_id).unwrap();
            tx.status = status;
            tx.failure_reason = failure_reason;
            Ok(())
        }

        async fn record_success(&self, transaction_id: Uuid, provider_response: Option<String>) -> notify_store::Result<()> {
            let mut txs = self.transactions.lock().unwrap();
            let tx = txs.get_mut(&transaction_id).unwrap();
            tx.status = TransactionStatus::Sent;
            tx.sent_at = Some(Utc::now());
            if let Some(resp) = provider_response {
                tx.metadata.insert("providerResponse".to_string(), serde_json::Value::String(resp));
            }
            Ok(())
        }

        async fn record_retry(&self, transaction_id: Uuid, failure_reason: &str) -> notify_store::Result<()> {
            let mut txs = self.transactions.lock().unwrap();
            let tx = txs.get_mut(&transaction_id).unwrap();
            tx.retry_count += 1;
            tx.status = TransactionStatus::Retry;
            tx.failure_reason = Some(failure_reason.to_string());
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

    struct FakeQueue {
        acked: Mutex<Vec<String>>,
        nacked: Mutex<Vec<(String, Duration)>>,
    }

    impl FakeQueue {
        fn new() -> Self {
            Self { acked: Mutex::new(Vec::new()), nacked: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl QueueBroker for FakeQueue {
        async fn enqueue(&self, _queue: QueueName, _job: &Job, _opts: EnqueueOptions) -> notify_queue::Result<()> {
            Ok(())
        }

        async fn poll(&self, _queue: QueueName, _max_jobs: u32, _visibility_timeout: Duration) -> notify_queue::Result<Vec<DeliveredJob>> {
            Ok(Vec::new())
        }

        async fn ack(&self, receipt_handle: &str) -> notify_queue::Result<()> {
            self.acked.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn nack(&self, receipt_handle: &str, delay: Duration) -> notify_queue::Result<()> {
            self.nacked.lock().unwrap().push((receipt_handle.to_string(), delay));
            Ok(())
        }

        async fn extend_visibility(&self, _receipt_handle: &str, _extension: Duration) -> notify_queue::Result<()> {
            Ok(())
        }

        async fn stats(&self, _queue: QueueName) -> notify_queue::Result<QueueStats> {
            Ok(QueueStats::default())
        }

        async fn init_schema(&self) -> notify_queue::Result<()> {
            Ok(())
        }
    }

    struct FakeProvider {
        channel: Channel,
        result: std::sync::Mutex<Option<std::result::Result<ProviderResult, ProviderError>>>,
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
            self.result.lock().unwrap().take().expect("send called once per test")
        }

        fn ready(&self) -> bool {
            true
        }
    }

    fn sample_tx(retry_count: u32, max_retries: u32) -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            notification_type: NotificationType::Transactional,
            channel: Channel::Email,
            status: TransactionStatus::Queued,
            content: "hi".to_string(),
            subject: None,
            recipient: "a@b.com".to_string(),
            metadata: Metadata::new(),
            priority: Priority::Medium,
            retry_count,
            max_retries,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            failed_at: None,
        }
    }

    fn delivered(tx: &Transaction) -> DeliveredJob {
        DeliveredJob { job: Job::from_transaction(tx), receipt_handle: "handle-1".to_string(), receive_count: 1 }
    }

    fn worker(store: Arc<FakeStore>, queue: Arc<FakeQueue>, providers: ProviderRegistry) -> QueueWorker {
        QueueWorker::new(
            QueueWorkerConfig {
                queue_name: QueueName::Regular,
                concurrency: 1,
                poll_interval: Duration::from_millis(10),
                visibility_timeout: Duration::from_secs(30),
                retry: RetryConfig { max_retry_attempts: 3, retry_delay: Duration::from_millis(5000), backoff_multiplier: 2 },
                provider_timeout: Duration::from_secs(1),
            },
            store,
            queue,
            providers,
        )
    }

    #[tokio::test]
    async fn terminal_transaction_is_acked_without_provider_call() {
        let mut tx = sample_tx(0, 3);
        tx.status = TransactionStatus::Sent;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let w = worker(store.clone(), queue.clone(), HashMap::new());

        w.process_job(job).await;
        assert_eq!(queue.acked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_send_marks_sent_and_acks() {
        let tx = sample_tx(0, 3);
        let id = tx.transaction_id;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let mut providers: ProviderRegistry = HashMap::new();
        providers.insert(
            Channel::Email,
            Arc::new(FakeProvider {
                channel: Channel::Email,
                result: std::sync::Mutex::new(Some(Ok(ProviderResult {
                    provider_message_id: Some("abc".to_string()),
                    provider_name: "email".to_string(),
                    raw_response: Some("250 OK".to_string()),
                }))),
            }),
        );
        let w = worker(store.clone(), queue.clone(), providers);

        w.process_job(job).await;

        let stored = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Sent);
        assert_eq!(queue.acked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retryable_failure_with_budget_remaining_nacks_with_backoff() {
        let tx = sample_tx(0, 3);
        let id = tx.transaction_id;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let mut providers: ProviderRegistry = HashMap::new();
        providers.insert(
            Channel::Email,
            Arc::new(FakeProvider {
                channel: Channel::Email,
                result: std::sync::Mutex::new(Some(Err(ProviderError::new("email", "a@b.com", "connection timeout")))),
            }),
        );
        let w = worker(store.clone(), queue.clone(), providers);

        w.process_job(job).await;

        let stored = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Retry);
        assert_eq!(stored.retry_count, 1);
        let nacked = queue.nacked.lock().unwrap();
        assert_eq!(nacked.len(), 1);
        assert_eq!(nacked[0].1, Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn exhausted_retry_budget_dead_letters_instead_of_retrying() {
        let tx = sample_tx(3, 3);
        let id = tx.transaction_id;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let mut providers: ProviderRegistry = HashMap::new();
        providers.insert(
            Channel::Email,
            Arc::new(FakeProvider {
                channel: Channel::Email,
                result: std::sync::Mutex::new(Some(Err(ProviderError::new("email", "a@b.com", "connection timeout")))),
            }),
        );
        let w = worker(store.clone(), queue.clone(), providers);

        w.process_job(job).await;

        let stored = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::DeadLetter);
        assert_eq!(queue.acked.lock().unwrap().len(), 1);
        assert!(queue.nacked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_retryable_failure_dead_letters_even_with_budget_remaining() {
        let tx = sample_tx(0, 3);
        let id = tx.transaction_id;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let mut providers: ProviderRegistry = HashMap::new();
        providers.insert(
            Channel::Email,
            Arc::new(FakeProvider {
                channel: Channel::Email,
                result: std::sync::Mutex::new(Some(Err(ProviderError::new("email", "a@b.com", "unauthorized").with_status(401)))),
            }),
        );
        let w = worker(store.clone(), queue.clone(), providers);

        w.process_job(job).await;

        let stored = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::DeadLetter);
    }

    #[tokio::test]
    async fn unconfigured_provider_dead_letters_without_retry() {
        let tx = sample_tx(0, 3);
        let id = tx.transaction_id;
        let job = delivered(&tx);
        let store = Arc::new(FakeStore::with_tx(tx));
        let queue = Arc::new(FakeQueue::new());
        let w = worker(store.clone(), queue.clone(), HashMap::new());

        w.process_job(job).await;

        let stored = store.transactions.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::DeadLetter);
    }
}
