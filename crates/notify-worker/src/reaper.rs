//! Periodic recovery pass for jobs stuck after a worker crash — distinct from
//! the retry/backoff policy in `process_job`, which only runs when a worker
//! is alive to observe the failure. Grounded on this codebase's stuck-item
//! recovery pass for the outbox and its stale-queued-job recovery pass for
//! the scheduler, both translated here onto `TransactionStore::find_stale`
//! plus a re-enqueue (the embedded broker's `enqueue` is `INSERT OR REPLACE`
//! keyed by `(queue_name, job_id)`, so handing it a fresh `Job` for an
//! already-claimed row clears the stale claim as a side effect).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notify_common::{Job, QueueName, TransactionStatus};
use notify_queue::{EnqueueOptions, QueueBroker};
use notify_store::TransactionStore;
use tracing::{error, info, warn};

pub struct StaleJobReaper {
    store: Arc<dyn TransactionStore>,
    queue: Arc<dyn QueueBroker>,
    stale_after: Duration,
    batch_limit: u32,
}

impl StaleJobReaper {
    pub fn new(store: Arc<dyn TransactionStore>, queue: Arc<dyn QueueBroker>, stale_after: Duration, batch_limit: u32) -> Self {
        Self { store, queue, stale_after, batch_limit }
    }

    /// One recovery pass. Returns the number of transactions re-enqueued.
    pub async fn recover_once(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::seconds(300));

        let stale = match self.store.find_stale(cutoff, self.batch_limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to query stale transactions");
                return 0;
            }
        };

        if stale.is_empty() {
            return 0;
        }

        metrics::gauge!("notify_worker_stale_jobs_found").set(stale.len() as f64);

        let mut recovered = 0;
        for tx in stale {
            let queue_name = QueueName::for_priority(tx.priority);
            let job = Job::from_transaction(&tx);
            let opts = EnqueueOptions { priority: tx.priority, job_id: tx.transaction_id.to_string(), max_attempts: tx.max_retries };

            if let Err(e) = self.queue.enqueue(queue_name, &job, opts).await {
                error!(transaction_id = %tx.transaction_id, error = %e, "failed to re-enqueue stale transaction");
                continue;
            }

            if let Err(e) = self.store.update_status(tx.transaction_id, TransactionStatus::Queued, None).await {
                error!(transaction_id = %tx.transaction_id, error = %e, "failed to reset stale transaction status");
                continue;
            }

            warn!(transaction_id = %tx.transaction_id, "recovered stale transaction after apparent worker crash");
            metrics::counter!("notify_worker_stale_jobs_recovered_total").increment(1);
            recovered += 1;
        }

        info!(recovered, "stale job recovery pass complete");
        recovered
    }

    /// Runs `recover_once` on `interval` until the returned handle is
    /// aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.recover_once().await;
            }
        })
    }
}
