//! SQL-backed embedded broker. Single `queue_jobs` table partitioned by a
//! `queue_name` column (`regular`/`priority`/`dead-letter`), claimed with the
//! same optimistic `UPDATE ... WHERE receipt_handle IS NULL` pattern this
//! codebase's embedded FIFO queue uses, generalized from
//! `PARTITION BY message_group_id` ordering to `ORDER BY priority DESC,
//! created_at ASC` priority scheduling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notify_common::{Job, Priority, QueueName};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::{DeliveredJob, EnqueueOptions, QueueBroker, QueueStats};

pub struct SqlQueueBroker {
    pool: SqlitePool,
}

impl SqlQueueBroker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueBroker for SqlQueueBroker {
    async fn enqueue(&self, queue: QueueName, job: &Job, opts: EnqueueOptions) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let now = Utc::now().timestamp();

        // Dead-letter inserts never advance `visible_at` further — manual-
        // inspection semantics, never auto-polled for redelivery.
        sqlx::query(
            "INSERT OR REPLACE INTO queue_jobs (
                id, queue_name, job_id, priority, payload, visible_at, receipt_handle, receive_count,
                max_attempts, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, 0, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(queue.as_str())
        .bind(&opts.job_id)
        .bind(opts.priority.as_u8() as i64)
        .bind(payload)
        .bind(now)
        .bind(opts.max_attempts as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(queue = queue.as_str(), job_id = %opts.job_id, priority = ?opts.priority, "enqueued job");
        Ok(())
    }

    async fn poll(&self, queue: QueueName, max_jobs: u32, visibility_timeout: Duration) -> Result<Vec<DeliveredJob>> {
        let now = Utc::now().timestamp();
        let new_visible_at = now + visibility_timeout.as_secs() as i64;

        let rows = sqlx::query(
            "SELECT id, payload FROM queue_jobs
             WHERE queue_name = ? AND visible_at <= ? AND receipt_handle IS NULL
             ORDER BY priority DESC, created_at ASC
             LIMIT ?",
        )
        .bind(queue.as_str())
        .bind(now)
        .bind(max_jobs as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut delivered = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let payload: String = row.get("payload");
            let receipt_handle = Uuid::new_v4().to_string();

            // Optimistic claim: loses the race silently if another poller
            // already grabbed it between the SELECT and this UPDATE.
            let updated = sqlx::query(
                "UPDATE queue_jobs SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1
                 WHERE id = ? AND receipt_handle IS NULL",
            )
            .bind(&receipt_handle)
            .bind(new_visible_at)
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                continue;
            }

            let job: Job = serde_json::from_str(&payload)?;
            let receive_count_row = sqlx::query("SELECT receive_count FROM queue_jobs WHERE id = ?")
                .bind(&id)
                .fetch_one(&self.pool)
                .await?;

            delivered.push(DeliveredJob {
                job,
                receipt_handle,
                receive_count: receive_count_row.get::<i64, _>("receive_count") as u32,
            });
        }

        Ok(delivered)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        let queue_name: Option<String> = sqlx::query("SELECT queue_name FROM queue_jobs WHERE receipt_handle = ?")
            .bind(receipt_handle)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("queue_name"));

        let result = sqlx::query("DELETE FROM queue_jobs WHERE receipt_handle = ?")
            .bind(receipt_handle)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(receipt_handle, "ack failed - job not found or already removed");
            return Err(QueueError::NotFound(receipt_handle.to_string()));
        }

        if let Some(queue_name) = queue_name {
            bump_counter(&self.pool, &queue_name, "completed").await?;
        }

        debug!(receipt_handle, "job acknowledged");
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay: Duration) -> Result<()> {
        let new_visible_at = Utc::now().timestamp() + delay.as_secs() as i64;

        let result = sqlx::query(
            "UPDATE queue_jobs SET receipt_handle = NULL, visible_at = ? WHERE receipt_handle = ?",
        )
        .bind(new_visible_at)
        .bind(receipt_handle)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(receipt_handle, "nack failed - job not found");
            return Err(QueueError::NotFound(receipt_handle.to_string()));
        }

        debug!(receipt_handle, delay_secs = delay.as_secs(), "job negatively acknowledged");
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, extension: Duration) -> Result<()> {
        let new_visible_at = Utc::now().timestamp() + extension.as_secs() as i64;

        let result = sqlx::query("UPDATE queue_jobs SET visible_at = ? WHERE receipt_handle = ?")
            .bind(new_visible_at)
            .bind(receipt_handle)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(receipt_handle.to_string()));
        }
        Ok(())
    }

    async fn stats(&self, queue: QueueName) -> Result<QueueStats> {
        let now = Utc::now().timestamp();

        let waiting: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM queue_jobs WHERE queue_name = ? AND visible_at <= ? AND receipt_handle IS NULL",
        )
        .bind(queue.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let active: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM queue_jobs WHERE queue_name = ? AND receipt_handle IS NOT NULL",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let (completed, failed) = sqlx::query("SELECT completed, failed FROM queue_counters WHERE queue_name = ?")
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| (row.get::<i64, _>("completed"), row.get::<i64, _>("failed")))
            .unwrap_or((0, 0));

        Ok(QueueStats {
            waiting: waiting as u64,
            active: active as u64,
            completed: completed as u64,
            failed: failed as u64,
        })
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_jobs (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                job_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                payload TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                receipt_handle TEXT,
                receive_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_jobs_poll ON queue_jobs(queue_name, visible_at, priority, created_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_jobs_job_id ON queue_jobs(queue_name, job_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_counters (
                queue_name TEXT PRIMARY KEY,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

async fn bump_counter(pool: &SqlitePool, queue_name: &str, column: &str) -> Result<()> {
    let query = format!(
        "INSERT INTO queue_counters (queue_name, {column}) VALUES (?, 1)
         ON CONFLICT(queue_name) DO UPDATE SET {column} = {column} + 1"
    );
    sqlx::query(&query).bind(queue_name).execute(pool).await?;
    Ok(())
}
