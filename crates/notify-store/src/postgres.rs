//! Postgres-backed `TransactionStore`/`PreferenceStore`, for production use.
//! Same row shape as the SQLite store but with native `TIMESTAMPTZ`/`JSONB`
//! columns and `$n` placeholders, mirroring how this codebase's outbox ships
//! parallel SQLite and Postgres repositories behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_common::{
    Channel, ErrorKind, ErrorLog, NotificationType, Preferences, PreferencesUpdate, Priority, Transaction,
    TransactionStatus,
};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::{PreferenceStore, TransactionStore};

pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
        let status_str: String = row.get("status");
        let channel_str: String = row.get("channel");
        let notification_type_str: String = row.get("notification_type");
        let metadata_json: serde_json::Value = row.get("metadata");

        Ok(Transaction {
            transaction_id: row.get("transaction_id"),
            user_id: row.get("user_id"),
            notification_type: parse_notification_type(&notification_type_str)?,
            channel: channel_str.parse::<Channel>().map_err(StoreError::InvalidRow)?,
            status: status_str.parse::<TransactionStatus>().map_err(StoreError::InvalidRow)?,
            content: row.get("content"),
            subject: row.try_get("subject").ok(),
            recipient: row.get("recipient"),
            metadata: serde_json::from_value(metadata_json)?,
            priority: Priority::try_from(row.get::<i32, _>("priority") as u8).map_err(StoreError::InvalidRow)?,
            retry_count: row.get::<i32, _>("retry_count") as u32,
            max_retries: row.get::<i32, _>("max_retries") as u32,
            failure_reason: row.try_get("failure_reason").ok(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            sent_at: row.try_get("sent_at").ok(),
            failed_at: row.try_get("failed_at").ok(),
        })
    }
}

fn parse_notification_type(s: &str) -> Result<NotificationType> {
    match s {
        "TRANSACTIONAL" => Ok(NotificationType::Transactional),
        "MARKETING" => Ok(NotificationType::Marketing),
        "SYSTEM" => Ok(NotificationType::System),
        "ALERT" => Ok(NotificationType::Alert),
        other => Err(StoreError::InvalidRow(format!("unknown notification type: {other}"))),
    }
}

fn notification_type_str(nt: NotificationType) -> &'static str {
    match nt {
        NotificationType::Transactional => "TRANSACTIONAL",
        NotificationType::Marketing => "MARKETING",
        NotificationType::System => "SYSTEM",
        NotificationType::Alert => "ALERT",
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn create(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions (
                transaction_id, user_id, notification_type, channel, status, content, subject, recipient,
                metadata, priority, retry_count, max_retries, failure_reason, created_at, updated_at, sent_at, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(tx.transaction_id)
        .bind(&tx.user_id)
        .bind(notification_type_str(tx.notification_type))
        .bind(tx.channel.as_str())
        .bind(tx.status.to_string())
        .bind(&tx.content)
        .bind(&tx.subject)
        .bind(&tx.recipient)
        .bind(serde_json::to_value(&tx.metadata)?)
        .bind(tx.priority.as_u8() as i32)
        .bind(tx.retry_count as i32)
        .bind(tx.max_retries as i32)
        .bind(&tx.failure_reason)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.sent_at)
        .bind(tx.failed_at)
        .execute(&self.pool)
        .await?;

        debug!(transaction_id = %tx.transaction_id, "created transaction");
        Ok(())
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Transaction> {
        let row = sqlx::query("SELECT * FROM transactions WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;
        Self::parse_row(&row)
    }

    async fn update_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        failure_reason: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let sent_at = matches!(status, TransactionStatus::Sent).then_some(now);
        let failed_at = matches!(status, TransactionStatus::DeadLetter).then_some(now);

        sqlx::query(
            "UPDATE transactions SET status = $1, failure_reason = $2, updated_at = $3,
             sent_at = COALESCE($4, sent_at), failed_at = COALESCE($5, failed_at)
             WHERE transaction_id = $6",
        )
        .bind(status.to_string())
        .bind(&failure_reason)
        .bind(now)
        .bind(sent_at)
        .bind(failed_at)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        debug!(transaction_id = %transaction_id, status = %status, "updated transaction status");
        Ok(())
    }

    async fn record_success(&self, transaction_id: Uuid, provider_response: Option<String>) -> Result<()> {
        let now = Utc::now();

        if let Some(response) = provider_response {
            let row = sqlx::query("SELECT metadata FROM transactions WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;
            let metadata_json: serde_json::Value = row.get("metadata");
            let mut metadata: notify_common::Metadata = serde_json::from_value(metadata_json)?;
            metadata.insert("providerResponse".to_string(), serde_json::Value::String(response));

            sqlx::query(
                "UPDATE transactions SET status = $1, failure_reason = NULL, updated_at = $2, sent_at = $3, metadata = $4
                 WHERE transaction_id = $5",
            )
            .bind(TransactionStatus::Sent.to_string())
            .bind(now)
            .bind(now)
            .bind(serde_json::to_value(&metadata)?)
            .bind(transaction_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE transactions SET status = $1, failure_reason = NULL, updated_at = $2, sent_at = $3
                 WHERE transaction_id = $4",
            )
            .bind(TransactionStatus::Sent.to_string())
            .bind(now)
            .bind(now)
            .bind(transaction_id)
            .execute(&self.pool)
            .await?;
        }

        debug!(transaction_id = %transaction_id, "recorded successful send");
        Ok(())
    }

    async fn record_retry(&self, transaction_id: Uuid, failure_reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE transactions SET status = $1, retry_count = retry_count + 1, failure_reason = $2, updated_at = $3
             WHERE transaction_id = $4",
        )
        .bind(TransactionStatus::Retry.to_string())
        .bind(failure_reason)
        .bind(Utc::now())
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        debug!(transaction_id = %transaction_id, "recorded retry");
        Ok(())
    }

    async fn append_error_log(&self, entry: &ErrorLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_logs (
                id, transaction_id, error_type, error_message, error_stack, error_code, retryable,
                provider_response, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.error_type.to_string())
        .bind(&entry.error_message)
        .bind(&entry.error_stack)
        .bind(&entry.error_code)
        .bind(entry.retryable)
        .bind(&entry.provider_response)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_error_logs(&self, transaction_id: Uuid) -> Result<Vec<ErrorLog>> {
        let rows = sqlx::query("SELECT * FROM error_logs WHERE transaction_id = $1 ORDER BY created_at DESC")
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let error_type_str: String = row.get("error_type");
                Ok(ErrorLog {
                    id: row.get("id"),
                    transaction_id: row.get("transaction_id"),
                    error_type: error_type_str.parse::<ErrorKind>().map_err(StoreError::InvalidRow)?,
                    error_message: row.get("error_message"),
                    error_stack: row.try_get("error_stack").ok(),
                    error_code: row.try_get("error_code").ok(),
                    retryable: row.get("retryable"),
                    provider_response: row.try_get("provider_response").ok(),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE status IN ('QUEUED', 'PROCESSING') AND updated_at < $1
             ORDER BY updated_at ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn search(
        &self,
        user_id: Option<&str>,
        status: Option<TransactionStatus>,
        limit: u32,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions
             WHERE ($1::text IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC LIMIT $3",
        )
        .bind(user_id)
        .bind(status.map(|s| s.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                subject TEXT,
                recipient TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                failure_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                sent_at TIMESTAMPTZ,
                failed_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions(user_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
            CREATE INDEX IF NOT EXISTS idx_transactions_updated_at ON transactions(updated_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_logs (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                error_stack TEXT,
                error_code TEXT,
                retryable BOOLEAN NOT NULL,
                provider_response TEXT,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_error_logs_tx_created ON error_logs(transaction_id, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized postgres transaction store schema");
        Ok(())
    }
}

pub struct PostgresPreferenceStore {
    pool: PgPool,
}

impl PostgresPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Preferences> {
        Ok(Preferences {
            user_id: row.get("user_id"),
            email_enabled: row.get("email_enabled"),
            sms_enabled: row.get("sms_enabled"),
            whatsapp_enabled: row.get("whatsapp_enabled"),
            push_enabled: row.get("push_enabled"),
            email_priority: Priority::try_from(row.get::<i32, _>("email_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
            sms_priority: Priority::try_from(row.get::<i32, _>("sms_priority") as u8).map_err(StoreError::InvalidRow)?,
            whatsapp_priority: Priority::try_from(row.get::<i32, _>("whatsapp_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
            push_priority: Priority::try_from(row.get::<i32, _>("push_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
        })
    }
}

#[async_trait]
impl PreferenceStore for PostgresPreferenceStore {
    async fn get(&self, user_id: &str) -> Result<Preferences> {
        if let Some(row) = sqlx::query("SELECT * FROM preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Self::parse_row(&row);
        }

        let defaults = Preferences::default_for(user_id);
        let insert_result = sqlx::query(
            "INSERT INTO preferences (
                user_id, email_enabled, sms_enabled, whatsapp_enabled, push_enabled,
                email_priority, sms_priority, whatsapp_priority, push_priority
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(&defaults.user_id)
        .bind(defaults.email_enabled)
        .bind(defaults.sms_enabled)
        .bind(defaults.whatsapp_enabled)
        .bind(defaults.push_enabled)
        .bind(defaults.email_priority.as_u8() as i32)
        .bind(defaults.sms_priority.as_u8() as i32)
        .bind(defaults.whatsapp_priority.as_u8() as i32)
        .bind(defaults.push_priority.as_u8() as i32)
        .execute(&self.pool)
        .await?;

        if insert_result.rows_affected() == 1 {
            return Ok(defaults);
        }

        let row = sqlx::query("SELECT * FROM preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Self::parse_row(&row)
    }

    async fn update(&self, user_id: &str, partial: PreferencesUpdate) -> Result<Preferences> {
        let mut current = self.get(user_id).await?;
        current.apply_update(partial);

        sqlx::query(
            "UPDATE preferences SET email_enabled = $1, sms_enabled = $2, whatsapp_enabled = $3, push_enabled = $4,
             email_priority = $5, sms_priority = $6, whatsapp_priority = $7, push_priority = $8 WHERE user_id = $9",
        )
        .bind(current.email_enabled)
        .bind(current.sms_enabled)
        .bind(current.whatsapp_enabled)
        .bind(current.push_enabled)
        .bind(current.email_priority.as_u8() as i32)
        .bind(current.sms_priority.as_u8() as i32)
        .bind(current.whatsapp_priority.as_u8() as i32)
        .bind(current.push_priority.as_u8() as i32)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(current)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                user_id TEXT PRIMARY KEY,
                email_enabled BOOLEAN NOT NULL,
                sms_enabled BOOLEAN NOT NULL,
                whatsapp_enabled BOOLEAN NOT NULL,
                push_enabled BOOLEAN NOT NULL,
                email_priority INTEGER NOT NULL,
                sms_priority INTEGER NOT NULL,
                whatsapp_priority INTEGER NOT NULL,
                push_priority INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized postgres preference store schema");
        Ok(())
    }
}
