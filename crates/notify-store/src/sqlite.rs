//! SQLite-backed `TransactionStore`/`PreferenceStore`, for embedded/dev/test
//! use. Row shape and update semantics follow the outbox's SQLite repository
//! (dynamic schema init, millisecond-precision timestamps swapped here for
//! RFC3339 text to match `chrono`'s `TIMESTAMPTZ`-compatible columns, as
//! `SPEC_FULL.md` calls for) generalized from a single flat status code to
//! the richer `Transaction` entity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_common::{
    Channel, ErrorKind, ErrorLog, NotificationType, Preferences, PreferencesUpdate, Priority, Transaction,
    TransactionStatus,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::{PreferenceStore, TransactionStore};

pub struct SqliteTransactionStore {
    pool: SqlitePool,
}

impl SqliteTransactionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let metadata_json: String = row.get("metadata");
        let priority_code: i64 = row.get("priority");
        let status_str: String = row.get("status");
        let channel_str: String = row.get("channel");
        let notification_type_str: String = row.get("notification_type");

        Ok(Transaction {
            transaction_id: Uuid::parse_str(row.get("transaction_id"))
                .map_err(|e| StoreError::InvalidRow(e.to_string()))?,
            user_id: row.get("user_id"),
            notification_type: parse_notification_type(&notification_type_str)?,
            channel: channel_str.parse::<Channel>().map_err(StoreError::InvalidRow)?,
            status: status_str.parse::<TransactionStatus>().map_err(StoreError::InvalidRow)?,
            content: row.get("content"),
            subject: row.try_get("subject").ok(),
            recipient: row.get("recipient"),
            metadata: serde_json::from_str(&metadata_json)?,
            priority: Priority::try_from(priority_code as u8).map_err(StoreError::InvalidRow)?,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            failure_reason: row.try_get("failure_reason").ok(),
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
            sent_at: row.try_get::<Option<String>, _>("sent_at").ok().flatten().map(|s| parse_timestamp(s)).transpose()?,
            failed_at: row.try_get::<Option<String>, _>("failed_at").ok().flatten().map(|s| parse_timestamp(s)).transpose()?,
        })
    }
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(e.to_string()))
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
impl TransactionStore for SqliteTransactionStore {
    async fn create(&self, tx: &Transaction) -> Result<()> {
        let metadata_json = serde_json::to_string(&tx.metadata)?;
        sqlx::query(
            "INSERT INTO transactions (
                transaction_id, user_id, notification_type, channel, status, content, subject, recipient,
                metadata, priority, retry_count, max_retries, failure_reason, created_at, updated_at, sent_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tx.transaction_id.to_string())
        .bind(&tx.user_id)
        .bind(notification_type_str(tx.notification_type))
        .bind(tx.channel.as_str())
        .bind(tx.status.to_string())
        .bind(&tx.content)
        .bind(&tx.subject)
        .bind(&tx.recipient)
        .bind(metadata_json)
        .bind(tx.priority.as_u8() as i64)
        .bind(tx.retry_count as i64)
        .bind(tx.max_retries as i64)
        .bind(&tx.failure_reason)
        .bind(tx.created_at.to_rfc3339())
        .bind(tx.updated_at.to_rfc3339())
        .bind(tx.sent_at.map(|t| t.to_rfc3339()))
        .bind(tx.failed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        debug!(transaction_id = %tx.transaction_id, "created transaction");
        Ok(())
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Transaction> {
        let row = sqlx::query("SELECT * FROM transactions WHERE transaction_id = ?")
            .bind(transaction_id.to_string())
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
        let sent_at = matches!(status, TransactionStatus::Sent).then(|| now.to_rfc3339());
        let failed_at = matches!(status, TransactionStatus::DeadLetter).then(|| now.to_rfc3339());

        sqlx::query(
            "UPDATE transactions SET status = ?, failure_reason = ?, updated_at = ?,
             sent_at = COALESCE(?, sent_at), failed_at = COALESCE(?, failed_at)
             WHERE transaction_id = ?",
        )
        .bind(status.to_string())
        .bind(&failure_reason)
        .bind(now.to_rfc3339())
        .bind(sent_at)
        .bind(failed_at)
        .bind(transaction_id.to_string())
        .execute(&self.pool)
        .await?;

        debug!(transaction_id = %transaction_id, status = %status, "updated transaction status");
        Ok(())
    }

    async fn record_success(&self, transaction_id: Uuid, provider_response: Option<String>) -> Result<()> {
        let now = Utc::now();

        if let Some(response) = provider_response {
            let row = sqlx::query("SELECT metadata FROM transactions WHERE transaction_id = ?")
                .bind(transaction_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;
            let metadata_json: String = row.get("metadata");
            let mut metadata: notify_common::Metadata = serde_json::from_str(&metadata_json)?;
            metadata.insert("providerResponse".to_string(), serde_json::Value::String(response));
            let metadata_json = serde_json::to_string(&metadata)?;

            sqlx::query(
                "UPDATE transactions SET status = ?, failure_reason = NULL, updated_at = ?, sent_at = ?, metadata = ?
                 WHERE transaction_id = ?",
            )
            .bind(TransactionStatus::Sent.to_string())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(metadata_json)
            .bind(transaction_id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE transactions SET status = ?, failure_reason = NULL, updated_at = ?, sent_at = ?
                 WHERE transaction_id = ?",
            )
            .bind(TransactionStatus::Sent.to_string())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(transaction_id.to_string())
            .execute(&self.pool)
            .await?;
        }

        debug!(transaction_id = %transaction_id, "recorded successful send");
        Ok(())
    }

    async fn record_retry(&self, transaction_id: Uuid, failure_reason: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE transactions SET status = ?, retry_count = retry_count + 1, failure_reason = ?, updated_at = ?
             WHERE transaction_id = ?",
        )
        .bind(TransactionStatus::Retry.to_string())
        .bind(failure_reason)
        .bind(now.to_rfc3339())
        .bind(transaction_id.to_string())
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
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.transaction_id.to_string())
        .bind(entry.error_type.to_string())
        .bind(&entry.error_message)
        .bind(&entry.error_stack)
        .bind(&entry.error_code)
        .bind(entry.retryable)
        .bind(&entry.provider_response)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_error_logs(&self, transaction_id: Uuid) -> Result<Vec<ErrorLog>> {
        let rows = sqlx::query("SELECT * FROM error_logs WHERE transaction_id = ? ORDER BY created_at DESC")
            .bind(transaction_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let error_type_str: String = row.get("error_type");
                Ok(ErrorLog {
                    id: Uuid::parse_str(row.get("id")).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
                    transaction_id: Uuid::parse_str(row.get("transaction_id"))
                        .map_err(|e| StoreError::InvalidRow(e.to_string()))?,
                    error_type: error_type_str.parse::<ErrorKind>().map_err(StoreError::InvalidRow)?,
                    error_message: row.get("error_message"),
                    error_stack: row.try_get("error_stack").ok(),
                    error_code: row.try_get("error_code").ok(),
                    retryable: row.get("retryable"),
                    provider_response: row.try_get("provider_response").ok(),
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect()
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE status IN ('QUEUED', 'PROCESSING') AND updated_at < ?
             ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
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
        let query = "SELECT * FROM transactions
             WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC LIMIT ?3";

        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(status.map(|s| s.to_string()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                subject TEXT,
                recipient TEXT NOT NULL,
                metadata TEXT NOT NULL,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                sent_at TEXT,
                failed_at TEXT
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
                id TEXT PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                error_stack TEXT,
                error_code TEXT,
                retryable INTEGER NOT NULL,
                provider_response TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_error_logs_tx_created ON error_logs(transaction_id, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized sqlite transaction store schema");
        Ok(())
    }
}

pub struct SqlitePreferenceStore {
    pool: SqlitePool,
}

impl SqlitePreferenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Preferences> {
        Ok(Preferences {
            user_id: row.get("user_id"),
            email_enabled: row.get("email_enabled"),
            sms_enabled: row.get("sms_enabled"),
            whatsapp_enabled: row.get("whatsapp_enabled"),
            push_enabled: row.get("push_enabled"),
            email_priority: Priority::try_from(row.get::<i64, _>("email_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
            sms_priority: Priority::try_from(row.get::<i64, _>("sms_priority") as u8).map_err(StoreError::InvalidRow)?,
            whatsapp_priority: Priority::try_from(row.get::<i64, _>("whatsapp_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
            push_priority: Priority::try_from(row.get::<i64, _>("push_priority") as u8)
                .map_err(StoreError::InvalidRow)?,
        })
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn get(&self, user_id: &str) -> Result<Preferences> {
        if let Some(row) = sqlx::query("SELECT * FROM preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Self::parse_row(&row);
        }

        // Lazy creation. A concurrent insert loser falls back to reading the
        // winner's row rather than erroring, per §4.1's race requirement.
        let defaults = Preferences::default_for(user_id);
        let insert_result = sqlx::query(
            "INSERT OR IGNORE INTO preferences (
                user_id, email_enabled, sms_enabled, whatsapp_enabled, push_enabled,
                email_priority, sms_priority, whatsapp_priority, push_priority
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&defaults.user_id)
        .bind(defaults.email_enabled)
        .bind(defaults.sms_enabled)
        .bind(defaults.whatsapp_enabled)
        .bind(defaults.push_enabled)
        .bind(defaults.email_priority.as_u8() as i64)
        .bind(defaults.sms_priority.as_u8() as i64)
        .bind(defaults.whatsapp_priority.as_u8() as i64)
        .bind(defaults.push_priority.as_u8() as i64)
        .execute(&self.pool)
        .await?;

        if insert_result.rows_affected() == 1 {
            return Ok(defaults);
        }

        let row = sqlx::query("SELECT * FROM preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Self::parse_row(&row)
    }

    async fn update(&self, user_id: &str, partial: PreferencesUpdate) -> Result<Preferences> {
        let mut current = self.get(user_id).await?;
        current.apply_update(partial);

        sqlx::query(
            "UPDATE preferences SET email_enabled = ?, sms_enabled = ?, whatsapp_enabled = ?, push_enabled = ?,
             email_priority = ?, sms_priority = ?, whatsapp_priority = ?, push_priority = ? WHERE user_id = ?",
        )
        .bind(current.email_enabled)
        .bind(current.sms_enabled)
        .bind(current.whatsapp_enabled)
        .bind(current.push_enabled)
        .bind(current.email_priority.as_u8() as i64)
        .bind(current.sms_priority.as_u8() as i64)
        .bind(current.whatsapp_priority.as_u8() as i64)
        .bind(current.push_priority.as_u8() as i64)
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
                email_enabled INTEGER NOT NULL,
                sms_enabled INTEGER NOT NULL,
                whatsapp_enabled INTEGER NOT NULL,
                push_enabled INTEGER NOT NULL,
                email_priority INTEGER NOT NULL,
                sms_priority INTEGER NOT NULL,
                whatsapp_priority INTEGER NOT NULL,
                push_priority INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized sqlite preference store schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_common::Metadata;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap()
    }

    fn sample_tx() -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            notification_type: NotificationType::Transactional,
            channel: Channel::Email,
            status: TransactionStatus::Pending,
            content: "hello".to_string(),
            subject: Some("hi".to_string()),
            recipient: "a@b.com".to_string(),
            metadata: Metadata::new(),
            priority: Priority::Medium,
            retry_count: 0,
            max_retries: 3,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            failed_at: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let store = SqliteTransactionStore::new(pool().await);
        store.init_schema().await.unwrap();
        let tx = sample_tx();
        store.create(&tx).await.unwrap();

        let fetched = store.get(tx.transaction_id).await.unwrap();
        assert_eq!(fetched.transaction_id, tx.transaction_id);
        assert_eq!(fetched.status, TransactionStatus::Pending);
        assert_eq!(fetched.channel, Channel::Email);
    }

    #[tokio::test]
    async fn update_status_to_sent_stamps_sent_at() {
        let store = SqliteTransactionStore::new(pool().await);
        store.init_schema().await.unwrap();
        let tx = sample_tx();
        store.create(&tx).await.unwrap();

        store.update_status(tx.transaction_id, TransactionStatus::Sent, None).await.unwrap();
        let fetched = store.get(tx.transaction_id).await.unwrap();
        assert_eq!(fetched.status, TransactionStatus::Sent);
        assert!(fetched.sent_at.is_some());
    }

    #[tokio::test]
    async fn record_success_stamps_sent_at_and_stores_provider_response() {
        let store = SqliteTransactionStore::new(pool().await);
        store.init_schema().await.unwrap();
        let tx = sample_tx();
        store.create(&tx).await.unwrap();

        store.record_success(tx.transaction_id, Some("250 OK".to_string())).await.unwrap();
        let fetched = store.get(tx.transaction_id).await.unwrap();
        assert_eq!(fetched.status, TransactionStatus::Sent);
        assert!(fetched.sent_at.is_some());
        assert_eq!(
            fetched.metadata.get("providerResponse").and_then(|v| v.as_str()),
            Some("250 OK")
        );
    }

    #[tokio::test]
    async fn record_retry_increments_count_and_sets_retry_status() {
        let store = SqliteTransactionStore::new(pool().await);
        store.init_schema().await.unwrap();
        let tx = sample_tx();
        store.create(&tx).await.unwrap();

        store.record_retry(tx.transaction_id, "network blip").await.unwrap();
        let fetched = store.get(tx.transaction_id).await.unwrap();
        assert_eq!(fetched.retry_count, 1);
        assert_eq!(fetched.status, TransactionStatus::Retry);
        assert_eq!(fetched.failure_reason.as_deref(), Some("network blip"));
    }

    #[tokio::test]
    async fn preferences_lazily_create_defaults() {
        let store = SqlitePreferenceStore::new(pool().await);
        store.init_schema().await.unwrap();

        let prefs = store.get("new-user").await.unwrap();
        assert!(prefs.email_enabled);
        assert!(!prefs.sms_enabled);
        assert_eq!(prefs.email_priority, Priority::Low);
    }

    #[tokio::test]
    async fn preferences_update_only_overwrites_supplied_fields() {
        let store = SqlitePreferenceStore::new(pool().await);
        store.init_schema().await.unwrap();
        store.get("user-2").await.unwrap();

        let updated = store
            .update(
                "user-2",
                PreferencesUpdate { sms_enabled: Some(true), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(updated.sms_enabled);
        assert!(updated.email_enabled);
    }

    #[tokio::test]
    async fn search_filters_by_user_and_status() {
        let store = SqliteTransactionStore::new(pool().await);
        store.init_schema().await.unwrap();
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.user_id = "user-2".to_string();
        store.create(&tx1).await.unwrap();
        store.create(&tx2).await.unwrap();

        let results = store.search(Some("user-1"), None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id, "user-1");
    }
}
