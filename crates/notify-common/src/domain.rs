//! Shared domain types for the notification dispatch pipeline.
//!
//! These types are the vocabulary every other crate in the workspace builds
//! on: `Transaction` and `ErrorLog` are what the Store persists, `Job` is
//! what the QueueBroker carries, and `Preferences` is what the Dispatcher
//! consults to resolve channel/priority defaults.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
    Push,
}

impl Channel {
    /// Stable preference order used by `PreferredChannels`.
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Sms, Channel::Whatsapp, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Whatsapp => "WHATSAPP",
            Channel::Push => "PUSH",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            "WHATSAPP" => Ok(Channel::Whatsapp),
            "PUSH" => Ok(Channel::Push),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Priority band; 1=LOW .. 4=URGENT. `>= HIGH` routes to the priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    pub const HIGH: Priority = Priority::High;

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_priority_tier(&self) -> bool {
        *self >= Priority::HIGH
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::High),
            4 => Ok(Priority::Urgent),
            other => Err(format!("priority must be in [1..4], got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Transactional,
    Marketing,
    System,
    Alert,
}

/// Transaction state machine. `FAILED` is intentionally absent: per the
/// mandated resolution of the source's ambiguous `FAILED` status, this
/// worker never produces it as a state distinct from `DeadLetter` — callers
/// that need a "failed" analytics bucket group `DeadLetter` into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Queued,
    Processing,
    Sent,
    Retry,
    DeadLetter,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Sent | TransactionStatus::DeadLetter)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Queued => "QUEUED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Sent => "SENT",
            TransactionStatus::Retry => "RETRY",
            TransactionStatus::DeadLetter => "DEAD_LETTER",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "QUEUED" => Ok(TransactionStatus::Queued),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SENT" => Ok(TransactionStatus::Sent),
            "RETRY" => Ok(TransactionStatus::Retry),
            "DEAD_LETTER" => Ok(TransactionStatus::DeadLetter),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Informational error classification. The worker only gates on `retryable`
/// (carried alongside on `ErrorLog`); `ErrorKind` drives analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    RateLimit,
    AuthenticationError,
    InvalidData,
    ProviderError,
    Retryable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorKind::InvalidData => "INVALID_DATA",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::Retryable => "RETRYABLE",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NETWORK_ERROR" => Ok(ErrorKind::NetworkError),
            "RATE_LIMIT" => Ok(ErrorKind::RateLimit),
            "AUTHENTICATION_ERROR" => Ok(ErrorKind::AuthenticationError),
            "INVALID_DATA" => Ok(ErrorKind::InvalidData),
            "PROVIDER_ERROR" => Ok(ErrorKind::ProviderError),
            "RETRYABLE" => Ok(ErrorKind::Retryable),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

pub type Metadata = HashMap<String, serde_json::Value>;

/// The primary entity: one row per submitted notification.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub status: TransactionStatus,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub recipient: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Whether another delivery attempt is still permitted by the retry
    /// budget alone (does not consider error retryability).
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Append-only per-transaction failure record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub error_type: ErrorKind,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-channel notification preferences for one user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub user_id: String,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub whatsapp_enabled: bool,
    pub push_enabled: bool,
    pub email_priority: Priority,
    pub sms_priority: Priority,
    pub whatsapp_priority: Priority,
    pub push_priority: Priority,
}

impl Preferences {
    /// Defaults per `SPEC_FULL.md` §3: EMAIL enabled, default priorities
    /// EMAIL=1, SMS=2, WHATSAPP=3, PUSH=4.
    pub fn default_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email_enabled: true,
            sms_enabled: false,
            whatsapp_enabled: false,
            push_enabled: false,
            email_priority: Priority::Low,
            sms_priority: Priority::Medium,
            whatsapp_priority: Priority::High,
            push_priority: Priority::Urgent,
        }
    }

    pub fn enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Whatsapp => self.whatsapp_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    pub fn priority_for(&self, channel: Channel) -> Priority {
        match channel {
            Channel::Email => self.email_priority,
            Channel::Sms => self.sms_priority,
            Channel::Whatsapp => self.whatsapp_priority,
            Channel::Push => self.push_priority,
        }
    }

    /// Channels with `enabled = true`, in the stable order `EMAIL, SMS,
    /// WHATSAPP, PUSH`.
    pub fn preferred_channels(&self) -> Vec<Channel> {
        Channel::ALL.iter().copied().filter(|c| self.enabled(*c)).collect()
    }

    /// Apply a partial update; only `Some` fields overwrite.
    pub fn apply_update(&mut self, update: PreferencesUpdate) {
        if let Some(v) = update.email_enabled {
            self.email_enabled = v;
        }
        if let Some(v) = update.sms_enabled {
            self.sms_enabled = v;
        }
        if let Some(v) = update.whatsapp_enabled {
            self.whatsapp_enabled = v;
        }
        if let Some(v) = update.push_enabled {
            self.push_enabled = v;
        }
        if let Some(v) = update.email_priority {
            self.email_priority = v;
        }
        if let Some(v) = update.sms_priority {
            self.sms_priority = v;
        }
        if let Some(v) = update.whatsapp_priority {
            self.whatsapp_priority = v;
        }
        if let Some(v) = update.push_priority {
            self.push_priority = v;
        }
    }
}

/// Partial update DTO for `PUT /users/:userId/preferences`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub whatsapp_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub email_priority: Option<Priority>,
    pub sms_priority: Option<Priority>,
    pub whatsapp_priority: Option<Priority>,
    pub push_priority: Option<Priority>,
}

/// Queue payload: the snapshot of fields the Worker needs to process one
/// delivery attempt. Not persisted beyond the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub transaction_id: Uuid,
    pub user_id: String,
    pub channel: Channel,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Job {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id,
            user_id: tx.user_id.clone(),
            channel: tx.channel,
            recipient: tx.recipient.clone(),
            subject: tx.subject.clone(),
            content: tx.content.clone(),
            priority: tx.priority,
            metadata: tx.metadata.clone(),
        }
    }
}

/// Named queues a `Job` (or dead-letter record) can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Regular,
    Priority,
    DeadLetter,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Regular => "regular",
            QueueName::Priority => "priority",
            QueueName::DeadLetter => "dead-letter",
        }
    }

    /// Tier selection per `SPEC_FULL.md` §4.4: `priority` queue iff the
    /// resolved priority is at least `HIGH`.
    pub fn for_priority(priority: Priority) -> QueueName {
        if priority.is_priority_tier() {
            QueueName::Priority
        } else {
            QueueName::Regular
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_channels_stable_order() {
        let mut prefs = Preferences::default_for("u1");
        prefs.sms_enabled = true;
        prefs.push_enabled = true;
        assert_eq!(prefs.preferred_channels(), vec![Channel::Email, Channel::Sms, Channel::Push]);
    }

    #[test]
    fn apply_update_only_overwrites_supplied_fields() {
        let mut prefs = Preferences::default_for("u1");
        let before_sms = prefs.sms_priority;
        prefs.apply_update(PreferencesUpdate {
            email_enabled: Some(false),
            ..Default::default()
        });
        assert!(!prefs.email_enabled);
        assert_eq!(prefs.sms_priority, before_sms);
    }

    #[test]
    fn priority_tier_boundary() {
        assert!(!Priority::Medium.is_priority_tier());
        assert!(Priority::High.is_priority_tier());
        assert!(Priority::Urgent.is_priority_tier());
        assert_eq!(QueueName::for_priority(Priority::Medium).as_str(), "regular");
        assert_eq!(QueueName::for_priority(Priority::High).as_str(), "priority");
    }

    #[test]
    fn channel_round_trips_through_str() {
        for c in Channel::ALL {
            assert_eq!(c.to_string().parse::<Channel>().unwrap(), c);
        }
    }
}
