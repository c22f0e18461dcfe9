//! Request/response DTOs for the HTTP surface.

use notify_common::{Channel, ErrorKind, ErrorLog, Metadata, NotificationType, Priority, Transaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub user_id: String,
    #[serde(default)]
    pub notification_type: Option<NotificationType>,
    pub channel: Option<Channel>,
    pub content: String,
    pub subject: Option<String>,
    pub recipient: String,
    pub priority: Option<Priority>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    pub success: bool,
    pub transaction_id: uuid::Uuid,
    pub message: String,
    pub channel: Channel,
    pub priority: Priority,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendBulkRequest {
    pub notifications: Vec<SendNotificationRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkResultEntry {
    pub success: bool,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendBulkResponse {
    pub total: usize,
    pub queued: usize,
    pub failed: usize,
    pub results: Vec<BulkResultEntry>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    #[serde(default)]
    pub transaction_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedQuery {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub retryable: Option<bool>,
    #[serde(default)]
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    #[serde(default)]
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionListResponse {
    pub total: usize,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetailResponse {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub error_logs: Vec<ErrorLog>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub waiting: u64,
    pub active: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub sent: u64,
    pub retry: u64,
    pub dead_letter: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub status_breakdown: StatusBreakdown,
    pub queue_depth: std::collections::HashMap<String, QueueDepth>,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTypeCount {
    pub error_type: ErrorKind,
    pub count: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryableCount {
    pub retryable: bool,
    pub count: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalyticsResponse {
    pub total_errors: u64,
    pub error_type_breakdown: Vec<ErrorTypeCount>,
    pub retryable_breakdown: Vec<RetryableCount>,
    pub recent_errors: Vec<ErrorLog>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub channel: Channel,
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAnalyticsResponse {
    pub channels: Vec<ChannelStats>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProbeResponse {
    pub status: String,
}
