//! HTTP surface: notification submission, preferences, admin read endpoints,
//! health probes, and Prometheus metrics. Route table shape, handler style,
//! and `utoipa` annotations follow this codebase's router API module,
//! trimmed to the endpoints this service actually exposes.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use notify_common::{Channel, ErrorKind, NotifyError, Priority, TransactionStatus};
use notify_dispatch::{Dispatcher, SubmitRequest};
use notify_queue::{QueueBroker, QueueStats};
use notify_store::{PreferenceStore, TransactionStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use model::{
    BulkResultEntry, ChannelAnalyticsResponse, ChannelStats, DashboardQuery, DashboardResponse, DateRangeQuery,
    ErrorAnalyticsResponse, ErrorTypeCount, FailedQuery, ProbeResponse, QueueDepth, RetryableCount,
    SendBulkRequest, SendBulkResponse, SendNotificationRequest, SendNotificationResponse, SimpleHealthResponse,
    StatusBreakdown, TransactionDetailResponse, TransactionListResponse, TransactionQuery,
};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn TransactionStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub queue: Arc<dyn QueueBroker>,
}

/// Wraps `NotifyError` so this crate can implement a foreign `IntoResponse`.
pub struct ApiError(NotifyError);

impl From<NotifyError> for ApiError {
    fn from(e: NotifyError) -> Self {
        ApiError(e)
    }
}

impl From<notify_dispatch::DispatchError> for ApiError {
    fn from(e: notify_dispatch::DispatchError) -> Self {
        ApiError(e.into())
    }
}

impl From<notify_store::StoreError> for ApiError {
    fn from(e: notify_store::StoreError) -> Self {
        ApiError(e.into())
    }
}

impl From<notify_queue::QueueError> for ApiError {
    fn from(e: notify_queue::QueueError) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            NotifyError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            NotifyError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            other => {
                error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Notification Dispatch Service API",
        version = "0.1.0",
        description = "Multi-channel (EMAIL/SMS/WHATSAPP/PUSH) notification submission, preferences, and admin read endpoints"
    ),
    paths(
        send_notification,
        send_bulk,
        get_preferences,
        update_preferences,
        admin_dashboard,
        admin_list_transactions,
        admin_get_transaction,
        admin_list_failed,
        admin_error_analytics,
        admin_channel_analytics,
        health_handler,
        liveness_probe,
        readiness_probe,
    ),
    components(schemas(
        SendNotificationRequest,
        SendNotificationResponse,
        SendBulkRequest,
        SendBulkResponse,
        BulkResultEntry,
        DashboardResponse,
        StatusBreakdown,
        QueueDepth,
        TransactionListResponse,
        TransactionDetailResponse,
        ErrorAnalyticsResponse,
        ErrorTypeCount,
        RetryableCount,
        ChannelAnalyticsResponse,
        ChannelStats,
        SimpleHealthResponse,
        ProbeResponse,
    )),
    tags(
        (name = "notifications", description = "Notification submission"),
        (name = "preferences", description = "Per-user channel preferences"),
        (name = "admin", description = "Admin read/analytics endpoints"),
        (name = "health", description = "Health and readiness probes"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/notifications/send", axum::routing::post(send_notification))
        .route("/notifications/send-bulk", axum::routing::post(send_bulk))
        .route("/users/:user_id/preferences", get(get_preferences).put(update_preferences))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/admin/transactions", get(admin_list_transactions))
        .route("/admin/transactions/:transaction_id", get(admin_get_transaction))
        .route("/admin/failed", get(admin_list_failed))
        .route("/admin/analytics/errors", get(admin_error_analytics))
        .route("/admin/analytics/channels", get(admin_channel_analytics))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

fn request_to_submit(req: SendNotificationRequest) -> SubmitRequest {
    SubmitRequest {
        user_id: req.user_id,
        notification_type: req.notification_type.unwrap_or(notify_common::NotificationType::Transactional),
        channel: req.channel,
        content: req.content,
        subject: req.subject,
        recipient: req.recipient,
        priority: req.priority,
        metadata: req.metadata,
    }
}

#[utoipa::path(
    post,
    path = "/notifications/send",
    tag = "notifications",
    request_body = SendNotificationRequest,
    responses(
        (status = 202, description = "Notification accepted for delivery", body = SendNotificationResponse),
        (status = 400, description = "Validation error or channel not ready")
    )
)]
async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<SendNotificationRequest>,
) -> Result<Response, ApiError> {
    let channel = req.channel.unwrap_or(Channel::Email);
    let submit = request_to_submit(req);
    let transaction_id = state.dispatcher.submit_notification(submit).await?;
    let tx = state.store.get(transaction_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SendNotificationResponse {
            success: true,
            transaction_id,
            message: "notification queued for delivery".to_string(),
            channel: tx.channel,
            priority: tx.priority,
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/notifications/send-bulk",
    tag = "notifications",
    request_body = SendBulkRequest,
    responses((status = 202, description = "Bulk submission processed", body = SendBulkResponse))
)]
async fn send_bulk(State(state): State<AppState>, Json(req): Json<SendBulkRequest>) -> impl IntoResponse {
    let user_ids: Vec<String> = req.notifications.iter().map(|n| n.user_id.clone()).collect();
    let submits: Vec<SubmitRequest> = req.notifications.into_iter().map(request_to_submit).collect();
    let outcomes = state.dispatcher.bulk_submit(submits).await;

    let mut queued = 0usize;
    let mut failed = 0usize;
    let results: Vec<BulkResultEntry> = user_ids
        .into_iter()
        .zip(outcomes)
        .map(|(user_id, outcome)| match outcome {
            Ok(transaction_id) => {
                queued += 1;
                BulkResultEntry { success: true, user_id, transaction_id: Some(transaction_id), error: None }
            }
            Err(e) => {
                failed += 1;
                BulkResultEntry { success: false, user_id, transaction_id: None, error: Some(e.to_string()) }
            }
        })
        .collect();

    (
        StatusCode::ACCEPTED,
        Json(SendBulkResponse { total: results.len(), queued, failed, results }),
    )
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/preferences",
    tag = "preferences",
    params(("user_id" = String, Path, description = "User id")),
    responses((status = 200, description = "User preferences"))
)]
async fn get_preferences(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Response, ApiError> {
    let prefs = state.preferences.get(&user_id).await?;
    Ok(Json(prefs).into_response())
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/preferences",
    tag = "preferences",
    params(("user_id" = String, Path, description = "User id")),
    responses((status = 200, description = "Updated preferences"))
)]
async fn update_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<notify_common::PreferencesUpdate>,
) -> Result<Response, ApiError> {
    let prefs = state.preferences.update(&user_id, update).await?;
    Ok(Json(prefs).into_response())
}

#[utoipa::path(
    get,
    path = "/admin/dashboard",
    tag = "admin",
    params(("userId" = Option<String>, Query, description = "Restrict to one user")),
    responses((status = 200, description = "Dashboard summary", body = DashboardResponse))
)]
async fn admin_dashboard(
    State(state): State<AppState>,
    Query(q): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let transactions = state.store.search(q.user_id.as_deref(), None, 1000).await?;

    let mut breakdown = StatusBreakdown::default();
    for tx in &transactions {
        match tx.status {
            TransactionStatus::Pending => breakdown.pending += 1,
            TransactionStatus::Queued => breakdown.queued += 1,
            TransactionStatus::Processing => breakdown.processing += 1,
            TransactionStatus::Sent => breakdown.sent += 1,
            TransactionStatus::Retry => breakdown.retry += 1,
            TransactionStatus::DeadLetter => breakdown.dead_letter += 1,
        }
    }

    let mut queue_depth = HashMap::new();
    for queue in [notify_common::QueueName::Regular, notify_common::QueueName::Priority, notify_common::QueueName::DeadLetter] {
        let stats: QueueStats = state.queue.stats(queue).await?;
        queue_depth.insert(
            queue.as_str().to_string(),
            QueueDepth { waiting: stats.waiting, active: stats.active, failed: stats.failed },
        );
    }

    let recent_transactions = transactions.into_iter().take(20).collect();

    Ok(Json(DashboardResponse { status_breakdown: breakdown, queue_depth, recent_transactions }))
}

#[utoipa::path(
    get,
    path = "/admin/transactions",
    tag = "admin",
    responses((status = 200, description = "Filtered transaction listing", body = TransactionListResponse))
)]
async fn admin_list_transactions(
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let status = q.status.as_deref().and_then(|s| s.parse::<TransactionStatus>().ok());
    let limit = q.limit.unwrap_or(100);
    let offset = q.offset.unwrap_or(0) as usize;

    let mut rows = state.store.search(q.user_id.as_deref(), status, limit + offset as u32 + 1).await?;

    if let Some(transaction_id) = q.transaction_id {
        rows.retain(|t| t.transaction_id == transaction_id);
    }
    if let Some(channel) = q.channel.as_deref().and_then(|c| c.parse::<Channel>().ok()) {
        rows.retain(|t| t.channel == channel);
    }
    if let Some(needle) = q.failure_reason.as_deref() {
        let needle = needle.to_lowercase();
        rows.retain(|t| t.failure_reason.as_deref().map(|r| r.to_lowercase().contains(&needle)).unwrap_or(false));
    }
    if let Some(start) = q.start_date {
        rows.retain(|t| t.created_at >= start);
    }
    if let Some(end) = q.end_date {
        rows.retain(|t| t.created_at <= end);
    }

    let total = rows.len();
    let page: Vec<_> = rows.into_iter().skip(offset).take(limit as usize).collect();

    Ok(Json(TransactionListResponse { total, transactions: page }))
}

#[utoipa::path(
    get,
    path = "/admin/transactions/{transaction_id}",
    tag = "admin",
    params(("transaction_id" = Uuid, Path)),
    responses(
        (status = 200, description = "Transaction with its error log history", body = TransactionDetailResponse),
        (status = 404, description = "Unknown transaction id")
    )
)]
async fn admin_get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionDetailResponse>, ApiError> {
    let transaction = state.store.get(transaction_id).await?;
    let error_logs = state.store.list_error_logs(transaction_id).await?;
    Ok(Json(TransactionDetailResponse { transaction, error_logs }))
}

#[utoipa::path(
    get,
    path = "/admin/failed",
    tag = "admin",
    responses((status = 200, description = "Dead-lettered transactions with matching error logs", body = TransactionListResponse))
)]
async fn admin_list_failed(
    State(state): State<AppState>,
    Query(q): Query<FailedQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let limit = q.limit.unwrap_or(100);
    let offset = q.offset.unwrap_or(0) as usize;
    let error_type = q.error_type.as_deref().and_then(|s| s.parse::<ErrorKind>().ok());

    let dead_lettered = state.store.search(None, Some(TransactionStatus::DeadLetter), 5000).await?;

    let mut matching = Vec::new();
    for tx in dead_lettered {
        let logs = state.store.list_error_logs(tx.transaction_id).await?;
        let Some(latest) = logs.into_iter().next() else { continue };

        if let Some(wanted) = error_type {
            if latest.error_type != wanted {
                continue;
            }
        }
        if let Some(wanted) = q.retryable {
            if latest.retryable != wanted {
                continue;
            }
        }
        if let Some(start) = q.start_date {
            if tx.created_at < start {
                continue;
            }
        }
        if let Some(end) = q.end_date {
            if tx.created_at > end {
                continue;
            }
        }
        matching.push(tx);
    }

    let total = matching.len();
    let page: Vec<_> = matching.into_iter().skip(offset).take(limit as usize).collect();

    Ok(Json(TransactionListResponse { total, transactions: page }))
}

#[utoipa::path(
    get,
    path = "/admin/analytics/errors",
    tag = "admin",
    responses((status = 200, description = "Error-type/retryability breakdown", body = ErrorAnalyticsResponse))
)]
async fn admin_error_analytics(
    State(state): State<AppState>,
    Query(q): Query<DateRangeQuery>,
) -> Result<Json<ErrorAnalyticsResponse>, ApiError> {
    let transactions = state.store.search(None, None, 5000).await?;

    let mut all_logs = Vec::new();
    for tx in transactions {
        if let Some(start) = q.start_date {
            if tx.created_at < start {
                continue;
            }
        }
        if let Some(end) = q.end_date {
            if tx.created_at > end {
                continue;
            }
        }
        all_logs.extend(state.store.list_error_logs(tx.transaction_id).await?);
    }

    let mut by_type: HashMap<ErrorKind, u64> = HashMap::new();
    let mut by_retryable: HashMap<bool, u64> = HashMap::new();
    for log in &all_logs {
        *by_type.entry(log.error_type).or_default() += 1;
        *by_retryable.entry(log.retryable).or_default() += 1;
    }

    all_logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    all_logs.truncate(50);

    Ok(Json(ErrorAnalyticsResponse {
        total_errors: by_type.values().sum(),
        error_type_breakdown: by_type.into_iter().map(|(error_type, count)| ErrorTypeCount { error_type, count }).collect(),
        retryable_breakdown: by_retryable.into_iter().map(|(retryable, count)| RetryableCount { retryable, count }).collect(),
        recent_errors: all_logs,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/analytics/channels",
    tag = "admin",
    responses((status = 200, description = "Per-channel delivery rates", body = ChannelAnalyticsResponse))
)]
async fn admin_channel_analytics(
    State(state): State<AppState>,
    Query(q): Query<DateRangeQuery>,
) -> Result<Json<ChannelAnalyticsResponse>, ApiError> {
    let transactions = state.store.search(None, None, 5000).await?;

    let mut totals: HashMap<Channel, (u64, u64, u64)> = HashMap::new();
    for tx in transactions {
        if let Some(start) = q.start_date {
            if tx.created_at < start {
                continue;
            }
        }
        if let Some(end) = q.end_date {
            if tx.created_at > end {
                continue;
            }
        }
        let entry = totals.entry(tx.channel).or_insert((0, 0, 0));
        entry.0 += 1;
        match tx.status {
            TransactionStatus::Sent => entry.1 += 1,
            TransactionStatus::DeadLetter => entry.2 += 1,
            _ => {}
        }
    }

    let channels = Channel::ALL
        .into_iter()
        .map(|channel| {
            let (total, sent, failed) = totals.get(&channel).copied().unwrap_or((0, 0, 0));
            let success_rate = if total > 0 { round2(sent as f64 / total as f64 * 100.0) } else { 0.0 };
            let failure_rate = if total > 0 { round2(failed as f64 / total as f64 * 100.0) } else { 0.0 };
            ChannelStats { channel, total, sent, failed, success_rate, failure_rate }
        })
        .collect();

    Ok(Json(ChannelAnalyticsResponse { channels }))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Basic health status", body = SimpleHealthResponse))
)]
async fn health_handler() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse { status: "UP".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses((status = 200, description = "Process is running", body = ProbeResponse))
)]
async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "LIVE".to_string() })
}

#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ProbeResponse),
        (status = 503, description = "Store or queue unreachable", body = ProbeResponse)
    )
)]
async fn readiness_probe(State(state): State<AppState>) -> Response {
    match state.store.search(None, None, 1).await {
        Ok(_) => (StatusCode::OK, Json(ProbeResponse { status: "READY".to_string() })).into_response(),
        Err(e) => {
            error!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(ProbeResponse { status: "NOT_READY".to_string() })).into_response()
        }
    }
}

async fn metrics_handler(State(_state): State<AppState>) -> Response {
    match super::PROMETHEUS_HANDLE.get() {
        Some(handle) => {
            (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")], handle.render()).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics exporter not installed").into_response(),
    }
}
