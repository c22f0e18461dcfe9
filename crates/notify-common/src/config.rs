//! Environment-driven service configuration, per `SPEC_FULL.md` §6.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(5000),
            backoff_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub regular_concurrency: usize,
    pub priority_concurrency: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            regular_concurrency: 10,
            priority_concurrency: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_address: Option<String>,
    pub sms_provider_url: Option<String>,
    pub sms_provider_api_key: Option<String>,
    pub whatsapp_provider_url: Option<String>,
    pub whatsapp_provider_api_key: Option<String>,
    pub push_provider_url: Option<String>,
    pub push_provider_api_key: Option<String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        Self {
            smtp_host: std::env::var("SMTP_HOST").ok(),
            smtp_port: std::env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(587),
            smtp_username: std::env::var("SMTP_USERNAME").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            smtp_from_address: std::env::var("SMTP_FROM_ADDRESS").ok(),
            sms_provider_url: std::env::var("SMS_PROVIDER_URL").ok(),
            sms_provider_api_key: std::env::var("SMS_PROVIDER_API_KEY").ok(),
            whatsapp_provider_url: std::env::var("WHATSAPP_PROVIDER_URL").ok(),
            whatsapp_provider_api_key: std::env::var("WHATSAPP_PROVIDER_API_KEY").ok(),
            push_provider_url: std::env::var("PUSH_PROVIDER_URL").ok(),
            push_provider_api_key: std::env::var("PUSH_PROVIDER_API_KEY").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub api_port: u16,
    pub retry: RetryConfig,
    pub worker_pools: WorkerPoolConfig,
    pub provider_timeout: Duration,
    pub bulk_batch_size: usize,
    pub providers: ProviderCredentials,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let retry = RetryConfig {
            max_retry_attempts: env_u32("MAX_RETRY_ATTEMPTS", 3),
            retry_delay: Duration::from_millis(env_u64("RETRY_DELAY_MS", 5000)),
            backoff_multiplier: env_u32("BACKOFF_MULTIPLIER", 2),
        };
        let worker_pools = WorkerPoolConfig {
            regular_concurrency: env_u32("QUEUE_CONCURRENCY", 10) as usize,
            priority_concurrency: env_u32("PRIORITY_QUEUE_CONCURRENCY", 20) as usize,
        };
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            api_port: std::env::var("API_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080),
            retry,
            worker_pools,
            provider_timeout: Duration::from_millis(env_u64("PROVIDER_TIMEOUT_MS", 30_000)),
            bulk_batch_size: env_u32("BULK_BATCH_SIZE", 50) as usize,
            providers: ProviderCredentials::from_env(),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
