//! Exponential retry delay: `base * 2^(n-1)` for the `n`-th retry attempt
//! (`n >= 1`), where `n` is the transaction's `retryCount` after the
//! increment that accompanies this failure. Deliberately not the teacher's
//! own `5^min(n,5)` outbox backoff curve — this service's retry schedule is
//! fixed by its own spec.

use std::time::Duration;

use notify_common::config::RetryConfig;

pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let factor = config.backoff_multiplier.saturating_pow(attempt - 1);
    config.retry_delay.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(5000),
            backoff_multiplier: 2,
        }
    }

    #[test]
    fn first_retry_uses_base_delay() {
        assert_eq!(delay_for_attempt(&config(), 1), Duration::from_millis(5000));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        assert_eq!(delay_for_attempt(&config(), 2), Duration::from_millis(10_000));
        assert_eq!(delay_for_attempt(&config(), 3), Duration::from_millis(20_000));
    }
}
