//! Pure mapping from a provider failure to `(ErrorKind, retryable)`.
//!
//! Modeled on the HTTP-status dispatch table this codebase already uses to
//! turn a mediation response into an outcome (`mediate_once` in the
//! router's mediator), generalized here from a fixed status-code switch
//! into the ordered code/status/message predicate table below. The rules
//! are evaluated top to bottom; the first match wins.

use notify_common::{ErrorKind, ProviderError};

const NETWORK_ERROR_CODES: &[&str] = &["ETIMEDOUT", "ECONNREFUSED", "ENOTFOUND", "ECONNRESET"];

/// Classify a provider error. Never fails: the lowest-priority rule always
/// matches, so a `(ErrorKind, bool)` pair is returned unconditionally.
pub fn classify(error: &ProviderError) -> (ErrorKind, bool) {
    let message_lower = error.message.to_lowercase();

    if error
        .error_code
        .as_deref()
        .map(|c| NETWORK_ERROR_CODES.contains(&c))
        .unwrap_or(false)
        || message_lower.contains("timeout")
        || message_lower.contains("network")
    {
        return (ErrorKind::NetworkError, true);
    }

    if error.status_code == Some(429) || message_lower.contains("rate limit") {
        return (ErrorKind::RateLimit, true);
    }

    if matches!(error.status_code, Some(502) | Some(503)) || message_lower.contains("service unavailable") {
        return (ErrorKind::NetworkError, true);
    }

    if matches!(error.status_code, Some(401) | Some(403))
        || message_lower.contains("unauthorized")
        || message_lower.contains("forbidden")
    {
        return (ErrorKind::AuthenticationError, false);
    }

    if error.error_code.as_deref() == Some("PROVIDER_UNCONFIGURED") {
        return (ErrorKind::ProviderError, false);
    }

    if error.status_code == Some(400)
        || message_lower.contains("invalid")
        || message_lower.contains("not found")
        || message_lower.contains("bad request")
    {
        return (ErrorKind::InvalidData, false);
    }

    if error.provider_tagged {
        return (ErrorKind::ProviderError, error.provider_tagged_retryable_default);
    }

    (ErrorKind::Retryable, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> ProviderError {
        ProviderError::new("email", "a@b.c", "boom")
    }

    #[test]
    fn network_error_by_code() {
        let e = err().with_code("ETIMEDOUT");
        assert_eq!(classify(&e), (ErrorKind::NetworkError, true));
    }

    #[test]
    fn network_error_by_message() {
        let e = ProviderError::new("sms", "+1", "connection timeout while sending");
        assert_eq!(classify(&e), (ErrorKind::NetworkError, true));
    }

    #[test]
    fn rate_limit_by_status() {
        let e = err().with_status(429);
        assert_eq!(classify(&e), (ErrorKind::RateLimit, true));
    }

    #[test]
    fn rate_limit_by_message() {
        let e = ProviderError::new("sms", "+1", "You have hit the rate limit, slow down");
        assert_eq!(classify(&e), (ErrorKind::RateLimit, true));
    }

    #[test]
    fn gateway_errors_are_network_retryable() {
        assert_eq!(classify(&err().with_status(502)), (ErrorKind::NetworkError, true));
        assert_eq!(classify(&err().with_status(503)), (ErrorKind::NetworkError, true));
    }

    #[test]
    fn auth_errors_non_retryable() {
        assert_eq!(classify(&err().with_status(401)), (ErrorKind::AuthenticationError, false));
        assert_eq!(classify(&err().with_status(403)), (ErrorKind::AuthenticationError, false));
    }

    #[test]
    fn invalid_data_non_retryable() {
        assert_eq!(classify(&err().with_status(400)), (ErrorKind::InvalidData, false));
        let e = ProviderError::new("sms", "+1", "recipient not found");
        assert_eq!(classify(&e), (ErrorKind::InvalidData, false));
    }

    #[test]
    fn provider_tagged_inherits_caller_hint() {
        let e = err().provider_tagged(false);
        assert_eq!(classify(&e), (ErrorKind::ProviderError, false));
        let e2 = err().provider_tagged(true);
        assert_eq!(classify(&e2), (ErrorKind::ProviderError, true));
    }

    #[test]
    fn unconfigured_provider_is_non_retryable() {
        let e = err().with_code("PROVIDER_UNCONFIGURED");
        assert_eq!(classify(&e), (ErrorKind::ProviderError, false));
    }

    #[test]
    fn unmatched_falls_back_to_conservative_retryable() {
        let e = ProviderError::new("push", "device-1", "something odd happened");
        assert_eq!(classify(&e), (ErrorKind::Retryable, true));
    }

    #[test]
    fn first_match_wins_network_before_auth() {
        // A message that could plausibly match two rules: network pattern
        // should win because it's evaluated first.
        let e = ProviderError::new("email", "a@b.c", "network unauthorized failure").with_status(401);
        assert_eq!(classify(&e), (ErrorKind::NetworkError, true));
    }
}
