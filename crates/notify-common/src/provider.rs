//! The uniform provider contract (`SPEC_FULL.md` §4.3). Lives in the shared
//! crate because both `notify-providers` (produces `ProviderError`) and
//! `notify-classifier` (consumes it) need the same closed type — this is
//! the "extract the interface into the data-model layer" redesign from
//! `SPEC_FULL.md` §9, breaking what would otherwise be a Worker<->Provider
//! circular dependency.

use serde::{Deserialize, Serialize};

/// A successful provider send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_message_id: Option<String>,
    pub provider_name: String,
    pub raw_response: Option<String>,
}

/// A closed record of a provider failure. Every field the classifier needs
/// to pattern-match is explicit and optional, rather than a duck-typed
/// dynamic error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub provider_name: String,
    pub recipient: String,
    pub error_code: Option<String>,
    pub status_code: Option<u16>,
    pub message: String,
    pub cause: Option<String>,
    /// Set by a provider adapter that knows its failure is provider-tagged
    /// but not otherwise classifiable (used by the `PROVIDER_ERROR` rule's
    /// "caller-supplied default" retryability).
    pub provider_tagged: bool,
    pub provider_tagged_retryable_default: bool,
}

impl ProviderError {
    pub fn new(provider_name: impl Into<String>, recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            recipient: recipient.into(),
            error_code: None,
            status_code: None,
            message: message.into(),
            cause: None,
            provider_tagged: false,
            provider_tagged_retryable_default: true,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn provider_tagged(mut self, retryable_default: bool) -> Self {
        self.provider_tagged = true;
        self.provider_tagged_retryable_default = retryable_default;
        self
    }
}
