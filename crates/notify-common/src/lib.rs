//! Shared types, configuration, error, and logging plumbing for the
//! notification dispatch service.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod provider;

pub use config::{ProviderCredentials, ServiceConfig};
pub use domain::{
    Channel, ErrorKind, ErrorLog, Job, Metadata, NotificationType, Preferences, PreferencesUpdate, Priority,
    QueueName, Transaction, TransactionStatus,
};
pub use error::{NotifyError, Result};
pub use provider::{ProviderError, ProviderResult};
