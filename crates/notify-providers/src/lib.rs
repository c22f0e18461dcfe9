//! Provider adapters implementing the uniform `Send(recipient, subject?,
//! body, metadata?) -> Result | Error` contract (`SPEC_FULL.md` §4.3).

pub mod email;
pub mod http_channel;

use async_trait::async_trait;
use notify_common::{Channel, Metadata, ProviderError, ProviderResult};

#[async_trait]
pub trait Provider: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
        metadata: &Metadata,
    ) -> Result<ProviderResult, ProviderError>;

    /// Synchronous readiness probe consulted by the Dispatcher before
    /// accepting a submission for this channel (§4.3, §9 redesign note on
    /// silent provider misconfiguration).
    fn ready(&self) -> bool;
}

pub use email::EmailProvider;
pub use http_channel::HttpChannelProvider;
