//! The outbound transport seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::BroadcastBody;

/// Everything the delivery side needs from the messaging platform. The real
/// implementation lives in `funnelcast-telegram`; tests drive the
/// orchestrator with a mock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one broadcast body (text or media-with-caption, plus buttons)
    /// to one recipient.
    async fn send_broadcast(&self, recipient_id: i64, body: &BroadcastBody) -> Result<()>;

    /// Whether the user is currently a member of the given channel.
    async fn check_membership(&self, recipient_id: i64, channel: &str) -> Result<bool>;
}
