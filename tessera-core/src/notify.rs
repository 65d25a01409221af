use async_trait::async_trait;

use crate::error::BoxError;

/// Transport seam for state-change notifications. Fire-and-forget,
/// at-least-once; implementations must preserve per-channel ordering for a
/// single resource id. The core never waits on delivery acknowledgment.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn emit(
        &self,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BoxError>;
}
