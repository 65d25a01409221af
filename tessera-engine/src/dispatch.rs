use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use tessera_core::{BoxError, EventTransport, ReservationEvent};

pub const ADMIN_CHANNEL: &str = "admin";

/// Decides what gets published where after a committed state change: the
/// event room, the acting user's channel, and the admin broadcast. Transport
/// failures are logged and swallowed; a notification must never fail the
/// mutation it describes.
pub struct NotificationDispatcher {
    transport: Arc<dyn EventTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    pub async fn publish(&self, event: &ReservationEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize reservation event");
                return;
            }
        };

        for channel in Self::channels(event) {
            if let Err(e) = self
                .transport
                .emit(&channel, event.name(), payload.clone())
                .await
            {
                warn!(channel, event = event.name(), error = %e, "event emit failed");
            }
        }
    }

    fn channels(event: &ReservationEvent) -> Vec<String> {
        vec![
            format!("event:{}", event.event_id()),
            format!("user:{}", event.user_id()),
            ADMIN_CHANNEL.to_string(),
        ]
    }
}

/// One delivered notification as seen by an in-process subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// In-process transport over a tokio broadcast channel, for same-process
/// subscribers (SSE bridges, tests). Lagging receivers drop messages, which
/// is acceptable for an at-least-once, fire-and-forget transport.
pub struct BroadcastTransport {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventTransport for BroadcastTransport {
    async fn emit(
        &self,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BoxError> {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(Envelope {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ReleaseCause;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_fans_out_to_room_user_and_admin() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let mut rx = transport.subscribe();
        let dispatcher = NotificationDispatcher::new(transport);

        let event_id = Uuid::new_v4();
        let event = ReservationEvent::SeatsReleased {
            event_id,
            seat_ids: vec![Uuid::new_v4()],
            holder: "alice".to_string(),
            cause: ReleaseCause::Expired,
        };
        dispatcher.publish(&event).await;

        let mut channels = Vec::new();
        for _ in 0..3 {
            let envelope = rx.try_recv().unwrap();
            assert_eq!(envelope.event, "seats.expired");
            channels.push(envelope.channel);
        }
        assert!(channels.contains(&format!("event:{event_id}")));
        assert!(channels.contains(&"user:alice".to_string()));
        assert!(channels.contains(&ADMIN_CHANNEL.to_string()));
        assert!(rx.try_recv().is_err());
    }
}
