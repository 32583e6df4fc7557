//! Broadcast fan-out for engine events.
//!
//! One process-wide channel; WebSocket handlers subscribe and forward.
//! Slow subscribers lag and miss events rather than backpressuring the
//! engine.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::kernel::engine::events::EngineEvent;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct StreamHub {
    tx: broadcast::Sender<Value>,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: &EngineEvent) {
        match serde_json::to_value(event) {
            Ok(value) => {
                let _ = self.tx.send(value);
            }
            Err(e) => debug!(error = %e, "failed to serialize engine event"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::engine::events::QueueState;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe();

        hub.publish(&EngineEvent::QueueStatus {
            status: QueueState::Running,
            message: "started".to_string(),
        });

        let value = rx.recv().await.unwrap();
        assert_eq!(value["type"], "queue_status");
        assert_eq!(value["status"], "running");
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = StreamHub::new();
        hub.publish(&EngineEvent::QueueStatus {
            status: QueueState::Stopped,
            message: "no listeners".to_string(),
        });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
