//! Connection Events - lifecycle notifications for a protocol client
//!
//! Broadcast channel: late subscribers miss earlier events, slow ones lag.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cdp::protocol::TargetId;

/// Connection state of a protocol client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Lifecycle events published by a protocol client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected { target_id: TargetId },
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected { target_id: TargetId, attempt: u32 },
    ReconnectFailed { attempts: u32 },
}

/// Fan-out of a client's lifecycle transitions.
///
/// The client publishes from its reader and reconnection tasks; each
/// subscriber gets its own receiver and sees events from the moment it
/// subscribed.
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Retained events per subscriber before it starts lagging
    const CAPACITY: usize = 64;

    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(Self::CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ConnectionEvent) {
        tracing::trace!(?event, subscribers = self.tx.receiver_count(), "Connection event");
        // No subscribers is fine; lifecycle events are advisory.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ConnectionEvent::ReconnectFailed { attempts: 5 });

        match rx.recv().await {
            Ok(ConnectionEvent::ReconnectFailed { attempts }) => assert_eq!(attempts, 5),
            other => panic!("Expected ReconnectFailed event, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventBus::new().publish(ConnectionEvent::Disconnected {
            reason: "gone".into(),
        });
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_later_events() {
        let bus = EventBus::new();
        bus.publish(ConnectionEvent::Connected {
            target_id: "early".into(),
        });

        let mut rx = bus.subscribe();
        bus.publish(ConnectionEvent::Disconnected {
            reason: "WebSocket closed".into(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Disconnected {
                reason: "WebSocket closed".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
