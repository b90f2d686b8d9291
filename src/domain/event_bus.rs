//! Broadcast channel for push events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Anything that
//! wants to push to live connections publishes a [`GatewayEvent`]; the
//! transport layer's fan-out task is the receiver and resolves targets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::session::SessionId;

/// An asynchronous event destined for live connections.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    /// Tool name the event relates to; `None` reaches every target
    /// regardless of subscriptions.
    pub topic: Option<String>,
    /// Arbitrary event payload.
    pub payload: Value,
    /// Explicit target sessions. `None` targets all authenticated
    /// connections.
    #[serde(skip)]
    pub target_sessions: Option<Vec<SessionId>>,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

impl GatewayEvent {
    /// Builds an event for all authenticated connections.
    #[must_use]
    pub fn broadcast(topic: Option<String>, payload: Value) -> Self {
        Self {
            topic,
            payload,
            target_sessions: None,
            timestamp: Utc::now(),
        }
    }

    /// Builds an event for an explicit list of sessions.
    #[must_use]
    pub fn targeted(targets: Vec<SessionId>, topic: Option<String>, payload: Value) -> Self {
        Self {
            topic,
            payload,
            target_sessions: Some(targets),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for [`GatewayEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest events are dropped for
/// lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(16);
        let count = bus.publish(GatewayEvent::broadcast(None, json!({"n": 1})));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(GatewayEvent::broadcast(
            Some("echo".to_string()),
            json!({"n": 2}),
        ));

        let event = rx.recv().await;
        let Ok(event) = event else {
            panic!("expected to receive event");
        };
        assert_eq!(event.topic.as_deref(), Some("echo"));
        assert_eq!(event.payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn targeted_event_carries_session_list() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let target = SessionId::new();
        bus.publish(GatewayEvent::targeted(vec![target], None, json!("hi")));

        let event = rx.recv().await;
        let Ok(event) = event else {
            panic!("expected to receive event");
        };
        assert_eq!(event.target_sessions, Some(vec![target]));
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.receiver_count(), 0);
        let rx1 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        let _rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);
        drop(rx1);
        assert_eq!(bus.receiver_count(), 1);
    }
}
