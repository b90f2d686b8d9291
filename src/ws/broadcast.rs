//! Push-event fan-out to live connections.
//!
//! One spawned task drains the [`EventBus`] and delivers each event to
//! its resolved targets: an explicit session list, or every registered
//! connection when none is given. The payload is serialized once per
//! event; a per-target send failure is logged and never aborts the
//! remaining sends. Delivery order follows the connection index's
//! iteration order.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::messages::event_notification;
use crate::app_state::AppState;
use crate::domain::GatewayEvent;

/// Spawns the fan-out task consuming the application event bus.
pub fn spawn_event_fanout(state: AppState) -> JoinHandle<()> {
    let mut rx = state.event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let delivered = deliver(&state, &event).await;
                    tracing::debug!(delivered, topic = ?event.topic, "event fanned out");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event fan-out lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Delivers one event, returning the number of connections written.
///
/// Explicit targets skip subscription filtering (the sender chose them);
/// broadcast events reach only connections subscribed to the topic, when
/// one is set. Connections without the notification permission are
/// always skipped.
pub async fn deliver(state: &AppState, event: &GatewayEvent) -> usize {
    let explicit = event.target_sessions.is_some();
    let targets = match &event.target_sessions {
        Some(ids) => {
            let mut handles = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(handle) = state.connections.get_connection(*id).await {
                    handles.push(handle);
                }
            }
            handles
        }
        None => state.connections.all_connections().await,
    };

    let payload = event_notification(
        event.topic.as_deref(),
        &event.payload,
        &event.timestamp.to_rfc3339(),
    )
    .to_json();

    let mut delivered = 0;
    for handle in targets {
        if !handle.can_receive_notifications {
            continue;
        }
        if !explicit
            && let Some(topic) = &event.topic
            && !handle.is_subscribed(topic).await
        {
            continue;
        }
        match handle.send_text(payload.clone()) {
            Ok(()) => {
                state
                    .connections
                    .track_sent(handle.session_id, payload.len() as u64)
                    .await;
                delivered += 1;
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %handle.session_id,
                    error = %err,
                    "event delivery failed"
                );
            }
        }
    }
    delivered
}
