//! WebSocket support for real-time upload progress and domain events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use invoicer_core::{DomainEvent, EventEnvelope, ProgressSnapshot, TransferState};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to clients for real-time updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Current state of the upload batch.
    UploadProgress { snapshot: ProgressSnapshot },
    /// A domain event published on the bus.
    Event {
        sequence: u64,
        published_at: DateTime<Utc>,
        event: DomainEvent,
    },
    /// Server heartbeat (sent periodically to keep connection alive).
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    fn message_type(&self) -> &'static str {
        match self {
            WsMessage::UploadProgress { .. } => "upload_progress",
            WsMessage::Event { .. } => "event",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Broadcaster for WebSocket messages using tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsMessage>,
}

impl WsBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast a message to all connected clients.
    pub fn broadcast(&self, msg: WsMessage) {
        // No receivers just means no client is connected.
        let _ = self.sender.send(msg);
    }

    /// Subscribe to receive messages.
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.sender.subscribe()
    }

    pub fn upload_progress(&self, snapshot: ProgressSnapshot) {
        self.broadcast(WsMessage::UploadProgress { snapshot });
    }

    pub fn domain_event(&self, envelope: &EventEnvelope) {
        self.broadcast(WsMessage::Event {
            sequence: envelope.sequence,
            published_at: envelope.published_at,
            event: envelope.event.clone(),
        });
    }

    /// Forward every upload state change until the orchestrator goes away.
    pub fn forward_upload_state(&self, mut rx: watch::Receiver<TransferState>) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().snapshot();
                broadcaster.upload_progress(snapshot);
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("Upload state forwarder stopped");
        })
    }

    /// Forward every domain event from a bus receiver.
    pub fn forward_events(
        &self,
        mut rx: broadcast::Receiver<Arc<EventEnvelope>>,
    ) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => broadcaster.domain_event(&envelope),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event forwarder lagged, skipped {} event(s)", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Event forwarder stopped");
        })
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_message<S>(sender: &mut S, msg: &WsMessage) -> bool
where
    S: futures::Sink<Message> + Unpin,
{
    WS_MESSAGES_SENT
        .with_label_values(&[msg.message_type()])
        .inc();
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize WsMessage: {}", e);
            true
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.ws_broadcaster().subscribe();
    let initial = WsMessage::UploadProgress {
        snapshot: state.uploads().current().snapshot(),
    };

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        if !send_message(&mut sender, &initial).await {
            return;
        }
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                result = rx.recv() => match result {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} messages", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: Utc::now().timestamp(),
                },
            };
            if !send_message(&mut sender, &msg).await {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Clients only ping and close.
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Received text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoicer_core::EventBus;

    #[tokio::test]
    async fn test_events_are_forwarded_as_tagged_json() {
        let bus = EventBus::new(16);
        let broadcaster = WsBroadcaster::new(16);
        let mut client = broadcaster.subscribe();
        let _forwarder = broadcaster.forward_events(bus.receiver());

        bus.publish(DomainEvent::InvoiceDeleted {
            invoice_id: "inv-1".to_string(),
        });

        let msg = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "invoice_deleted");
        assert_eq!(json["event"]["invoice_id"], "inv-1");
    }

    #[tokio::test]
    async fn test_upload_state_forwarder_sends_current_snapshot() {
        let (tx, rx) = watch::channel(TransferState::Idle);
        let broadcaster = WsBroadcaster::new(16);
        let mut client = broadcaster.subscribe();
        let _forwarder = broadcaster.forward_upload_state(rx);

        let msg = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "upload_progress");
        assert_eq!(json["snapshot"]["phase"], "idle");
        drop(tx);
    }
}
