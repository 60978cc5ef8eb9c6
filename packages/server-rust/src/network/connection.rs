//! Live socket-descriptor connections.
//!
//! Every client WebSocket opened on a compiled socket path gets a
//! [`SocketConnection`] with a bounded outbound queue. Module replies are
//! delivered by socket id (`receivers`) or by room (`rooms`); with neither
//! set, the reply goes back to the sender. A connection is a member of the
//! room named by its socket path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;

use conduit_core::messages::SocketResult;

use super::config::ConnectionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue stayed full")]
    Timeout,
    #[error("connection closed")]
    Disconnected,
}

#[derive(Debug)]
pub struct SocketConnection {
    pub id: String,
    /// Public socket path this connection was opened on.
    pub path: String,
    pub tx: mpsc::Sender<OutboundMessage>,
    pub connected_at: Instant,
}

impl SocketConnection {
    /// Enqueues without blocking. `false` if full or closed.
    #[must_use]
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// # Errors
    ///
    /// Returns [`SendError::Timeout`] if the queue stays full for `timeout`
    /// and [`SendError::Disconnected`] once the writer is gone.
    pub async fn send_timeout(
        &self,
        msg: OutboundMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Frame pushed to clients for a module reply.
#[must_use]
pub fn event_frame(result: &SocketResult) -> String {
    json!({ "event": result.event, "data": result.data }).to_string()
}

#[derive(Debug, Default)]
pub struct SocketRegistry {
    connections: DashMap<String, Arc<SocketConnection>>,
}

impl SocketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection on `path` with a fresh socket id.
    pub fn register(
        &self,
        path: &str,
        config: &ConnectionConfig,
    ) -> (Arc<SocketConnection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let connection = Arc::new(SocketConnection {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string(),
            tx,
            connected_at: Instant::now(),
        });
        self.connections
            .insert(connection.id.clone(), Arc::clone(&connection));
        (connection, rx)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SocketConnection>> {
        self.connections.remove(id).map(|(_, c)| c)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<SocketConnection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Routes a module reply. Returns how many connections accepted it.
    ///
    /// Full queues are skipped so one slow client cannot stall the others.
    pub fn deliver(&self, sender: &SocketConnection, result: &SocketResult) -> usize {
        let frame = event_frame(result);
        if result.receivers.is_empty() && result.rooms.is_empty() {
            return usize::from(sender.try_send(OutboundMessage::Text(frame)));
        }

        let mut delivered = 0;
        for entry in &self.connections {
            let connection = entry.value();
            let addressed = result.receivers.iter().any(|id| *id == connection.id)
                || result.rooms.iter().any(|room| *room == connection.path);
            if !connection.is_connected() {
                continue;
            }
            if addressed && connection.try_send(OutboundMessage::Text(frame.clone())) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Removes and returns every connection. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<SocketConnection>> {
        let keys: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.connections.remove(&key).map(|(_, c)| c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn small() -> ConnectionConfig {
        ConnectionConfig {
            outbound_channel_capacity: 2,
            ..ConnectionConfig::default()
        }
    }

    fn reply(receivers: Vec<String>, rooms: Vec<String>) -> SocketResult {
        SocketResult {
            event: "message".to_string(),
            data: json!("hi"),
            receivers,
            rooms,
        }
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = SocketRegistry::new();
        let (a, _ra) = registry.register("/chat", &small());
        let (b, _rb) = registry.register("/chat", &small());
        assert_ne!(a.id, b.id);
        assert_eq!(registry.count(), 2);
        assert!(registry.remove(&a.id).is_some());
        assert!(registry.get(&a.id).is_none());
    }

    #[test]
    fn unaddressed_reply_goes_to_sender_only() {
        let registry = SocketRegistry::new();
        let (a, mut ra) = registry.register("/chat", &small());
        let (_b, mut rb) = registry.register("/chat", &small());

        assert_eq!(registry.deliver(&a, &reply(Vec::new(), Vec::new())), 1);
        let OutboundMessage::Text(frame) = ra.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["event"], "message");
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn receivers_and_rooms_fan_out() {
        let registry = SocketRegistry::new();
        let (a, mut ra) = registry.register("/chat", &small());
        let (b, mut rb) = registry.register("/chat", &small());
        let (_c, mut rc) = registry.register("/other", &small());

        assert_eq!(registry.deliver(&a, &reply(vec![b.id.clone()], Vec::new())), 1);
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_ok());

        assert_eq!(registry.deliver(&a, &reply(Vec::new(), vec!["/chat".to_string()])), 2);
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn full_queue_is_skipped() {
        let registry = SocketRegistry::new();
        let (a, _ra) = registry.register("/chat", &small());
        assert!(a.try_send(OutboundMessage::Text("1".to_string())));
        assert!(a.try_send(OutboundMessage::Text("2".to_string())));
        assert_eq!(registry.deliver(&a, &reply(Vec::new(), Vec::new())), 0);
    }

    #[tokio::test]
    async fn send_timeout_reports_disconnect() {
        let registry = SocketRegistry::new();
        let (a, rx) = registry.register("/chat", &small());
        drop(rx);
        assert!(!a.is_connected());
        let result = a
            .send_timeout(OutboundMessage::Text("x".to_string()), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(SendError::Disconnected));
    }

    #[test]
    fn drain_all_empties_registry() {
        let registry = SocketRegistry::new();
        let (_a, _ra) = registry.register("/chat", &small());
        let (_b, _rb) = registry.register("/chat", &small());
        assert_eq!(registry.drain_all().len(), 2);
        assert_eq!(registry.count(), 0);
    }
}
