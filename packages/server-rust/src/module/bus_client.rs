//! Module-side event bus subscriptions.
//!
//! [`WsBusClient`] joins the core's bus bridge over WebSocket;
//! [`LocalBusClient`] subscribes directly when the core runs in-process.
//! Both hand back an mpsc receiver of [`BusSignal`]s that closes when the
//! subscription ends.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use conduit_core::messages::BusEvent;

use crate::service::{BusSignal, EventBus};
use crate::transport::{join_url, TransportError};

const SIGNAL_BUFFER: usize = 64;

/// Used as `Arc<dyn BusClient>`.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusSignal>, TransportError>;
}

/// Parses one bridge frame. Unknown frames are ignored.
pub(crate) fn parse_frame(text: &str) -> Option<BusSignal> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(Value::as_str) == Some("lagged") {
        let missed = value.get("missed").and_then(Value::as_u64).unwrap_or(0);
        return Some(BusSignal::Lagged(missed));
    }
    serde_json::from_value::<BusEvent>(value).ok().map(BusSignal::Event)
}

/// `http(s)://core` -> `ws(s)://core/core/bus/{topic}`.
fn bridge_url(core_url: &str, topic: &str) -> String {
    let ws_base = if let Some(rest) = core_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = core_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        core_url.to_string()
    };
    join_url(&ws_base, &format!("core/bus/{topic}"))
}

#[derive(Debug, Clone)]
pub struct WsBusClient {
    core_url: String,
}

impl WsBusClient {
    #[must_use]
    pub fn new(core_url: impl Into<String>) -> Self {
        Self {
            core_url: core_url.into(),
        }
    }
}

#[async_trait]
impl BusClient for WsBusClient {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusSignal>, TransportError> {
        let url = bridge_url(&self.core_url, topic);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Channel {
                operation: "bus_subscribe",
                target: url.clone(),
                message: e.to_string(),
            })?;
        let (sink, mut inbound) = stream.split();
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let topic = topic.to_string();
        tokio::spawn(async move {
            // Held so the connection stays open for the reader.
            let _sink = sink;
            while let Some(frame) = inbound.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(signal) = parse_frame(text.as_str()) else {
                            continue;
                        };
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%topic, error = %err, "bus bridge failed");
                        break;
                    }
                }
            }
            debug!(%topic, "bus bridge ended");
        });
        Ok(rx)
    }
}

#[derive(Clone)]
pub struct LocalBusClient {
    bus: Arc<EventBus>,
}

impl LocalBusClient {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl BusClient for LocalBusClient {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusSignal>, TransportError> {
        let mut subscription = self.bus.subscribe(topic);
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        tokio::spawn(async move {
            while let Some(signal) = subscription.recv().await {
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::messages::topics;

    use super::*;
    use crate::service::Telemetry;

    #[test]
    fn bridge_url_swaps_scheme() {
        assert_eq!(
            bridge_url("http://core:55152/", "config:files"),
            "ws://core:55152/core/bus/config:files"
        );
        assert_eq!(bridge_url("https://core", "routes"), "wss://core/core/bus/routes");
    }

    #[test]
    fn frames_parse_into_signals() {
        assert_eq!(
            parse_frame(r#"{"type":"configChanged","module":"files"}"#),
            Some(BusSignal::Event(BusEvent::ConfigChanged {
                module: "files".to_string()
            }))
        );
        assert_eq!(
            parse_frame(r#"{"type":"lagged","missed":4}"#),
            Some(BusSignal::Lagged(4))
        );
        assert_eq!(parse_frame("garbage"), None);
    }

    #[tokio::test]
    async fn local_client_forwards_bus_events() {
        let bus = Arc::new(EventBus::new(8, Telemetry::detached()));
        let client = LocalBusClient::new(Arc::clone(&bus));
        let mut rx = client.subscribe(&topics::config("files")).await.unwrap();
        bus.publish(
            &topics::config("files"),
            BusEvent::ConfigChanged {
                module: "files".to_string(),
            },
        );
        assert!(matches!(rx.recv().await, Some(BusSignal::Event(_))));
    }
}
