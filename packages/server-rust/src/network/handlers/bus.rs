//! WebSocket bridge onto the in-process event bus.
//!
//! Modules subscribe to `config:{name}` here to learn about runtime config
//! changes. Each bus event becomes one JSON text frame; a lagging
//! subscription gets a `{"type":"lagged","missed":n}` frame and should
//! re-read whatever it tracks.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::service::bus::{BusSignal, BusSubscription};

pub async fn bus_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so no event slips between.
    let subscription = state.core.bus.subscribe(&topic);
    ws.on_upgrade(move |socket| run_bridge(state, subscription, socket))
}

/// Renders one signal as a text frame.
pub(crate) fn signal_frame(signal: &BusSignal) -> Option<String> {
    match signal {
        BusSignal::Event(event) => serde_json::to_string(event).ok(),
        BusSignal::Lagged(missed) => Some(json!({ "type": "lagged", "missed": missed }).to_string()),
    }
}

async fn run_bridge(state: AppState, mut subscription: BusSubscription, mut socket: WebSocket) {
    loop {
        tokio::select! {
            signal = subscription.recv() => {
                let Some(frame) = signal.as_ref().and_then(signal_frame) else { break };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = state.shutdown.cancelled() => break,
        }
    }
    debug!(topic = subscription.topic(), "bus bridge closed");
    let _ = socket.send(Message::Close(None)).await;
}
