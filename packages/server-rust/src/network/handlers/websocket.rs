//! Client WebSockets on compiled socket paths.
//!
//! Inbound text frames are `{"event": ..., "params": ...}`. Each one is
//! dispatched through the gateway pipeline; replies fan out through the
//! [`SocketRegistry`](crate::network::SocketRegistry).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use tracing::{debug, warn};

use conduit_core::messages::CallOutcome;

use super::gateway::header_map;
use super::AppState;
use crate::network::connection::{OutboundMessage, SocketConnection};
use crate::routing::table::normalize;
use crate::routing::{GatewayError, GatewayRequest, SocketRequest};

/// Inbound client frame.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub params: Value,
}

pub async fn socket_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let path = normalize(&path);
    if state.core.compiler.snapshot().socket(&path).is_none() {
        return GatewayError::SocketNotFound(path).into_response();
    }
    let headers = header_map(&headers);
    ws.on_upgrade(move |socket| run_socket(state, path, headers, socket))
        .into_response()
}

async fn run_socket(
    state: AppState,
    path: String,
    headers: BTreeMap<String, String>,
    socket: WebSocket,
) {
    let (connection, rx) = state.sockets.register(&path, &state.config.connection);
    debug!(socket_id = %connection.id, %path, "socket connected");
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx));

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &connection, &headers, text.as_str()).await;
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = state.shutdown.cancelled() => break,
        }
    }

    state.sockets.remove(&connection.id);
    let _ = connection.try_send(OutboundMessage::Close(None));
    drop(connection);
    let _ = writer.await;
    debug!(%path, "socket closed");
}

async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = rx.recv().await {
        let frame = match message {
            OutboundMessage::Text(text) => Message::Text(text.into()),
            OutboundMessage::Close(_) => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

async fn handle_frame(
    state: &AppState,
    connection: &Arc<SocketConnection>,
    headers: &BTreeMap<String, String>,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            reply_error(state, connection, &format!("malformed frame: {err}")).await;
            return;
        }
    };
    let _guard = state.shutdown.in_flight_guard();
    let request = GatewayRequest::Socket(SocketRequest {
        path: connection.path.clone(),
        socket_id: connection.id.clone(),
        event: frame.event,
        params: frame.params,
        headers: headers.clone(),
        request_id: uuid::Uuid::new_v4().to_string(),
    });
    match state.gateway.clone().oneshot(request).await {
        Ok(CallOutcome::Socket(result)) => {
            state.sockets.deliver(connection, &result);
        }
        Ok(_) => warn!(socket_id = %connection.id, "non-socket outcome on socket path"),
        Err(err) => reply_error(state, connection, &err.to_string()).await,
    }
}

async fn reply_error(state: &AppState, connection: &SocketConnection, message: &str) {
    let frame = json!({ "event": "error", "data": { "error": message } }).to_string();
    let timeout = state.config.connection.send_timeout;
    if let Err(err) = connection
        .send_timeout(OutboundMessage::Text(frame), timeout)
        .await
    {
        debug!(socket_id = %connection.id, error = %err, "error frame dropped");
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use conduit_core::{RouteBatch, ServingStatus, SocketDescriptor, SocketEvent};

    use super::*;
    use crate::network::handlers::tests::test_state;

    fn chat_state() -> AppState {
        let state = test_state();
        state
            .core
            .registry
            .update_module("chat", "http://c:1", ServingStatus::Serving);
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        state.core.compiler.compile(RouteBatch::new(
            "chat",
            vec![SocketDescriptor::new("chat", "/chat", events).unwrap().into()],
        ));
        state
    }

    fn text(rx: &mut mpsc::Receiver<OutboundMessage>) -> Value {
        let OutboundMessage::Text(frame) = rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn event_reply_returns_to_sender() {
        let state = chat_state();
        let (connection, mut rx) = state.sockets.register("/chat", &state.config.connection);
        handle_frame(
            &state,
            &connection,
            &BTreeMap::new(),
            r#"{"event":"message","params":{"text":"hi"}}"#,
        )
        .await;
        let frame = text(&mut rx);
        assert_eq!(frame["event"], "message");
        assert_eq!(frame["data"]["function"], "OnMessage");
    }

    #[tokio::test]
    async fn unknown_event_and_bad_json_answer_error_frames() {
        let state = chat_state();
        let (connection, mut rx) = state.sockets.register("/chat", &state.config.connection);
        handle_frame(&state, &connection, &BTreeMap::new(), r#"{"event":"typing"}"#).await;
        assert_eq!(text(&mut rx)["event"], "error");

        handle_frame(&state, &connection, &BTreeMap::new(), "not json").await;
        let frame = text(&mut rx);
        assert!(frame["data"]["error"]
            .as_str()
            .unwrap()
            .starts_with("malformed frame"));
    }

    #[test]
    fn socket_paths_are_normalized_before_lookup() {
        let state = chat_state();
        assert!(state.core.compiler.snapshot().socket(&normalize("chat")).is_some());
        assert_eq!(
            GatewayError::SocketNotFound("/x".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
