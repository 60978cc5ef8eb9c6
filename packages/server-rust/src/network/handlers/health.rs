//! Process probes and the module health protocol (`Check` / `Watch`).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::debug;

use conduit_core::messages::HealthCheckResponse;

use super::AppState;
use crate::network::ProcessState;

// ----- Process probes -----

/// Detailed process health. Always 200; `state` carries the verdict.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let table = state.core.compiler.snapshot();
    Json(json!({
        "state": state.shutdown.state().as_str(),
        "node": state.core.config.node_id,
        "modules": state.core.registry.len(),
        "routes": table.route_count(),
        "routingVersion": table.version(),
        "sockets": state.sockets.count(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.state() == ProcessState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// ----- Check / Watch -----

/// `Check(service)`. Names never registered answer `SERVICE_UNKNOWN`.
pub async fn check_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: state.core.health.check(&service),
    })
}

/// `Watch(service)`: one JSON frame per status, current value first.
pub async fn watch_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_watch(state, service, socket))
}

async fn run_watch(state: AppState, service: String, mut socket: WebSocket) {
    let mut watch = state.core.health.watch(&service);
    loop {
        tokio::select! {
            status = watch.next() => {
                let Some(status) = status else { break };
                let Ok(frame) = serde_json::to_string(&HealthCheckResponse { status }) else {
                    break;
                };
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
    debug!(%service, "health watch closed");
    let _ = socket.send(Message::Close(None)).await;
}
