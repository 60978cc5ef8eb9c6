//! HTTP and WebSocket handlers of the core process.
//!
//! [`AppState`] is the state carried through axum extractors; every field
//! is an `Arc` or cheap to clone.

pub mod admin;
pub mod bus;
pub mod config;
pub mod docs;
pub mod error;
pub mod gateway;
pub mod health;
pub mod registration;
pub mod websocket;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use crate::routing::{build_gateway_pipeline, GatewayPipeline};
use crate::service::CoreState;

use super::{NetworkConfig, ShutdownController, SocketRegistry};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<CoreState>,
    /// Gateway wrapped in load-shed, timeout and metrics layers.
    pub gateway: GatewayPipeline,
    pub sockets: Arc<SocketRegistry>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        core: Arc<CoreState>,
        config: NetworkConfig,
        sockets: Arc<SocketRegistry>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        let gateway = build_gateway_pipeline(
            core.gateway(),
            &core.config,
            core.telemetry.child("pipeline"),
        );
        Self {
            core,
            gateway,
            sockets,
            shutdown,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::service::control::tests::core;

    pub(crate) fn test_state() -> AppState {
        AppState::new(
            Arc::new(core()),
            NetworkConfig::default(),
            Arc::new(SocketRegistry::new()),
            Arc::new(ShutdownController::new()),
        )
    }
}
