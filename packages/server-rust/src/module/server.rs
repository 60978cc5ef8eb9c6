//! The module's own HTTP surface: `POST /rpc/{Function}`, `GET /health`
//! and `GET /routes`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use conduit_core::messages::{
    HealthCheckResponse, ModuleCallRequest, ModuleCallResponse, RegisterRoutesRequest,
};
use conduit_core::ServingStatus;

use super::config_holder::ConfigHolder;
use super::handlers::{HandlerError, HandlerSet};
use super::hooks::ModuleHooks;
use super::state::BootstrapError;

/// Shared by the RPC handlers and the manager.
#[derive(Clone)]
pub struct RpcState {
    pub handlers: HandlerSet,
    pub hooks: Arc<dyn ModuleHooks>,
    pub config: Arc<ConfigHolder>,
    /// Last batch published to the core, served for reconciliation.
    pub published: Arc<ArcSwapOption<RegisterRoutesRequest>>,
    /// Raised only while the module is settled as serving.
    pub ready: Arc<AtomicBool>,
}

impl RpcState {
    #[must_use]
    pub fn new(handlers: HandlerSet, hooks: Arc<dyn ModuleHooks>, config: Arc<ConfigHolder>) -> Self {
        Self {
            handlers,
            hooks,
            config,
            published: Arc::new(ArcSwapOption::empty()),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// What `/health` answers: `NOT_SERVING` until the module is ready,
    /// then the module's own view.
    pub async fn health(&self) -> ServingStatus {
        if !self.ready.load(Ordering::Acquire) {
            return ServingStatus::NotServing;
        }
        self.module_health().await
    }

    /// Inactive modules are never serving; otherwise the module decides.
    pub async fn module_health(&self) -> ServingStatus {
        if !self.config.is_active() {
            return ServingStatus::NotServing;
        }
        match self.hooks.health_check().await {
            Ok(status) => status,
            Err(err) => {
                warn!(module = self.hooks.name(), error = %err, "health check failed");
                ServingStatus::NotServing
            }
        }
    }
}

async fn rpc_handler(
    State(state): State<RpcState>,
    Path(function): Path<String>,
    Json(request): Json<ModuleCallRequest>,
) -> Result<Json<ModuleCallResponse>, HandlerError> {
    Ok(Json(state.handlers.dispatch(&function, &request).await?))
}

async fn health_handler(State(state): State<RpcState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: state.health().await,
    })
}

async fn routes_handler(
    State(state): State<RpcState>,
) -> Result<Json<RegisterRoutesRequest>, HandlerError> {
    state
        .published
        .load_full()
        .map(|request| Json((*request).clone()))
        .ok_or_else(|| HandlerError::not_found("no routes published yet"))
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/rpc/{function}", post(rpc_handler))
        .route("/health", get(health_handler))
        .route("/routes", get(routes_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bound but not yet serving listener.
pub struct ModuleServer {
    listener: TcpListener,
    port: u16,
}

impl ModuleServer {
    /// # Errors
    ///
    /// Returns [`BootstrapError::Bind`] if the address cannot be bound.
    pub async fn bind(host: &str, port: u16) -> Result<Self, BootstrapError> {
        let address = format!("{host}:{port}");
        let bind_error = |source| BootstrapError::Bind {
            address: address.clone(),
            source,
        };
        let listener = TcpListener::bind(&address).await.map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();
        Ok(Self { listener, port })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves `router` until `shutdown` flips to `true`.
    pub fn spawn(self, router: Router, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let port = self.port;
        tokio::spawn(async move {
            info!(port, "module RPC server listening");
            let stop = async move {
                let _ = shutdown.wait_for(|stopping| *stopping).await;
            };
            if let Err(err) = axum::serve(self.listener, router)
                .with_graceful_shutdown(stop)
                .await
            {
                warn!(error = %err, "module RPC server failed");
            }
        })
    }
}
