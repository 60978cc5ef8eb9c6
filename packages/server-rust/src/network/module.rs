//! Core HTTP/WebSocket server with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts connections until shutdown, then drains.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::connection::{OutboundMessage, SocketRegistry};
use super::handlers::{
    admin, bus, config, docs, gateway, health, registration, websocket, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::CoreState;

/// Owns the listener and everything the router shares.
///
/// 1. `new()` allocates the socket registry and shutdown controller
/// 2. `start()` binds the configured address
/// 3. `serve()` runs until the shutdown future resolves, then drains
pub struct NetworkModule {
    config: NetworkConfig,
    core: Arc<CoreState>,
    listener: Option<TcpListener>,
    sockets: Arc<SocketRegistry>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, core: Arc<CoreState>) -> Self {
        Self {
            config,
            core,
            listener: None,
            sockets: Arc::new(SocketRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn sockets(&self) -> Arc<SocketRegistry> {
        Arc::clone(&self.sockets)
    }

    /// Shared with background workers so they stop with the server.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles every core route; unmatched requests fall through to the
    /// gateway, so core paths shadow module routes with the same path.
    pub fn build_router(&self) -> Router {
        let state = AppState::new(
            Arc::clone(&self.core),
            self.config.clone(),
            Arc::clone(&self.sockets),
            Arc::clone(&self.shutdown),
        );
        router(state, &self.config)
    }

    /// Binds the TCP listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "core listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then closes sockets and waits up to
    /// the drain timeout for in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, TLS material cannot be
    /// loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        self.shutdown.set_ready();

        match &self.config.tls {
            Some(tls) => serve_tls(listener, router, tls, shutdown).await?,
            None => {
                info!("serving plain HTTP/WS");
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await?;
            }
        }

        drain(&self.sockets, &self.shutdown, &self.config).await;
        Ok(())
    }
}

fn router(state: AppState, network: &NetworkConfig) -> Router {
    let control = Router::new()
        .route("/modules", post(registration::register_module_handler))
        .route("/modules/{name}", delete(registration::deregister_handler))
        .route(
            "/modules/{name}/health",
            post(registration::report_health_handler),
        )
        .route("/routes", post(registration::register_routes_handler))
        .route("/health/{service}", get(health::check_handler))
        .route("/health/{service}/watch", get(health::watch_handler))
        .route(
            "/config/{module}",
            get(config::get_config_handler).patch(config::patch_config_handler),
        )
        .route("/bus/{topic}", get(bus::bus_handler));

    let admin = Router::new()
        .route("/modules", get(admin::list_modules_handler))
        .route("/config", get(config::list_configs_handler))
        .route("/config/{module}", patch(config::patch_config_handler))
        .route("/routes", get(admin::list_routes_handler))
        .route("/middlewares", get(admin::list_middlewares_handler));

    let docs = Router::new()
        .route("/openapi.json", get(docs::openapi_handler))
        .route("/graphql", get(docs::graphql_handler))
        .route("/tools.json", get(docs::tools_handler))
        .route("/proto/{module}", get(docs::proto_handler));

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::liveness_handler))
        .route("/health/ready", get(health::readiness_handler))
        .nest("/core", control)
        .nest("/admin", admin)
        .nest("/docs", docs)
        .route("/ws/{*path}", get(websocket::socket_handler))
        .fallback(gateway::gateway_handler)
        .layer(build_http_layers(network))
        .with_state(state)
}

/// Serves TLS via `axum-server`, reusing the pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Closes every client socket and waits for in-flight gateway calls.
async fn drain(sockets: &SocketRegistry, shutdown: &ShutdownController, config: &NetworkConfig) {
    shutdown.trigger_shutdown();

    let connections = sockets.drain_all();
    if !connections.is_empty() {
        info!(count = connections.len(), "closing client sockets");
        for connection in &connections {
            let _ = connection.try_send(OutboundMessage::Close(Some(
                "server shutting down".to_string(),
            )));
        }
    }

    if shutdown.wait_for_drain(config.drain_timeout).await {
        info!("all in-flight calls drained");
    } else {
        warn!(
            remaining = shutdown.in_flight_count(),
            "drain timeout expired with calls in flight"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::service::control::tests::core;

    fn module() -> NetworkModule {
        NetworkModule::new(NetworkConfig::default(), Arc::new(core()))
    }

    #[test]
    fn accessors_share_state() {
        let module = module();
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(&module.sockets(), &module.sockets()));
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module();
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let err = module().serve(std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn router_serves_core_and_falls_back_to_gateway() {
        let router = module().build_router();

        let response = router
            .clone()
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let response = router
            .clone()
            .oneshot(Request::get("/docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/not/a/route").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("/not/a/route"));
    }

    #[tokio::test]
    async fn serve_drains_after_shutdown() {
        let mut module = module();
        module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let sockets = module.sockets();
        let (_conn, mut rx) = sockets.register("/chat", &Default::default());

        module.serve(async {}).await.unwrap();
        assert_eq!(controller.state(), crate::network::ProcessState::Stopped);
        assert_eq!(sockets.count(), 0);
        assert!(matches!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await,
            Ok(Some(OutboundMessage::Close(_)))
        ));
    }
}
