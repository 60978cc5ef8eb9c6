//! Module -> core calls made during bootstrap and hot-reload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conduit_core::messages::{
    HealthCheckResponse, HealthReport, ModuleConfig, RegisterModuleRequest,
    RegisterModuleResponse, RegisterRoutesRequest, RegisterRoutesResponse,
};
use conduit_core::ServingStatus;

use crate::service::CoreState;
use crate::transport::{join_url, send_json, TransportError};

/// Used as `Arc<dyn CoreTransport>`.
#[async_trait]
pub trait CoreTransport: Send + Sync {
    async fn register_module(
        &self,
        request: RegisterModuleRequest,
    ) -> Result<RegisterModuleResponse, TransportError>;

    async fn register_routes(
        &self,
        request: RegisterRoutesRequest,
    ) -> Result<RegisterRoutesResponse, TransportError>;

    /// Reports this instance's health; answers the module's aggregate status.
    async fn report_health(
        &self,
        module: &str,
        report: HealthReport,
    ) -> Result<ServingStatus, TransportError>;

    async fn get_config(&self, module: &str) -> Result<Value, TransportError>;
}

/// [`CoreTransport`] over the core's HTTP/JSON control surface.
#[derive(Debug, Clone)]
pub struct HttpCoreTransport {
    http: reqwest::Client,
    base: String,
}

impl HttpCoreTransport {
    #[must_use]
    pub fn new(http: reqwest::Client, core_url: impl Into<String>) -> Self {
        Self {
            http,
            base: core_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base, path)
    }
}

#[async_trait]
impl CoreTransport for HttpCoreTransport {
    async fn register_module(
        &self,
        request: RegisterModuleRequest,
    ) -> Result<RegisterModuleResponse, TransportError> {
        let url = self.url("core/modules");
        send_json("register_module", &self.base, self.http.post(url).json(&request)).await
    }

    async fn register_routes(
        &self,
        request: RegisterRoutesRequest,
    ) -> Result<RegisterRoutesResponse, TransportError> {
        let url = self.url("core/routes");
        send_json("register_routes", &self.base, self.http.post(url).json(&request)).await
    }

    async fn report_health(
        &self,
        module: &str,
        report: HealthReport,
    ) -> Result<ServingStatus, TransportError> {
        let url = self.url(&format!("core/modules/{module}/health"));
        let response: HealthCheckResponse =
            send_json("report_health", &self.base, self.http.post(url).json(&report)).await?;
        Ok(response.status)
    }

    async fn get_config(&self, module: &str) -> Result<Value, TransportError> {
        let url = self.url(&format!("core/config/{module}"));
        let response: ModuleConfig = send_json("get_config", &self.base, self.http.get(url)).await?;
        Ok(response.config)
    }
}

/// [`CoreTransport`] calling a core running in the same process.
#[derive(Clone)]
pub struct LocalCoreTransport {
    core: Arc<CoreState>,
}

impl LocalCoreTransport {
    #[must_use]
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

fn local_error(operation: &'static str, err: impl std::fmt::Display) -> TransportError {
    TransportError::Channel {
        operation,
        target: "local core".to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl CoreTransport for LocalCoreTransport {
    async fn register_module(
        &self,
        request: RegisterModuleRequest,
    ) -> Result<RegisterModuleResponse, TransportError> {
        self.core
            .register_module(request)
            .await
            .map_err(|e| local_error("register_module", e))
    }

    async fn register_routes(
        &self,
        request: RegisterRoutesRequest,
    ) -> Result<RegisterRoutesResponse, TransportError> {
        self.core
            .register_routes(request)
            .map_err(|e| local_error("register_routes", e))
    }

    async fn report_health(
        &self,
        module: &str,
        report: HealthReport,
    ) -> Result<ServingStatus, TransportError> {
        self.core
            .report_health(module, &report)
            .map_err(|e| local_error("report_health", e))
    }

    async fn get_config(&self, module: &str) -> Result<Value, TransportError> {
        self.core
            .configs
            .get(module)
            .ok_or_else(|| local_error("get_config", format!("no config for '{module}'")))
    }
}
