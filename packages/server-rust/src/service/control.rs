//! Core-side composition root.
//!
//! [`CoreState`] builds every core component once and hands each the
//! `Arc`s it depends on. Network handlers and background workers reach the
//! components only through it.

use std::sync::Arc;

use conduit_core::messages::{
    HealthReport, RegisterModuleRequest, RegisterModuleResponse, RegisterRoutesRequest,
    RegisterRoutesResponse,
};
use conduit_core::{ProtoGenerator, ServingStatus};
use tracing::{info, warn};

use super::bus::EventBus;
use super::client::ModuleClient;
use super::config::CoreConfig;
use super::config_store::{ConfigError, ConfigStore};
use super::health::HealthService;
use super::registry::{RegistryError, ServiceRegistry};
use super::telemetry::Telemetry;
use crate::routing::{Gateway, RouteCompiler};
use crate::storage::OverrideStore;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("module '{0}' is not registered")]
    UnknownModule(String),
    #[error("route batch for '{batch}' was sent as '{claimed}'")]
    ModuleMismatch { batch: String, claimed: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct CoreState {
    pub config: Arc<CoreConfig>,
    pub telemetry: Telemetry,
    pub bus: Arc<EventBus>,
    pub health: Arc<HealthService>,
    pub registry: Arc<ServiceRegistry>,
    pub configs: Arc<ConfigStore>,
    pub compiler: Arc<RouteCompiler>,
    pub client: Arc<dyn ModuleClient>,
}

impl CoreState {
    #[must_use]
    pub fn new(
        config: CoreConfig,
        persistence: Arc<dyn OverrideStore>,
        client: Arc<dyn ModuleClient>,
        telemetry: Telemetry,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.bus_capacity, telemetry.child("bus")));
        let health = Arc::new(HealthService::new(
            Arc::clone(&bus),
            telemetry.child("health"),
        ));
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&health),
            Arc::clone(&bus),
            telemetry.child("registry"),
        ));
        let configs = Arc::new(ConfigStore::new(
            persistence,
            Arc::clone(&bus),
            telemetry.child("config"),
        ));
        let compiler = Arc::new(RouteCompiler::new(
            &config,
            ProtoGenerator::default(),
            Arc::clone(&bus),
            telemetry.child("compiler"),
        ));
        Self {
            config: Arc::new(config),
            telemetry,
            bus,
            health,
            registry,
            configs,
            compiler,
            client,
        }
    }

    /// Dispatcher over this core's table and registry.
    #[must_use]
    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            Arc::clone(&self.compiler),
            Arc::clone(&self.registry),
            Arc::clone(&self.client),
            self.telemetry.child("gateway"),
        )
    }

    /// Upserts the announcing instance and, when the request declares a
    /// config, negotiates it.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Config`] if negotiation fails. The instance
    /// stays registered in that case.
    pub async fn register_module(
        &self,
        request: RegisterModuleRequest,
    ) -> Result<RegisterModuleResponse, ControlError> {
        let upsert = self
            .registry
            .update_module(&request.name, &request.address, request.health);
        if upsert.new_module {
            info!(parent: self.telemetry.span(), module = %request.name, "new module");
        }

        let effective_config = match request.config {
            Some(declaration) => Some(self.configs.negotiate(&request.name, declaration).await?),
            None => None,
        };
        Ok(RegisterModuleResponse {
            name: request.name,
            effective_config,
        })
    }

    /// Compiles the module's route batch into the live table.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownModule`] if the module never announced.
    pub fn register_routes(
        &self,
        request: RegisterRoutesRequest,
    ) -> Result<RegisterRoutesResponse, ControlError> {
        let module = request.batch.module.clone();
        if !self.registry.contains(&module) {
            return Err(ControlError::UnknownModule(module));
        }
        if let Some(proto) = &request.proto {
            let expected = conduit_core::proto::normalize_module_name(&module);
            if proto.module_name != expected {
                warn!(
                    parent: self.telemetry.span(),
                    module = %module,
                    sent = %proto.module_name,
                    "module sent an interface for another package; regenerating"
                );
            }
        }
        Ok(self.compiler.compile(request.batch))
    }

    /// Records a health report from one instance.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Registry`] for unknown modules or instances.
    pub fn report_health(
        &self,
        module: &str,
        report: &HealthReport,
    ) -> Result<ServingStatus, ControlError> {
        Ok(self
            .registry
            .set_instance_health(module, &report.address, report.status)?)
    }

    /// Removes a module with all instances, routes and config.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownModule`] if nothing was registered.
    pub fn deregister(&self, module: &str) -> Result<(), ControlError> {
        if self.registry.remove_module(module).is_none() {
            return Err(ControlError::UnknownModule(module.to_string()));
        }
        self.compiler.remove(module);
        self.configs.forget(module);
        info!(parent: self.telemetry.span(), module, "module deregistered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
