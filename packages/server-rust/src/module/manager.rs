//! Module bootstrap driver.
//!
//! [`ModuleManager::bootstrap`] walks the [`BootstrapState`] machine one
//! step at a time. Steps inside a transition run strictly in order and any
//! failure aborts the bootstrap; only the final health report is allowed to
//! fail, which leaves the module `NotServing`.
//!
//! After bootstrap a watcher task follows the module's config topic:
//! every change (or a lagged subscription) re-reads the effective config,
//! re-runs `on_config` and republishes the route batch.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use conduit_core::messages::{
    topics, BusEvent, ConfigDeclaration, HealthReport, RegisterModuleRequest,
    RegisterRoutesRequest, RegisterRoutesResponse,
};
use conduit_core::{is_active, ProtoGenerator, RouteBatch, ServingStatus};

use super::bus_client::BusClient;
use super::config_holder::ConfigHolder;
use super::core_link::CoreTransport;
use super::hooks::ModuleHooks;
use super::server::{router, ModuleServer, RpcState};
use super::settings::ModuleSettings;
use super::state::{BootstrapError, BootstrapFsm, BootstrapState};
use crate::service::telemetry::{install_prometheus, Telemetry};
use crate::service::BusSignal;
use crate::transport::TransportError;

/// Module-side metric names.
pub mod metric_names {
    pub const BOOTSTRAPS: &str = "conduit_module_bootstraps_total";
    pub const RELOADS: &str = "conduit_module_config_reloads_total";
}

/// Everything the hot-reload watcher needs, cloneable into its task.
#[derive(Clone)]
struct Publisher {
    name: String,
    address: String,
    hooks: Arc<dyn ModuleHooks>,
    transport: Arc<dyn CoreTransport>,
    generator: Arc<ProtoGenerator>,
    rpc: RpcState,
    fsm: Arc<Mutex<BootstrapFsm>>,
    telemetry: Telemetry,
}

impl Publisher {
    /// Moves between `Serving` and `NotServing` and gates `/health` to match.
    fn settle(&self, status: ServingStatus) -> Result<(), BootstrapError> {
        let next = if status.is_serving() {
            BootstrapState::Serving
        } else {
            BootstrapState::NotServing
        };
        let result = self.fsm.lock().advance(next);
        self.rpc.set_ready(result.is_ok() && status.is_serving());
        result?;
        debug!(parent: self.telemetry.span(), module = %self.name, state = %next, "bootstrap state");
        Ok(())
    }

    /// Reports `status`, falling back to `NOT_SERVING` when the core is
    /// unreachable, and settles on the outcome.
    async fn report_and_settle(&self, status: ServingStatus) -> ServingStatus {
        let status = match self.report(status).await {
            Ok(_) => status,
            Err(err) => {
                warn!(parent: self.telemetry.span(), module = %self.name, error = %err, "health report failed");
                ServingStatus::NotServing
            }
        };
        if let Err(err) = self.settle(status) {
            warn!(parent: self.telemetry.span(), module = %self.name, error = %err, "serving state not updated");
        }
        status
    }

    /// Builds the batch for `config`, records it and sends it to the core.
    async fn publish_routes(&self, config: &Value) -> Result<RegisterRoutesResponse, TransportError> {
        let descriptors = self.hooks.descriptors(config);
        let proto = self.generator.generate(&self.name, &descriptors);
        let request = RegisterRoutesRequest {
            batch: RouteBatch::new(self.name.clone(), descriptors),
            proto: Some(proto),
        };
        self.rpc.published.store(Some(Arc::new(request.clone())));
        let response = self.transport.register_routes(request).await?;
        if !response.rejected.is_empty() {
            warn!(
                parent: self.telemetry.span(),
                module = %self.name,
                rejected = response.rejected.len(),
                "core rejected part of the route batch"
            );
        }
        Ok(response)
    }

    async fn report(&self, status: ServingStatus) -> Result<ServingStatus, TransportError> {
        self.transport
            .report_health(
                &self.name,
                HealthReport {
                    address: self.address.clone(),
                    status,
                },
            )
            .await
    }

    /// Re-reads the effective config after a change signal.
    async fn reload(&self) {
        let config = match self.transport.get_config(&self.name).await {
            Ok(config) => config,
            Err(err) => {
                warn!(parent: self.telemetry.span(), module = %self.name, error = %err, "config re-read failed");
                return;
            }
        };
        if !self.rpc.config.apply(config.clone()) {
            return;
        }
        self.telemetry.count(metric_names::RELOADS, &self.name);
        info!(parent: self.telemetry.span(), module = %self.name, "config reloaded");

        if is_active(&config) {
            if let Err(err) = self.hooks.on_config(&config).await {
                error!(parent: self.telemetry.span(), module = %self.name, error = %err, "on_config failed after reload");
                self.report_and_settle(ServingStatus::NotServing).await;
                return;
            }
            if let Err(err) = self.publish_routes(&config).await {
                warn!(parent: self.telemetry.span(), module = %self.name, error = %err, "route republish failed");
            }
        }
        let status = self.rpc.module_health().await;
        self.report_and_settle(status).await;
    }
}

pub struct ModuleManager {
    settings: ModuleSettings,
    hooks: Arc<dyn ModuleHooks>,
    transport: Arc<dyn CoreTransport>,
    bus: Arc<dyn BusClient>,
    config: Arc<ConfigHolder>,
    generator: Arc<ProtoGenerator>,
    telemetry: Telemetry,
    fsm: Arc<Mutex<BootstrapFsm>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    publisher: Mutex<Option<Publisher>>,
}

impl ModuleManager {
    #[must_use]
    pub fn new(
        settings: ModuleSettings,
        hooks: Arc<dyn ModuleHooks>,
        transport: Arc<dyn CoreTransport>,
        bus: Arc<dyn BusClient>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            settings,
            hooks,
            transport,
            bus,
            config: Arc::new(ConfigHolder::default()),
            generator: Arc::new(ProtoGenerator::default()),
            telemetry,
            fsm: Arc::new(Mutex::new(BootstrapFsm::default())),
            shutdown: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
            publisher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.fsm.lock().state()
    }

    /// Effective configuration shared with the module's handlers.
    #[must_use]
    pub fn config(&self) -> Arc<ConfigHolder> {
        Arc::clone(&self.config)
    }

    fn advance(&self, next: BootstrapState) -> Result<(), BootstrapError> {
        self.fsm.lock().advance(next)?;
        debug!(parent: self.telemetry.span(), module = self.hooks.name(), state = %next, "bootstrap state");
        Ok(())
    }

    /// Runs the full bootstrap. Returns the address the core was given and
    /// the final serving status.
    ///
    /// # Errors
    ///
    /// Any [`BootstrapError`]; the caller should exit nonzero.
    pub async fn bootstrap(&self) -> Result<(String, ServingStatus), BootstrapError> {
        let name = self.hooks.name().to_string();

        // ----- INIT -> RPC_SERVER_READY -----
        let server = ModuleServer::bind(&self.settings.host, self.settings.port).await?;
        let address = self.settings.advertised_address(server.port());
        let rpc = RpcState::new(
            self.hooks.handlers(Arc::clone(&self.config)),
            Arc::clone(&self.hooks),
            Arc::clone(&self.config),
        );
        self.advance(BootstrapState::RpcServerReady)?;

        // ----- RPC_SERVER_READY -> PRE_REGISTERED -----
        self.hooks
            .pre_server_start()
            .await
            .map_err(BootstrapError::step("pre_server_start"))?;

        let signals = self
            .bus
            .subscribe(&topics::config(&name))
            .await
            .map_err(|e| BootstrapError::step("bus_join")(e.into()))?;

        let publisher = Publisher {
            name: name.clone(),
            address: address.clone(),
            hooks: Arc::clone(&self.hooks),
            transport: Arc::clone(&self.transport),
            generator: Arc::clone(&self.generator),
            rpc: rpc.clone(),
            fsm: Arc::clone(&self.fsm),
            telemetry: self.telemetry.clone(),
        };
        // The watcher starts right away but only re-reads config once the
        // module has been negotiated.
        let negotiated = watch::channel(false);
        self.tasks.lock().push(spawn_config_watcher(
            publisher.clone(),
            signals,
            negotiated.1,
            self.shutdown.subscribe(),
        ));

        describe_module_metrics();

        let handle = server.spawn(router(rpc), self.shutdown.subscribe());
        self.tasks.lock().push(handle);

        self.hooks
            .post_server_start()
            .await
            .map_err(BootstrapError::step("post_server_start"))?;

        if let Some(port) = self.settings.metrics_port {
            install_prometheus(port).map_err(BootstrapError::step("metrics_init"))?;
        }
        self.telemetry.count(metric_names::BOOTSTRAPS, &name);

        self.hooks
            .pre_register()
            .await
            .map_err(BootstrapError::step("pre_register"))?;
        self.advance(BootstrapState::PreRegistered)?;

        // ----- PRE_REGISTERED -> ANNOUNCED -----
        self.transport
            .register_module(RegisterModuleRequest {
                name: name.clone(),
                address: address.clone(),
                health: ServingStatus::NotServing,
                config: None,
            })
            .await
            .map_err(BootstrapError::Announce)?;
        info!(parent: self.telemetry.span(), module = %name, %address, "announced to core");
        self.advance(BootstrapState::Announced)?;

        // ----- ANNOUNCED -> CONFIG_NEGOTIATED -----
        self.hooks
            .on_register()
            .await
            .map_err(BootstrapError::step("on_register"))?;

        if let Some(schema) = self.hooks.config_schema() {
            let defaults = self
                .hooks
                .preprocess_config(schema.defaults())
                .await
                .map_err(BootstrapError::step("preprocess_config"))?;
            let response = self
                .transport
                .register_module(RegisterModuleRequest {
                    name: name.clone(),
                    address: address.clone(),
                    health: ServingStatus::NotServing,
                    config: Some(ConfigDeclaration {
                        schema,
                        defaults: defaults.clone(),
                    }),
                })
                .await
                .map_err(BootstrapError::Negotiation)?;
            self.config
                .apply(response.effective_config.unwrap_or(defaults));
            debug!(parent: self.telemetry.span(), module = %name, "config negotiated");
        }

        let effective = self.config.get();
        if self.config.is_active() {
            self.hooks
                .on_config(&effective)
                .await
                .map_err(BootstrapError::step("on_config"))?;
            publisher
                .publish_routes(&effective)
                .await
                .map_err(BootstrapError::Routes)?;
        } else {
            info!(parent: self.telemetry.span(), module = %name, "module inactive; routes not published");
        }
        self.advance(BootstrapState::ConfigNegotiated)?;
        let _ = negotiated.0.send(true);

        // ----- CONFIG_NEGOTIATED -> SERVING | NOT_SERVING -----
        let status = publisher.rpc.module_health().await;
        let status = match publisher.report(status).await {
            Ok(_) => status,
            Err(err) => {
                warn!(parent: self.telemetry.span(), module = %name, error = %err, "initial health report failed");
                ServingStatus::NotServing
            }
        };
        publisher.settle(status)?;
        *self.publisher.lock() = Some(publisher);
        info!(parent: self.telemetry.span(), module = %name, %status, "bootstrap complete");
        Ok((address, status))
    }

    /// Reports `NOT_SERVING`, stops the RPC server and the config watcher.
    pub async fn shutdown(&self) {
        let publisher = self.publisher.lock().clone();
        if let Some(publisher) = publisher {
            publisher.rpc.set_ready(false);
            if let Err(err) = publisher.report(ServingStatus::NotServing).await {
                warn!(parent: self.telemetry.span(), error = %err, "final health report failed");
            }
        }
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

fn describe_module_metrics() {
    metrics::describe_counter!(metric_names::BOOTSTRAPS, "Module bootstraps started");
    metrics::describe_counter!(metric_names::RELOADS, "Config hot-reloads applied");
}

fn spawn_config_watcher(
    publisher: Publisher,
    mut signals: mpsc::Receiver<BusSignal>,
    mut negotiated: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let negotiated = tokio::select! {
            ready = async { negotiated.wait_for(|done| *done).await.is_ok() } => ready,
            () = stopped(&mut shutdown) => false,
        };
        if !negotiated {
            return;
        }
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(BusSignal::Event(BusEvent::ConfigChanged { .. }) | BusSignal::Lagged(_)) => {
                        publisher.reload().await;
                    }
                    Some(BusSignal::Event(_)) => {}
                    None => {
                        warn!(parent: publisher.telemetry.span(), module = %publisher.name, "config subscription closed");
                        break;
                    }
                },
                () = stopped(&mut shutdown) => break,
            }
        }
    })
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}
