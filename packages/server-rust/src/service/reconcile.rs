//! Periodic and on-demand reconciliation of registry and routing state.
//!
//! Bus events are at-most-once, so the core never trusts them as the only
//! source of change. On every tick the [`Reconciler`] probes each
//! instance's health callback and re-pulls each serving module's route
//! batch, recompiling when the batch fingerprint moved. Config-change
//! signals request an immediate pass for the affected module.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use conduit_core::messages::{topics, BusEvent};
use conduit_core::ServingStatus;

use super::bus::{BusSignal, EventBus};
use super::client::ModuleClient;
use super::registry::ServiceRegistry;
use super::telemetry::Telemetry;
use super::worker::{BackgroundRunnable, WorkerHandle};
use crate::routing::compiler::fingerprint;
use crate::routing::RouteCompiler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileTask {
    Module(String),
    All,
}

pub struct Reconciler {
    registry: Arc<ServiceRegistry>,
    compiler: Arc<RouteCompiler>,
    client: Arc<dyn ModuleClient>,
    bus: Arc<EventBus>,
    telemetry: Telemetry,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        compiler: Arc<RouteCompiler>,
        client: Arc<dyn ModuleClient>,
        bus: Arc<EventBus>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            registry,
            compiler,
            client,
            bus,
            telemetry,
        }
    }

    async fn reconcile_all(&self) {
        for module in self.registry.module_names() {
            self.reconcile_module(&module).await;
        }
    }

    async fn reconcile_module(&self, module: &str) {
        for address in self.registry.all_addresses(module) {
            let status = match self.client.health(&address).await {
                Ok(status) => status,
                Err(err) => {
                    debug!(parent: self.telemetry.span(), module, %address, error = %err, "health probe failed");
                    ServingStatus::NotServing
                }
            };
            // The module may have been removed while probing.
            let _ = self.registry.set_instance_health(module, &address, status);
        }

        let Some(address) = self.registry.serving_address(module) else {
            return;
        };
        let request = match self.client.routes(&address).await {
            Ok(request) => request,
            Err(err) => {
                debug!(parent: self.telemetry.span(), module, error = %err, "route pull failed");
                return;
            }
        };
        if request.batch.module != module {
            warn!(
                parent: self.telemetry.span(),
                module,
                claimed = %request.batch.module,
                "instance returned another module's routes"
            );
            return;
        }
        // Deregistration removes the module from the registry before the
        // table, so a module still present here cannot be resurrected.
        if !self.registry.contains(module) {
            debug!(parent: self.telemetry.span(), module, "module left during route pull");
            return;
        }

        let current = self
            .compiler
            .snapshot()
            .module(module)
            .map(|compiled| compiled.fingerprint.clone());
        if current.as_deref() != Some(fingerprint(&request.batch).as_str()) {
            info!(parent: self.telemetry.span(), module, "route batch drifted; recompiling");
            self.compiler.compile(request.batch);
        }
    }
}

#[async_trait]
impl BackgroundRunnable for Reconciler {
    type Task = ReconcileTask;

    async fn run(&mut self, task: ReconcileTask) {
        match task {
            ReconcileTask::Module(module) => self.reconcile_module(&module).await,
            ReconcileTask::All => self.reconcile_all().await,
        }
    }

    async fn on_tick(&mut self) {
        self.reconcile_all().await;
        let pruned = self.bus.prune();
        if pruned > 0 {
            debug!(parent: self.telemetry.span(), pruned, "dropped idle bus topics");
        }
    }
}

/// Turns config-change events into reconciliation requests until shutdown.
pub fn spawn_config_listener(
    bus: &EventBus,
    handle: WorkerHandle<ReconcileTask>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = bus.subscribe(topics::CONFIG);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                signal = subscription.recv() => match signal {
                    Some(BusSignal::Event(BusEvent::ConfigChanged { module })) => {
                        handle.request(ReconcileTask::Module(module));
                    }
                    Some(BusSignal::Lagged(_)) => {
                        handle.request(ReconcileTask::All);
                    }
                    Some(BusSignal::Event(_)) => {}
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
