//! Control-plane services of the core.
//!
//! 1. **Registry** (`registry`, `health`): module instances and their health
//! 2. **Configuration** (`config_store`): schema-validated per-module config
//! 3. **Bus** (`bus`): change notifications for watchers
//! 4. **Control** (`control`): the operations handlers call into
//! 5. **Background workers** (`worker`, `reconcile`): periodic reconciliation

pub mod bus;
pub mod client;
pub mod config;
pub mod config_store;
pub mod control;
pub mod health;
pub mod reconcile;
pub mod registry;
pub mod telemetry;
pub mod worker;

pub use bus::{BusSignal, BusSubscription, EventBus};
pub use client::{HttpModuleClient, ModuleClient};
pub use config::CoreConfig;
pub use config_store::{ConfigError, ConfigStore};
pub use control::{ControlError, CoreState};
pub use health::HealthService;
pub use reconcile::{spawn_config_listener, ReconcileTask, Reconciler};
pub use registry::ServiceRegistry;
pub use telemetry::Telemetry;
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerHandle};
