//! What a module plugs into the bootstrap.
//!
//! Every lifecycle hook has a no-op default so a module overrides only the
//! steps it cares about. Hooks return `anyhow::Result`; an error aborts the
//! bootstrap at that step.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conduit_core::{ConfigSchema, Descriptor, ServingStatus};

use super::config_holder::ConfigHolder;
use super::handlers::HandlerSet;

#[async_trait]
pub trait ModuleHooks: Send + Sync + 'static {
    /// Module name as registered with the core.
    fn name(&self) -> &str;

    /// Configuration schema; `None` skips negotiation.
    fn config_schema(&self) -> Option<ConfigSchema> {
        None
    }

    /// RPC functions served by this module. Handlers read the effective
    /// config through `config`, which hot-reloads in place.
    fn handlers(&self, config: Arc<ConfigHolder>) -> HandlerSet;

    /// Descriptor set published for `config`. Called on every (re)publish.
    fn descriptors(&self, config: &Value) -> Vec<Descriptor>;

    async fn pre_server_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_server_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_register(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_register(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Adjusts schema defaults before they are sent for negotiation.
    async fn preprocess_config(&self, defaults: Value) -> anyhow::Result<Value> {
        Ok(defaults)
    }

    /// Runs with every effective config that leaves the module active.
    async fn on_config(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Module's own view of its health.
    async fn health_check(&self) -> anyhow::Result<ServingStatus> {
        Ok(ServingStatus::Serving)
    }
}
