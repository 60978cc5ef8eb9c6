//! Per-module configuration: negotiation, reads and validated runtime patches.
//!
//! Each snapshot is replaced whole; readers never observe a partially patched
//! config. Patches are serialized so two concurrent patches to the same key
//! resolve in submission order.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{info, warn};

use conduit_core::messages::{topics, BusEvent, ConfigDeclaration, ModuleConfig};
use conduit_core::{merge_config, ConfigSchema, ValidationResult};

use super::bus::EventBus;
use super::telemetry::{names, Telemetry};
use crate::storage::OverrideStore;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config registered for module '{0}'")]
    UnknownModule(String),
    #[error("invalid config for '{module}': {}", errors.join("; "))]
    Validation { module: String, errors: Vec<String> },
    #[error("persisting config for '{module}' failed: {source}")]
    Persistence {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Config state of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub schema: ConfigSchema,
    pub defaults: Value,
    /// Accumulated runtime patches.
    pub overrides: Value,
    /// `merge(defaults, overrides)`.
    pub effective: Value,
}

pub struct ConfigStore {
    snapshots: DashMap<String, ConfigSnapshot>,
    persistence: Arc<dyn OverrideStore>,
    bus: Arc<EventBus>,
    writer: tokio::sync::Mutex<()>,
    telemetry: Telemetry,
}

impl ConfigStore {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn OverrideStore>,
        bus: Arc<EventBus>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            snapshots: DashMap::new(),
            persistence,
            bus,
            writer: tokio::sync::Mutex::new(()),
            telemetry,
        }
    }

    /// Merges the module's declared defaults with its persisted override and
    /// returns the effective config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the defaults do not satisfy the
    /// schema, or [`ConfigError::Persistence`] if the override cannot be read.
    pub async fn negotiate(
        &self,
        module: &str,
        declaration: ConfigDeclaration,
    ) -> Result<Value, ConfigError> {
        if let ValidationResult::Invalid { errors } = declaration.schema.validate(&declaration.defaults)
        {
            return Err(ConfigError::Validation {
                module: module.to_string(),
                errors,
            });
        }

        let _guard = self.writer.lock().await;
        let overrides = self
            .persistence
            .load(module)
            .await
            .map_err(|source| ConfigError::Persistence {
                module: module.to_string(),
                source,
            })?
            .unwrap_or_else(|| json!({}));

        // Leaves the module's current schema no longer accepts are dropped
        // from the stored override; the rest still applies.
        let (overrides, errors) = declaration.schema.retain_valid(&overrides);
        if !errors.is_empty() {
            warn!(
                parent: self.telemetry.span(),
                module,
                ?errors,
                "dropping persisted override keys that no longer match the schema"
            );
            if let Err(err) = self.persistence.store(module, &overrides).await {
                warn!(parent: self.telemetry.span(), module, error = %err, "rewriting pruned override failed");
            }
        }
        let effective = merge_config(&declaration.defaults, &overrides);

        self.snapshots.insert(
            module.to_string(),
            ConfigSnapshot {
                schema: declaration.schema,
                defaults: declaration.defaults,
                overrides,
                effective: effective.clone(),
            },
        );
        info!(parent: self.telemetry.span(), module, "config negotiated");
        Ok(effective)
    }

    /// Effective config of `module`.
    #[must_use]
    pub fn get(&self, module: &str) -> Option<Value> {
        self.snapshots.get(module).map(|s| s.effective.clone())
    }

    #[must_use]
    pub fn snapshot(&self, module: &str) -> Option<ConfigSnapshot> {
        self.snapshots.get(module).map(|s| s.clone())
    }

    /// Effective config of every module, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ModuleConfig> {
        let mut configs: Vec<ModuleConfig> = self
            .snapshots
            .iter()
            .map(|s| ModuleConfig {
                module: s.key().clone(),
                config: s.effective.clone(),
            })
            .collect();
        configs.sort_by(|a, b| a.module.cmp(&b.module));
        configs
    }

    /// Applies a partial update. On any validation error the previous config
    /// stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownModule`], [`ConfigError::Validation`] or
    /// [`ConfigError::Persistence`]. Nothing changes in any of these cases.
    pub async fn patch(&self, module: &str, patch: &Value) -> Result<Value, ConfigError> {
        let guard = self.writer.lock().await;
        let current = self
            .snapshot(module)
            .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))?;

        let candidate = merge_config(&current.effective, patch);
        let mut errors = Vec::new();
        if let ValidationResult::Invalid { errors: e } = current.schema.validate(patch) {
            errors.extend(e);
        }
        if errors.is_empty() {
            if let ValidationResult::Invalid { errors: e } = current.schema.validate(&candidate) {
                errors.extend(e);
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation {
                module: module.to_string(),
                errors,
            });
        }

        let overrides = merge_config(&current.overrides, patch);
        self.persistence
            .store(module, &overrides)
            .await
            .map_err(|source| ConfigError::Persistence {
                module: module.to_string(),
                source,
            })?;

        self.snapshots.insert(
            module.to_string(),
            ConfigSnapshot {
                overrides,
                effective: candidate.clone(),
                ..current
            },
        );
        drop(guard);

        self.telemetry.count(names::CONFIG_PATCHES, module);
        info!(parent: self.telemetry.span(), module, "config patched");
        let event = BusEvent::ConfigChanged {
            module: module.to_string(),
        };
        self.bus.publish(&topics::config(module), event.clone());
        self.bus.publish(topics::CONFIG, event);
        Ok(candidate)
    }

    /// Drops the in-memory snapshot. The persisted override is kept so a
    /// returning module gets it back.
    pub fn forget(&self, module: &str) -> bool {
        self.snapshots.remove(module).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
