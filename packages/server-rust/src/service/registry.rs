//! Directory of registered modules and their instances.
//!
//! One module name maps to one or more instances keyed by address. The
//! module's aggregate health is recomputed on every instance change and
//! pushed into the [`HealthService`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::info;

use conduit_core::messages::{topics, BusEvent, InstanceDetails, ModuleDetails};
use conduit_core::ServingStatus;

use super::bus::EventBus;
use super::health::HealthService;
use super::telemetry::{names, Telemetry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors from instance-level updates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{0}' is not registered")]
    UnknownModule(String),
    #[error("module '{module}' has no instance at {address}")]
    UnknownInstance { module: String, address: String },
}

/// One running copy of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInstance {
    pub address: String,
    pub status: ServingStatus,
    /// Milliseconds since the Unix epoch of the last report.
    pub updated_at: u64,
}

/// A module and its instances in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModule {
    pub name: String,
    pub instances: Vec<ModuleInstance>,
    cursor: usize,
}

impl RegisteredModule {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instances: Vec::new(),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn status(&self) -> ServingStatus {
        ServingStatus::aggregate(self.instances.iter().map(|i| i.status))
    }

    fn serving(&self) -> impl Iterator<Item = &ModuleInstance> {
        self.instances.iter().filter(|i| i.status.is_serving())
    }

    #[must_use]
    pub fn details(&self) -> ModuleDetails {
        ModuleDetails {
            name: self.name.clone(),
            address: self.serving().next().map(|i| i.address.clone()),
            addresses: self.instances.iter().map(|i| i.address.clone()).collect(),
            serving: self.status().is_serving(),
            instances: self
                .instances
                .iter()
                .map(|i| InstanceDetails {
                    address: i.address.clone(),
                    status: i.status,
                    updated_at: i.updated_at,
                })
                .collect(),
        }
    }
}

/// What an upsert changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    pub new_module: bool,
    pub new_instance: bool,
    pub status: ServingStatus,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Module name -> instances.
pub struct ServiceRegistry {
    modules: DashMap<String, RegisteredModule>,
    health: Arc<HealthService>,
    bus: Arc<EventBus>,
    telemetry: Telemetry,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(health: Arc<HealthService>, bus: Arc<EventBus>, telemetry: Telemetry) -> Self {
        Self {
            modules: DashMap::new(),
            health,
            bus,
            telemetry,
        }
    }

    /// Inserts or refreshes the instance of `name` at `address`.
    ///
    /// Re-registering the same `(name, address)` pair only updates the status.
    pub fn update_module(&self, name: &str, address: &str, status: ServingStatus) -> Upsert {
        let (new_module, new_instance, aggregate) = {
            let mut new_module = false;
            let mut entry = self.modules.entry(name.to_string()).or_insert_with(|| {
                new_module = true;
                RegisteredModule::new(name)
            });
            let updated_at = now_ms();
            let new_instance = match entry.instances.iter_mut().find(|i| i.address == address) {
                Some(instance) => {
                    instance.status = status;
                    instance.updated_at = updated_at;
                    false
                }
                None => {
                    entry.instances.push(ModuleInstance {
                        address: address.to_string(),
                        status,
                        updated_at,
                    });
                    true
                }
            };
            let aggregate = entry.status();
            // Published under the entry lock so concurrent updates reach the
            // health service in the order they hit the registry.
            self.health.set(name, aggregate);
            (new_module, new_instance, aggregate)
        };

        self.telemetry.count(names::REGISTRATIONS, name);
        if new_instance {
            info!(
                parent: self.telemetry.span(),
                module = name,
                address,
                "module instance registered"
            );
            self.bus.publish(
                topics::MODULES,
                BusEvent::ModuleRegistered {
                    module: name.to_string(),
                    address: address.to_string(),
                },
            );
        }
        Upsert {
            new_module,
            new_instance,
            status: aggregate,
        }
    }

    /// Records a health report for one existing instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the module or instance is unknown.
    pub fn set_instance_health(
        &self,
        name: &str,
        address: &str,
        status: ServingStatus,
    ) -> Result<ServingStatus, RegistryError> {
        let aggregate = {
            let mut entry = self
                .modules
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownModule(name.to_string()))?;
            let instance = entry
                .instances
                .iter_mut()
                .find(|i| i.address == address)
                .ok_or_else(|| RegistryError::UnknownInstance {
                    module: name.to_string(),
                    address: address.to_string(),
                })?;
            instance.status = status;
            instance.updated_at = now_ms();
            let aggregate = entry.status();
            self.health.set(name, aggregate);
            aggregate
        };
        Ok(aggregate)
    }

    /// Removes `name` with all its instances.
    pub fn remove_module(&self, name: &str) -> Option<RegisteredModule> {
        let (_, removed) = self.modules.remove(name)?;
        self.health.forget(name);
        info!(parent: self.telemetry.span(), module = name, "module removed");
        self.bus.publish(
            topics::MODULES,
            BusEvent::ModuleRemoved {
                module: name.to_string(),
            },
        );
        Some(removed)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<RegisteredModule> {
        self.modules.get(name).map(|m| m.clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }

    /// Picks the next serving instance of `name`, round robin.
    #[must_use]
    pub fn serving_address(&self, name: &str) -> Option<String> {
        let mut entry = self.modules.get_mut(name)?;
        let serving: Vec<String> = entry.serving().map(|i| i.address.clone()).collect();
        if serving.is_empty() {
            return None;
        }
        let index = entry.cursor % serving.len();
        entry.cursor = entry.cursor.wrapping_add(1);
        serving.into_iter().nth(index)
    }

    /// Every instance address of `name`, in registration order.
    #[must_use]
    pub fn all_addresses(&self, name: &str) -> Vec<String> {
        self.modules
            .get(name)
            .map(|m| m.instances.iter().map(|i| i.address.clone()).collect())
            .unwrap_or_default()
    }

    /// Details of every module, sorted by name.
    #[must_use]
    pub fn module_details(&self) -> Vec<ModuleDetails> {
        let mut details: Vec<ModuleDetails> =
            self.modules.iter().map(|m| m.value().details()).collect();
        details.sort_by(|a, b| a.name.cmp(&b.name));
        details
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::bus::BusSignal;

    fn registry() -> (ServiceRegistry, Arc<HealthService>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(16, Telemetry::detached()));
        let health = Arc::new(HealthService::new(Arc::clone(&bus), Telemetry::detached()));
        let registry = ServiceRegistry::new(
            Arc::clone(&health),
            Arc::clone(&bus),
            Telemetry::detached(),
        );
        (registry, health, bus)
    }

    #[test]
    fn reregistration_is_idempotent() {
        let (registry, _, _) = registry();
        let first = registry.update_module("auth", "10.0.0.1:5000", ServingStatus::Unknown);
        let second = registry.update_module("auth", "10.0.0.1:5000", ServingStatus::Serving);

        assert!(first.new_module && first.new_instance);
        assert!(!second.new_module && !second.new_instance);
        assert_eq!(registry.get("auth").unwrap().instances.len(), 1);
    }

    #[test]
    fn two_instances_then_removal() {
        let (registry, health, _) = registry();
        registry.update_module("auth", "a:1", ServingStatus::Serving);
        registry.update_module("auth", "b:2", ServingStatus::Serving);

        let details = registry.module_details();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].addresses, vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(details[0].address.as_deref(), Some("a:1"));
        assert!(details[0].serving);

        registry.remove_module("auth");
        assert!(registry.get("auth").is_none());
        assert!(registry.all_addresses("auth").is_empty());
        assert_eq!(health.check("auth"), ServingStatus::ServiceUnknown);
    }

    #[test]
    fn aggregate_health_follows_instances() {
        let (registry, health, _) = registry();
        registry.update_module("auth", "a:1", ServingStatus::Serving);
        registry.update_module("auth", "b:2", ServingStatus::NotServing);
        assert_eq!(health.check("auth"), ServingStatus::Serving);

        registry
            .set_instance_health("auth", "a:1", ServingStatus::NotServing)
            .unwrap();
        assert_eq!(health.check("auth"), ServingStatus::NotServing);
    }

    #[test]
    fn concurrent_reports_leave_health_matching_registry() {
        let (registry, health, _) = registry();
        let registry = Arc::new(registry);
        registry.update_module("auth", "a:1", ServingStatus::Serving);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let status = if (worker + round) % 2 == 0 {
                            ServingStatus::Serving
                        } else {
                            ServingStatus::NotServing
                        };
                        if round % 3 == 0 {
                            registry.update_module("auth", "a:1", status);
                        } else {
                            registry.set_instance_health("auth", "a:1", status).unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(health.check("auth"), registry.get("auth").unwrap().status());
    }

    #[test]
    fn unknown_instance_health_report_is_rejected() {
        let (registry, _, _) = registry();
        assert_eq!(
            registry.set_instance_health("auth", "a:1", ServingStatus::Serving),
            Err(RegistryError::UnknownModule("auth".to_string()))
        );
        registry.update_module("auth", "a:1", ServingStatus::Serving);
        assert!(matches!(
            registry.set_instance_health("auth", "z:9", ServingStatus::Serving),
            Err(RegistryError::UnknownInstance { .. })
        ));
    }

    #[test]
    fn serving_address_round_robins_over_serving_instances() {
        let (registry, _, _) = registry();
        registry.update_module("auth", "a:1", ServingStatus::Serving);
        registry.update_module("auth", "b:2", ServingStatus::NotServing);
        registry.update_module("auth", "c:3", ServingStatus::Serving);

        let picks: Vec<String> = (0..4)
            .filter_map(|_| registry.serving_address("auth"))
            .collect();
        assert_eq!(picks, vec!["a:1", "c:3", "a:1", "c:3"]);
    }

    #[test]
    fn no_serving_instance_means_no_address() {
        let (registry, _, _) = registry();
        registry.update_module("auth", "a:1", ServingStatus::Unknown);
        assert_eq!(registry.serving_address("auth"), None);
        assert_eq!(registry.module_details()[0].address, None);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let (registry, _, bus) = registry();
        let mut sub = bus.subscribe(topics::MODULES);

        registry.update_module("auth", "a:1", ServingStatus::Unknown);
        registry.update_module("auth", "a:1", ServingStatus::Serving);
        registry.remove_module("auth");

        assert!(matches!(
            sub.recv().await,
            Some(BusSignal::Event(BusEvent::ModuleRegistered { .. }))
        ));
        assert!(matches!(
            sub.recv().await,
            Some(BusSignal::Event(BusEvent::ModuleRemoved { .. }))
        ));
    }
}
