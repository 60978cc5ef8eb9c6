//! Event-bus payloads and topic names.
//!
//! Delivery is at-most-once: a subscriber treats every event as a signal to
//! re-read the source of truth, never as the authoritative value.

use serde::{Deserialize, Serialize};

use crate::health::ServingStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusEvent {
    #[serde(rename_all = "camelCase")]
    ModuleRegistered { module: String, address: String },
    #[serde(rename_all = "camelCase")]
    ModuleRemoved { module: String },
    #[serde(rename_all = "camelCase")]
    HealthChanged {
        module: String,
        status: ServingStatus,
    },
    #[serde(rename_all = "camelCase")]
    ConfigChanged { module: String },
    #[serde(rename_all = "camelCase")]
    RoutesChanged { module: String, version: u64 },
}

impl BusEvent {
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            BusEvent::ModuleRegistered { module, .. }
            | BusEvent::ModuleRemoved { module }
            | BusEvent::HealthChanged { module, .. }
            | BusEvent::ConfigChanged { module }
            | BusEvent::RoutesChanged { module, .. } => module,
        }
    }
}

/// Topic names.
pub mod topics {
    /// Registrations and removals of every module.
    pub const MODULES: &str = "modules";
    /// Config changes of every module.
    pub const CONFIG: &str = "config";
    /// Routing table swaps.
    pub const ROUTES: &str = "routes";

    /// Health transitions of one module.
    #[must_use]
    pub fn health(module: &str) -> String {
        format!("health:{module}")
    }

    /// Config changes of one module.
    #[must_use]
    pub fn config(module: &str) -> String {
        format!("config:{module}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = BusEvent::HealthChanged {
            module: "storage".to_string(),
            status: ServingStatus::Serving,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "healthChanged");
        assert_eq!(json["status"], "SERVING");
        assert_eq!(event.module(), "storage");
    }

    #[test]
    fn topic_names_are_scoped_by_module() {
        assert_eq!(topics::health("auth"), "health:auth");
        assert_eq!(topics::config("auth"), "config:auth");
    }
}
