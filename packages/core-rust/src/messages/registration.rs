//! Module registration, health reporting and config RPC payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::health::ServingStatus;
use crate::schema::ConfigSchema;

/// Configuration a module hands over during negotiation.
///
/// `defaults` is the schema's defaults after the module pre-processed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDeclaration {
    pub schema: ConfigSchema,
    pub defaults: Value,
}

/// `RegisterModule(name, address, health, config?)`.
///
/// Announcing sends no config; negotiation repeats the call with one. Both
/// upsert the same instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterModuleRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub health: ServingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterModuleResponse {
    pub name: String,
    /// Present when the request carried a config declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_config: Option<Value>,
}

/// Health signal for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub address: String,
    pub status: ServingStatus,
}

/// `Check(service)` response and the frame type of `Watch(service)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: ServingStatus,
}

/// `GetConfig` / `SetConfig` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    pub module: String,
    pub config: Value,
}

/// One instance as shown by the administrative module list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    pub address: String,
    pub status: ServingStatus,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

/// One module as shown by the administrative module list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetails {
    pub name: String,
    /// Single serving address, if exactly one policy pick applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub addresses: Vec<String>,
    pub serving: bool,
    pub instances: Vec<InstanceDetails>,
}
