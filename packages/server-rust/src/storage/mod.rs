//! Persistence for runtime config overrides.
//!
//! Only the overrides a module accumulated through `SetConfig` patches are
//! persisted; defaults always come from the module itself. The effective
//! config after a core restart is `merge(defaults, persisted override)`.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryOverrideStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbOverrideStore;

/// Durable map of module name -> config override object.
///
/// Used as `Arc<dyn OverrideStore>`.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Loads the override for `module`, `None` if nothing was ever patched.
    async fn load(&self, module: &str) -> anyhow::Result<Option<Value>>;

    /// Replaces the override for `module`.
    async fn store(&self, module: &str, overrides: &Value) -> anyhow::Result<()>;

    /// Drops the override for `module`.
    async fn delete(&self, module: &str) -> anyhow::Result<()>;

    /// Names of every module with a stored override.
    async fn modules(&self) -> anyhow::Result<Vec<String>>;
}
