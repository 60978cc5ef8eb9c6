use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::OverrideStore;

/// Non-durable store. Overrides are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    entries: DashMap<String, Value>,
}

impl MemoryOverrideStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn load(&self, module: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.get(module).map(|v| v.clone()))
    }

    async fn store(&self, module: &str, overrides: &Value) -> anyhow::Result<()> {
        self.entries.insert(module.to_string(), overrides.clone());
        Ok(())
    }

    async fn delete(&self, module: &str) -> anyhow::Result<()> {
        self.entries.remove(module);
        Ok(())
    }

    async fn modules(&self) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
