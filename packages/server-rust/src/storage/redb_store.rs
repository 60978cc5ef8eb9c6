//! redb-backed override store.
//!
//! Each override is one row of the `config_overrides` table holding the JSON
//! text of the object. redb transactions are blocking, so every call runs on
//! the blocking pool.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use super::OverrideStore;

const OVERRIDES: TableDefinition<&str, &str> = TableDefinition::new("config_overrides");

pub struct RedbOverrideStore {
    db: Arc<Database>,
}

impl RedbOverrideStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the table cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("opening override store at {}", path.display()))?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(OVERRIDES)?;
        }
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl OverrideStore for RedbOverrideStore {
    async fn load(&self, module: &str) -> anyhow::Result<Option<Value>> {
        let module = module.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OVERRIDES)?;
            let Some(raw) = table.get(module.as_str())? else {
                return Ok(None);
            };
            let value = serde_json::from_str(raw.value())
                .with_context(|| format!("stored override for '{module}' is not valid JSON"))?;
            Ok(Some(value))
        })
        .await
    }

    async fn store(&self, module: &str, overrides: &Value) -> anyhow::Result<()> {
        let module = module.to_string();
        let json = serde_json::to_string(overrides)?;
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(OVERRIDES)?;
                table.insert(module.as_str(), json.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, module: &str) -> anyhow::Result<()> {
        let module = module.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(OVERRIDES)?;
                table.remove(module.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn modules(&self) -> anyhow::Result<Vec<String>> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OVERRIDES)?;
            let mut names = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                names.push(key.value().to_string());
            }
            Ok(names)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn overrides_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.redb");

        {
            let store = RedbOverrideStore::open(&path).unwrap();
            store
                .store("storage", &json!({"provider": "s3"}))
                .await
                .unwrap();
        }

        let store = RedbOverrideStore::open(&path).unwrap();
        assert_eq!(
            store.load("storage").await.unwrap(),
            Some(json!({"provider": "s3"}))
        );
        assert_eq!(store.modules().await.unwrap(), vec!["storage".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbOverrideStore::open(dir.path().join("o.redb")).unwrap();
        store.store("auth", &json!({"a": 1})).await.unwrap();
        store.delete("auth").await.unwrap();
        assert_eq!(store.load("auth").await.unwrap(), None);
    }
}
