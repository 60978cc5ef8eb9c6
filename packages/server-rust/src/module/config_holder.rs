//! Shared holder for a module's effective configuration.
//!
//! Readers take a cheap snapshot; writers swap the whole value and bump a
//! watch channel so handlers can react to hot-reloads.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::watch;

use conduit_core::is_active;

#[derive(Debug)]
pub struct ConfigHolder {
    current: ArcSwap<Value>,
    version: watch::Sender<u64>,
}

impl Default for ConfigHolder {
    fn default() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }
}

impl ConfigHolder {
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            version: watch::channel(0).0,
        }
    }

    #[must_use]
    pub fn get(&self) -> Arc<Value> {
        self.current.load_full()
    }

    /// Replaces the config. Returns `false` if `next` equals the current value.
    pub fn apply(&self, next: Value) -> bool {
        if *self.current.load_full() == next {
            return false;
        }
        self.current.store(Arc::new(next));
        self.version.send_modify(|v| *v += 1);
        true
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        is_active(&self.current.load())
    }

    /// Receiver whose value bumps on every change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn apply_swaps_and_notifies() {
        let holder = ConfigHolder::default();
        let mut changes = holder.changes();
        assert!(holder.apply(json!({"greeting": "hi"})));
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), 1);
        assert_eq!(holder.get()["greeting"], "hi");
    }

    #[test]
    fn identical_value_is_not_a_change() {
        let holder = ConfigHolder::new(json!({"active": false}));
        assert!(!holder.apply(json!({"active": false})));
        assert!(!holder.is_active());
        assert!(holder.apply(json!({"active": true})));
        assert!(holder.is_active());
    }
}
