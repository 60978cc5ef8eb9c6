/// Core-level configuration for registration, routing and dispatch.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Identifier of this core instance, used in logs and docs.
    pub node_id: String,
    /// Path namespaces no module may claim, and module names that are never
    /// prefixed when their routes collide.
    pub reserved_namespaces: Vec<String>,
    /// Default timeout for a gateway call into a module, in milliseconds.
    pub call_timeout_ms: u64,
    /// Maximum number of concurrent gateway calls before load shedding.
    pub max_concurrent_calls: u32,
    /// Interval between reconciliation passes in milliseconds.
    pub reconcile_interval_ms: u64,
    /// Per-topic buffer of the event bus.
    pub bus_capacity: usize,
}

impl CoreConfig {
    /// Whether `name` is a reserved namespace.
    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_namespaces.iter().any(|n| n == name)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            node_id: "conduit-core".to_string(),
            reserved_namespaces: vec!["core".to_string(), "admin".to_string()],
            call_timeout_ms: 30_000,
            max_concurrent_calls: 1000,
            reconcile_interval_ms: 15_000,
            bus_capacity: 64,
        }
    }
}
