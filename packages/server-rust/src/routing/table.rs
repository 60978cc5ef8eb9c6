//! Immutable routing table snapshot.
//!
//! A table is built aside by the compiler and published with one atomic
//! swap. Dispatchers hold an `Arc<RoutingTable>` for the whole request, so
//! a request that started against version N finishes against version N.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use conduit_core::messages::Rejection;
use conduit_core::{
    extract_params, Action, GeneratedProto, MiddlewareDescriptor, ProxyDescriptor,
    RouteDescriptor, RouteTrie, SocketDescriptor,
};

use super::surface::graphql::GraphqlProjection;

/// A route as published: the descriptor plus the path it is reachable at.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub module: String,
    /// Declared path, or `/{module}{path}` after a cross-module collision.
    pub public_path: String,
    pub descriptor: RouteDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEntry {
    pub module: String,
    pub public_path: String,
    pub descriptor: ProxyDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketEntry {
    pub module: String,
    pub public_path: String,
    pub descriptor: SocketDescriptor,
}

/// What a REST request resolves to.
#[derive(Debug, Clone)]
pub enum Target {
    Route(Arc<RouteEntry>),
    Proxy(Arc<ProxyEntry>),
}

impl Target {
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Target::Route(entry) => &entry.module,
            Target::Proxy(entry) => &entry.module,
        }
    }

    #[must_use]
    pub fn public_path(&self) -> &str {
        match self {
            Target::Route(entry) => &entry.public_path,
            Target::Proxy(entry) => &entry.public_path,
        }
    }

    #[must_use]
    pub fn middlewares(&self) -> &[String] {
        match self {
            Target::Route(entry) => entry.descriptor.middlewares(),
            Target::Proxy(entry) => &entry.descriptor.middlewares,
        }
    }
}

/// A resolved request: target plus the url parameters bound from the path.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub target: Target,
    pub url_params: BTreeMap<String, String>,
}

/// Everything compiled from one module's last batch.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub name: String,
    pub routes: Vec<Arc<RouteEntry>>,
    pub proxies: Vec<Arc<ProxyEntry>>,
    pub sockets: Vec<Arc<SocketEntry>>,
    pub middlewares: Vec<MiddlewareDescriptor>,
    pub rejected: Vec<Rejection>,
    pub proto: GeneratedProto,
    pub graphql: GraphqlProjection,
    /// blake3 of the batch the module sent.
    pub fingerprint: String,
}

impl CompiledModule {
    #[must_use]
    pub fn middleware(&self, name: &str) -> Option<&MiddlewareDescriptor> {
        self.middlewares.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn accepted(&self) -> usize {
        self.routes.len() + self.proxies.len() + self.sockets.len() + self.middlewares.len()
    }
}

/// Route key inside the target map.
pub(crate) type RouteKey = (Action, String);

/// One published version of the routing state.
#[derive(Debug, Default)]
pub struct RoutingTable {
    pub(crate) version: u64,
    pub(crate) modules: BTreeMap<String, Arc<CompiledModule>>,
    pub(crate) trie: RouteTrie,
    pub(crate) targets: HashMap<RouteKey, Target>,
    pub(crate) sockets: HashMap<String, Arc<SocketEntry>>,
}

impl RoutingTable {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Monotonic version, bumped by every compilation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Arc<CompiledModule>> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<CompiledModule>> {
        self.modules.values()
    }

    /// Number of `(action, path)` routes including proxies.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.trie.len()
    }

    /// Whether any action is routed at `path`.
    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.trie.contains_path(path)
    }

    /// Resolves a concrete request to its target and url parameters.
    #[must_use]
    pub fn resolve(&self, action: Action, path: &str) -> Option<Resolved> {
        let pattern = self.trie.find(action, path)?;
        let target = self.targets.get(&(action, pattern.to_string()))?.clone();
        let url_params = extract_params(pattern, path).into_iter().collect();
        Some(Resolved { target, url_params })
    }

    /// Socket descriptor served at `path`.
    #[must_use]
    pub fn socket(&self, path: &str) -> Option<&Arc<SocketEntry>> {
        self.sockets.get(&normalize(path))
    }

    /// Looks up a middleware referenced by a route of `owner`.
    ///
    /// `module.name` addresses another module's middleware; a bare name
    /// refers to the owner's own.
    #[must_use]
    pub fn middleware(&self, owner: &str, reference: &str) -> Option<&MiddlewareDescriptor> {
        let (module, name) = reference.split_once('.').unwrap_or((owner, reference));
        self.modules.get(module)?.middleware(name)
    }
}

/// Canonical form of a path for exact-match maps: leading slash, no
/// trailing or repeated slashes.
#[must_use]
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
