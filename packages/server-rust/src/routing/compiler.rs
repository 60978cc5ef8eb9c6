//! Route compilation.
//!
//! Writers are serialized; each compilation builds a complete new
//! [`RoutingTable`] aside and publishes it with one atomic swap. Readers
//! never block and never see a half-built table. Compiled state of modules
//! other than the one being recompiled is carried over by `Arc`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, warn};

use conduit_core::messages::{topics, BusEvent, RegisterRoutesResponse, Rejection};
use conduit_core::{Action, Descriptor, ProtoGenerator, RouteBatch};

use super::surface::graphql;
use super::table::{
    normalize, CompiledModule, ProxyEntry, RouteEntry, RoutingTable, SocketEntry, Target,
};
use crate::service::bus::EventBus;
use crate::service::config::CoreConfig;
use crate::service::telemetry::{names, Telemetry};

/// blake3 fingerprint of a batch, used to skip no-op recompilations.
#[must_use]
pub fn fingerprint(batch: &RouteBatch) -> String {
    let bytes = serde_json::to_vec(&batch.descriptors).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

pub struct RouteCompiler {
    table: ArcSwap<RoutingTable>,
    writer: Mutex<()>,
    reserved: Vec<String>,
    proto: ProtoGenerator,
    bus: Arc<EventBus>,
    telemetry: Telemetry,
}

impl RouteCompiler {
    #[must_use]
    pub fn new(
        config: &CoreConfig,
        proto: ProtoGenerator,
        bus: Arc<EventBus>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::empty()),
            writer: Mutex::new(()),
            reserved: config.reserved_namespaces.clone(),
            proto,
            bus,
            telemetry,
        }
    }

    /// Current table. Hold the returned `Arc` for the whole request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Replaces the descriptor set of `batch.module` and publishes a new table.
    pub fn compile(&self, batch: RouteBatch) -> RegisterRoutesResponse {
        let module = batch.module.clone();
        let print = fingerprint(&batch);

        let guard = self.writer.lock();
        let current = self.table.load_full();
        let version = current.version + 1;
        let mut builder = TableBuilder::new(&self.reserved, &self.telemetry);
        for (name, compiled) in &current.modules {
            if *name != module {
                builder.carry(Arc::clone(compiled));
            }
        }
        let compiled = builder.compile_module(batch, &self.proto, print);
        let response = RegisterRoutesResponse {
            module: module.clone(),
            accepted: compiled.accepted(),
            rejected: compiled.rejected.clone(),
            version,
        };
        builder.insert(Arc::new(compiled));
        self.table.store(Arc::new(builder.finish(version)));
        drop(guard);

        self.telemetry.count(names::COMPILATIONS, &module);
        if !response.rejected.is_empty() {
            self.telemetry
                .count_n(names::REJECTIONS, &module, response.rejected.len() as u64);
            for rejection in &response.rejected {
                warn!(
                    parent: self.telemetry.span(),
                    module = %module,
                    descriptor = %rejection.descriptor,
                    reason = %rejection.reason,
                    "descriptor rejected"
                );
            }
        }
        info!(
            parent: self.telemetry.span(),
            module = %module,
            accepted = response.accepted,
            rejected = response.rejected.len(),
            version,
            "routes compiled"
        );
        self.bus
            .publish(topics::ROUTES, BusEvent::RoutesChanged { module, version });
        response
    }

    /// Drops every route of `module`. Returns whether it had any.
    pub fn remove(&self, module: &str) -> bool {
        let guard = self.writer.lock();
        let current = self.table.load_full();
        if !current.modules.contains_key(module) {
            return false;
        }
        let version = current.version + 1;
        let mut builder = TableBuilder::new(&self.reserved, &self.telemetry);
        for (name, compiled) in &current.modules {
            if name != module {
                builder.carry(Arc::clone(compiled));
            }
        }
        self.table.store(Arc::new(builder.finish(version)));
        drop(guard);

        info!(parent: self.telemetry.span(), module, version, "routes removed");
        self.bus.publish(
            topics::ROUTES,
            BusEvent::RoutesChanged {
                module: module.to_string(),
                version,
            },
        );
        true
    }
}

// ---------------------------------------------------------------------------
// TableBuilder
// ---------------------------------------------------------------------------

struct TableBuilder<'a> {
    reserved: &'a [String],
    telemetry: &'a Telemetry,
    table: RoutingTable,
}

impl<'a> TableBuilder<'a> {
    fn new(reserved: &'a [String], telemetry: &'a Telemetry) -> Self {
        Self {
            reserved,
            telemetry,
            table: RoutingTable::empty(),
        }
    }

    /// Re-indexes an already compiled module.
    fn carry(&mut self, compiled: Arc<CompiledModule>) {
        for entry in &compiled.routes {
            let action = entry.descriptor.action();
            self.index(action, &entry.public_path, Target::Route(Arc::clone(entry)));
        }
        for entry in &compiled.proxies {
            let action = entry.descriptor.action;
            self.index(action, &entry.public_path, Target::Proxy(Arc::clone(entry)));
        }
        for entry in &compiled.sockets {
            self.table
                .sockets
                .insert(normalize(&entry.public_path), Arc::clone(entry));
        }
        self.insert(compiled);
    }

    fn index(&mut self, action: Action, path: &str, target: Target) {
        match self.table.trie.insert(action, path) {
            Ok(()) => {
                self.table.targets.insert((action, path.to_string()), target);
            }
            Err(conflict) => warn!(
                parent: self.telemetry.span(),
                %conflict,
                "carried route no longer fits; dropped"
            ),
        }
    }

    fn insert(&mut self, compiled: Arc<CompiledModule>) {
        self.table.modules.insert(compiled.name.clone(), compiled);
    }

    fn finish(mut self, version: u64) -> RoutingTable {
        self.table.version = version;
        self.table
    }

    fn reserved_namespace(&self, module: &str, path: &str) -> Option<&str> {
        let first = path.split('/').find(|s| !s.is_empty())?;
        self.reserved
            .iter()
            .find(|ns| ns.as_str() == first && ns.as_str() != module)
            .map(String::as_str)
    }

    fn is_reserved_module(&self, module: &str) -> bool {
        self.reserved.iter().any(|ns| ns == module)
    }

    /// Finds the public path for a route of `module`, inserting it into the trie.
    fn claim_route(&mut self, module: &str, action: Action, path: &str) -> Result<String, String> {
        if let Some(ns) = self.reserved_namespace(module, path) {
            return Err(format!("path is inside reserved namespace '/{ns}'"));
        }
        let conflict = match self.table.trie.insert(action, path) {
            Ok(()) => return Ok(path.to_string()),
            Err(conflict) => conflict,
        };
        let owner = self
            .table
            .targets
            .get(&(action, conflict.existing.clone()))
            .map_or(module, Target::module)
            .to_string();
        if owner == module {
            return Err(format!("duplicate of {action} {}", conflict.existing));
        }
        if self.is_reserved_module(module) {
            return Err(format!(
                "collides with {action} {} of module '{owner}'",
                conflict.existing
            ));
        }
        let prefixed = prefixed_path(module, path);
        self.table
            .trie
            .insert(action, &prefixed)
            .map(|()| prefixed)
            .map_err(|again| {
                format!(
                    "collides with {action} {} even after prefixing",
                    again.existing
                )
            })
    }

    fn claim_socket(&self, module: &str, path: &str) -> Result<String, String> {
        if let Some(ns) = self.reserved_namespace(module, path) {
            return Err(format!("path is inside reserved namespace '/{ns}'"));
        }
        let key = normalize(path);
        let Some(existing) = self.table.sockets.get(&key) else {
            return Ok(key);
        };
        if existing.module == module {
            return Err(format!("duplicate socket {key}"));
        }
        if self.is_reserved_module(module) {
            return Err(format!(
                "collides with socket {key} of module '{}'",
                existing.module
            ));
        }
        let prefixed = normalize(&prefixed_path(module, path));
        if self.table.sockets.contains_key(&prefixed) {
            return Err(format!("socket {prefixed} already exists"));
        }
        Ok(prefixed)
    }

    fn compile_module(
        &mut self,
        batch: RouteBatch,
        proto: &ProtoGenerator,
        fingerprint: String,
    ) -> CompiledModule {
        let module = batch.module;
        let mut routes = Vec::new();
        let mut proxies = Vec::new();
        let mut sockets = Vec::new();
        let mut middlewares: Vec<conduit_core::MiddlewareDescriptor> = Vec::new();
        let mut rejected = Vec::new();
        let mut accepted: Vec<Descriptor> = Vec::new();

        for descriptor in batch.descriptors {
            let label = describe(&descriptor);
            let reject = |reason: String| Rejection {
                descriptor: label.clone(),
                reason,
            };
            if descriptor.module() != module {
                rejected.push(reject(format!(
                    "declared by module '{}'",
                    descriptor.module()
                )));
                continue;
            }
            if let Err(err) = descriptor.validate() {
                rejected.push(reject(err.to_string()));
                continue;
            }

            match &descriptor {
                Descriptor::Route(route) => {
                    match self.claim_route(&module, route.action(), route.path()) {
                        Ok(public_path) => {
                            let entry = Arc::new(RouteEntry {
                                module: module.clone(),
                                public_path: public_path.clone(),
                                descriptor: route.clone(),
                            });
                            self.table.targets.insert(
                                (route.action(), public_path),
                                Target::Route(Arc::clone(&entry)),
                            );
                            routes.push(entry);
                        }
                        Err(reason) => {
                            rejected.push(reject(reason));
                            continue;
                        }
                    }
                }
                Descriptor::Proxy(proxy) => match self.claim_route(&module, proxy.action, &proxy.path)
                {
                    Ok(public_path) => {
                        let entry = Arc::new(ProxyEntry {
                            module: module.clone(),
                            public_path: public_path.clone(),
                            descriptor: proxy.clone(),
                        });
                        self.table
                            .targets
                            .insert((proxy.action, public_path), Target::Proxy(Arc::clone(&entry)));
                        proxies.push(entry);
                    }
                    Err(reason) => {
                        rejected.push(reject(reason));
                        continue;
                    }
                },
                Descriptor::Socket(socket) => match self.claim_socket(&module, socket.path()) {
                    Ok(public_path) => {
                        let entry = Arc::new(SocketEntry {
                            module: module.clone(),
                            public_path: public_path.clone(),
                            descriptor: socket.clone(),
                        });
                        self.table.sockets.insert(public_path, Arc::clone(&entry));
                        sockets.push(entry);
                    }
                    Err(reason) => {
                        rejected.push(reject(reason));
                        continue;
                    }
                },
                Descriptor::Middleware(middleware) => {
                    if middlewares.iter().any(|m| m.name == middleware.name) {
                        rejected.push(reject(format!("duplicate middleware '{}'", middleware.name)));
                        continue;
                    }
                    middlewares.push(middleware.clone());
                }
            }
            accepted.push(descriptor);
        }

        let graphql = graphql::project(&routes);
        CompiledModule {
            proto: proto.generate(&module, &accepted),
            name: module,
            routes,
            proxies,
            sockets,
            middlewares,
            rejected,
            graphql,
            fingerprint,
        }
    }
}

fn prefixed_path(module: &str, path: &str) -> String {
    if path == "/" {
        format!("/{module}")
    } else {
        format!("/{module}{path}")
    }
}

fn describe(descriptor: &Descriptor) -> String {
    match descriptor {
        Descriptor::Route(route) => format!("{} {}", route.action(), route.path()),
        Descriptor::Proxy(proxy) => format!("proxy {} {}", proxy.action, proxy.path),
        Descriptor::Socket(socket) => format!("socket {}", socket.path()),
        Descriptor::Middleware(middleware) => format!("middleware {}", middleware.name),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use conduit_core::{
        MiddlewareDescriptor, ProxyDescriptor, RouteDescriptor, SocketDescriptor, SocketEvent,
    };

    use super::*;
    use crate::service::bus::BusSignal;

    fn compiler() -> (RouteCompiler, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64, Telemetry::detached()));
        let compiler = RouteCompiler::new(
            &CoreConfig::default(),
            ProtoGenerator::default(),
            Arc::clone(&bus),
            Telemetry::detached(),
        );
        (compiler, bus)
    }

    fn route(module: &str, action: &str, path: &str, handler: &str) -> Descriptor {
        RouteDescriptor::builder(module, path, action, handler)
            .build()
            .unwrap()
            .into()
    }

    fn batch(module: &str, descriptors: Vec<Descriptor>) -> RouteBatch {
        RouteBatch::new(module, descriptors)
    }

    #[test]
    fn compiled_routes_resolve_with_params() {
        let (compiler, _) = compiler();
        let response = compiler.compile(batch(
            "users",
            vec![route("users", "GET", "/users/:id", "getUser")],
        ));
        assert!(response.is_clean());
        assert_eq!(response.accepted, 1);
        assert_eq!(response.version, 1);

        let table = compiler.snapshot();
        let resolved = table.resolve(Action::Get, "/users/42").unwrap();
        assert_eq!(resolved.target.module(), "users");
        assert_eq!(resolved.url_params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn reserved_namespace_is_rejected() {
        let (compiler, _) = compiler();
        let response = compiler.compile(batch(
            "users",
            vec![
                route("users", "GET", "/admin/users", "list"),
                route("users", "GET", "/users", "list"),
            ],
        ));
        assert_eq!(response.accepted, 1);
        assert_eq!(response.rejected.len(), 1);
        assert!(response.rejected[0].reason.contains("reserved namespace"));
        assert!(compiler.snapshot().resolve(Action::Get, "/admin/users").is_none());
    }

    #[test]
    fn cross_module_collision_gets_prefixed() {
        let (compiler, _) = compiler();
        compiler.compile(batch("a", vec![route("a", "GET", "/items", "listA")]));
        let response = compiler.compile(batch("b", vec![route("b", "GET", "/items", "listB")]));
        assert!(response.is_clean());

        let table = compiler.snapshot();
        assert_eq!(table.resolve(Action::Get, "/items").unwrap().target.module(), "a");
        let prefixed = table.resolve(Action::Get, "/b/items").unwrap();
        assert_eq!(prefixed.target.module(), "b");
        assert_eq!(prefixed.target.public_path(), "/b/items");
    }

    #[test]
    fn reserved_module_is_never_prefixed() {
        let (compiler, _) = compiler();
        compiler.compile(batch("users", vec![route("users", "GET", "/status", "s")]));
        let response = compiler.compile(batch("core", vec![route("core", "GET", "/status", "s")]));
        assert_eq!(response.accepted, 0);
        assert!(compiler.snapshot().resolve(Action::Get, "/core/status").is_none());
    }

    #[test]
    fn same_module_duplicate_is_rejected() {
        let (compiler, _) = compiler();
        let response = compiler.compile(batch(
            "users",
            vec![
                route("users", "GET", "/users/:id", "a"),
                route("users", "GET", "/users/:userId", "b"),
            ],
        ));
        assert_eq!(response.accepted, 1);
        assert!(response.rejected[0].reason.contains("duplicate"));
    }

    #[test]
    fn foreign_descriptor_is_rejected() {
        let (compiler, _) = compiler();
        let response = compiler.compile(batch("users", vec![route("files", "GET", "/f", "f")]));
        assert_eq!(response.accepted, 0);
        assert!(response.rejected[0].reason.contains("declared by module"));
    }

    #[test]
    fn recompilation_replaces_previous_set() {
        let (compiler, _) = compiler();
        compiler.compile(batch("users", vec![route("users", "GET", "/old", "old")]));
        compiler.compile(batch("users", vec![route("users", "GET", "/new", "new")]));

        let table = compiler.snapshot();
        assert!(table.resolve(Action::Get, "/old").is_none());
        assert!(table.resolve(Action::Get, "/new").is_some());
        assert_eq!(table.version(), 2);
    }

    #[test]
    fn other_modules_are_carried_by_reference() {
        let (compiler, _) = compiler();
        compiler.compile(batch("y", vec![route("y", "GET", "/y", "y")]));
        let before = Arc::clone(compiler.snapshot().module("y").unwrap());

        compiler.compile(batch("x", vec![route("x", "GET", "/x", "x")]));
        compiler.compile(batch("x", vec![route("x", "POST", "/x", "x2")]));

        let after = Arc::clone(compiler.snapshot().module("y").unwrap());
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn readers_see_other_modules_during_recompilation() {
        let (compiler, _) = compiler();
        let compiler = Arc::new(compiler);
        compiler.compile(batch("y", vec![route("y", "GET", "/y/:id", "getY")]));

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let compiler = Arc::clone(&compiler);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut reads = 0u64;
                    while !done.load(Ordering::Relaxed) {
                        let table = compiler.snapshot();
                        assert!(table.resolve(Action::Get, "/y/1").is_some());
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();

        for i in 0..200 {
            compiler.compile(batch(
                "x",
                vec![route("x", "GET", &format!("/x/{i}"), "getX")],
            ));
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }

    #[test]
    fn held_snapshot_is_unaffected_by_swap() {
        let (compiler, _) = compiler();
        compiler.compile(batch("x", vec![route("x", "GET", "/x", "x")]));
        let held = compiler.snapshot();
        compiler.remove("x");

        assert!(held.resolve(Action::Get, "/x").is_some());
        assert!(compiler.snapshot().resolve(Action::Get, "/x").is_none());
    }

    #[test]
    fn sockets_middlewares_and_proxies_compile() {
        let (compiler, _) = compiler();
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        let socket = SocketDescriptor::new("chat", "/chat", events).unwrap();
        let middleware = MiddlewareDescriptor {
            name: "auth".to_string(),
            module: "chat".to_string(),
            handler: "authenticate".to_string(),
            description: String::new(),
        };
        let proxy = ProxyDescriptor {
            path: "/legacy/:rest".to_string(),
            action: Action::Get,
            module: "chat".to_string(),
            target: "http://legacy".to_string(),
            middlewares: vec!["auth".to_string()],
            description: String::new(),
            handler: None,
        };
        let response = compiler.compile(batch(
            "chat",
            vec![
                socket.into(),
                middleware.clone().into(),
                middleware.into(),
                proxy.into(),
            ],
        ));
        assert_eq!(response.accepted, 3);
        assert_eq!(response.rejected.len(), 1);

        let table = compiler.snapshot();
        assert!(table.socket("/chat/").is_some());
        assert!(table.middleware("chat", "auth").is_some());
        assert!(table.middleware("users", "chat.auth").is_some());
        assert!(matches!(
            table.resolve(Action::Get, "/legacy/a").unwrap().target,
            Target::Proxy(_)
        ));
        let compiled = table.module("chat").unwrap();
        assert!(compiled.proto.proto.contains("rpc OnMessage(SocketRequest)"));
        assert!(compiled.proto.proto.contains("rpc Authenticate(RouterRequest)"));
    }

    #[tokio::test]
    async fn compilation_publishes_routes_changed() {
        let (compiler, bus) = compiler();
        let mut sub = bus.subscribe(topics::ROUTES);
        compiler.compile(batch("x", vec![route("x", "GET", "/x", "x")]));
        assert_eq!(
            sub.recv().await,
            Some(BusSignal::Event(BusEvent::RoutesChanged {
                module: "x".to_string(),
                version: 1,
            }))
        );
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = batch("x", vec![route("x", "GET", "/x", "x")]);
        let b = batch("x", vec![route("x", "GET", "/y", "x")]);
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
