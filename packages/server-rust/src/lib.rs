//! Conduit server: the core control plane (module registry, health,
//! config negotiation, route compilation, gateway) and the module-side
//! bootstrap runtime.

pub mod module;
pub mod network;
pub mod routing;
pub mod service;
pub mod storage;
pub mod transport;

pub use network::NetworkModule;
pub use service::{CoreConfig, CoreState};
