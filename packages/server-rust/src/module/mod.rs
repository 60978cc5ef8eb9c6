//! Module-side runtime: settings, the bootstrap state machine, the RPC
//! server a module exposes and the clients it uses to reach the core.
//!
//! A module implements [`ModuleHooks`] and hands it to a
//! [`ModuleManager`], which drives the handshake with the core.

pub mod bus_client;
pub mod config_holder;
pub mod core_link;
pub mod handlers;
pub mod hooks;
pub mod manager;
pub mod server;
pub mod settings;
pub mod state;

pub use bus_client::{BusClient, LocalBusClient, WsBusClient};
pub use config_holder::ConfigHolder;
pub use core_link::{CoreTransport, HttpCoreTransport, LocalCoreTransport};
pub use handlers::{handler_fn, HandlerError, HandlerSet, RpcHandler};
pub use hooks::ModuleHooks;
pub use manager::ModuleManager;
pub use server::ModuleServer;
pub use settings::ModuleSettings;
pub use state::{BootstrapError, BootstrapState};
