//! Route compilation and client-facing dispatch.
//!
//! - [`compiler`]: per-module batches folded into immutable [`table::RoutingTable`] snapshots
//! - [`gateway`]: resolves requests against the current snapshot and calls modules
//! - [`middleware`]: tower layers wrapped around the gateway
//! - [`surface`]: documentation surfaces derived from a snapshot

pub mod compiler;
pub mod gateway;
pub mod middleware;
pub mod surface;
pub mod table;

pub use compiler::RouteCompiler;
pub use gateway::{Gateway, GatewayError, GatewayRequest, RestRequest, SocketRequest};
pub use middleware::{build_gateway_pipeline, GatewayPipeline};
pub use table::RoutingTable;
