//! Tower middleware layers for the gateway pipeline.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`timeout`]: Per-call timeout enforcement
//! - [`metrics`]: Call timing and outcome via `tracing` spans and histograms
//! - [`pipeline`]: Composes all layers around the [`Gateway`](super::gateway::Gateway)

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_gateway_pipeline, GatewayPipeline};
pub use timeout::TimeoutLayer;
