//! Pipeline composition: wraps the gateway in the middleware stack.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::routing::gateway::Gateway;
use crate::service::config::CoreConfig;
use crate::service::telemetry::Telemetry;

/// Concrete service stack produced by [`build_gateway_pipeline`].
pub type GatewayPipeline = LoadShedService<TimeoutService<MetricsService<Gateway>>>;

/// Wraps the gateway with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded before doing any work
/// 2. `TimeoutLayer` -- bound the whole call including middlewares
/// 3. `MetricsLayer` -- record timing and outcome
#[must_use]
pub fn build_gateway_pipeline(
    gateway: Gateway,
    config: &CoreConfig,
    telemetry: Telemetry,
) -> GatewayPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_calls))
        .layer(TimeoutLayer::new(config.call_timeout_ms))
        .layer(MetricsLayer::new(telemetry))
        .service(gateway)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conduit_core::messages::CallOutcome;
    use conduit_core::{RouteBatch, RouteDescriptor, ServingStatus};
    use tower::ServiceExt;

    use super::*;
    use crate::routing::gateway::tests::fixture;
    use crate::routing::gateway::GatewayError;
    use crate::routing::middleware::testing::request;

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let f = fixture();
        f.registry
            .update_module("ping", "http://p:1", ServingStatus::Serving);
        f.compiler.compile(RouteBatch::new(
            "ping",
            vec![RouteDescriptor::builder("ping", "/ping", "GET", "ping")
                .build()
                .unwrap()
                .into()],
        ));

        let svc = build_gateway_pipeline(f.gateway, &CoreConfig::default(), Telemetry::detached());
        let outcome = svc.oneshot(request()).await.unwrap();
        let CallOutcome::Route(result) = outcome else {
            panic!("expected route outcome");
        };
        assert_eq!(result.value["function"], "Ping");
    }

    #[tokio::test]
    async fn pipeline_surfaces_gateway_errors() {
        let f = fixture();
        let svc = build_gateway_pipeline(f.gateway, &CoreConfig::default(), Telemetry::detached());
        let err = svc.oneshot(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }
}
