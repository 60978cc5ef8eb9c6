//! Metrics middleware for gateway calls.
//!
//! Wraps each call in an `info_span!` carrying its duration and outcome and
//! records the latency histogram.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use conduit_core::messages::CallOutcome;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::routing::gateway::{GatewayError, GatewayRequest};
use crate::service::telemetry::{names, Telemetry};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    telemetry: Telemetry,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    telemetry: Telemetry,
}

impl<S> Service<GatewayRequest> for MetricsService<S>
where
    S: Service<GatewayRequest, Response = CallOutcome, Error = GatewayError> + Send,
    S::Future: Send + 'static,
{
    type Response = CallOutcome;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<CallOutcome, GatewayError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: GatewayRequest) -> Self::Future {
        let kind = request.kind();
        let span = info_span!(
            parent: self.telemetry.span(),
            "gateway_call",
            kind,
            path = %request.path(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let telemetry = self.telemetry.clone();
        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(GatewayError::Timeout(_)) => "timeout",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                telemetry.observe(names::CALL_DURATION, kind, elapsed.as_secs_f64());

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
