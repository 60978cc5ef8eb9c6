//! Timeout middleware for gateway calls.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use conduit_core::messages::CallOutcome;
use tower::{Layer, Service};

use crate::routing::gateway::{GatewayError, GatewayRequest};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer failing calls that run longer than `timeout_ms` with
/// `GatewayError::Timeout`. Middleware calls count against the same budget.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout_ms: u64,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout_ms: self.timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout_ms: u64,
}

impl<S> Service<GatewayRequest> for TimeoutService<S>
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
        let timeout_ms = self.timeout_ms;
        let fut = self.inner.call(request);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(GatewayError::Timeout(timeout_ms)),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
