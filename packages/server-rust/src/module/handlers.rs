//! Module-side RPC functions.
//!
//! A [`HandlerSet`] maps generated function names (capitalized) to
//! [`RpcHandler`]s. The RPC server unboxes each wire request, invokes the
//! handler and boxes its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conduit_core::messages::{
    decode_call, encode_outcome, CallEnvelope, CallOutcome, ModuleCallRequest,
    ModuleCallResponse,
};
use conduit_core::proto::capitalize;

/// Error a handler returns; the status travels back through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status: u16,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, call: CallEnvelope) -> Result<CallOutcome, HandlerError>;
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<CallOutcome, HandlerError>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(CallEnvelope) -> BoxFuture + Send + Sync,
{
    async fn handle(&self, call: CallEnvelope) -> Result<CallOutcome, HandlerError> {
        (self.0)(call).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(CallEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallOutcome, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(move |call| -> BoxFuture { Box::pin(f(call)) }))
}

#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `function` (as declared in a descriptor) to `handler`.
    #[must_use]
    pub fn with(mut self, function: &str, handler: Arc<dyn RpcHandler>) -> Self {
        self.handlers.insert(capitalize(function), handler);
        self
    }

    #[must_use]
    pub fn contains(&self, function: &str) -> bool {
        self.handlers.contains_key(&capitalize(function))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Unboxes `request`, runs the bound handler and boxes the result.
    ///
    /// # Errors
    ///
    /// 404 for unbound functions, 400 for malformed requests, 500 if the
    /// result cannot be encoded, or whatever the handler returned.
    pub async fn dispatch(
        &self,
        function: &str,
        request: &ModuleCallRequest,
    ) -> Result<ModuleCallResponse, HandlerError> {
        let handler = self
            .handlers
            .get(function)
            .ok_or_else(|| HandlerError::not_found(format!("function '{function}' is not bound")))?;
        let call = decode_call(request).map_err(|e| HandlerError::bad_request(e.to_string()))?;
        let outcome = handler.handle(call).await?;
        encode_outcome(&outcome).map_err(|e| HandlerError::internal(e.to_string()))
    }
}
