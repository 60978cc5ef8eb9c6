//! Client-facing dispatch.
//!
//! Resolves a REST request or socket event against the current routing
//! table, runs the referenced middlewares in order (each one's output is
//! merged into the call context), then invokes the owning module's RPC
//! function on a serving instance. Proxy routes are forwarded verbatim.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tower::Service;
use tracing::debug;

use conduit_core::messages::{
    decode_outcome, encode_call, CallEnvelope, CallOutcome, Cookie, JsonMap, RouteCall,
    RpcCodecError, SocketCall,
};
use conduit_core::proto::capitalize;
use conduit_core::Action;

use super::compiler::RouteCompiler;
use super::table::{RoutingTable, Target};
use crate::service::client::{ModuleClient, ProxyRequest};
use crate::service::registry::ServiceRegistry;
use crate::service::telemetry::{names, Telemetry};
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RestRequest {
    pub action: Action,
    pub path: String,
    /// Raw query string, forwarded as-is to proxy targets.
    pub raw_query: Option<String>,
    pub query: JsonMap,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct SocketRequest {
    pub path: String,
    pub socket_id: String,
    pub event: String,
    pub params: Value,
    pub headers: BTreeMap<String, String>,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub enum GatewayRequest {
    Rest(RestRequest),
    Socket(SocketRequest),
}

impl GatewayRequest {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayRequest::Rest(_) => "rest",
            GatewayRequest::Socket(_) => "socket",
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            GatewayRequest::Rest(r) => &r.path,
            GatewayRequest::Socket(s) => &s.path,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route for {action} {path}")]
    NotFound { action: Action, path: String },
    #[error("{action} is not routed at {path}")]
    MethodNotAllowed { action: Action, path: String },
    #[error("no socket is served at {0}")]
    SocketNotFound(String),
    #[error("event '{event}' is not handled at {path}")]
    EventRejected { path: String, event: String },
    #[error("module '{0}' has no serving instance")]
    Unavailable(String),
    #[error("middleware '{0}' is not registered")]
    MiddlewareMissing(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Codec(#[from] RpcCodecError),
    #[error("module call failed: {0}")]
    Transport(#[source] TransportError),
    #[error("{message}")]
    Module { status: u16, message: String },
    #[error("call exceeded {0} ms")]
    Timeout(u64),
    #[error("gateway is overloaded")]
    Overloaded,
}

impl GatewayError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } | GatewayError::SocketNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::EventRejected { .. } | GatewayError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unavailable(_) | GatewayError::Overloaded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::MiddlewareMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Codec(_) | GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Module { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status, body, .. } => GatewayError::Module {
                status,
                message: error_message(&body),
            },
            other => GatewayError::Transport(other),
        }
    }
}

/// Pulls `error` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Gateway {
    compiler: Arc<RouteCompiler>,
    registry: Arc<ServiceRegistry>,
    client: Arc<dyn ModuleClient>,
    telemetry: Telemetry,
}

impl Gateway {
    #[must_use]
    pub fn new(
        compiler: Arc<RouteCompiler>,
        registry: Arc<ServiceRegistry>,
        client: Arc<dyn ModuleClient>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            compiler,
            registry,
            client,
            telemetry,
        }
    }

    /// Dispatches one request against a single table snapshot.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    pub async fn dispatch(&self, request: GatewayRequest) -> Result<CallOutcome, GatewayError> {
        let table = self.compiler.snapshot();
        match request {
            GatewayRequest::Rest(rest) => self.rest(&table, rest).await,
            GatewayRequest::Socket(socket) => self.socket(&table, socket).await,
        }
    }

    async fn rest(
        &self,
        table: &RoutingTable,
        request: RestRequest,
    ) -> Result<CallOutcome, GatewayError> {
        let Some(resolved) = table.resolve(request.action, &request.path) else {
            let (action, path) = (request.action, request.path);
            return Err(if table.has_path(&path) {
                GatewayError::MethodNotAllowed { action, path }
            } else {
                GatewayError::NotFound { action, path }
            });
        };

        let mut context = JsonMap::new();
        context.insert("requestId".to_string(), Value::String(request.request_id.clone()));
        let mut cookies = Vec::new();

        match resolved.target {
            Target::Route(entry) => {
                let body = parse_body(&request.body)?;
                let mut call = RouteCall {
                    path: entry.public_path.clone(),
                    cookies: parse_cookies(request.headers.get("cookie")),
                    headers: request.headers,
                    body,
                    url_params: resolved.url_params,
                    query_params: request.query,
                    ..RouteCall::default()
                };
                call.merge_params();
                self.run_middlewares(
                    table,
                    &entry.module,
                    entry.descriptor.middlewares(),
                    &call,
                    &mut context,
                    &mut cookies,
                )
                .await?;
                call.context = context;

                let mut outcome = self
                    .invoke(
                        &entry.module,
                        entry.descriptor.handler(),
                        &CallEnvelope::Route(call),
                    )
                    .await?;
                if let CallOutcome::Route(result) = &mut outcome {
                    cookies.append(&mut result.set_cookies);
                    result.set_cookies = cookies;
                }
                Ok(outcome)
            }
            Target::Proxy(entry) => {
                let call = RouteCall {
                    path: entry.public_path.clone(),
                    headers: request.headers.clone(),
                    url_params: resolved.url_params,
                    query_params: request.query,
                    ..RouteCall::default()
                };
                self.run_middlewares(
                    table,
                    &entry.module,
                    &entry.descriptor.middlewares,
                    &call,
                    &mut context,
                    &mut cookies,
                )
                .await?;

                let mut url = format!(
                    "{}{}",
                    entry.descriptor.target.trim_end_matches('/'),
                    request.path
                );
                if let Some(query) = &request.raw_query {
                    url.push('?');
                    url.push_str(query);
                }
                let mut headers: Vec<(String, String)> = request.headers.into_iter().collect();
                headers.push((
                    "x-conduit-context".to_string(),
                    Value::Object(context).to_string(),
                ));
                debug!(parent: self.telemetry.span(), module = %entry.module, %url, "proxying");
                let result = self
                    .client
                    .forward(ProxyRequest {
                        action: request.action,
                        url,
                        headers,
                        body: request.body,
                    })
                    .await?;
                Ok(CallOutcome::Proxy(result))
            }
        }
    }

    async fn socket(
        &self,
        table: &RoutingTable,
        request: SocketRequest,
    ) -> Result<CallOutcome, GatewayError> {
        let entry = table
            .socket(&request.path)
            .ok_or_else(|| GatewayError::SocketNotFound(request.path.clone()))?;
        let binding =
            entry
                .descriptor
                .resolve(&request.event)
                .ok_or_else(|| GatewayError::EventRejected {
                    path: request.path.clone(),
                    event: request.event.clone(),
                })?;

        let mut context = JsonMap::new();
        context.insert("requestId".to_string(), Value::String(request.request_id.clone()));
        let base = RouteCall {
            path: entry.public_path.clone(),
            params: request.params.as_object().cloned().unwrap_or_default(),
            cookies: parse_cookies(request.headers.get("cookie")),
            headers: request.headers,
            ..RouteCall::default()
        };
        let mut cookies = Vec::new();
        self.run_middlewares(
            table,
            &entry.module,
            entry.descriptor.middlewares(),
            &base,
            &mut context,
            &mut cookies,
        )
        .await?;

        let call = SocketCall {
            event: request.event,
            socket_id: request.socket_id,
            params: request.params,
            context,
        };
        self.invoke(&entry.module, &binding.handler, &CallEnvelope::Socket(call))
            .await
    }

    async fn run_middlewares(
        &self,
        table: &RoutingTable,
        owner: &str,
        references: &[String],
        base: &RouteCall,
        context: &mut JsonMap,
        cookies: &mut Vec<Cookie>,
    ) -> Result<(), GatewayError> {
        for reference in references {
            let middleware = table
                .middleware(owner, reference)
                .ok_or_else(|| GatewayError::MiddlewareMissing(reference.clone()))?;
            let mut call = base.clone();
            call.context = context.clone();
            let outcome = self
                .invoke(
                    &middleware.module,
                    &middleware.handler,
                    &CallEnvelope::Route(call),
                )
                .await?;
            if let CallOutcome::Route(mut result) = outcome {
                if let Value::Object(fields) = result.value {
                    context.extend(fields);
                }
                cookies.append(&mut result.set_cookies);
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        module: &str,
        function: &str,
        envelope: &CallEnvelope,
    ) -> Result<CallOutcome, GatewayError> {
        let address = self
            .registry
            .serving_address(module)
            .ok_or_else(|| GatewayError::Unavailable(module.to_string()))?;
        let request = encode_call(envelope)?;
        self.telemetry.count(names::CALLS, module);
        let response = self
            .client
            .call(&address, &capitalize(function), request)
            .await?;
        Ok(decode_outcome(envelope.kind(), response)?)
    }
}

fn parse_body(body: &Bytes) -> Result<Value, GatewayError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(e.to_string()))
}

fn parse_cookies(header: Option<&String>) -> BTreeMap<String, String> {
    header
        .map(|raw| {
            raw.split(';')
                .filter_map(|pair| {
                    let (name, value) = pair.split_once('=')?;
                    Some((name.trim().to_string(), value.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Service<GatewayRequest> for Gateway {
    type Response = CallOutcome;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<CallOutcome, GatewayError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: GatewayRequest) -> Self::Future {
        let gateway = self.clone();
        Box::pin(async move { gateway.dispatch(request).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use conduit_core::messages::{
        decode_call, encode_outcome, ModuleCallRequest, ModuleCallResponse, ProxyResult,
        RegisterRoutesRequest, RouteResult, SocketResult,
    };
    use conduit_core::{
        Descriptor, MiddlewareDescriptor, ProtoGenerator, RouteBatch, RouteDescriptor,
        ServingStatus, SocketDescriptor, SocketEvent,
    };
    use parking_lot::Mutex;

    use super::*;
    use crate::service::bus::EventBus;
    use crate::service::config::CoreConfig;
    use crate::service::health::HealthService;

    /// Module client that answers every call by echoing what it received.
    #[derive(Default)]
    pub(crate) struct EchoClient {
        pub(crate) calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ModuleClient for EchoClient {
        async fn health(&self, _address: &str) -> Result<ServingStatus, TransportError> {
            Ok(ServingStatus::Serving)
        }

        async fn routes(&self, address: &str) -> Result<RegisterRoutesRequest, TransportError> {
            Err(TransportError::Channel {
                operation: "routes",
                target: address.to_string(),
                message: "not supported".to_string(),
            })
        }

        async fn call(
            &self,
            address: &str,
            function: &str,
            request: ModuleCallRequest,
        ) -> Result<ModuleCallResponse, TransportError> {
            self.calls
                .lock()
                .push((address.to_string(), function.to_string()));
            if function == "Deny" {
                return Err(TransportError::Status {
                    operation: "call",
                    target: address.to_string(),
                    status: 401,
                    body: r#"{"error":"not allowed"}"#.to_string(),
                });
            }
            let outcome = match decode_call(&request).unwrap() {
                CallEnvelope::Route(_) if function == "Stamp" => CallOutcome::Route(RouteResult {
                    value: json!({"user": "ada"}),
                    set_cookies: vec![Cookie {
                        name: "seen".to_string(),
                        value: "1".to_string(),
                        options: String::new(),
                    }],
                    remove_cookies: Vec::new(),
                }),
                CallEnvelope::Route(call) => CallOutcome::Route(RouteResult {
                    value: json!({
                        "function": function,
                        "params": call.params,
                        "context": call.context,
                    }),
                    ..RouteResult::default()
                }),
                CallEnvelope::Socket(call) => CallOutcome::Socket(SocketResult {
                    event: call.event,
                    data: json!({"function": function, "context": call.context}),
                    ..SocketResult::default()
                }),
            };
            Ok(encode_outcome(&outcome).unwrap())
        }

        async fn forward(&self, request: ProxyRequest) -> Result<ProxyResult, TransportError> {
            Ok(ProxyResult {
                status: 200,
                headers: Vec::new(),
                body: request.url.into_bytes(),
            })
        }
    }

    pub(crate) struct Fixture {
        pub(crate) gateway: Gateway,
        pub(crate) compiler: Arc<RouteCompiler>,
        pub(crate) registry: Arc<ServiceRegistry>,
        pub(crate) client: Arc<EchoClient>,
    }

    pub(crate) fn fixture() -> Fixture {
        let telemetry = Telemetry::detached();
        let bus = Arc::new(EventBus::new(16, telemetry.clone()));
        let health = Arc::new(HealthService::new(Arc::clone(&bus), telemetry.clone()));
        let registry = Arc::new(ServiceRegistry::new(
            health,
            Arc::clone(&bus),
            telemetry.clone(),
        ));
        let compiler = Arc::new(RouteCompiler::new(
            &CoreConfig::default(),
            ProtoGenerator::default(),
            bus,
            telemetry.clone(),
        ));
        let client = Arc::new(EchoClient::default());
        let gateway = Gateway::new(
            Arc::clone(&compiler),
            Arc::clone(&registry),
            Arc::clone(&client) as Arc<dyn ModuleClient>,
            telemetry,
        );
        Fixture {
            gateway,
            compiler,
            registry,
            client,
        }
    }

    fn rest(action: Action, path: &str, body: &str) -> GatewayRequest {
        GatewayRequest::Rest(RestRequest {
            action,
            path: path.to_string(),
            raw_query: None,
            query: JsonMap::new(),
            headers: BTreeMap::new(),
            body: Bytes::from(body.to_string()),
            request_id: "req-1".to_string(),
        })
    }

    fn middleware(module: &str, name: &str, handler: &str) -> Descriptor {
        MiddlewareDescriptor {
            name: name.to_string(),
            module: module.to_string(),
            handler: handler.to_string(),
            description: String::new(),
        }
        .into()
    }

    #[tokio::test]
    async fn route_call_reaches_module_with_merged_params() {
        let f = fixture();
        f.registry
            .update_module("users", "http://u:1", ServingStatus::Serving);
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/users/:id", "PUT", "updateUser")
                .build()
                .unwrap()
                .into()],
        ));

        let outcome = f
            .gateway
            .dispatch(rest(Action::Put, "/users/42", r#"{"name":"ada"}"#))
            .await
            .unwrap();
        let CallOutcome::Route(result) = outcome else {
            panic!("expected route outcome");
        };
        assert_eq!(result.value["function"], "UpdateUser");
        assert_eq!(result.value["params"]["id"], "42");
        assert_eq!(result.value["params"]["name"], "ada");
        assert_eq!(result.value["context"]["requestId"], "req-1");
    }

    #[tokio::test]
    async fn middleware_output_lands_in_context() {
        let f = fixture();
        f.registry
            .update_module("users", "http://u:1", ServingStatus::Serving);
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![
                middleware("users", "stamp", "stamp"),
                RouteDescriptor::builder("users", "/me", "GET", "me")
                    .middleware("stamp")
                    .build()
                    .unwrap()
                    .into(),
            ],
        ));

        let CallOutcome::Route(result) = f.gateway.dispatch(rest(Action::Get, "/me", "")).await.unwrap()
        else {
            panic!("expected route outcome");
        };
        assert_eq!(result.value["context"]["user"], "ada");
        assert_eq!(result.set_cookies[0].name, "seen");
        let calls = f.client.calls.lock();
        assert_eq!(calls[0].1, "Stamp");
        assert_eq!(calls[1].1, "Me");
    }

    #[tokio::test]
    async fn failing_middleware_aborts_with_its_status() {
        let f = fixture();
        f.registry
            .update_module("auth", "http://a:1", ServingStatus::Serving);
        f.registry
            .update_module("users", "http://u:1", ServingStatus::Serving);
        f.compiler
            .compile(RouteBatch::new("auth", vec![middleware("auth", "guard", "deny")]));
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/secret", "GET", "secret")
                .middleware("auth.guard")
                .build()
                .unwrap()
                .into()],
        ));

        let err = f
            .gateway
            .dispatch(rest(Action::Get, "/secret", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "not allowed");
        assert_eq!(f.client.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_middleware_is_an_error() {
        let f = fixture();
        f.registry
            .update_module("users", "http://u:1", ServingStatus::Serving);
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/x", "GET", "x")
                .middleware("nope")
                .build()
                .unwrap()
                .into()],
        ));
        let err = f.gateway.dispatch(rest(Action::Get, "/x", "")).await.unwrap_err();
        assert!(matches!(err, GatewayError::MiddlewareMissing(_)));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let f = fixture();
        let err = f.gateway.dispatch(rest(Action::Get, "/nowhere", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn known_path_with_other_action_is_method_not_allowed() {
        let f = fixture();
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/users/:id", "GET", "getUser")
                .build()
                .unwrap()
                .into()],
        ));
        let err = f
            .gateway
            .dispatch(rest(Action::Delete, "/users/7", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn module_without_serving_instance_is_unavailable() {
        let f = fixture();
        f.registry
            .update_module("users", "http://u:1", ServingStatus::NotServing);
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/u", "GET", "u")
                .build()
                .unwrap()
                .into()],
        ));
        let err = f.gateway.dispatch(rest(Action::Get, "/u", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let f = fixture();
        f.registry
            .update_module("users", "http://u:1", ServingStatus::Serving);
        f.compiler.compile(RouteBatch::new(
            "users",
            vec![RouteDescriptor::builder("users", "/u", "POST", "u")
                .build()
                .unwrap()
                .into()],
        ));
        let err = f
            .gateway
            .dispatch(rest(Action::Post, "/u", "{oops"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn socket_events_fall_back_to_any_handler() {
        let f = fixture();
        f.registry
            .update_module("chat", "http://c:1", ServingStatus::Serving);
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        events.insert("any".to_string(), SocketEvent::new("onAny"));
        f.compiler.compile(RouteBatch::new(
            "chat",
            vec![SocketDescriptor::new("chat", "/chat", events).unwrap().into()],
        ));

        let request = |event: &str| {
            GatewayRequest::Socket(SocketRequest {
                path: "/chat".to_string(),
                socket_id: "s1".to_string(),
                event: event.to_string(),
                params: json!({}),
                headers: BTreeMap::new(),
                request_id: "r".to_string(),
            })
        };
        let CallOutcome::Socket(result) = f.gateway.dispatch(request("typing")).await.unwrap()
        else {
            panic!("expected socket outcome");
        };
        assert_eq!(result.event, "typing");
        assert_eq!(result.data["function"], "OnAny");
    }

    #[tokio::test]
    async fn unhandled_socket_event_is_rejected() {
        let f = fixture();
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        f.compiler.compile(RouteBatch::new(
            "chat",
            vec![SocketDescriptor::new("chat", "/chat", events).unwrap().into()],
        ));
        let err = f
            .gateway
            .dispatch(GatewayRequest::Socket(SocketRequest {
                path: "/chat".to_string(),
                socket_id: "s1".to_string(),
                event: "typing".to_string(),
                params: Value::Null,
                headers: BTreeMap::new(),
                request_id: "r".to_string(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EventRejected { .. }));
    }

    #[tokio::test]
    async fn proxy_forwards_to_target() {
        let f = fixture();
        f.compiler.compile(RouteBatch::new(
            "legacy",
            vec![conduit_core::ProxyDescriptor {
                path: "/old/:rest".to_string(),
                action: Action::Get,
                module: "legacy".to_string(),
                target: "http://upstream:9000/".to_string(),
                middlewares: Vec::new(),
                description: String::new(),
                handler: None,
            }
            .into()],
        ));
        let mut request = rest(Action::Get, "/old/page", "");
        if let GatewayRequest::Rest(r) = &mut request {
            r.raw_query = Some("a=1".to_string());
        }
        let CallOutcome::Proxy(result) = f.gateway.dispatch(request).await.unwrap() else {
            panic!("expected proxy outcome");
        };
        assert_eq!(result.body, b"http://upstream:9000/old/page?a=1".to_vec());
    }

    #[test]
    fn cookie_header_is_split() {
        let cookies = parse_cookies(Some(&"a=1; b = two".to_string()));
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(cookies.get("b").map(String::as_str), Some("two"));
    }
}
