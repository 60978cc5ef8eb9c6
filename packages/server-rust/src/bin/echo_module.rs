//! Demo module: echoes REST calls and socket events through the core.
//!
//! Routes: `GET /echo/:msg`, `POST /echo` (behind the `stamp` middleware)
//! and the `/echo` socket (`message` replies to the sender, `broadcast`
//! fans out to everyone on the socket).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info};

use conduit_core::messages::{CallEnvelope, CallOutcome, RouteCall, RouteResult, SocketResult};
use conduit_core::{
    ConfigOption, ConfigSchema, Descriptor, DescriptorError, MiddlewareDescriptor, OptionKind,
    ReturnShape, RouteDescriptor, SocketDescriptor, SocketEvent, TypeSpec, TypeTag,
};
use conduit_server::module::{
    handler_fn, ConfigHolder, HandlerError, HandlerSet, HttpCoreTransport, ModuleHooks,
    ModuleManager, ModuleSettings, WsBusClient,
};
use conduit_server::service::telemetry::{init_tracing, Telemetry};

const MODULE: &str = "echo";

#[derive(Debug, Parser)]
#[command(name = "echo-module", version, about)]
struct Args {
    #[command(flatten)]
    module: ModuleSettings,

    #[arg(long)]
    log_json: bool,
}

struct EchoModule;

fn greeting(config: &ConfigHolder) -> String {
    config
        .get()
        .get("greeting")
        .and_then(Value::as_str)
        .unwrap_or("echo")
        .to_string()
}

fn descriptors() -> Result<Vec<Descriptor>, DescriptorError> {
    let mut events = BTreeMap::new();
    events.insert("message".to_string(), SocketEvent::new("onMessage"));
    events.insert("broadcast".to_string(), SocketEvent::new("onMessage"));

    Ok(vec![
        MiddlewareDescriptor {
            name: "stamp".to_string(),
            module: MODULE.to_string(),
            handler: "stamp".to_string(),
            description: "Adds the receive time to the call context".to_string(),
        }
        .into(),
        RouteDescriptor::builder(MODULE, "/echo/:msg", "GET", "echo")
            .url("msg", TypeSpec::required(TypeTag::String))
            .returns(ReturnShape::new("Echo", TypeSpec::Scalar(TypeTag::Json)))
            .description("Echo a path segment")
            .build()?
            .into(),
        RouteDescriptor::builder(MODULE, "/echo", "POST", "echoBody")
            .body("text", TypeSpec::required(TypeTag::String))
            .middleware("stamp")
            .description("Echo a request body")
            .build()?
            .into(),
        SocketDescriptor::new(MODULE, "/echo", events)?
            .with_name("echo")
            .with_description("Echo socket")
            .into(),
    ])
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn route_only(call: CallEnvelope) -> Result<RouteCall, HandlerError> {
    match call {
        CallEnvelope::Route(route) => Ok(route),
        CallEnvelope::Socket(_) => Err(HandlerError::bad_request("expected a route call")),
    }
}

#[async_trait]
impl ModuleHooks for EchoModule {
    fn name(&self) -> &str {
        MODULE
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        Some(
            ConfigSchema::new()
                .option(
                    "active",
                    ConfigOption::new(OptionKind::Boolean, json!(true)).doc("Serve echo routes"),
                )
                .option(
                    "greeting",
                    ConfigOption::new(OptionKind::String, json!("echo"))
                        .doc("Prefix added to every echo"),
                ),
        )
    }

    fn handlers(&self, config: Arc<ConfigHolder>) -> HandlerSet {
        let echo_config = Arc::clone(&config);
        let body_config = Arc::clone(&config);
        HandlerSet::new()
            .with(
                "echo",
                handler_fn(move |call| {
                    let prefix = greeting(&echo_config);
                    async move {
                        let route = route_only(call)?;
                        Ok::<_, HandlerError>(CallOutcome::Route(RouteResult {
                            value: json!({ "greeting": prefix, "echo": route.params.get("msg") }),
                            ..RouteResult::default()
                        }))
                    }
                }),
            )
            .with(
                "echoBody",
                handler_fn(move |call| {
                    let prefix = greeting(&body_config);
                    async move {
                        let route = route_only(call)?;
                        let text = route
                            .params
                            .get("text")
                            .and_then(Value::as_str)
                            .ok_or_else(|| HandlerError::bad_request("'text' is required"))?;
                        Ok::<_, HandlerError>(CallOutcome::Route(RouteResult {
                            value: json!({
                                "greeting": prefix,
                                "echo": text,
                                "receivedAt": route.context.get("receivedAt"),
                            }),
                            ..RouteResult::default()
                        }))
                    }
                }),
            )
            .with(
                "stamp",
                handler_fn(|_call| async {
                    Ok::<_, HandlerError>(CallOutcome::Route(RouteResult {
                        value: json!({ "receivedAt": unix_millis() }),
                        ..RouteResult::default()
                    }))
                }),
            )
            .with(
                "onMessage",
                handler_fn(|call| async move {
                    let CallEnvelope::Socket(socket) = call else {
                        return Err(HandlerError::bad_request("expected a socket event"));
                    };
                    let rooms = if socket.event == "broadcast" {
                        vec!["/echo".to_string()]
                    } else {
                        Vec::new()
                    };
                    Ok(CallOutcome::Socket(SocketResult {
                        event: socket.event,
                        data: json!({ "from": socket.socket_id, "echo": socket.params }),
                        receivers: Vec::new(),
                        rooms,
                    }))
                }),
            )
    }

    fn descriptors(&self, _config: &Value) -> Vec<Descriptor> {
        descriptors().unwrap_or_else(|err| {
            error!(error = %err, "invalid echo descriptors");
            Vec::new()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let telemetry = Telemetry::new(MODULE);
    let transport = Arc::new(HttpCoreTransport::new(
        reqwest::Client::new(),
        args.module.core_url.clone(),
    ));
    let bus = Arc::new(WsBusClient::new(args.module.core_url.clone()));
    let manager = ModuleManager::new(args.module, Arc::new(EchoModule), transport, bus, telemetry);

    let (address, status) = match manager.bootstrap().await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, state = %manager.state(), "bootstrap failed");
            manager.shutdown().await;
            return Err(err.into());
        }
    };
    info!(%address, %status, "echo module up");

    let _ = tokio::signal::ctrl_c().await;
    manager.shutdown().await;
    Ok(())
}
