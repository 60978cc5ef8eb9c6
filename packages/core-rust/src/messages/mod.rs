//! Wire messages exchanged between modules and the core.
//!
//! All payloads are JSON with camelCase field names.

pub mod bus;
pub mod registration;
pub mod routing;
pub mod rpc;

pub use bus::{topics, BusEvent};
pub use registration::{
    ConfigDeclaration, HealthCheckResponse, HealthReport, InstanceDetails, ModuleConfig,
    ModuleDetails, RegisterModuleRequest, RegisterModuleResponse,
};
pub use routing::{RegisterRoutesRequest, RegisterRoutesResponse, Rejection};
pub use rpc::{
    decode_call, decode_outcome, encode_call, encode_outcome, CallEnvelope, CallKind,
    CallOutcome, Cookie, JsonMap, ModuleCallRequest, ModuleCallResponse, ProxyResult,
    RouteCall, RouteResult, RpcCodecError, SocketCall, SocketResult,
};
