//! Conduit core model: route descriptors, the route trie, generated RPC
//! interfaces, configuration schemas and the wire messages shared by the
//! core process and every module.

pub mod descriptor;
pub mod health;
pub mod messages;
pub mod proto;
pub mod schema;
pub mod trie;

pub use descriptor::{
    Action, Descriptor, DescriptorError, FieldSpec, MiddlewareDescriptor, ParamLocation,
    ParamSchema, ParamSchemas, ProxyDescriptor, ReturnShape, RouteBatch, RouteDescriptor,
    SocketDescriptor, SocketEvent, TypeSpec, TypeTag, ANY_EVENT,
};
pub use health::ServingStatus;
pub use proto::{GeneratedProto, ProtoGenerator};
pub use schema::{
    is_active, merge_config, ConfigNode, ConfigOption, ConfigSchema, OptionKind,
    ValidationResult,
};
pub use trie::{extract_params, RouteTrie, TrieConflict};

