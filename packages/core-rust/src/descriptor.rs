//! Declarative route descriptors.
//!
//! A module announces its API surface as a batch of immutable descriptors:
//! REST routes, socket-event groups, middlewares and reverse-proxy rules.
//! The core compiles them into its routing table; nothing in this file does
//! any I/O. All wire types use `#[serde(rename_all = "camelCase")]`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Event name used as the catch-all socket handler.
pub const ANY_EVENT: &str = "any";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("invalid descriptor: unknown action '{0}'")]
    UnknownAction(String),
    #[error("invalid descriptor: path '{0}' must start with '/'")]
    InvalidPath(String),
    #[error("invalid descriptor: {0} has no handler")]
    MissingHandler(String),
    #[error("invalid descriptor: socket '{0}' declares no events")]
    NoEvents(String),
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// HTTP-verb-like action a route answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Action {
    /// All actions, in a stable order.
    pub const ALL: [Action; 5] = [
        Action::Get,
        Action::Post,
        Action::Put,
        Action::Patch,
        Action::Delete,
    ];

    /// Upper-case verb as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Get => "GET",
            Action::Post => "POST",
            Action::Put => "PUT",
            Action::Patch => "PATCH",
            Action::Delete => "DELETE",
        }
    }

    /// Whether the action is read-only (projected as a GraphQL query).
    #[must_use]
    pub fn is_query(self) -> bool {
        matches!(self, Action::Get)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DescriptorError::UnknownAction(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Type specs
// ---------------------------------------------------------------------------

/// Primitive type tags usable in parameter and return shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Json,
}

/// A (possibly nested) type description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeSpec {
    Scalar(TypeTag),
    List(Box<TypeSpec>),
    Object(BTreeMap<String, FieldSpec>),
}

impl TypeSpec {
    /// Shorthand for a required scalar field.
    #[must_use]
    pub fn required(tag: TypeTag) -> FieldSpec {
        FieldSpec {
            ty: TypeSpec::Scalar(tag),
            required: true,
        }
    }

    /// Shorthand for an optional scalar field.
    #[must_use]
    pub fn optional(tag: TypeTag) -> FieldSpec {
        FieldSpec {
            ty: TypeSpec::Scalar(tag),
            required: false,
        }
    }
}

/// A named field inside a parameter schema or object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub ty: TypeSpec,
    #[serde(default)]
    pub required: bool,
}

/// Field name -> field spec, ordered for deterministic projections.
pub type ParamSchema = BTreeMap<String, FieldSpec>;

/// Parameter schemas split by where the value is read from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSchemas {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: ParamSchema,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body: ParamSchema,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub url: ParamSchema,
}

impl ParamSchemas {
    /// Iterates over every declared parameter with its location.
    pub fn iter(&self) -> impl Iterator<Item = (ParamLocation, &String, &FieldSpec)> {
        self.query
            .iter()
            .map(|(k, v)| (ParamLocation::Query, k, v))
            .chain(self.body.iter().map(|(k, v)| (ParamLocation::Body, k, v)))
            .chain(self.url.iter().map(|(k, v)| (ParamLocation::Url, k, v)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.body.is_empty() && self.url.is_empty()
    }
}

/// Where a parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Query,
    Body,
    Url,
}

/// Named return shape of a route or socket event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnShape {
    pub name: String,
    pub ty: TypeSpec,
}

impl ReturnShape {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

// ---------------------------------------------------------------------------
// RouteDescriptor
// ---------------------------------------------------------------------------

/// One REST route declared by a module.
///
/// Built through [`RouteDescriptor::builder`]; immutable afterwards. A module
/// replaces its whole descriptor set at once instead of editing entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    path: String,
    action: Action,
    #[serde(default)]
    params: ParamSchemas,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    returns: Option<ReturnShape>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    middlewares: Vec<String>,
    module: String,
    #[serde(default)]
    description: String,
    handler: String,
}

impl RouteDescriptor {
    /// Starts building a route. `action` is parsed when [`RouteDescriptorBuilder::build`] runs.
    pub fn builder(
        module: impl Into<String>,
        path: impl Into<String>,
        action: impl Into<String>,
        handler: impl Into<String>,
    ) -> RouteDescriptorBuilder {
        RouteDescriptorBuilder {
            module: module.into(),
            path: path.into(),
            action: action.into(),
            handler: handler.into(),
            params: ParamSchemas::default(),
            returns: None,
            middlewares: Vec::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub fn params(&self) -> &ParamSchemas {
        &self.params
    }

    #[must_use]
    pub fn returns(&self) -> Option<&ReturnShape> {
        self.returns.as_ref()
    }

    #[must_use]
    pub fn middlewares(&self) -> &[String] {
        &self.middlewares
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// RPC function identifier on the owning module.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Re-checks the invariants enforced by the builder. Used on descriptors
    /// that arrived over the wire.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        check_path(&self.path)?;
        check_handler(&self.handler, &self.path)
    }
}

/// Builder for [`RouteDescriptor`].
#[derive(Debug, Clone)]
pub struct RouteDescriptorBuilder {
    module: String,
    path: String,
    action: String,
    handler: String,
    params: ParamSchemas,
    returns: Option<ReturnShape>,
    middlewares: Vec<String>,
    description: String,
}

impl RouteDescriptorBuilder {
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, field: FieldSpec) -> Self {
        self.params.query.insert(name.into(), field);
        self
    }

    #[must_use]
    pub fn body(mut self, name: impl Into<String>, field: FieldSpec) -> Self {
        self.params.body.insert(name.into(), field);
        self
    }

    #[must_use]
    pub fn url(mut self, name: impl Into<String>, field: FieldSpec) -> Self {
        self.params.url.insert(name.into(), field);
        self
    }

    #[must_use]
    pub fn params(mut self, params: ParamSchemas) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.returns = Some(shape);
        self
    }

    #[must_use]
    pub fn middleware(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Finalizes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] for an unknown action, a relative path or
    /// an empty handler.
    pub fn build(self) -> Result<RouteDescriptor, DescriptorError> {
        let action = self.action.parse::<Action>()?;
        check_path(&self.path)?;
        check_handler(&self.handler, &self.path)?;
        Ok(RouteDescriptor {
            path: self.path,
            action,
            params: self.params,
            returns: self.returns,
            middlewares: self.middlewares,
            module: self.module,
            description: self.description,
            handler: self.handler,
        })
    }
}

fn check_path(path: &str) -> Result<(), DescriptorError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(DescriptorError::InvalidPath(path.to_string()))
    }
}

fn check_handler(handler: &str, owner: &str) -> Result<(), DescriptorError> {
    if handler.trim().is_empty() {
        Err(DescriptorError::MissingHandler(owner.to_string()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SocketDescriptor
// ---------------------------------------------------------------------------

/// Handler binding for one socket event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketEvent {
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnShape>,
}

impl SocketEvent {
    #[must_use]
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            params: None,
            returns: None,
        }
    }
}

/// A group of socket events served under one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketDescriptor {
    path: String,
    module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    middlewares: Vec<String>,
    events: BTreeMap<String, SocketEvent>,
}

impl SocketDescriptor {
    /// Builds a socket descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if the path is relative, no events are
    /// declared, or any event has an empty handler.
    pub fn new(
        module: impl Into<String>,
        path: impl Into<String>,
        events: BTreeMap<String, SocketEvent>,
    ) -> Result<Self, DescriptorError> {
        let descriptor = Self {
            path: path.into(),
            module: module.into(),
            name: None,
            description: None,
            middlewares: Vec::new(),
            events,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_middleware(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(name.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn middlewares(&self) -> &[String] {
        &self.middlewares
    }

    #[must_use]
    pub fn events(&self) -> &BTreeMap<String, SocketEvent> {
        &self.events
    }

    /// Resolves the handler for `event`, falling back to the [`ANY_EVENT`]
    /// handler. `None` means the event must be rejected.
    #[must_use]
    pub fn resolve(&self, event: &str) -> Option<&SocketEvent> {
        self.events.get(event).or_else(|| self.events.get(ANY_EVENT))
    }

    /// # Errors
    ///
    /// See [`SocketDescriptor::new`].
    pub fn validate(&self) -> Result<(), DescriptorError> {
        check_path(&self.path)?;
        if self.events.is_empty() {
            return Err(DescriptorError::NoEvents(self.path.clone()));
        }
        for (event, binding) in &self.events {
            check_handler(&binding.handler, &format!("{}#{event}", self.path))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MiddlewareDescriptor / ProxyDescriptor
// ---------------------------------------------------------------------------

/// A named middleware a module offers to routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareDescriptor {
    pub name: String,
    pub module: String,
    pub handler: String,
    #[serde(default)]
    pub description: String,
}

/// A reverse-proxy rule forwarding matching requests to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDescriptor {
    pub path: String,
    pub action: Action,
    pub module: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

// ---------------------------------------------------------------------------
// Descriptor / RouteBatch
// ---------------------------------------------------------------------------

/// Any descriptor a module can declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Descriptor {
    Route(RouteDescriptor),
    Socket(SocketDescriptor),
    Middleware(MiddlewareDescriptor),
    Proxy(ProxyDescriptor),
}

impl Descriptor {
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Descriptor::Route(r) => r.module(),
            Descriptor::Socket(s) => s.module(),
            Descriptor::Middleware(m) => &m.module,
            Descriptor::Proxy(p) => &p.module,
        }
    }

    /// # Errors
    ///
    /// Returns the first violated descriptor invariant.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        match self {
            Descriptor::Route(r) => r.validate(),
            Descriptor::Socket(s) => s.validate(),
            Descriptor::Middleware(m) => check_handler(&m.handler, &m.name),
            Descriptor::Proxy(p) => check_path(&p.path),
        }
    }
}

impl From<RouteDescriptor> for Descriptor {
    fn from(value: RouteDescriptor) -> Self {
        Descriptor::Route(value)
    }
}

impl From<SocketDescriptor> for Descriptor {
    fn from(value: SocketDescriptor) -> Self {
        Descriptor::Socket(value)
    }
}

impl From<MiddlewareDescriptor> for Descriptor {
    fn from(value: MiddlewareDescriptor) -> Self {
        Descriptor::Middleware(value)
    }
}

impl From<ProxyDescriptor> for Descriptor {
    fn from(value: ProxyDescriptor) -> Self {
        Descriptor::Proxy(value)
    }
}

/// The complete descriptor set of one module. Replaces the previous set as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteBatch {
    pub module: String,
    pub descriptors: Vec<Descriptor>,
}

impl RouteBatch {
    #[must_use]
    pub fn new(module: impl Into<String>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            module: module.into(),
            descriptors,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_route_with_all_fields() {
        let route = RouteDescriptor::builder("users", "/users/:id", "get", "getUser")
            .url("id", TypeSpec::required(TypeTag::ObjectId))
            .query("expand", TypeSpec::optional(TypeTag::Boolean))
            .returns(ReturnShape::new("User", TypeSpec::Scalar(TypeTag::Json)))
            .middleware("authMiddleware")
            .description("Fetch one user")
            .build()
            .unwrap();

        assert_eq!(route.path(), "/users/:id");
        assert_eq!(route.action(), Action::Get);
        assert_eq!(route.handler(), "getUser");
        assert_eq!(route.module(), "users");
        assert_eq!(route.middlewares(), ["authMiddleware".to_string()]);
        assert_eq!(route.params().url.len(), 1);
        assert_eq!(route.returns().unwrap().name, "User");
    }

    #[test]
    fn unknown_action_is_invalid() {
        let err = RouteDescriptor::builder("users", "/users", "FETCH", "list")
            .build()
            .unwrap_err();
        assert_eq!(err, DescriptorError::UnknownAction("FETCH".to_string()));
    }

    #[test]
    fn relative_path_is_invalid() {
        let err = RouteDescriptor::builder("users", "users", "GET", "list")
            .build()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidPath(_)));
    }

    #[test]
    fn empty_handler_is_invalid() {
        let err = RouteDescriptor::builder("users", "/users", "GET", " ")
            .build()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::MissingHandler(_)));
    }

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("patch".parse::<Action>().unwrap(), Action::Patch);
        assert_eq!("DELETE".parse::<Action>().unwrap(), Action::Delete);
    }

    #[test]
    fn socket_resolve_falls_back_to_any() {
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        events.insert(ANY_EVENT.to_string(), SocketEvent::new("onAny"));
        let socket = SocketDescriptor::new("chat", "/chat", events).unwrap();

        assert_eq!(socket.resolve("message").unwrap().handler, "onMessage");
        assert_eq!(socket.resolve("typing").unwrap().handler, "onAny");
    }

    #[test]
    fn socket_without_any_rejects_unknown_event() {
        let mut events = BTreeMap::new();
        events.insert("message".to_string(), SocketEvent::new("onMessage"));
        let socket = SocketDescriptor::new("chat", "/chat", events).unwrap();

        assert!(socket.resolve("typing").is_none());
    }

    #[test]
    fn socket_without_events_is_invalid() {
        let err = SocketDescriptor::new("chat", "/chat", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DescriptorError::NoEvents(_)));
    }

    #[test]
    fn descriptor_json_is_tagged_by_kind() {
        let route = RouteDescriptor::builder("users", "/users", "POST", "createUser")
            .build()
            .unwrap();
        let json = serde_json::to_value(Descriptor::from(route)).unwrap();
        assert_eq!(json["kind"], "route");
        assert_eq!(json["action"], "POST");
        assert_eq!(json["handler"], "createUser");
    }

    #[test]
    fn wire_descriptor_with_unknown_action_fails_to_decode() {
        let json = serde_json::json!({
            "kind": "route",
            "path": "/users",
            "action": "FETCH",
            "module": "users",
            "handler": "list",
        });
        assert!(serde_json::from_value::<Descriptor>(json).is_err());
    }
}
