//! Generated RPC interface definitions.
//!
//! Every module serves its declared routes through one generic RPC service:
//! each descriptor maps to a method taking the shared request message and
//! returning the shared response message. [`ProtoGenerator`] renders that
//! service as a proto3 interface so clients never need hand-written IDL.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;

/// Placeholder replaced with the normalized module name.
pub const MODULE_NAME_SLOT: &str = "MODULE_NAME";
/// Placeholder replaced with the rendered method list.
pub const MODULE_FUNCTIONS_SLOT: &str = "MODULE_FUNCTIONS";

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid pattern"));

static SLOTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{}|{}",
        regex::escape(MODULE_FUNCTIONS_SLOT),
        regex::escape(MODULE_NAME_SLOT)
    ))
    .expect("valid pattern")
});

/// Default template: one service plus the boxed request/response messages.
pub const DEFAULT_TEMPLATE: &str = r#"syntax = "proto3";
package MODULE_NAME;

service MODULE_NAME {
MODULE_FUNCTIONS
}

message RouterRequest {
  string params = 1;
  string path = 2;
  string headers = 3;
  string context = 4;
  string cookies = 5;
  string body = 6;
  string urlParams = 7;
  string queryParams = 8;
}

message Cookie {
  string name = 1;
  string value = 2;
  string options = 3;
}

message RouterResponse {
  string result = 1;
  repeated Cookie setCookies = 2;
  repeated string removeCookies = 3;
}

message SocketRequest {
  string event = 1;
  string socketId = 2;
  string params = 3;
  string context = 4;
}

message SocketResponse {
  string event = 1;
  string data = 2;
  repeated string receivers = 3;
  repeated string rooms = 4;
}
"#;

/// Output of one generation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProto {
    pub module_name: String,
    pub proto: String,
}

/// Renders interface definitions from a fixed template.
///
/// Constructed once at startup and shared by reference; `generate` keeps no
/// state between calls.
#[derive(Debug, Clone)]
pub struct ProtoGenerator {
    template: String,
    route_request: String,
    route_response: String,
    socket_request: String,
    socket_response: String,
}

impl Default for ProtoGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl ProtoGenerator {
    /// Creates a generator using the default message type names.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            route_request: "RouterRequest".to_string(),
            route_response: "RouterResponse".to_string(),
            socket_request: "SocketRequest".to_string(),
            socket_response: "SocketResponse".to_string(),
        }
    }

    /// Overrides the message type names substituted into method signatures.
    #[must_use]
    pub fn with_message_types(
        mut self,
        route_request: impl Into<String>,
        route_response: impl Into<String>,
        socket_request: impl Into<String>,
        socket_response: impl Into<String>,
    ) -> Self {
        self.route_request = route_request.into();
        self.route_response = route_response.into();
        self.socket_request = socket_request.into();
        self.socket_response = socket_response.into();
        self
    }

    /// Renders the interface for `module_name` from `descriptors`.
    ///
    /// Descriptors sharing a function name emit one method. Socket
    /// descriptors expand to one method per event handler; proxies without
    /// a handler emit nothing.
    #[must_use]
    pub fn generate(&self, module_name: &str, descriptors: &[Descriptor]) -> GeneratedProto {
        let package = normalize_module_name(module_name);
        let mut emitted: HashSet<String> = HashSet::new();
        let mut functions = String::new();

        let mut emit = |function: &str, request: &str, response: &str| {
            let method = capitalize(function);
            if emitted.insert(method.clone()) {
                let _ = writeln!(functions, "  rpc {method}({request}) returns ({response});");
            }
        };

        for descriptor in descriptors {
            match descriptor {
                Descriptor::Route(route) => {
                    emit(route.handler(), &self.route_request, &self.route_response);
                }
                Descriptor::Middleware(middleware) => {
                    emit(&middleware.handler, &self.route_request, &self.route_response);
                }
                Descriptor::Proxy(proxy) => {
                    if let Some(handler) = &proxy.handler {
                        emit(handler, &self.route_request, &self.route_response);
                    }
                }
                Descriptor::Socket(socket) => {
                    for binding in socket.events().values() {
                        emit(&binding.handler, &self.socket_request, &self.socket_response);
                    }
                }
            }
        }

        let functions = functions.trim_end_matches('\n');
        // One pass, so substituted text is never scanned for slots again.
        let proto = SLOTS
            .replace_all(&self.template, |slot: &regex::Captures<'_>| {
                if &slot[0] == MODULE_NAME_SLOT {
                    package.as_str()
                } else {
                    functions
                }
            })
            .into_owned();

        GeneratedProto {
            module_name: package,
            proto,
        }
    }
}

/// Replaces characters not allowed in an IDL package name with `_`.
#[must_use]
pub fn normalize_module_name(name: &str) -> String {
    DISALLOWED.replace_all(name, "_").into_owned()
}

/// Upper-cases the first character of a function identifier.
#[must_use]
pub fn capitalize(function: &str) -> String {
    let mut chars = function.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
