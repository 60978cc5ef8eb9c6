//! Generic per-module RPC surface.
//!
//! On the wire every call uses one request and one response message whose
//! dynamically shaped fields are boxed as JSON strings, so modules can add
//! routes without regenerating stubs. Internal code never touches those
//! strings: it works with [`CallEnvelope`] and [`CallOutcome`], and the
//! conversion happens only in the `encode_*` / `decode_*` functions here.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object used for params and context.
pub type JsonMap = Map<String, Value>;

/// Errors converting between typed envelopes and the boxed wire format.
#[derive(Debug, thiserror::Error)]
pub enum RpcCodecError {
    #[error("field '{field}' is not valid JSON: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode field '{field}': {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("socket call is missing its event name")]
    MissingEvent,
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Which kind of call a boxed request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallKind {
    #[default]
    Route,
    Socket,
}

/// Boxed request message (`RouterRequest` / `SocketRequest`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleCallRequest {
    pub kind: CallKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    pub params: String,
    pub path: String,
    pub headers: String,
    pub context: String,
    pub cookies: String,
    pub body: String,
    pub url_params: String,
    pub query_params: String,
}

/// A cookie the caller should set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Raw attribute string, e.g. `Path=/; HttpOnly`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,
}

/// Boxed response message (`RouterResponse` / `SocketResponse`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleCallResponse {
    pub result: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub set_cookies: Vec<Cookie>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_cookies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Typed envelopes
// ---------------------------------------------------------------------------

/// A REST call routed to a module function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteCall {
    /// Canonical route path (with `:param` segments).
    pub path: String,
    /// Query, body and url params merged into one object.
    pub params: JsonMap,
    pub headers: BTreeMap<String, String>,
    pub context: JsonMap,
    pub cookies: BTreeMap<String, String>,
    pub body: Value,
    pub url_params: BTreeMap<String, String>,
    pub query_params: JsonMap,
}

impl RouteCall {
    /// Rebuilds `params` from the url, query and body parts. Url params win
    /// over query params, which win over body fields.
    pub fn merge_params(&mut self) {
        let mut params = JsonMap::new();
        if let Value::Object(body) = &self.body {
            params.extend(body.clone());
        }
        params.extend(self.query_params.clone());
        params.extend(
            self.url_params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone()))),
        );
        self.params = params;
    }
}

/// A socket event routed to a module function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketCall {
    pub event: String,
    pub socket_id: String,
    pub params: Value,
    pub context: JsonMap,
}

/// A call as internal code sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEnvelope {
    Route(RouteCall),
    Socket(SocketCall),
}

impl CallEnvelope {
    #[must_use]
    pub fn kind(&self) -> CallKind {
        match self {
            CallEnvelope::Route(_) => CallKind::Route,
            CallEnvelope::Socket(_) => CallKind::Socket,
        }
    }

    /// Mutable access to the call context (middleware output lands here).
    pub fn context_mut(&mut self) -> &mut JsonMap {
        match self {
            CallEnvelope::Route(call) => &mut call.context,
            CallEnvelope::Socket(call) => &mut call.context,
        }
    }
}

/// Result of a REST call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteResult {
    pub value: Value,
    pub set_cookies: Vec<Cookie>,
    pub remove_cookies: Vec<String>,
}

/// Result of a socket event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketResult {
    pub event: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rooms: Vec<String>,
}

/// Result of a reverse-proxied request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Any call result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Route(RouteResult),
    Socket(SocketResult),
    Proxy(ProxyResult),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

fn boxed<T: Serialize>(field: &'static str, value: &T) -> Result<String, RpcCodecError> {
    serde_json::to_string(value).map_err(|source| RpcCodecError::Encode { field, source })
}

fn unboxed<T: DeserializeOwned + Default>(
    field: &'static str,
    raw: &str,
) -> Result<T, RpcCodecError> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|source| RpcCodecError::Field { field, source })
}

/// Boxes a typed call into the wire request.
///
/// # Errors
///
/// Returns [`RpcCodecError::Encode`] if a field cannot be serialized.
pub fn encode_call(call: &CallEnvelope) -> Result<ModuleCallRequest, RpcCodecError> {
    match call {
        CallEnvelope::Route(route) => Ok(ModuleCallRequest {
            kind: CallKind::Route,
            event: None,
            socket_id: None,
            params: boxed("params", &route.params)?,
            path: route.path.clone(),
            headers: boxed("headers", &route.headers)?,
            context: boxed("context", &route.context)?,
            cookies: boxed("cookies", &route.cookies)?,
            body: boxed("body", &route.body)?,
            url_params: boxed("urlParams", &route.url_params)?,
            query_params: boxed("queryParams", &route.query_params)?,
        }),
        CallEnvelope::Socket(socket) => Ok(ModuleCallRequest {
            kind: CallKind::Socket,
            event: Some(socket.event.clone()),
            socket_id: Some(socket.socket_id.clone()),
            params: boxed("params", &socket.params)?,
            context: boxed("context", &socket.context)?,
            ..ModuleCallRequest::default()
        }),
    }
}

/// Unboxes a wire request into a typed call.
///
/// # Errors
///
/// Returns [`RpcCodecError::Field`] naming the first field that is not
/// valid JSON, or [`RpcCodecError::MissingEvent`] for a socket call
/// without an event.
pub fn decode_call(request: &ModuleCallRequest) -> Result<CallEnvelope, RpcCodecError> {
    match request.kind {
        CallKind::Route => Ok(CallEnvelope::Route(RouteCall {
            path: request.path.clone(),
            params: unboxed("params", &request.params)?,
            headers: unboxed("headers", &request.headers)?,
            context: unboxed("context", &request.context)?,
            cookies: unboxed("cookies", &request.cookies)?,
            body: unboxed("body", &request.body)?,
            url_params: unboxed("urlParams", &request.url_params)?,
            query_params: unboxed("queryParams", &request.query_params)?,
        })),
        CallKind::Socket => Ok(CallEnvelope::Socket(SocketCall {
            event: request.event.clone().ok_or(RpcCodecError::MissingEvent)?,
            socket_id: request.socket_id.clone().unwrap_or_default(),
            params: unboxed("params", &request.params)?,
            context: unboxed("context", &request.context)?,
        })),
    }
}

/// Boxes a module-side result into the wire response.
///
/// Proxy results never travel over the module RPC surface and encode as an
/// empty response.
///
/// # Errors
///
/// Returns [`RpcCodecError::Encode`] if the result cannot be serialized.
pub fn encode_outcome(outcome: &CallOutcome) -> Result<ModuleCallResponse, RpcCodecError> {
    match outcome {
        CallOutcome::Route(route) => Ok(ModuleCallResponse {
            result: boxed("result", &route.value)?,
            set_cookies: route.set_cookies.clone(),
            remove_cookies: route.remove_cookies.clone(),
        }),
        CallOutcome::Socket(socket) => Ok(ModuleCallResponse {
            result: boxed("result", socket)?,
            ..ModuleCallResponse::default()
        }),
        CallOutcome::Proxy(_) => Ok(ModuleCallResponse::default()),
    }
}

/// Unboxes a wire response for a call of `kind`.
///
/// # Errors
///
/// Returns [`RpcCodecError::Field`] if `result` is not valid JSON.
pub fn decode_outcome(
    kind: CallKind,
    response: ModuleCallResponse,
) -> Result<CallOutcome, RpcCodecError> {
    match kind {
        CallKind::Route => Ok(CallOutcome::Route(RouteResult {
            value: unboxed("result", &response.result)?,
            set_cookies: response.set_cookies,
            remove_cookies: response.remove_cookies,
        })),
        CallKind::Socket => Ok(CallOutcome::Socket(unboxed("result", &response.result)?)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_route() -> RouteCall {
        let mut call = RouteCall {
            path: "/users/:id".to_string(),
            body: json!({"name": "ada", "id": "body-id"}),
            ..RouteCall::default()
        };
        call.url_params.insert("id".to_string(), "42".to_string());
        call.query_params.insert("expand".to_string(), json!("true"));
        call.headers
            .insert("x-request-id".to_string(), "abc".to_string());
        call.merge_params();
        call
    }

    #[test]
    fn url_params_override_body_fields() {
        let call = sample_route();
        assert_eq!(call.params["id"], json!("42"));
        assert_eq!(call.params["name"], json!("ada"));
        assert_eq!(call.params["expand"], json!("true"));
    }

    #[test]
    fn route_fields_are_boxed_as_json_strings() {
        let request = encode_call(&CallEnvelope::Route(sample_route())).unwrap();
        assert_eq!(request.kind, CallKind::Route);
        assert_eq!(request.path, "/users/:id");
        assert_eq!(request.url_params, r#"{"id":"42"}"#);
        let decoded = decode_call(&request).unwrap();
        assert_eq!(decoded, CallEnvelope::Route(sample_route()));
    }

    #[test]
    fn empty_fields_decode_to_defaults() {
        let request = ModuleCallRequest {
            path: "/ping".to_string(),
            ..ModuleCallRequest::default()
        };
        let CallEnvelope::Route(call) = decode_call(&request).unwrap() else {
            panic!("expected route call");
        };
        assert!(call.params.is_empty());
        assert_eq!(call.body, Value::Null);
    }

    #[test]
    fn malformed_field_names_the_field() {
        let request = ModuleCallRequest {
            headers: "{not json".to_string(),
            ..ModuleCallRequest::default()
        };
        let err = decode_call(&request).unwrap_err();
        assert!(matches!(err, RpcCodecError::Field { field: "headers", .. }));
    }

    #[test]
    fn socket_call_requires_event() {
        let request = ModuleCallRequest {
            kind: CallKind::Socket,
            ..ModuleCallRequest::default()
        };
        assert!(matches!(
            decode_call(&request).unwrap_err(),
            RpcCodecError::MissingEvent
        ));
    }

    #[test]
    fn route_outcome_keeps_cookies() {
        let outcome = CallOutcome::Route(RouteResult {
            value: json!({"ok": true}),
            set_cookies: vec![Cookie {
                name: "session".to_string(),
                value: "s1".to_string(),
                options: "HttpOnly".to_string(),
            }],
            remove_cookies: vec!["old".to_string()],
        });
        let response = encode_outcome(&outcome).unwrap();
        assert_eq!(response.result, r#"{"ok":true}"#);
        assert_eq!(decode_outcome(CallKind::Route, response).unwrap(), outcome);
    }

    #[test]
    fn socket_outcome_boxes_event_and_data() {
        let outcome = CallOutcome::Socket(SocketResult {
            event: "message".to_string(),
            data: json!("hi"),
            receivers: vec!["s2".to_string()],
            rooms: Vec::new(),
        });
        let response = encode_outcome(&outcome).unwrap();
        let json: Value = serde_json::from_str(&response.result).unwrap();
        assert_eq!(json["event"], "message");
        assert_eq!(decode_outcome(CallKind::Socket, response).unwrap(), outcome);
    }
}
