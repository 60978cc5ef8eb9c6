//! Fallback handler feeding every unmatched HTTP request into the gateway.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{HeaderName, HeaderValue, SET_COOKIE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tower::ServiceExt;

use conduit_core::messages::{CallOutcome, Cookie, JsonMap, ProxyResult, RouteResult};
use conduit_core::Action;

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::routing::{GatewayError, GatewayRequest, RestRequest};

pub async fn gateway_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(action) = method.as_str().parse::<Action>() else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": format!("method {method} is not routable") })),
        )
            .into_response();
    };

    let query = match parse_query(&uri) {
        Ok(query) => query,
        Err(message) => return GatewayError::BadRequest(message).into_response(),
    };

    let _guard = state.shutdown.in_flight_guard();
    let request = RestRequest {
        action,
        path: uri.path().to_string(),
        raw_query: uri.query().map(str::to_string),
        query,
        request_id: request_id(&headers),
        headers: header_map(&headers),
        body,
    };

    match state
        .gateway
        .clone()
        .oneshot(GatewayRequest::Rest(request))
        .await
    {
        Ok(CallOutcome::Route(result)) => route_response(result),
        Ok(CallOutcome::Proxy(result)) => proxy_response(result),
        Ok(CallOutcome::Socket(_)) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Lower-cased header names; repeated headers are joined with `, `.
pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        map.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

/// Request id set by the HTTP layers, or a fresh one.
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

/// Query pairs decoded by axum's form decoder; the last repeat wins.
fn parse_query(uri: &Uri) -> Result<JsonMap, String> {
    let Query(pairs) =
        Query::<Vec<(String, String)>>::try_from_uri(uri).map_err(|e| e.body_text())?;
    Ok(pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect())
}

fn cookie_header(cookie: &Cookie) -> String {
    if cookie.options.is_empty() {
        format!("{}={}", cookie.name, cookie.value)
    } else {
        format!("{}={}; {}", cookie.name, cookie.value, cookie.options)
    }
}

fn route_response(result: RouteResult) -> Response {
    let mut response = Json(result.value).into_response();
    let headers = response.headers_mut();
    let set = result.set_cookies.iter().map(cookie_header);
    let removed = result
        .remove_cookies
        .iter()
        .map(|name| format!("{name}=; Max-Age=0; Path=/"));
    for cookie in set.chain(removed) {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
    response
}

fn proxy_response(result: ProxyResult) -> Response {
    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, result.body).into_response();
    let headers = response.headers_mut();
    for (name, value) in result.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    response
}
