//! Core -> module calls: health probes, route pulls, RPC dispatch and proxying.

use async_trait::async_trait;
use bytes::Bytes;

use conduit_core::messages::{
    HealthCheckResponse, ModuleCallRequest, ModuleCallResponse, ProxyResult,
    RegisterRoutesRequest,
};
use conduit_core::{Action, ServingStatus};

use crate::transport::{join_url, send_json, TransportError};

/// A request forwarded verbatim to a proxy target.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub action: Action,
    /// Full upstream URL including the query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Client the core uses to reach module instances.
///
/// Used as `Arc<dyn ModuleClient>`.
#[async_trait]
pub trait ModuleClient: Send + Sync {
    /// Asks the instance at `address` for its own health.
    async fn health(&self, address: &str) -> Result<ServingStatus, TransportError>;

    /// Fetches the descriptor set the instance last published.
    async fn routes(&self, address: &str) -> Result<RegisterRoutesRequest, TransportError>;

    /// Invokes `function` on the instance at `address`.
    async fn call(
        &self,
        address: &str,
        function: &str,
        request: ModuleCallRequest,
    ) -> Result<ModuleCallResponse, TransportError>;

    /// Forwards a request to an external proxy target.
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResult, TransportError>;
}

/// [`ModuleClient`] over HTTP/JSON.
#[derive(Debug, Clone, Default)]
pub struct HttpModuleClient {
    http: reqwest::Client,
}

impl HttpModuleClient {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn method(action: Action) -> reqwest::Method {
    match action {
        Action::Get => reqwest::Method::GET,
        Action::Post => reqwest::Method::POST,
        Action::Put => reqwest::Method::PUT,
        Action::Patch => reqwest::Method::PATCH,
        Action::Delete => reqwest::Method::DELETE,
    }
}

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "host",
];

#[async_trait]
impl ModuleClient for HttpModuleClient {
    async fn health(&self, address: &str) -> Result<ServingStatus, TransportError> {
        let response: HealthCheckResponse =
            send_json("health", address, self.http.get(join_url(address, "health"))).await?;
        Ok(response.status)
    }

    async fn routes(&self, address: &str) -> Result<RegisterRoutesRequest, TransportError> {
        send_json("routes", address, self.http.get(join_url(address, "routes"))).await
    }

    async fn call(
        &self,
        address: &str,
        function: &str,
        request: ModuleCallRequest,
    ) -> Result<ModuleCallResponse, TransportError> {
        let url = join_url(address, &format!("rpc/{function}"));
        send_json("call", address, self.http.post(url).json(&request)).await
    }

    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResult, TransportError> {
        let mut builder = self
            .http
            .request(method(request.action), &request.url)
            .body(request.body);
        for (name, value) in &request.headers {
            if !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                builder = builder.header(name, value);
            }
        }

        let to_error = |source| TransportError::Request {
            operation: "forward",
            target: request.url.clone(),
            source,
        };
        let response = builder.send().await.map_err(to_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(to_error)?.to_vec();
        Ok(ProxyResult {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_map_to_http_methods() {
        assert_eq!(method(Action::Get), reqwest::Method::GET);
        assert_eq!(method(Action::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn unreachable_module_is_a_request_error() {
        let client = HttpModuleClient::default();
        let err = client.health("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, TransportError::Request { operation: "health", .. }));
    }
}
