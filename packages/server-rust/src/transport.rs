//! Shared HTTP/JSON transport plumbing for core -> module and module -> core calls.

use serde::de::DeserializeOwned;

/// A failed RPC, tagged with the operation and the peer it targeted.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} to {target} failed: {source}")]
    Request {
        operation: &'static str,
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} to {target} returned {status}: {body}")]
    Status {
        operation: &'static str,
        target: String,
        status: u16,
        body: String,
    },
    #[error("{operation} to {target} failed: {message}")]
    Channel {
        operation: &'static str,
        target: String,
        message: String,
    },
}

impl TransportError {
    /// HTTP status returned by the peer, if it answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends `request` and decodes a JSON response body.
///
/// # Errors
///
/// Returns [`TransportError::Request`] on connection or decode failures and
/// [`TransportError::Status`] on non-2xx responses.
pub async fn send_json<T: DeserializeOwned>(
    operation: &'static str,
    target: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, TransportError> {
    let response = request
        .send()
        .await
        .map_err(|source| TransportError::Request {
            operation,
            target: target.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            operation,
            target: target.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|source| TransportError::Request {
            operation,
            target: target.to_string(),
            source,
        })
}

/// Joins a base URL and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
