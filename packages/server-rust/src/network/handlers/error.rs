//! JSON error responses for the control-plane endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::service::config_store::ConfigError;
use crate::service::control::ControlError;
use crate::service::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("{0}")]
    NotFound(String),
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Control(ControlError::Config(err))
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_)
            | ApiError::Control(
                ControlError::UnknownModule(_)
                | ControlError::Registry(_)
                | ControlError::Config(ConfigError::UnknownModule(_)),
            ) => StatusCode::NOT_FOUND,
            ApiError::Control(ControlError::ModuleMismatch { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Control(ControlError::Config(ConfigError::Validation { .. })) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Control(ControlError::Config(ConfigError::Persistence { .. })) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Control(ControlError::Config(ConfigError::Validation { errors, .. })) => {
                json!({ "error": self.to_string(), "errors": errors })
            }
            ApiError::Control(ControlError::Registry(RegistryError::UnknownInstance {
                module,
                address,
            })) => json!({
                "error": self.to_string(),
                "module": module,
                "address": address,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
