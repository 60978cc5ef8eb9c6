//! Module announce, deregistration, health reports and route registration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use conduit_core::messages::{
    HealthCheckResponse, HealthReport, RegisterModuleRequest, RegisterModuleResponse,
    RegisterRoutesRequest, RegisterRoutesResponse,
};

use super::{ApiError, AppState};

/// `RegisterModule`; with a config declaration also negotiates the config.
///
/// # Errors
///
/// Config negotiation failures map to 422 / 500.
pub async fn register_module_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterModuleRequest>,
) -> Result<Json<RegisterModuleResponse>, ApiError> {
    Ok(Json(state.core.register_module(request).await?))
}

/// # Errors
///
/// 404 for unknown modules.
pub async fn deregister_handler(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.core.deregister(&module)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Records one instance's health and answers the module's aggregate status.
///
/// # Errors
///
/// 404 for unknown modules or instances.
pub async fn report_health_handler(
    State(state): State<AppState>,
    Path(module): Path<String>,
    Json(report): Json<HealthReport>,
) -> Result<Json<HealthCheckResponse>, ApiError> {
    let status = state.core.report_health(&module, &report)?;
    Ok(Json(HealthCheckResponse { status }))
}

/// Compiles a module's route batch. Rejected descriptors are listed in the
/// acknowledgement; the call itself still succeeds.
///
/// # Errors
///
/// 404 when the module never announced.
pub async fn register_routes_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRoutesRequest>,
) -> Result<Json<RegisterRoutesResponse>, ApiError> {
    Ok(Json(state.core.register_routes(request)?))
}

#[cfg(test)]
mod tests {
    use conduit_core::{RouteBatch, RouteDescriptor, ServingStatus};

    use super::*;
    use crate::network::handlers::tests::test_state;

    fn announce() -> RegisterModuleRequest {
        RegisterModuleRequest {
            name: "files".to_string(),
            address: "http://f:1".to_string(),
            health: ServingStatus::Serving,
            config: None,
        }
    }

    #[tokio::test]
    async fn full_registration_flow() {
        let state = test_state();
        let response = register_module_handler(State(state.clone()), Json(announce()))
            .await
            .unwrap();
        assert_eq!(response.0.name, "files");
        assert!(response.0.effective_config.is_none());

        let routes = RegisterRoutesRequest {
            batch: RouteBatch::new(
                "files",
                vec![RouteDescriptor::builder("files", "/files/:id", "GET", "getFile")
                    .build()
                    .unwrap()
                    .into()],
            ),
            proto: None,
        };
        let ack = register_routes_handler(State(state.clone()), Json(routes))
            .await
            .unwrap();
        assert_eq!(ack.0.accepted, 1);

        let report = HealthReport {
            address: "http://f:1".to_string(),
            status: ServingStatus::NotServing,
        };
        let status = report_health_handler(
            State(state.clone()),
            Path("files".to_string()),
            Json(report),
        )
        .await
        .unwrap();
        assert_eq!(status.0.status, ServingStatus::NotServing);

        let code = deregister_handler(State(state.clone()), Path("files".to_string()))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::NO_CONTENT);
        assert!(state.core.compiler.snapshot().module("files").is_none());
    }

    #[tokio::test]
    async fn deregistering_unknown_module_is_not_found() {
        let state = test_state();
        let err = deregister_handler(State(state), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
