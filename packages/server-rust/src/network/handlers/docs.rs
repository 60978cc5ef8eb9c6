//! Documentation surfaces derived from the current routing table.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use super::{ApiError, AppState};
use crate::routing::surface::{graphql, openapi, tools};

pub async fn openapi_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(openapi::build(&state.core.compiler.snapshot()))
}

pub async fn graphql_handler(State(state): State<AppState>) -> impl IntoResponse {
    let table = state.core.compiler.snapshot();
    let sdl = graphql::render(table.modules().map(|compiled| &compiled.graphql));
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], sdl)
}

pub async fn tools_handler(State(state): State<AppState>) -> Json<Vec<tools::ToolSpec>> {
    Json(tools::build(&state.core.compiler.snapshot()))
}

/// Generated RPC interface of one module.
///
/// # Errors
///
/// 404 if the module has no compiled routes.
pub async fn proto_handler(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let table = state.core.compiler.snapshot();
    let compiled = table
        .module(&module)
        .ok_or_else(|| ApiError::NotFound(format!("module '{module}' has no compiled routes")))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        compiled.proto.proto.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use conduit_core::{RouteBatch, RouteDescriptor};

    use super::*;
    use crate::network::handlers::tests::test_state;

    fn compiled_state() -> AppState {
        let state = test_state();
        state.core.compiler.compile(RouteBatch::new(
            "user-service",
            vec![RouteDescriptor::builder("user-service", "/users", "GET", "listUsers")
                .description("List users")
                .build()
                .unwrap()
                .into()],
        ));
        state
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn proto_is_served_per_module() {
        let state = compiled_state();
        let response = proto_handler(State(state.clone()), Path("user-service".to_string()))
            .await
            .unwrap()
            .into_response();
        let text = body_text(response).await;
        assert!(text.contains("package user_service;"));
        assert!(text.contains("rpc ListUsers("));

        let err = proto_handler(State(state), Path("nope".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_lists_compiled_paths() {
        let state = compiled_state();
        let text = body_text(openapi_handler(State(state)).await.into_response()).await;
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(doc["paths"]["/users"]["get"].is_object());
    }

    #[tokio::test]
    async fn tools_and_graphql_render() {
        let state = compiled_state();
        let tools = tools_handler(State(state.clone())).await.0;
        assert_eq!(tools.len(), 1);
        let sdl = body_text(graphql_handler(State(state)).await.into_response()).await;
        assert!(sdl.contains("type Query"));
    }
}
