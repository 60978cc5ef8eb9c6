//! Administrative introspection: modules, compiled routes, middlewares.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use conduit_core::messages::{ModuleDetails, Rejection};
use conduit_core::{Action, MiddlewareDescriptor};

use super::AppState;

pub async fn list_modules_handler(State(state): State<AppState>) -> Json<Vec<ModuleDetails>> {
    Json(state.core.registry.module_details())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub module: String,
    pub kind: &'static str,
    pub action: Option<Action>,
    /// Public path after namespace prefixing.
    pub path: String,
    pub handler: Option<String>,
    pub middlewares: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRoutes {
    pub module: String,
    pub fingerprint: String,
    pub routes: Vec<RouteSummary>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesOverview {
    pub version: u64,
    pub modules: Vec<ModuleRoutes>,
}

pub async fn list_routes_handler(State(state): State<AppState>) -> Json<RoutesOverview> {
    let table = state.core.compiler.snapshot();
    let modules = table
        .modules()
        .map(|compiled| {
            let mut routes: Vec<RouteSummary> = compiled
                .routes
                .iter()
                .map(|entry| RouteSummary {
                    module: entry.module.clone(),
                    kind: "route",
                    action: Some(entry.descriptor.action()),
                    path: entry.public_path.clone(),
                    handler: Some(entry.descriptor.handler().to_string()),
                    middlewares: entry.descriptor.middlewares().to_vec(),
                })
                .collect();
            routes.extend(compiled.proxies.iter().map(|entry| RouteSummary {
                module: entry.module.clone(),
                kind: "proxy",
                action: Some(entry.descriptor.action),
                path: entry.public_path.clone(),
                handler: entry.descriptor.handler.clone(),
                middlewares: entry.descriptor.middlewares.clone(),
            }));
            routes.extend(compiled.sockets.iter().map(|entry| RouteSummary {
                module: entry.module.clone(),
                kind: "socket",
                action: None,
                path: entry.public_path.clone(),
                handler: None,
                middlewares: entry.descriptor.middlewares().to_vec(),
            }));
            ModuleRoutes {
                module: compiled.name.clone(),
                fingerprint: compiled.fingerprint.clone(),
                routes,
                rejected: compiled.rejected.clone(),
            }
        })
        .collect();
    Json(RoutesOverview {
        version: table.version(),
        modules,
    })
}

pub async fn list_middlewares_handler(
    State(state): State<AppState>,
) -> Json<Vec<MiddlewareDescriptor>> {
    let table = state.core.compiler.snapshot();
    Json(
        table
            .modules()
            .flat_map(|compiled| compiled.middlewares.iter().cloned())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use conduit_core::messages::RegisterRoutesRequest;
    use conduit_core::{RouteBatch, RouteDescriptor, ServingStatus};

    use super::*;
    use crate::network::handlers::tests::test_state;

    #[tokio::test]
    async fn routes_and_middlewares_are_listed() {
        let state = test_state();
        state
            .core
            .registry
            .update_module("auth", "http://a:1", ServingStatus::Serving);
        state
            .core
            .register_routes(RegisterRoutesRequest {
                batch: RouteBatch::new(
                    "auth",
                    vec![
                        MiddlewareDescriptor {
                            name: "authMiddleware".to_string(),
                            module: "auth".to_string(),
                            handler: "authenticate".to_string(),
                            description: String::new(),
                        }
                        .into(),
                        RouteDescriptor::builder("auth", "/login", "POST", "login")
                            .build()
                            .unwrap()
                            .into(),
                    ],
                ),
                proto: None,
            })
            .unwrap();

        let overview = list_routes_handler(State(state.clone())).await.0;
        assert_eq!(overview.version, 1);
        assert_eq!(overview.modules[0].routes[0].path, "/login");

        let middlewares = list_middlewares_handler(State(state.clone())).await.0;
        assert_eq!(middlewares[0].name, "authMiddleware");

        let modules = list_modules_handler(State(state)).await.0;
        assert_eq!(modules[0].name, "auth");
    }
}
