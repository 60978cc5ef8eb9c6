//! `GetConfig` / `SetConfig` and the config listing.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use conduit_core::messages::ModuleConfig;

use super::{ApiError, AppState};

/// # Errors
///
/// 404 if the module never negotiated a config.
pub async fn get_config_handler(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<ModuleConfig>, ApiError> {
    let config = state
        .core
        .configs
        .get(&module)
        .ok_or_else(|| ApiError::NotFound(format!("no config registered for module '{module}'")))?;
    Ok(Json(ModuleConfig { module, config }))
}

/// Applies a partial config. Invalid patches are rejected whole and the
/// previous value stays in effect.
///
/// # Errors
///
/// 422 with the validation errors, 404 for unknown modules.
pub async fn patch_config_handler(
    State(state): State<AppState>,
    Path(module): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<ModuleConfig>, ApiError> {
    let config = state.core.configs.patch(&module, &patch).await?;
    Ok(Json(ModuleConfig { module, config }))
}

pub async fn list_configs_handler(State(state): State<AppState>) -> Json<Vec<ModuleConfig>> {
    Json(state.core.configs.list())
}
