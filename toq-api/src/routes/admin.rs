/// Administrative endpoints
///
/// `POST /v1/admin/rules/reload` re-reads the transition-rule source and
/// swaps the active set. On a broken source the previous set stays active
/// and the call fails with 500.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::context::Ctx,
};
use axum::{extract::State, Json};
use serde::Serialize;
use toq_shared::models::RoleSlug;
use toq_shared::repository::IdentityStore;

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub rules: usize,
}

pub async fn reload_rules<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Ctx(ctx): Ctx,
) -> ApiResult<Json<ReloadResponse>> {
    let user = ctx
        .user()
        .ok_or_else(|| ApiError::unauthorized("authentication required"))?;
    if !matches!(user.role, RoleSlug::Admin | RoleSlug::Root) {
        return Err(ApiError::forbidden("administrator role required"));
    }

    let rules = state.policy.reload().map_err(|e| ApiError::internal(e.to_string()))?;
    tracing::info!(user_id = user.id, rules, security = true, "Transition rules reloaded on request");
    Ok(Json(ReloadResponse { rules }))
}
