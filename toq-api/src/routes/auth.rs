/// Session endpoints
///
/// - `POST /v1/auth/signin` - national id + password, returns a token pair
/// - `POST /v1/auth/refresh` - exchanges a refresh token
/// - `POST /v1/auth/signout` - bearer; blocklists the access token and
///   optionally prunes the device's push token

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::context::{BearerToken, Ctx},
};
use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use toq_shared::auth::jwt::TokenPair;
use toq_shared::identity::validate::parse_device_id;
use toq_shared::identity::SigninRequest;
use toq_shared::repository::IdentityStore;

/// Refresh request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Signout request; the body is optional
#[derive(Debug, Default, Deserialize)]
pub struct SignoutRequest {
    #[serde(default)]
    pub device_id: Option<String>,
}

pub async fn signin<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Ctx(ctx): Ctx,
    Json(req): Json<SigninRequest>,
) -> ApiResult<Json<TokenPair>> {
    let tokens = state.identity.signin(&ctx, req).await?;
    Ok(Json(tokens))
}

pub async fn refresh<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Ctx(ctx): Ctx,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    if req.refresh_token.trim().is_empty() {
        return Err(ApiError::BadRequest("refresh_token is required".to_string()));
    }
    let tokens = state.identity.refresh(&ctx, &req.refresh_token).await?;
    Ok(Json(tokens))
}

pub async fn signout<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Ctx(ctx): Ctx,
    Extension(BearerToken(token)): Extension<BearerToken>,
    body: Option<Json<SignoutRequest>>,
) -> ApiResult<Json<TokenPair>> {
    let device_id = match body.and_then(|Json(b)| b.device_id) {
        Some(raw) => Some(parse_device_id(&raw)?),
        None => None,
    };
    let expired = state.identity.signout(&ctx, &token, device_id).await?;
    Ok(Json(expired))
}
