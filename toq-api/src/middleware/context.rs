/// Request context and authentication
///
/// `SetRequestIdLayer` stamps every request with `x-request-id` before any
/// handler runs. [`Ctx`] turns that id, an optional `x-trace-id` and the
/// caller identity left by [`require_user`] into the
/// [`RequestContext`] passed to the identity service.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use toq_shared::auth::jwt::UserInfos;
use toq_shared::repository::IdentityStore;
use toq_shared::telemetry::RequestContext;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Extracted request context
#[derive(Debug, Clone)]
pub struct Ctx(pub RequestContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Ctx {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_str(&parts.headers, REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let trace_id = header_str(&parts.headers, TRACE_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| request_id.clone());

        let ctx = RequestContext::new(request_id, trace_id);
        Ok(Ctx(match parts.extensions.get::<UserInfos>() {
            Some(user) => ctx.with_user(*user),
            None => ctx,
        }))
    }
}

/// Raw bearer token of an authenticated request
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Requires a valid, non-revoked access token
///
/// Inserts the caller's [`UserInfos`] and the [`BearerToken`] into the
/// request extensions.
pub async fn require_user<S: IdentityStore>(
    State(state): State<AppState<S>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = header_str(req.headers(), header::AUTHORIZATION.as_str())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::BadRequest("Expected Bearer token".to_string()))?
        .to_string();

    let user = state.identity.authenticate(&token).await?;

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(BearerToken(token));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    async fn extract(req: HttpRequest<()>) -> RequestContext {
        let (mut parts, _) = req.into_parts();
        Ctx::from_request_parts(&mut parts, &()).await.unwrap().0
    }

    #[tokio::test]
    async fn test_ids_come_from_headers() {
        let req = HttpRequest::builder()
            .header(REQUEST_ID_HEADER, "req-1")
            .header(TRACE_ID_HEADER, "trace-9")
            .body(())
            .unwrap();
        let ctx = extract(req).await;
        assert_eq!(ctx.request_id(), "req-1");
        assert_eq!(ctx.trace_id(), "trace-9");
        assert!(ctx.user().is_none());
        assert!(ctx.is_traced());
    }

    #[tokio::test]
    async fn test_trace_defaults_to_request_id() {
        let req = HttpRequest::builder()
            .header(REQUEST_ID_HEADER, "req-2")
            .body(())
            .unwrap();
        let ctx = extract(req).await;
        assert_eq!(ctx.trace_id(), "req-2");
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let ctx = extract(HttpRequest::builder().body(()).unwrap()).await;
        assert_eq!(ctx.request_id().len(), 32);
    }
}
