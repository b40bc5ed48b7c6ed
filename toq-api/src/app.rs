/// Application state and router builder
///
/// [`AppState`] is generic over the identity store so the same router runs
/// over Postgres in production and over the in-memory store in tests.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use toq_api::app::{build_router, AppState};
/// use toq_api::config::ApiConfig;
/// use toq_shared::bootstrap;
/// use toq_shared::config::AppConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let runtime = bootstrap::connect(AppConfig::load()?).await?;
/// let state = AppState {
///     identity: runtime.identity.clone(),
///     store: runtime.store.clone(),
///     policy: runtime.policy.clone(),
///     redis: Some(runtime.redis.clone()),
///     config: Arc::new(ApiConfig::from_env()?),
/// };
/// let app = build_router(state);
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use crate::config::ApiConfig;
use crate::middleware::context::require_user;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use toq_shared::identity::IdentityService;
use toq_shared::policy::TransitionPolicy;
use toq_shared::redis::RedisClient;
use toq_shared::repository::IdentityStore;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
pub struct AppState<S: IdentityStore> {
    pub identity: Arc<IdentityService<S>>,

    /// Store used directly by the media callback and the health probe
    pub store: Arc<S>,

    pub policy: Arc<TransitionPolicy>,

    /// Probed by `/health` when present
    pub redis: Option<RedisClient>,

    pub config: Arc<ApiConfig>,
}

impl<S: IdentityStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            redis: self.redis.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET  /health                     # Database and Redis probe (public)
/// └── /v1/
///     ├── /auth/
///     │   ├── POST /signin             # public
///     │   ├── POST /refresh            # public
///     │   └── POST /signout            # bearer
///     ├── POST /media/callback         # X-Toq-Signature
///     └── POST /admin/rules/reload     # bearer, admin or root
/// ```
///
/// # Middleware Stack
///
/// Outermost first: request id, trace, CORS, then bearer authentication on
/// the routes that need it. The request id is echoed on the response.
pub fn build_router<S: IdentityStore>(state: AppState<S>) -> Router {
    use crate::routes;

    let x_request_id = HeaderName::from_static("x-request-id");

    let public_auth = Router::new()
        .route("/signin", post(routes::auth::signin::<S>))
        .route("/refresh", post(routes::auth::refresh::<S>));

    let session_auth = Router::new()
        .route("/signout", post(routes::auth::signout::<S>))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_user::<S>));

    let admin_routes = Router::new()
        .route("/rules/reload", post(routes::admin::reload_rules::<S>))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_user::<S>));

    let v1_routes = Router::new()
        .nest("/auth", public_auth.merge(session_auth))
        .route("/media/callback", post(routes::media::media_callback::<S>))
        .nest("/admin", admin_routes);

    let cors = if state.config.permissive_cors() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .route("/health", get(routes::health::health_check::<S>))
        .nest("/v1", v1_routes)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state)
}
