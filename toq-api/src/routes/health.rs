/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "redis": "connected"
/// }
/// ```
///
/// `status` is `degraded` when a dependency is down; `redis` is `disabled`
/// when the process runs without Redis.

use crate::app::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use toq_shared::repository::IdentityStore;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub redis: String,
}

pub async fn health_check<S: IdentityStore>(
    State(state): State<AppState<S>>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.store.begin_read_only().await {
        Ok(tx) => {
            if let Err(e) = state.store.rollback(tx).await {
                tracing::warn!(error = %e, "Health probe rollback failed");
            }
            "connected"
        }
        Err(e) => {
            tracing::warn!(error = %e, "Database health probe failed");
            "disconnected"
        }
    };

    let redis = match &state.redis {
        Some(client) => match client.ping().await {
            Ok(true) => "connected",
            Ok(false) => "disconnected",
            Err(e) => {
                tracing::warn!(error = %e, "Redis health probe failed");
                "disconnected"
            }
        },
        None => "disabled",
    };

    let healthy = database == "connected" && redis != "disconnected";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            redis: redis.to_string(),
        }),
    )
}
