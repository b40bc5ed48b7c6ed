//! # Toq API Server
//!
//! Composition root of the HTTP process: loads configuration once, applies
//! pending migrations, wires the identity service through
//! `toq_shared::bootstrap` and serves the router until Ctrl+C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p toq-api
//! ```

use std::sync::Arc;

use anyhow::Context;
use toq_api::app::{build_router, AppState};
use toq_api::config::ApiConfig;
use toq_shared::bootstrap;
use toq_shared::config::AppConfig;
use toq_shared::db::migrations::run_migrations;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Toq API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let api_config = ApiConfig::from_env()?;
    let config = AppConfig::load().context("failed to load configuration")?;
    let runtime = bootstrap::connect(config).await?;

    if api_config.run_migrations {
        run_migrations(&runtime.pool)
            .await
            .context("failed to run database migrations")?;
    }
    if api_config.media_callback_secret.is_none() {
        tracing::warn!("MEDIA_CALLBACK_SECRET is not set; media callbacks are accepted unsigned");
    }

    let bind_address = api_config.bind_address();
    let state = AppState {
        identity: Arc::clone(&runtime.identity),
        store: Arc::clone(&runtime.store),
        policy: Arc::clone(&runtime.policy),
        redis: Some(runtime.redis.clone()),
        config: Arc::new(api_config),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    toq_shared::db::pool::close_pool(runtime.pool).await;
    tracing::info!("Server shut down");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "toq_api=debug,toq_shared=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
