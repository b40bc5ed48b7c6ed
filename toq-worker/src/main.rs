//! # Toq Worker
//!
//! Background process of the identity core. It connects to the same
//! Postgres and Redis as the API, wires the identity service and runs every
//! reconciler on the interval configured in `WorkerConfig`.
//!
//! Migrations are applied by the API; the worker only warns when the
//! schema is behind.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p toq-worker
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use toq_shared::bootstrap::{self, Runtime};
use toq_shared::config::AppConfig;
use toq_shared::db::migrations::get_migration_status;
use toq_worker::reconcilers::{
    AgendaReconciler, DeviceTokenReconciler, MediaJobCleanupReconciler, MediaJobReconciler,
    SessionReconciler, TempBlockReconciler, ValidationReconciler,
};
use toq_worker::scheduler::Scheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Toq Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    let runtime = bootstrap::connect(config).await?;

    match get_migration_status(&runtime.pool).await {
        Ok(status) if !status.is_up_to_date => tracing::warn!(
            applied = status.applied_migrations,
            latest = ?status.latest_version,
            "Database schema is behind; start the API to migrate"
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read migration status"),
    }

    let scheduler = build_scheduler(&runtime);
    let token = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        token.cancel();
    });

    tracing::info!(reconcilers = scheduler.len(), "Worker ready");
    let result = scheduler.run().await;

    toq_shared::db::pool::close_pool(runtime.pool).await;
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "toq_worker=debug,toq_shared=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_scheduler(runtime: &Runtime) -> Scheduler {
    let cfg = &runtime.config.worker;
    let batch = cfg.batch_size;
    let secs = Duration::from_secs;
    let mut scheduler = Scheduler::new();

    scheduler.register(
        Arc::new(TempBlockReconciler::new(Arc::clone(&runtime.identity), batch)),
        secs(cfg.temp_block_interval_secs),
    );
    scheduler.register(
        Arc::new(DeviceTokenReconciler::new(
            Arc::clone(&runtime.device_tokens),
            chrono::Duration::days(cfg.device_token_max_age_days),
            batch,
        )),
        secs(cfg.device_token_interval_secs),
    );
    scheduler.register(
        Arc::new(SessionReconciler::new(
            Arc::clone(&runtime.store),
            chrono::Duration::seconds(cfg.session_max_age_secs),
            batch,
        )),
        secs(cfg.session_interval_secs),
    );
    scheduler.register(
        Arc::new(ValidationReconciler::new(Arc::clone(&runtime.store), batch)),
        secs(cfg.validation_interval_secs),
    );
    scheduler.register(
        Arc::new(MediaJobReconciler::new(
            Arc::clone(&runtime.store),
            chrono::Duration::seconds(cfg.media_job_timeout_secs),
            batch,
        )),
        secs(cfg.media_job_interval_secs),
    );
    scheduler.register(
        Arc::new(MediaJobCleanupReconciler::new(
            Arc::clone(&runtime.store),
            chrono::Duration::days(cfg.media_job_retention_days),
            batch,
        )),
        secs(cfg.media_cleanup_interval_secs),
    );
    scheduler.register(
        Arc::new(AgendaReconciler::new(
            Arc::clone(&runtime.store),
            Arc::clone(&runtime.photo_sessions),
            runtime.config.identity.agenda_horizon_months,
            batch,
        )),
        secs(cfg.agenda_interval_secs),
    );

    scheduler
}
