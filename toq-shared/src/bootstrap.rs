//! Production wiring shared by the binaries
//!
//! Each binary loads [`AppConfig`] once, calls [`connect`] and keeps the
//! returned [`Runtime`] for its lifetime. Everything the identity service
//! depends on is built here, from the injected configuration only.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use crate::auth::jwt::TokenIssuer;
use crate::blocklist::RedisBlocklist;
use crate::config::AppConfig;
use crate::db::pool::create_pool;
use crate::db::{PgDeviceTokens, PgPhotoSessions, PgStore};
use crate::events::SessionEventBus;
use crate::identity::{IdentityDeps, IdentityService};
use crate::notification::{HttpRelayGateway, NotificationService};
use crate::policy::TransitionPolicy;
use crate::redis::RedisClient;
use crate::repository::{
    DeviceTokenRegistry, NoopListingCleanup, PhotoSessionPort, RedisPermissionCache,
};
use crate::storage::{S3ObjectStore, StorageService};
use crate::verification::HttpIdentityVerifier;

/// Connected adapters plus the identity service built over them
pub struct Runtime {
    pub config: AppConfig,
    pub pool: PgPool,
    pub redis: RedisClient,
    pub store: Arc<PgStore>,
    pub identity: Arc<IdentityService<PgStore>>,
    pub device_tokens: Arc<dyn DeviceTokenRegistry>,
    pub photo_sessions: Arc<dyn PhotoSessionPort>,
    pub policy: Arc<TransitionPolicy>,
    pub events: SessionEventBus,
}

/// Opens the pool and the Redis connection and wires every port
///
/// # Errors
///
/// Fails when Postgres or Redis is unreachable, when an HTTP adapter cannot
/// be built, or when the transition rules do not load.
pub async fn connect(config: AppConfig) -> anyhow::Result<Runtime> {
    let pool = create_pool(config.database.clone())
        .await
        .context("failed to connect to PostgreSQL")?;
    let redis = RedisClient::new(config.redis.clone())
        .await
        .context("failed to connect to Redis")?;

    let policy = Arc::new(
        TransitionPolicy::load(config.policy.source()).context("failed to load transition rules")?,
    );
    let store = Arc::new(PgStore::new(pool.clone()));
    let device_tokens: Arc<dyn DeviceTokenRegistry> = Arc::new(PgDeviceTokens::new(pool.clone()));
    let photo_sessions: Arc<dyn PhotoSessionPort> = Arc::new(PgPhotoSessions::new(pool.clone()));
    let events = SessionEventBus::new();

    let gateway = HttpRelayGateway::new(config.notification.clone())
        .context("failed to build notification relay")?;
    let objects = S3ObjectStore::new(config.storage.clone()).context("failed to build object store")?;
    let verifier = HttpIdentityVerifier::new(config.verification.clone())
        .context("failed to build identity verifier")?;

    let identity = IdentityService::new(IdentityDeps {
        store: Arc::clone(&store),
        notifier: Arc::new(NotificationService::new(Arc::new(gateway))),
        device_tokens: Arc::clone(&device_tokens),
        blocklist: Arc::new(RedisBlocklist::new(redis.clone())),
        permissions: Arc::new(RedisPermissionCache::new(redis.clone())),
        storage: StorageService::new(Arc::new(objects), config.storage.clone()),
        verifier: Arc::new(verifier),
        listings: Arc::new(NoopListingCleanup),
        photo_sessions: Arc::clone(&photo_sessions),
        policy: Arc::clone(&policy),
        tokens: TokenIssuer::new(config.jwt.clone()),
        events: events.clone(),
        config: config.identity.clone(),
    })
    .context("failed to build identity service")?;

    info!(rules = policy.rules().len(), "Identity runtime wired");

    Ok(Runtime {
        config,
        pool,
        redis,
        store,
        identity: Arc::new(identity),
        device_tokens,
        photo_sessions,
        policy,
        events,
    })
}
