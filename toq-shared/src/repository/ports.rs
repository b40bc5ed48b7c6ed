/// Ports to collaborators outside the identity store
///
/// Device tokens, permission caching, listing cascade and photographer
/// agendas are owned by other stores or services. They are consumed here
/// without the identity transaction: each call is its own unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::DeviceToken;
use crate::redis::RedisClient;

/// Device-token registry
#[async_trait]
pub trait DeviceTokenRegistry: Send + Sync {
    /// Inserts or replaces the token for `(user_id, device_id)`
    async fn upsert(
        &self,
        user_id: i64,
        device_id: Uuid,
        push_token: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    async fn remove_all_by_user(&self, user_id: i64) -> Result<u64, DomainError>;

    async fn remove_by_device(&self, user_id: i64, device_id: Uuid) -> Result<u64, DomainError>;

    /// Tokens of the user, empty unless the user opted in to pushes
    async fn list_tokens_by_user_if_opted_in(&self, user_id: i64)
        -> Result<Vec<DeviceToken>, DomainError>;

    /// Every token of every opted-in user
    async fn list_tokens_by_opted_in_users(&self) -> Result<Vec<DeviceToken>, DomainError>;

    /// Deletes up to `limit` tokens with `updated_at < cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: i64)
        -> Result<u64, DomainError>;
}

/// Per-user permission cache
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn invalidate(&self, user_id: i64) -> Result<(), DomainError>;
}

/// Redis-backed permission cache
#[derive(Debug, Clone)]
pub struct RedisPermissionCache {
    client: RedisClient,
}

impl RedisPermissionCache {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub fn key(user_id: i64) -> String {
        format!("permissions:user:{}", user_id)
    }
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn invalidate(&self, user_id: i64) -> Result<(), DomainError> {
        self.client
            .del(&Self::key(user_id))
            .await
            .map_err(DomainError::internal)?;
        Ok(())
    }
}

/// Permission cache for deployments without Redis
#[derive(Debug, Clone, Default)]
pub struct NoopPermissionCache;

#[async_trait]
impl PermissionCache for NoopPermissionCache {
    async fn invalidate(&self, _user_id: i64) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Rows touched by a listing-domain cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub listings: u64,
    pub offers: u64,
    pub visits: u64,
}

/// Listing/offer/visit domain cascade
#[async_trait]
pub trait ListingCleanupPort: Send + Sync {
    /// Rejects or cancels the owner's listings, visits and offers
    async fn cleanup_owner(&self, user_id: i64) -> Result<CleanupReport, DomainError>;

    /// Cancels the realtor's offers and visits
    async fn cleanup_realtor(&self, user_id: i64) -> Result<CleanupReport, DomainError>;
}

/// Cascade for processes that do not host the listing domain
#[derive(Debug, Clone, Default)]
pub struct NoopListingCleanup;

#[async_trait]
impl ListingCleanupPort for NoopListingCleanup {
    async fn cleanup_owner(&self, user_id: i64) -> Result<CleanupReport, DomainError> {
        tracing::debug!(user_id, "Listing cleanup not configured, skipping owner cascade");
        Ok(CleanupReport::default())
    }

    async fn cleanup_realtor(&self, user_id: i64) -> Result<CleanupReport, DomainError> {
        tracing::debug!(user_id, "Listing cleanup not configured, skipping realtor cascade");
        Ok(CleanupReport::default())
    }
}

/// Photo-session service
#[async_trait]
pub trait PhotoSessionPort: Send + Sync {
    /// Provisions an agenda for a new photographer
    async fn ensure_agenda(&self, photographer_id: i64, horizon_months: u32)
        -> Result<(), DomainError>;

    /// Extends the agenda so that it covers `horizon_months` from now;
    /// returns false when it already did
    async fn extend_agenda(&self, photographer_id: i64, horizon_months: u32)
        -> Result<bool, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_cache_key() {
        assert_eq!(RedisPermissionCache::key(42), "permissions:user:42");
    }

    #[tokio::test]
    async fn test_noop_adapters() {
        NoopPermissionCache.invalidate(1).await.unwrap();
        let report = NoopListingCleanup.cleanup_owner(1).await.unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
