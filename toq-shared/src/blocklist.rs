//! Access-token blocklist
//!
//! Revoked access tokens are tracked by `jti` until they would have expired
//! anyway. Entries live under the stable prefix [`BLOCKLIST_PREFIX`] so that
//! listing and counting only scan blocklist keys.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::redis::{RedisClient, RedisClientError};

/// Key prefix for blocklist entries
pub const BLOCKLIST_PREFIX: &str = "blocklist:jti:";

const SCAN_BATCH: usize = 200;

/// Blocklist errors
#[derive(Debug, thiserror::Error)]
pub enum BlocklistError {
    #[error("ttl must be positive")]
    InvalidTtl,

    #[error("jti must not be empty")]
    EmptyJti,

    #[error("blocklist store error: {0}")]
    Store(#[from] RedisClientError),
}

/// One page of blocklisted ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlocklistPage {
    pub items: Vec<String>,
    /// Whether further pages exist
    pub has_more: bool,
}

/// Blocklist contract
#[async_trait]
pub trait TokenBlocklist: Send + Sync {
    /// Blocklists `jti` for `ttl_secs` seconds
    async fn add(&self, jti: &str, ttl_secs: u64) -> Result<(), BlocklistError>;

    async fn exists(&self, jti: &str) -> Result<bool, BlocklistError>;

    async fn delete(&self, jti: &str) -> Result<(), BlocklistError>;

    /// Best-effort, unordered page (1-based `page`)
    async fn list(&self, page: usize, page_size: usize) -> Result<BlocklistPage, BlocklistError>;

    async fn count(&self) -> Result<u64, BlocklistError>;
}

fn check_jti(jti: &str) -> Result<&str, BlocklistError> {
    let jti = jti.trim();
    if jti.is_empty() {
        return Err(BlocklistError::EmptyJti);
    }
    Ok(jti)
}

/// Slices an unordered key set into the requested page
fn paginate(mut ids: Vec<String>, page: usize, page_size: usize) -> BlocklistPage {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 1000);
    ids.sort();

    let start = (page - 1).saturating_mul(page_size);
    let has_more = ids.len() > start.saturating_add(page_size);
    let items = ids.into_iter().skip(start).take(page_size).collect();

    BlocklistPage { items, has_more }
}

/// Redis-backed blocklist
#[derive(Debug, Clone)]
pub struct RedisBlocklist {
    client: RedisClient,
}

impl RedisBlocklist {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn key(jti: &str) -> String {
        format!("{}{}", BLOCKLIST_PREFIX, jti)
    }

    async fn scan_all(&self) -> Result<Vec<String>, BlocklistError> {
        let pattern = format!("{}*", BLOCKLIST_PREFIX);
        let mut cursor = 0u64;
        let mut ids = Vec::new();

        loop {
            let (next, keys) = self.client.scan_page(cursor, &pattern, SCAN_BATCH).await?;
            ids.extend(
                keys.into_iter()
                    .filter_map(|k| k.strip_prefix(BLOCKLIST_PREFIX).map(str::to_string)),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl TokenBlocklist for RedisBlocklist {
    async fn add(&self, jti: &str, ttl_secs: u64) -> Result<(), BlocklistError> {
        let jti = check_jti(jti)?;
        if ttl_secs == 0 {
            return Err(BlocklistError::InvalidTtl);
        }
        self.client.set_ex(&Self::key(jti), "1", ttl_secs).await?;
        tracing::debug!(jti = %jti, ttl_secs, "Token blocklisted");
        Ok(())
    }

    async fn exists(&self, jti: &str) -> Result<bool, BlocklistError> {
        let jti = check_jti(jti)?;
        Ok(self.client.exists(&Self::key(jti)).await?)
    }

    async fn delete(&self, jti: &str) -> Result<(), BlocklistError> {
        let jti = check_jti(jti)?;
        self.client.del(&Self::key(jti)).await?;
        Ok(())
    }

    async fn list(&self, page: usize, page_size: usize) -> Result<BlocklistPage, BlocklistError> {
        Ok(paginate(self.scan_all().await?, page, page_size))
    }

    async fn count(&self) -> Result<u64, BlocklistError> {
        Ok(self.scan_all().await?.len() as u64)
    }
}

/// Process-local blocklist with the same semantics, for tests and
/// single-node development
#[derive(Debug, Default)]
pub struct MemoryBlocklist {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_ids(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, expires| *expires > now);
        entries.keys().cloned().collect()
    }
}

#[async_trait]
impl TokenBlocklist for MemoryBlocklist {
    async fn add(&self, jti: &str, ttl_secs: u64) -> Result<(), BlocklistError> {
        let jti = check_jti(jti)?;
        if ttl_secs == 0 {
            return Err(BlocklistError::InvalidTtl);
        }
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        match self.entries.lock() {
            Ok(mut guard) => guard.insert(jti.to_string(), expires),
            Err(poisoned) => poisoned.into_inner().insert(jti.to_string(), expires),
        };
        Ok(())
    }

    async fn exists(&self, jti: &str) -> Result<bool, BlocklistError> {
        let jti = check_jti(jti)?;
        Ok(self.live_ids().iter().any(|id| id == jti))
    }

    async fn delete(&self, jti: &str) -> Result<(), BlocklistError> {
        let jti = check_jti(jti)?;
        match self.entries.lock() {
            Ok(mut guard) => guard.remove(jti),
            Err(poisoned) => poisoned.into_inner().remove(jti),
        };
        Ok(())
    }

    async fn list(&self, page: usize, page_size: usize) -> Result<BlocklistPage, BlocklistError> {
        Ok(paginate(self.live_ids(), page, page_size))
    }

    async fn count(&self) -> Result<u64, BlocklistError> {
        Ok(self.live_ids().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_exists_delete() {
        let blocklist = MemoryBlocklist::new();
        blocklist.add("jti-1", 60).await.unwrap();

        assert!(blocklist.exists("jti-1").await.unwrap());
        assert!(!blocklist.exists("jti-2").await.unwrap());

        blocklist.delete("jti-1").await.unwrap();
        assert!(!blocklist.exists("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_must_be_positive() {
        let blocklist = MemoryBlocklist::new();
        assert!(matches!(
            blocklist.add("jti-1", 0).await,
            Err(BlocklistError::InvalidTtl)
        ));
        assert!(matches!(
            blocklist.add("  ", 10).await,
            Err(BlocklistError::EmptyJti)
        ));
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let blocklist = MemoryBlocklist::new();
        for i in 0..5 {
            blocklist.add(&format!("jti-{}", i), 60).await.unwrap();
        }

        assert_eq!(blocklist.count().await.unwrap(), 5);

        let first = blocklist.list(1, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let last = blocklist.list(3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more);
    }

    #[test]
    fn test_paginate_out_of_range() {
        let page = paginate(vec!["a".into(), "b".into()], 5, 10);
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_redis_blocklist_round_trip() {
        use crate::redis::RedisConfig;

        let client = RedisClient::new(RedisConfig {
            url: "redis://localhost:6379".to_string(),
            command_timeout_secs: 5,
        })
        .await
        .unwrap();
        let blocklist = RedisBlocklist::new(client);

        blocklist.add("it-jti", 30).await.unwrap();
        assert!(blocklist.exists("it-jti").await.unwrap());
        assert!(blocklist.count().await.unwrap() >= 1);
        blocklist.delete("it-jti").await.unwrap();
        assert!(!blocklist.exists("it-jti").await.unwrap());
    }
}
