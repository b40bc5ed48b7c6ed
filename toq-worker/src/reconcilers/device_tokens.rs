/// Device-token purger
///
/// Deletes push tokens not refreshed within `max_age`. Tokens are
/// refreshed on every signin, so a stale token belongs to a device that
/// has not been used for that long.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use toq_shared::repository::DeviceTokenRegistry;
use toq_shared::telemetry::RequestContext;
use tracing::debug;

use super::{ReconcileResult, Reconciler};

pub struct DeviceTokenReconciler {
    registry: Arc<dyn DeviceTokenRegistry>,
    max_age: Duration,
    batch_size: i64,
}

impl DeviceTokenReconciler {
    pub fn new(registry: Arc<dyn DeviceTokenRegistry>, max_age: Duration, batch_size: i64) -> Self {
        Self {
            registry,
            max_age,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Reconciler for DeviceTokenReconciler {
    fn name(&self) -> &'static str {
        "device-token-purger"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        let cutoff = Utc::now() - self.max_age;
        let mut purged = 0u64;
        loop {
            let deleted = self.registry.delete_older_than(cutoff, self.batch_size).await?;
            purged += deleted;
            debug!(deleted, cutoff = %cutoff, "Device-token batch purged");
            if (deleted as i64) < self.batch_size {
                break;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toq_shared::memory::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_purges_only_stale_tokens() {
        let store = Arc::new(MemoryStore::new());
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        store.upsert(1, stale, "fcm-stale", Utc::now()).await.unwrap();
        store.upsert(1, fresh, "fcm-fresh", Utc::now()).await.unwrap();
        store.backdate_device_token(1, stale, Utc::now() - Duration::days(120));

        // Batch of one forces the loop to drain in several statements
        let reconciler = DeviceTokenReconciler::new(store.clone(), Duration::days(90), 1);
        let purged = reconciler
            .reconcile(&RequestContext::background("test"))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        let left = store.device_tokens(1);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].device_id, fresh);
    }
}
