/// Temporary-block clearer
///
/// Releases users whose `blocked_until` passed: clears the account-level
/// deadline and every role-level temporary block, resets the failed-signin
/// counter, audits and invalidates the permission cache. The identity
/// service does the work; this reconciler drains it batch by batch.

use async_trait::async_trait;
use std::sync::Arc;
use toq_shared::identity::IdentityService;
use toq_shared::repository::IdentityStore;
use toq_shared::telemetry::RequestContext;

use super::{ReconcileResult, Reconciler};

/// Upper bound on batches drained in one tick
const MAX_BATCHES_PER_TICK: usize = 20;

pub struct TempBlockReconciler<S: IdentityStore> {
    identity: Arc<IdentityService<S>>,
    batch_size: i64,
}

impl<S: IdentityStore> TempBlockReconciler<S> {
    pub fn new(identity: Arc<IdentityService<S>>, batch_size: i64) -> Self {
        Self {
            identity,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for TempBlockReconciler<S> {
    fn name(&self) -> &'static str {
        "temp-block-clearer"
    }

    async fn reconcile(&self, ctx: &RequestContext) -> ReconcileResult<u64> {
        let mut released = 0u64;
        for _ in 0..MAX_BATCHES_PER_TICK {
            let batch = self
                .identity
                .clear_expired_temp_blocks(ctx, self.batch_size)
                .await?;
            released += batch as u64;
            if (batch as i64) < self.batch_size {
                break;
            }
        }
        Ok(released)
    }
}
