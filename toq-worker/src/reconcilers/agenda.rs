/// Photographer agenda refresher
///
/// Walks every active photographer by keyset pages, each page read in its
/// own read-only transaction, and asks the photo-session service to extend
/// the agenda so it covers `horizon_months` from today. One failing
/// photographer does not stop the page.

use async_trait::async_trait;
use std::sync::Arc;
use toq_shared::models::RoleSlug;
use toq_shared::repository::{IdentityStore, PhotoSessionPort, TransactionPort, UserRepository};
use toq_shared::telemetry::RequestContext;
use tracing::{debug, warn};

use super::{ReconcileResult, Reconciler};

pub struct AgendaReconciler<S> {
    store: Arc<S>,
    photo_sessions: Arc<dyn PhotoSessionPort>,
    horizon_months: u32,
    batch_size: i64,
}

impl<S: IdentityStore> AgendaReconciler<S> {
    pub fn new(
        store: Arc<S>,
        photo_sessions: Arc<dyn PhotoSessionPort>,
        horizon_months: u32,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            photo_sessions,
            horizon_months,
            batch_size: batch_size.max(1),
        }
    }

    async fn page(&self, after_id: i64) -> ReconcileResult<Vec<i64>> {
        let mut tx = self.store.begin_read_only().await?;
        let result = self
            .store
            .list_active_user_ids_by_role(&mut tx, RoleSlug::Photographer, after_id, self.batch_size)
            .await;
        if let Err(e) = self.store.rollback(tx).await {
            warn!(error = %e, "Failed to close read-only transaction");
        }
        Ok(result?)
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for AgendaReconciler<S> {
    fn name(&self) -> &'static str {
        "photographer-agenda"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        let mut after_id = 0;
        let mut extended = 0u64;
        loop {
            let ids = self.page(after_id).await?;
            let Some(&last) = ids.last() else {
                break;
            };

            for photographer_id in &ids {
                match self
                    .photo_sessions
                    .extend_agenda(*photographer_id, self.horizon_months)
                    .await
                {
                    Ok(true) => extended += 1,
                    Ok(false) => debug!(photographer_id, "Agenda already covers the horizon"),
                    Err(e) => warn!(photographer_id, error = %e, "Failed to extend agenda"),
                }
            }

            if (ids.len() as i64) < self.batch_size {
                break;
            }
            after_id = last;
        }
        Ok(extended)
    }
}
