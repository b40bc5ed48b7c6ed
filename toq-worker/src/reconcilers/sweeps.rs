/// Row sweeps over the identity store
///
/// Each sweep deletes or fails rows in batches, one transaction per batch,
/// until a batch comes back short:
///
/// - [`SessionReconciler`]: sessions expired for longer than `max_age`
/// - [`ValidationReconciler`]: temp-validation rows without a live code
/// - [`MediaJobReconciler`]: jobs stuck in pending/processing past `timeout`
/// - [`MediaJobCleanupReconciler`]: terminal jobs older than `retention`

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use toq_shared::repository::{
    IdentityStore, MediaJobRepository, RepoResult, SessionRepository, TransactionPort,
    ValidationRepository,
};
use toq_shared::telemetry::RequestContext;
use tracing::{debug, warn};

use super::{ReconcileResult, Reconciler};

/// Upper bound on batches drained in one tick
const MAX_BATCHES_PER_TICK: usize = 50;

/// Which statement a sweep runs
#[derive(Debug, Clone, Copy)]
enum Sweep {
    ExpiredSessions,
    StaleValidations,
    StuckMediaJobs,
    TerminalMediaJobs,
}

/// Runs `sweep` in batches against `cutoff`
async fn drain<S: IdentityStore>(
    store: &S,
    sweep: Sweep,
    cutoff: DateTime<Utc>,
    batch_size: i64,
) -> ReconcileResult<u64> {
    let mut total = 0u64;
    for _ in 0..MAX_BATCHES_PER_TICK {
        let mut tx = store.begin().await?;
        let result: RepoResult<u64> = match sweep {
            Sweep::ExpiredSessions => store.delete_expired_sessions(&mut tx, cutoff, batch_size).await,
            Sweep::StaleValidations => store.delete_stale_validations(&mut tx, cutoff, batch_size).await,
            Sweep::StuckMediaJobs => store.fail_stuck_media_jobs(&mut tx, cutoff, batch_size).await,
            Sweep::TerminalMediaJobs => {
                store.delete_terminal_media_jobs(&mut tx, cutoff, batch_size).await
            }
        };
        let touched = match result {
            Ok(touched) => {
                store.commit(tx).await?;
                touched
            }
            Err(e) => {
                if let Err(rb) = store.rollback(tx).await {
                    warn!(error = %rb, "Failed to roll back sweep batch");
                }
                return Err(e.into());
            }
        };

        total += touched;
        debug!(sweep = ?sweep, touched, "Sweep batch committed");
        if (touched as i64) < batch_size {
            break;
        }
    }
    Ok(total)
}

pub struct SessionReconciler<S> {
    store: Arc<S>,
    max_age: Duration,
    batch_size: i64,
}

impl<S: IdentityStore> SessionReconciler<S> {
    pub fn new(store: Arc<S>, max_age: Duration, batch_size: i64) -> Self {
        Self {
            store,
            max_age,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for SessionReconciler<S> {
    fn name(&self) -> &'static str {
        "session-cleaner"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        let cutoff = Utc::now() - self.max_age;
        drain(self.store.as_ref(), Sweep::ExpiredSessions, cutoff, self.batch_size).await
    }
}

pub struct ValidationReconciler<S> {
    store: Arc<S>,
    batch_size: i64,
}

impl<S: IdentityStore> ValidationReconciler<S> {
    pub fn new(store: Arc<S>, batch_size: i64) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for ValidationReconciler<S> {
    fn name(&self) -> &'static str {
        "validation-cleaner"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        drain(self.store.as_ref(), Sweep::StaleValidations, Utc::now(), self.batch_size).await
    }
}

pub struct MediaJobReconciler<S> {
    store: Arc<S>,
    timeout: Duration,
    batch_size: i64,
}

impl<S: IdentityStore> MediaJobReconciler<S> {
    pub fn new(store: Arc<S>, timeout: Duration, batch_size: i64) -> Self {
        Self {
            store,
            timeout,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for MediaJobReconciler<S> {
    fn name(&self) -> &'static str {
        "media-job-reconciler"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        let started_before = Utc::now() - self.timeout;
        let failed = drain(self.store.as_ref(), Sweep::StuckMediaJobs, started_before, self.batch_size).await?;
        if failed > 0 {
            warn!(failed, started_before = %started_before, "Stuck media jobs marked failed");
        }
        Ok(failed)
    }
}

pub struct MediaJobCleanupReconciler<S> {
    store: Arc<S>,
    retention: Duration,
    batch_size: i64,
}

impl<S: IdentityStore> MediaJobCleanupReconciler<S> {
    pub fn new(store: Arc<S>, retention: Duration, batch_size: i64) -> Self {
        Self {
            store,
            retention,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: IdentityStore> Reconciler for MediaJobCleanupReconciler<S> {
    fn name(&self) -> &'static str {
        "media-job-cleaner"
    }

    async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
        let finished_before = Utc::now() - self.retention;
        drain(self.store.as_ref(), Sweep::TerminalMediaJobs, finished_before, self.batch_size).await
    }
}
