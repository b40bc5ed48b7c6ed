/// Periodic reconcilers
///
/// A reconciler converges persistent state toward policy: it expires
/// temporary blocks, purges stale rows and keeps photographer agendas ahead
/// of time. The [`Scheduler`](crate::scheduler::Scheduler) runs each one on
/// its own interval.
///
/// # Contract
///
/// Every reconciler:
/// 1. Works in bounded batches (`batch_size` rows per statement)
/// 2. Runs with a background [`RequestContext`], which is never traced
/// 3. Returns how many rows it touched; errors are logged by the scheduler
///    and the next tick retries
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use toq_shared::telemetry::RequestContext;
/// use toq_worker::reconcilers::{ReconcileResult, Reconciler};
///
/// struct Noop;
///
/// #[async_trait]
/// impl Reconciler for Noop {
///     fn name(&self) -> &'static str {
///         "noop"
///     }
///
///     async fn reconcile(&self, _ctx: &RequestContext) -> ReconcileResult<u64> {
///         Ok(0)
///     }
/// }
/// ```

mod agenda;
mod device_tokens;
mod sweeps;
mod temp_blocks;

pub use agenda::AgendaReconciler;
pub use device_tokens::DeviceTokenReconciler;
pub use sweeps::{MediaJobCleanupReconciler, MediaJobReconciler, SessionReconciler, ValidationReconciler};
pub use temp_blocks::TempBlockReconciler;

use async_trait::async_trait;
use toq_shared::error::DomainError;
use toq_shared::repository::RepositoryError;
use toq_shared::telemetry::RequestContext;

/// Reconciler error types
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Domain(#[from] DomainError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// One periodic sweep
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Stable name used in logs and background request ids
    fn name(&self) -> &'static str;

    /// Runs one sweep and returns the number of rows touched
    async fn reconcile(&self, ctx: &RequestContext) -> ReconcileResult<u64>;
}
