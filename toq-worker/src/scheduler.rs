/// Reconciler scheduler
///
/// Runs every registered [`Reconciler`] on its own Tokio task and interval.
/// Each loop runs once at start, then on every tick, until the shutdown
/// token is cancelled.
///
/// # Architecture
///
/// ```text
/// Scheduler
///   ├─> temp-block-clearer      every 5 min
///   ├─> device-token-purger     every 1 h
///   ├─> session-cleaner         every 1 min
///   ├─> validation-cleaner      every 5 min
///   ├─> media-job-reconciler    every 5 min
///   ├─> media-job-cleaner       every 1 h
///   └─> photographer-agenda     every 24 h
/// ```
///
/// # Shutdown
///
/// Cancelling the token stops every loop within one tick: a sweep in flight
/// finishes, no new sweep starts. [`Scheduler::run`] then waits up to the
/// grace period for the loops to return and aborts the rest. A loop that
/// dies before shutdown is logged as soon as it ends and counted in
/// [`Scheduler::failed_loops`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toq_worker::scheduler::Scheduler;
/// # use toq_worker::reconcilers::Reconciler;
///
/// # async fn example(reconciler: Arc<dyn Reconciler>) -> anyhow::Result<()> {
/// let mut scheduler = Scheduler::new();
/// scheduler.register(reconciler, Duration::from_secs(300));
///
/// let token = scheduler.shutdown_token();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     token.cancel();
/// });
///
/// scheduler.run().await?;
/// # Ok(())
/// # }
/// ```

use crate::reconcilers::Reconciler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use toq_shared::telemetry::RequestContext;

/// Time given to in-flight sweeps after shutdown is requested
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shortest interval accepted for a reconciler
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

struct Job {
    reconciler: Arc<dyn Reconciler>,
    interval: Duration,
}

/// Periodic reconciler runner
pub struct Scheduler {
    jobs: Vec<Job>,
    shutdown_token: CancellationToken,
    grace: Duration,
    failed_loops: AtomicUsize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            jobs: Vec::new(),
            shutdown_token: CancellationToken::new(),
            grace: SHUTDOWN_GRACE,
            failed_loops: AtomicUsize::new(0),
        }
    }

    /// Overrides the shutdown grace period
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Registers a reconciler; intervals below [`MIN_INTERVAL`] are raised to it
    pub fn register(&mut self, reconciler: Arc<dyn Reconciler>, every: Duration) {
        let every = every.max(MIN_INTERVAL);
        tracing::info!(
            reconciler = reconciler.name(),
            interval_secs = every.as_secs(),
            "Registering reconciler"
        );
        self.jobs.push(Job {
            reconciler,
            interval: every,
        });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Used to signal graceful shutdown from external handlers
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Reconciler loops that panicked so far
    pub fn failed_loops(&self) -> usize {
        self.failed_loops.load(Ordering::Relaxed)
    }

    fn record_panic(&self, error: &tokio::task::JoinError) {
        self.failed_loops.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %error, "Reconciler loop panicked");
    }

    /// Runs every loop until the shutdown token is cancelled
    ///
    /// # Errors
    ///
    /// Returns an error if a reconciler loop panicked.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(reconcilers = self.jobs.len(), "Scheduler starting");

        let mut loops = JoinSet::new();
        for job in &self.jobs {
            loops.spawn(run_loop(
                Arc::clone(&job.reconciler),
                job.interval,
                self.shutdown_token.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                Some(joined) = loops.join_next(), if !loops.is_empty() => {
                    if let Err(e) = joined {
                        self.record_panic(&e);
                    }
                }
            }
        }
        tracing::info!("Shutdown requested, waiting for reconcilers to stop");

        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    self.record_panic(&e);
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = loops.len(), "Force shutdown with reconcilers still running");
            loops.abort_all();
        }

        tracing::info!("Scheduler shut down");
        let panicked = self.failed_loops();
        if panicked > 0 {
            anyhow::bail!("{} reconciler loop(s) panicked", panicked);
        }
        Ok(())
    }
}

/// One reconciler's loop; the first tick fires immediately
async fn run_loop(reconciler: Arc<dyn Reconciler>, every: Duration, shutdown: CancellationToken) {
    let name = reconciler.name();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ctx = RequestContext::background(name);
        let started = tokio::time::Instant::now();
        match reconciler.reconcile(&ctx).await {
            Ok(0) => tracing::debug!(reconciler = name, "Nothing to reconcile"),
            Ok(touched) => tracing::info!(
                reconciler = name,
                touched,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Reconciler pass completed"
            ),
            Err(e) => tracing::error!(
                reconciler = name,
                request_id = ctx.request_id(),
                error = %e,
                "Reconciler pass failed"
            ),
        }
    }

    tracing::debug!(reconciler = name, "Reconciler loop stopped");
}
