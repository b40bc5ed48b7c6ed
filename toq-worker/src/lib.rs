//! # Toq Worker Library
//!
//! Periodic reconcilers for the identity core and the scheduler that runs
//! them.
//!
//! ## Modules
//!
//! - `reconcilers`: temp-block clearer, device-token purger, session,
//!   validation and media-job sweeps, photographer-agenda refresher
//! - `scheduler`: one interval loop per reconciler with graceful shutdown
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use toq_shared::memory::MemoryStore;
//! use toq_worker::reconcilers::ValidationReconciler;
//! use toq_worker::scheduler::Scheduler;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let mut scheduler = Scheduler::new();
//! scheduler.register(
//!     Arc::new(ValidationReconciler::new(store, 500)),
//!     Duration::from_secs(300),
//! );
//! scheduler.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod reconcilers;
pub mod scheduler;
