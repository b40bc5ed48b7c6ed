//! In-memory adapters
//!
//! Twins of the Postgres, object-storage and gateway adapters, used by local
//! deployments without infrastructure and by the test suites.
//!
//! - [`MemoryStore`]: every repository trait plus the device-token registry,
//!   with snapshot transactions
//! - [`MemoryObjectStore`]: object store keeping bytes and SHA-256 checksums
//! - [`RecordingGateway`]: notification gateway that records what it sends
//! - [`RecordingListingCleanup`], [`MemoryPhotoSessions`],
//!   [`RecordingPermissionCache`]: collaborator ports

mod doubles;
mod object_store;
mod store;

pub use doubles::{
    MemoryPhotoSessions, RecordingGateway, RecordingListingCleanup, RecordingPermissionCache,
};
pub use object_store::MemoryObjectStore;
pub use store::{MemoryStore, MemoryTx};
