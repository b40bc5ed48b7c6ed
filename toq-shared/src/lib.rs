//! # Toq Identity Core
//!
//! Identity and account lifecycle for the Toq real-estate platform, shared by
//! the API server and the background worker.
//!
//! ## Module Organization
//!
//! - `identity`: the identity service (signup, signin, contact changes,
//!   roles, invitations, deletion, manual review)
//! - `policy`: onboarding transition rules with atomic reload
//! - `models`: persisted entities and enums
//! - `repository`: storage ports; `db` implements them over Postgres and
//!   `memory` in process
//! - `auth`: password hashing, JWTs, verification codes, signatures
//! - `events`: session event bus
//! - `blocklist`, `redis`: revoked-token blocklist and permission cache
//! - `storage`: presigned user and listing media
//! - `notification`: unified email/SMS/push dispatch
//! - `verification`: CPF/CNPJ/CEP provider
//! - `bootstrap`: production wiring used by the binaries
//! - `audit`, `telemetry`, `config`, `error`: ambient concerns

pub mod audit;
pub mod auth;
pub mod blocklist;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod identity;
pub mod memory;
pub mod models;
pub mod notification;
pub mod policy;
pub mod redis;
pub mod repository;
pub mod storage;
pub mod telemetry;
pub mod verification;

/// Current version of the identity core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
