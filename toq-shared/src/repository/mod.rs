//! Repository contracts
//!
//! Persistence is expressed as async traits sharing one transaction type
//! through [`TransactionPort`]. Every mutating operation takes the caller's
//! transaction so that a service method's reads and writes commit or roll
//! back together. Lookups return `Option` instead of signalling "no rows"
//! through an error; the service decides locally whether absence means
//! `not_found`, invalid credentials or an empty result.
//!
//! Two adapters implement these traits: `db::PgStore` (sqlx/Postgres) and
//! `memory::MemoryStore` (snapshot transactions, used by tests).

mod ports;

pub use ports::{
    CleanupReport, DeviceTokenRegistry, ListingCleanupPort, NoopListingCleanup,
    NoopPermissionCache, PermissionCache, PhotoSessionPort, RedisPermissionCache,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DomainError;
use crate::models::{
    AgencyInvite, AgencyRealtor, AuditRecord, MediaJob, NewUser, NewUserRole, Role, RoleSlug,
    User, UserAccount, UserRole, Validation, WrongSignin,
};

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violated
    #[error("duplicate value: {0}")]
    Duplicate(String),

    /// Write attempted inside a read-only transaction
    #[error("transaction is read-only")]
    ReadOnly,

    /// Stored data could not be mapped to the domain model
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<RepositoryError> for DomainError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate(what) => DomainError::conflict(format!("{} already exists", what)),
            other => DomainError::internal(other),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Transaction lifecycle
#[async_trait]
pub trait TransactionPort: Send + Sync {
    type Tx: Send;

    /// Read/write transaction
    async fn begin(&self) -> RepoResult<Self::Tx>;

    /// Read-only transaction for query paths
    async fn begin_read_only(&self) -> RepoResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> RepoResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> RepoResult<()>;
}

/// Users, roles, role bindings, blocking and brute-force tracking
#[async_trait]
pub trait UserRepository: TransactionPort {
    async fn get_role_by_slug(&self, tx: &mut Self::Tx, slug: RoleSlug) -> RepoResult<Option<Role>>;

    async fn list_roles(&self, tx: &mut Self::Tx) -> RepoResult<Vec<Role>>;

    async fn create_user(&self, tx: &mut Self::Tx, user: NewUser) -> RepoResult<User>;

    /// Persists every mutable column of `user`
    async fn update_user(&self, tx: &mut Self::Tx, user: &User) -> RepoResult<()>;

    /// Non-deleted user by id
    async fn get_user_by_id(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<Option<User>>;

    /// Non-deleted user by id with its active role
    async fn get_account_by_id(&self, tx: &mut Self::Tx, user_id: i64)
        -> RepoResult<Option<UserAccount>>;

    /// Non-deleted user by national id with its active role, row-locked
    async fn lock_account_by_national_id(
        &self,
        tx: &mut Self::Tx,
        national_id: &str,
    ) -> RepoResult<Option<UserAccount>>;

    async fn get_user_by_phone(&self, tx: &mut Self::Tx, phone: &str) -> RepoResult<Option<User>>;

    async fn national_id_exists(&self, tx: &mut Self::Tx, national_id: &str) -> RepoResult<bool>;

    /// Whether a non-deleted user other than `exclude` holds `email`
    async fn email_in_use(&self, tx: &mut Self::Tx, email: &str, exclude: Option<i64>)
        -> RepoResult<bool>;

    /// Whether a non-deleted user other than `exclude` holds `phone`
    async fn phone_in_use(&self, tx: &mut Self::Tx, phone: &str, exclude: Option<i64>)
        -> RepoResult<bool>;

    async fn touch_last_activity(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn set_user_blocked_until(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> RepoResult<()>;

    async fn set_permanently_blocked(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        blocked: bool,
    ) -> RepoResult<()>;

    /// Users whose account-level block has expired (`blocked_until <= now`)
    async fn list_users_with_expired_block(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<i64>>;

    /// Ids of non-deleted users whose active role is `slug` and active, keyset
    /// paginated by id
    async fn list_active_user_ids_by_role(
        &self,
        tx: &mut Self::Tx,
        slug: RoleSlug,
        after_id: i64,
        limit: i64,
    ) -> RepoResult<Vec<i64>>;

    async fn create_user_role(&self, tx: &mut Self::Tx, role: NewUserRole) -> RepoResult<UserRole>;

    async fn list_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<Vec<UserRole>>;

    async fn get_user_role(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        slug: RoleSlug,
    ) -> RepoResult<Option<UserRole>>;

    async fn get_active_user_role(&self, tx: &mut Self::Tx, user_id: i64)
        -> RepoResult<Option<UserRole>>;

    /// Persists status, reason, block and expiry of a binding
    async fn update_user_role(&self, tx: &mut Self::Tx, role: &UserRole) -> RepoResult<()>;

    /// Sets `is_active=false` on every binding of the user
    async fn deactivate_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64>;

    /// Sets `is_active=true` on one binding, false if it does not exist
    async fn activate_user_role(&self, tx: &mut Self::Tx, user_role_id: i64) -> RepoResult<bool>;

    async fn delete_user_role(&self, tx: &mut Self::Tx, user_role_id: i64) -> RepoResult<bool>;

    async fn delete_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64>;

    async fn count_active_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<i64>;

    async fn get_wrong_signin(&self, tx: &mut Self::Tx, user_id: i64)
        -> RepoResult<Option<WrongSignin>>;

    async fn upsert_wrong_signin(&self, tx: &mut Self::Tx, tracker: &WrongSignin) -> RepoResult<()>;

    async fn delete_wrong_signin(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<bool>;
}

/// Pending verification codes
#[async_trait]
pub trait ValidationRepository: TransactionPort {
    /// Row-locked validation row
    async fn lock_validation(&self, tx: &mut Self::Tx, user_id: i64)
        -> RepoResult<Option<Validation>>;

    async fn upsert_validation(&self, tx: &mut Self::Tx, validation: &Validation) -> RepoResult<()>;

    async fn delete_validation(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<bool>;

    /// Deletes rows with no live code left
    async fn delete_stale_validations(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64>;
}

/// Agency invitations and links
#[async_trait]
pub trait AgencyRepository: TransactionPort {
    async fn get_invite_by_phone(&self, tx: &mut Self::Tx, phone: &str)
        -> RepoResult<Option<AgencyInvite>>;

    async fn create_invite(&self, tx: &mut Self::Tx, agency_id: i64, phone: &str)
        -> RepoResult<AgencyInvite>;

    async fn update_invite_agency(&self, tx: &mut Self::Tx, invite_id: i64, agency_id: i64)
        -> RepoResult<()>;

    async fn delete_invite(&self, tx: &mut Self::Tx, invite_id: i64) -> RepoResult<bool>;

    async fn delete_invites_by_agency(&self, tx: &mut Self::Tx, agency_id: i64) -> RepoResult<u64>;

    async fn get_agency_link_by_realtor(
        &self,
        tx: &mut Self::Tx,
        realtor_id: i64,
    ) -> RepoResult<Option<AgencyRealtor>>;

    async fn create_agency_link(&self, tx: &mut Self::Tx, agency_id: i64, realtor_id: i64)
        -> RepoResult<AgencyRealtor>;

    async fn delete_agency_link_by_realtor(&self, tx: &mut Self::Tx, realtor_id: i64)
        -> RepoResult<bool>;

    async fn list_realtor_ids_by_agency(&self, tx: &mut Self::Tx, agency_id: i64)
        -> RepoResult<Vec<i64>>;

    async fn delete_agency_links_by_agency(&self, tx: &mut Self::Tx, agency_id: i64)
        -> RepoResult<u64>;
}

/// Append-only audit
#[async_trait]
pub trait AuditRepository: TransactionPort {
    async fn insert_audit(&self, tx: &mut Self::Tx, record: &AuditRecord) -> RepoResult<()>;
}

/// Session store operations used by the core
#[async_trait]
pub trait SessionRepository: TransactionPort {
    async fn revoke_sessions_by_user(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64>;

    async fn delete_sessions_by_user(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64>;

    /// Deletes up to `limit` sessions with `expired_at <= cutoff`
    async fn delete_expired_sessions(
        &self,
        tx: &mut Self::Tx,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64>;
}

/// Media-processing job bookkeeping
#[async_trait]
pub trait MediaJobRepository: TransactionPort {
    async fn get_media_job(&self, tx: &mut Self::Tx, job_id: i64) -> RepoResult<Option<MediaJob>>;

    async fn update_media_job(&self, tx: &mut Self::Tx, job: &MediaJob) -> RepoResult<()>;

    /// Fails up to `limit` non-terminal jobs started before `started_before`
    async fn fail_stuck_media_jobs(
        &self,
        tx: &mut Self::Tx,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64>;

    /// Deletes up to `limit` terminal jobs finished before `finished_before`
    async fn delete_terminal_media_jobs(
        &self,
        tx: &mut Self::Tx,
        finished_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64>;
}

/// Everything the identity service and the reconcilers need from one store
pub trait IdentityStore:
    UserRepository
    + ValidationRepository
    + AgencyRepository
    + AuditRepository
    + SessionRepository
    + MediaJobRepository
    + 'static
{
}

impl<T> IdentityStore for T where
    T: UserRepository
        + ValidationRepository
        + AgencyRepository
        + AuditRepository
        + SessionRepository
        + MediaJobRepository
        + 'static
{
}
