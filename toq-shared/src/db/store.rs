/// Repository traits over Postgres
///
/// Every method runs inside the caller's `sqlx::Transaction`. Lookups that
/// precede a mutation of the same rows (`lock_*`) take `FOR UPDATE` locks.
/// Unique violations surface as [`RepositoryError::Duplicate`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use sqlx::{PgConnection, Postgres, Transaction};

use crate::models::{
    Address, AgencyInvite, AgencyRealtor, AuditRecord, MediaJob, MediaJobStatus, NewUser,
    NewUserRole, Role, RoleSlug, RoleStatus, User, UserAccount, UserRole, Validation, WrongSignin,
};
use crate::repository::{
    AgencyRepository, AuditRepository, MediaJobRepository, RepoResult, RepositoryError,
    SessionRepository, TransactionPort, UserRepository, ValidationRepository,
};

const USER_COLUMNS: &str = "id, national_id, full_name, nickname, email, phone, birth_date, \
     zip_code, street, number, complement, neighborhood, city, state, password_hash, \
     last_activity_at, blocked_until, permanently_blocked, opt_in, deleted, created_at";

const USER_ROLE_SELECT: &str = "SELECT ur.id, ur.user_id, ur.role_id, r.slug, ur.is_active, \
     ur.status, ur.status_reason, ur.blocked_until, ur.status_before_block, ur.expires_at, \
     ur.created_at \
     FROM user_roles ur JOIN roles r ON r.id = ur.role_id";

const MEDIA_JOB_COLUMNS: &str = "id, listing_id, status, error, outputs, started_at, finished_at";

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    national_id: String,
    full_name: String,
    nickname: String,
    email: String,
    phone: String,
    birth_date: Option<NaiveDate>,
    zip_code: String,
    street: String,
    number: String,
    complement: String,
    neighborhood: String,
    city: String,
    state: String,
    password_hash: String,
    last_activity_at: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
    permanently_blocked: bool,
    opt_in: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            national_id: row.national_id,
            full_name: row.full_name,
            nickname: row.nickname,
            email: row.email,
            phone: row.phone,
            birth_date: row.birth_date,
            address: Address {
                zip_code: row.zip_code,
                street: row.street,
                number: row.number,
                complement: row.complement,
                neighborhood: row.neighborhood,
                city: row.city,
                state: row.state,
            },
            password_hash: row.password_hash,
            last_activity_at: row.last_activity_at,
            blocked_until: row.blocked_until,
            permanently_blocked: row.permanently_blocked,
            opt_in: row.opt_in,
            deleted: row.deleted,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRoleRow {
    id: i64,
    user_id: i64,
    role_id: i64,
    slug: String,
    is_active: bool,
    status: i16,
    status_reason: Option<String>,
    blocked_until: Option<DateTime<Utc>>,
    status_before_block: Option<i16>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRoleRow> for UserRole {
    type Error = RepositoryError;

    fn try_from(row: UserRoleRow) -> Result<Self, Self::Error> {
        Ok(UserRole {
            id: row.id,
            user_id: row.user_id,
            role_id: row.role_id,
            role_slug: parse_slug(&row.slug)?,
            is_active: row.is_active,
            status: RoleStatus::try_from(row.status)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            status_reason: row.status_reason,
            blocked_until: row.blocked_until,
            status_before_block: row
                .status_before_block
                .map(RoleStatus::try_from)
                .transpose()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: i64,
    slug: String,
    name: String,
    is_system_role: bool,
}

impl TryFrom<RoleRow> for Role {
    type Error = RepositoryError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        Ok(Role {
            id: row.id,
            slug: parse_slug(&row.slug)?,
            name: row.name,
            is_system_role: row.is_system_role,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ValidationRow {
    user_id: i64,
    new_email: Option<String>,
    email_code: Option<String>,
    email_code_exp: Option<DateTime<Utc>>,
    new_phone: Option<String>,
    phone_code: Option<String>,
    phone_code_exp: Option<DateTime<Utc>>,
    password_code: Option<String>,
    password_code_exp: Option<DateTime<Utc>>,
}

impl From<ValidationRow> for Validation {
    fn from(row: ValidationRow) -> Self {
        Validation {
            user_id: row.user_id,
            new_email: row.new_email,
            email_code: row.email_code,
            email_code_exp: row.email_code_exp,
            new_phone: row.new_phone,
            phone_code: row.phone_code,
            phone_code_exp: row.phone_code_exp,
            password_code: row.password_code,
            password_code_exp: row.password_code_exp,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WrongSigninRow {
    user_id: i64,
    failed_attempts: i32,
    last_attempt_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: i64,
    agency_id: i64,
    phone: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: i64,
    agency_id: i64,
    realtor_id: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MediaJobRow {
    id: i64,
    listing_id: i64,
    status: i16,
    error: Option<String>,
    outputs: Option<serde_json::Value>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<MediaJobRow> for MediaJob {
    type Error = RepositoryError;

    fn try_from(row: MediaJobRow) -> Result<Self, Self::Error> {
        Ok(MediaJob {
            id: row.id,
            listing_id: row.listing_id,
            status: MediaJobStatus::from_i16(row.status)
                .ok_or_else(|| RepositoryError::Corrupt(format!("media job status {}", row.status)))?,
            error: row.error,
            outputs: row.outputs,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

fn parse_slug(slug: &str) -> Result<RoleSlug, RepositoryError> {
    slug.parse()
        .map_err(|e: crate::models::role::UnknownRoleSlug| RepositoryError::Corrupt(e.to_string()))
}

/// Maps unique violations to `Duplicate(what)`
fn write_error(err: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return RepositoryError::Duplicate(what.to_string());
        }
    }
    RepositoryError::Database(err)
}

fn conn<'a>(tx: &'a mut Transaction<'static, Postgres>) -> &'a mut PgConnection {
    &mut **tx
}

/// Identity store over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn active_role(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        user_id: i64,
        lock: bool,
    ) -> RepoResult<Option<UserRole>> {
        let sql = format!(
            "{} WHERE ur.user_id = $1 AND ur.is_active{}",
            USER_ROLE_SELECT,
            if lock { " FOR UPDATE OF ur" } else { "" }
        );
        let row: Option<UserRoleRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(conn(tx))
            .await?;
        row.map(UserRole::try_from).transpose()
    }
}

#[async_trait]
impl TransactionPort for PgStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> RepoResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn begin_read_only(&self) -> RepoResult<Self::Tx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(conn(&mut tx))
            .await?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> RepoResult<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> RepoResult<()> {
        Ok(tx.rollback().await?)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn get_role_by_slug(&self, tx: &mut Self::Tx, slug: RoleSlug) -> RepoResult<Option<Role>> {
        let row: Option<RoleRow> =
            sqlx::query_as("SELECT id, slug, name, is_system_role FROM roles WHERE slug = $1")
                .bind(slug.as_str())
                .fetch_optional(conn(tx))
                .await?;
        row.map(Role::try_from).transpose()
    }

    async fn list_roles(&self, tx: &mut Self::Tx) -> RepoResult<Vec<Role>> {
        let rows: Vec<RoleRow> =
            sqlx::query_as("SELECT id, slug, name, is_system_role FROM roles ORDER BY id")
                .fetch_all(conn(tx))
                .await?;
        rows.into_iter().map(Role::try_from).collect()
    }

    async fn create_user(&self, tx: &mut Self::Tx, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (national_id, full_name, nickname, email, phone, birth_date, \
             zip_code, street, number, complement, neighborhood, city, state, password_hash, opt_in) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {}",
            USER_COLUMNS
        );
        let row: UserRow = sqlx::query_as(&sql)
            .bind(&user.national_id)
            .bind(&user.full_name)
            .bind(&user.nickname)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(user.birth_date)
            .bind(&user.address.zip_code)
            .bind(&user.address.street)
            .bind(&user.address.number)
            .bind(&user.address.complement)
            .bind(&user.address.neighborhood)
            .bind(&user.address.city)
            .bind(&user.address.state)
            .bind(&user.password_hash)
            .bind(user.opt_in)
            .fetch_one(conn(tx))
            .await
            .map_err(|e| write_error(e, "user"))?;
        Ok(row.into())
    }

    async fn update_user(&self, tx: &mut Self::Tx, user: &User) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET national_id = $2, full_name = $3, nickname = $4, email = $5, \
             phone = $6, birth_date = $7, zip_code = $8, street = $9, number = $10, \
             complement = $11, neighborhood = $12, city = $13, state = $14, password_hash = $15, \
             last_activity_at = $16, blocked_until = $17, permanently_blocked = $18, opt_in = $19, \
             deleted = $20 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.national_id)
        .bind(&user.full_name)
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.birth_date)
        .bind(&user.address.zip_code)
        .bind(&user.address.street)
        .bind(&user.address.number)
        .bind(&user.address.complement)
        .bind(&user.address.neighborhood)
        .bind(&user.address.city)
        .bind(&user.address.state)
        .bind(&user.password_hash)
        .bind(user.last_activity_at)
        .bind(user.blocked_until)
        .bind(user.permanently_blocked)
        .bind(user.opt_in)
        .bind(user.deleted)
        .execute(conn(tx))
        .await
        .map_err(|e| write_error(e, "user"))?;
        Ok(())
    }

    async fn get_user_by_id(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1 AND NOT deleted", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(conn(tx))
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_account_by_id(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
    ) -> RepoResult<Option<UserAccount>> {
        let Some(user) = self.get_user_by_id(tx, user_id).await? else {
            return Ok(None);
        };
        let active_role = self.active_role(tx, user.id, false).await?;
        Ok(Some(UserAccount { user, active_role }))
    }

    async fn lock_account_by_national_id(
        &self,
        tx: &mut Self::Tx,
        national_id: &str,
    ) -> RepoResult<Option<UserAccount>> {
        let sql = format!(
            "SELECT {} FROM users WHERE national_id = $1 AND NOT deleted FOR UPDATE",
            USER_COLUMNS
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(national_id)
            .fetch_optional(conn(tx))
            .await?;
        let Some(user) = row.map(User::from) else {
            return Ok(None);
        };
        let active_role = self.active_role(tx, user.id, true).await?;
        Ok(Some(UserAccount { user, active_role }))
    }

    async fn get_user_by_phone(&self, tx: &mut Self::Tx, phone: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE phone = $1 AND NOT deleted", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(phone)
            .fetch_optional(conn(tx))
            .await?;
        Ok(row.map(User::from))
    }

    async fn national_id_exists(&self, tx: &mut Self::Tx, national_id: &str) -> RepoResult<bool> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE national_id = $1 AND NOT deleted)",
        )
        .bind(national_id)
        .fetch_one(conn(tx))
        .await?)
    }

    async fn email_in_use(
        &self,
        tx: &mut Self::Tx,
        email: &str,
        exclude: Option<i64>,
    ) -> RepoResult<bool> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND NOT deleted \
             AND ($2::BIGINT IS NULL OR id <> $2))",
        )
        .bind(email)
        .bind(exclude)
        .fetch_one(conn(tx))
        .await?)
    }

    async fn phone_in_use(
        &self,
        tx: &mut Self::Tx,
        phone: &str,
        exclude: Option<i64>,
    ) -> RepoResult<bool> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE phone = $1 AND NOT deleted \
             AND ($2::BIGINT IS NULL OR id <> $2))",
        )
        .bind(phone)
        .bind(exclude)
        .fetch_one(conn(tx))
        .await?)
    }

    async fn touch_last_activity(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        sqlx::query("UPDATE users SET last_activity_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(conn(tx))
            .await?;
        Ok(())
    }

    async fn set_user_blocked_until(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        sqlx::query("UPDATE users SET blocked_until = $2 WHERE id = $1")
            .bind(user_id)
            .bind(until)
            .execute(conn(tx))
            .await?;
        Ok(())
    }

    async fn set_permanently_blocked(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        blocked: bool,
    ) -> RepoResult<()> {
        sqlx::query("UPDATE users SET permanently_blocked = $2 WHERE id = $1")
            .bind(user_id)
            .bind(blocked)
            .execute(conn(tx))
            .await?;
        Ok(())
    }

    async fn list_users_with_expired_block(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM users WHERE NOT deleted AND blocked_until <= $1 \
             UNION \
             SELECT user_id FROM user_roles WHERE status = $2 \
             AND (blocked_until IS NULL OR blocked_until <= $1) \
             ORDER BY 1 LIMIT $3",
        )
        .bind(now)
        .bind(RoleStatus::TempBlocked.as_i16())
        .bind(limit)
        .fetch_all(conn(tx))
        .await?)
    }

    async fn list_active_user_ids_by_role(
        &self,
        tx: &mut Self::Tx,
        slug: RoleSlug,
        after_id: i64,
        limit: i64,
    ) -> RepoResult<Vec<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT u.id FROM users u \
             JOIN user_roles ur ON ur.user_id = u.id \
             JOIN roles r ON r.id = ur.role_id \
             WHERE r.slug = $1 AND ur.is_active AND ur.status = $2 AND NOT u.deleted AND u.id > $3 \
             ORDER BY u.id LIMIT $4",
        )
        .bind(slug.as_str())
        .bind(RoleStatus::Active.as_i16())
        .bind(after_id)
        .bind(limit)
        .fetch_all(conn(tx))
        .await?)
    }

    async fn create_user_role(&self, tx: &mut Self::Tx, role: NewUserRole) -> RepoResult<UserRole> {
        let row: (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO user_roles (user_id, role_id, is_active, status, status_reason, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id, created_at",
        )
        .bind(role.user_id)
        .bind(role.role_id)
        .bind(role.is_active)
        .bind(role.status.as_i16())
        .bind(&role.status_reason)
        .bind(role.expires_at)
        .fetch_one(conn(tx))
        .await
        .map_err(|e| write_error(e, "user role"))?;

        Ok(UserRole {
            id: row.0,
            user_id: role.user_id,
            role_id: role.role_id,
            role_slug: role.role_slug,
            is_active: role.is_active,
            status: role.status,
            status_reason: role.status_reason,
            blocked_until: None,
            status_before_block: None,
            expires_at: role.expires_at,
            created_at: row.1,
        })
    }

    async fn list_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<Vec<UserRole>> {
        let sql = format!("{} WHERE ur.user_id = $1 ORDER BY ur.id", USER_ROLE_SELECT);
        let rows: Vec<UserRoleRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(conn(tx))
            .await?;
        rows.into_iter().map(UserRole::try_from).collect()
    }

    async fn get_user_role(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
        slug: RoleSlug,
    ) -> RepoResult<Option<UserRole>> {
        let sql = format!("{} WHERE ur.user_id = $1 AND r.slug = $2", USER_ROLE_SELECT);
        let row: Option<UserRoleRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(slug.as_str())
            .fetch_optional(conn(tx))
            .await?;
        row.map(UserRole::try_from).transpose()
    }

    async fn get_active_user_role(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
    ) -> RepoResult<Option<UserRole>> {
        self.active_role(tx, user_id, false).await
    }

    async fn update_user_role(&self, tx: &mut Self::Tx, role: &UserRole) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE user_roles SET status = $2, status_reason = $3, blocked_until = $4, \
             status_before_block = $5, expires_at = $6 WHERE id = $1",
        )
        .bind(role.id)
        .bind(role.status.as_i16())
        .bind(&role.status_reason)
        .bind(role.blocked_until)
        .bind(role.status_before_block.map(RoleStatus::as_i16))
        .bind(role.expires_at)
        .execute(conn(tx))
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    async fn deactivate_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64> {
        let result = sqlx::query("UPDATE user_roles SET is_active = FALSE WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }

    async fn activate_user_role(&self, tx: &mut Self::Tx, user_role_id: i64) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE user_roles SET is_active = TRUE WHERE id = $1")
            .bind(user_role_id)
            .execute(conn(tx))
            .await
            .map_err(|e| write_error(e, "active role"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_user_role(&self, tx: &mut Self::Tx, user_role_id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = $1")
            .bind(user_role_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_user_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_active_roles(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE user_id = $1 AND is_active")
                .bind(user_id)
                .fetch_one(conn(tx))
                .await?,
        )
    }

    async fn get_wrong_signin(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
    ) -> RepoResult<Option<WrongSignin>> {
        let row: Option<WrongSigninRow> = sqlx::query_as(
            "SELECT user_id, failed_attempts, last_attempt_at FROM temp_wrong_signin \
             WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(conn(tx))
        .await?;
        Ok(row.map(|r| WrongSignin {
            user_id: r.user_id,
            failed_attempts: r.failed_attempts,
            last_attempt_at: r.last_attempt_at,
        }))
    }

    async fn upsert_wrong_signin(&self, tx: &mut Self::Tx, tracker: &WrongSignin) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO temp_wrong_signin (user_id, failed_attempts, last_attempt_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET failed_attempts = EXCLUDED.failed_attempts, \
             last_attempt_at = EXCLUDED.last_attempt_at",
        )
        .bind(tracker.user_id)
        .bind(tracker.failed_attempts)
        .bind(tracker.last_attempt_at)
        .execute(conn(tx))
        .await?;
        Ok(())
    }

    async fn delete_wrong_signin(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM temp_wrong_signin WHERE user_id = $1")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ValidationRepository for PgStore {
    async fn lock_validation(
        &self,
        tx: &mut Self::Tx,
        user_id: i64,
    ) -> RepoResult<Option<Validation>> {
        let row: Option<ValidationRow> = sqlx::query_as(
            "SELECT user_id, new_email, email_code, email_code_exp, new_phone, phone_code, \
             phone_code_exp, password_code, password_code_exp FROM temp_validations \
             WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(conn(tx))
        .await?;
        Ok(row.map(Validation::from))
    }

    async fn upsert_validation(&self, tx: &mut Self::Tx, v: &Validation) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO temp_validations (user_id, new_email, email_code, email_code_exp, \
             new_phone, phone_code, phone_code_exp, password_code, password_code_exp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id) DO UPDATE SET new_email = EXCLUDED.new_email, \
             email_code = EXCLUDED.email_code, email_code_exp = EXCLUDED.email_code_exp, \
             new_phone = EXCLUDED.new_phone, phone_code = EXCLUDED.phone_code, \
             phone_code_exp = EXCLUDED.phone_code_exp, password_code = EXCLUDED.password_code, \
             password_code_exp = EXCLUDED.password_code_exp",
        )
        .bind(v.user_id)
        .bind(&v.new_email)
        .bind(&v.email_code)
        .bind(v.email_code_exp)
        .bind(&v.new_phone)
        .bind(&v.phone_code)
        .bind(v.phone_code_exp)
        .bind(&v.password_code)
        .bind(v.password_code_exp)
        .execute(conn(tx))
        .await?;
        Ok(())
    }

    async fn delete_validation(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM temp_validations WHERE user_id = $1")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale_validations(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let result = sqlx::query(
            "DELETE FROM temp_validations WHERE user_id IN ( \
                 SELECT user_id FROM temp_validations \
                 WHERE (email_code IS NULL OR email_code_exp IS NULL OR email_code_exp <= $1) \
                 AND (phone_code IS NULL OR phone_code_exp IS NULL OR phone_code_exp <= $1) \
                 AND (password_code IS NULL OR password_code_exp IS NULL OR password_code_exp <= $1) \
                 LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(now)
        .bind(limit)
        .execute(conn(tx))
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AgencyRepository for PgStore {
    async fn get_invite_by_phone(
        &self,
        tx: &mut Self::Tx,
        phone: &str,
    ) -> RepoResult<Option<AgencyInvite>> {
        let row: Option<InviteRow> = sqlx::query_as(
            "SELECT id, agency_id, phone, created_at FROM agency_invites WHERE phone = $1 FOR UPDATE",
        )
        .bind(phone)
        .fetch_optional(conn(tx))
        .await?;
        Ok(row.map(|r| AgencyInvite {
            id: r.id,
            agency_id: r.agency_id,
            phone: r.phone,
            created_at: r.created_at,
        }))
    }

    async fn create_invite(
        &self,
        tx: &mut Self::Tx,
        agency_id: i64,
        phone: &str,
    ) -> RepoResult<AgencyInvite> {
        let row: InviteRow = sqlx::query_as(
            "INSERT INTO agency_invites (agency_id, phone) VALUES ($1, $2) \
             RETURNING id, agency_id, phone, created_at",
        )
        .bind(agency_id)
        .bind(phone)
        .fetch_one(conn(tx))
        .await
        .map_err(|e| write_error(e, "invite"))?;
        Ok(AgencyInvite {
            id: row.id,
            agency_id: row.agency_id,
            phone: row.phone,
            created_at: row.created_at,
        })
    }

    async fn update_invite_agency(
        &self,
        tx: &mut Self::Tx,
        invite_id: i64,
        agency_id: i64,
    ) -> RepoResult<()> {
        sqlx::query("UPDATE agency_invites SET agency_id = $2, created_at = NOW() WHERE id = $1")
            .bind(invite_id)
            .bind(agency_id)
            .execute(conn(tx))
            .await?;
        Ok(())
    }

    async fn delete_invite(&self, tx: &mut Self::Tx, invite_id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM agency_invites WHERE id = $1")
            .bind(invite_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_invites_by_agency(&self, tx: &mut Self::Tx, agency_id: i64) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM agency_invites WHERE agency_id = $1")
            .bind(agency_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_agency_link_by_realtor(
        &self,
        tx: &mut Self::Tx,
        realtor_id: i64,
    ) -> RepoResult<Option<AgencyRealtor>> {
        let row: Option<LinkRow> = sqlx::query_as(
            "SELECT id, agency_id, realtor_id, created_at FROM realtor_agency WHERE realtor_id = $1",
        )
        .bind(realtor_id)
        .fetch_optional(conn(tx))
        .await?;
        Ok(row.map(|r| AgencyRealtor {
            id: r.id,
            agency_id: r.agency_id,
            realtor_id: r.realtor_id,
            created_at: r.created_at,
        }))
    }

    async fn create_agency_link(
        &self,
        tx: &mut Self::Tx,
        agency_id: i64,
        realtor_id: i64,
    ) -> RepoResult<AgencyRealtor> {
        let row: LinkRow = sqlx::query_as(
            "INSERT INTO realtor_agency (agency_id, realtor_id) VALUES ($1, $2) \
             RETURNING id, agency_id, realtor_id, created_at",
        )
        .bind(agency_id)
        .bind(realtor_id)
        .fetch_one(conn(tx))
        .await
        .map_err(|e| write_error(e, "agency link"))?;
        Ok(AgencyRealtor {
            id: row.id,
            agency_id: row.agency_id,
            realtor_id: row.realtor_id,
            created_at: row.created_at,
        })
    }

    async fn delete_agency_link_by_realtor(
        &self,
        tx: &mut Self::Tx,
        realtor_id: i64,
    ) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM realtor_agency WHERE realtor_id = $1")
            .bind(realtor_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_realtor_ids_by_agency(
        &self,
        tx: &mut Self::Tx,
        agency_id: i64,
    ) -> RepoResult<Vec<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT realtor_id FROM realtor_agency WHERE agency_id = $1 ORDER BY realtor_id",
        )
        .bind(agency_id)
        .fetch_all(conn(tx))
        .await?)
    }

    async fn delete_agency_links_by_agency(
        &self,
        tx: &mut Self::Tx,
        agency_id: i64,
    ) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM realtor_agency WHERE agency_id = $1")
            .bind(agency_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn insert_audit(&self, tx: &mut Self::Tx, record: &AuditRecord) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO audit (executed_by, executed_at, table_name, action, payload) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.executed_by)
        .bind(record.executed_at)
        .bind(record.table_name.as_str())
        .bind(&record.action)
        .bind(&record.payload)
        .execute(conn(tx))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn revoke_sessions_by_user(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64> {
        let result = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE user_id = $1 AND NOT revoked")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_sessions_by_user(&self, tx: &mut Self::Tx, user_id: i64) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(conn(tx))
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(
        &self,
        tx: &mut Self::Tx,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE id IN ( \
                 SELECT id FROM sessions WHERE expired_at <= $1 LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(cutoff)
        .bind(limit)
        .execute(conn(tx))
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MediaJobRepository for PgStore {
    async fn get_media_job(&self, tx: &mut Self::Tx, job_id: i64) -> RepoResult<Option<MediaJob>> {
        let sql = format!("SELECT {} FROM media_jobs WHERE id = $1 FOR UPDATE", MEDIA_JOB_COLUMNS);
        let row: Option<MediaJobRow> = sqlx::query_as(&sql)
            .bind(job_id)
            .fetch_optional(conn(tx))
            .await?;
        row.map(MediaJob::try_from).transpose()
    }

    async fn update_media_job(&self, tx: &mut Self::Tx, job: &MediaJob) -> RepoResult<()> {
        sqlx::query(
            "UPDATE media_jobs SET status = $2, error = $3, outputs = $4, finished_at = $5 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status as i16)
        .bind(&job.error)
        .bind(&job.outputs)
        .bind(job.finished_at)
        .execute(conn(tx))
        .await?;
        Ok(())
    }

    async fn fail_stuck_media_jobs(
        &self,
        tx: &mut Self::Tx,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let result = sqlx::query(
            "UPDATE media_jobs SET status = $3, error = 'processing timed out', finished_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM media_jobs WHERE status IN ($4, $5) AND started_at < $1 \
                 ORDER BY id LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(started_before)
        .bind(limit)
        .bind(MediaJobStatus::Failed as i16)
        .bind(MediaJobStatus::Pending as i16)
        .bind(MediaJobStatus::Processing as i16)
        .execute(conn(tx))
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_terminal_media_jobs(
        &self,
        tx: &mut Self::Tx,
        finished_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let result = sqlx::query(
            "DELETE FROM media_jobs WHERE id IN ( \
                 SELECT id FROM media_jobs WHERE status IN ($3, $4) AND finished_at < $1 \
                 ORDER BY id LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(finished_before)
        .bind(limit)
        .bind(MediaJobStatus::Succeeded as i16)
        .bind(MediaJobStatus::Failed as i16)
        .execute(conn(tx))
        .await?;
        Ok(result.rows_affected())
    }
}
