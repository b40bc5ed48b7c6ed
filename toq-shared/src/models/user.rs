/// User model
///
/// A user row carries identity, address, credentials and the account-level
/// blocking state. Rows are soft-deleted: on account teardown the
/// personally-identifying fields are masked and `deleted` is set, but the row
/// is kept so that audit records keep pointing at something.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id BIGSERIAL PRIMARY KEY,
///     national_id VARCHAR(14) NOT NULL,
///     full_name VARCHAR(255) NOT NULL,
///     nickname VARCHAR(100) NOT NULL,
///     email VARCHAR(255) NOT NULL,
///     phone VARCHAR(20) NOT NULL,
///     birth_date DATE,
///     zip_code VARCHAR(8) NOT NULL,
///     street VARCHAR(255) NOT NULL,
///     number VARCHAR(20) NOT NULL,
///     complement VARCHAR(255) NOT NULL,
///     neighborhood VARCHAR(255) NOT NULL,
///     city VARCHAR(255) NOT NULL,
///     state VARCHAR(2) NOT NULL,
///     password_hash VARCHAR(255) NOT NULL,
///     last_activity_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     blocked_until TIMESTAMPTZ,
///     permanently_blocked BOOLEAN NOT NULL DEFAULT FALSE,
///     opt_in BOOLEAN NOT NULL DEFAULT TRUE,
///     deleted BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::role::UserRole;

/// Sentinel written over the national id of a deleted account
pub const DELETED_NATIONAL_ID: &str = "00000000000";

/// Postal address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// CEP, digits only
    pub zip_code: String,
    pub street: String,
    pub number: String,
    pub complement: String,
    pub neighborhood: String,
    pub city: String,
    /// Two-letter state code
    pub state: String,
}

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// CPF or CNPJ, digits only
    pub national_id: String,

    /// Canonical full name as returned by the identity provider
    pub full_name: String,

    pub nickname: String,

    pub email: String,

    /// E.164 phone number
    pub phone: String,

    pub birth_date: Option<NaiveDate>,

    pub address: Address,

    /// Argon2id PHC string. Never serialized outward.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub last_activity_at: DateTime<Utc>,

    /// Account-level temporal block mirror of the role-level block
    pub blocked_until: Option<DateTime<Utc>>,

    /// Set by admins, cleared only by admins
    pub permanently_blocked: bool,

    /// Push opt-in flag
    pub opt_in: bool,

    pub deleted: bool,

    pub created_at: DateTime<Utc>,
}

/// Input for inserting a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub national_id: String,
    pub full_name: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    pub address: Address,
    pub password_hash: String,
    pub opt_in: bool,
}

/// A user together with its active role binding, if any
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user: User,
    pub active_role: Option<UserRole>,
}

impl User {
    /// Materializes a user from an insert payload
    pub fn from_new(id: i64, data: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id,
            national_id: data.national_id,
            full_name: data.full_name,
            nickname: data.nickname,
            email: data.email,
            phone: data.phone,
            birth_date: data.birth_date,
            address: data.address,
            password_hash: data.password_hash,
            last_activity_at: now,
            blocked_until: None,
            permanently_blocked: false,
            opt_in: data.opt_in,
            deleted: false,
            created_at: now,
        }
    }

    /// Whether an account-level temporal block is still in force
    pub fn is_temp_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Overwrites personally-identifying fields with fixed sentinels and
    /// flags the row deleted.
    pub fn mask_for_deletion(&mut self) {
        self.national_id = DELETED_NATIONAL_ID.to_string();
        self.full_name = "deleted user".to_string();
        self.nickname = String::new();
        self.email = format!("deleted+{}@toq.invalid", self.id);
        self.phone = format!("+000{:011}", self.id);
        self.birth_date = None;
        self.address = Address::default();
        self.password_hash = String::new();
        self.blocked_until = None;
        self.opt_in = false;
        self.deleted = true;
    }
}

/// Strips everything but ASCII digits (CPF/CNPJ/CEP normalization)
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}
