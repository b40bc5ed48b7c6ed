/// Agency invitations and agency-realtor links
///
/// # Schema
///
/// ```sql
/// CREATE TABLE agency_invites (
///     id BIGSERIAL PRIMARY KEY,
///     agency_id BIGINT NOT NULL REFERENCES users(id),
///     phone VARCHAR(20) NOT NULL UNIQUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE realtor_agency (
///     id BIGSERIAL PRIMARY KEY,
///     agency_id BIGINT NOT NULL REFERENCES users(id),
///     realtor_id BIGINT NOT NULL UNIQUE REFERENCES users(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending invitation, at most one per phone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyInvite {
    pub id: i64,
    pub agency_id: i64,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

/// Active link, at most one per realtor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyRealtor {
    pub id: i64,
    pub agency_id: i64,
    pub realtor_id: i64,
    pub created_at: DateTime<Utc>,
}
