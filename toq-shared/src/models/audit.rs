/// Append-only audit rows
///
/// # Schema
///
/// ```sql
/// CREATE TABLE audit (
///     id BIGSERIAL PRIMARY KEY,
///     executed_by BIGINT NOT NULL,
///     executed_at TIMESTAMPTZ NOT NULL,
///     table_name VARCHAR(64) NOT NULL,
///     action TEXT NOT NULL,
///     payload JSONB
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User id recorded for mutations performed by background workers
pub const SYSTEM_ACTOR: i64 = 0;

/// Tables that receive audit rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTable {
    Users,
    UserRoles,
    Roles,
    AgencyInvites,
    RealtorAgency,
    Listings,
}

impl AuditTable {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditTable::Users => "users",
            AuditTable::UserRoles => "user_roles",
            AuditTable::Roles => "roles",
            AuditTable::AgencyInvites => "agency_invites",
            AuditTable::RealtorAgency => "realtor_agency",
            AuditTable::Listings => "listings",
        }
    }
}

impl fmt::Display for AuditTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub executed_by: i64,
    pub executed_at: DateTime<Utc>,
    pub table_name: AuditTable,
    pub action: String,
    pub payload: Option<serde_json::Value>,
}
