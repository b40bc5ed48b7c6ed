/// Role catalog and user-role bindings
///
/// The slug set is closed: self-service roles (`owner`, `realtor`, `agency`)
/// and system roles that only admins can assign (`root`, `photographer`,
/// `admin`). A user may hold several bindings but exactly one of them is
/// active at any time.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE roles (
///     id BIGSERIAL PRIMARY KEY,
///     slug VARCHAR(32) NOT NULL UNIQUE,
///     name VARCHAR(100) NOT NULL,
///     is_system_role BOOLEAN NOT NULL DEFAULT FALSE
/// );
///
/// CREATE TABLE user_roles (
///     id BIGSERIAL PRIMARY KEY,
///     user_id BIGINT NOT NULL REFERENCES users(id),
///     role_id BIGINT NOT NULL REFERENCES roles(id),
///     is_active BOOLEAN NOT NULL DEFAULT FALSE,
///     status SMALLINT NOT NULL,
///     status_reason VARCHAR(255),
///     blocked_until TIMESTAMPTZ,
///     status_before_block SMALLINT,
///     expires_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (user_id, role_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of role slugs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSlug {
    Owner,
    Realtor,
    Agency,
    Root,
    Photographer,
    Admin,
}

impl RoleSlug {
    pub const ALL: [RoleSlug; 6] = [
        RoleSlug::Owner,
        RoleSlug::Realtor,
        RoleSlug::Agency,
        RoleSlug::Root,
        RoleSlug::Photographer,
        RoleSlug::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoleSlug::Owner => "owner",
            RoleSlug::Realtor => "realtor",
            RoleSlug::Agency => "agency",
            RoleSlug::Root => "root",
            RoleSlug::Photographer => "photographer",
            RoleSlug::Admin => "admin",
        }
    }

    /// System roles are created by admins only
    pub fn is_system(self) -> bool {
        matches!(self, RoleSlug::Root | RoleSlug::Photographer | RoleSlug::Admin)
    }

    /// Status a freshly created binding starts in
    pub fn initial_status(self) -> RoleStatus {
        if self.is_system() {
            RoleStatus::Active
        } else {
            RoleStatus::PendingProfile
        }
    }
}

impl fmt::Display for RoleSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown slug
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role slug: {0}")]
pub struct UnknownRoleSlug(pub String);

impl FromStr for RoleSlug {
    type Err = UnknownRoleSlug;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleSlug::ALL
            .iter()
            .copied()
            .find(|slug| slug.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| UnknownRoleSlug(s.to_string()))
    }
}

/// Onboarding/enforcement state of a user-role binding
///
/// Discriminants are persisted and used in the transition rules file; never
/// reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum RoleStatus {
    Active = 0,
    Blocked = 1,
    TempBlocked = 2,
    PendingProfile = 3,
    PendingImages = 4,
    PendingOcr = 5,
    PendingFace = 6,
    PendingManual = 7,
    RefusedImage = 8,
    RefusedDocument = 9,
    RefusedData = 10,
    InvitePending = 11,
    Deleted = 12,
}

impl RoleStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Outcomes an admin can choose on manual review
    pub fn is_manual_review_outcome(self) -> bool {
        matches!(
            self,
            RoleStatus::Active
                | RoleStatus::RefusedImage
                | RoleStatus::RefusedDocument
                | RoleStatus::RefusedData
        )
    }

    /// Profile considered complete for the token claims
    pub fn is_profile_complete(self) -> bool {
        !matches!(
            self,
            RoleStatus::PendingProfile
                | RoleStatus::PendingImages
                | RoleStatus::PendingOcr
                | RoleStatus::PendingFace
                | RoleStatus::PendingManual
                | RoleStatus::RefusedImage
                | RoleStatus::RefusedDocument
                | RoleStatus::RefusedData
        )
    }
}

/// Error for an out-of-range status discriminant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role status: {0}")]
pub struct UnknownRoleStatus(pub i64);

impl TryFrom<i64> for RoleStatus {
    type Error = UnknownRoleStatus;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let status = match value {
            0 => RoleStatus::Active,
            1 => RoleStatus::Blocked,
            2 => RoleStatus::TempBlocked,
            3 => RoleStatus::PendingProfile,
            4 => RoleStatus::PendingImages,
            5 => RoleStatus::PendingOcr,
            6 => RoleStatus::PendingFace,
            7 => RoleStatus::PendingManual,
            8 => RoleStatus::RefusedImage,
            9 => RoleStatus::RefusedDocument,
            10 => RoleStatus::RefusedData,
            11 => RoleStatus::InvitePending,
            12 => RoleStatus::Deleted,
            other => return Err(UnknownRoleStatus(other)),
        };
        Ok(status)
    }
}

impl TryFrom<i16> for RoleStatus {
    type Error = UnknownRoleStatus;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        RoleStatus::try_from(i64::from(value))
    }
}

impl fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub slug: RoleSlug,
    pub name: String,
    pub is_system_role: bool,
}

/// Binding between a user and a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub role_slug: RoleSlug,
    pub is_active: bool,
    pub status: RoleStatus,
    pub status_reason: Option<String>,
    pub blocked_until: Option<DateTime<Utc>>,
    /// Status restored when a temporal block is lifted
    pub status_before_block: Option<RoleStatus>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRole {
    /// Temp block that has not yet expired
    pub fn is_temp_blocked(&self, now: DateTime<Utc>) -> bool {
        self.status == RoleStatus::TempBlocked
            && self.blocked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Moves the binding to `TempBlocked` until `until`
    ///
    /// Re-blocking an already blocked binding only extends the block.
    pub fn apply_temp_block(&mut self, until: DateTime<Utc>, reason: &str) {
        if self.status != RoleStatus::TempBlocked {
            self.status_before_block = Some(self.status);
        }
        self.status = RoleStatus::TempBlocked;
        self.blocked_until = Some(until);
        self.status_reason = Some(reason.to_string());
    }

    /// Lifts a temporal block, returning whether anything changed
    pub fn lift_temp_block(&mut self) -> bool {
        if self.status != RoleStatus::TempBlocked && self.blocked_until.is_none() {
            return false;
        }
        if self.status == RoleStatus::TempBlocked {
            self.status = self.status_before_block.unwrap_or(RoleStatus::Active);
        }
        self.status_before_block = None;
        self.blocked_until = None;
        self.status_reason = None;
        true
    }
}

/// Input for inserting a binding
#[derive(Debug, Clone)]
pub struct NewUserRole {
    pub user_id: i64,
    pub role_id: i64,
    pub role_slug: RoleSlug,
    pub is_active: bool,
    pub status: RoleStatus,
    pub status_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip() {
        for slug in RoleSlug::ALL {
            assert_eq!(slug.as_str().parse::<RoleSlug>().unwrap(), slug);
        }
        assert_eq!(" Realtor ".parse::<RoleSlug>().unwrap(), RoleSlug::Realtor);
        assert!("broker".parse::<RoleSlug>().is_err());
    }

    #[test]
    fn test_system_roles() {
        assert!(RoleSlug::Root.is_system());
        assert!(RoleSlug::Photographer.is_system());
        assert!(!RoleSlug::Owner.is_system());
        assert_eq!(RoleSlug::Root.initial_status(), RoleStatus::Active);
        assert_eq!(RoleSlug::Agency.initial_status(), RoleStatus::PendingProfile);
    }

    #[test]
    fn test_status_discriminants_are_stable() {
        assert_eq!(RoleStatus::Active.as_i16(), 0);
        assert_eq!(RoleStatus::PendingManual.as_i16(), 7);
        assert_eq!(RoleStatus::Deleted.as_i16(), 12);
        for value in 0..=12i64 {
            let status = RoleStatus::try_from(value).unwrap();
            assert_eq!(i64::from(status.as_i16()), value);
        }
        assert!(RoleStatus::try_from(13i64).is_err());
    }

    #[test]
    fn test_manual_review_outcomes() {
        assert!(RoleStatus::Active.is_manual_review_outcome());
        assert!(RoleStatus::RefusedData.is_manual_review_outcome());
        assert!(!RoleStatus::PendingManual.is_manual_review_outcome());
        assert!(!RoleStatus::Blocked.is_manual_review_outcome());
    }

    fn binding(status: RoleStatus) -> UserRole {
        UserRole {
            id: 1,
            user_id: 10,
            role_id: 2,
            role_slug: RoleSlug::Realtor,
            is_active: true,
            status,
            status_reason: None,
            blocked_until: None,
            status_before_block: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_lifting_block_restores_previous_status() {
        let now = Utc::now();
        let mut role = binding(RoleStatus::PendingImages);
        role.apply_temp_block(now + chrono::Duration::minutes(15), "too many attempts");
        assert!(role.is_temp_blocked(now));
        assert_eq!(role.status_before_block, Some(RoleStatus::PendingImages));

        // A second block extends without losing the original status
        role.apply_temp_block(now + chrono::Duration::minutes(30), "too many attempts");
        assert_eq!(role.status_before_block, Some(RoleStatus::PendingImages));

        assert!(role.lift_temp_block());
        assert_eq!(role.status, RoleStatus::PendingImages);
        assert!(role.blocked_until.is_none());
        assert!(!role.lift_temp_block());
    }
}
