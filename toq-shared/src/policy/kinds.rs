/// Action and notification kinds referenced by transition rules
///
/// Both enums are persisted as integers in the rules file; discriminants
/// must never be reordered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Onboarding step that just finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ActionFinished {
    ProfileEmailVerifiedPhonePending = 0,
    ProfilePhoneVerifiedEmailPending = 1,
    ProfileVerificationCompleted = 2,
    CreciImagesUploaded = 3,
    CreciOcrValidated = 4,
    CreciFaceValidated = 5,
    InviteCreated = 6,
    InviteAccepted = 7,
    InviteRejected = 8,
}

impl ActionFinished {
    pub fn from_i64(value: i64) -> Option<Self> {
        let action = match value {
            0 => ActionFinished::ProfileEmailVerifiedPhonePending,
            1 => ActionFinished::ProfilePhoneVerifiedEmailPending,
            2 => ActionFinished::ProfileVerificationCompleted,
            3 => ActionFinished::CreciImagesUploaded,
            4 => ActionFinished::CreciOcrValidated,
            5 => ActionFinished::CreciFaceValidated,
            6 => ActionFinished::InviteCreated,
            7 => ActionFinished::InviteAccepted,
            8 => ActionFinished::InviteRejected,
            _ => return None,
        };
        Some(action)
    }

    /// Action to evaluate after a contact confirmation, given what is still
    /// pending
    pub fn after_contact_confirmation(email_pending: bool, phone_pending: bool) -> Self {
        match (email_pending, phone_pending) {
            (false, true) => ActionFinished::ProfileEmailVerifiedPhonePending,
            (true, false) => ActionFinished::ProfilePhoneVerifiedEmailPending,
            (true, true) => ActionFinished::ProfilePhoneVerifiedEmailPending,
            (false, false) => ActionFinished::ProfileVerificationCompleted,
        }
    }
}

impl fmt::Display for ActionFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notification attached to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum NotificationKind {
    None = 0,
    EmailChange = 1,
    PhoneChange = 2,
    PasswordChange = 3,
    ProfileCompleted = 4,
    CreciUnderReview = 5,
    CreciValidated = 6,
    CreciRefused = 7,
    RealtorInviteSms = 8,
    RealtorInvitePush = 9,
    InviteAccepted = 10,
    InviteRejected = 11,
    RealtorRemovedFromAgency = 12,
    AgencyRemovedFromRealtor = 13,
    AccountLocked = 14,
    SystemUserWelcome = 15,
}

impl NotificationKind {
    pub fn from_i64(value: i64) -> Option<Self> {
        let kind = match value {
            0 => NotificationKind::None,
            1 => NotificationKind::EmailChange,
            2 => NotificationKind::PhoneChange,
            3 => NotificationKind::PasswordChange,
            4 => NotificationKind::ProfileCompleted,
            5 => NotificationKind::CreciUnderReview,
            6 => NotificationKind::CreciValidated,
            7 => NotificationKind::CreciRefused,
            8 => NotificationKind::RealtorInviteSms,
            9 => NotificationKind::RealtorInvitePush,
            10 => NotificationKind::InviteAccepted,
            11 => NotificationKind::InviteRejected,
            12 => NotificationKind::RealtorRemovedFromAgency,
            13 => NotificationKind::AgencyRemovedFromRealtor,
            14 => NotificationKind::AccountLocked,
            15 => NotificationKind::SystemUserWelcome,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_none(self) -> bool {
        self == NotificationKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for value in 0..=8i64 {
            let action = ActionFinished::from_i64(value).unwrap();
            assert_eq!(action as i16 as i64, value);
        }
        assert!(ActionFinished::from_i64(9).is_none());
        assert!(ActionFinished::from_i64(-1).is_none());
    }

    #[test]
    fn test_notification_round_trip() {
        for value in 0..=15i64 {
            let kind = NotificationKind::from_i64(value).unwrap();
            assert_eq!(kind as i16 as i64, value);
        }
        assert!(NotificationKind::from_i64(16).is_none());
    }

    #[test]
    fn test_after_contact_confirmation() {
        assert_eq!(
            ActionFinished::after_contact_confirmation(false, true),
            ActionFinished::ProfileEmailVerifiedPhonePending
        );
        assert_eq!(
            ActionFinished::after_contact_confirmation(true, false),
            ActionFinished::ProfilePhoneVerifiedEmailPending
        );
        assert_eq!(
            ActionFinished::after_contact_confirmation(false, false),
            ActionFinished::ProfileVerificationCompleted
        );
    }
}
