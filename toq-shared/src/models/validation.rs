/// Pending-verification record
///
/// One row per user holding the pending email, phone and password-reset
/// codes. A slot is "pending" while its code is present; confirming a slot
/// clears it. The row is removed by the validation cleaner once every slot
/// is empty or expired.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE temp_validations (
///     user_id BIGINT PRIMARY KEY REFERENCES users(id),
///     new_email VARCHAR(255),
///     email_code VARCHAR(6),
///     email_code_exp TIMESTAMPTZ,
///     new_phone VARCHAR(20),
///     phone_code VARCHAR(6),
///     phone_code_exp TIMESTAMPTZ,
///     password_code VARCHAR(6),
///     password_code_exp TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub user_id: i64,
    pub new_email: Option<String>,
    pub email_code: Option<String>,
    pub email_code_exp: Option<DateTime<Utc>>,
    pub new_phone: Option<String>,
    pub phone_code: Option<String>,
    pub phone_code_exp: Option<DateTime<Utc>>,
    pub password_code: Option<String>,
    pub password_code_exp: Option<DateTime<Utc>>,
}

impl Validation {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn email_pending(&self) -> bool {
        self.email_code.is_some() && self.new_email.is_some()
    }

    pub fn phone_pending(&self) -> bool {
        self.phone_code.is_some() && self.new_phone.is_some()
    }

    pub fn password_pending(&self) -> bool {
        self.password_code.is_some()
    }

    pub fn set_email(&mut self, email: String, code: String, expires_at: DateTime<Utc>) {
        self.new_email = Some(email);
        self.email_code = Some(code);
        self.email_code_exp = Some(expires_at);
    }

    pub fn set_phone(&mut self, phone: String, code: String, expires_at: DateTime<Utc>) {
        self.new_phone = Some(phone);
        self.phone_code = Some(code);
        self.phone_code_exp = Some(expires_at);
    }

    pub fn set_password(&mut self, code: String, expires_at: DateTime<Utc>) {
        self.password_code = Some(code);
        self.password_code_exp = Some(expires_at);
    }

    pub fn clear_email(&mut self) {
        self.new_email = None;
        self.email_code = None;
        self.email_code_exp = None;
    }

    pub fn clear_phone(&mut self) {
        self.new_phone = None;
        self.phone_code = None;
        self.phone_code_exp = None;
    }

    pub fn clear_password(&mut self) {
        self.password_code = None;
        self.password_code_exp = None;
    }

    /// No slot is pending
    pub fn is_empty(&self) -> bool {
        !self.email_pending() && !self.phone_pending() && !self.password_pending()
    }

    /// Every pending slot has expired (or none is pending)
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let live = |code: &Option<String>, exp: &Option<DateTime<Utc>>| {
            code.is_some() && exp.map(|e| e > now).unwrap_or(false)
        };
        !live(&self.email_code, &self.email_code_exp)
            && !live(&self.phone_code, &self.phone_code_exp)
            && !live(&self.password_code, &self.password_code_exp)
    }
}
