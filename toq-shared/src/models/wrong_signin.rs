/// Brute-force tracker
///
/// # Schema
///
/// ```sql
/// CREATE TABLE temp_wrong_signin (
///     user_id BIGINT PRIMARY KEY REFERENCES users(id),
///     failed_attempts INTEGER NOT NULL DEFAULT 0,
///     last_attempt_at TIMESTAMPTZ NOT NULL
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrongSignin {
    pub user_id: i64,
    pub failed_attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
}

impl WrongSignin {
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            failed_attempts: 0,
            last_attempt_at: now,
        }
    }

    /// Records one more failure and returns the post-increment count
    pub fn register_failure(&mut self, now: DateTime<Utc>) -> i32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_attempt_at = now;
        self.failed_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_failure() {
        let now = Utc::now();
        let mut tracker = WrongSignin::new(3, now);
        assert_eq!(tracker.register_failure(now), 1);
        assert_eq!(tracker.register_failure(now), 2);
        assert_eq!(tracker.failed_attempts, 2);
    }
}
