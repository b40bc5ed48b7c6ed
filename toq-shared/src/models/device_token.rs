/// Push device tokens
///
/// # Schema
///
/// ```sql
/// CREATE TABLE device_tokens (
///     user_id BIGINT NOT NULL REFERENCES users(id),
///     device_id UUID NOT NULL,
///     push_token TEXT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (user_id, device_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceToken {
    pub user_id: i64,
    pub device_id: Uuid,
    pub push_token: String,
    pub updated_at: DateTime<Utc>,
}
