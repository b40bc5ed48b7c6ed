/// Session rows owned by the session store
///
/// The identity core never creates sessions itself; it only revokes and
/// deletes them by user and sweeps expired rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    pub device_id: Option<Uuid>,
    pub expired_at: DateTime<Utc>,
    pub revoked: bool,
}
