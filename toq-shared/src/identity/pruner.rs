//! Device-token pruning on session revocation

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::DomainError;
use crate::events::{SessionEvent, SessionEventHandler, SessionEventKind};
use crate::repository::DeviceTokenRegistry;

/// Removes the push token of a device whose session was revoked
///
/// Revocations without a device id leave the registry untouched; account
/// deletion purges every token itself.
pub struct DeviceTokenPruner {
    registry: Arc<dyn DeviceTokenRegistry>,
}

impl DeviceTokenPruner {
    pub fn new(registry: Arc<dyn DeviceTokenRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SessionEventHandler for DeviceTokenPruner {
    fn name(&self) -> &'static str {
        "device_token_pruner"
    }

    async fn handle(&self, event: &SessionEvent) -> Result<(), DomainError> {
        if event.kind != SessionEventKind::Revoked {
            return Ok(());
        }
        let Some(device_id) = event.device_id else {
            return Ok(());
        };

        let removed = self.registry.remove_by_device(event.user_id, device_id).await?;
        debug!(user_id = event.user_id, %device_id, removed, "Device token pruned");
        Ok(())
    }
}
