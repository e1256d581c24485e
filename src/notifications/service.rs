use std::sync::Arc;

use tracing::info;

use super::token_directory::TokenDirectory;
use crate::error::Result;
use crate::messaging::QueueClient;

/// What a token revocation removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokedToken {
    /// The token was present in the directory
    pub removed: bool,
    /// Pending delivery jobs dropped for it
    pub cancelled_deliveries: u64,
}

/// Device-token lifecycle used by the producing services
///
/// Revoking a token also drops every delivery still waiting for it, so a
/// device that unregistered receives nothing that was scheduled before.
pub struct NotificationService {
    queue: Arc<dyn QueueClient>,
    directory: Arc<dyn TokenDirectory>,
    delivery_queue: String,
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("delivery_queue", &self.delivery_queue)
            .finish()
    }
}

impl NotificationService {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        directory: Arc<dyn TokenDirectory>,
        delivery_queue: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            directory,
            delivery_queue: delivery_queue.into(),
        }
    }

    pub async fn register_device_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.directory.register_token(user_id, token).await?;
        Ok(())
    }

    /// Remove every not-yet-sent delivery job addressed to `token`
    pub async fn cancel_pending_deliveries(&self, token: &str) -> Result<u64> {
        let cancelled = self
            .queue
            .delete_matching(&self.delivery_queue, "token", token)
            .await?;
        if cancelled > 0 {
            info!(cancelled = cancelled, "Cancelled pending deliveries");
        }
        Ok(cancelled)
    }

    pub async fn revoke_device_token(&self, user_id: &str, token: &str) -> Result<RevokedToken> {
        let removed = self.directory.revoke_token(user_id, token).await?;
        let cancelled_deliveries = self.cancel_pending_deliveries(token).await?;

        info!(
            user_id = %user_id,
            removed = removed,
            cancelled_deliveries = cancelled_deliveries,
            "Device token revoked"
        );
        Ok(RevokedToken {
            removed,
            cancelled_deliveries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{InMemoryQueue, InMemoryTokenDirectory};
    use serde_json::json;

    #[tokio::test]
    async fn test_revoke_removes_token_and_its_pending_jobs() {
        let queue = Arc::new(InMemoryQueue::new());
        let directory = Arc::new(InMemoryTokenDirectory::new());
        let service = NotificationService::new(queue.clone(), directory.clone(), "push_deliveries");

        service.register_device_token("u1", "t1").await.unwrap();
        service.register_device_token("u1", "t2").await.unwrap();
        for token in ["t1", "t1", "t2"] {
            queue
                .send_json_delayed("push_deliveries", &json!({"token": token}), 3600)
                .await
                .unwrap();
        }

        let revoked = service.revoke_device_token("u1", "t1").await.unwrap();

        assert_eq!(
            revoked,
            RevokedToken {
                removed: true,
                cancelled_deliveries: 2
            }
        );
        let remaining = queue.pending_bodies("push_deliveries");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["token"], "t2");

        let tokens = directory.tokens_for_user("u1").await.unwrap().unwrap();
        assert_eq!(tokens.tokens.into_iter().collect::<Vec<_>>(), vec!["t2".to_string()]);
    }

    #[tokio::test]
    async fn test_revoking_unknown_token_is_not_an_error() {
        let queue = Arc::new(InMemoryQueue::new());
        let directory = Arc::new(InMemoryTokenDirectory::new());
        let service = NotificationService::new(queue, directory, "push_deliveries");

        let revoked = service.revoke_device_token("u1", "nope").await.unwrap();

        assert!(!revoked.removed);
        assert_eq!(revoked.cancelled_deliveries, 0);
    }
}
