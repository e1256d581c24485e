//! # PostgreSQL Message Queue Client (pgmq-rs)
//!
//! Durable queue client on top of the pgmq-rs crate. Messages live in
//! `pgmq.q_<queue>` tables, so scheduled deliveries survive restarts.

use async_trait::async_trait;
use pgmq::PGMQueue;
use serde_json::Value;
use tracing::{debug, info};

use super::client::{validate_queue_name, QueueClient, QueuedMessage};
use super::errors::{MessagingError, MessagingResult};

/// pgmq-rs based message queue client
#[derive(Debug, Clone)]
pub struct PgmqClient {
    pgmq: PGMQueue,
}

impl PgmqClient {
    /// Create new pgmq client using connection string
    pub async fn new(database_url: &str) -> MessagingResult<Self> {
        info!("Connecting to pgmq");

        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::database_connection(e.to_string()))?;

        info!("Connected to pgmq");
        Ok(Self { pgmq })
    }

    /// Create new pgmq client using existing connection pool
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        debug!("Creating pgmq client with shared connection pool");

        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    /// Get reference to underlying connection pool for advanced operations
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pgmq.connection
    }
}

#[async_trait]
impl QueueClient for PgmqClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        validate_queue_name(queue_name)?;
        debug!(queue = %queue_name, "Creating queue");

        self.pgmq
            .create(queue_name)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;

        info!(queue = %queue_name, "Queue ready");
        Ok(())
    }

    async fn send_json(&self, queue_name: &str, message: &Value) -> MessagingResult<i64> {
        let message_id = self
            .pgmq
            .send(queue_name, message)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        debug!(queue = %queue_name, msg_id = message_id, "Message sent");
        Ok(message_id)
    }

    async fn send_json_delayed(
        &self,
        queue_name: &str,
        message: &Value,
        delay_seconds: u64,
    ) -> MessagingResult<i64> {
        let message_id = self
            .pgmq
            .send_delay(queue_name, message, delay_seconds)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue_name, "send_delay", e.to_string())
            })?;

        debug!(
            queue = %queue_name,
            msg_id = message_id,
            delay_seconds = delay_seconds,
            "Delayed message sent"
        );
        Ok(message_id)
    }

    async fn read_messages(
        &self,
        queue_name: &str,
        visibility_timeout: i32,
        qty: i32,
    ) -> MessagingResult<Vec<QueuedMessage>> {
        let messages = self
            .pgmq
            .read_batch::<Value>(queue_name, Some(visibility_timeout), qty)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?
            .unwrap_or_default();

        if !messages.is_empty() {
            debug!(queue = %queue_name, count = messages.len(), "Read messages");
        }
        Ok(messages.into_iter().map(QueuedMessage::from).collect())
    }

    async fn delete_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()> {
        self.pgmq
            .delete(queue_name, message_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;

        debug!(queue = %queue_name, msg_id = message_id, "Message deleted");
        Ok(())
    }

    async fn archive_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()> {
        self.pgmq
            .archive(queue_name, message_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "archive", e.to_string()))?;

        debug!(queue = %queue_name, msg_id = message_id, "Message archived");
        Ok(())
    }

    async fn delete_matching(
        &self,
        queue_name: &str,
        field: &str,
        value: &str,
    ) -> MessagingResult<u64> {
        validate_queue_name(queue_name)?;

        // queue_name is validated above; it cannot be bound as a parameter
        let sql = format!("DELETE FROM pgmq.q_{queue_name} WHERE message->>$1 = $2");
        let result = sqlx::query(&sql)
            .bind(field)
            .bind(value)
            .execute(self.pool())
            .await?;

        debug!(
            queue = %queue_name,
            field = %field,
            deleted = result.rows_affected(),
            "Deleted matching messages"
        );
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pgmq_client_creation() {
        // Requires a PostgreSQL database; skipped otherwise
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping pgmq test - no TEST_DATABASE_URL provided");
            return;
        };

        let client = PgmqClient::new(&database_url).await;
        assert!(client.is_ok(), "Failed to create pgmq client: {client:?}");
    }

    #[tokio::test]
    async fn test_delayed_message_is_invisible_then_cancellable() {
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping delayed send test - no TEST_DATABASE_URL provided");
            return;
        };

        let client = PgmqClient::new(&database_url)
            .await
            .expect("Failed to create client");
        let queue = "test_delayed_push_deliveries";
        client.create_queue(queue).await.expect("create queue");

        client
            .send_json_delayed(queue, &json!({"token": "t1"}), 3600)
            .await
            .expect("send delayed");

        let visible = client.read_messages(queue, 30, 10).await.expect("read");
        assert!(visible.is_empty(), "delayed message must not be visible yet");

        let deleted = client
            .delete_matching(queue, "token", "t1")
            .await
            .expect("delete matching");
        assert_eq!(deleted, 1);
    }
}
