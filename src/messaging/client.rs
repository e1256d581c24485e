//! # Queue Client Trait
//!
//! The seam between consumers and the durable queue. Production code uses
//! [`PgmqClient`](super::PgmqClient); tests use the in-memory queue from
//! [`crate::test_helpers`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::errors::{MessagingError, MessagingResult};
use super::message::DeadLetter;
use crate::constants::MAX_QUEUE_NAME_LENGTH;

/// A message read from a queue, invisible to other readers until its
/// visibility timeout lapses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub msg_id: i64,
    /// How many times this message has been read, this read included
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub vt: DateTime<Utc>,
    pub message: Value,
}

impl From<pgmq::types::Message<Value>> for QueuedMessage {
    fn from(message: pgmq::types::Message<Value>) -> Self {
        Self {
            msg_id: message.msg_id,
            read_ct: message.read_ct,
            enqueued_at: message.enqueued_at,
            vt: message.vt,
            message: message.message,
        }
    }
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create queue if it doesn't exist
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Send a JSON message, visible immediately
    async fn send_json(&self, queue_name: &str, message: &Value) -> MessagingResult<i64>;

    /// Send a JSON message that stays invisible for `delay_seconds`
    async fn send_json_delayed(
        &self,
        queue_name: &str,
        message: &Value,
        delay_seconds: u64,
    ) -> MessagingResult<i64>;

    /// Read up to `qty` visible messages, hiding them for `visibility_timeout` seconds
    async fn read_messages(
        &self,
        queue_name: &str,
        visibility_timeout: i32,
        qty: i32,
    ) -> MessagingResult<Vec<QueuedMessage>>;

    /// Acknowledge a message
    async fn delete_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()>;

    /// Move a message to the queue's archive table
    async fn archive_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()>;

    /// Delete every pending message whose top-level string `field` equals `value`
    async fn delete_matching(
        &self,
        queue_name: &str,
        field: &str,
        value: &str,
    ) -> MessagingResult<u64>;
}

/// Queue names end up inside pgmq table names, so only lowercase
/// identifiers are allowed
pub fn validate_queue_name(queue_name: &str) -> MessagingResult<()> {
    if queue_name.is_empty() {
        return Err(MessagingError::invalid_queue_name(queue_name, "must not be empty"));
    }
    if queue_name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            format!("longer than {MAX_QUEUE_NAME_LENGTH} characters"),
        ));
    }
    let valid = queue_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !queue_name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            "only lowercase letters, digits and underscores are allowed",
        ));
    }
    Ok(())
}

pub fn dead_letter_queue_name(queue_name: &str, suffix: &str) -> String {
    format!("{queue_name}{suffix}")
}

/// Park a poison message on `dead_letter_queue` and remove it from its source
///
/// Logs the move at info; callers warn about the cause themselves.
pub async fn dead_letter(
    queue: &dyn QueueClient,
    source_queue: &str,
    dead_letter_queue: &str,
    message: &QueuedMessage,
    reason: &str,
) -> MessagingResult<i64> {
    let record = DeadLetter {
        source_queue: source_queue.to_string(),
        message_id: message.msg_id,
        read_count: message.read_ct,
        reason: reason.to_string(),
        payload: message.message.clone(),
        failed_at: Utc::now(),
    };

    let dead_letter_id = queue
        .send_json(dead_letter_queue, &serde_json::to_value(&record)?)
        .await?;
    queue.delete_message(source_queue, message.msg_id).await?;

    info!(
        source_queue = %source_queue,
        dead_letter_queue = %dead_letter_queue,
        msg_id = message.msg_id,
        dead_letter_id = dead_letter_id,
        reason = %reason,
        "Message moved to dead-letter queue"
    );
    Ok(dead_letter_id)
}
