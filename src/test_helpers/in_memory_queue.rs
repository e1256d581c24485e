use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use crate::messaging::{validate_queue_name, MessagingError, MessagingResult, QueueClient, QueuedMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    message: Value,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: BTreeMap<i64, StoredMessage>,
    archive: Vec<StoredMessage>,
}

/// Queue with pgmq's visibility, read-count and archive semantics
///
/// Visibility runs on tokio's clock, so paused-time tests can step through
/// delayed deliveries with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_id: Mutex<i64>,
    fail_reads: AtomicBool,
    send_budgets: Mutex<HashMap<String, usize>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following read fail like a lost broker connection
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Let `allowed` more sends to `queue_name` succeed, then fail the rest
    pub fn fail_sends_after(&self, queue_name: &str, allowed: usize) {
        self.send_budgets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(queue_name.to_string(), allowed);
    }

    pub fn restore_sends(&self) {
        self.send_budgets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn queue_exists(&self, queue_name: &str) -> bool {
        self.lock().contains_key(queue_name)
    }

    /// Bodies still in the queue, visible or not, oldest first
    pub fn pending_bodies(&self, queue_name: &str) -> Vec<Value> {
        self.lock()
            .get(queue_name)
            .map(|state| state.messages.values().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn archived_bodies(&self, queue_name: &str) -> Vec<Value> {
        self.lock()
            .get(queue_name)
            .map(|state| state.archive.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_message_id(&self) -> i64 {
        let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
        *next_id += 1;
        *next_id
    }

    fn enqueue(&self, queue_name: &str, message: &Value, delay: Duration) -> MessagingResult<i64> {
        validate_queue_name(queue_name)?;
        if let Some(remaining) = self
            .send_budgets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(queue_name)
        {
            if *remaining == 0 {
                return Err(MessagingError::queue_operation(
                    queue_name,
                    "send",
                    "connection lost",
                ));
            }
            *remaining -= 1;
        }
        let msg_id = self.next_message_id();
        let stored = StoredMessage {
            msg_id,
            read_ct: 0,
            enqueued_at: Utc::now(),
            visible_at: Instant::now() + delay,
            message: message.clone(),
        };
        self.lock()
            .entry(queue_name.to_string())
            .or_default()
            .messages
            .insert(msg_id, stored);
        Ok(msg_id)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        validate_queue_name(queue_name)?;
        self.lock().entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn send_json(&self, queue_name: &str, message: &Value) -> MessagingResult<i64> {
        self.enqueue(queue_name, message, Duration::ZERO)
    }

    async fn send_json_delayed(
        &self,
        queue_name: &str,
        message: &Value,
        delay_seconds: u64,
    ) -> MessagingResult<i64> {
        self.enqueue(queue_name, message, Duration::from_secs(delay_seconds))
    }

    async fn read_messages(
        &self,
        queue_name: &str,
        visibility_timeout: i32,
        qty: i32,
    ) -> MessagingResult<Vec<QueuedMessage>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MessagingError::queue_operation(
                queue_name,
                "read",
                "connection lost",
            ));
        }

        let now = Instant::now();
        let hidden_for = Duration::from_secs(u64::try_from(visibility_timeout).unwrap_or(0));
        let mut queues = self.lock();
        let Some(state) = queues.get_mut(queue_name) else {
            return Ok(Vec::new());
        };

        let limit = usize::try_from(qty).unwrap_or(0);
        let read = state
            .messages
            .values_mut()
            .filter(|m| m.visible_at <= now)
            .take(limit)
            .map(|m| {
                m.read_ct += 1;
                m.visible_at = now + hidden_for;
                QueuedMessage {
                    msg_id: m.msg_id,
                    read_ct: m.read_ct,
                    enqueued_at: m.enqueued_at,
                    vt: Utc::now() + chrono::Duration::seconds(i64::from(visibility_timeout)),
                    message: m.message.clone(),
                }
            })
            .collect();
        Ok(read)
    }

    async fn delete_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()> {
        if let Some(state) = self.lock().get_mut(queue_name) {
            state.messages.remove(&message_id);
        }
        Ok(())
    }

    async fn archive_message(&self, queue_name: &str, message_id: i64) -> MessagingResult<()> {
        if let Some(state) = self.lock().get_mut(queue_name) {
            if let Some(message) = state.messages.remove(&message_id) {
                state.archive.push(message);
            }
        }
        Ok(())
    }

    async fn delete_matching(
        &self,
        queue_name: &str,
        field: &str,
        value: &str,
    ) -> MessagingResult<u64> {
        let mut queues = self.lock();
        let Some(state) = queues.get_mut(queue_name) else {
            return Ok(0);
        };

        let before = state.messages.len();
        state
            .messages
            .retain(|_, m| m.message.get(field).and_then(Value::as_str) != Some(value));
        Ok((before - state.messages.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_hides_then_redelivers() {
        let queue = InMemoryQueue::new();
        queue.send_json("jobs", &json!({"n": 1})).await.unwrap();

        let first = queue.read_messages("jobs", 10, 5).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].read_ct, 1);
        assert!(queue.read_messages("jobs", 10, 5).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = queue.read_messages("jobs", 10, 5).await.unwrap();
        assert_eq!(second[0].msg_id, first[0].msg_id);
        assert_eq!(second[0].read_ct, 2);
    }

    #[tokio::test]
    async fn test_delete_matching_only_touches_that_queue() {
        let queue = InMemoryQueue::new();
        queue.send_json("a", &json!({"token": "t1"})).await.unwrap();
        queue.send_json("a", &json!({"token": "t2"})).await.unwrap();
        queue.send_json("b", &json!({"token": "t1"})).await.unwrap();

        assert_eq!(queue.delete_matching("a", "token", "t1").await.unwrap(), 1);
        assert_eq!(queue.pending_bodies("a").len(), 1);
        assert_eq!(queue.pending_bodies("b").len(), 1);
    }
}
