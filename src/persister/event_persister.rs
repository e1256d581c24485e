use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, QueuesConfig};
use crate::error::Result;
use crate::messaging::{dead_letter, DecodeError, EventEnvelope, QueueClient, QueuedMessage};
use crate::models::EventStore;
use crate::validation::validate_message_size;

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Row written and message deleted
    Persisted { kind: &'static str },
    /// Poison or exhausted message moved to the dead-letter queue
    DeadLettered { reason: String },
    /// Downstream failure; the message reappears after its visibility timeout
    Retrying { reason: String },
}

#[derive(Debug, Default)]
pub struct PersisterStats {
    pub received: AtomicU64,
    pub persisted: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersisterStatsSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub dead_lettered: u64,
    pub retried: u64,
}

impl PersisterStats {
    pub fn snapshot(&self) -> PersisterStatsSnapshot {
        PersisterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Single sequential consumer of the events queue
pub struct EventPersister {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn EventStore>,
    queue_name: String,
    dead_letter_queue: String,
    consumer: ConsumerConfig,
    stats: PersisterStats,
}

impl std::fmt::Debug for EventPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPersister")
            .field("queue_name", &self.queue_name)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .field("consumer", &self.consumer)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl EventPersister {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn EventStore>,
        queues: &QueuesConfig,
        consumer: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            queue_name: queues.events.clone(),
            dead_letter_queue: queues.dead_letter_queue(&queues.events),
            consumer,
            stats: PersisterStats::default(),
        }
    }

    pub fn stats(&self) -> PersisterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// A read that fails at the broker ends the loop with an error. Messages
    /// already read are finished before a cancellation is honoured.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(queue_name = %self.queue_name, "Event persister started");

        loop {
            let messages = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.queue.read_messages(
                    &self.queue_name,
                    self.consumer.visibility_timeout_seconds,
                    self.consumer.batch_size,
                ) => read?,
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.consumer.poll_interval()) => {}
                }
                continue;
            }

            for message in &messages {
                self.process_message(message).await?;
            }
        }

        info!(
            queue_name = %self.queue_name,
            stats = ?self.stats(),
            "Event persister stopped"
        );
        Ok(())
    }

    /// Classify, validate and persist one message
    ///
    /// Only queue failures are returned as errors; everything else is an
    /// outcome.
    pub async fn process_message(&self, message: &QueuedMessage) -> Result<ProcessOutcome> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if message.read_ct > self.consumer.max_read_count {
            let reason = format!("read {} times without success", message.read_ct);
            warn!(msg_id = message.msg_id, reason = %reason, "Giving up on event");
            return self.reject(message, reason).await;
        }

        if let Err(e) = validate_message_size(&message.message) {
            warn!(msg_id = message.msg_id, error = %e, "Oversized event");
            return self.reject(message, e.to_string()).await;
        }

        let envelope = match EventEnvelope::decode(&message.message) {
            Ok(envelope) => envelope,
            Err(e) => {
                if e.is_unknown_type() {
                    warn!(msg_id = message.msg_id, error = %e, "unknown message type");
                } else {
                    warn!(msg_id = message.msg_id, error = %e, "Undecodable event");
                }
                return self.reject(message, e.to_string()).await;
            }
        };

        let kind = envelope.kind();
        let written = match envelope {
            EventEnvelope::Purchase(event) => match event.validate() {
                Ok(record) => self.store.insert_purchase(&record).await,
                Err(e) => return self.reject_invalid(message, kind, e.to_string()).await,
            },
            EventEnvelope::Donation(event) => match event.validate() {
                Ok(record) => self.store.insert_donation(&record).await,
                Err(e) => return self.reject_invalid(message, kind, e.to_string()).await,
            },
            EventEnvelope::Notification(_) => {
                let error = DecodeError::UnexpectedKind {
                    kind: kind.to_string(),
                };
                warn!(msg_id = message.msg_id, error = %error, "Notification on the events queue");
                return self.reject(message, error.to_string()).await;
            }
        };

        match written {
            Ok(()) => {
                self.queue
                    .delete_message(&self.queue_name, message.msg_id)
                    .await?;
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(msg_id = message.msg_id, kind = kind, "Event persisted");
                Ok(ProcessOutcome::Persisted { kind })
            }
            Err(e) => {
                self.retry_or_dead_letter(message, format!("insert failed: {e}"))
                    .await
            }
        }
    }

    async fn reject_invalid(
        &self,
        message: &QueuedMessage,
        kind: &str,
        reason: String,
    ) -> Result<ProcessOutcome> {
        warn!(msg_id = message.msg_id, kind = kind, reason = %reason, "Invalid event");
        self.reject(message, reason).await
    }

    async fn reject(&self, message: &QueuedMessage, reason: String) -> Result<ProcessOutcome> {
        dead_letter(
            self.queue.as_ref(),
            &self.queue_name,
            &self.dead_letter_queue,
            message,
            &reason,
        )
        .await?;
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(ProcessOutcome::DeadLettered { reason })
    }

    async fn retry_or_dead_letter(
        &self,
        message: &QueuedMessage,
        reason: String,
    ) -> Result<ProcessOutcome> {
        if message.read_ct >= self.consumer.max_read_count {
            warn!(
                msg_id = message.msg_id,
                read_ct = message.read_ct,
                reason = %reason,
                "Event not persisted; retries exhausted"
            );
            return self.reject(message, reason).await;
        }

        warn!(
            msg_id = message.msg_id,
            read_ct = message.read_ct,
            reason = %reason,
            "Event not persisted; leaving it for redelivery"
        );
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        Ok(ProcessOutcome::Retrying { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{InMemoryEventStore, InMemoryQueue, LogCapture};
    use serde_json::json;

    struct Fixture {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryEventStore>,
        persister: EventPersister,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryEventStore::new());
        let persister = EventPersister::new(
            queue.clone(),
            store.clone(),
            &QueuesConfig::default(),
            ConsumerConfig::default(),
        );
        Fixture {
            queue,
            store,
            persister,
        }
    }

    async fn deliver(fixture: &Fixture, body: serde_json::Value) -> ProcessOutcome {
        fixture.queue.send_json("purchases", &body).await.unwrap();
        let messages = fixture.queue.read_messages("purchases", 30, 1).await.unwrap();
        fixture
            .persister
            .process_message(&messages[0])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_untagged_purchase_is_persisted_and_acknowledged() {
        let fixture = fixture();

        let outcome = deliver(
            &fixture,
            json!({
                "user_token": "abc",
                "place_id": 7,
                "event_time": "2024-01-01T10:00:00Z",
                "purchase_time": "2024-01-01T09:00:00Z",
                "cost": 300
            }),
        )
        .await;

        assert_eq!(outcome, ProcessOutcome::Persisted { kind: "purchase" });
        let purchases = fixture.store.purchases();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].cost, 300);
        assert_eq!(purchases[0].place_id, 7);
        assert!(fixture.queue.pending_bodies("purchases").is_empty());
    }

    #[tokio::test]
    async fn test_tagged_donation_is_persisted() {
        let fixture = fixture();

        let outcome = deliver(
            &fixture,
            json!({
                "kind": "donation",
                "user_token": "abc",
                "collection_id": 3,
                "donation_time": "2024-01-01T09:00:00Z",
                "amount": 50
            }),
        )
        .await;

        assert_eq!(outcome, ProcessOutcome::Persisted { kind: "donation" });
        assert_eq!(fixture.store.donations().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_donation_is_dead_lettered() {
        let fixture = fixture();

        let outcome = deliver(
            &fixture,
            json!({
                "user_token": "abc",
                "collection_id": 3,
                "donation_time": "2024-01-01T09:00:00Z",
                "amount": 0
            }),
        )
        .await;

        assert!(matches!(outcome, ProcessOutcome::DeadLettered { .. }));
        assert!(fixture.store.donations().is_empty());
        assert!(fixture.queue.pending_bodies("purchases").is_empty());

        let dead = fixture.queue.pending_bodies("purchases_dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0]["source_queue"], "purchases");
        assert_eq!(dead[0]["payload"]["amount"], 0);
    }

    #[tokio::test]
    async fn test_unknown_shape_writes_nothing() {
        let fixture = fixture();
        let (logs, _guard) = LogCapture::install();

        let outcome = deliver(&fixture, json!({"foo": "bar"})).await;

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("unknown message type"));

        assert_eq!(
            outcome,
            ProcessOutcome::DeadLettered {
                reason: "unknown message type".to_string()
            }
        );
        assert!(fixture.store.purchases().is_empty());
        assert!(fixture.store.donations().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_and_misrouted_messages_are_dead_lettered() {
        let fixture = fixture();

        let ambiguous = deliver(
            &fixture,
            json!({"user_token": "abc", "place_id": 1, "collection_id": 2}),
        )
        .await;
        let misrouted = deliver(
            &fixture,
            json!({"kind": "notification", "user_id": "u1", "header": "H", "content": "C"}),
        )
        .await;

        assert!(matches!(ambiguous, ProcessOutcome::DeadLettered { .. }));
        assert!(matches!(misrouted, ProcessOutcome::DeadLettered { .. }));
        assert_eq!(fixture.queue.pending_bodies("purchases_dlq").len(), 2);
        assert_eq!(fixture.persister.stats().dead_lettered, 2);
    }

    #[tokio::test]
    async fn test_insert_failure_is_retried_then_dead_lettered() {
        let fixture = fixture();
        fixture.store.fail_inserts(true);
        let body = json!({
            "user_token": "abc",
            "place_id": 7,
            "event_time": "2024-01-01T10:00:00Z",
            "purchase_time": "2024-01-01T09:00:00Z",
            "cost": 300
        });
        fixture.queue.send_json("purchases", &body).await.unwrap();

        let max = ConsumerConfig::default().max_read_count;
        for attempt in 1..=max {
            // visibility timeout of zero makes the message readable again at once
            let messages = fixture.queue.read_messages("purchases", 0, 1).await.unwrap();
            assert_eq!(messages[0].read_ct, attempt);
            let outcome = fixture
                .persister
                .process_message(&messages[0])
                .await
                .unwrap();
            if attempt < max {
                assert!(matches!(outcome, ProcessOutcome::Retrying { .. }));
            } else {
                assert!(matches!(outcome, ProcessOutcome::DeadLettered { .. }));
            }
        }

        assert!(fixture.queue.pending_bodies("purchases").is_empty());
        let stats = fixture.persister.stats();
        assert_eq!(stats.retried, u64::try_from(max - 1).unwrap());
        assert_eq!(stats.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_cancelled() {
        let fixture = fixture();
        for place_id in 1..=3 {
            fixture
                .queue
                .send_json(
                    "purchases",
                    &json!({
                        "kind": "purchase",
                        "user_token": "abc",
                        "place_id": place_id,
                        "event_time": "2024-01-01T10:00:00Z",
                        "purchase_time": "2024-01-01T09:00:00Z",
                        "cost": 100
                    }),
                )
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let persister = Arc::new(fixture.persister);
        let handle = {
            let persister = persister.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { persister.run(shutdown).await })
        };

        for _ in 0..100 {
            if fixture.store.purchases().len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let place_ids: Vec<i32> = fixture.store.purchases().iter().map(|p| p.place_id).collect();
        assert_eq!(place_ids, vec![1, 2, 3]);
        assert_eq!(persister.stats().persisted, 3);
    }

    #[tokio::test]
    async fn test_broker_read_failure_stops_the_loop() {
        let fixture = fixture();
        fixture.queue.fail_reads(true);

        let result = fixture.persister.run(CancellationToken::new()).await;

        assert!(result.is_err());
    }
}
