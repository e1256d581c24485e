use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::push_transport::{PushMessage, PushTransport};
use crate::config::NotificationsConfig;
use crate::error::Result;
use crate::messaging::{PushDelivery, QueueClient, QueuedMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent and deleted
    Delivered,
    /// Send failed; the job was archived and will not be retried
    Failed { reason: String },
    /// Job body unreadable; archived without a send
    Discarded { reason: String },
}

#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

struct DeliveryContext {
    queue: Arc<dyn QueueClient>,
    transport: Arc<dyn PushTransport>,
    queue_name: String,
    stats: DeliveryStats,
}

impl DeliveryContext {
    async fn deliver(&self, message: &QueuedMessage) -> Result<DeliveryOutcome> {
        let job: PushDelivery = match serde_json::from_value(message.message.clone()) {
            Ok(job) => job,
            Err(e) => {
                let reason = format!("unreadable delivery job: {e}");
                warn!(msg_id = message.msg_id, reason = %reason, "Discarding delivery job");
                self.queue
                    .archive_message(&self.queue_name, message.msg_id)
                    .await?;
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                return Ok(DeliveryOutcome::Discarded { reason });
            }
        };

        let push = PushMessage {
            token: job.token,
            title: job.title,
            data: job.data,
        };

        match self.transport.send(&push).await {
            Ok(()) => {
                self.queue
                    .delete_message(&self.queue_name, message.msg_id)
                    .await?;
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    msg_id = message.msg_id,
                    request_id = %job.request_id,
                    user_id = %job.user_id,
                    "Push delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => {
                warn!(
                    msg_id = message.msg_id,
                    request_id = %job.request_id,
                    user_id = %job.user_id,
                    error = %e,
                    "Push delivery failed"
                );
                self.queue
                    .archive_message(&self.queue_name, message.msg_id)
                    .await?;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Ok(DeliveryOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Sends push-delivery jobs once they become visible
///
/// Every job gets its own task, so a slow or failing token never holds up
/// another.
pub struct DeliveryWorker {
    context: Arc<DeliveryContext>,
    config: NotificationsConfig,
    in_flight: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("queue_name", &self.context.queue_name)
            .field("config", &self.config)
            .field("stats", &self.context.stats.snapshot())
            .finish()
    }
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        transport: Arc<dyn PushTransport>,
        queue_name: impl Into<String>,
        config: NotificationsConfig,
    ) -> Self {
        Self {
            context: Arc::new(DeliveryContext {
                queue,
                transport,
                queue_name: queue_name.into(),
                stats: DeliveryStats::default(),
            }),
            config,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.context.stats.snapshot()
    }

    /// Poll until `shutdown` is cancelled, then wait for sends already started
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(queue_name = %self.context.queue_name, "Delivery worker started");

        loop {
            let spawned = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.poll_once() => polled?,
            };

            if spawned == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.delivery_poll_interval()) => {}
                }
            }
        }

        self.drain().await;
        info!(
            queue_name = %self.context.queue_name,
            stats = ?self.stats(),
            "Delivery worker stopped"
        );
        Ok(())
    }

    /// Read every visible job and start one send per job; returns how many started
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .context
            .queue
            .read_messages(
                &self.context.queue_name,
                self.config.delivery_visibility_timeout_seconds,
                self.config.delivery_batch_size,
            )
            .await?;

        let mut in_flight = self.in_flight.lock().await;
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "Delivery task ended abnormally");
            }
        }

        let spawned = messages.len();
        for message in messages {
            let context = self.context.clone();
            in_flight.spawn(async move {
                if let Err(e) = context.deliver(&message).await {
                    warn!(msg_id = message.msg_id, error = %e, "Delivery bookkeeping failed");
                }
            });
        }

        Ok(spawned)
    }

    /// Send one job inline and record the result on the queue
    pub async fn deliver(&self, message: &QueuedMessage) -> Result<DeliveryOutcome> {
        self.context.deliver(message).await
    }

    /// Wait for every spawned send to finish
    pub async fn drain(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Delivery task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{InMemoryQueue, RecordingPushTransport};
    use chrono::Utc;
    use uuid::Uuid;

    fn job(token: &str) -> serde_json::Value {
        serde_json::to_value(PushDelivery {
            request_id: Uuid::new_v4(),
            source_message: "notifications:1".to_string(),
            user_id: "u1".to_string(),
            token: token.to_string(),
            title: "H".to_string(),
            data: "C".to_string(),
            deliver_at: Utc::now().fixed_offset(),
        })
        .unwrap()
    }

    fn worker(queue: &Arc<InMemoryQueue>, transport: &Arc<RecordingPushTransport>) -> DeliveryWorker {
        DeliveryWorker::new(
            queue.clone(),
            transport.clone(),
            "push_deliveries",
            NotificationsConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_deletes_and_failure_archives() {
        let queue = Arc::new(InMemoryQueue::new());
        let transport = Arc::new(RecordingPushTransport::new());
        transport.fail_token("t2");
        queue.send_json("push_deliveries", &job("t1")).await.unwrap();
        queue.send_json("push_deliveries", &job("t2")).await.unwrap();
        let worker = worker(&queue, &transport);

        assert_eq!(worker.poll_once().await.unwrap(), 2);
        worker.drain().await;

        assert_eq!(transport.sent_tokens(), vec!["t1".to_string()]);
        assert!(queue.pending_bodies("push_deliveries").is_empty());
        let archived = queue.archived_bodies("push_deliveries");
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0]["token"], "t2");
        assert_eq!(
            worker.stats(),
            DeliveryStatsSnapshot {
                delivered: 1,
                failed: 1,
                discarded: 0
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_job_is_archived_without_send() {
        let queue = Arc::new(InMemoryQueue::new());
        let transport = Arc::new(RecordingPushTransport::new());
        queue
            .send_json("push_deliveries", &serde_json::json!({"token": 5}))
            .await
            .unwrap();
        let worker = worker(&queue, &transport);

        let messages = queue.read_messages("push_deliveries", 30, 1).await.unwrap();
        let outcome = worker.deliver(&messages[0]).await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Discarded { .. }));
        assert!(transport.sent_tokens().is_empty());
        assert_eq!(queue.archived_bodies("push_deliveries").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_is_not_sent_early() {
        let queue = Arc::new(InMemoryQueue::new());
        let transport = Arc::new(RecordingPushTransport::new());
        queue
            .send_json_delayed("push_deliveries", &job("t1"), 30)
            .await
            .unwrap();
        let worker = worker(&queue, &transport);

        assert_eq!(worker.poll_once().await.unwrap(), 0);
        tokio::time::advance(std::time::Duration::from_secs(29)).await;
        assert_eq!(worker.poll_once().await.unwrap(), 0);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        assert_eq!(worker.poll_once().await.unwrap(), 1);
        worker.drain().await;

        assert_eq!(transport.sent_tokens(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let queue = Arc::new(InMemoryQueue::new());
        let transport = Arc::new(RecordingPushTransport::new());
        let worker = worker(&queue, &transport);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        worker.run(shutdown).await.unwrap();
        assert_eq!(worker.stats().delivered, 0);
    }
}
