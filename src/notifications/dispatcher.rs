use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::schedule::DeliverySchedule;
use super::token_directory::TokenDirectory;
use crate::config::{ConsumerConfig, QueuesConfig};
use crate::error::Result;
use crate::messaging::{dead_letter, NotificationRequest, PushDelivery, QueueClient, QueuedMessage};
use crate::validation::validate_message_size;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// One delayed delivery job enqueued per token
    Scheduled { jobs: usize, clamped: bool },
    /// User unknown or without tokens; request acknowledged, nothing sent
    NoTokens,
    DeadLettered { reason: String },
    /// Directory lookup failed; the request reappears after its visibility timeout
    Retrying { reason: String },
}

#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub received: AtomicU64,
    pub scheduled: AtomicU64,
    pub skipped: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub received: u64,
    /// Delivery jobs, not requests
    pub scheduled: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
    pub retried: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Turns notification requests into per-token delayed delivery jobs
///
/// The loop never waits for a delivery: each job sits invisible in the
/// push-delivery queue until its instant and is sent by a
/// [`DeliveryWorker`](super::DeliveryWorker).
pub struct NotificationDispatcher {
    queue: Arc<dyn QueueClient>,
    directory: Arc<dyn TokenDirectory>,
    schedule: DeliverySchedule,
    queue_name: String,
    dead_letter_queue: String,
    delivery_queue: String,
    consumer: ConsumerConfig,
    stats: DispatcherStats,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("queue_name", &self.queue_name)
            .field("delivery_queue", &self.delivery_queue)
            .field("schedule", &self.schedule)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        directory: Arc<dyn TokenDirectory>,
        schedule: DeliverySchedule,
        queues: &QueuesConfig,
        consumer: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            directory,
            schedule,
            queue_name: queues.notifications.clone(),
            dead_letter_queue: queues.dead_letter_queue(&queues.notifications),
            delivery_queue: queues.push_deliveries.clone(),
            consumer,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume until `shutdown` is cancelled; a broker read failure is fatal
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(queue_name = %self.queue_name, "Notification dispatcher started");

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
            "Notification dispatcher stopped"
        );
        Ok(())
    }

    pub async fn process_message(&self, message: &QueuedMessage) -> Result<DispatchOutcome> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if message.read_ct > self.consumer.max_read_count {
            let reason = format!("read {} times without success", message.read_ct);
            warn!(msg_id = message.msg_id, reason = %reason, "Giving up on notification request");
            return self.reject(message, reason).await;
        }

        if let Err(e) = validate_message_size(&message.message) {
            warn!(msg_id = message.msg_id, error = %e, "Oversized notification request");
            return self.reject(message, e.to_string()).await;
        }

        let request = match NotificationRequest::decode(&message.message) {
            Ok(request) => request,
            Err(e) => {
                warn!(msg_id = message.msg_id, error = %e, "Undecodable notification request");
                return self.reject(message, e.to_string()).await;
            }
        };

        let notification = match request.validate() {
            Ok(notification) => notification,
            Err(e) => {
                warn!(msg_id = message.msg_id, error = %e, "Invalid notification request");
                return self.reject(message, e.to_string()).await;
            }
        };

        let tokens = match self.directory.tokens_for_user(&notification.user_id).await {
            Ok(Some(tokens)) if !tokens.is_empty() => tokens,
            Ok(_) => {
                warn!(
                    msg_id = message.msg_id,
                    user_id = %notification.user_id,
                    "No device tokens registered; nothing to deliver"
                );
                self.queue
                    .delete_message(&self.queue_name, message.msg_id)
                    .await?;
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(DispatchOutcome::NoTokens);
            }
            Err(e) => {
                return self
                    .retry_or_dead_letter(message, format!("token lookup failed: {e}"))
                    .await;
            }
        };

        let delay = self
            .schedule
            .delay_for(notification.scheduled_time, Utc::now());
        if notification.scheduled_time.is_none() {
            info!(msg_id = message.msg_id, "No notification time given; delivering immediately");
        } else if delay.clamped {
            warn!(
                msg_id = message.msg_id,
                deliver_at = %delay.deliver_at,
                "Notification time already passed; delivering immediately"
            );
        }

        // A redelivered request may already have part of its fan-out queued
        let source_message = format!("{}:{}", self.queue_name, message.msg_id);
        if message.read_ct > 1 {
            let replaced = self
                .queue
                .delete_matching(&self.delivery_queue, "source_message", &source_message)
                .await?;
            if replaced > 0 {
                debug!(
                    msg_id = message.msg_id,
                    replaced = replaced,
                    "Replacing jobs from an earlier partial fan-out"
                );
            }
        }

        let request_id = Uuid::new_v4();
        for token in &tokens.tokens {
            let job = PushDelivery {
                request_id,
                source_message: source_message.clone(),
                user_id: notification.user_id.clone(),
                token: token.clone(),
                title: notification.header.clone(),
                data: notification.content.clone(),
                deliver_at: delay.deliver_at,
            };
            self.queue
                .send_json_delayed(
                    &self.delivery_queue,
                    &serde_json::to_value(&job).map_err(crate::messaging::MessagingError::from)?,
                    delay.delay_seconds(),
                )
                .await?;
        }

        self.queue
            .delete_message(&self.queue_name, message.msg_id)
            .await?;

        let jobs = tokens.len();
        self.stats
            .scheduled
            .fetch_add(jobs as u64, Ordering::Relaxed);
        debug!(
            msg_id = message.msg_id,
            request_id = %request_id,
            user_id = %notification.user_id,
            jobs = jobs,
            delay_seconds = delay.delay_seconds(),
            "Notification scheduled"
        );

        Ok(DispatchOutcome::Scheduled {
            jobs,
            clamped: delay.clamped,
        })
    }

    async fn reject(&self, message: &QueuedMessage, reason: String) -> Result<DispatchOutcome> {
        dead_letter(
            self.queue.as_ref(),
            &self.queue_name,
            &self.dead_letter_queue,
            message,
            &reason,
        )
        .await?;
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(DispatchOutcome::DeadLettered { reason })
    }

    async fn retry_or_dead_letter(
        &self,
        message: &QueuedMessage,
        reason: String,
    ) -> Result<DispatchOutcome> {
        if message.read_ct >= self.consumer.max_read_count {
            warn!(
                msg_id = message.msg_id,
                read_ct = message.read_ct,
                reason = %reason,
                "Notification not scheduled; retries exhausted"
            );
            return self.reject(message, reason).await;
        }

        warn!(
            msg_id = message.msg_id,
            read_ct = message.read_ct,
            reason = %reason,
            "Notification not scheduled; leaving it for redelivery"
        );
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        Ok(DispatchOutcome::Retrying { reason })
    }
}
