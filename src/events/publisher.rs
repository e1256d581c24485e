use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::config::QueuesConfig;
use crate::messaging::{
    DonationEvent, EventEnvelope, MessagingResult, NotificationRequest, PurchaseEvent,
    QueueClient,
};

/// Publishes tagged events onto the durable queues
///
/// Purchases and donations share the events queue; notification requests go
/// to their own queue. A queue is created the first time it is published to.
#[derive(Clone)]
pub struct EventPublisher {
    queue: Arc<dyn QueueClient>,
    queues: QueuesConfig,
    created_queues: Arc<RwLock<HashSet<String>>>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("queues", &self.queues)
            .finish()
    }
}

impl EventPublisher {
    pub fn new(queue: Arc<dyn QueueClient>, queues: QueuesConfig) -> Self {
        Self {
            queue,
            queues,
            created_queues: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Serialize `event` and send it to `queue_name`, returning the message id
    pub async fn publish(&self, queue_name: &str, event: &EventEnvelope) -> MessagingResult<i64> {
        self.ensure_queue(queue_name).await?;

        let message_id = self.queue.send_json(queue_name, &event.to_json()?).await?;

        debug!(
            queue_name = %queue_name,
            kind = event.kind(),
            msg_id = message_id,
            "Published event"
        );
        Ok(message_id)
    }

    pub async fn publish_purchase(&self, event: PurchaseEvent) -> MessagingResult<i64> {
        let queue_name = self.queues.events.clone();
        self.publish(&queue_name, &event.into()).await
    }

    pub async fn publish_donation(&self, event: DonationEvent) -> MessagingResult<i64> {
        let queue_name = self.queues.events.clone();
        self.publish(&queue_name, &event.into()).await
    }

    pub async fn publish_notification(&self, request: NotificationRequest) -> MessagingResult<i64> {
        let queue_name = self.queues.notifications.clone();
        self.publish(&queue_name, &request.into()).await
    }

    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        if self.created_queues.read().await.contains(queue_name) {
            return Ok(());
        }

        let mut created = self.created_queues.write().await;
        if !created.contains(queue_name) {
            self.queue.create_queue(queue_name).await?;
            created.insert(queue_name.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::InMemoryQueue;
    use chrono::{TimeZone, Utc};

    fn publisher() -> (Arc<InMemoryQueue>, EventPublisher) {
        let queue = Arc::new(InMemoryQueue::new());
        let publisher = EventPublisher::new(queue.clone(), QueuesConfig::default());
        (queue, publisher)
    }

    #[tokio::test]
    async fn test_purchases_and_donations_share_the_events_queue() {
        let (queue, publisher) = publisher();

        publisher
            .publish_purchase(PurchaseEvent {
                user_token: "abc".to_string(),
                place_id: 7,
                event_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
                purchase_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
                cost: 300,
            })
            .await
            .unwrap();
        publisher
            .publish_donation(DonationEvent {
                user_token: "abc".to_string(),
                collection_id: 3,
                donation_time: Some(Utc::now()),
                amount: 50,
            })
            .await
            .unwrap();

        let bodies = queue.pending_bodies("purchases");
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["kind"], "purchase");
        assert_eq!(bodies[0]["cost"], 300);
        assert_eq!(bodies[1]["kind"], "donation");
    }

    #[tokio::test]
    async fn test_notifications_use_their_own_queue() {
        let (queue, publisher) = publisher();

        publisher
            .publish_notification(NotificationRequest {
                user_id: "u1".to_string(),
                header: "H".to_string(),
                content: "C".to_string(),
                scheduled_time: None,
            })
            .await
            .unwrap();

        assert!(queue.queue_exists("notifications"));
        assert!(queue.pending_bodies("purchases").is_empty());

        let bodies = queue.pending_bodies("notifications");
        let decoded = EventEnvelope::decode(&bodies[0]).unwrap();
        assert_eq!(decoded.kind(), "notification");
    }

    #[tokio::test]
    async fn test_invalid_queue_name_is_rejected() {
        let (_queue, publisher) = publisher();
        let event = EventEnvelope::Purchase(PurchaseEvent::default());

        assert!(publisher.publish("Not A Queue", &event).await.is_err());
    }
}
