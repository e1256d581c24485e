//! # Event Persister Flow Tests
//!
//! Publisher to persister to store, over the in-memory queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kdt_pipeline::config::{ConsumerConfig, QueuesConfig};
use kdt_pipeline::events::EventPublisher;
use kdt_pipeline::messaging::{DonationEvent, PurchaseEvent, QueueClient};
use kdt_pipeline::persister::EventPersister;
use kdt_pipeline::test_helpers::{test_config, InMemoryEventStore, InMemoryQueue};

struct Pipeline {
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryEventStore>,
    publisher: EventPublisher,
    persister: Arc<EventPersister>,
}

fn pipeline() -> Pipeline {
    let config = test_config();
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryEventStore::new());
    let publisher = EventPublisher::new(queue.clone(), config.queues.clone());
    let persister = Arc::new(EventPersister::new(
        queue.clone(),
        store.clone(),
        &config.queues,
        config.consumer.clone(),
    ));
    Pipeline {
        queue,
        store,
        publisher,
        persister,
    }
}

/// Run the persister until `done` holds or a second passes
async fn run_until<F>(pipeline: &Pipeline, done: F)
where
    F: Fn() -> bool,
{
    let shutdown = CancellationToken::new();
    let handle = {
        let persister = pipeline.persister.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { persister.run(shutdown).await })
    };

    for _ in 0..200 {
        if done() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown.cancel();
    tokio_test::assert_ok!(handle.await.unwrap());
}

#[tokio::test]
async fn test_legacy_purchase_body_produces_exactly_one_row() {
    let pipeline = pipeline();
    pipeline
        .queue
        .send_json(
            "purchases",
            &json!({
                "user_token": "abc",
                "place_id": 7,
                "event_time": "2024-01-01T10:00:00Z",
                "purchase_time": "2024-01-01T09:00:00Z",
                "cost": 300
            }),
        )
        .await
        .unwrap();

    run_until(&pipeline, || pipeline.store.purchases().len() == 1).await;

    let purchases = pipeline.store.purchases();
    assert_eq!(purchases.len(), 1);
    let row = &purchases[0];
    assert_eq!(row.user_token, "abc");
    assert_eq!(row.place_id, 7);
    assert_eq!(row.cost, 300);
    assert_eq!(row.event_time, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    assert_eq!(row.purchase_time, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
    assert!(pipeline.store.donations().is_empty());
}

#[tokio::test]
async fn test_published_events_land_in_their_tables_in_order() {
    let pipeline = pipeline();
    let at = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();

    for (place_id, cost) in [(1, 100), (2, 200)] {
        pipeline
            .publisher
            .publish_purchase(PurchaseEvent {
                user_token: "abc".to_string(),
                place_id,
                event_time: Some(at),
                purchase_time: Some(at),
                cost,
            })
            .await
            .unwrap();
    }
    pipeline
        .publisher
        .publish_donation(DonationEvent {
            user_token: "abc".to_string(),
            collection_id: 9,
            donation_time: Some(at),
            amount: 500,
        })
        .await
        .unwrap();

    run_until(&pipeline, || {
        pipeline.store.purchases().len() == 2 && pipeline.store.donations().len() == 1
    })
    .await;

    let costs: Vec<i32> = pipeline.store.purchases().iter().map(|p| p.cost).collect();
    assert_eq!(costs, vec![100, 200]);
    assert_eq!(pipeline.store.donations()[0].amount, 500);
    assert_eq!(pipeline.persister.stats().persisted, 3);
    assert!(pipeline.queue.pending_bodies("purchases").is_empty());
}

#[tokio::test]
async fn test_invalid_and_unknown_messages_write_nothing() {
    let pipeline = pipeline();
    let bodies = [
        json!({"foo": "bar"}),
        json!({"user_token": "abc", "collection_id": 0, "donation_time": "2024-01-01T09:00:00Z", "amount": 10}),
        json!({"user_token": "abc", "collection_id": 3, "donation_time": "2024-01-01T09:00:00Z", "amount": 0}),
        json!({"kind": "refund", "user_token": "abc"}),
    ];
    for body in &bodies {
        pipeline.queue.send_json("purchases", body).await.unwrap();
    }

    run_until(&pipeline, || {
        pipeline.queue.pending_bodies("purchases_dlq").len() == bodies.len()
    })
    .await;

    assert!(pipeline.store.purchases().is_empty());
    assert!(pipeline.store.donations().is_empty());

    let dead = pipeline.queue.pending_bodies("purchases_dlq");
    assert_eq!(dead.len(), 4);
    assert_eq!(dead[0]["reason"], "unknown message type");
    assert_eq!(dead[0]["payload"], json!({"foo": "bar"}));
}

#[tokio::test]
async fn test_store_outage_keeps_message_until_it_recovers() {
    let pipeline = pipeline();
    pipeline.store.fail_inserts(true);
    pipeline
        .publisher
        .publish_donation(DonationEvent {
            user_token: "abc".to_string(),
            collection_id: 3,
            donation_time: Some(Utc::now()),
            amount: 50,
        })
        .await
        .unwrap();

    // first attempt fails and leaves the message for redelivery
    let first = pipeline.queue.read_messages("purchases", 0, 1).await.unwrap();
    pipeline.persister.process_message(&first[0]).await.unwrap();
    assert_eq!(pipeline.queue.pending_bodies("purchases").len(), 1);

    pipeline.store.fail_inserts(false);
    let second = pipeline.queue.read_messages("purchases", 0, 1).await.unwrap();
    assert_eq!(second[0].read_ct, 2);
    pipeline.persister.process_message(&second[0]).await.unwrap();

    assert_eq!(pipeline.store.donations().len(), 1);
    assert!(pipeline.queue.pending_bodies("purchases").is_empty());
    assert!(pipeline.queue.pending_bodies("purchases_dlq").is_empty());
}

#[tokio::test]
async fn test_custom_queue_names_are_honoured() {
    let queues = QueuesConfig {
        events: "ledger_events".to_string(),
        ..QueuesConfig::default()
    };
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryEventStore::new());
    let persister =
        EventPersister::new(queue.clone(), store.clone(), &queues, ConsumerConfig::default());

    queue
        .send_json("ledger_events", &json!({"foo": "bar"}))
        .await
        .unwrap();
    let messages = queue.read_messages("ledger_events", 30, 1).await.unwrap();
    persister.process_message(&messages[0]).await.unwrap();

    assert_eq!(queue.pending_bodies("ledger_events_dlq").len(), 1);
}
