#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, pgmq in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # KDT Pipeline
//!
//! Asynchronous event pipeline behind the places, charity and notification
//! services.
//!
//! ## Overview
//!
//! Producers publish tagged events onto durable PostgreSQL queues (pgmq). Two
//! consumers drain them:
//!
//! - the **event persister** classifies purchases and donations and appends
//!   each to its table, acknowledging only after the row is written
//! - the **notification dispatcher** looks up a user's device tokens and
//!   enqueues one delayed push-delivery job per token, which a **delivery
//!   worker** sends through Firebase Cloud Messaging once due
//!
//! Poison messages are moved to `<queue>_dlq`; downstream failures are left
//! for redelivery until the read budget runs out.
//!
//! ## Module Organization
//!
//! - [`config`] - YAML configuration with per-environment sections
//! - [`messaging`] - Queue client, wire envelope and dead letters
//! - [`events`] - Event publishing for producing services
//! - [`validation`] - Required-field checks
//! - [`models`] - Relational rows and the event store
//! - [`database`] - Connection pool and schema bootstrap
//! - [`persister`] - Events queue consumer
//! - [`notifications`] - Dispatcher, delivery worker, token directory, push transport
//! - [`shutdown`] - Signal handling for the binaries
//! - [`test_helpers`] - In-memory doubles for every external seam
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kdt_pipeline::config::ConfigManager;
//! use kdt_pipeline::events::EventPublisher;
//! use kdt_pipeline::messaging::{PgmqClient, PurchaseEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let client = Arc::new(PgmqClient::new(&manager.config().database.url).await?);
//! let publisher = EventPublisher::new(client, manager.config().queues.clone());
//!
//! publisher
//!     .publish_purchase(PurchaseEvent {
//!         user_token: "abc".to_string(),
//!         place_id: 7,
//!         event_time: Some(chrono::Utc::now()),
//!         purchase_time: Some(chrono::Utc::now()),
//!         cost: 300,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests run against the doubles in [`test_helpers`]. Tests that need
//! PostgreSQL or MongoDB read `TEST_DATABASE_URL` / `TEST_MONGODB_URI` and
//! return early when those are unset.

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod notifications;
pub mod persister;
pub mod shutdown;
pub mod test_helpers;
pub mod validation;

pub use config::{ConfigManager, PipelineConfig};
pub use error::{PipelineError, Result};
pub use events::EventPublisher;
pub use messaging::{EventEnvelope, PgmqClient, QueueClient};
pub use persister::EventPersister;
pub use notifications::{DeliveryWorker, NotificationDispatcher, NotificationService};
