//! # Messaging Module
//!
//! PostgreSQL message queue (pgmq) based messaging: the durable queue client,
//! the wire envelope, and dead-letter handling.

pub mod client;
pub mod errors;
pub mod message;
pub mod pgmq_client;

pub use client::{
    dead_letter, dead_letter_queue_name, validate_queue_name, QueueClient, QueuedMessage,
};
pub use errors::{DecodeError, MessagingError, MessagingResult};
pub use message::{
    parse_civil_time, DeadLetter, DonationEvent, EventEnvelope, NotificationRequest,
    PurchaseEvent, PushDelivery,
};
pub use pgmq_client::PgmqClient;
