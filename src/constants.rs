//! # Pipeline Constants
//!
//! Names and fixed values shared by the publishers, the persister and the
//! notification dispatcher.

/// Wire-level discriminator values carried in the `kind` field of every envelope
pub mod kinds {
    pub const PURCHASE: &str = "purchase";
    pub const DONATION: &str = "donation";
    pub const NOTIFICATION: &str = "notification";
}

/// Keys used to classify untagged legacy messages
pub mod discriminator_keys {
    pub const KIND: &str = "kind";
    pub const PURCHASE: &str = "place_id";
    pub const DONATION: &str = "collection_id";
}

/// Relational tables written by the persister
pub mod tables {
    pub const TICKET_PURCHASES: &str = "ticket_purchases";
    pub const DONATIONS: &str = "donations";
}

/// Default durable queue names
pub mod queues {
    pub const EVENTS: &str = "purchases";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const PUSH_DELIVERIES: &str = "push_deliveries";
    pub const DEAD_LETTER_SUFFIX: &str = "_dlq";
}

/// Fixed civil zone producers mean when they send a notification time (UTC+3)
pub const DEFAULT_TARGET_UTC_OFFSET_SECONDS: i32 = 3 * 60 * 60;

/// Purchase reminders are scheduled this many minutes before the event slot
pub const PURCHASE_REMINDER_LEAD_MINUTES: i64 = 15;

pub const PURCHASE_REMINDER_HEADER: &str = "Напоминание о покупке!";

/// Longest queue name pgmq accepts once its table prefixes are added
pub const MAX_QUEUE_NAME_LENGTH: usize = 47;
