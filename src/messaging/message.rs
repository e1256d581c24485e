//! # Queue Message Structures
//!
//! Wire formats for every durable queue in the pipeline. Producers publish an
//! [`EventEnvelope`]: the payload fields flattened next to a `kind` tag.
//! Bodies without a tag are still accepted and classified by the presence of
//! `place_id` / `collection_id`, so older producers keep working.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DecodeError;
use crate::constants::{discriminator_keys, kinds};

/// Ticket purchase published by the places service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseEvent {
    #[serde(alias = "user")]
    pub user_token: String,
    pub place_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_time: Option<DateTime<Utc>>,
    pub cost: i32,
}

/// Charitable donation published by the charity service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonationEvent {
    #[serde(alias = "user")]
    pub user_token: String,
    pub collection_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donation_time: Option<DateTime<Utc>>,
    pub amount: i32,
}

/// Request to push a notification to every device of a user
///
/// `scheduled_time` keeps the civil components exactly as the producer wrote
/// them. A timestamp without an offset is read as if it carried `+00:00`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationRequest {
    pub user_id: String,
    pub header: String,
    pub content: String,
    #[serde(
        rename = "time",
        deserialize_with = "deserialize_civil_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_time: Option<DateTime<FixedOffset>>,
}

impl NotificationRequest {
    /// Reminder the places service sends ahead of a purchased slot
    pub fn purchase_reminder(
        user_id: impl Into<String>,
        place_name: &str,
        event_time: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            header: crate::constants::PURCHASE_REMINDER_HEADER.to_string(),
            content: format!(
                "Вы приобрели билет на {} в {}",
                place_name,
                event_time.format("%H:%M")
            ),
            scheduled_time: Some(
                event_time
                    - chrono::Duration::minutes(crate::constants::PURCHASE_REMINDER_LEAD_MINUTES),
            ),
        }
    }

    /// Decode a body taken from the notifications queue
    ///
    /// Tagged bodies must carry the `notification` kind; untagged bodies are
    /// read as a notification request directly.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::malformed("message body is not a JSON object"))?;

        if let Some(kind) = object.get(discriminator_keys::KIND) {
            let kind = kind
                .as_str()
                .ok_or_else(|| DecodeError::malformed("'kind' must be a string"))?;
            return match EventEnvelope::decode(value)? {
                EventEnvelope::Notification(request) => Ok(request),
                _ => Err(DecodeError::UnexpectedKind {
                    kind: kind.to_string(),
                }),
            };
        }

        serde_json::from_value(value.clone()).map_err(|e| DecodeError::malformed(e.to_string()))
    }
}

fn deserialize_civil_time<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(text) => parse_civil_time(&text).map(Some).map_err(D::Error::custom),
    }
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` one
pub fn parse_civil_time(text: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Ok(with_offset);
    }

    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| format!("invalid timestamp '{text}': {e}"))?;

    Ok(naive.and_utc().fixed_offset())
}

/// Tagged union of every event a producer can publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventEnvelope {
    Purchase(PurchaseEvent),
    Donation(DonationEvent),
    Notification(NotificationRequest),
}

impl EventEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Purchase(_) => kinds::PURCHASE,
            Self::Donation(_) => kinds::DONATION,
            Self::Notification(_) => kinds::NOTIFICATION,
        }
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Serialize to the bytes a producer hands to the broker
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode raw message bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(e.to_string()))?;
        Self::decode(&value)
    }

    /// Classify and decode a message body
    ///
    /// A `kind` tag always wins. Without one, exactly one of `place_id` and
    /// `collection_id` must be present.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::malformed("message body is not a JSON object"))?;

        if let Some(kind) = object.get(discriminator_keys::KIND) {
            let kind = kind
                .as_str()
                .ok_or_else(|| DecodeError::malformed("'kind' must be a string"))?;
            return match kind {
                kinds::PURCHASE | kinds::DONATION | kinds::NOTIFICATION => {
                    serde_json::from_value(value.clone())
                        .map_err(|e| DecodeError::malformed(e.to_string()))
                }
                other => Err(DecodeError::UnknownKind {
                    kind: other.to_string(),
                }),
            };
        }

        let looks_like_purchase = object.contains_key(discriminator_keys::PURCHASE);
        let looks_like_donation = object.contains_key(discriminator_keys::DONATION);

        match (looks_like_purchase, looks_like_donation) {
            (true, true) => Err(DecodeError::Ambiguous {
                first: discriminator_keys::PURCHASE.to_string(),
                second: discriminator_keys::DONATION.to_string(),
            }),
            (true, false) => serde_json::from_value(value.clone())
                .map(Self::Purchase)
                .map_err(|e| DecodeError::malformed(e.to_string())),
            (false, true) => serde_json::from_value(value.clone())
                .map(Self::Donation)
                .map_err(|e| DecodeError::malformed(e.to_string())),
            (false, false) => Err(DecodeError::UnknownType),
        }
    }
}

impl From<PurchaseEvent> for EventEnvelope {
    fn from(event: PurchaseEvent) -> Self {
        Self::Purchase(event)
    }
}

impl From<DonationEvent> for EventEnvelope {
    fn from(event: DonationEvent) -> Self {
        Self::Donation(event)
    }
}

impl From<NotificationRequest> for EventEnvelope {
    fn from(request: NotificationRequest) -> Self {
        Self::Notification(request)
    }
}

/// One scheduled push to one device token
///
/// Sits invisible in the push-delivery queue until `deliver_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDelivery {
    pub request_id: Uuid,
    /// `<queue>:<msg_id>` of the notification request that produced this job
    #[serde(default)]
    pub source_message: String,
    pub user_id: String,
    pub token: String,
    pub title: String,
    pub data: String,
    pub deliver_at: DateTime<FixedOffset>,
}

/// A poison message parked on a dead-letter queue for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub source_queue: String,
    pub message_id: i64,
    pub read_count: i32,
    pub reason: String,
    pub payload: Value,
    pub failed_at: DateTime<Utc>,
}
