//! Required-field validation for queue events
//!
//! A message that decodes but carries an empty string, a zero or negative
//! integer, or a missing event timestamp is rejected here before anything is
//! written or scheduled. A notification without a time is valid and due now.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use thiserror::Error;

use crate::messaging::{DonationEvent, NotificationRequest, PurchaseEvent};
use crate::models::{DonationRecord, PurchaseRecord};

/// Maximum allowed size for a serialized message body (256KB)
const MAX_MESSAGE_SIZE_BYTES: usize = 256 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field '{field}' is empty")]
    Empty { field: &'static str },

    #[error("required field '{field}' must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("required timestamp '{field}' is missing")]
    MissingTimestamp { field: &'static str },

    #[error("message body too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

fn require_non_empty(field: &'static str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn require_positive(field: &'static str, value: i32) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::NotPositive {
            field,
            value: i64::from(value),
        });
    }
    Ok(())
}

fn require_timestamp<T>(field: &'static str, value: Option<T>) -> ValidationResult<T> {
    value.ok_or(ValidationError::MissingTimestamp { field })
}

/// Reject bodies that would bloat the dead-letter queue or the tables
pub fn validate_message_size(value: &Value) -> ValidationResult<()> {
    let size = value.to_string().len();
    if size > MAX_MESSAGE_SIZE_BYTES {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE_BYTES,
        });
    }
    Ok(())
}

impl PurchaseEvent {
    pub fn validate(&self) -> ValidationResult<PurchaseRecord> {
        require_non_empty("user_token", &self.user_token)?;
        require_positive("place_id", self.place_id)?;
        let event_time = require_timestamp("event_time", self.event_time)?;
        let purchase_time = require_timestamp("purchase_time", self.purchase_time)?;
        require_positive("cost", self.cost)?;

        Ok(PurchaseRecord {
            user_token: self.user_token.clone(),
            place_id: self.place_id,
            event_time,
            purchase_time,
            cost: self.cost,
        })
    }
}

impl DonationEvent {
    pub fn validate(&self) -> ValidationResult<DonationRecord> {
        require_non_empty("user_token", &self.user_token)?;
        require_positive("collection_id", self.collection_id)?;
        let donation_time = require_timestamp("donation_time", self.donation_time)?;
        require_positive("amount", self.amount)?;

        Ok(DonationRecord {
            user_token: self.user_token.clone(),
            collection_id: self.collection_id,
            donation_time,
            amount: self.amount,
        })
    }
}

/// A notification request with every required field present
#[derive(Debug, Clone, PartialEq)]
pub struct ValidNotification {
    pub user_id: String,
    pub header: String,
    pub content: String,
    /// `None` when the producer sent no time; such a request is already due
    pub scheduled_time: Option<DateTime<FixedOffset>>,
}

impl NotificationRequest {
    pub fn validate(&self) -> ValidationResult<ValidNotification> {
        require_non_empty("header", &self.header)?;
        require_non_empty("content", &self.content)?;
        require_non_empty("user_id", &self.user_id)?;

        Ok(ValidNotification {
            user_id: self.user_id.clone(),
            header: self.header.clone(),
            content: self.content.clone(),
            scheduled_time: self.scheduled_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn purchase() -> PurchaseEvent {
        PurchaseEvent {
            user_token: "abc".to_string(),
            place_id: 7,
            event_time: Some("2024-01-01T10:00:00Z".parse().unwrap()),
            purchase_time: Some("2024-01-01T09:00:00Z".parse().unwrap()),
            cost: 300,
        }
    }

    #[test]
    fn test_valid_purchase_produces_record() {
        let record = purchase().validate().expect("valid purchase");
        assert_eq!(record.place_id, 7);
        assert_eq!(record.cost, 300);
        assert_eq!(record.user_token, "abc");
    }

    #[test]
    fn test_purchase_rejects_each_missing_field() {
        let mut event = purchase();
        event.user_token = "  ".to_string();
        assert_eq!(
            event.validate(),
            Err(ValidationError::Empty { field: "user_token" })
        );

        let mut event = purchase();
        event.place_id = 0;
        assert!(matches!(
            event.validate(),
            Err(ValidationError::NotPositive { field: "place_id", .. })
        ));

        let mut event = purchase();
        event.event_time = None;
        assert_eq!(
            event.validate(),
            Err(ValidationError::MissingTimestamp { field: "event_time" })
        );

        let mut event = purchase();
        event.purchase_time = None;
        assert!(event.validate().is_err());

        let mut event = purchase();
        event.cost = -5;
        assert!(matches!(
            event.validate(),
            Err(ValidationError::NotPositive { field: "cost", value: -5 })
        ));
    }

    #[test]
    fn test_donation_rejects_zero_amount_and_collection() {
        let donation = DonationEvent {
            user_token: "abc".to_string(),
            collection_id: 3,
            donation_time: Some(Utc::now()),
            amount: 0,
        };
        assert!(matches!(
            donation.validate(),
            Err(ValidationError::NotPositive { field: "amount", .. })
        ));

        let donation = DonationEvent {
            collection_id: 0,
            amount: 10,
            ..donation
        };
        assert!(matches!(
            donation.validate(),
            Err(ValidationError::NotPositive {
                field: "collection_id",
                ..
            })
        ));
    }

    #[test]
    fn test_notification_requires_header_content_and_user() {
        let request = NotificationRequest {
            user_id: "u1".to_string(),
            header: String::new(),
            content: "C".to_string(),
            scheduled_time: Some("2099-01-01T00:00:00+03:00".parse().unwrap()),
        };
        assert_eq!(
            request.validate(),
            Err(ValidationError::Empty { field: "header" })
        );

        let request = NotificationRequest {
            header: "H".to_string(),
            ..request
        };
        let valid = request.validate().expect("valid notification");
        assert_eq!(valid.user_id, "u1");
    }

    #[test]
    fn test_notification_without_time_is_valid() {
        let request = NotificationRequest {
            user_id: "u1".to_string(),
            header: "H".to_string(),
            content: "C".to_string(),
            scheduled_time: None,
        };

        let valid = request.validate().expect("time is optional");
        assert_eq!(valid.scheduled_time, None);
    }

    #[test]
    fn test_message_size_limit() {
        assert!(validate_message_size(&json!({"foo": "bar"})).is_ok());
        let huge = json!({"content": "x".repeat(MAX_MESSAGE_SIZE_BYTES)});
        assert!(matches!(
            validate_message_size(&huge),
            Err(ValidationError::TooLarge { .. })
        ));
    }
}
