//! # Messaging Error Types
//!
//! Structured errors for queue operations and for classifying inbound
//! message bodies.

use thiserror::Error;

/// Queue transport and serialization errors
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Database pool unavailable: {message}")]
    PoolUnavailable { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Invalid queue name: {queue_name}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("Message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl MessagingError {
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::PoolUnavailable { message },
            sqlx::Error::Database(_) | sqlx::Error::RowNotFound => Self::Database { message },
            _ => Self::DatabaseConnection { message },
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Why an inbound body could not be turned into a known event
///
/// Every variant is a poison message: redelivery cannot fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown message type")]
    UnknownType,

    #[error("unknown message kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("ambiguous message: carries both '{first}' and '{second}'")]
    Ambiguous { first: String, second: String },

    #[error("unexpected message kind '{kind}' on this queue")]
    UnexpectedKind { kind: String },

    #[error("malformed message body: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// True for the "neither schema matched" family of failures
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType | Self::UnknownKind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_errors_are_classified() {
        let err: MessagingError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, MessagingError::PoolUnavailable { .. }));

        let err: MessagingError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, MessagingError::PoolUnavailable { .. }));

        let err: MessagingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, MessagingError::Database { .. }));
    }

    #[test]
    fn test_queue_operation_display_names_the_queue() {
        let err = MessagingError::queue_operation("notifications", "read", "Read failed");
        let display = err.to_string();
        assert!(display.contains("Queue operation failed"));
        assert!(display.contains("notifications"));
        assert!(display.contains("Read failed"));

        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        assert!(matches!(MessagingError::from(json_err), MessagingError::Encoding(_)));
    }

    #[test]
    fn test_decode_error_unknown_family() {
        assert!(DecodeError::UnknownType.is_unknown_type());
        assert!(DecodeError::UnknownKind {
            kind: "refund".to_string()
        }
        .is_unknown_type());
        assert!(!DecodeError::malformed("bad").is_unknown_type());
        assert_eq!(DecodeError::UnknownType.to_string(), "unknown message type");
    }
}
