use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::notifications::{DirectoryError, PushError};

/// Crate-level error for everything a consumer loop can surface
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Token directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Push transport error: {0}")]
    Push(#[from] PushError),

    #[error("Startup error: {0}")]
    Startup(String),
}

impl PipelineError {
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
