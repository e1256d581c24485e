use std::env;

use crate::config::PipelineConfig;

/// Postgres URL for database-backed tests; `None` means skip
pub fn test_database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok().filter(|url| !url.is_empty())
}

/// MongoDB URI for token-directory tests; `None` means skip
pub fn test_mongodb_uri() -> Option<String> {
    env::var("TEST_MONGODB_URI").ok().filter(|uri| !uri.is_empty())
}

/// Default configuration tuned for fast tests
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.consumer.poll_interval_ms = 5;
    config.consumer.visibility_timeout_seconds = 1;
    config.notifications.delivery_poll_interval_ms = 5;
    if let Some(url) = test_database_url() {
        config.database.url = url;
    }
    config
}
