//! # Schema Bootstrap
//!
//! Idempotent creation of the event tables and every queue the pipeline uses.
//! Both binaries run it at startup, so it is guarded by an advisory lock to keep
//! concurrent starts from racing on `CREATE TABLE`.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::QueuesConfig;
use crate::error::Result;
use crate::logging::log_queue_operation;
use crate::messaging::QueueClient;

// "kdt_pipeline_schema" folded into an i64
const SCHEMA_LOCK_KEY: i64 = 0x6b64_745f_7363_6865;

const TABLE_STATEMENTS: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS ticket_purchases (
        id BIGSERIAL PRIMARY KEY,
        user_token TEXT NOT NULL,
        place_id INTEGER NOT NULL,
        event_time TIMESTAMPTZ NOT NULL,
        purchase_time TIMESTAMPTZ NOT NULL,
        cost INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS index_ticket_purchases_on_user_token ON ticket_purchases (user_token)",
    r#"
    CREATE TABLE IF NOT EXISTS donations (
        id BIGSERIAL PRIMARY KEY,
        user_token TEXT NOT NULL,
        collection_id INTEGER NOT NULL,
        donation_time TIMESTAMPTZ NOT NULL,
        amount INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS index_donations_on_collection_id ON donations (collection_id)",
];

pub struct Schema;

impl Schema {
    /// Create the event tables, then every configured queue and its dead-letter queue
    pub async fn bootstrap(
        pool: &PgPool,
        queue: &dyn QueueClient,
        queues: &QueuesConfig,
    ) -> Result<()> {
        Self::create_tables(pool).await?;

        for queue_name in queues.all_queue_names() {
            queue.create_queue(&queue_name).await?;
            log_queue_operation("create", &queue_name, None, "ok", None);
        }

        info!("Schema bootstrap complete");
        Ok(())
    }

    /// Create `ticket_purchases` and `donations` if they are missing
    pub async fn create_tables(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let mut result = Ok(());
        for statement in TABLE_STATEMENTS {
            if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
                result = Err(e);
                break;
            }
        }

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        debug!("Event tables present");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_database_url, InMemoryQueue};

    #[tokio::test]
    async fn test_bootstrap_against_database_when_available() {
        let Some(database_url) = test_database_url() else {
            return;
        };
        let pool = PgPool::connect(&database_url).await.unwrap();
        let queue = InMemoryQueue::new();
        let queues = QueuesConfig::default();

        Schema::bootstrap(&pool, &queue, &queues).await.unwrap();
        // second run is a no-op
        Schema::bootstrap(&pool, &queue, &queues).await.unwrap();

        for name in queues.all_queue_names() {
            assert!(queue.queue_exists(&name), "missing queue {name}");
        }
    }
}
