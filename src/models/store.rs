//! # Event Store
//!
//! Write side of the persister. [`PgEventStore`] is the relational store;
//! tests swap in [`crate::test_helpers::InMemoryEventStore`].

use std::time::Instant;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{DonationRecord, PurchaseRecord};
use crate::constants::tables;
use crate::logging::log_database_operation;

fn elapsed_ms(started: Instant) -> Option<u64> {
    u64::try_from(started.elapsed().as_millis()).ok()
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), sqlx::Error>;

    async fn insert_donation(&self, record: &DonationRecord) -> Result<(), sqlx::Error>;
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), sqlx::Error> {
        let started = Instant::now();
        record.insert(&self.pool).await?;
        log_database_operation("insert", tables::TICKET_PURCHASES, "ok", elapsed_ms(started), None);
        Ok(())
    }

    async fn insert_donation(&self, record: &DonationRecord) -> Result<(), sqlx::Error> {
        let started = Instant::now();
        record.insert(&self.pool).await?;
        log_database_operation("insert", tables::DONATIONS, "ok", elapsed_ms(started), None);
        Ok(())
    }
}
