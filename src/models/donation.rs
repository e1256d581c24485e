use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// A validated donation to a charity collection
/// Maps to `donations` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DonationRecord {
    pub user_token: String,
    pub collection_id: i32,
    pub donation_time: DateTime<Utc>,
    pub amount: i32,
}

impl DonationRecord {
    pub async fn insert(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO donations (user_token, collection_id, donation_time, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&self.user_token)
        .bind(self.collection_id)
        .bind(self.donation_time)
        .bind(self.amount)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list_by_user_token(
        pool: &PgPool,
        user_token: &str,
    ) -> Result<Vec<DonationRecord>, sqlx::Error> {
        sqlx::query_as::<_, DonationRecord>(
            r#"
            SELECT user_token, collection_id, donation_time, amount
            FROM donations
            WHERE user_token = $1
            ORDER BY donation_time
            "#,
        )
        .bind(user_token)
        .fetch_all(pool)
        .await
    }

    /// Sum of all donations to a collection
    pub async fn total_for_collection(pool: &PgPool, collection_id: i32) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM donations WHERE collection_id = $1",
        )
        .bind(collection_id)
        .fetch_one(pool)
        .await
    }
}
