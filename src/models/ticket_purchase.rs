use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// A validated ticket purchase
/// Maps to `ticket_purchases` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PurchaseRecord {
    pub user_token: String,
    pub place_id: i32,
    pub event_time: DateTime<Utc>,
    pub purchase_time: DateTime<Utc>,
    pub cost: i32,
}

impl PurchaseRecord {
    /// Append one row; a single statement, no surrounding transaction
    pub async fn insert(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ticket_purchases (user_token, place_id, event_time, purchase_time, cost)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&self.user_token)
        .bind(self.place_id)
        .bind(self.event_time)
        .bind(self.purchase_time)
        .bind(self.cost)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// All purchases made with a user token, oldest first
    pub async fn list_by_user_token(
        pool: &PgPool,
        user_token: &str,
    ) -> Result<Vec<PurchaseRecord>, sqlx::Error> {
        sqlx::query_as::<_, PurchaseRecord>(
            r#"
            SELECT user_token, place_id, event_time, purchase_time, cost
            FROM ticket_purchases
            WHERE user_token = $1
            ORDER BY purchase_time
            "#,
        )
        .bind(user_token)
        .fetch_all(pool)
        .await
    }
}
