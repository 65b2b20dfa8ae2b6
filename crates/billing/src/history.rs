//! Subscription history audit trail
//!
//! Every externally-driven subscription state change appends a row here. The
//! trail is append-only and carries the raw provider status, so the collapsed
//! `failed` marker in the main table never loses information.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct SubscriptionHistoryRecord {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub restaurant_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub status: String,
    pub provider_status: String,
    pub change_source: String,
    pub created_at: OffsetDateTime,
}

pub struct SubscriptionHistoryService {
    pool: PgPool,
}

impl SubscriptionHistoryService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a history row. Best-effort: a failed audit write is logged but
    /// never unwinds the event handling that triggered it.
    pub async fn append(
        &self,
        stripe_subscription_id: &str,
        restaurant_id: Option<Uuid>,
        profile_id: Option<Uuid>,
        status: &str,
        provider_status: &str,
        change_source: &str,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO subscription_history (
                id, stripe_subscription_id, restaurant_id, profile_id,
                status, provider_status, change_source, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stripe_subscription_id)
        .bind(restaurant_id)
        .bind(profile_id)
        .bind(status)
        .bind(provider_status)
        .bind(change_source)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                subscription_id = %stripe_subscription_id,
                error = %e,
                "Failed to append subscription history"
            );
        }
    }

    pub async fn for_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Vec<SubscriptionHistoryRecord>> {
        let rows: Vec<SubscriptionHistoryRecord> = sqlx::query_as(
            r#"
            SELECT id, stripe_subscription_id, restaurant_id, profile_id,
                   status, provider_status, change_source, created_at
            FROM subscription_history
            WHERE stripe_subscription_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
