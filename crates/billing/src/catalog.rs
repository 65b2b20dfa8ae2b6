//! Plan catalog
//!
//! Read-only lookup of subscription plans. Plans are seeded rows in the
//! internal store; the CRM sync derives a plan from a deal's price, the
//! webhook path derives one from the provider price id.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A subscription plan as stored internally.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub stripe_price_id: String,
    /// Monthly price in minor currency units (cents).
    pub price_cents: i64,
    pub trial_days: i32,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            "SELECT id, name, stripe_price_id, price_cents, trial_days, active, created_at
             FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", id)))
    }

    /// Look up the active plan sold at a given monthly price.
    ///
    /// Returns `Ok(None)` for prices no plan is sold at; deriving a plan from
    /// a CRM deal value is expected to fail for hand-typed amounts.
    pub async fn by_price_cents(&self, price_cents: i64) -> BillingResult<Option<Plan>> {
        let plan: Option<Plan> = sqlx::query_as(
            "SELECT id, name, stripe_price_id, price_cents, trial_days, active, created_at
             FROM plans WHERE price_cents = $1 AND active = true
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(price_cents)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }

    pub async fn by_stripe_price_id(&self, price_id: &str) -> BillingResult<Option<Plan>> {
        let plan: Option<Plan> = sqlx::query_as(
            "SELECT id, name, stripe_price_id, price_cents, trial_days, active, created_at
             FROM plans WHERE stripe_price_id = $1 LIMIT 1",
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }
}
