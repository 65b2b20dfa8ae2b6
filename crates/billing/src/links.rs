//! Checkout link registry
//!
//! Checkout links are an indirection layer: the CRM and the browser only ever
//! hold `{base}/subscription/{id}`, never a raw provider checkout URL. The
//! provider session behind a link can die (24h expiry, abandoned checkout);
//! resolution lazily regenerates it in place, reusing the same row so that a
//! stale link forwarded around does not mint new rows on every visit.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::checkout::{CheckoutService, CheckoutSessionRequest};
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Lifetime of a freshly issued or regenerated link.
pub const LINK_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct CheckoutLinkRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub stripe_customer_id: String,
    pub checkout_url: String,
    pub expires_at: OffsetDateTime,
    pub status: String,
    pub trial_days: Option<i32>,
    pub trial_enabled: bool,
    pub created_at: OffsetDateTime,
}

/// Outcome of resolving a link for redirect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolvedLink {
    pub link: CheckoutLinkRecord,
    pub is_valid: bool,
    pub is_expired: bool,
    /// Fresh provider URL when the stored one was expired and regenerated.
    pub new_checkout_url: Option<String>,
}

impl ResolvedLink {
    /// The URL the browser should actually be sent to.
    pub fn redirect_url(&self) -> Option<&str> {
        if !self.is_valid {
            return None;
        }
        Some(
            self.new_checkout_url
                .as_deref()
                .unwrap_or(&self.link.checkout_url),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CreateCheckoutLink {
    pub user_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub stripe_customer_id: String,
    pub checkout_url: String,
    pub trial_days: Option<i32>,
    pub trial_enabled: bool,
}

/// Pure expiry predicate: expired by time or by explicit provider signal.
pub fn link_is_expired(status: &str, expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    status == "expired" || now > expires_at
}

pub fn next_expiry(now: OffsetDateTime) -> OffsetDateTime {
    now + Duration::hours(LINK_TTL_HOURS)
}

pub struct CheckoutLinkService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutLinkService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Internal redirect URL for a link.
    pub fn redirect_url(&self, link_id: Uuid) -> String {
        format!(
            "{}/subscription/{}",
            self.stripe.config().public_base_url.trim_end_matches('/'),
            link_id
        )
    }

    pub async fn create(&self, input: CreateCheckoutLink) -> BillingResult<CheckoutLinkRecord> {
        let link: CheckoutLinkRecord = sqlx::query_as(
            r#"
            INSERT INTO checkout_links (
                id, user_id, restaurant_id, plan_id, stripe_customer_id,
                checkout_url, expires_at, status, trial_days, trial_enabled,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9, NOW(), NOW())
            RETURNING id, user_id, restaurant_id, plan_id, stripe_customer_id,
                      checkout_url, expires_at, status, trial_days, trial_enabled, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.restaurant_id)
        .bind(input.plan_id)
        .bind(&input.stripe_customer_id)
        .bind(&input.checkout_url)
        .bind(next_expiry(OffsetDateTime::now_utc()))
        .bind(input.trial_days)
        .bind(input.trial_enabled)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            link_id = %link.id,
            user_id = %link.user_id,
            plan_id = %link.plan_id,
            "Created checkout link"
        );

        Ok(link)
    }

    /// Resolve a link for redirect.
    ///
    /// Used links are invalid and stay dead. Expired links are regenerated in
    /// place from their captured customer/plan snapshot: same row, fresh
    /// provider URL, status reset to active.
    pub async fn resolve(&self, link_id: Uuid) -> BillingResult<ResolvedLink> {
        let link: Option<CheckoutLinkRecord> = sqlx::query_as(
            r#"
            SELECT id, user_id, restaurant_id, plan_id, stripe_customer_id,
                   checkout_url, expires_at, status, trial_days, trial_enabled, created_at
            FROM checkout_links WHERE id = $1
            "#,
        )
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await?;

        let link =
            link.ok_or_else(|| BillingError::NotFound(format!("checkout link {}", link_id)))?;

        if link.status == "used" {
            return Ok(ResolvedLink {
                link,
                is_valid: false,
                is_expired: false,
                new_checkout_url: None,
            });
        }

        let now = OffsetDateTime::now_utc();
        if !link_is_expired(&link.status, link.expires_at, now) {
            return Ok(ResolvedLink {
                link,
                is_valid: true,
                is_expired: false,
                new_checkout_url: None,
            });
        }

        let fresh_url = self.regenerate(&link).await?;

        Ok(ResolvedLink {
            link,
            is_valid: true,
            is_expired: true,
            new_checkout_url: Some(fresh_url),
        })
    }

    /// Create a fresh provider session from the link's snapshot and rewrite
    /// the row in place.
    async fn regenerate(&self, link: &CheckoutLinkRecord) -> BillingResult<String> {
        let catalog = PlanCatalog::new(self.pool.clone());
        let plan = catalog.by_id(link.plan_id).await?;

        let checkout = CheckoutService::new(self.stripe.clone());
        let trial_days = if link.trial_enabled {
            link.trial_days
                .map(|d| d as u32)
                .or(Some(self.stripe.config().default_trial_days))
        } else {
            None
        };

        let session = checkout
            .create_session(&CheckoutSessionRequest {
                customer_id: link.stripe_customer_id.clone(),
                price_id: plan.stripe_price_id.clone(),
                trial_days,
                coupon: None,
                user_id: link.user_id,
                restaurant_id: link.restaurant_id,
                plan_id: link.plan_id,
            })
            .await?;

        sqlx::query(
            r#"
            UPDATE checkout_links
            SET checkout_url = $1, expires_at = $2, status = 'active', updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(&session.url)
        .bind(next_expiry(OffsetDateTime::now_utc()))
        .bind(link.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            link_id = %link.id,
            plan_id = %link.plan_id,
            "Regenerated expired checkout link in place"
        );

        Ok(session.url)
    }

    /// Best-effort transition to `used`. Failures are logged, never
    /// propagated; link bookkeeping must not fail event handling.
    pub async fn mark_used(&self, user_id: Uuid, plan_id: Uuid) {
        let result = sqlx::query(
            r#"
            UPDATE checkout_links SET status = 'used', updated_at = NOW()
            WHERE user_id = $1 AND plan_id = $2 AND status = 'active'
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                user_id = %user_id,
                plan_id = %plan_id,
                error = %e,
                "Failed to mark checkout link used"
            );
        }
    }

    /// Best-effort transition to `expired` on explicit provider signal.
    pub async fn mark_expired(&self, user_id: Uuid, plan_id: Uuid) {
        let result = sqlx::query(
            r#"
            UPDATE checkout_links SET status = 'expired', updated_at = NOW()
            WHERE user_id = $1 AND plan_id = $2 AND status = 'active'
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                user_id = %user_id,
                plan_id = %plan_id,
                error = %e,
                "Failed to mark checkout link expired"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_by_time() {
        let now = OffsetDateTime::now_utc();
        assert!(link_is_expired("active", now - Duration::minutes(1), now));
        assert!(!link_is_expired("active", now + Duration::minutes(1), now));
    }

    #[test]
    fn expiry_by_status_overrides_time() {
        let now = OffsetDateTime::now_utc();
        assert!(link_is_expired("expired", now + Duration::hours(10), now));
    }

    #[test]
    fn next_expiry_is_a_day_out() {
        let now = OffsetDateTime::now_utc();
        let expiry = next_expiry(now);
        assert_eq!(expiry - now, Duration::hours(24));
    }

    fn record(status: &str) -> CheckoutLinkRecord {
        CheckoutLinkRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            restaurant_id: None,
            plan_id: Uuid::new_v4(),
            stripe_customer_id: "cus_123".to_string(),
            checkout_url: "https://checkout.stripe.com/c/pay/cs_1".to_string(),
            expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
            status: status.to_string(),
            trial_days: None,
            trial_enabled: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn used_link_never_yields_a_redirect() {
        let resolved = ResolvedLink {
            link: record("used"),
            is_valid: false,
            is_expired: false,
            new_checkout_url: None,
        };
        assert_eq!(resolved.redirect_url(), None);
    }

    #[test]
    fn regenerated_link_redirects_to_fresh_url() {
        let resolved = ResolvedLink {
            link: record("active"),
            is_valid: true,
            is_expired: true,
            new_checkout_url: Some("https://checkout.stripe.com/c/pay/cs_2".to_string()),
        };
        assert_eq!(
            resolved.redirect_url(),
            Some("https://checkout.stripe.com/c/pay/cs_2")
        );

        let not_expired = ResolvedLink {
            link: record("active"),
            is_valid: true,
            is_expired: false,
            new_checkout_url: None,
        };
        assert_eq!(
            not_expired.redirect_url(),
            Some("https://checkout.stripe.com/c/pay/cs_1")
        );
    }
}
