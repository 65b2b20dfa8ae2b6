//! Billing Invariants Module
//!
//! Runnable consistency checks over the internal store. The reconciler is
//! built to converge under duplicated and reordered webhook delivery; these
//! checks are the operational net that catches it when it does not. Checks
//! only read, never write.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Restaurant(s) affected
    pub restaurant_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - money state may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    restaurant_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveFlagMismatchRow {
    restaurant_id: Option<Uuid>,
    stripe_subscription_id: String,
    status: String,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingCustomerRow {
    user_id: Uuid,
    email: String,
    restaurant_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanSubscriptionRow {
    stripe_subscription_id: String,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleActiveLinkRow {
    link_id: Uuid,
    restaurant_id: Option<Uuid>,
    expires_at: OffsetDateTime,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_active_flag_matches_status().await?);
        violations.extend(self.check_active_users_have_customer().await?);
        violations.extend(self.check_subscription_has_restaurant().await?);
        violations.extend(self.check_no_long_expired_active_links().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 active subscription per restaurant
    ///
    /// Two active subscriptions means the restaurant is being double-billed.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT restaurant_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE is_active = true AND restaurant_id IS NOT NULL
            GROUP BY restaurant_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                restaurant_ids: vec![row.restaurant_id],
                description: format!(
                    "Restaurant has {} active subscriptions (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: `is_active` agrees with the stored status
    ///
    /// `is_active` is derived from status at write time; disagreement means a
    /// write path bypassed the derivation.
    async fn check_active_flag_matches_status(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ActiveFlagMismatchRow> = sqlx::query_as(
            r#"
            SELECT restaurant_id, stripe_subscription_id, status, is_active
            FROM subscriptions
            WHERE (is_active = true AND status NOT IN ('active', 'trialing'))
               OR (is_active = false AND status IN ('active', 'trialing'))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_flag_matches_status".to_string(),
                restaurant_ids: row.restaurant_id.into_iter().collect(),
                description: format!(
                    "Subscription '{}' has status '{}' but is_active={}",
                    row.stripe_subscription_id, row.status, row.is_active
                ),
                context: serde_json::json!({
                    "stripe_subscription_id": row.stripe_subscription_id,
                    "status": row.status,
                    "is_active": row.is_active,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Users behind active subscriptions have a provider customer
    async fn check_active_users_have_customer(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCustomerRow> = sqlx::query_as(
            r#"
            SELECT u.id as user_id, u.email, u.restaurant_id
            FROM users u
            JOIN subscriptions s ON s.profile_id = u.id
            WHERE s.is_active = true
              AND u.stripe_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_users_have_customer".to_string(),
                restaurant_ids: row.restaurant_id.into_iter().collect(),
                description: format!(
                    "User '{}' has an active subscription but no Stripe customer",
                    row.email
                ),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "email": row.email,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Subscriptions are attached to a restaurant
    ///
    /// Restaurant linkage is supposed to complete before a subscription is
    /// finalized; a NULL here means that ordering broke.
    async fn check_subscription_has_restaurant(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT stripe_subscription_id, status
            FROM subscriptions
            WHERE restaurant_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscription_has_restaurant".to_string(),
                restaurant_ids: vec![],
                description: format!(
                    "Subscription '{}' ({}) has no restaurant",
                    row.stripe_subscription_id, row.status
                ),
                context: serde_json::json!({
                    "stripe_subscription_id": row.stripe_subscription_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: No link stays nominally active long past expiry
    ///
    /// Resolution regenerates expired links lazily and the worker sweeps
    /// hourly; an active link a week past expiry means both stopped running.
    async fn check_no_long_expired_active_links(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleActiveLinkRow> = sqlx::query_as(
            r#"
            SELECT id as link_id, restaurant_id, expires_at
            FROM checkout_links
            WHERE status = 'active'
              AND expires_at < NOW() - INTERVAL '7 days'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_long_expired_active_links".to_string(),
                restaurant_ids: row.restaurant_id.into_iter().collect(),
                description: format!(
                    "Checkout link {} is still 'active' but expired at {}",
                    row.link_id, row.expires_at
                ),
                context: serde_json::json!({
                    "link_id": row.link_id,
                    "expires_at": row.expires_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "active_flag_matches_status" => self.check_active_flag_matches_status().await,
            "active_users_have_customer" => self.check_active_users_have_customer().await,
            "subscription_has_restaurant" => self.check_subscription_has_restaurant().await,
            "no_long_expired_active_links" => self.check_no_long_expired_active_links().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "active_flag_matches_status",
            "active_users_have_customer",
            "subscription_has_restaurant",
            "no_long_expired_active_links",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 5);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"active_flag_matches_status"));
    }
}
