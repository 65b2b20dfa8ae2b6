// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Tests critical boundary conditions in:
//! - Status normalization and access derivation
//! - Checkout link expiry and single-use lifecycle
//! - Card-funds authorization hold outcomes
//! - Input validation for checkout setup
//! - Webhook signal filtering

#[cfg(test)]
mod status_tests {
    use menucraft_shared::SubscriptionStatus;

    // =========================================================================
    // Active + paused collection must not grant access
    // =========================================================================
    #[test]
    fn test_paused_collection_never_active() {
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Trialing] {
            assert!(status.grants_access(false));
            assert!(
                !status.grants_access(true),
                "{:?} with pause flag must not grant access",
                status
            );
            assert_eq!(status.stored_status(true), "failed");
        }
    }

    // =========================================================================
    // Every non-access status collapses to the terminal failed marker
    // =========================================================================
    #[test]
    fn test_non_access_statuses_store_failed() {
        for status in [
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Paused,
        ] {
            assert_eq!(
                status.stored_status(false),
                "failed",
                "{:?} should store as failed",
                status
            );
        }
    }

    // =========================================================================
    // Unknown provider status strings parse to None, not a panic
    // =========================================================================
    #[test]
    fn test_unknown_status_string() {
        assert!(SubscriptionStatus::from_str("definitely_new_status").is_none());
        assert!(SubscriptionStatus::from_str("").is_none());
    }
}

#[cfg(test)]
mod link_tests {
    use crate::links::{link_is_expired, next_expiry, LINK_TTL_HOURS};
    use time::{Duration, OffsetDateTime};

    // =========================================================================
    // Expiry exactly at the boundary: now == expires_at is NOT expired
    // =========================================================================
    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        assert!(!link_is_expired("active", now, now));
        assert!(link_is_expired("active", now - Duration::seconds(1), now));
    }

    // =========================================================================
    // An explicitly expired link stays expired even with future expires_at
    // =========================================================================
    #[test]
    fn test_provider_signal_beats_clock() {
        let now = OffsetDateTime::now_utc();
        assert!(link_is_expired("expired", now + Duration::hours(23), now));
    }

    // =========================================================================
    // A used link is not time-expired; single-use is a separate gate
    // =========================================================================
    #[test]
    fn test_used_status_is_not_expiry() {
        let now = OffsetDateTime::now_utc();
        assert!(!link_is_expired("used", now + Duration::hours(1), now));
    }

    // =========================================================================
    // Regenerated expiry lands the full TTL out
    // =========================================================================
    #[test]
    fn test_regenerated_expiry_is_full_ttl() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(next_expiry(now) - now, Duration::hours(LINK_TTL_HOURS));
    }
}

#[cfg(test)]
mod funds_tests {
    use crate::funds::{hold_outcome, is_reusable_hold, HoldOutcome, HOLD_REUSE_WINDOW_SECS};
    use stripe::PaymentIntentStatus;

    // =========================================================================
    // Success paths never include a captured hold
    // =========================================================================
    #[test]
    fn test_success_outcomes_exclude_captured() {
        let success_outcomes = [HoldOutcome::FundsAvailable, HoldOutcome::AlreadyReleased];
        assert!(!success_outcomes.contains(&HoldOutcome::Captured));
        assert_eq!(
            hold_outcome(PaymentIntentStatus::Succeeded),
            Some(HoldOutcome::Captured)
        );
    }

    // =========================================================================
    // Reuse window boundary: exactly at the window edge is reusable
    // =========================================================================
    #[test]
    fn test_reuse_window_boundary() {
        let now = 1_000_000;
        assert!(is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            now - HOLD_REUSE_WINDOW_SECS,
            Some("pm_a"),
            "pm_a",
            now
        ));
        assert!(!is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            now - HOLD_REUSE_WINDOW_SECS - 1,
            Some("pm_a"),
            "pm_a",
            now
        ));
    }

    // =========================================================================
    // Declined path maps from requires_payment_method
    // =========================================================================
    #[test]
    fn test_declined_mapping() {
        assert_eq!(
            hold_outcome(PaymentIntentStatus::RequiresPaymentMethod),
            Some(HoldOutcome::Declined)
        );
    }
}

#[cfg(test)]
mod validation_tests {
    use crate::subscriptions::is_plausible_email;

    // =========================================================================
    // Address shapes around the @ separator
    // =========================================================================
    #[test]
    fn test_email_shapes() {
        assert!(is_plausible_email("chef@trattoria.example"));
        assert!(is_plausible_email("a.b+tag@sub.domain.example"));

        assert!(!is_plausible_email("chef"));
        assert!(!is_plausible_email("chef@"));
        assert!(!is_plausible_email("@trattoria.example"));
        assert!(!is_plausible_email("chef@localhost"));
        assert!(!is_plausible_email("chef@domain."));
    }

    // =========================================================================
    // Two @ signs: split_once keeps the rest in the domain, which then fails
    // the dot/shape checks only when malformed
    // =========================================================================
    #[test]
    fn test_double_at_sign() {
        // "a@b@c.example" -> local "a", domain "b@c.example"; tolerated as the
        // provider does the authoritative validation.
        assert!(is_plausible_email("a@b@c.example"));
        assert!(!is_plausible_email("@@"));
    }
}

#[cfg(test)]
mod cancellation_tests {
    use crate::subscriptions::is_requested_scheduled_cancellation;
    use stripe::CancellationDetailsReason;

    // =========================================================================
    // Only cancel_at_period_end + cancellation_requested acts
    // =========================================================================
    #[test]
    fn test_requested_cancellation_signal() {
        let requested = CancellationDetailsReason::CancellationRequested;
        assert!(is_requested_scheduled_cancellation(true, Some(&requested)));
    }

    #[test]
    fn test_other_end_behaviors_are_noops() {
        let payment_failed = CancellationDetailsReason::PaymentFailed;
        let disputed = CancellationDetailsReason::PaymentDisputed;

        assert!(!is_requested_scheduled_cancellation(true, Some(&payment_failed)));
        assert!(!is_requested_scheduled_cancellation(true, Some(&disputed)));
        assert!(!is_requested_scheduled_cancellation(true, None));
        assert!(!is_requested_scheduled_cancellation(
            false,
            Some(&CancellationDetailsReason::CancellationRequested)
        ));
    }
}
