//! Subscription status normalization
//!
//! The internal store mirrors the payment provider's subscription state, but
//! access control only cares about one bit: is the restaurant paid up. The
//! mapping lives here so the billing crate and the worker agree on it.

use serde::{Deserialize, Serialize};

/// Provider-side subscription status, as delivered by webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }

    /// Whether a subscription in this status grants access.
    ///
    /// A paused collection never grants access even while the provider still
    /// reports `active`, so callers must pass the pause flag alongside.
    pub fn grants_access(&self, pause_collection: bool) -> bool {
        if pause_collection {
            return false;
        }
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    /// Status string persisted to the internal store.
    ///
    /// Non-access-granting states collapse to a terminal `failed` marker; the
    /// raw provider status is kept in the history trail instead.
    pub fn stored_status(&self, pause_collection: bool) -> &'static str {
        if self.grants_access(pause_collection) {
            self.as_str()
        } else {
            "failed"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_trialing_grant_access() {
        assert!(SubscriptionStatus::Active.grants_access(false));
        assert!(SubscriptionStatus::Trialing.grants_access(false));
        assert!(!SubscriptionStatus::PastDue.grants_access(false));
        assert!(!SubscriptionStatus::Canceled.grants_access(false));
    }

    #[test]
    fn pause_collection_revokes_access() {
        assert!(!SubscriptionStatus::Active.grants_access(true));
        assert!(!SubscriptionStatus::Trialing.grants_access(true));
    }

    #[test]
    fn stored_status_collapses_to_failed() {
        assert_eq!(SubscriptionStatus::Active.stored_status(false), "active");
        assert_eq!(
            SubscriptionStatus::Trialing.stored_status(false),
            "trialing"
        );
        assert_eq!(SubscriptionStatus::Active.stored_status(true), "failed");
        assert_eq!(SubscriptionStatus::Unpaid.stored_status(false), "failed");
        assert_eq!(
            SubscriptionStatus::IncompleteExpired.stored_status(false),
            "failed"
        );
    }

    #[test]
    fn status_round_trip() {
        for s in [
            "active",
            "trialing",
            "past_due",
            "canceled",
            "unpaid",
            "incomplete",
            "incomplete_expired",
            "paused",
        ] {
            let parsed = SubscriptionStatus::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(SubscriptionStatus::from_str("weird").is_none());
    }
}
