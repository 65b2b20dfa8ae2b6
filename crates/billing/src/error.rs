//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad caller input: missing required field, malformed email, plan
    /// without an id.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An entity we expected to exist is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A payment provider call failed. The raw error is preserved so callers
    /// can branch on the provider's code (stale customer vs declined vs
    /// network).
    #[error("Stripe API error: {0}")]
    Stripe(#[from] stripe::StripeError),

    /// Provider-side problem detected before or after the call itself
    /// (unparseable ids, malformed payloads).
    #[error("Stripe error: {0}")]
    StripeApi(String),

    /// Internal store operation failed.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal store problem outside a direct sqlx call.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Funds validation captured money. This must never happen; the
    /// authorization hold is supposed to be released, not charged.
    #[error("Card validation hold was captured unexpectedly: {0}")]
    FundsCaptured(String),

    #[error("Card declined: {0}")]
    CardDeclined(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Checkout link {0} has already been used")]
    LinkConsumed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// True when the provider reports that a referenced resource (typically
    /// the stored customer id) no longer exists on its side.
    pub fn is_customer_missing(&self) -> bool {
        match self {
            BillingError::Stripe(e) => {
                let s = e.to_string();
                s.contains("resource_missing") || s.contains("No such customer")
            }
            _ => false,
        }
    }

    /// True when the provider declined the card.
    pub fn is_card_declined(&self) -> bool {
        match self {
            BillingError::CardDeclined(_) => true,
            BillingError::Stripe(e) => {
                let s = e.to_string();
                s.contains("card_declined") || s.contains("insufficient_funds")
            }
            _ => false,
        }
    }

    /// True when the failure was transport-level rather than a provider
    /// decision; safe to retry.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            BillingError::Stripe(stripe::StripeError::Timeout)
                | BillingError::Stripe(stripe::StripeError::ClientError(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_mutually_exclusive_for_plain_variants() {
        let e = BillingError::Validation("email".into());
        assert!(!e.is_customer_missing());
        assert!(!e.is_card_declined());
        assert!(!e.is_network());

        let e = BillingError::CardDeclined("insufficient funds".into());
        assert!(e.is_card_declined());
        assert!(!e.is_customer_missing());
    }

    #[test]
    fn network_errors_are_detected() {
        let e = BillingError::Stripe(stripe::StripeError::Timeout);
        assert!(e.is_network());
        assert!(!e.is_customer_missing());
        assert!(!e.is_card_declined());
    }
}
