//! Card funds validation
//!
//! Proves a card can cover an amount without charging it: place a
//! manual-capture authorization hold, wait for it to become capturable, then
//! release it. At most one visible authorization exists per logical attempt,
//! so a recent still-active hold on the same payment method is reused instead
//! of creating another.

use stripe::{
    CancelPaymentIntent, CreatePaymentIntent, Currency, CustomerId, ListPaymentIntents,
    PaymentIntent, PaymentIntentCancellationReason, PaymentIntentCaptureMethod, PaymentIntentId,
    PaymentIntentStatus, PaymentMethodId,
};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Holds younger than this are reused rather than duplicated.
pub const HOLD_REUSE_WINDOW_SECS: i64 = 300;

const POLL_INTERVAL_MS: u64 = 2_000;
const POLL_MAX_RETRIES: usize = 5;

/// Terminal classification of an authorization hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The hold became capturable: funds are provably available and the hold
    /// must now be released.
    FundsAvailable,
    /// The hold was already canceled; a previous invocation finished the job.
    AlreadyReleased,
    /// The hold was captured. Money moved during a validation, which is a
    /// hard failure.
    Captured,
    /// The provider declined the card.
    Declined,
}

/// Classify a payment-intent status. `None` means still pending, keep
/// polling.
pub fn hold_outcome(status: PaymentIntentStatus) -> Option<HoldOutcome> {
    match status {
        PaymentIntentStatus::RequiresCapture => Some(HoldOutcome::FundsAvailable),
        PaymentIntentStatus::Canceled => Some(HoldOutcome::AlreadyReleased),
        PaymentIntentStatus::Succeeded => Some(HoldOutcome::Captured),
        PaymentIntentStatus::RequiresPaymentMethod => Some(HoldOutcome::Declined),
        PaymentIntentStatus::Processing
        | PaymentIntentStatus::RequiresConfirmation
        | PaymentIntentStatus::RequiresAction => None,
    }
}

/// Whether an existing intent is a hold we may reuse: recent, on the same
/// payment method, and not yet finished (captured or canceled).
pub fn is_reusable_hold(
    status: PaymentIntentStatus,
    created: i64,
    intent_payment_method: Option<&str>,
    wanted_payment_method: &str,
    now: i64,
) -> bool {
    if now - created > HOLD_REUSE_WINDOW_SECS {
        return false;
    }
    if intent_payment_method != Some(wanted_payment_method) {
        return false;
    }
    !matches!(
        status,
        PaymentIntentStatus::Succeeded | PaymentIntentStatus::Canceled
    )
}

enum PollError {
    Pending,
    Stripe(stripe::StripeError),
}

pub struct CardFundsService {
    stripe: StripeClient,
}

impl CardFundsService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Validate that the payment method can cover `amount_cents`.
    ///
    /// The success paths leave either a canceled hold or a reused untouched
    /// one; a captured hold is reported as [`BillingError::FundsCaptured`].
    pub async fn validate_card_funds(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        amount_cents: i64,
    ) -> BillingResult<()> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let intent = match self
            .find_reusable_hold(&customer_id, payment_method_id)
            .await?
        {
            Some(existing) => {
                tracing::info!(
                    intent_id = %existing.id,
                    customer_id = %customer_id,
                    "Reusing recent authorization hold"
                );
                existing
            }
            None => {
                self.create_hold(&customer_id, payment_method_id, amount_cents)
                    .await?
            }
        };

        let outcome = self.poll_until_terminal(&intent.id).await?;

        match outcome {
            HoldOutcome::FundsAvailable => {
                self.release_hold(&intent.id).await?;
                Ok(())
            }
            HoldOutcome::AlreadyReleased => {
                tracing::info!(intent_id = %intent.id, "Hold already released");
                Ok(())
            }
            HoldOutcome::Captured => {
                tracing::error!(
                    intent_id = %intent.id,
                    customer_id = %customer_id,
                    "Validation hold was captured - funds were charged"
                );
                Err(BillingError::FundsCaptured(intent.id.to_string()))
            }
            HoldOutcome::Declined => Err(BillingError::CardDeclined(intent.id.to_string())),
        }
    }

    async fn find_reusable_hold(
        &self,
        customer_id: &CustomerId,
        payment_method_id: &str,
    ) -> BillingResult<Option<PaymentIntent>> {
        let mut params = ListPaymentIntents::new();
        params.customer = Some(customer_id.clone());
        params.limit = Some(10);

        let intents = PaymentIntent::list(self.stripe.inner(), &params).await?;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();

        // List order is newest-first, so the first match is the most recent.
        let reusable = intents.data.into_iter().find(|pi| {
            let pm = pi.payment_method.as_ref().map(|pm| pm.id().to_string());
            is_reusable_hold(pi.status, pi.created, pm.as_deref(), payment_method_id, now)
        });

        Ok(reusable)
    }

    async fn create_hold(
        &self,
        customer_id: &CustomerId,
        payment_method_id: &str,
        amount_cents: i64,
    ) -> BillingResult<PaymentIntent> {
        let payment_method_id = payment_method_id
            .parse::<PaymentMethodId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid payment method ID: {}", e)))?;

        let mut params = CreatePaymentIntent::new(amount_cents, Currency::USD);
        params.customer = Some(customer_id.clone());
        params.payment_method = Some(payment_method_id);
        params.capture_method = Some(PaymentIntentCaptureMethod::Manual);
        params.confirm = Some(true);
        params.description = Some("Card validation hold");

        let intent = PaymentIntent::create(self.stripe.inner(), params).await?;

        tracing::info!(
            intent_id = %intent.id,
            customer_id = %customer_id,
            amount_cents = amount_cents,
            "Created authorization hold"
        );

        Ok(intent)
    }

    /// Poll the intent at a fixed short interval until it reaches a terminal
    /// pre-capture state. Bounded; running out of attempts is a hard failure.
    async fn poll_until_terminal(&self, intent_id: &PaymentIntentId) -> BillingResult<HoldOutcome> {
        let strategy = FixedInterval::from_millis(POLL_INTERVAL_MS).take(POLL_MAX_RETRIES);

        let result = Retry::spawn(strategy, || async {
            let intent = PaymentIntent::retrieve(self.stripe.inner(), intent_id, &[])
                .await
                .map_err(PollError::Stripe)?;
            hold_outcome(intent.status).ok_or(PollError::Pending)
        })
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(PollError::Pending) => Err(BillingError::StripeApi(format!(
                "Authorization hold {} did not settle in time",
                intent_id
            ))),
            Err(PollError::Stripe(e)) => Err(BillingError::Stripe(e)),
        }
    }

    async fn release_hold(&self, intent_id: &PaymentIntentId) -> BillingResult<()> {
        let params = CancelPaymentIntent {
            cancellation_reason: Some(PaymentIntentCancellationReason::RequestedByCustomer),
            ..Default::default()
        };

        match PaymentIntent::cancel(self.stripe.inner(), intent_id, params).await {
            Ok(_) => {
                tracing::info!(intent_id = %intent_id, "Released authorization hold");
                Ok(())
            }
            Err(e) if e.to_string().contains("already been canceled") => {
                // A concurrent invocation released it first.
                Ok(())
            }
            Err(e) => Err(BillingError::Stripe(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturable_hold_means_funds_available() {
        assert_eq!(
            hold_outcome(PaymentIntentStatus::RequiresCapture),
            Some(HoldOutcome::FundsAvailable)
        );
    }

    #[test]
    fn canceled_hold_is_idempotent_success() {
        assert_eq!(
            hold_outcome(PaymentIntentStatus::Canceled),
            Some(HoldOutcome::AlreadyReleased)
        );
    }

    #[test]
    fn captured_hold_is_a_hard_failure() {
        assert_eq!(
            hold_outcome(PaymentIntentStatus::Succeeded),
            Some(HoldOutcome::Captured)
        );
    }

    #[test]
    fn pending_statuses_keep_polling() {
        assert_eq!(hold_outcome(PaymentIntentStatus::Processing), None);
        assert_eq!(hold_outcome(PaymentIntentStatus::RequiresConfirmation), None);
        assert_eq!(hold_outcome(PaymentIntentStatus::RequiresAction), None);
    }

    #[test]
    fn stale_holds_are_not_reused() {
        let now = 10_000;
        let too_old = now - HOLD_REUSE_WINDOW_SECS - 1;
        assert!(!is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            too_old,
            Some("pm_1"),
            "pm_1",
            now
        ));
    }

    #[test]
    fn different_payment_method_is_not_reused() {
        let now = 10_000;
        assert!(!is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            now - 10,
            Some("pm_other"),
            "pm_1",
            now
        ));
        assert!(!is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            now - 10,
            None,
            "pm_1",
            now
        ));
    }

    #[test]
    fn finished_holds_are_not_reused() {
        let now = 10_000;
        assert!(!is_reusable_hold(
            PaymentIntentStatus::Succeeded,
            now - 10,
            Some("pm_1"),
            "pm_1",
            now
        ));
        assert!(!is_reusable_hold(
            PaymentIntentStatus::Canceled,
            now - 10,
            Some("pm_1"),
            "pm_1",
            now
        ));
    }

    #[test]
    fn recent_active_hold_is_reused() {
        let now = 10_000;
        assert!(is_reusable_hold(
            PaymentIntentStatus::RequiresCapture,
            now - 60,
            Some("pm_1"),
            "pm_1",
            now
        ));
        assert!(is_reusable_hold(
            PaymentIntentStatus::Processing,
            now - HOLD_REUSE_WINDOW_SECS,
            Some("pm_1"),
            "pm_1",
            now
        ));
    }
}
