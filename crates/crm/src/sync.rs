//! CRM deal sync engine
//!
//! Consumes deal-updated events and keeps the deal's payment-link field
//! converged: a valid checkout link plus a fingerprint of the data that
//! produced it, or a human-readable error message (never both). The
//! fingerprint short-circuit is what stops the webhook loop: writing the
//! field triggers another deal-updated event, which must recognize its own
//! write and do nothing.
//!
//! Every entry point absorbs its own failures. The caller is a webhook
//! dispatcher; an escaping error would be retried indefinitely and each
//! retry would mint fresh provider-side sessions.

use std::collections::HashMap;
use std::sync::Arc;

use menucraft_billing::{BillingService, SetupCustomer};

use crate::client::{Deal, PipedriveClient};
use crate::error::{CrmError, CrmResult};
use crate::fields::{field_text, is_checkout_like, CrmDealFieldRef};
use crate::fingerprint::fingerprint_is_current;
use crate::input::{assemble_input, fetch_enrichment};
use crate::phone::normalize_us_phone;
use crate::reps::resolve_sales_rep;

const MSG_INVALID_PRICE: &str = "Invalid price";
const MSG_CHECKOUT_FAILED: &str = "Failed to create payment link";

/// What a sync pass did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The deal lacked required identity fields; dropped silently.
    SkippedMissingIdentity,
    /// The payment-link field could not be resolved; nothing written.
    FieldUnresolved,
    /// Stored link and fingerprint already match the current input.
    NoChange,
    /// A fresh link and fingerprint were written.
    LinkWritten,
    /// A validation or checkout error message was written.
    ErrorWritten,
    /// The intended write was recognized as redundant and skipped.
    WriteSuppressed,
    /// An internal error was absorbed at the boundary.
    Failed,
}

/// Whether a fresh link (and fingerprint) should actually be written.
///
/// The fingerprint comparison is authoritative. The URL-shape equivalence is
/// defensive only: it can suppress a redundant write when the fingerprint
/// already matches, never a required one.
pub fn should_write_link(
    current: Option<&str>,
    new_url: &str,
    stored_fingerprint: Option<&str>,
    current_fingerprint: &str,
) -> bool {
    if fingerprint_is_current(stored_fingerprint, current_fingerprint) {
        if let Some(current) = current {
            if is_checkout_like(current) && is_checkout_like(new_url) {
                return false;
            }
        }
    }
    true
}

/// Whether an error message should be written: never over a valid checkout
/// URL, and not when the field already holds the identical message.
pub fn should_write_error(current: Option<&str>, new_message: &str) -> bool {
    match current {
        Some(current) if is_checkout_like(current) => false,
        Some(current) if current == new_message => false,
        _ => true,
    }
}

pub struct CrmSyncEngine {
    crm: Arc<PipedriveClient>,
    billing: Arc<BillingService>,
}

impl CrmSyncEngine {
    pub fn new(crm: Arc<PipedriveClient>, billing: Arc<BillingService>) -> Self {
        Self { crm, billing }
    }

    /// Entry point for deal-updated events. Never fails: all errors are
    /// logged and absorbed here.
    pub async fn handle_deal_event(&self, deal: Deal) -> SyncOutcome {
        let deal_id = deal.id;
        match self.sync_deal(deal).await {
            Ok(outcome) => {
                tracing::info!(deal_id = deal_id, outcome = ?outcome, "Deal sync finished");
                outcome
            }
            Err(e) => {
                tracing::error!(deal_id = deal_id, error = %e, "Deal sync failed");
                SyncOutcome::Failed
            }
        }
    }

    /// Inner sync with typed errors, for testability; the outer boundary
    /// swallows them.
    async fn sync_deal(&self, deal: Deal) -> CrmResult<SyncOutcome> {
        // 1. Identity check. A malformed event is terminal-but-silent: the
        // dispatcher must never be handed a reason to retry.
        if deal.id <= 0 {
            tracing::warn!("Deal event without usable id; dropping");
            return Ok(SyncOutcome::SkippedMissingIdentity);
        }

        let config = self.crm.config().clone();

        // 2. Concurrent enrichment; per-branch failures leave fields empty.
        let enrichment = fetch_enrichment(&self.crm, &deal).await;

        // 3. Sales rep: validated field value first, directory fallback.
        let slack_value = match self.crm.find_field(&config.slack_field).await {
            Ok(Some(field)) => field_text(&deal.custom_fields, &field.key),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(deal_id = deal.id, error = %e, "Slack field lookup failed");
                None
            }
        };
        let owner_email = enrichment.owner.as_ref().and_then(|o| o.email.clone());
        let owner_phone = enrichment.owner.as_ref().and_then(|o| o.phone.clone());
        let sales_rep = resolve_sales_rep(
            slack_value.as_deref(),
            owner_email.as_deref(),
            owner_phone.as_deref(),
        );

        // 4. Canonical input and its fingerprint.
        let mut input = assemble_input(&deal, &enrichment, sales_rep);
        let mut current_fingerprint = input.fingerprint();

        // 5. Payment-link field must resolve or nothing is written.
        let link_field = match self.crm.find_field(&config.payment_link_field).await {
            Ok(Some(field)) => field,
            Ok(None) => {
                let e = CrmError::FieldResolution(config.payment_link_field.clone());
                tracing::warn!(
                    deal_id = deal.id,
                    error = %e,
                    "Payment link field not found in schema; aborting"
                );
                return Ok(SyncOutcome::FieldUnresolved);
            }
            Err(e) => {
                tracing::warn!(
                    deal_id = deal.id,
                    error = %e,
                    "Payment link field lookup failed; aborting"
                );
                return Ok(SyncOutcome::FieldUnresolved);
            }
        };
        let fingerprint_field = match self.crm.find_field(&config.fingerprint_field).await {
            Ok(field) => field,
            Err(e) => {
                tracing::warn!(deal_id = deal.id, error = %e, "Fingerprint field lookup failed");
                None
            }
        };

        let current_value = field_text(&deal.custom_fields, &link_field.key);
        let stored_fingerprint = fingerprint_field
            .as_ref()
            .and_then(|f| field_text(&deal.custom_fields, &f.key));

        // 6. The idempotency short-circuit. A legacy-format or absent stored
        // fingerprint never matches, which forces one regeneration and
        // migrates the field.
        if let Some(current) = &current_value {
            if is_checkout_like(current)
                && fingerprint_field.is_some()
                && fingerprint_is_current(stored_fingerprint.as_deref(), &current_fingerprint)
            {
                tracing::debug!(deal_id = deal.id, "Link and fingerprint current; no-op");
                return Ok(SyncOutcome::NoChange);
            }
        }

        // 7. Required business attributes.
        let mut missing = Vec::new();
        if input.restaurant_name.is_none() {
            missing.push("restaurant name");
        }
        if input.name.is_none() {
            missing.push("contact name");
        }
        if input.email.is_none() {
            missing.push("email");
        }
        if !missing.is_empty() {
            let message = format!("Missing attributes: {}", missing.join(", "));
            return self
                .write_error(deal.id, &link_field, current_value.as_deref(), &message)
                .await;
        }

        // 8. Plan from price; conservative phone normalization; checkout.
        let plan = match self.billing.catalog.by_price_cents(input.price).await {
            Ok(Some(plan)) if input.price > 0 => plan,
            Ok(_) => {
                tracing::warn!(
                    deal_id = deal.id,
                    price_cents = input.price,
                    "No plan sold at this price"
                );
                return self
                    .write_error(
                        deal.id,
                        &link_field,
                        current_value.as_deref(),
                        MSG_INVALID_PRICE,
                    )
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(phone) = input.phone_number.clone() {
            if let Some(normalized) = normalize_us_phone(&phone) {
                if normalized != phone {
                    input.phone_number = Some(normalized);
                    // The stored fingerprint must describe the data that
                    // actually produced the link.
                    current_fingerprint = input.fingerprint();
                }
            }
        }

        let setup = self
            .billing
            .subscriptions
            .setup_subscription(
                SetupCustomer {
                    email: input.email.clone().unwrap_or_default(),
                    name: input.name.clone().unwrap_or_default(),
                    phone: input.phone_number.clone(),
                    restaurant_name: input.restaurant_name.clone(),
                    invoice_emails: None,
                },
                plan,
                None,
                None,
            )
            .await;

        match setup {
            Ok(url) => {
                if !should_write_link(
                    current_value.as_deref(),
                    &url,
                    stored_fingerprint.as_deref(),
                    &current_fingerprint,
                ) {
                    tracing::info!(deal_id = deal.id, "Equivalent link already stored; skipping write");
                    return Ok(SyncOutcome::WriteSuppressed);
                }

                // URL and fingerprint land in one field-update call.
                let mut values = HashMap::new();
                values.insert(link_field.key.clone(), url);
                if let Some(fp_field) = &fingerprint_field {
                    values.insert(fp_field.key.clone(), current_fingerprint);
                }

                // The checkout link already exists; a failed CRM write must
                // not unwind it.
                if let Err(e) = self.crm.update_deal_fields(deal.id, values).await {
                    tracing::error!(
                        deal_id = deal.id,
                        error = %e,
                        "Checkout link created but CRM field write failed"
                    );
                }

                Ok(SyncOutcome::LinkWritten)
            }
            Err(e) => {
                tracing::error!(deal_id = deal.id, error = %e, "Checkout setup failed");
                self.write_error(
                    deal.id,
                    &link_field,
                    current_value.as_deref(),
                    MSG_CHECKOUT_FAILED,
                )
                .await
            }
        }
    }

    /// Write a human-readable error into the payment-link field. Error
    /// writes never carry a fingerprint: error states are always considered
    /// stale and eligible for retry on the next event.
    async fn write_error(
        &self,
        deal_id: i64,
        link_field: &CrmDealFieldRef,
        current_value: Option<&str>,
        message: &str,
    ) -> CrmResult<SyncOutcome> {
        if !should_write_error(current_value, message) {
            tracing::debug!(deal_id = deal_id, message = %message, "Error write suppressed");
            return Ok(SyncOutcome::WriteSuppressed);
        }

        let mut values = HashMap::new();
        values.insert(link_field.key.clone(), message.to_string());

        if let Err(e) = self.crm.update_deal_fields(deal_id, values).await {
            tracing::error!(
                deal_id = deal_id,
                error = %e,
                "Failed to write error message to CRM"
            );
        }

        Ok(SyncOutcome::ErrorWritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "a3f9c2d4e5b6a7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2";
    const CHECKOUT_URL: &str = "https://checkout.stripe.com/c/pay/cs_live_123";
    const OTHER_CHECKOUT_URL: &str = "https://checkout.stripe.com/c/pay/cs_live_456";

    #[test]
    fn matching_fingerprint_and_both_checkout_like_suppresses() {
        assert!(!should_write_link(
            Some(CHECKOUT_URL),
            OTHER_CHECKOUT_URL,
            Some(FP),
            FP
        ));
    }

    #[test]
    fn fingerprint_mismatch_always_writes() {
        assert!(should_write_link(
            Some(CHECKOUT_URL),
            OTHER_CHECKOUT_URL,
            Some("different"),
            FP
        ));
        assert!(should_write_link(
            Some(CHECKOUT_URL),
            OTHER_CHECKOUT_URL,
            None,
            FP
        ));
    }

    #[test]
    fn legacy_fingerprint_always_writes() {
        let legacy = r#"{"dealId":42,"price":12900}"#;
        assert!(should_write_link(
            Some(CHECKOUT_URL),
            OTHER_CHECKOUT_URL,
            Some(legacy),
            FP
        ));
    }

    #[test]
    fn error_in_field_gets_replaced_by_link() {
        assert!(should_write_link(
            Some("Missing attributes: email"),
            CHECKOUT_URL,
            Some(FP),
            FP
        ));
        assert!(should_write_link(None, CHECKOUT_URL, Some(FP), FP));
    }

    #[test]
    fn error_never_overwrites_a_valid_url() {
        assert!(!should_write_error(Some(CHECKOUT_URL), "Invalid price"));
    }

    #[test]
    fn identical_error_is_not_rewritten() {
        assert!(!should_write_error(
            Some("Invalid price"),
            "Invalid price"
        ));
        assert!(should_write_error(
            Some("Missing attributes: email"),
            "Invalid price"
        ));
        assert!(should_write_error(None, "Invalid price"));
    }
}
