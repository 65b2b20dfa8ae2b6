//! Stripe webhook handling
//!
//! Verifies event signatures and dispatches subscription lifecycle events
//! into the reconciler. Delivery is at-least-once and unordered, so every
//! event is claimed atomically in `stripe_webhook_events` before any handler
//! runs; a duplicate delivery loses the claim and is dropped.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Events stuck in `processing` longer than this are reclaimed; the worker
/// that claimed them is assumed dead.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Tries the SDK's verification first and falls back to manual signature
    /// verification, which tolerates API versions newer than the SDK's
    /// bundled event parser.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Signature header format: t=timestamp,v1=signature,v0=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        // 5 minute timestamp tolerance
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > 300 {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// The INSERT...ON CONFLICT...RETURNING claim guarantees only one
    /// concurrent delivery processes a given event id; the conflict arm also
    /// reclaims events stuck in `processing` past the timeout.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
            WHERE stripe_webhook_events.processing_result = 'processing'
              AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event dropped by atomic idempotency check"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        let update_result = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = update_result {
            // The audit row drives idempotency and stuck-state recovery, so
            // retry the write-back once before giving up.
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "First attempt to update webhook event record failed, retrying"
            );

            if let Err(retry_err) = sqlx::query(
                r#"
                UPDATE stripe_webhook_events
                SET processing_result = $1, error_message = $2
                WHERE stripe_event_id = $3
                "#,
            )
            .bind(&processing_result)
            .bind(&error_message)
            .bind(&event_id)
            .execute(&self.pool)
            .await
            {
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event.type_,
                    first_error = %e,
                    retry_error = %retry_err,
                    "Failed to update webhook audit record after retry; event may appear stuck in processing"
                );
            }
        }

        result
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CustomerSubscriptionCreated => {
                let subscription = self.extract_subscription(event)?;
                self.reconciler().handle_subscription_event(&subscription).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                let subscription = self.extract_subscription(event)?;
                let reconciler = self.reconciler();
                reconciler.handle_subscription_event(&subscription).await?;
                // No-op unless the payload carries an explicit
                // end-with-cancel-reason signal.
                reconciler
                    .handle_scheduled_cancellation(&subscription)
                    .await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                let subscription = self.extract_subscription(event)?;
                self.reconciler().handle_cancellation(&subscription).await?;
            }
            EventType::CheckoutSessionCompleted => {
                // State is driven by the subscription events that follow;
                // this is only observability.
                tracing::info!(event_id = %event.id, "Checkout session completed");
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    fn reconciler(&self) -> SubscriptionService {
        SubscriptionService::new(self.stripe.clone(), self.pool.clone())
    }

    fn extract_subscription(&self, event: &Event) -> BillingResult<Subscription> {
        match &event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription.clone()),
            other => Err(BillingError::StripeApi(format!(
                "Expected subscription payload, got {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }
}
