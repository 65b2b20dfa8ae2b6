//! Checkout session creation

use std::collections::HashMap;

use stripe::{
    CheckoutSession, CheckoutSessionMode, Coupon, CreateCheckoutSession,
    CreateCheckoutSessionDiscounts, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId,
};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Everything needed to produce one provider-hosted checkout flow.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub trial_days: Option<u32>,
    pub coupon: Option<String>,
    pub user_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub plan_id: Uuid,
}

/// The parts of a created session callers are allowed to see.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreatedCheckoutSession {
    pub session_id: String,
    pub url: String,
}

pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    pub async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let customer_id = request
            .customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), request.user_id.to_string());
        metadata.insert("plan_id".to_string(), request.plan_id.to_string());
        if let Some(restaurant_id) = request.restaurant_id {
            metadata.insert("restaurant_id".to_string(), restaurant_id.to_string());
        }

        let config = self.stripe.config();

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(customer_id);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&config.checkout_success_url);
        params.cancel_url = Some(&config.checkout_cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            trial_period_days: request.trial_days,
            metadata: Some(metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(metadata);

        if let Some(ref coupon) = request.coupon {
            params.discounts = Some(vec![CreateCheckoutSessionDiscounts {
                coupon: Some(coupon.clone()),
                ..Default::default()
            }]);
        }

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))?;

        tracing::info!(
            session_id = %session.id,
            user_id = %request.user_id,
            plan_id = %request.plan_id,
            "Created checkout session"
        );

        Ok(CreatedCheckoutSession {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Resolve a coupon code against the provider and reject dead codes.
    pub async fn validate_coupon(&self, code: &str) -> BillingResult<Coupon> {
        let coupon_id = code
            .parse::<stripe::CouponId>()
            .map_err(|e| BillingError::InvalidCoupon(format!("{}: {}", code, e)))?;

        let coupon = Coupon::retrieve(self.stripe.inner(), &coupon_id, &[])
            .await
            .map_err(|e| {
                let wrapped = BillingError::Stripe(e);
                if wrapped.is_customer_missing() || wrapped.to_string().contains("No such coupon") {
                    BillingError::InvalidCoupon(code.to_string())
                } else {
                    wrapped
                }
            })?;

        if !coupon.valid.unwrap_or(false) {
            return Err(BillingError::InvalidCoupon(code.to_string()));
        }

        Ok(coupon)
    }
}
