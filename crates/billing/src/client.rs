//! Stripe client wrapper

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Where the provider sends the browser after a successful checkout.
    pub checkout_success_url: String,
    /// Where the provider sends the browser after an abandoned checkout.
    pub checkout_cancel_url: String,
    /// Public base URL of this service, used to build redirect links
    /// (`{base}/subscription/{link_id}`).
    pub public_base_url: String,
    /// Trial length applied when a plan does not carry its own.
    pub default_trial_days: u32,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;
        let checkout_success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .map_err(|_| BillingError::Config("CHECKOUT_SUCCESS_URL not set".to_string()))?;
        let checkout_cancel_url = std::env::var("CHECKOUT_CANCEL_URL")
            .map_err(|_| BillingError::Config("CHECKOUT_CANCEL_URL not set".to_string()))?;
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .map_err(|_| BillingError::Config("PUBLIC_BASE_URL not set".to_string()))?;
        let default_trial_days = std::env::var("DEFAULT_TRIAL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(14);

        Ok(Self {
            secret_key,
            webhook_secret,
            checkout_success_url,
            checkout_cancel_url,
            public_base_url,
            default_trial_days,
        })
    }
}

/// Thin wrapper owning the Stripe SDK client plus our configuration.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
