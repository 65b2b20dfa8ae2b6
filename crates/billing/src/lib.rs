// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! menucraft Billing Module
//!
//! Reconciles the payment provider, the internal store, and the checkout
//! links handed to the CRM.
//!
//! ## Features
//!
//! - **Checkout Setup**: Ensure a valid Stripe customer, create checkout
//!   sessions, issue redirect links that never expose raw provider URLs
//! - **Webhook Sync**: Materialize internal subscription state from provider
//!   events, idempotent under duplicated and reordered delivery
//! - **Checkout Links**: Single-use redirect records with 24h expiry and
//!   lazy in-place regeneration
//! - **Card Validation**: Authorization-hold based funds checks that never
//!   capture
//! - **Direct Subscriptions**: Admin-initiated subscription creation reusing
//!   stored payment methods, degrading to a checkout link
//! - **Invariants**: Runnable read-only consistency checks

pub mod accounts;
pub mod catalog;
pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod funds;
pub mod history;
pub mod invariants;
pub mod links;
pub mod portal;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Accounts
pub use accounts::{AccountStore, RestaurantRecord, UserRecord};

// Catalog
pub use catalog::{Plan, PlanCatalog};

// Checkout
pub use checkout::{CheckoutService, CheckoutSessionRequest, CreatedCheckoutSession};

// Client
pub use client::{StripeClient, StripeConfig};

// Customer
pub use customer::{CustomerData, CustomerService};

// Error
pub use error::{BillingError, BillingResult};

// Funds
pub use funds::{CardFundsService, HoldOutcome};

// History
pub use history::{SubscriptionHistoryRecord, SubscriptionHistoryService};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Links
pub use links::{CheckoutLinkRecord, CheckoutLinkService, CreateCheckoutLink, ResolvedLink};

// Portal
pub use portal::{PortalResponse, PortalService};

// Subscriptions
pub use subscriptions::{DirectSubscriptionOutcome, SetupCustomer, SubscriptionService};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub accounts: AccountStore,
    pub catalog: PlanCatalog,
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub funds: CardFundsService,
    pub history: SubscriptionHistoryService,
    pub invariants: InvariantChecker,
    pub links: CheckoutLinkService,
    pub portal: PortalService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }

    /// Create a new billing service with an explicit client
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            accounts: AccountStore::new(pool.clone()),
            catalog: PlanCatalog::new(pool.clone()),
            checkout: CheckoutService::new(stripe.clone()),
            customer: CustomerService::new(stripe.clone()),
            funds: CardFundsService::new(stripe.clone()),
            history: SubscriptionHistoryService::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            links: CheckoutLinkService::new(stripe.clone(), pool.clone()),
            portal: PortalService::new(stripe.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
