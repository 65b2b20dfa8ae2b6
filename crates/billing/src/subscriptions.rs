//! Subscription reconciliation
//!
//! Coordinates the provider, the CRM-facing checkout links, and the internal
//! store. Every public operation is idempotent under at-least-once delivery:
//! the internal mirror is written through upserts keyed by the external
//! subscription id, and the active/canceled handlers are independent
//! state-setters rather than transitions validated against a prior state, so
//! duplicated or reordered webhook delivery converges to the same rows.

use std::collections::HashMap;

use menucraft_shared::SubscriptionStatus;
use sqlx::PgPool;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CancelSubscription, CancellationDetailsReason, CreateSubscription, CreateSubscriptionItems,
    Customer, CustomerId, Expandable, ListPaymentMethods, PaymentMethod, PaymentMethodTypeFilter,
    Subscription, SubscriptionId, SubscriptionPaymentBehavior,
    SubscriptionStatus as StripeSubStatus, UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::{AccountStore, UserRecord};
use crate::catalog::{Plan, PlanCatalog};
use crate::checkout::{CheckoutService, CheckoutSessionRequest};
use crate::client::StripeClient;
use crate::customer::{CustomerData, CustomerService};
use crate::error::{BillingError, BillingResult};
use crate::history::SubscriptionHistoryService;
use crate::links::{CheckoutLinkService, CreateCheckoutLink};

/// Caller-supplied customer details for a checkout flow.
#[derive(Debug, Clone, Default)]
pub struct SetupCustomer {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub restaurant_name: Option<String>,
    pub invoice_emails: Option<bool>,
}

/// How a direct-subscription attempt ended.
#[derive(Debug, Clone, serde::Serialize)]
pub enum DirectSubscriptionOutcome {
    /// A subscription was created and charged immediately.
    Subscribed { stripe_subscription_id: String },
    /// No candidate payment method worked; the caller gets a checkout link
    /// to forward instead.
    CheckoutLink { url: String },
}

/// Basic address-shape check: something before the `@`, a dot-carrying
/// domain after it. Full validation is the provider's job.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub fn map_status(status: StripeSubStatus) -> SubscriptionStatus {
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::PastDue => SubscriptionStatus::PastDue,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Unpaid => SubscriptionStatus::Unpaid,
        StripeSubStatus::Incomplete => SubscriptionStatus::Incomplete,
        StripeSubStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        StripeSubStatus::Paused => SubscriptionStatus::Paused,
    }
}

/// The scheduled-cancellation handler only acts on an explicit
/// end-with-cancel-reason signal; pauses, payment failures and every other
/// end behavior are no-ops here, not cancellations.
pub fn is_requested_scheduled_cancellation(
    cancel_at_period_end: bool,
    reason: Option<&CancellationDetailsReason>,
) -> bool {
    cancel_at_period_end
        && matches!(reason, Some(CancellationDetailsReason::CancellationRequested))
}

fn ts(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn customer_ref_id(customer: &Expandable<Customer>) -> String {
    match customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(c) => c.id.to_string(),
    }
}

fn payment_method_ref_id(method: &Expandable<PaymentMethod>) -> String {
    match method {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(m) => m.id.to_string(),
    }
}

/// Subscription reconciler: the billing core.
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    fn accounts(&self) -> AccountStore {
        AccountStore::new(self.pool.clone())
    }

    fn links(&self) -> CheckoutLinkService {
        CheckoutLinkService::new(self.stripe.clone(), self.pool.clone())
    }

    fn history(&self) -> SubscriptionHistoryService {
        SubscriptionHistoryService::new(self.pool.clone())
    }

    // =========================================================================
    // Checkout setup
    // =========================================================================

    /// Set up a subscription checkout for a customer and return the internal
    /// redirect URL. The raw provider URL never leaves this layer.
    pub async fn setup_subscription(
        &self,
        customer: SetupCustomer,
        plan: Plan,
        coupon_code: Option<&str>,
        base_url: Option<&str>,
    ) -> BillingResult<String> {
        if !is_plausible_email(&customer.email) {
            return Err(BillingError::Validation(format!(
                "invalid email: {}",
                customer.email
            )));
        }
        if customer.name.trim().is_empty() {
            return Err(BillingError::Validation("name is required".to_string()));
        }
        if plan.stripe_price_id.is_empty() {
            return Err(BillingError::InvalidPlan(plan.name.clone()));
        }

        let accounts = self.accounts();
        let user = match accounts.user_by_email(&customer.email).await? {
            Some(user) => user,
            None => {
                accounts
                    .create_user(
                        &customer.email,
                        Some(customer.name.as_str()),
                        customer.phone.as_deref(),
                    )
                    .await?
            }
        };

        let customers = CustomerService::new(self.stripe.clone());
        let customer_data = CustomerData {
            email: customer.email.clone(),
            name: Some(customer.name.clone()),
            phone: customer.phone.clone(),
            invoice_emails: customer.invoice_emails,
        };

        // A stored customer id can go stale (deleted in the provider
        // dashboard); validate it with a live check before trusting it.
        let customer_id = match &user.stripe_customer_id {
            Some(id) if customers.is_live(id).await? => id.clone(),
            _ => {
                let created = customers.find_or_create(&customer_data).await?;
                accounts
                    .set_stripe_customer_id(user.id, created.id.as_str())
                    .await?;
                created.id.to_string()
            }
        };

        let checkout = CheckoutService::new(self.stripe.clone());
        let coupon = match coupon_code {
            Some(code) if !code.trim().is_empty() => {
                Some(checkout.validate_coupon(code.trim()).await?.id.to_string())
            }
            _ => None,
        };

        let trial_days = (plan.trial_days > 0).then_some(plan.trial_days as u32);
        let mut request = CheckoutSessionRequest {
            customer_id: customer_id.clone(),
            price_id: plan.stripe_price_id.clone(),
            trial_days,
            coupon,
            user_id: user.id,
            restaurant_id: None,
            plan_id: plan.id,
        };

        let session = match checkout.create_session(&request).await {
            Ok(session) => session,
            Err(e) if e.is_customer_missing() => {
                // The stored id passed the live check but died before the
                // session call. Recreate once and retry.
                tracing::warn!(
                    user_id = %user.id,
                    customer_id = %customer_id,
                    "Customer vanished between validation and checkout; recreating"
                );
                let recreated = customers.find_or_create(&customer_data).await?;
                accounts
                    .set_stripe_customer_id(user.id, recreated.id.as_str())
                    .await?;
                request.customer_id = recreated.id.to_string();
                checkout.create_session(&request).await?
            }
            Err(e) => return Err(e),
        };

        // Restaurant linkage must exist before a link can be issued.
        let restaurant_name = customer
            .restaurant_name
            .clone()
            .unwrap_or_else(|| customer.name.clone());
        let restaurant_id = accounts.ensure_restaurant(user.id, &restaurant_name).await?;

        let links = self.links();
        let link = links
            .create(CreateCheckoutLink {
                user_id: user.id,
                restaurant_id: Some(restaurant_id),
                plan_id: plan.id,
                stripe_customer_id: request.customer_id.clone(),
                checkout_url: session.url.clone(),
                trial_days: (plan.trial_days > 0).then_some(plan.trial_days),
                trial_enabled: plan.trial_days > 0,
            })
            .await?;

        let url = match base_url {
            Some(base) => format!("{}/subscription/{}", base.trim_end_matches('/'), link.id),
            None => links.redirect_url(link.id),
        };

        tracing::info!(
            user_id = %user.id,
            plan_id = %plan.id,
            link_id = %link.id,
            "Subscription checkout prepared"
        );

        Ok(url)
    }

    // =========================================================================
    // Webhook-driven state sync
    // =========================================================================

    /// Materialize or refresh the internal subscription record from a
    /// provider payload.
    pub async fn handle_subscription_event(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        let customer_id = customer_ref_id(&subscription.customer);
        let accounts = self.accounts();

        let user = match accounts.user_by_customer_id(&customer_id).await? {
            Some(user) => user,
            None => self.resolve_user_by_email(&customer_id, subscription).await?,
        };

        let restaurant_name = subscription
            .metadata
            .get("restaurant_name")
            .cloned()
            .or_else(|| user.name.clone())
            .unwrap_or_else(|| user.email.clone());
        let restaurant_id = accounts.ensure_restaurant(user.id, &restaurant_name).await?;

        let plan_id = self.resolve_plan_id(subscription).await;
        let status = map_status(subscription.status);
        let paused = subscription.pause_collection.is_some();

        self.upsert_subscription_record(subscription, restaurant_id, user.id, plan_id)
            .await?;

        self.history()
            .append(
                subscription.id.as_str(),
                Some(restaurant_id),
                Some(user.id),
                status.stored_status(paused),
                status.as_str(),
                "provider_event",
            )
            .await;

        // Link transitions are a best-effort side channel; their failure must
        // not fail the event.
        if let Some(plan_id) = plan_id {
            let links = self.links();
            match subscription.status {
                StripeSubStatus::Active | StripeSubStatus::Trialing => {
                    links.mark_used(user.id, plan_id).await;
                }
                StripeSubStatus::IncompleteExpired => {
                    links.mark_expired(user.id, plan_id).await;
                }
                _ => {}
            }
        }

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %user.id,
            restaurant_id = %restaurant_id,
            status = ?subscription.status,
            "Synced subscription from provider event"
        );

        Ok(())
    }

    /// Mark a subscription canceled from a provider cancellation payload.
    ///
    /// Written as an idempotent state-setter: it does not check what the row
    /// said before, so a late or duplicated delivery lands in the same place.
    pub async fn handle_cancellation(&self, subscription: &Subscription) -> BillingResult<()> {
        let canceled_at = subscription
            .canceled_at
            .map(ts)
            .unwrap_or_else(OffsetDateTime::now_utc);
        let cancel_at = subscription.cancel_at.map(ts);

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'failed', is_active = false,
                canceled_at = $1, cancel_at = $2, updated_at = NOW()
            WHERE stripe_subscription_id = $3
            "#,
        )
        .bind(canceled_at)
        .bind(cancel_at)
        .bind(subscription.id.as_str())
        .execute(&self.pool)
        .await?;

        self.history()
            .append(
                subscription.id.as_str(),
                None,
                None,
                "failed",
                map_status(subscription.status).as_str(),
                "cancellation",
            )
            .await;

        // Acknowledge provider-side only when the cancellation was not
        // already initiated there.
        if subscription.status != StripeSubStatus::Canceled && subscription.canceled_at.is_none() {
            let result = Subscription::cancel(
                self.stripe.inner(),
                &subscription.id,
                CancelSubscription::default(),
            )
            .await;
            if let Err(e) = result {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to acknowledge cancellation provider-side"
                );
            }
        }

        tracing::info!(
            subscription_id = %subscription.id,
            canceled_at = %canceled_at,
            "Subscription canceled"
        );

        Ok(())
    }

    /// Record a scheduled (end-of-period) cancellation.
    pub async fn handle_scheduled_cancellation(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        let reason = subscription
            .cancellation_details
            .as_ref()
            .and_then(|d| d.reason.as_ref());

        if !is_requested_scheduled_cancellation(subscription.cancel_at_period_end, reason) {
            tracing::debug!(
                subscription_id = %subscription.id,
                cancel_at_period_end = subscription.cancel_at_period_end,
                "Not a requested scheduled cancellation; ignoring"
            );
            return Ok(());
        }

        let cancel_at = subscription
            .cancel_at
            .map(ts)
            .unwrap_or_else(|| ts(subscription.current_period_end));

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at = $1, updated_at = NOW()
            WHERE stripe_subscription_id = $2
            "#,
        )
        .bind(cancel_at)
        .bind(subscription.id.as_str())
        .execute(&self.pool)
        .await?;

        self.history()
            .append(
                subscription.id.as_str(),
                None,
                None,
                "scheduled_cancellation",
                map_status(subscription.status).as_str(),
                "scheduled_cancellation",
            )
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            cancel_at = %cancel_at,
            "Recorded scheduled cancellation"
        );

        Ok(())
    }

    // =========================================================================
    // Provider-first mutations
    // =========================================================================

    /// Extend the trial. The provider is the source of truth for trial state:
    /// its mutation happens first, and the internal mirror only moves if it
    /// succeeded.
    pub async fn extend_trial(
        &self,
        subscription_id: &str,
        additional_days: u32,
    ) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let base = current.trial_end.filter(|end| *end > now).unwrap_or(now);
        let new_trial_end = base + (additional_days as i64) * 24 * 60 * 60;

        let params = UpdateSubscription {
            trial_end: Some(stripe::Scheduled::Timestamp(new_trial_end)),
            proration_behavior: Some(SubscriptionProrationBehavior::None),
            ..Default::default()
        };

        let updated = Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET trial_end = $1, updated_at = NOW()
            WHERE stripe_subscription_id = $2
            "#,
        )
        .bind(ts(new_trial_end))
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        self.history()
            .append(
                subscription_id,
                None,
                None,
                map_status(updated.status).stored_status(false),
                map_status(updated.status).as_str(),
                "trial_extended",
            )
            .await;

        tracing::info!(
            subscription_id = %subscription_id,
            additional_days = additional_days,
            trial_end = new_trial_end,
            "Extended trial"
        );

        Ok(updated)
    }

    /// Move an existing subscription onto a different plan. Provider first;
    /// the internal plan pointer only changes on success.
    pub async fn update_plan(
        &self,
        subscription_id: &str,
        new_plan: &Plan,
    ) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::StripeApi("Subscription has no items".to_string()))?;

        let mut metadata = HashMap::new();
        metadata.insert("plan_id".to_string(), new_plan.id.to_string());

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(new_plan.stripe_price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        let updated = Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_id = $1, updated_at = NOW()
            WHERE stripe_subscription_id = $2
            "#,
        )
        .bind(new_plan.id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        self.history()
            .append(
                subscription_id,
                None,
                None,
                map_status(updated.status).stored_status(false),
                map_status(updated.status).as_str(),
                "plan_changed",
            )
            .await;

        tracing::info!(
            subscription_id = %subscription_id,
            plan_id = %new_plan.id,
            "Updated subscription plan"
        );

        Ok(updated)
    }

    /// Unset a pending end-of-period cancellation. Provider first.
    pub async fn undo_cancellation(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(subscription_id)?;

        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(false);

        let updated = Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        let status = map_status(updated.status);
        let paused = updated.pause_collection.is_some();

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, is_active = $2, cancel_at = NULL, canceled_at = NULL,
                updated_at = NOW()
            WHERE stripe_subscription_id = $3
            "#,
        )
        .bind(status.stored_status(paused))
        .bind(status.grants_access(paused))
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        self.history()
            .append(
                subscription_id,
                None,
                None,
                status.stored_status(paused),
                status.as_str(),
                "cancellation_undone",
            )
            .await;

        tracing::info!(subscription_id = %subscription_id, "Undid scheduled cancellation");

        Ok(updated)
    }

    pub async fn get_subscription_details(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(subscription_id)?;
        Ok(Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?)
    }

    /// Cancel immediately on the provider side, then mirror. The webhook the
    /// provider sends in response lands in [`Self::handle_cancellation`],
    /// which is an idempotent setter, so the double write is harmless.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(subscription_id)?;

        let canceled = Subscription::cancel(
            self.stripe.inner(),
            &sub_id,
            CancelSubscription::default(),
        )
        .await?;

        self.handle_cancellation(&canceled).await?;

        tracing::info!(subscription_id = %subscription_id, "Canceled subscription");

        Ok(canceled)
    }

    // =========================================================================
    // Direct subscription (admin-initiated, no checkout)
    // =========================================================================

    /// Try to subscribe a restaurant without a checkout flow by reusing a
    /// stored payment method.
    ///
    /// Candidate order is load-bearing: (1) the payment method already
    /// backing an active/trialing subscription of this restaurant, (2) any
    /// stored card of any restaurant user, newest users first, (3) fall back
    /// to a checkout link. Each failed candidate falls through to the next.
    pub async fn create_direct_subscription(
        &self,
        restaurant_id: Uuid,
        plan: &Plan,
    ) -> BillingResult<DirectSubscriptionOutcome> {
        let accounts = self.accounts();
        let users = accounts.restaurant_users_by_recency(restaurant_id).await?;

        let mut candidates: Vec<(Uuid, String, String)> = Vec::new();

        let active: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT s.profile_id, s.payment_method_id
            FROM subscriptions s
            WHERE s.restaurant_id = $1 AND s.is_active = true
              AND s.payment_method_id IS NOT NULL
            ORDER BY s.updated_at DESC
            "#,
        )
        .bind(restaurant_id)
        .fetch_all(&self.pool)
        .await?;

        for (profile_id, payment_method_id) in active {
            if let Some(user) = users.iter().find(|u| u.id == profile_id) {
                if let Some(customer_id) = &user.stripe_customer_id {
                    candidates.push((user.id, customer_id.clone(), payment_method_id));
                }
            }
        }

        for user in &users {
            let Some(customer_id) = &user.stripe_customer_id else {
                continue;
            };
            match self.list_card_payment_methods(customer_id).await {
                Ok(methods) => {
                    for method in methods {
                        let entry = (user.id, customer_id.clone(), method.id.to_string());
                        if !candidates.contains(&entry) {
                            candidates.push(entry);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.id,
                        error = %e,
                        "Failed to list payment methods for candidate user"
                    );
                }
            }
        }

        for (user_id, customer_id, payment_method_id) in &candidates {
            match self
                .attempt_immediate_subscription(
                    restaurant_id,
                    *user_id,
                    customer_id,
                    payment_method_id,
                    plan,
                )
                .await
            {
                Ok(subscription) => {
                    return Ok(DirectSubscriptionOutcome::Subscribed {
                        stripe_subscription_id: subscription.id.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        restaurant_id = %restaurant_id,
                        user_id = %user_id,
                        payment_method_id = %payment_method_id,
                        error = %e,
                        "Direct subscription candidate failed; trying next"
                    );
                }
            }
        }

        // Graceful degradation: no candidate worked, hand back a checkout
        // link for the restaurant owner.
        let restaurant = accounts.restaurant_by_id(restaurant_id).await?;
        let owner = match users.into_iter().next() {
            Some(user) => user,
            None => {
                let owner_id = restaurant.owner_id.ok_or_else(|| {
                    BillingError::NotFound(format!("no users for restaurant {}", restaurant_id))
                })?;
                accounts.user_by_id(owner_id).await?
            }
        };

        let url = self
            .setup_subscription(
                SetupCustomer {
                    email: owner.email.clone(),
                    name: owner.name.clone().unwrap_or_else(|| owner.email.clone()),
                    phone: owner.phone.clone(),
                    restaurant_name: Some(restaurant.name.clone()),
                    invoice_emails: None,
                },
                plan.clone(),
                None,
                None,
            )
            .await?;

        Ok(DirectSubscriptionOutcome::CheckoutLink { url })
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<PaymentMethod>> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let mut params = ListPaymentMethods::new();
        params.customer = Some(customer_id);
        params.type_ = Some(PaymentMethodTypeFilter::Card);

        let methods = PaymentMethod::list(self.stripe.inner(), &params).await?;
        Ok(methods.data)
    }

    /// Create a subscription that must charge immediately or fail. Failures
    /// surface to the candidate loop.
    async fn attempt_immediate_subscription(
        &self,
        restaurant_id: Uuid,
        user_id: Uuid,
        customer_id: &str,
        payment_method_id: &str,
        plan: &Plan,
    ) -> BillingResult<Subscription> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let mut metadata = HashMap::new();
        metadata.insert("plan_id".to_string(), plan.id.to_string());
        metadata.insert("restaurant_id".to_string(), restaurant_id.to_string());
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("direct".to_string(), "true".to_string());

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(plan.stripe_price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.default_payment_method = Some(payment_method_id);
        params.payment_behavior = Some(SubscriptionPaymentBehavior::ErrorIfIncomplete);
        params.metadata = Some(metadata);

        let subscription = Subscription::create(self.stripe.inner(), params).await?;

        self.upsert_subscription_record(&subscription, restaurant_id, user_id, Some(plan.id))
            .await?;

        self.history()
            .append(
                subscription.id.as_str(),
                Some(restaurant_id),
                Some(user_id),
                map_status(subscription.status).stored_status(false),
                map_status(subscription.status).as_str(),
                "direct_subscription",
            )
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            restaurant_id = %restaurant_id,
            user_id = %user_id,
            "Created direct subscription"
        );

        Ok(subscription)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Resolve a user when no one carries the event's customer id yet: by
    /// email from event metadata, then by email from the provider's customer
    /// record, creating the user as a last resort.
    async fn resolve_user_by_email(
        &self,
        customer_id: &str,
        subscription: &Subscription,
    ) -> BillingResult<UserRecord> {
        let accounts = self.accounts();

        let (email, name, phone) = match subscription.metadata.get("email") {
            Some(email) => (email.clone(), None, None),
            None => {
                let parsed = customer_id
                    .parse::<CustomerId>()
                    .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;
                let customer = Customer::retrieve(self.stripe.inner(), &parsed, &[]).await?;
                let email = customer.email.clone().ok_or_else(|| {
                    BillingError::NotFound(format!("customer {} has no email", customer_id))
                })?;
                (email, customer.name.clone(), customer.phone.clone())
            }
        };

        let user = match accounts.user_by_email(&email).await? {
            Some(user) => user,
            None => {
                tracing::info!(
                    customer_id = %customer_id,
                    email = %email,
                    "No user for provider customer; creating from customer data"
                );
                accounts
                    .create_user(&email, name.as_deref(), phone.as_deref())
                    .await?
            }
        };

        accounts.set_stripe_customer_id(user.id, customer_id).await?;
        accounts.user_by_id(user.id).await
    }

    async fn resolve_plan_id(&self, subscription: &Subscription) -> Option<Uuid> {
        if let Some(plan_id) = subscription
            .metadata
            .get("plan_id")
            .and_then(|v| Uuid::parse_str(v).ok())
        {
            return Some(plan_id);
        }

        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string())?;

        let catalog = PlanCatalog::new(self.pool.clone());
        match catalog.by_stripe_price_id(&price_id).await {
            Ok(plan) => plan.map(|p| p.id),
            Err(e) => {
                tracing::warn!(price_id = %price_id, error = %e, "Plan lookup failed");
                None
            }
        }
    }

    /// Idempotent upsert keyed by the external subscription id.
    async fn upsert_subscription_record(
        &self,
        subscription: &Subscription,
        restaurant_id: Uuid,
        profile_id: Uuid,
        plan_id: Option<Uuid>,
    ) -> BillingResult<()> {
        let status = map_status(subscription.status);
        let paused = subscription.pause_collection.is_some();

        let payment_method_id = subscription
            .default_payment_method
            .as_ref()
            .map(payment_method_ref_id);

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, stripe_subscription_id, restaurant_id, profile_id, plan_id,
                status, is_active, current_period_start, current_period_end,
                trial_start, trial_end, canceled_at, cancel_at,
                payment_method_id, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW()
            )
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                restaurant_id = EXCLUDED.restaurant_id,
                profile_id = EXCLUDED.profile_id,
                plan_id = COALESCE(EXCLUDED.plan_id, subscriptions.plan_id),
                status = EXCLUDED.status,
                is_active = EXCLUDED.is_active,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                trial_start = EXCLUDED.trial_start,
                trial_end = EXCLUDED.trial_end,
                canceled_at = EXCLUDED.canceled_at,
                cancel_at = EXCLUDED.cancel_at,
                payment_method_id = EXCLUDED.payment_method_id,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription.id.as_str())
        .bind(restaurant_id)
        .bind(profile_id)
        .bind(plan_id)
        .bind(status.stored_status(paused))
        .bind(status.grants_access(paused))
        .bind(ts(subscription.current_period_start))
        .bind(ts(subscription.current_period_end))
        .bind(subscription.trial_start.map(ts))
        .bind(subscription.trial_end.map(ts))
        .bind(subscription.canceled_at.map(ts))
        .bind(subscription.cancel_at.map(ts))
        .bind(payment_method_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    subscription_id
        .parse::<SubscriptionId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plausible_emails() {
        assert!(is_plausible_email("owner@bistro.example"));
        assert!(is_plausible_email("a@b.co"));
        assert!(!is_plausible_email(""));
        assert!(!is_plausible_email("no-at-sign"));
        assert!(!is_plausible_email("@bistro.example"));
        assert!(!is_plausible_email("owner@"));
        assert!(!is_plausible_email("owner@nodot"));
        assert!(!is_plausible_email("owner@.leading"));
    }

    #[test]
    fn scheduled_cancellation_requires_explicit_reason() {
        let requested = CancellationDetailsReason::CancellationRequested;
        assert!(is_requested_scheduled_cancellation(true, Some(&requested)));
        assert!(!is_requested_scheduled_cancellation(false, Some(&requested)));
        assert!(!is_requested_scheduled_cancellation(true, None));
    }

    #[test]
    fn status_mapping_covers_provider_states() {
        assert_eq!(
            map_status(StripeSubStatus::Active),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_status(StripeSubStatus::IncompleteExpired),
            SubscriptionStatus::IncompleteExpired
        );
        assert_eq!(
            map_status(StripeSubStatus::Paused),
            SubscriptionStatus::Paused
        );
    }
}
