//! Stripe customer management
//!
//! Customer creation is search-before-create: the provider has no uniqueness
//! constraint on email, so creating blindly under webhook replay would mint
//! duplicate customers. Search by email first, patch what needs patching,
//! create only when nothing matches.

use std::collections::HashMap;

use stripe::{
    CreateCustomer, Customer, CustomerId, ListCustomers, UpdateCustomer,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Input for customer resolution.
#[derive(Debug, Clone, Default)]
pub struct CustomerData {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// Whether the customer wants invoice emails; mirrored into metadata so
    /// support can see it in the provider dashboard.
    pub invoice_emails: Option<bool>,
}

pub struct CustomerService {
    stripe: StripeClient,
}

impl CustomerService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Find an existing customer by email or create a new one.
    ///
    /// Safe to call twice with identical input: the second call finds the
    /// customer created by the first and returns it without creating another.
    pub async fn find_or_create(&self, data: &CustomerData) -> BillingResult<Customer> {
        let mut list_params = ListCustomers::new();
        list_params.email = Some(&data.email);
        list_params.limit = Some(1);

        let existing = Customer::list(self.stripe.inner(), &list_params).await?;

        if let Some(customer) = existing.data.into_iter().next() {
            tracing::info!(
                customer_id = %customer.id,
                email = %data.email,
                "Reusing existing Stripe customer"
            );
            return self.patch_invoice_preference(customer, data).await;
        }

        let mut metadata = HashMap::new();
        metadata.insert("platform".to_string(), "menucraft".to_string());
        if let Some(invoice_emails) = data.invoice_emails {
            metadata.insert("invoice_emails".to_string(), invoice_emails.to_string());
        }

        let params = CreateCustomer {
            email: Some(&data.email),
            name: data.name.as_deref(),
            phone: data.phone.as_deref(),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            customer_id = %customer.id,
            email = %data.email,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    /// Check that a stored customer id still refers to a live customer.
    ///
    /// Returns `Ok(false)` both for provider-side deletion and for ids the
    /// provider no longer knows; any other failure propagates.
    pub async fn is_live(&self, customer_id: &str) -> BillingResult<bool> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        match Customer::retrieve(self.stripe.inner(), &customer_id, &[]).await {
            Ok(customer) => Ok(!customer.deleted),
            Err(e) => {
                let wrapped = BillingError::Stripe(e);
                if wrapped.is_customer_missing() {
                    Ok(false)
                } else {
                    Err(wrapped)
                }
            }
        }
    }

    /// Update the invoice-preference marker when it differs from what the
    /// customer already carries. No-op when nothing changed.
    async fn patch_invoice_preference(
        &self,
        customer: Customer,
        data: &CustomerData,
    ) -> BillingResult<Customer> {
        let Some(invoice_emails) = data.invoice_emails else {
            return Ok(customer);
        };

        let wanted = invoice_emails.to_string();
        let current = customer
            .metadata
            .as_ref()
            .and_then(|m| m.get("invoice_emails"))
            .cloned();

        if current.as_deref() == Some(wanted.as_str()) {
            return Ok(customer);
        }

        let mut metadata = customer.metadata.clone().unwrap_or_default();
        metadata.insert("invoice_emails".to_string(), wanted);

        let params = UpdateCustomer {
            metadata: Some(metadata),
            ..Default::default()
        };

        let updated = Customer::update(self.stripe.inner(), &customer.id, params).await?;

        tracing::info!(
            customer_id = %updated.id,
            invoice_emails = invoice_emails,
            "Patched customer invoice preference"
        );

        Ok(updated)
    }
}
