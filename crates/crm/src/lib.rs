// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! menucraft CRM Module
//!
//! Consumes Pipedrive deal-updated events, derives a canonical subscription
//! input from the deal and its linked records, and keeps the deal's
//! payment-link field converged against the billing core. Built around one
//! rule: a webhook-driven write must be able to recognize itself on the next
//! delivery, or the system loops.

pub mod cache;
pub mod client;
pub mod error;
pub mod fields;
pub mod fingerprint;
pub mod input;
pub mod phone;
pub mod reps;
pub mod sync;

pub use cache::TtlCache;
pub use client::{
    ContactEntry, ContactValue, CrmConfig, CrmUser, Deal, EntityRef, Organization, Person,
    PipedriveClient,
};
pub use error::{CrmError, CrmResult};
pub use fields::{is_checkout_like, CrmDealFieldRef, CustomFieldValue, DealField};
pub use fingerprint::{fingerprint_is_current, is_legacy_fingerprint, SubscriptionInput};
pub use phone::normalize_us_phone;
pub use reps::{normalize_slack_id, resolve_sales_rep};
pub use sync::{CrmSyncEngine, SyncOutcome};

use std::sync::Arc;

use menucraft_billing::BillingService;

/// CRM service bundle: the gateway plus the sync engine wired to billing.
pub struct CrmService {
    pub client: Arc<PipedriveClient>,
    pub sync: CrmSyncEngine,
}

impl CrmService {
    pub fn new(config: CrmConfig, billing: Arc<BillingService>) -> Self {
        let client = Arc::new(PipedriveClient::new(config));
        let sync = CrmSyncEngine::new(client.clone(), billing);
        Self { client, sync }
    }

    pub fn from_env(billing: Arc<BillingService>) -> CrmResult<Self> {
        Ok(Self::new(CrmConfig::from_env()?, billing))
    }
}
