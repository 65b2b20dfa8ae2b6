//! Application state

use std::sync::Arc;

use menucraft_billing::BillingService;
use menucraft_crm::CrmService;
use sqlx::PgPool;

use crate::config::ApiConfig;

/// Shared application state, wired by explicit construction in `main`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: ApiConfig,
    pub billing: Arc<BillingService>,
    pub crm: Arc<CrmService>,
}
